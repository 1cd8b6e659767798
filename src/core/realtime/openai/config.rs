//! OpenAI Realtime API configuration types.
//!
//! This module contains:
//! - Endpoint and protocol constants
//! - Voice, audio format and modality enums
//! - [`RealtimeSessionConfig`], the caller-supplied session configuration
//! - [`ConnectionOptions`], transport timing and retry tunables

use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

use super::messages::{InputAudioTranscription, MaxTokens, SessionUpdate, ToolDef, TurnDetection};
use crate::config::pricing::TokenPricing;
use crate::core::realtime::base::{RealtimeError, RealtimeResult, RetryConfig, ToolDefinition};

/// OpenAI Realtime API WebSocket endpoint.
pub const OPENAI_REALTIME_URL: &str = "wss://api.openai.com/v1/realtime";

/// Protocol version header sent during the websocket upgrade.
pub const OPENAI_BETA_HEADER: &str = "OpenAI-Beta";

/// Value of [`OPENAI_BETA_HEADER`].
pub const OPENAI_BETA_VALUE: &str = "realtime=v1";

/// Model used when none is configured.
pub const DEFAULT_REALTIME_MODEL: &str = "gpt-4o-realtime-preview";

/// Native sample rate of pcm16 audio for OpenAI Realtime API.
pub const OPENAI_REALTIME_SAMPLE_RATE: u32 = 24000;

/// Capacity of the caller-facing chunk channel.
pub const RESPONSE_CHANNEL_SIZE: usize = 10;

/// Default transcription model for input audio.
pub const DEFAULT_TRANSCRIPTION_MODEL: &str = "whisper-1";

// =============================================================================
// Voices
// =============================================================================

/// Available voices for OpenAI Realtime API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpenAIRealtimeVoice {
    #[default]
    Alloy,
    Ash,
    Ballad,
    Coral,
    Echo,
    Sage,
    Shimmer,
    Verse,
}

impl OpenAIRealtimeVoice {
    /// Convert to the API parameter value.
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Alloy => "alloy",
            Self::Ash => "ash",
            Self::Ballad => "ballad",
            Self::Coral => "coral",
            Self::Echo => "echo",
            Self::Sage => "sage",
            Self::Shimmer => "shimmer",
            Self::Verse => "verse",
        }
    }

    /// Parse from string, with fallback to default.
    pub fn from_str_or_default(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "ash" => Self::Ash,
            "ballad" => Self::Ballad,
            "coral" => Self::Coral,
            "echo" => Self::Echo,
            "sage" => Self::Sage,
            "shimmer" => Self::Shimmer,
            "verse" => Self::Verse,
            _ => Self::Alloy,
        }
    }
}

impl std::fmt::Display for OpenAIRealtimeVoice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Audio Formats
// =============================================================================

/// Audio encodings accepted and produced by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OpenAIRealtimeAudioFormat {
    /// PCM 16-bit signed little-endian (default)
    #[default]
    #[serde(rename = "pcm16")]
    Pcm16,
    /// G.711 u-law
    #[serde(rename = "g711_ulaw")]
    G711Ulaw,
    /// G.711 a-law
    #[serde(rename = "g711_alaw")]
    G711Alaw,
}

impl OpenAIRealtimeAudioFormat {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pcm16 => "pcm16",
            Self::G711Ulaw => "g711_ulaw",
            Self::G711Alaw => "g711_alaw",
        }
    }

    /// Native sample rate for this encoding.
    #[inline]
    pub fn sample_rate(&self) -> u32 {
        match self {
            Self::Pcm16 => OPENAI_REALTIME_SAMPLE_RATE,
            Self::G711Ulaw | Self::G711Alaw => 8000,
        }
    }
}

impl std::fmt::Display for OpenAIRealtimeAudioFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Modalities
// =============================================================================

/// Output modalities for OpenAI Realtime API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Text,
    Audio,
}

// =============================================================================
// Connection Options
// =============================================================================

/// Transport timing and retry tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionOptions {
    /// Endpoint without the model query parameter
    pub base_url: String,
    /// Interval between keepalive pings
    pub heartbeat_interval_ms: u64,
    /// How long to wait for `session.created` after connecting
    pub setup_timeout_ms: u64,
    /// Deadline for a single socket write
    pub write_timeout_ms: u64,
    /// Deadline for the TCP + TLS + upgrade of one attempt
    pub connect_timeout_ms: u64,
    /// Backoff between connection attempts
    pub retry: RetryConfig,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            base_url: OPENAI_REALTIME_URL.to_string(),
            heartbeat_interval_ms: 30_000,
            setup_timeout_ms: 10_000,
            write_timeout_ms: 10_000,
            connect_timeout_ms: 30_000,
            retry: RetryConfig::default(),
        }
    }
}

impl ConnectionOptions {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn setup_timeout(&self) -> Duration {
        Duration::from_millis(self.setup_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

// =============================================================================
// Session Configuration
// =============================================================================

/// Caller-supplied configuration for a realtime session.
///
/// `turn_detection: None` means the caller controls turn-taking and the
/// session disables server voice activity detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeSessionConfig {
    /// Model name, sent as the `model` query parameter
    pub model: String,
    /// Response modalities
    pub modalities: Vec<Modality>,
    /// System instructions
    pub instructions: Option<String>,
    /// Voice for audio output
    pub voice: OpenAIRealtimeVoice,
    /// Input audio encoding
    pub input_audio_format: OpenAIRealtimeAudioFormat,
    /// Output audio encoding
    pub output_audio_format: OpenAIRealtimeAudioFormat,
    /// Sample rate of the audio the caller will send
    pub input_sample_rate: u32,
    /// Transcription of the caller's audio
    pub input_audio_transcription: Option<InputAudioTranscription>,
    /// Server-side turn detection
    pub turn_detection: Option<TurnDetection>,
    /// Tools the model may call
    pub tools: Vec<ToolDefinition>,
    /// Tool choice strategy (auto, none, required)
    pub tool_choice: Option<String>,
    /// Sampling temperature
    pub temperature: Option<f32>,
    /// Cap on output tokens per response
    pub max_response_output_tokens: Option<i32>,
    /// Rates overriding the built-in pricing table
    pub pricing: Option<TokenPricing>,
    /// Transport settings
    pub connection: ConnectionOptions,
}

impl Default for RealtimeSessionConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_REALTIME_MODEL.to_string(),
            modalities: vec![Modality::Text, Modality::Audio],
            instructions: None,
            voice: OpenAIRealtimeVoice::default(),
            input_audio_format: OpenAIRealtimeAudioFormat::Pcm16,
            output_audio_format: OpenAIRealtimeAudioFormat::Pcm16,
            input_sample_rate: OPENAI_REALTIME_SAMPLE_RATE,
            input_audio_transcription: None,
            turn_detection: Some(TurnDetection::default()),
            tools: Vec::new(),
            tool_choice: None,
            temperature: Some(0.8),
            max_response_output_tokens: None,
            pricing: None,
            connection: ConnectionOptions::default(),
        }
    }
}

impl RealtimeSessionConfig {
    /// Whether server-side voice activity detection is enabled.
    #[inline]
    pub fn vad_enabled(&self) -> bool {
        self.turn_detection.is_some()
    }

    /// Check the configuration before dialing.
    ///
    /// A sample rate that differs from the input format's native rate is
    /// accepted with a warning.
    pub fn validate(&self) -> RealtimeResult<()> {
        if self.model.trim().is_empty() {
            return Err(RealtimeError::InvalidConfiguration(
                "model must not be empty".to_string(),
            ));
        }
        if self.modalities.is_empty() {
            return Err(RealtimeError::InvalidConfiguration(
                "at least one modality is required".to_string(),
            ));
        }
        if self.input_sample_rate == 0 {
            return Err(RealtimeError::InvalidConfiguration(
                "input sample rate must be positive".to_string(),
            ));
        }
        let native_rate = self.input_audio_format.sample_rate();
        if self.input_sample_rate != native_rate {
            tracing::warn!(
                "Input sample rate {}Hz differs from the {}Hz expected for {}; audio may be misinterpreted",
                self.input_sample_rate,
                native_rate,
                self.input_audio_format
            );
        }
        if let Some(temperature) = self.temperature {
            if !(0.0..=2.0).contains(&temperature) {
                return Err(RealtimeError::InvalidConfiguration(format!(
                    "temperature {} out of range 0.0..=2.0",
                    temperature
                )));
            }
        }
        for (name, value) in [
            ("heartbeat_interval_ms", self.connection.heartbeat_interval_ms),
            ("setup_timeout_ms", self.connection.setup_timeout_ms),
            ("write_timeout_ms", self.connection.write_timeout_ms),
            ("connect_timeout_ms", self.connection.connect_timeout_ms),
        ] {
            if value == 0 {
                return Err(RealtimeError::InvalidConfiguration(format!(
                    "{} must be positive",
                    name
                )));
            }
        }
        self.endpoint_url().map(|_| ())
    }

    /// Endpoint URL with the model query parameter.
    pub fn endpoint_url(&self) -> RealtimeResult<Url> {
        let mut url = Url::parse(&self.connection.base_url).map_err(|e| {
            RealtimeError::InvalidConfiguration(format!(
                "invalid base url {}: {}",
                self.connection.base_url, e
            ))
        })?;
        match url.scheme() {
            "ws" | "wss" => {}
            other => {
                return Err(RealtimeError::InvalidConfiguration(format!(
                    "unsupported url scheme {}",
                    other
                )));
            }
        }
        url.query_pairs_mut().append_pair("model", &self.model);
        Ok(url)
    }

    /// Build the full `session.update` payload for this configuration.
    ///
    /// Disabled turn detection is sent as an explicit `null`.
    pub fn session_update(&self) -> SessionUpdate {
        SessionUpdate {
            modalities: Some(self.modalities.clone()),
            instructions: self.instructions.clone(),
            voice: Some(self.voice),
            input_audio_format: Some(self.input_audio_format),
            output_audio_format: Some(self.output_audio_format),
            input_audio_transcription: self.input_audio_transcription.clone(),
            turn_detection: Some(self.turn_detection.clone()),
            tools: if self.tools.is_empty() {
                None
            } else {
                Some(self.tools.iter().map(ToolDef::from).collect())
            },
            tool_choice: self.tool_choice.clone(),
            temperature: self.temperature,
            max_response_output_tokens: self.max_response_output_tokens.map(MaxTokens::Number),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
