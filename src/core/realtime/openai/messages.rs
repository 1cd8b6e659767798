//! OpenAI Realtime API WebSocket message types.
//!
//! Every message is a JSON envelope tagged by its `type` field.
//!
//! # Protocol Overview
//!
//! Client events (sent to server), wrapped in a [`ClientEnvelope`] that adds
//! the locally generated `event_id`:
//! - session.update - Update session configuration
//! - input_audio_buffer.append / commit / clear - Input audio buffer control
//! - conversation.item.create - Add a message, function call or function output
//! - response.create / response.cancel - Manual response control
//!
//! Server events are decoded by [`parse_server_event`]. An envelope with a
//! `type` this module does not know decodes to [`ServerEvent::Unknown`]
//! instead of failing, so new server events never break a session.

use base64::prelude::*;
use serde::{Deserialize, Serialize};

use super::config::{
    DEFAULT_TRANSCRIPTION_MODEL, Modality, OpenAIRealtimeAudioFormat, OpenAIRealtimeVoice,
};
use crate::core::realtime::base::{RealtimeError, RealtimeResult, ToolDefinition};

// =============================================================================
// Session Configuration
// =============================================================================

/// Payload of a `session.update` event.
///
/// Every field is optional; omitted fields leave the server setting
/// unchanged. `turn_detection` has three states: omitted (`None`), explicitly
/// disabled (`Some(None)`, serialized as `null`) and enabled.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modalities: Option<Vec<Modality>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<OpenAIRealtimeVoice>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_format: Option<OpenAIRealtimeAudioFormat>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_audio_format: Option<OpenAIRealtimeAudioFormat>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<InputAudioTranscription>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn_detection: Option<Option<TurnDetection>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDef>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_response_output_tokens: Option<MaxTokens>,
}

impl SessionUpdate {
    /// An update that only replaces the system instructions.
    pub fn instructions_only(instructions: impl Into<String>) -> Self {
        Self {
            instructions: Some(instructions.into()),
            ..Default::default()
        }
    }
}

/// Maximum tokens configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MaxTokens {
    /// Specific number of tokens
    Number(i32),
    /// Unlimited, sent as "inf"
    Infinite(String),
}

/// Input audio transcription configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputAudioTranscription {
    /// Transcription model (e.g., "whisper-1")
    pub model: String,
}

impl Default for InputAudioTranscription {
    fn default() -> Self {
        Self {
            model: DEFAULT_TRANSCRIPTION_MODEL.to_string(),
        }
    }
}

/// Server-side turn detection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TurnDetection {
    /// Voice activity detection on audio energy
    #[serde(rename = "server_vad")]
    ServerVad {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        threshold: Option<f32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        prefix_padding_ms: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        silence_duration_ms: Option<u32>,
        /// Whether to create a response when a turn ends
        #[serde(default, skip_serializing_if = "Option::is_none")]
        create_response: Option<bool>,
        /// Whether caller speech interrupts a response in progress
        #[serde(default, skip_serializing_if = "Option::is_none")]
        interrupt_response: Option<bool>,
    },
    /// Turn detection driven by a model of the conversation
    #[serde(rename = "semantic_vad")]
    SemanticVad {
        /// low, medium, high or auto
        #[serde(default, skip_serializing_if = "Option::is_none")]
        eagerness: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        create_response: Option<bool>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        interrupt_response: Option<bool>,
    },
}

impl Default for TurnDetection {
    fn default() -> Self {
        TurnDetection::ServerVad {
            threshold: Some(0.5),
            prefix_padding_ms: Some(300),
            silence_duration_ms: Some(500),
            create_response: None,
            interrupt_response: None,
        }
    }
}

/// Tool definition in wire form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDef {
    /// Tool type (always "function")
    #[serde(rename = "type")]
    pub tool_type: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
}

impl From<&ToolDefinition> for ToolDef {
    fn from(def: &ToolDefinition) -> Self {
        Self {
            tool_type: "function".to_string(),
            name: def.name.clone(),
            description: (!def.description.is_empty()).then(|| def.description.clone()),
            parameters: Some(def.parameters.clone()),
        }
    }
}

// =============================================================================
// Conversation Items
// =============================================================================

/// Conversation item: a message, a function call or a function call output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationItem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// message, function_call or function_call_output
    #[serde(rename = "type")]
    pub item_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// user, assistant or system
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Vec<ContentPart>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

impl ConversationItem {
    /// A user message with a single text part.
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            item_type: "message".to_string(),
            role: Some("user".to_string()),
            content: Some(vec![ContentPart {
                content_type: "input_text".to_string(),
                text: Some(text.into()),
                ..Default::default()
            }]),
            ..Default::default()
        }
    }

    /// A function call issued on the caller's behalf.
    pub fn function_call(
        call_id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            item_type: "function_call".to_string(),
            call_id: Some(call_id.into()),
            name: Some(name.into()),
            arguments: Some(arguments.into()),
            ..Default::default()
        }
    }

    /// The result of a function call.
    pub fn function_call_output(call_id: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            item_type: "function_call_output".to_string(),
            call_id: Some(call_id.into()),
            output: Some(output.into()),
            ..Default::default()
        }
    }

    #[inline]
    pub fn is_function_call(&self) -> bool {
        self.item_type == "function_call"
    }
}

/// Content part within a conversation item.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentPart {
    /// input_text, input_audio, text or audio
    #[serde(rename = "type")]
    pub content_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Base64 encoded audio
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
}

// =============================================================================
// Response Configuration
// =============================================================================

/// Per-response overrides for `response.create`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modalities: Option<Vec<Modality>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice: Option<OpenAIRealtimeVoice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_audio_format: Option<OpenAIRealtimeAudioFormat>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDef>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<MaxTokens>,
}

// =============================================================================
// Client Events (sent to server)
// =============================================================================

/// Client events sent to the OpenAI Realtime API.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionUpdate },

    /// Append base64 audio to the input buffer
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioBufferAppend { audio: String },

    #[serde(rename = "input_audio_buffer.commit")]
    InputAudioBufferCommit {},

    #[serde(rename = "input_audio_buffer.clear")]
    InputAudioBufferClear {},

    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate {
        /// Insert after this item instead of at the end
        #[serde(skip_serializing_if = "Option::is_none")]
        previous_item_id: Option<String>,
        item: ConversationItem,
    },

    #[serde(rename = "response.create")]
    ResponseCreate {
        #[serde(skip_serializing_if = "Option::is_none")]
        response: Option<ResponseConfig>,
    },

    #[serde(rename = "response.cancel")]
    ResponseCancel {},
}

impl ClientEvent {
    /// Create an audio append event from raw bytes.
    pub fn audio_append(data: &[u8]) -> Self {
        ClientEvent::InputAudioBufferAppend {
            audio: BASE64_STANDARD.encode(data),
        }
    }

    /// Append an item at the end of the conversation.
    pub fn item_create(item: ConversationItem) -> Self {
        ClientEvent::ConversationItemCreate {
            previous_item_id: None,
            item,
        }
    }

    /// The wire discriminator of this event.
    pub const fn event_type(&self) -> &'static str {
        match self {
            ClientEvent::SessionUpdate { .. } => "session.update",
            ClientEvent::InputAudioBufferAppend { .. } => "input_audio_buffer.append",
            ClientEvent::InputAudioBufferCommit {} => "input_audio_buffer.commit",
            ClientEvent::InputAudioBufferClear {} => "input_audio_buffer.clear",
            ClientEvent::ConversationItemCreate { .. } => "conversation.item.create",
            ClientEvent::ResponseCreate { .. } => "response.create",
            ClientEvent::ResponseCancel {} => "response.cancel",
        }
    }
}

/// A client event with its locally generated id.
#[derive(Debug, Clone, Serialize)]
pub struct ClientEnvelope {
    pub event_id: String,
    #[serde(flatten)]
    pub event: ClientEvent,
}

// =============================================================================
// Server Events (received from server)
// =============================================================================

/// Server events received from the OpenAI Realtime API.
///
/// Fields the session does not depend on default when absent, so a sparse
/// but well-typed envelope still decodes.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "error")]
    Error { error: ApiError },

    #[serde(rename = "session.created")]
    SessionCreated { session: SessionInfo },

    #[serde(rename = "session.updated")]
    SessionUpdated { session: SessionInfo },

    #[serde(rename = "input_audio_buffer.committed")]
    InputAudioBufferCommitted {
        #[serde(default)]
        previous_item_id: Option<String>,
        #[serde(default)]
        item_id: String,
    },

    #[serde(rename = "input_audio_buffer.cleared")]
    InputAudioBufferCleared {},

    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted {
        #[serde(default)]
        audio_start_ms: u64,
        #[serde(default)]
        item_id: String,
    },

    #[serde(rename = "input_audio_buffer.speech_stopped")]
    SpeechStopped {
        #[serde(default)]
        audio_end_ms: u64,
        #[serde(default)]
        item_id: String,
    },

    #[serde(rename = "conversation.item.created")]
    ConversationItemCreated {
        #[serde(default)]
        previous_item_id: Option<String>,
        item: ConversationItem,
    },

    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    TranscriptionCompleted {
        #[serde(default)]
        item_id: String,
        #[serde(default)]
        content_index: u32,
        transcript: String,
    },

    #[serde(rename = "conversation.item.input_audio_transcription.failed")]
    TranscriptionFailed {
        #[serde(default)]
        item_id: String,
        #[serde(default)]
        content_index: u32,
        error: ApiError,
    },

    #[serde(rename = "response.created")]
    ResponseCreated { response: ResponseInfo },

    #[serde(rename = "response.done")]
    ResponseDone { response: ResponseInfo },

    #[serde(rename = "response.output_item.added")]
    OutputItemAdded {
        #[serde(default)]
        response_id: String,
        #[serde(default)]
        output_index: u32,
        item: ConversationItem,
    },

    #[serde(rename = "response.output_item.done")]
    OutputItemDone {
        #[serde(default)]
        response_id: String,
        #[serde(default)]
        output_index: u32,
        item: ConversationItem,
    },

    #[serde(rename = "response.content_part.added")]
    ContentPartAdded {
        #[serde(default)]
        response_id: String,
        #[serde(default)]
        item_id: String,
        #[serde(default)]
        output_index: u32,
        #[serde(default)]
        content_index: u32,
        part: ContentPart,
    },

    #[serde(rename = "response.content_part.done")]
    ContentPartDone {
        #[serde(default)]
        response_id: String,
        #[serde(default)]
        item_id: String,
        #[serde(default)]
        output_index: u32,
        #[serde(default)]
        content_index: u32,
        part: ContentPart,
    },

    #[serde(rename = "response.text.delta")]
    TextDelta {
        #[serde(flatten)]
        position: ContentPosition,
        delta: String,
    },

    #[serde(rename = "response.text.done")]
    TextDone {
        #[serde(flatten)]
        position: ContentPosition,
        text: String,
    },

    #[serde(rename = "response.audio.delta")]
    AudioDelta {
        #[serde(flatten)]
        position: ContentPosition,
        /// Base64-encoded audio
        delta: String,
    },

    #[serde(rename = "response.audio.done")]
    AudioDone {
        #[serde(flatten)]
        position: ContentPosition,
    },

    #[serde(rename = "response.audio_transcript.delta")]
    AudioTranscriptDelta {
        #[serde(flatten)]
        position: ContentPosition,
        delta: String,
    },

    #[serde(rename = "response.audio_transcript.done")]
    AudioTranscriptDone {
        #[serde(flatten)]
        position: ContentPosition,
        transcript: String,
    },

    #[serde(rename = "response.function_call_arguments.delta")]
    FunctionCallArgumentsDelta {
        #[serde(default)]
        response_id: String,
        #[serde(default)]
        item_id: String,
        #[serde(default)]
        output_index: u32,
        #[serde(default)]
        call_id: String,
        delta: String,
    },

    #[serde(rename = "response.function_call_arguments.done")]
    FunctionCallArgumentsDone {
        #[serde(default)]
        response_id: String,
        #[serde(default)]
        item_id: String,
        #[serde(default)]
        output_index: u32,
        #[serde(default)]
        call_id: String,
        /// Some server versions include the function name here
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        arguments: String,
    },

    #[serde(rename = "rate_limits.updated")]
    RateLimitsUpdated {
        #[serde(default)]
        rate_limits: Vec<RateLimit>,
    },

    /// Any envelope whose `type` is not listed above
    #[serde(skip_deserializing)]
    Unknown(BaseEvent),
}

/// Every server event type [`ServerEvent`] decodes into a concrete variant.
pub const SERVER_EVENT_TYPES: &[&str] = &[
    "error",
    "session.created",
    "session.updated",
    "input_audio_buffer.committed",
    "input_audio_buffer.cleared",
    "input_audio_buffer.speech_started",
    "input_audio_buffer.speech_stopped",
    "conversation.item.created",
    "conversation.item.input_audio_transcription.completed",
    "conversation.item.input_audio_transcription.failed",
    "response.created",
    "response.done",
    "response.output_item.added",
    "response.output_item.done",
    "response.content_part.added",
    "response.content_part.done",
    "response.text.delta",
    "response.text.done",
    "response.audio.delta",
    "response.audio.done",
    "response.audio_transcript.delta",
    "response.audio_transcript.done",
    "response.function_call_arguments.delta",
    "response.function_call_arguments.done",
    "rate_limits.updated",
];

/// Fields shared by every server envelope.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BaseEvent {
    #[serde(default)]
    pub event_id: Option<String>,
    #[serde(rename = "type")]
    pub event_type: String,
}

/// Location of a streamed content delta within a response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ContentPosition {
    #[serde(default)]
    pub response_id: String,
    #[serde(default)]
    pub item_id: String,
    #[serde(default)]
    pub output_index: u32,
    #[serde(default)]
    pub content_index: u32,
}

impl ServerEvent {
    /// The wire discriminator of this event.
    pub fn event_type(&self) -> &str {
        match self {
            ServerEvent::Error { .. } => "error",
            ServerEvent::SessionCreated { .. } => "session.created",
            ServerEvent::SessionUpdated { .. } => "session.updated",
            ServerEvent::InputAudioBufferCommitted { .. } => "input_audio_buffer.committed",
            ServerEvent::InputAudioBufferCleared {} => "input_audio_buffer.cleared",
            ServerEvent::SpeechStarted { .. } => "input_audio_buffer.speech_started",
            ServerEvent::SpeechStopped { .. } => "input_audio_buffer.speech_stopped",
            ServerEvent::ConversationItemCreated { .. } => "conversation.item.created",
            ServerEvent::TranscriptionCompleted { .. } => {
                "conversation.item.input_audio_transcription.completed"
            }
            ServerEvent::TranscriptionFailed { .. } => {
                "conversation.item.input_audio_transcription.failed"
            }
            ServerEvent::ResponseCreated { .. } => "response.created",
            ServerEvent::ResponseDone { .. } => "response.done",
            ServerEvent::OutputItemAdded { .. } => "response.output_item.added",
            ServerEvent::OutputItemDone { .. } => "response.output_item.done",
            ServerEvent::ContentPartAdded { .. } => "response.content_part.added",
            ServerEvent::ContentPartDone { .. } => "response.content_part.done",
            ServerEvent::TextDelta { .. } => "response.text.delta",
            ServerEvent::TextDone { .. } => "response.text.done",
            ServerEvent::AudioDelta { .. } => "response.audio.delta",
            ServerEvent::AudioDone { .. } => "response.audio.done",
            ServerEvent::AudioTranscriptDelta { .. } => "response.audio_transcript.delta",
            ServerEvent::AudioTranscriptDone { .. } => "response.audio_transcript.done",
            ServerEvent::FunctionCallArgumentsDelta { .. } => {
                "response.function_call_arguments.delta"
            }
            ServerEvent::FunctionCallArgumentsDone { .. } => {
                "response.function_call_arguments.done"
            }
            ServerEvent::RateLimitsUpdated { .. } => "rate_limits.updated",
            ServerEvent::Unknown(base) => &base.event_type,
        }
    }

    /// Decode base64 audio from an audio delta payload.
    pub fn decode_audio_delta(delta: &str) -> Result<Vec<u8>, base64::DecodeError> {
        BASE64_STANDARD.decode(delta)
    }
}

/// Decode one server envelope.
///
/// The discriminator is read first. Known types are then decoded in full;
/// unknown types become [`ServerEvent::Unknown`]. Input whose `type` cannot
/// be read at all is an error.
pub fn parse_server_event(data: &[u8]) -> RealtimeResult<ServerEvent> {
    let base: BaseEvent = serde_json::from_slice(data).map_err(|e| {
        RealtimeError::SerializationError(format!("invalid server envelope: {}", e))
    })?;

    if !SERVER_EVENT_TYPES.contains(&base.event_type.as_str()) {
        return Ok(ServerEvent::Unknown(base));
    }

    serde_json::from_slice(data).map_err(|e| {
        RealtimeError::SerializationError(format!("invalid {} event: {}", base.event_type, e))
    })
}

// =============================================================================
// Supporting Types
// =============================================================================

/// API error information.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ApiError {
    #[serde(rename = "type", default)]
    pub error_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub param: Option<String>,
    /// Client event that caused the error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
}

impl From<ApiError> for RealtimeError {
    fn from(error: ApiError) -> Self {
        RealtimeError::ProviderError {
            error_type: error.error_type,
            code: error.code,
            message: error.message,
        }
    }
}

/// Server-reported session descriptor.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SessionInfo {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub expires_at: Option<u64>,
    #[serde(default)]
    pub modalities: Vec<Modality>,
    #[serde(default)]
    pub instructions: Option<String>,
    #[serde(default)]
    pub voice: Option<String>,
    #[serde(default)]
    pub input_audio_format: Option<String>,
    #[serde(default)]
    pub output_audio_format: Option<String>,
    #[serde(default)]
    pub input_audio_transcription: Option<InputAudioTranscription>,
    #[serde(default)]
    pub turn_detection: Option<TurnDetection>,
    #[serde(default)]
    pub tools: Vec<ToolDef>,
    #[serde(default)]
    pub tool_choice: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_response_output_tokens: Option<MaxTokens>,
}

/// Response information.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResponseInfo {
    #[serde(default)]
    pub id: String,
    /// in_progress, completed, cancelled, incomplete or failed
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub status_details: Option<serde_json::Value>,
    #[serde(default)]
    pub output: Vec<ConversationItem>,
    #[serde(default)]
    pub usage: Option<Usage>,
}

/// Token usage of one response.
///
/// Chat-style field names (`prompt_tokens`, `completion_tokens`,
/// `prompt_tokens_details`) are accepted as aliases.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub total_tokens: u32,
    #[serde(default, alias = "prompt_tokens")]
    pub input_tokens: u32,
    #[serde(default, alias = "completion_tokens")]
    pub output_tokens: u32,
    #[serde(default, alias = "prompt_tokens_details")]
    pub input_token_details: Option<TokenDetails>,
    #[serde(default, alias = "completion_tokens_details")]
    pub output_token_details: Option<TokenDetails>,
}

impl Usage {
    /// Cached input tokens, zero when not reported.
    pub fn cached_tokens(&self) -> u32 {
        self.input_token_details
            .as_ref()
            .and_then(|d| d.cached_tokens)
            .unwrap_or(0)
    }

    /// Total tokens, derived from the parts when the server omits it.
    pub fn total(&self) -> u32 {
        if self.total_tokens > 0 {
            self.total_tokens
        } else {
            self.input_tokens.saturating_add(self.output_tokens)
        }
    }
}

/// Token usage details.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TokenDetails {
    #[serde(default)]
    pub cached_tokens: Option<u32>,
    #[serde(default)]
    pub text_tokens: Option<u32>,
    #[serde(default)]
    pub audio_tokens: Option<u32>,
}

/// Rate limit information.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RateLimit {
    pub name: String,
    pub limit: u64,
    pub remaining: u64,
    pub reset_seconds: f64,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn to_json(event: ClientEvent) -> serde_json::Value {
        serde_json::to_value(ClientEnvelope {
            event_id: "evt_1".to_string(),
            event,
        })
        .unwrap()
    }

    #[test]
    fn test_envelope_carries_event_id_and_type() {
        let json = to_json(ClientEvent::InputAudioBufferCommit {});
        assert_eq!(json, json!({"event_id": "evt_1", "type": "input_audio_buffer.commit"}));

        let json = to_json(ClientEvent::ResponseCreate { response: None });
        assert_eq!(json, json!({"event_id": "evt_1", "type": "response.create"}));
    }

    #[test]
    fn test_audio_append() {
        let data = vec![0u8, 1, 2, 3];
        let json = to_json(ClientEvent::audio_append(&data));
        assert_eq!(json["type"], "input_audio_buffer.append");
        let decoded = BASE64_STANDARD.decode(json["audio"].as_str().unwrap()).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn test_turn_detection_null_vs_omitted() {
        let disabled = to_json(ClientEvent::SessionUpdate {
            session: SessionUpdate {
                turn_detection: Some(None),
                ..Default::default()
            },
        });
        let session = disabled["session"].as_object().unwrap();
        assert!(session.contains_key("turn_detection"));
        assert!(session["turn_detection"].is_null());

        let untouched = to_json(ClientEvent::SessionUpdate {
            session: SessionUpdate::instructions_only("be brief"),
        });
        let session = untouched["session"].as_object().unwrap();
        assert!(!session.contains_key("turn_detection"));
        assert_eq!(session["instructions"], "be brief");
        assert_eq!(session.len(), 1);
    }

    #[test]
    fn test_item_shapes() {
        let json = to_json(ClientEvent::item_create(ConversationItem::user_text("hi")));
        assert_eq!(json["type"], "conversation.item.create");
        assert_eq!(json["item"]["type"], "message");
        assert_eq!(json["item"]["role"], "user");
        assert_eq!(json["item"]["content"][0]["type"], "input_text");
        assert_eq!(json["item"]["content"][0]["text"], "hi");
        assert!(json.get("previous_item_id").is_none());

        let json = to_json(ClientEvent::item_create(
            ConversationItem::function_call_output("call_1", "{\"ok\":true}"),
        ));
        assert_eq!(json["item"]["type"], "function_call_output");
        assert_eq!(json["item"]["call_id"], "call_1");
        assert_eq!(json["item"]["output"], "{\"ok\":true}");

        let json = to_json(ClientEvent::item_create(ConversationItem::function_call(
            "call_2", "lookup", "{}",
        )));
        assert_eq!(json["item"]["name"], "lookup");
        assert_eq!(json["item"]["arguments"], "{}");
    }

    #[test]
    fn test_client_event_type_matches_wire() {
        let events = vec![
            ClientEvent::SessionUpdate {
                session: SessionUpdate::default(),
            },
            ClientEvent::audio_append(&[1]),
            ClientEvent::InputAudioBufferCommit {},
            ClientEvent::InputAudioBufferClear {},
            ClientEvent::item_create(ConversationItem::user_text("x")),
            ClientEvent::ResponseCreate { response: None },
            ClientEvent::ResponseCancel {},
        ];
        for event in events {
            let expected = event.event_type();
            assert_eq!(to_json(event)["type"], expected);
        }
    }

    #[test]
    fn test_parse_error_event() {
        let data = br#"{
            "event_id": "event_9",
            "type": "error",
            "error": {"type": "invalid_request_error", "code": "bad_field", "message": "Test error"}
        }"#;
        match parse_server_event(data).unwrap() {
            ServerEvent::Error { error } => {
                assert_eq!(error.message, "Test error");
                let err: RealtimeError = error.into();
                assert!(err.to_string().contains("Test error"));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_parse_unknown_event_degrades_to_base() {
        let data = br#"{"type":"future.unreleased.event","event_id":"event_1","payload":{"x":1}}"#;
        match parse_server_event(data).unwrap() {
            ServerEvent::Unknown(base) => {
                assert_eq!(base.event_type, "future.unreleased.event");
                assert_eq!(base.event_id.as_deref(), Some("event_1"));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_parse_malformed_is_error() {
        assert!(parse_server_event(b"not json").is_err());
        assert!(parse_server_event(br#"{"event_id":"x"}"#).is_err());
        assert!(parse_server_event(br#"{"type": 42}"#).is_err());
    }

    #[test]
    fn test_parse_known_type_with_bad_body_is_error() {
        assert!(parse_server_event(br#"{"type":"response.text.delta"}"#).is_err());
    }

    #[test]
    fn test_every_listed_type_is_a_variant() {
        for event_type in SERVER_EVENT_TYPES {
            let result = serde_json::from_value::<ServerEvent>(json!({ "type": event_type }));
            if let Err(e) = result {
                assert!(
                    !e.to_string().contains("unknown variant"),
                    "{} is not a ServerEvent variant: {}",
                    event_type,
                    e
                );
            }
        }
    }

    #[test]
    fn test_parse_session_created() {
        let data = json!({
            "type": "session.created",
            "event_id": "event_1",
            "session": {
                "id": "sess_1",
                "object": "realtime.session",
                "model": "gpt-4o-realtime-preview",
                "modalities": ["text", "audio"],
                "voice": "alloy",
                "turn_detection": {"type": "server_vad", "threshold": 0.5},
                "max_response_output_tokens": "inf",
                "tools": []
            }
        })
        .to_string();
        let event = parse_server_event(data.as_bytes()).unwrap();
        assert_eq!(event.event_type(), "session.created");
        match event {
            ServerEvent::SessionCreated { session } => {
                assert_eq!(session.id, "sess_1");
                assert_eq!(session.modalities, vec![Modality::Text, Modality::Audio]);
                assert_eq!(
                    session.max_response_output_tokens,
                    Some(MaxTokens::Infinite("inf".to_string()))
                );
                assert!(matches!(
                    session.turn_detection,
                    Some(TurnDetection::ServerVad { .. })
                ));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_parse_text_delta_position() {
        let data = br#"{"type":"response.text.delta","response_id":"resp_1","item_id":"item_1","output_index":0,"content_index":2,"delta":"Hel"}"#;
        match parse_server_event(data).unwrap() {
            ServerEvent::TextDelta { position, delta } => {
                assert_eq!(delta, "Hel");
                assert_eq!(position.response_id, "resp_1");
                assert_eq!(position.content_index, 2);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_usage_accepts_chat_field_names() {
        let data = br#"{
            "type": "response.done",
            "response": {
                "id": "resp_1",
                "status": "completed",
                "usage": {
                    "prompt_tokens": 1000,
                    "completion_tokens": 500,
                    "prompt_tokens_details": {"cached_tokens": 200}
                }
            }
        }"#;
        match parse_server_event(data).unwrap() {
            ServerEvent::ResponseDone { response } => {
                let usage = response.usage.unwrap();
                assert_eq!(usage.input_tokens, 1000);
                assert_eq!(usage.output_tokens, 500);
                assert_eq!(usage.cached_tokens(), 200);
                assert_eq!(usage.total(), 1500);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_usage_realtime_field_names() {
        let usage: Usage = serde_json::from_value(json!({
            "total_tokens": 90,
            "input_tokens": 60,
            "output_tokens": 30,
            "input_token_details": {"cached_tokens": 10, "text_tokens": 20, "audio_tokens": 40}
        }))
        .unwrap();
        assert_eq!(usage.cached_tokens(), 10);
        assert_eq!(usage.total(), 90);
    }

    #[test]
    fn test_usage_total_saturates_on_overflow() {
        let usage: Usage = serde_json::from_value(json!({
            "input_tokens": u32::MAX,
            "output_tokens": u32::MAX
        }))
        .unwrap();
        assert_eq!(usage.total(), u32::MAX);
    }

    #[test]
    fn test_audio_delta_decode() {
        let pcm = vec![0u8, 1, 2, 3, 4, 5];
        let encoded = BASE64_STANDARD.encode(&pcm);
        let decoded = ServerEvent::decode_audio_delta(&encoded).unwrap();
        assert_eq!(decoded, pcm);
    }

    #[test]
    fn test_tool_def_from_definition() {
        let def = ToolDefinition {
            name: "noop".to_string(),
            description: String::new(),
            parameters: json!({"type": "object"}),
        };
        let wire = ToolDef::from(&def);
        assert_eq!(wire.tool_type, "function");
        assert!(wire.description.is_none());
        assert_eq!(wire.parameters, Some(json!({"type": "object"})));
    }
}
