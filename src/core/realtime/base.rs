//! Base traits and types for realtime streaming sessions.
//!
//! This module defines the provider-neutral pieces shared by realtime
//! session implementations: the error taxonomy, retry/backoff settings,
//! the session lifecycle states, and the unified [`StreamChunk`] that a
//! session hands to its caller.
//!
//! # Audio Format
//!
//! Audio payloads are opaque byte buffers. For the OpenAI Realtime API they
//! are PCM 16-bit signed little-endian at 24kHz unless configured otherwise.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::config::pricing::CostInfo;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during realtime operations.
#[derive(Debug, Clone, Error)]
pub enum RealtimeError {
    /// Connection to the provider failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Authentication failed
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    /// Error event reported by the remote service
    #[error("Provider error ({error_type}): {message}")]
    ProviderError {
        /// Error category reported by the server
        error_type: String,
        /// Optional machine-readable code
        code: Option<String>,
        /// Human-readable message
        message: String,
    },

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Operation timeout
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Not connected
    #[error("Not connected")]
    NotConnected,

    /// The transport has been closed locally
    #[error("transport is closed")]
    TransportClosed,

    /// The remote peer closed the connection
    #[error("Connection closed by remote (code {code}): {reason}")]
    RemoteClosed {
        /// WebSocket close code
        code: u16,
        /// Close reason
        reason: String,
    },

    /// The setup handshake did not complete
    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),

    /// Operation attempted on a closed session
    #[error("session is closed")]
    SessionClosed,

    /// Operation aborted by cancellation
    #[error("Operation cancelled")]
    Cancelled,

    /// Internal error
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl RealtimeError {
    /// Whether this error represents an orderly shutdown by the remote peer.
    ///
    /// Normal closure (1000), going away (1001) and a close frame without a
    /// status (1005) all count as clean.
    pub fn is_clean_close(&self) -> bool {
        matches!(
            self,
            RealtimeError::RemoteClosed {
                code: 1000 | 1001 | 1005,
                ..
            }
        )
    }
}

/// Result type for realtime operations.
pub type RealtimeResult<T> = Result<T, RealtimeError>;

// =============================================================================
// Configuration Types
// =============================================================================

/// Exponential backoff settings for connection attempts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total number of connection attempts, including the first.
    /// Default: 5
    pub max_attempts: u32,

    /// Delay after the first failed attempt (milliseconds).
    /// Default: 1000ms
    pub initial_delay_ms: u64,

    /// Upper bound for any single delay (milliseconds).
    /// Default: 30000ms (30 seconds)
    pub max_delay_ms: u64,

    /// Multiplier for exponential backoff.
    /// Default: 2.0
    pub backoff_multiplier: f32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_ms: 1000,
            max_delay_ms: 30000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// A config that makes exactly one attempt.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Calculate the delay that follows failed attempt number `attempt`
    /// (1-based). Returns the delay in milliseconds.
    ///
    /// The sequence never decreases and never exceeds `max_delay_ms`.
    pub fn calculate_delay(&self, attempt: u32) -> u64 {
        let base_delay = self.initial_delay_ms as f64;
        let multiplier = (self.backoff_multiplier as f64).max(1.0);

        // Exponential backoff: base_delay * multiplier^(attempt-1)
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let delay = base_delay * multiplier.powi(exponent);
        delay.min(self.max_delay_ms as f64) as u64
    }

    /// Check if another attempt is allowed after `attempt` attempts.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts.max(1)
    }
}

// =============================================================================
// Session State
// =============================================================================

/// Lifecycle state of a realtime session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// Dialing the remote endpoint
    #[default]
    Dialing,
    /// Connected, waiting for the server's session descriptor
    AwaitingHandshake,
    /// Pushing local configuration
    Configuring,
    /// Streaming
    Active,
    /// Tearing down
    Closing,
    /// Fully closed
    Closed,
}

impl SessionState {
    /// Whether the session no longer accepts operations.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Closing | SessionState::Closed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Dialing => write!(f, "dialing"),
            SessionState::AwaitingHandshake => write!(f, "awaiting_handshake"),
            SessionState::Configuring => write!(f, "configuring"),
            SessionState::Active => write!(f, "active"),
            SessionState::Closing => write!(f, "closing"),
            SessionState::Closed => write!(f, "closed"),
        }
    }
}

// =============================================================================
// Tools
// =============================================================================

/// A callable tool offered to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Function name
    pub name: String,
    /// What the function does
    #[serde(default)]
    pub description: String,
    /// JSON schema for the arguments
    #[serde(default = "empty_object_schema")]
    pub parameters: serde_json::Value,
}

fn empty_object_schema() -> serde_json::Value {
    serde_json::json!({"type": "object", "properties": {}})
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Call identifier, echoed back with the result
    pub id: String,
    /// Function name
    pub name: String,
    /// Raw JSON arguments
    pub arguments: String,
}

impl ToolCall {
    /// Parse the raw arguments as JSON.
    pub fn parse_arguments(&self) -> RealtimeResult<serde_json::Value> {
        serde_json::from_str(&self.arguments).map_err(|e| {
            RealtimeError::SerializationError(format!(
                "invalid arguments for tool call {}: {}",
                self.id, e
            ))
        })
    }
}

/// The result of a tool invocation, returned to the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResponse {
    /// Call identifier from the matching [`ToolCall`]
    pub call_id: String,
    /// Tool output, usually JSON text
    pub output: String,
}

impl ToolResponse {
    pub fn new(call_id: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            output: output.into(),
        }
    }
}

// =============================================================================
// Stream Chunks
// =============================================================================

/// Unified output unit handed to the caller of a realtime session.
///
/// A chunk usually carries one kind of payload. The terminal chunk of a
/// response turn has `finish_reason` set, along with token usage and cost.
#[derive(Debug, Clone, Default)]
pub struct StreamChunk {
    /// Incremental text
    pub delta: Option<String>,
    /// Completed text
    pub content: Option<String>,
    /// Incremental transcript of the model's audio
    pub transcript_delta: Option<String>,
    /// Completed transcript of the model's audio
    pub transcript: Option<String>,
    /// Transcript of the caller's input audio
    pub input_transcript: Option<String>,
    /// Decoded audio bytes
    pub audio: Option<Bytes>,
    /// Set when the model finished producing audio for an item
    pub audio_done: bool,
    /// Completed tool calls
    pub tool_calls: Vec<ToolCall>,
    /// Final status of a response turn
    pub finish_reason: Option<String>,
    /// Total tokens reported for the turn
    pub token_count: Option<u32>,
    /// Cost breakdown for the turn
    pub cost: Option<CostInfo>,
    /// Error reported by the remote service or the transport
    pub error: Option<RealtimeError>,
    /// Response the chunk belongs to
    pub response_id: Option<String>,
    /// Conversation item the chunk belongs to
    pub item_id: Option<String>,
    /// Content part index within the item
    pub content_index: Option<u32>,
}

impl StreamChunk {
    /// Create an error-bearing chunk.
    pub fn from_error(error: RealtimeError) -> Self {
        Self {
            error: Some(error),
            ..Default::default()
        }
    }

    /// Whether this is the terminal chunk of a response turn.
    #[inline]
    pub fn is_final(&self) -> bool {
        self.finish_reason.is_some()
    }
}

// =============================================================================
// Trait Seams
// =============================================================================

/// Observer for per-turn cost records.
pub trait UsageSink: Send + Sync {
    /// Called once for every response turn that reports usage.
    fn record(&self, cost: &CostInfo);
}

/// Caller-facing input surface of a bidirectional streaming session.
#[async_trait]
pub trait StreamInputSession: Send + Sync {
    /// Append a chunk of raw input audio. Empty chunks are ignored.
    async fn send_chunk(&self, data: &[u8]) -> RealtimeResult<()>;

    /// Send a user text message and request a response.
    async fn send_text(&self, text: &str) -> RealtimeResult<()>;

    /// Update the system instructions without requesting a response.
    async fn send_system_context(&self, text: &str) -> RealtimeResult<()>;

    /// Signal the end of the caller's input for this turn.
    async fn end_input(&self) -> RealtimeResult<()>;

    /// Close the session. Safe to call more than once.
    async fn close(&self) -> RealtimeResult<()>;

    /// The fatal error that ended the session, if any.
    fn error(&self) -> Option<RealtimeError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_delay_is_monotonic_and_capped() {
        let config = RetryConfig {
            max_attempts: 10,
            initial_delay_ms: 100,
            max_delay_ms: 1000,
            backoff_multiplier: 2.0,
        };

        let delays: Vec<u64> = (1..=10).map(|a| config.calculate_delay(a)).collect();
        assert_eq!(&delays[..4], &[100, 200, 400, 800]);
        for pair in delays.windows(2) {
            assert!(pair[1] >= pair[0], "delays must not decrease: {:?}", delays);
        }
        assert!(delays.iter().all(|d| *d <= 1000));
        assert_eq!(delays[9], 1000);
    }

    #[test]
    fn test_retry_delay_with_sub_unit_multiplier() {
        let config = RetryConfig {
            backoff_multiplier: 0.5,
            ..Default::default()
        };
        assert_eq!(config.calculate_delay(1), 1000);
        assert_eq!(config.calculate_delay(4), 1000);
    }

    #[test]
    fn test_should_retry() {
        let config = RetryConfig::default();
        assert!(config.should_retry(1));
        assert!(config.should_retry(4));
        assert!(!config.should_retry(5));

        let single = RetryConfig::no_retry();
        assert!(!single.should_retry(1));
    }

    #[test]
    fn test_clean_close_classification() {
        let normal = RealtimeError::RemoteClosed {
            code: 1000,
            reason: String::new(),
        };
        let away = RealtimeError::RemoteClosed {
            code: 1001,
            reason: "bye".to_string(),
        };
        let abnormal = RealtimeError::RemoteClosed {
            code: 1011,
            reason: "server error".to_string(),
        };
        assert!(normal.is_clean_close());
        assert!(away.is_clean_close());
        assert!(!abnormal.is_clean_close());
        assert!(!RealtimeError::TransportClosed.is_clean_close());
    }

    #[test]
    fn test_session_closed_message() {
        assert_eq!(RealtimeError::SessionClosed.to_string(), "session is closed");
    }

    #[test]
    fn test_session_state_display() {
        assert_eq!(SessionState::AwaitingHandshake.to_string(), "awaiting_handshake");
        assert!(SessionState::Closing.is_terminal());
        assert!(!SessionState::Active.is_terminal());
    }

    #[test]
    fn test_tool_call_parse_arguments() {
        let call = ToolCall {
            id: "call_1".to_string(),
            name: "get_weather".to_string(),
            arguments: r#"{"location":"NYC"}"#.to_string(),
        };
        let args = call.parse_arguments().unwrap();
        assert_eq!(args["location"], "NYC");

        let broken = ToolCall {
            arguments: "{\"lo".to_string(),
            ..call
        };
        assert!(broken.parse_arguments().is_err());
    }

    #[test]
    fn test_tool_definition_defaults() {
        let def: ToolDefinition = serde_json::from_str(r#"{"name": "ping"}"#).unwrap();
        assert_eq!(def.name, "ping");
        assert_eq!(def.parameters["type"], "object");
    }
}
