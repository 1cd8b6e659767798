//! Realtime conversational sessions.
//!
//! A session streams audio or text to a realtime model over a persistent
//! WebSocket and yields [`StreamChunk`]s as the model responds.
//!
//! # Example
//!
//! ```rust,ignore
//! use waav_realtime::core::realtime::openai::{RealtimeSession, RealtimeSessionConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let session = RealtimeSession::connect("sk-...", RealtimeSessionConfig::default())
//!         .await
//!         .unwrap();
//!     let mut chunks = session.take_response_stream().unwrap();
//!
//!     session.send_chunk(&audio_bytes).await.unwrap();
//!     session.end_input().await.unwrap();
//!
//!     while let Some(chunk) = chunks.recv().await {
//!         if let Some(audio) = chunk.audio {
//!             // Play audio
//!         }
//!     }
//! }
//! ```

mod base;
pub mod openai;

pub use base::{
    RealtimeError, RealtimeResult, RetryConfig, SessionState, StreamChunk, StreamInputSession,
    ToolCall, ToolDefinition, ToolResponse, UsageSink,
};
