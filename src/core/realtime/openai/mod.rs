//! OpenAI Realtime API session.
//!
//! # Features
//!
//! - Bidirectional audio and text streaming over one WebSocket
//! - Server-side voice activity detection or manual turn control
//! - Function calling with streamed arguments
//! - Per-response token usage and cost
//!
//! # Supported Models
//!
//! - `gpt-4o-realtime-preview` - GPT-4o Realtime Preview
//! - `gpt-4o-realtime-preview-2024-12-17` - December 2024 version
//! - `gpt-4o-mini-realtime-preview` - Mini model for lower latency
//!
//! # Audio Format
//!
//! Input and output audio is PCM 16-bit signed little-endian at 24kHz.
//! G.711 u-law and a-law are also supported at 8kHz.

mod accumulator;
mod config;
mod messages;
mod session;
mod transport;

pub use accumulator::{ResponseAccumulator, UsageTotals};
pub use config::{
    ConnectionOptions, DEFAULT_REALTIME_MODEL, DEFAULT_TRANSCRIPTION_MODEL, Modality,
    OPENAI_BETA_HEADER, OPENAI_BETA_VALUE, OPENAI_REALTIME_SAMPLE_RATE, OPENAI_REALTIME_URL,
    OpenAIRealtimeAudioFormat, OpenAIRealtimeVoice, RESPONSE_CHANNEL_SIZE, RealtimeSessionConfig,
};
pub use messages::{
    ApiError, BaseEvent, ClientEnvelope, ClientEvent, ContentPart, ContentPosition,
    ConversationItem, InputAudioTranscription, MaxTokens, RateLimit, ResponseConfig,
    ResponseInfo, SERVER_EVENT_TYPES, ServerEvent, SessionInfo, SessionUpdate, TokenDetails,
    ToolDef, TurnDetection, Usage, parse_server_event,
};
pub use session::{RealtimeSession, RealtimeSessionBuilder};
pub use transport::{RealtimeWebSocket, TransportConfig};
