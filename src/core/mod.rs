pub mod realtime;

pub use realtime::{
    RealtimeError, RealtimeResult, SessionState, StreamChunk, StreamInputSession, ToolCall,
    ToolDefinition, ToolResponse, UsageSink,
};
