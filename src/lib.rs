pub mod config;
pub mod core;

// Re-export commonly used items for convenience
pub use config::{ClientConfig, ConfigError};
pub use crate::core::*;
pub use crate::core::realtime::openai::{RealtimeSession, RealtimeSessionBuilder, RealtimeSessionConfig};
