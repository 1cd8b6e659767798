//! Mock provider servers for integration tests
//!
//! - `realtime_mock`: OpenAI Realtime style WebSocket server with a
//!   scripted responder

// Not every test binary uses every helper
#![allow(dead_code)]

pub mod realtime_mock;

use std::time::Duration;

/// Poll `condition` every 10ms until it holds or `timeout` elapses.
pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
