//! WebSocket Mock Server for the OpenAI Realtime API
//!
//! Greets each connection with `session.created`, records everything the
//! client sends and answers client events through a scripted responder.

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

use waav_realtime::core::realtime::RetryConfig;
use waav_realtime::core::realtime::openai::RealtimeSessionConfig;

/// What the server does in reaction to one client event
#[derive(Debug, Clone)]
pub enum MockAction {
    /// Send a JSON event
    Send(Value),
    /// Send a raw text frame
    SendRaw(String),
    /// Send a close frame with this code and stop
    Close(u16),
    /// Drop the TCP connection without a close frame
    Drop,
}

pub type Responder = Arc<dyn Fn(&Value) -> Vec<MockAction> + Send + Sync>;

/// Connection behaviour of the mock server
#[derive(Clone)]
pub struct MockBehavior {
    pub greeting: Option<Value>,
    pub responder: Responder,
    pub reject_status: Option<u16>,
    pub drop_before_handshake: bool,
}

impl MockBehavior {
    /// Greets with `session.created` and acknowledges `session.update`.
    pub fn realtime() -> Self {
        Self {
            greeting: Some(session_created()),
            responder: Arc::new(|_| Vec::new()),
            reject_status: None,
            drop_before_handshake: false,
        }
        .with_responder(|_| Vec::new())
    }

    /// Script replies to everything except `session.update`, which is
    /// always acknowledged with `session.updated`.
    pub fn with_responder<F>(mut self, responder: F) -> Self
    where
        F: Fn(&Value) -> Vec<MockAction> + Send + Sync + 'static,
    {
        self.responder = Arc::new(move |msg| {
            if event_type(msg) == "session.update" {
                vec![MockAction::Send(event(
                    "session.updated",
                    json!({ "session": { "id": "sess_mock", "model": "gpt-4o-realtime-preview" } }),
                ))]
            } else {
                responder(msg)
            }
        });
        self
    }

    pub fn with_greeting(mut self, greeting: Option<Value>) -> Self {
        self.greeting = greeting;
        self
    }

    /// Refuse the upgrade with an HTTP status.
    pub fn rejecting(mut self, status: u16) -> Self {
        self.reject_status = Some(status);
        self
    }

    /// Accept TCP connections and close them immediately.
    pub fn dropping(mut self) -> Self {
        self.drop_before_handshake = true;
        self
    }
}

/// Everything the server observed
#[derive(Default)]
pub struct MockState {
    pub connections: AtomicUsize,
    pub pings: AtomicUsize,
    pub received: Mutex<Vec<Value>>,
    pub close_frames: Mutex<Vec<u16>>,
    pub headers: Mutex<HashMap<String, String>>,
    pub uri: Mutex<Option<String>>,
}

pub struct MockRealtimeServer {
    pub addr: SocketAddr,
    pub state: Arc<MockState>,
    handle: JoinHandle<()>,
}

impl MockRealtimeServer {
    pub async fn start(behavior: MockBehavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(MockState::default());
        let behavior = Arc::new(behavior);

        let accept_state = Arc::clone(&state);
        let handle = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let state = Arc::clone(&accept_state);
                let behavior = Arc::clone(&behavior);
                tokio::spawn(async move {
                    let _ = handle_connection(stream, state, behavior).await;
                });
            }
        });

        Self {
            addr,
            state,
            handle,
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}/v1/realtime", self.addr)
    }

    /// Session config pointed at this server with short timeouts and no retry.
    pub fn session_config(&self) -> RealtimeSessionConfig {
        let mut config = RealtimeSessionConfig::default();
        config.connection.base_url = self.url();
        config.connection.setup_timeout_ms = 2_000;
        config.connection.connect_timeout_ms = 2_000;
        config.connection.write_timeout_ms = 2_000;
        config.connection.retry = RetryConfig::no_retry();
        config
    }

    pub fn received(&self) -> Vec<Value> {
        self.state.received.lock().clone()
    }

    /// Received events of one type.
    pub fn received_of(&self, event_type_name: &str) -> Vec<Value> {
        self.received()
            .into_iter()
            .filter(|msg| event_type(msg) == event_type_name)
            .collect()
    }

    /// Wait until at least `count` client events arrived.
    pub async fn wait_for_messages(&self, count: usize, timeout: Duration) -> Vec<Value> {
        super::wait_until(timeout, || self.state.received.lock().len() >= count).await;
        self.received()
    }

    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    pub fn pings(&self) -> usize {
        self.state.pings.load(Ordering::SeqCst)
    }

    pub fn close_frames(&self) -> Vec<u16> {
        self.state.close_frames.lock().clone()
    }

    pub fn header(&self, name: &str) -> Option<String> {
        self.state.headers.lock().get(&name.to_lowercase()).cloned()
    }

    pub fn uri(&self) -> Option<String> {
        self.state.uri.lock().clone()
    }
}

impl Drop for MockRealtimeServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Handle a single WebSocket connection
async fn handle_connection(
    stream: TcpStream,
    state: Arc<MockState>,
    behavior: Arc<MockBehavior>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    state.connections.fetch_add(1, Ordering::SeqCst);
    if behavior.drop_before_handshake {
        return Ok(());
    }

    let handshake_state = Arc::clone(&state);
    let reject_status = behavior.reject_status;
    let callback = move |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        let mut headers = handshake_state.headers.lock();
        for (name, value) in request.headers() {
            headers.insert(
                name.as_str().to_lowercase(),
                value.to_str().unwrap_or_default().to_string(),
            );
        }
        *handshake_state.uri.lock() = Some(request.uri().to_string());

        match reject_status {
            Some(status) => Err(http::Response::builder()
                .status(status)
                .body(Some("rejected by mock".to_string()))
                .unwrap()),
            None => Ok(response),
        }
    };

    let ws_stream = accept_hdr_async(stream, callback).await?;
    let (mut write, mut read) = ws_stream.split();

    if let Some(greeting) = &behavior.greeting {
        write.send(Message::Text(greeting.to_string().into())).await?;
    }

    while let Some(msg) = read.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                let value: Value = serde_json::from_str(text.as_str()).unwrap_or(Value::Null);
                state.received.lock().push(value.clone());

                for action in (behavior.responder)(&value) {
                    match action {
                        MockAction::Send(event) => {
                            write.send(Message::Text(event.to_string().into())).await?;
                        }
                        MockAction::SendRaw(raw) => {
                            write.send(Message::Text(raw.into())).await?;
                        }
                        MockAction::Close(code) => {
                            let frame = CloseFrame {
                                code: CloseCode::from(code),
                                reason: "mock close".into(),
                            };
                            write.send(Message::Close(Some(frame))).await?;
                            // Give the client time to read the frame
                            tokio::time::sleep(Duration::from_millis(100)).await;
                            return Ok(());
                        }
                        MockAction::Drop => return Ok(()),
                    }
                }
            }
            Ok(Message::Ping(_)) => {
                state.pings.fetch_add(1, Ordering::SeqCst);
            }
            Ok(Message::Close(frame)) => {
                let code = frame.map(|f| u16::from(f.code)).unwrap_or(1005);
                state.close_frames.lock().push(code);
                break;
            }
            Err(_) => break,
            _ => {}
        }
    }

    Ok(())
}

// =============================================================================
// Event builders
// =============================================================================

pub fn event_type(msg: &Value) -> &str {
    msg.get("type").and_then(|t| t.as_str()).unwrap_or_default()
}

/// Server event of `kind` with `fields` merged in.
pub fn event(kind: &str, fields: Value) -> Value {
    let mut value = json!({ "type": kind, "event_id": format!("event_{}", kind.replace('.', "_")) });
    if let (Some(target), Value::Object(extra)) = (value.as_object_mut(), fields) {
        target.extend(extra);
    }
    value
}

pub fn session_created() -> Value {
    event(
        "session.created",
        json!({
            "session": {
                "id": "sess_mock",
                "object": "realtime.session",
                "model": "gpt-4o-realtime-preview",
                "voice": "alloy",
                "modalities": ["text", "audio"]
            }
        }),
    )
}

pub fn response_created(response_id: &str) -> Value {
    event(
        "response.created",
        json!({ "response": { "id": response_id, "status": "in_progress", "output": [] } }),
    )
}

pub fn text_delta(response_id: &str, delta: &str) -> Value {
    event(
        "response.text.delta",
        json!({
            "response_id": response_id,
            "item_id": "item_1",
            "output_index": 0,
            "content_index": 0,
            "delta": delta
        }),
    )
}

pub fn text_done(response_id: &str, text: &str) -> Value {
    event(
        "response.text.done",
        json!({
            "response_id": response_id,
            "item_id": "item_1",
            "output_index": 0,
            "content_index": 0,
            "text": text
        }),
    )
}

pub fn response_done(response_id: &str, usage: Option<Value>) -> Value {
    let mut response = json!({ "id": response_id, "status": "completed", "output": [] });
    if let Some(usage) = usage {
        response["usage"] = usage;
    }
    event("response.done", json!({ "response": response }))
}

/// A complete text reply streamed as the given deltas.
pub fn text_response(response_id: &str, deltas: &[&str], usage: Option<Value>) -> Vec<MockAction> {
    let mut actions = vec![MockAction::Send(response_created(response_id))];
    for delta in deltas {
        actions.push(MockAction::Send(text_delta(response_id, delta)));
    }
    actions.push(MockAction::Send(text_done(response_id, &deltas.concat())));
    actions.push(MockAction::Send(response_done(response_id, usage)));
    actions
}

/// Reply to every `response.create` with `script`.
pub fn on_response_create<F>(script: F) -> MockBehavior
where
    F: Fn() -> Vec<MockAction> + Send + Sync + 'static,
{
    MockBehavior::realtime().with_responder(move |msg| {
        if event_type(msg) == "response.create" {
            script()
        } else {
            Vec::new()
        }
    })
}
