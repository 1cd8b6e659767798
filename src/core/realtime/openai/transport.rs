//! WebSocket transport for the OpenAI Realtime API.
//!
//! [`RealtimeWebSocket`] owns one persistent connection. Writes are
//! serialized through the sink lock; reads go through the stream lock and
//! race against cancellation, so a blocked read never outlives the caller's
//! interest in it. Closing cancels an internal token that wakes every
//! pending read before the socket halves are dropped.

use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use std::sync::Once;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;
use zeroize::Zeroizing;

use super::config::{OPENAI_BETA_HEADER, OPENAI_BETA_VALUE};
use crate::core::realtime::base::{RealtimeError, RealtimeResult, RetryConfig};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Close code used when no status was present in a close frame.
const CLOSE_NO_STATUS: u16 = 1005;

/// Close code for a connection that ended without a close frame.
const CLOSE_ABNORMAL: u16 = 1006;

static CRYPTO_PROVIDER: Once = Once::new();

/// Install the ring provider for rustls unless the application already did.
fn ensure_crypto_provider() {
    CRYPTO_PROVIDER.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// Settings for one transport.
#[derive(Clone)]
pub struct TransportConfig {
    /// Full endpoint URL, query included
    pub url: Url,
    /// Bearer credential
    pub api_key: Zeroizing<String>,
    pub retry: RetryConfig,
    pub connect_timeout: Duration,
    pub write_timeout: Duration,
}

impl std::fmt::Debug for TransportConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportConfig")
            .field("url", &self.url.as_str())
            .field("api_key", &"<redacted>")
            .field("retry", &self.retry)
            .field("connect_timeout", &self.connect_timeout)
            .field("write_timeout", &self.write_timeout)
            .finish()
    }
}

/// One persistent websocket connection.
pub struct RealtimeWebSocket {
    config: TransportConfig,
    sink: Mutex<Option<WsSink>>,
    source: Mutex<Option<WsSource>>,
    connected: AtomicBool,
    closed: AtomicBool,
    /// Cancelled by `close()` to wake pending reads.
    shutdown: CancellationToken,
}

impl RealtimeWebSocket {
    pub fn new(config: TransportConfig) -> Self {
        Self {
            config,
            sink: Mutex::new(None),
            source: Mutex::new(None),
            connected: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
        }
    }

    #[inline]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && !self.is_closed()
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn build_request(&self) -> RealtimeResult<http::Request<()>> {
        let url = &self.config.url;
        let host = match (url.host_str(), url.port()) {
            (Some(host), Some(port)) => format!("{}:{}", host, port),
            (Some(host), None) => host.to_string(),
            (None, _) => {
                return Err(RealtimeError::InvalidConfiguration(format!(
                    "url {} has no host",
                    url
                )));
            }
        };

        http::Request::builder()
            .uri(url.as_str())
            .header("Authorization", format!("Bearer {}", self.config.api_key.as_str()))
            .header(OPENAI_BETA_HEADER, OPENAI_BETA_VALUE)
            .header(
                "Sec-WebSocket-Key",
                tungstenite::handshake::client::generate_key(),
            )
            .header("Sec-WebSocket-Version", "13")
            .header("Connection", "Upgrade")
            .header("Upgrade", "websocket")
            .header("Host", host)
            .body(())
            .map_err(|e| RealtimeError::ConnectionFailed(e.to_string()))
    }

    /// Dial the endpoint once.
    ///
    /// A failed dial leaves no handle behind. Returns immediately when the
    /// transport is already connected and fails when it has been closed.
    pub async fn connect(&self, cancel: &CancellationToken) -> RealtimeResult<()> {
        if self.is_closed() {
            return Err(RealtimeError::TransportClosed);
        }
        if self.is_connected() {
            return Ok(());
        }
        if cancel.is_cancelled() {
            return Err(RealtimeError::Cancelled);
        }

        ensure_crypto_provider();
        let request = self.build_request()?;
        debug!("Dialing {}", self.config.url.path());

        let dial = tokio::time::timeout(
            self.config.connect_timeout,
            tokio_tungstenite::connect_async(request),
        );
        let (ws_stream, _response) = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RealtimeError::Cancelled),
            _ = self.shutdown.cancelled() => return Err(RealtimeError::TransportClosed),
            result = dial => match result {
                Err(_) => {
                    return Err(RealtimeError::Timeout(format!(
                        "connect did not complete within {:?}",
                        self.config.connect_timeout
                    )));
                }
                Ok(Err(e)) => return Err(map_connect_error(e)),
                Ok(Ok(pair)) => pair,
            },
        };

        let (ws_sink, ws_source) = ws_stream.split();

        let mut sink = self.sink.lock().await;
        let mut source = self.source.lock().await;
        if self.is_closed() {
            // Closed while dialing; dropping the halves ends the connection.
            return Err(RealtimeError::TransportClosed);
        }
        *sink = Some(ws_sink);
        *source = Some(ws_source);
        self.connected.store(true, Ordering::SeqCst);

        info!("Connected to OpenAI Realtime API");
        Ok(())
    }

    /// Dial with exponential backoff.
    ///
    /// Makes at most `retry.max_attempts` attempts and returns the last
    /// error once they are exhausted. Cancellation aborts immediately, also
    /// while waiting between attempts.
    pub async fn connect_with_retry(&self, cancel: &CancellationToken) -> RealtimeResult<()> {
        let retry = &self.config.retry;
        let max_attempts = retry.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let error = match self.connect(cancel).await {
                Ok(()) => {
                    if attempt > 1 {
                        info!("Connected after {} attempts", attempt);
                    }
                    return Ok(());
                }
                Err(e @ (RealtimeError::Cancelled | RealtimeError::TransportClosed)) => {
                    return Err(e);
                }
                Err(e) => e,
            };

            if !retry.should_retry(attempt) {
                warn!(
                    "Giving up after {} connection attempts: {}",
                    max_attempts, error
                );
                return Err(error);
            }

            let delay = Duration::from_millis(retry.calculate_delay(attempt));
            warn!(
                "Connection attempt {}/{} failed: {}. Retrying in {:?}",
                attempt, max_attempts, error, delay
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(RealtimeError::Cancelled),
                _ = self.shutdown.cancelled() => return Err(RealtimeError::TransportClosed),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn write(&self, message: Message) -> RealtimeResult<()> {
        if self.is_closed() {
            return Err(RealtimeError::TransportClosed);
        }
        let mut guard = self.sink.lock().await;
        let sink = guard.as_mut().ok_or(RealtimeError::NotConnected)?;

        match tokio::time::timeout(self.config.write_timeout, sink.send(message)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(map_ws_error(e)),
            Err(_) => Err(RealtimeError::Timeout(format!(
                "write did not complete within {:?}",
                self.config.write_timeout
            ))),
        }
    }

    /// Serialize `message` as JSON and write it as one text frame.
    pub async fn send<T: Serialize + ?Sized>(&self, message: &T) -> RealtimeResult<()> {
        let json = serde_json::to_string(message)
            .map_err(|e| RealtimeError::SerializationError(e.to_string()))?;
        self.write(Message::Text(json.into())).await
    }

    /// Write a keepalive ping.
    pub async fn send_ping(&self) -> RealtimeResult<()> {
        self.write(Message::Ping(Bytes::new())).await
    }

    /// Read the next data message.
    ///
    /// Control frames are skipped. A close frame from the peer is returned as
    /// [`RealtimeError::RemoteClosed`].
    pub async fn receive(&self, cancel: &CancellationToken) -> RealtimeResult<Bytes> {
        if self.is_closed() {
            return Err(RealtimeError::TransportClosed);
        }

        let mut guard = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RealtimeError::Cancelled),
            _ = self.shutdown.cancelled() => return Err(RealtimeError::TransportClosed),
            guard = self.source.lock() => guard,
        };
        let source = guard.as_mut().ok_or(RealtimeError::NotConnected)?;

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(RealtimeError::Cancelled),
                _ = self.shutdown.cancelled() => return Err(RealtimeError::TransportClosed),
                next = source.next() => next,
            };

            match next {
                Some(Ok(Message::Text(text))) => return Ok(Bytes::copy_from_slice(text.as_bytes())),
                Some(Ok(Message::Binary(data))) => return Ok(data),
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => continue,
                Some(Ok(Message::Close(frame))) => {
                    self.connected.store(false, Ordering::SeqCst);
                    let (code, reason) = match frame {
                        Some(frame) => {
                            // Utf8Bytes derefs to str
                            let reason: &str = &frame.reason;
                            (u16::from(frame.code), reason.to_string())
                        }
                        None => (CLOSE_NO_STATUS, String::new()),
                    };
                    return Err(RealtimeError::RemoteClosed { code, reason });
                }
                Some(Err(e)) => {
                    self.connected.store(false, Ordering::SeqCst);
                    return Err(map_ws_error(e));
                }
                None => {
                    self.connected.store(false, Ordering::SeqCst);
                    return Err(RealtimeError::RemoteClosed {
                        code: CLOSE_ABNORMAL,
                        reason: "connection ended without close frame".to_string(),
                    });
                }
            }
        }
    }

    /// Forward received messages to `out` until cancellation, a clean close
    /// or an error.
    ///
    /// A full `out` channel blocks the loop; nothing is dropped. Cancellation,
    /// a local close and a clean remote close all return `Ok`.
    pub async fn receive_loop(
        &self,
        cancel: &CancellationToken,
        out: mpsc::Sender<Bytes>,
    ) -> RealtimeResult<()> {
        loop {
            let data = match self.receive(cancel).await {
                Ok(data) => data,
                Err(RealtimeError::Cancelled | RealtimeError::TransportClosed) => return Ok(()),
                Err(e) if e.is_clean_close() => {
                    info!("Realtime connection closed by server: {}", e);
                    return Ok(());
                }
                Err(e) => return Err(e),
            };

            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                sent = out.send(data) => {
                    if sent.is_err() {
                        debug!("Message consumer dropped, stopping receive loop");
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Spawn the keepalive loop.
    ///
    /// The loop stops on cancellation, on close, or after the first failed
    /// ping. A failed ping does not close the transport.
    pub fn start_heartbeat(
        self: &Arc<Self>,
        cancel: CancellationToken,
        interval: Duration,
    ) -> JoinHandle<()> {
        let transport = Arc::clone(self);
        tokio::spawn(async move {
            if interval.is_zero() {
                warn!("Heartbeat interval is zero, heartbeat disabled");
                return;
            }
            let start = tokio::time::Instant::now() + interval;
            let mut ticker = tokio::time::interval_at(start, interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = transport.shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = transport.send_ping().await {
                            warn!("Heartbeat ping failed, stopping heartbeat: {}", e);
                            break;
                        }
                    }
                }
            }
            debug!("Heartbeat stopped");
        })
    }

    /// Close the connection.
    ///
    /// Idempotent. The first call wakes pending reads, writes a close frame
    /// best-effort and drops the socket; later calls return `Ok` at once.
    pub async fn close(&self) -> RealtimeResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.connected.store(false, Ordering::SeqCst);
        self.shutdown.cancel();

        if let Some(mut sink) = self.sink.lock().await.take() {
            let frame = CloseFrame {
                code: CloseCode::Normal,
                reason: "session closed".into(),
            };
            let close = sink.send(Message::Close(Some(frame)));
            match tokio::time::timeout(self.config.write_timeout, close).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!("Close frame not sent: {}", e),
                Err(_) => debug!("Close frame write timed out"),
            }
            let _ = tokio::time::timeout(self.config.write_timeout, sink.close()).await;
        }
        self.source.lock().await.take();

        info!("Realtime transport closed");
        Ok(())
    }
}

fn map_connect_error(error: tungstenite::Error) -> RealtimeError {
    match error {
        tungstenite::Error::Http(response) => {
            let status = response.status();
            if status == http::StatusCode::UNAUTHORIZED || status == http::StatusCode::FORBIDDEN {
                RealtimeError::AuthenticationFailed(format!("upgrade rejected with {}", status))
            } else {
                RealtimeError::ConnectionFailed(format!("upgrade rejected with {}", status))
            }
        }
        other => RealtimeError::ConnectionFailed(other.to_string()),
    }
}

fn map_ws_error(error: tungstenite::Error) -> RealtimeError {
    match error {
        tungstenite::Error::ConnectionClosed => RealtimeError::RemoteClosed {
            code: u16::from(CloseCode::Normal),
            reason: String::new(),
        },
        tungstenite::Error::AlreadyClosed => RealtimeError::TransportClosed,
        other => RealtimeError::WebSocketError(other.to_string()),
    }
}
