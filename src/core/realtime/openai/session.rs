//! Realtime streaming session over the OpenAI Realtime API.
//!
//! A [`RealtimeSession`] is created only after a complete handshake:
//!
//! 1. dial the endpoint with retries,
//! 2. wait (bounded by the setup timeout) for `session.created`,
//! 3. push the local configuration as `session.update`.
//!
//! It then runs two background tasks: a heartbeat and a receive loop. The
//! receive loop decodes server events in arrival order, folds streamed
//! deltas into a [`ResponseAccumulator`] and forwards [`StreamChunk`]s on a
//! bounded channel. A slow consumer blocks the loop instead of losing
//! events. The channel closes when the loop exits, which happens once the
//! session's cancellation token fires.
//!
//! # Example
//!
//! ```rust,ignore
//! use waav_realtime::core::realtime::openai::{RealtimeSession, RealtimeSessionConfig};
//!
//! let session = RealtimeSession::connect("sk-...", RealtimeSessionConfig::default()).await?;
//! let mut chunks = session.take_response_stream().unwrap();
//! session.send_text("Hello!").await?;
//! while let Some(chunk) = chunks.recv().await {
//!     if let Some(delta) = &chunk.delta {
//!         print!("{}", delta);
//!     }
//!     if chunk.is_final() {
//!         break;
//!     }
//! }
//! session.close().await?;
//! ```

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use zeroize::Zeroizing;

use super::accumulator::{ResponseAccumulator, UsageTotals};
use super::config::{RESPONSE_CHANNEL_SIZE, RealtimeSessionConfig};
use super::messages::{
    ClientEnvelope, ClientEvent, ContentPosition, ConversationItem, ResponseConfig, ResponseInfo,
    ServerEvent, SessionInfo, SessionUpdate, parse_server_event,
};
use super::transport::{RealtimeWebSocket, TransportConfig};
use crate::config::pricing::{TokenPricing, calculate_cost, resolve_pricing};
use crate::core::realtime::base::{
    RealtimeError, RealtimeResult, SessionState, StreamChunk, StreamInputSession, ToolResponse,
    UsageSink,
};

/// How long `close()` waits for the receive loop to wind down.
const CLOSE_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

// =============================================================================
// Shared State
// =============================================================================

/// State shared between the session handle and its background tasks.
struct SessionShared {
    transport: Arc<RealtimeWebSocket>,
    cancel: CancellationToken,
    state: Mutex<SessionState>,
    failure: Mutex<Option<RealtimeError>>,
    session_info: RwLock<Option<SessionInfo>>,
    usage: Mutex<UsageTotals>,
}

impl SessionShared {
    fn state(&self) -> SessionState {
        *self.state.lock()
    }

    fn set_state(&self, next: SessionState) {
        let mut state = self.state.lock();
        if !state.is_terminal() {
            debug!("Realtime session state {} -> {}", *state, next);
            *state = next;
        }
    }

    /// Keep the first fatal error only.
    fn record_failure(&self, error: RealtimeError) {
        let mut failure = self.failure.lock();
        if failure.is_none() {
            *failure = Some(error);
        }
    }

    /// Cancel background work and close the transport. Runs once.
    async fn shutdown(&self) {
        {
            let mut state = self.state.lock();
            if state.is_terminal() {
                return;
            }
            *state = SessionState::Closing;
        }

        self.cancel.cancel();
        if let Err(e) = self.transport.close().await {
            debug!("Transport close reported: {}", e);
        }

        *self.state.lock() = SessionState::Closed;
        info!("Realtime session closed");
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Builder for [`RealtimeSession`].
pub struct RealtimeSessionBuilder {
    api_key: Zeroizing<String>,
    config: RealtimeSessionConfig,
    usage_sink: Option<Arc<dyn UsageSink>>,
    parent: Option<CancellationToken>,
}

impl RealtimeSessionBuilder {
    pub fn config(mut self, config: RealtimeSessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Observe the cost of every completed response.
    pub fn usage_sink(mut self, sink: Arc<dyn UsageSink>) -> Self {
        self.usage_sink = Some(sink);
        self
    }

    /// Tie the session to an outer cancellation token.
    pub fn cancellation_token(mut self, parent: CancellationToken) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Dial, complete the handshake and start the background tasks.
    ///
    /// On any failure the transport is torn down and no session is returned.
    pub async fn connect(self) -> RealtimeResult<RealtimeSession> {
        if self.api_key.trim().is_empty() {
            return Err(RealtimeError::AuthenticationFailed(
                "API key is required".to_string(),
            ));
        }
        self.config.validate()?;

        let transport_config = TransportConfig {
            url: self.config.endpoint_url()?,
            api_key: self.api_key,
            retry: self.config.connection.retry.clone(),
            connect_timeout: self.config.connection.connect_timeout(),
            write_timeout: self.config.connection.write_timeout(),
        };
        let cancel = match &self.parent {
            Some(parent) => parent.child_token(),
            None => CancellationToken::new(),
        };
        let shared = Arc::new(SessionShared {
            transport: Arc::new(RealtimeWebSocket::new(transport_config)),
            cancel,
            state: Mutex::new(SessionState::Dialing),
            failure: Mutex::new(None),
            session_info: RwLock::new(None),
            usage: Mutex::new(UsageTotals::default()),
        });

        if let Err(e) = shared.transport.connect_with_retry(&shared.cancel).await {
            error!("Failed to connect to OpenAI Realtime API: {}", e);
            shared.shutdown().await;
            return Err(e);
        }
        shared.set_state(SessionState::AwaitingHandshake);

        let setup_timeout = self.config.connection.setup_timeout();
        let info = match await_session_created(&shared, setup_timeout).await {
            Ok(info) => info,
            Err(e) => {
                error!("Realtime handshake failed: {}", e);
                shared.shutdown().await;
                return Err(e);
            }
        };
        info!(
            "Realtime session {} created for model {}",
            info.id, info.model
        );
        *shared.session_info.write() = Some(info);
        shared.set_state(SessionState::Configuring);

        let (responses_tx, responses_rx) = mpsc::channel(RESPONSE_CHANNEL_SIZE);
        let pricing = resolve_pricing(self.config.pricing, &self.config.model);
        let heartbeat_interval = self.config.connection.heartbeat_interval();

        let session = RealtimeSession {
            shared: Arc::clone(&shared),
            config: RwLock::new(self.config),
            event_counter: AtomicU64::new(0),
            send_lock: tokio::sync::Mutex::new(()),
            responses: Mutex::new(Some(responses_rx)),
            tasks: Mutex::new(Vec::new()),
        };

        let update = session.config.read().session_update();
        if let Err(e) = session
            .send_event(ClientEvent::SessionUpdate { session: update })
            .await
        {
            error!("Failed to send session configuration: {}", e);
            shared.shutdown().await;
            return Err(e);
        }
        shared.set_state(SessionState::Active);

        let heartbeat = shared
            .transport
            .start_heartbeat(shared.cancel.clone(), heartbeat_interval);
        let receive_loop = ReceiveLoop {
            shared: Arc::clone(&shared),
            responses: responses_tx,
            accumulator: ResponseAccumulator::new(),
            pricing,
            usage_sink: self.usage_sink,
        };
        let receiver = tokio::spawn(receive_loop.run());
        session.tasks.lock().extend([receiver, heartbeat]);

        info!("Realtime session active");
        Ok(session)
    }
}

/// Wait for the first server message and require it to be `session.created`.
async fn await_session_created(
    shared: &SessionShared,
    setup_timeout: Duration,
) -> RealtimeResult<SessionInfo> {
    let received = tokio::time::timeout(setup_timeout, shared.transport.receive(&shared.cancel))
        .await
        .map_err(|_| {
            RealtimeError::Timeout(format!(
                "no session.created within {:?}",
                setup_timeout
            ))
        })?;

    let data = match received {
        Ok(data) => data,
        Err(RealtimeError::Cancelled) => return Err(RealtimeError::Cancelled),
        Err(e) => {
            return Err(RealtimeError::HandshakeFailed(format!(
                "connection lost before session.created: {}",
                e
            )));
        }
    };

    match parse_server_event(&data) {
        Ok(ServerEvent::SessionCreated { session }) => Ok(session),
        Ok(ServerEvent::Error { error }) => Err(RealtimeError::HandshakeFailed(format!(
            "server rejected session: {}",
            error.message
        ))),
        Ok(other) => Err(RealtimeError::HandshakeFailed(format!(
            "expected session.created, got {}",
            other.event_type()
        ))),
        Err(e) => Err(RealtimeError::HandshakeFailed(format!(
            "undecodable first message: {}",
            e
        ))),
    }
}

// =============================================================================
// Session
// =============================================================================

/// A live realtime session.
///
/// Every operation fails with [`RealtimeError::SessionClosed`] once the
/// session is closing or closed. Dropping the session cancels it.
pub struct RealtimeSession {
    shared: Arc<SessionShared>,
    config: RwLock<RealtimeSessionConfig>,
    event_counter: AtomicU64,
    /// Keeps event ids in wire order.
    send_lock: tokio::sync::Mutex<()>,
    responses: Mutex<Option<mpsc::Receiver<StreamChunk>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl RealtimeSession {
    pub fn builder(api_key: impl Into<String>) -> RealtimeSessionBuilder {
        RealtimeSessionBuilder {
            api_key: Zeroizing::new(api_key.into()),
            config: RealtimeSessionConfig::default(),
            usage_sink: None,
            parent: None,
        }
    }

    /// Connect with `config` and no usage sink.
    pub async fn connect(
        api_key: impl Into<String>,
        config: RealtimeSessionConfig,
    ) -> RealtimeResult<Self> {
        Self::builder(api_key).config(config).connect().await
    }

    fn next_event_id(&self) -> String {
        format!("evt_{}", self.event_counter.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn ensure_open(&self) -> RealtimeResult<()> {
        if self.shared.state().is_terminal() {
            Err(RealtimeError::SessionClosed)
        } else {
            Ok(())
        }
    }

    async fn send_event(&self, event: ClientEvent) -> RealtimeResult<()> {
        self.ensure_open()?;
        let _guard = self.send_lock.lock().await;
        let envelope = ClientEnvelope {
            event_id: self.next_event_id(),
            event,
        };
        debug!(
            "Sending {} ({})",
            envelope.event.event_type(),
            envelope.event_id
        );
        self.shared.transport.send(&envelope).await.map_err(|e| {
            if self.shared.state().is_terminal() {
                RealtimeError::SessionClosed
            } else {
                e
            }
        })
    }

    /// Append raw audio to the server's input buffer.
    ///
    /// An empty chunk is ignored.
    pub async fn send_chunk(&self, data: &[u8]) -> RealtimeResult<()> {
        self.ensure_open()?;
        if data.is_empty() {
            return Ok(());
        }
        self.send_event(ClientEvent::audio_append(data)).await
    }

    /// Add a user text message and request a response.
    pub async fn send_text(&self, text: &str) -> RealtimeResult<()> {
        self.ensure_open()?;
        self.send_event(ClientEvent::item_create(ConversationItem::user_text(text)))
            .await?;
        self.send_event(ClientEvent::ResponseCreate { response: None })
            .await
    }

    /// Replace the session instructions without requesting a response.
    ///
    /// Turn detection is left untouched.
    pub async fn send_system_context(&self, text: &str) -> RealtimeResult<()> {
        self.ensure_open()?;
        self.config.write().instructions = Some(text.to_string());
        self.send_event(ClientEvent::SessionUpdate {
            session: SessionUpdate::instructions_only(text),
        })
        .await
    }

    /// Replace the session configuration and push it to the server.
    ///
    /// The model is fixed for the lifetime of the connection; a different
    /// model name is ignored with a warning.
    pub async fn update_session(&self, mut config: RealtimeSessionConfig) -> RealtimeResult<()> {
        self.ensure_open()?;
        config.validate()?;
        let update = {
            let mut current = self.config.write();
            if config.model != current.model {
                warn!(
                    "Model cannot change mid-session, keeping {}",
                    current.model
                );
                config.model = current.model.clone();
            }
            *current = config;
            current.session_update()
        };
        self.send_event(ClientEvent::SessionUpdate { session: update })
            .await
    }

    pub async fn commit_audio_buffer(&self) -> RealtimeResult<()> {
        self.send_event(ClientEvent::InputAudioBufferCommit {}).await
    }

    pub async fn clear_audio_buffer(&self) -> RealtimeResult<()> {
        self.send_event(ClientEvent::InputAudioBufferClear {}).await
    }

    /// Request a response, optionally with per-response overrides.
    pub async fn trigger_response(&self, config: Option<ResponseConfig>) -> RealtimeResult<()> {
        self.send_event(ClientEvent::ResponseCreate { response: config })
            .await
    }

    pub async fn cancel_response(&self) -> RealtimeResult<()> {
        self.send_event(ClientEvent::ResponseCancel {}).await
    }

    /// Return one tool result and request a response.
    pub async fn send_tool_response(&self, call_id: &str, output: &str) -> RealtimeResult<()> {
        self.send_tool_responses(&[ToolResponse::new(call_id, output)])
            .await
    }

    /// Return several tool results, then request a single response.
    ///
    /// An empty batch sends nothing.
    pub async fn send_tool_responses(&self, responses: &[ToolResponse]) -> RealtimeResult<()> {
        self.ensure_open()?;
        if responses.is_empty() {
            return Ok(());
        }
        for response in responses {
            let item = ConversationItem::function_call_output(&response.call_id, &response.output);
            self.send_event(ClientEvent::item_create(item)).await?;
        }
        self.send_event(ClientEvent::ResponseCreate { response: None })
            .await
    }

    /// Commit buffered audio. Without server turn detection, also request a
    /// response since nothing else will.
    pub async fn end_input(&self) -> RealtimeResult<()> {
        self.commit_audio_buffer().await?;
        let vad_enabled = self.config.read().vad_enabled();
        if !vad_enabled {
            self.trigger_response(None).await?;
        }
        Ok(())
    }

    /// Take the chunk stream. Only the first call returns `Some`.
    pub fn take_response_stream(&self) -> Option<mpsc::Receiver<StreamChunk>> {
        self.responses.lock().take()
    }

    /// The fatal error that ended the session, if any.
    pub fn error(&self) -> Option<RealtimeError> {
        self.shared.failure.lock().clone()
    }

    /// Resolves once the session has been cancelled or closed.
    pub async fn done(&self) {
        self.shared.cancel.cancelled().await
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.state().is_terminal()
    }

    /// Latest session descriptor reported by the server.
    pub fn session_info(&self) -> Option<SessionInfo> {
        self.shared.session_info.read().clone()
    }

    /// Usage accumulated over all completed responses.
    pub fn usage(&self) -> UsageTotals {
        self.shared.usage.lock().clone()
    }

    /// Current configuration.
    pub fn config(&self) -> RealtimeSessionConfig {
        self.config.read().clone()
    }

    /// Close the session. Later calls return `Ok` without doing anything.
    pub async fn close(&self) -> RealtimeResult<()> {
        self.shared.shutdown().await;

        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            if tokio::time::timeout(CLOSE_JOIN_TIMEOUT, task).await.is_err() {
                warn!("Background task did not stop within {:?}", CLOSE_JOIN_TIMEOUT);
            }
        }
        Ok(())
    }
}

impl Drop for RealtimeSession {
    fn drop(&mut self) {
        self.shared.cancel.cancel();
    }
}

#[async_trait]
impl StreamInputSession for RealtimeSession {
    async fn send_chunk(&self, data: &[u8]) -> RealtimeResult<()> {
        RealtimeSession::send_chunk(self, data).await
    }

    async fn send_text(&self, text: &str) -> RealtimeResult<()> {
        RealtimeSession::send_text(self, text).await
    }

    async fn send_system_context(&self, text: &str) -> RealtimeResult<()> {
        RealtimeSession::send_system_context(self, text).await
    }

    async fn end_input(&self) -> RealtimeResult<()> {
        RealtimeSession::end_input(self).await
    }

    async fn close(&self) -> RealtimeResult<()> {
        RealtimeSession::close(self).await
    }

    fn error(&self) -> Option<RealtimeError> {
        RealtimeSession::error(self)
    }
}

// =============================================================================
// Receive Loop
// =============================================================================

struct ReceiveLoop {
    shared: Arc<SessionShared>,
    responses: mpsc::Sender<StreamChunk>,
    accumulator: ResponseAccumulator,
    pricing: TokenPricing,
    usage_sink: Option<Arc<dyn UsageSink>>,
}

fn chunk_at(position: &ContentPosition) -> StreamChunk {
    StreamChunk {
        response_id: Some(position.response_id.clone()),
        item_id: Some(position.item_id.clone()),
        content_index: Some(position.content_index),
        ..Default::default()
    }
}

impl ReceiveLoop {
    async fn run(mut self) {
        let (raw_tx, mut raw_rx) = mpsc::channel::<Bytes>(RESPONSE_CHANNEL_SIZE);
        let transport = Arc::clone(&self.shared.transport);
        let cancel = self.shared.cancel.clone();
        let reader = tokio::spawn(async move { transport.receive_loop(&cancel, raw_tx).await });

        loop {
            tokio::select! {
                biased;
                _ = self.shared.cancel.cancelled() => break,
                raw = raw_rx.recv() => match raw {
                    Some(data) => self.handle_message(&data).await,
                    None => break,
                },
            }
        }

        if !self.shared.cancel.is_cancelled() {
            let failure = match reader.await {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(e),
                Err(e) => Some(RealtimeError::InternalError(format!(
                    "receive task failed: {}",
                    e
                ))),
            };
            match failure {
                Some(e) => {
                    error!("Realtime receive loop failed: {}", e);
                    self.shared.record_failure(e.clone());
                    self.emit(StreamChunk::from_error(e)).await;
                }
                None => info!("Realtime connection ended by server"),
            }
        }

        self.shared.shutdown().await;
        debug!("Receive loop stopped");
    }

    /// Forward a chunk, waiting for capacity. Gives up only on cancellation
    /// or when the consumer is gone.
    async fn emit(&self, chunk: StreamChunk) -> bool {
        tokio::select! {
            biased;
            _ = self.shared.cancel.cancelled() => false,
            sent = self.responses.send(chunk) => sent.is_ok(),
        }
    }

    async fn handle_message(&mut self, data: &[u8]) {
        let event = match parse_server_event(data) {
            Ok(event) => event,
            Err(e) => {
                warn!("Skipping malformed server event: {}", e);
                return;
            }
        };

        match event {
            ServerEvent::Error { error } => {
                warn!(
                    "OpenAI Realtime error: {} - {}",
                    error.error_type, error.message
                );
                self.emit(StreamChunk::from_error(error.into())).await;
            }

            ServerEvent::SessionCreated { session } | ServerEvent::SessionUpdated { session } => {
                debug!("Session descriptor updated: {}", session.id);
                *self.shared.session_info.write() = Some(session);
            }

            ServerEvent::ResponseCreated { response } => {
                debug!("Response started: {}", response.id);
                self.accumulator.begin_response(&response.id);
            }

            ServerEvent::TextDelta { position, delta } => {
                self.accumulator.push_text(&delta);
                self.emit(StreamChunk {
                    delta: Some(delta),
                    ..chunk_at(&position)
                })
                .await;
            }

            ServerEvent::TextDone { position, text } => {
                self.emit(StreamChunk {
                    content: Some(text),
                    ..chunk_at(&position)
                })
                .await;
            }

            ServerEvent::AudioDelta { position, delta } => {
                match ServerEvent::decode_audio_delta(&delta) {
                    Ok(audio) => {
                        self.accumulator.record_audio(audio.len());
                        self.emit(StreamChunk {
                            audio: Some(Bytes::from(audio)),
                            ..chunk_at(&position)
                        })
                        .await;
                    }
                    Err(e) => warn!("Failed to decode audio delta: {}", e),
                }
            }

            ServerEvent::AudioDone { position } => {
                self.emit(StreamChunk {
                    audio_done: true,
                    ..chunk_at(&position)
                })
                .await;
            }

            ServerEvent::AudioTranscriptDelta { position, delta } => {
                self.accumulator.push_transcript(&delta);
                self.emit(StreamChunk {
                    transcript_delta: Some(delta),
                    ..chunk_at(&position)
                })
                .await;
            }

            ServerEvent::AudioTranscriptDone {
                position,
                transcript,
            } => {
                self.emit(StreamChunk {
                    transcript: Some(transcript),
                    ..chunk_at(&position)
                })
                .await;
            }

            ServerEvent::OutputItemAdded {
                output_index, item, ..
            } => {
                if item.is_function_call() {
                    debug!(
                        "Function call announced: {:?} ({:?})",
                        item.name, item.call_id
                    );
                    self.accumulator.begin_tool_call(
                        item.call_id.as_deref().unwrap_or_default(),
                        item.name.as_deref(),
                        output_index,
                        item.arguments.as_deref(),
                    );
                }
            }

            ServerEvent::FunctionCallArgumentsDelta {
                output_index,
                call_id,
                delta,
                ..
            } => {
                self.accumulator
                    .append_tool_arguments(&call_id, output_index, &delta);
            }

            ServerEvent::FunctionCallArgumentsDone {
                response_id,
                item_id,
                output_index,
                call_id,
                name,
                arguments,
            } => {
                let call = self.accumulator.complete_tool_call(
                    &call_id,
                    output_index,
                    name.as_deref(),
                    &arguments,
                );
                info!("Function call ready: {} ({})", call.name, call.id);
                self.emit(StreamChunk {
                    tool_calls: vec![call],
                    response_id: Some(response_id),
                    item_id: Some(item_id),
                    ..Default::default()
                })
                .await;
            }

            ServerEvent::ResponseDone { response } => self.finish_response(response).await,

            ServerEvent::TranscriptionCompleted {
                item_id,
                content_index,
                transcript,
            } => {
                self.emit(StreamChunk {
                    input_transcript: Some(transcript),
                    item_id: Some(item_id),
                    content_index: Some(content_index),
                    ..Default::default()
                })
                .await;
            }

            ServerEvent::TranscriptionFailed { item_id, error, .. } => {
                warn!(
                    "Input transcription failed for {}: {}",
                    item_id, error.message
                );
            }

            ServerEvent::SpeechStarted {
                audio_start_ms,
                item_id,
            } => {
                debug!("Speech started at {}ms ({})", audio_start_ms, item_id);
            }

            ServerEvent::SpeechStopped {
                audio_end_ms,
                item_id,
            } => {
                debug!("Speech stopped at {}ms ({})", audio_end_ms, item_id);
            }

            ServerEvent::RateLimitsUpdated { rate_limits } => {
                for limit in rate_limits {
                    debug!(
                        "Rate limit {}: {}/{} remaining, resets in {}s",
                        limit.name, limit.remaining, limit.limit, limit.reset_seconds
                    );
                }
            }

            ServerEvent::InputAudioBufferCommitted { .. }
            | ServerEvent::InputAudioBufferCleared {}
            | ServerEvent::ConversationItemCreated { .. }
            | ServerEvent::OutputItemDone { .. }
            | ServerEvent::ContentPartAdded { .. }
            | ServerEvent::ContentPartDone { .. } => {
                debug!("Received {}", event.event_type());
            }

            ServerEvent::Unknown(base) => {
                debug!("Ignoring unhandled server event type {}", base.event_type);
            }
        }
    }

    async fn finish_response(&mut self, response: ResponseInfo) {
        let acc = &self.accumulator;
        if let Some(started) = acc.response_id() {
            if started != response.id {
                warn!(
                    "response.done for {} while accumulating {}",
                    response.id, started
                );
            }
        }
        let pending = acc.pending_tool_calls();
        if pending > 0 {
            warn!(
                "Response {} finished with {} incomplete tool call(s)",
                response.id, pending
            );
        }
        debug!(
            "Response {} {}: {} text bytes, {} transcript bytes, {} audio bytes",
            response.id,
            response.status,
            acc.text().len(),
            acc.transcript().len(),
            acc.audio_bytes()
        );

        let mut chunk = StreamChunk {
            finish_reason: Some(response.status.clone()),
            response_id: Some(response.id.clone()),
            content: self.accumulator.content(),
            tool_calls: self.accumulator.tool_calls(),
            ..Default::default()
        };

        if let Some(usage) = &response.usage {
            let cost = calculate_cost(
                &self.pricing,
                usage.input_tokens,
                usage.output_tokens,
                usage.cached_tokens(),
            );
            debug!(
                "Response {} used {} tokens (${:.6})",
                response.id,
                usage.total(),
                cost.total_cost_usd
            );
            self.shared.usage.lock().add(&cost);
            if let Some(sink) = &self.usage_sink {
                sink.record(&cost);
            }
            chunk.token_count = Some(usage.total());
            chunk.cost = Some(cost);
        }

        self.accumulator.reset();
        self.emit(chunk).await;
    }
}
