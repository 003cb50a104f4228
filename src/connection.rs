//! Connection lifecycle controller.
//!
//! DESIGN
//! ======
//! One `Connection` owns two tasks and one shared block:
//!
//! - reader task: reads frames in arrival order, feeds the reassembler it
//!   owns, hands each reassembled message to the correlator
//! - writer task: sole owner of the websocket sink (see `transport`)
//! - `Shared`: correlator behind a mutex, lifecycle state in a `watch`
//!   channel, heartbeat, counters, close reason
//!
//! Startup: transport connected → `Open` → handshake queued → heartbeat
//! started. Teardown always funnels through `Shared::close`, which records
//! the first close reason, stops the heartbeat, fails every waiter and only
//! then publishes `Closed`; anyone awaiting `closed()` therefore sees no
//! pending request left behind.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use frames::{Command, WireFrame};
use futures_util::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tracing::{info, warn};

use crate::config::ClientConfig;
use crate::correlator::{Correlator, Delivery, Subscription, Waiter};
use crate::error::{ClientError, Result};
use crate::heartbeat::Heartbeat;
use crate::lifecycle::{CloseReason, ConnectionState};
use crate::reassembler::{Payload, Reassembler};
use crate::transport::{self, ReadEnd, WriterHandle};

/// Snapshot of per-connection counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    pub frames_received: u64,
    pub messages_delivered: u64,
    pub protocol_violations: u64,
    pub unhandled_messages: u64,
    pub heartbeats_sent: u64,
}

#[derive(Debug, Default)]
struct Counters {
    frames_received: AtomicU64,
    messages_delivered: AtomicU64,
    protocol_violations: AtomicU64,
    unhandled_messages: AtomicU64,
}

// =============================================================================
// SHARED STATE
// =============================================================================

#[derive(Debug)]
struct Shared {
    state: watch::Sender<ConnectionState>,
    correlator: Mutex<Correlator>,
    heartbeat: Heartbeat,
    close_reason: Mutex<Option<CloseReason>>,
    counters: Counters,
}

impl Shared {
    fn new() -> Self {
        let (state, _) = watch::channel(ConnectionState::Connecting);
        Self {
            state,
            correlator: Mutex::new(Correlator::new()),
            heartbeat: Heartbeat::new(),
            close_reason: Mutex::new(None),
            counters: Counters::default(),
        }
    }

    fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Move to `next` if the lifecycle allows it.
    fn advance(&self, next: ConnectionState) -> bool {
        self.state.send_if_modified(|state| {
            if state.can_transition_to(next) {
                *state = next;
                true
            } else {
                false
            }
        })
    }

    fn correlator(&self) -> MutexGuard<'_, Correlator> {
        self.correlator.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn close_reason(&self) -> Option<CloseReason> {
        self.close_reason
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Run one inbound frame through reassembly and correlation.
    fn dispatch(&self, reassembler: &mut Reassembler, frame: WireFrame) {
        let _ = self.counters.frames_received.fetch_add(1, Ordering::Relaxed);

        let step = reassembler.on_frame(frame);
        for violation in step.violations {
            let _ = self.counters.protocol_violations.fetch_add(1, Ordering::Relaxed);
            warn!(%violation, "connection: protocol violation");
        }
        let Some(message) = step.message else {
            return;
        };

        let counter = match self.correlator().deliver(message) {
            Delivery::Resolved | Delivery::Pushed(_) => &self.counters.messages_delivered,
            Delivery::Unhandled => &self.counters.unhandled_messages,
        };
        let _ = counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Transition to `Closed`. Only the first call has any effect.
    fn close(&self, reason: CloseReason) -> bool {
        {
            let mut slot = self.close_reason.lock().unwrap_or_else(PoisonError::into_inner);
            if slot.is_some() {
                return false;
            }
            *slot = Some(reason.clone());
        }

        let _ = self.heartbeat.stop();
        let failed = self.correlator().fail_all();
        let _ = self.advance(ConnectionState::Closed);
        info!(%reason, failed, "connection: closed");
        true
    }

    fn stats(&self) -> ConnectionStats {
        ConnectionStats {
            frames_received: self.counters.frames_received.load(Ordering::Relaxed),
            messages_delivered: self.counters.messages_delivered.load(Ordering::Relaxed),
            protocol_violations: self.counters.protocol_violations.load(Ordering::Relaxed),
            unhandled_messages: self.counters.unhandled_messages.load(Ordering::Relaxed),
            heartbeats_sent: self.heartbeat.sent(),
        }
    }
}

// =============================================================================
// CONNECTION
// =============================================================================

/// A live protocol session with the remote engine.
///
/// Dropping it aborts its tasks and fails anything still pending.
#[derive(Debug)]
pub struct Connection {
    shared: Arc<Shared>,
    writer: WriterHandle,
    reader_task: JoinHandle<()>,
    writer_task: JoinHandle<()>,
    close_timeout: Duration,
}

impl Connection {
    /// Connect to `url` with configuration from the environment.
    ///
    /// # Errors
    ///
    /// See [`connect_with`](Self::connect_with).
    pub async fn connect(url: &str) -> Result<Self> {
        Self::connect_with(url, ClientConfig::from_env()).await
    }

    /// Open a websocket to `url`, send the handshake and start the heartbeat.
    /// Resolves once the handshake is queued.
    ///
    /// # Errors
    ///
    /// [`ClientError::WsConnect`] if the websocket cannot be established,
    /// [`ClientError::Codec`] if the configured handshake cannot be encoded.
    pub async fn connect_with(url: &str, config: ClientConfig) -> Result<Self> {
        let mut ws_config = WebSocketConfig::default();
        ws_config.max_message_size = Some(config.max_message_bytes);
        ws_config.max_frame_size = Some(config.max_message_bytes);

        let (ws, _) = tokio_tungstenite::connect_async_with_config(url, Some(ws_config), false).await?;
        info!(url, "connection: transport connected");
        Self::from_websocket(ws, config).await
    }

    /// Drive an already-established websocket.
    ///
    /// # Errors
    ///
    /// [`ClientError::Codec`] if the configured handshake cannot be encoded,
    /// [`ClientError::NotConnected`] if the socket died before it was queued.
    pub async fn from_websocket<S>(ws: WebSocketStream<S>, config: ClientConfig) -> Result<Self>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (sink, stream) = ws.split();
        let (writer, rx) = WriterHandle::channel(config.outbound_capacity);
        let shared = Arc::new(Shared::new());

        let writer_task = tokio::spawn({
            let shared = Arc::clone(&shared);
            async move {
                if let Err(e) = transport::run_writer(sink, rx).await {
                    if shared.close(CloseReason::Transport(e.to_string())) {
                        warn!(error = %e, "connection: write failed");
                    }
                }
            }
        });

        let reader_task = tokio::spawn({
            let shared = Arc::clone(&shared);
            let writer = writer.clone();
            async move {
                let mut reassembler = Reassembler::new();
                let end = transport::run_reader(stream, |frame| shared.dispatch(&mut reassembler, frame)).await;

                let reason = match end {
                    _ if shared.state() == ConnectionState::Closing => CloseReason::Terminated,
                    ReadEnd::Closed => CloseReason::RemoteClosed,
                    ReadEnd::Failed(e) => {
                        warn!(error = %e, "connection: read failed");
                        CloseReason::Transport(e.to_string())
                    }
                };
                let _ = shared.close(reason);
                // Let the writer flush the close reply and release the sink.
                let _ = writer.close().await;
            }
        });

        let connection = Self {
            shared,
            writer,
            reader_task,
            writer_task,
            close_timeout: config.close_timeout,
        };

        if connection.shared.advance(ConnectionState::Open) {
            info!("connection: open");
        }
        connection.send(config.handshake).await?;
        let _ = connection
            .shared
            .heartbeat
            .start(config.heartbeat_interval, connection.writer.clone());

        Ok(connection)
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Encode and queue `command`. No response is awaited.
    ///
    /// # Errors
    ///
    /// [`ClientError::NotConnected`] unless the connection is `Open`,
    /// [`ClientError::Codec`] if the command cannot be encoded. Nothing is
    /// written in either case.
    pub async fn send(&self, command: Command) -> Result<()> {
        if self.state() != ConnectionState::Open {
            return Err(ClientError::NotConnected);
        }
        let frames = frames::encode_command(command)?.into_frames();
        self.writer.send_frames(frames).await
    }

    /// Register the command's id, send it and wait for the response.
    ///
    /// # Errors
    ///
    /// Any [`send`](Self::send) or [`Waiter::wait`] error, or
    /// [`ClientError::DuplicateId`] if the id is already pending.
    pub async fn request(&self, command: Command) -> Result<Payload> {
        if self.state() != ConnectionState::Open {
            return Err(ClientError::NotConnected);
        }
        let waiter = self.register(command.id)?;
        if let Err(e) = self.send(command).await {
            let _ = self.abandon(waiter.id());
            return Err(e);
        }
        waiter.wait().await
    }

    /// [`request`](Self::request) with a deadline. On expiry the id is
    /// abandoned and a late response is counted as unhandled.
    ///
    /// # Errors
    ///
    /// [`ClientError::Timeout`] when the deadline passes, otherwise as
    /// [`request`](Self::request).
    pub async fn request_timeout(&self, command: Command, deadline: Duration) -> Result<Payload> {
        let id = command.id;
        match tokio::time::timeout(deadline, self.request(command)).await {
            Ok(result) => result,
            Err(_) => {
                let _ = self.abandon(id);
                warn!(id, "connection: request timed out");
                Err(ClientError::Timeout { id })
            }
        }
    }

    /// Create a pending request without sending anything.
    ///
    /// # Errors
    ///
    /// [`ClientError::DuplicateId`], or [`ClientError::ConnectionClosed`]
    /// once closed.
    pub fn register(&self, id: i64) -> Result<Waiter> {
        self.shared.correlator().register(id)
    }

    pub fn abandon(&self, id: i64) -> bool {
        self.shared.correlator().abandon(id)
    }

    /// Receive unsolicited messages carrying `id`.
    ///
    /// # Errors
    ///
    /// [`ClientError::ConnectionClosed`] once closed.
    pub fn subscribe(&self, id: i64) -> Result<Subscription> {
        self.shared.correlator().subscribe(id)
    }

    /// Receive every unsolicited message no per-id subscriber claimed.
    ///
    /// # Errors
    ///
    /// [`ClientError::ConnectionClosed`] once closed.
    pub fn on_push(&self) -> Result<Subscription> {
        self.shared.correlator().subscribe_all()
    }

    #[must_use]
    pub fn stats(&self) -> ConnectionStats {
        self.shared.stats()
    }

    /// Wait until the connection is `Closed` and report why.
    pub async fn closed(&self) -> CloseReason {
        let mut state = self.shared.state.subscribe();
        let _ = state.wait_for(|s| s.is_terminal()).await;
        self.shared.close_reason().unwrap_or(CloseReason::Dropped)
    }

    /// Close the connection: stop the heartbeat, send a close frame and wait
    /// for the transport to confirm. The whole call is bounded by the
    /// configured close timeout; on expiry both tasks are aborted and the
    /// connection is forced `Closed`. Calling it again, or after the peer
    /// closed, just reports the reason.
    pub async fn terminate(&self) -> CloseReason {
        let deadline = Instant::now() + self.close_timeout;

        if self.shared.advance(ConnectionState::Closing) {
            info!("connection: terminating");
            let _ = self.shared.heartbeat.stop();
            // A stuck writer can leave the queue full; the close request
            // shares the deadline.
            if let Ok(Err(_)) = tokio::time::timeout_at(deadline, self.writer.close()).await {
                let _ = self.shared.close(CloseReason::Terminated);
            }
        }

        if let Ok(reason) = tokio::time::timeout_at(deadline, self.closed()).await {
            return reason;
        }

        let timeout_ms = u64::try_from(self.close_timeout.as_millis()).unwrap_or(u64::MAX);
        warn!(timeout_ms, "connection: close handshake timed out");
        self.reader_task.abort();
        self.writer_task.abort();
        let _ = self.shared.close(CloseReason::Terminated);
        self.shared.close_reason().unwrap_or(CloseReason::Terminated)
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.reader_task.abort();
        self.writer_task.abort();
        let _ = self.shared.close(CloseReason::Dropped);
    }
}

#[cfg(test)]
#[path = "connection_test.rs"]
mod tests;
