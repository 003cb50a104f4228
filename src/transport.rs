//! Websocket transport adapter.
//!
//! The connection is split once: a dedicated writer task owns the sink and
//! drains an `mpsc` queue of [`Outbound`] batches, and a reader loop turns
//! websocket messages into [`WireFrame`]s for the dispatcher.
//!
//! ```text
//! Connection::send ─┐
//! Heartbeat ────────┼─► mpsc::Sender<Outbound> ─► writer task ─► socket
//! terminate ────────┘
//! ```
//!
//! Each batch is fed and flushed before the next one is taken off the
//! queue, so a control frame and its binary payload are never split by
//! another writer.
//!
//! Handles share a gate: sends hold it shared while queuing, `close` holds
//! it exclusively while queuing `Outbound::Close`. A send either lands ahead
//! of the close or fails with `NotConnected`; nothing is queued behind it.

use std::sync::Arc;

use frames::WireFrame;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::{RwLock, mpsc};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use crate::error::{ClientError, Result};

/// Work queued for the writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Frames written back-to-back as one unit.
    Frames(Vec<WireFrame>),
    /// Start the close handshake and stop writing.
    Close,
}

/// Cloneable handle onto the writer task's queue.
#[derive(Debug, Clone)]
pub struct WriterHandle {
    tx: mpsc::Sender<Outbound>,
    /// `true` until a close has been queued.
    open: Arc<RwLock<bool>>,
}

impl WriterHandle {
    /// Create a handle and the receiving end the writer task drains.
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let open = Arc::new(RwLock::new(true));
        (Self { tx, open }, rx)
    }

    /// Queue frames as one uninterrupted batch. Resolves once queued, not
    /// once written.
    ///
    /// # Errors
    ///
    /// [`ClientError::NotConnected`] if a close was requested or the writer
    /// task has stopped.
    pub async fn send_frames(&self, frames: Vec<WireFrame>) -> Result<()> {
        let open = self.open.read().await;
        if !*open {
            return Err(ClientError::NotConnected);
        }
        self.tx
            .send(Outbound::Frames(frames))
            .await
            .map_err(|_| ClientError::NotConnected)
    }

    /// Queue a single text frame.
    ///
    /// # Errors
    ///
    /// As [`send_frames`](Self::send_frames).
    pub async fn send_text(&self, text: impl Into<String>) -> Result<()> {
        self.send_frames(vec![WireFrame::Text(text.into())]).await
    }

    /// Ask the writer to close the socket after everything already queued.
    /// Later sends are rejected. A second call is a no-op.
    ///
    /// # Errors
    ///
    /// [`ClientError::NotConnected`] if the writer task has stopped.
    pub async fn close(&self) -> Result<()> {
        let mut open = self.open.write().await;
        if !*open {
            return Ok(());
        }
        *open = false;
        self.tx
            .send(Outbound::Close)
            .await
            .map_err(|_| ClientError::NotConnected)
    }

    /// Whether the writer task is gone.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Why the reader loop stopped.
#[derive(Debug)]
pub enum ReadEnd {
    /// The peer sent a close frame or the stream ended.
    Closed,
    /// The socket failed.
    Failed(WsError),
}

#[must_use]
pub fn to_message(frame: WireFrame) -> Message {
    match frame {
        WireFrame::Text(text) => Message::Text(text.into()),
        WireFrame::Binary(bytes) => Message::Binary(bytes),
    }
}

/// Drain the queue into `sink` until a close is requested or every handle
/// is dropped.
///
/// # Errors
///
/// Returns the first socket write error; the remaining queue is dropped.
pub async fn run_writer<S>(mut sink: S, mut rx: mpsc::Receiver<Outbound>) -> std::result::Result<(), WsError>
where
    S: Sink<Message, Error = WsError> + Unpin,
{
    while let Some(outbound) = rx.recv().await {
        match outbound {
            Outbound::Frames(frames) => {
                for frame in frames {
                    sink.feed(to_message(frame)).await?;
                }
                sink.flush().await?;
            }
            Outbound::Close => break,
        }
    }

    rx.close();
    match sink.close().await {
        Ok(()) | Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => Ok(()),
        Err(e) => Err(e),
    }
}

/// Feed every inbound text/binary frame to `on_frame`, in arrival order,
/// until the socket closes. Control-level ping/pong frames are answered by
/// the websocket layer and never surface here.
pub async fn run_reader<St, F>(mut stream: St, mut on_frame: F) -> ReadEnd
where
    St: Stream<Item = std::result::Result<Message, WsError>> + Unpin,
    F: FnMut(WireFrame),
{
    while let Some(item) = stream.next().await {
        match item {
            Ok(Message::Text(text)) => on_frame(WireFrame::Text(text.as_str().to_owned())),
            Ok(Message::Binary(bytes)) => on_frame(WireFrame::Binary(bytes)),
            Ok(Message::Close(_)) | Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => {
                return ReadEnd::Closed;
            }
            Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => {}
            Err(e) => return ReadEnd::Failed(e),
        }
    }
    ReadEnd::Closed
}

#[cfg(test)]
#[path = "transport_test.rs"]
mod tests;
