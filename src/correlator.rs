//! Response correlation by caller-assigned command id.
//!
//! DESIGN
//! ======
//! Each pending request owns a `oneshot` sender in the table; the caller
//! holds the matching [`Waiter`]. Delivery looks up the id in order:
//!
//! 1. pending request → resolve it once and remove it
//! 2. per-id subscribers → push a copy to each live one
//! 3. wildcard subscribers → push a copy to each live one
//! 4. nobody → dropped and counted as unhandled
//!
//! `fail_all` resolves every outstanding waiter with `ConnectionClosed`,
//! drops all subscribers (ending their streams) and latches the table
//! closed, so later registrations fail fast.

use std::collections::HashMap;

use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::error::ClientError;
use crate::reassembler::{Payload, ReassembledMessage};

type Resolution = Result<Payload, ClientError>;

/// Outcome of [`Correlator::deliver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// A pending request was resolved.
    Resolved,
    /// Pushed to this many subscribers.
    Pushed(usize),
    /// No pending request and no live subscriber; the message was dropped.
    Unhandled,
}

// =============================================================================
// WAITER / SUBSCRIPTION
// =============================================================================

/// Single-use handle resolved by the matching response or by connection close.
#[derive(Debug)]
pub struct Waiter {
    id: i64,
    rx: oneshot::Receiver<Resolution>,
}

impl Waiter {
    #[must_use]
    pub fn id(&self) -> i64 {
        self.id
    }

    /// Wait for the response.
    ///
    /// # Errors
    ///
    /// [`ClientError::Remote`] if the peer answered with an error,
    /// [`ClientError::Abandoned`] if the id was abandoned,
    /// [`ClientError::ConnectionClosed`] if the connection went away first.
    pub async fn wait(self) -> Result<Payload, ClientError> {
        self.rx.await.unwrap_or(Err(ClientError::ConnectionClosed))
    }
}

/// Stream of unsolicited messages for one id, or for all ids.
///
/// Ends (yields `None`) once the connection closes.
#[derive(Debug)]
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<ReassembledMessage>,
}

impl Subscription {
    pub async fn next(&mut self) -> Option<ReassembledMessage> {
        self.rx.recv().await
    }

    /// Non-blocking poll, mostly for tests and drain loops.
    pub fn try_next(&mut self) -> Option<ReassembledMessage> {
        self.rx.try_recv().ok()
    }
}

// =============================================================================
// CORRELATOR
// =============================================================================

#[derive(Debug, Default)]
pub struct Correlator {
    pending: HashMap<i64, oneshot::Sender<Resolution>>,
    routes: HashMap<i64, Vec<mpsc::UnboundedSender<ReassembledMessage>>>,
    wildcard: Vec<mpsc::UnboundedSender<ReassembledMessage>>,
    closed: bool,
}

impl Correlator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a pending request for `id`.
    ///
    /// An entry whose waiter was dropped without an explicit
    /// [`abandon`](Self::abandon) is reclaimed rather than reported as a
    /// duplicate.
    ///
    /// # Errors
    ///
    /// [`ClientError::DuplicateId`] if `id` is still awaited,
    /// [`ClientError::ConnectionClosed`] after [`fail_all`](Self::fail_all).
    pub fn register(&mut self, id: i64) -> Result<Waiter, ClientError> {
        if self.closed {
            return Err(ClientError::ConnectionClosed);
        }
        if self.pending.get(&id).is_some_and(|tx| !tx.is_closed()) {
            return Err(ClientError::DuplicateId(id));
        }

        let (tx, rx) = oneshot::channel();
        let _ = self.pending.insert(id, tx);
        Ok(Waiter { id, rx })
    }

    /// Forget a pending request. A waiter still held for `id` sees
    /// [`ClientError::Abandoned`]; a late response is treated as unhandled.
    pub fn abandon(&mut self, id: i64) -> bool {
        let Some(tx) = self.pending.remove(&id) else {
            return false;
        };
        let _ = tx.send(Err(ClientError::Abandoned { id }));
        true
    }

    #[must_use]
    pub fn is_pending(&self, id: i64) -> bool {
        self.pending.contains_key(&id)
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Subscribe to unsolicited messages carrying `id`.
    ///
    /// # Errors
    ///
    /// [`ClientError::ConnectionClosed`] after [`fail_all`](Self::fail_all).
    pub fn subscribe(&mut self, id: i64) -> Result<Subscription, ClientError> {
        if self.closed {
            return Err(ClientError::ConnectionClosed);
        }
        let (tx, rx) = mpsc::unbounded_channel();
        self.routes.entry(id).or_default().push(tx);
        Ok(Subscription { rx })
    }

    /// Subscribe to every unsolicited message that has no per-id subscriber.
    ///
    /// # Errors
    ///
    /// [`ClientError::ConnectionClosed`] after [`fail_all`](Self::fail_all).
    pub fn subscribe_all(&mut self) -> Result<Subscription, ClientError> {
        if self.closed {
            return Err(ClientError::ConnectionClosed);
        }
        let (tx, rx) = mpsc::unbounded_channel();
        self.wildcard.push(tx);
        Ok(Subscription { rx })
    }

    pub fn deliver(&mut self, message: ReassembledMessage) -> Delivery {
        let id = message.command_id;

        if let Some(tx) = self.pending.remove(&id) {
            let resolution = match message.payload {
                Payload::Error(message) => Err(ClientError::Remote { id, message }),
                payload => Ok(payload),
            };
            if tx.send(resolution).is_ok() {
                return Delivery::Resolved;
            }
            debug!(id, "correlator: waiter dropped before response arrived");
            return Delivery::Unhandled;
        }

        let pushed = match self.routes.get_mut(&id) {
            Some(subscribers) => {
                let pushed = push_live(subscribers, &message);
                if subscribers.is_empty() {
                    let _ = self.routes.remove(&id);
                }
                pushed
            }
            None => 0,
        };
        if pushed > 0 {
            return Delivery::Pushed(pushed);
        }

        let pushed = push_live(&mut self.wildcard, &message);
        if pushed > 0 {
            return Delivery::Pushed(pushed);
        }

        debug!(id, "correlator: unhandled message dropped");
        Delivery::Unhandled
    }

    /// Resolve every pending request with `ConnectionClosed` and close all
    /// subscriptions. Returns how many waiters were failed; a second call
    /// returns 0.
    pub fn fail_all(&mut self) -> usize {
        if self.closed {
            return 0;
        }
        self.closed = true;

        let mut failed = 0;
        for (_, tx) in self.pending.drain() {
            if tx.send(Err(ClientError::ConnectionClosed)).is_ok() {
                failed += 1;
            }
        }
        self.routes.clear();
        self.wildcard.clear();
        failed
    }
}

/// Send a copy to every open subscriber, pruning closed ones.
fn push_live(
    subscribers: &mut Vec<mpsc::UnboundedSender<ReassembledMessage>>,
    message: &ReassembledMessage,
) -> usize {
    subscribers.retain(|tx| tx.send(message.clone()).is_ok());
    subscribers.len()
}

#[cfg(test)]
#[path = "correlator_test.rs"]
mod tests;
