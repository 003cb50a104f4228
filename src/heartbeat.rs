//! Application-level keep-alive.
//!
//! The peer expects a bare `"ping"` text frame at a fixed interval and
//! answers `"pong"`, which the reassembler discards. The heartbeat goes
//! through the writer queue like every other outbound frame.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use frames::HEARTBEAT_PING;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

use crate::transport::WriterHandle;

#[derive(Debug)]
enum Phase {
    Idle,
    Running(JoinHandle<()>),
    Stopped,
}

/// Periodic ping task. Starts once, stops once; a stopped heartbeat never
/// restarts.
#[derive(Debug)]
pub struct Heartbeat {
    phase: Mutex<Phase>,
    sent: Arc<AtomicU64>,
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self::new()
    }
}

impl Heartbeat {
    #[must_use]
    pub fn new() -> Self {
        Self {
            phase: Mutex::new(Phase::Idle),
            sent: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Spawn the ping task. The first ping goes out one `interval` after
    /// start. Returns `false` if already started or stopped.
    pub fn start(&self, interval: Duration, writer: WriterHandle) -> bool {
        let mut phase = self.phase.lock().unwrap_or_else(PoisonError::into_inner);
        if !matches!(*phase, Phase::Idle) {
            return false;
        }

        let period = interval.max(Duration::from_millis(1));
        let sent = Arc::clone(&self.sent);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                let _ = ticker.tick().await;
                if writer.send_text(HEARTBEAT_PING).await.is_err() {
                    debug!("heartbeat: writer gone, stopping");
                    break;
                }
                let total = sent.fetch_add(1, Ordering::Relaxed) + 1;
                debug!(total, "heartbeat: ping queued");
            }
        });

        *phase = Phase::Running(handle);
        true
    }

    /// Cancel the ping task. Idempotent; returns `true` only for the call
    /// that actually stopped a running task.
    pub fn stop(&self) -> bool {
        let mut phase = self.phase.lock().unwrap_or_else(PoisonError::into_inner);
        match std::mem::replace(&mut *phase, Phase::Stopped) {
            Phase::Running(handle) => {
                handle.abort();
                true
            }
            Phase::Idle | Phase::Stopped => false,
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        let phase = self.phase.lock().unwrap_or_else(PoisonError::into_inner);
        matches!(&*phase, Phase::Running(handle) if !handle.is_finished())
    }

    /// Pings queued so far.
    #[must_use]
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

#[cfg(test)]
#[path = "heartbeat_test.rs"]
mod tests;
