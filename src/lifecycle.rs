//! Connection lifecycle states.

use std::fmt;

/// Where a connection is in its life.
///
/// Transitions only move forward:
///
/// ```text
/// Connecting ─► Open ─► Closing ─► Closed
///      │          │                  ▲
///      └──────────┴──────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closing,
    Closed,
}

impl ConnectionState {
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        match (self, next) {
            (Self::Connecting, Self::Open) | (Self::Open, Self::Closing) => true,
            (Self::Closed, _) => false,
            (_, Self::Closed) => true,
            _ => false,
        }
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        self == Self::Closed
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Why a connection reached [`ConnectionState::Closed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Closed locally via `terminate`.
    Terminated,
    /// The peer closed the socket.
    RemoteClosed,
    /// The socket failed.
    Transport(String),
    /// The connection handle was dropped while still open.
    Dropped,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Terminated => f.write_str("terminated"),
            Self::RemoteClosed => f.write_str("closed by peer"),
            Self::Transport(e) => write!(f, "transport error: {e}"),
            Self::Dropped => f.write_str("dropped"),
        }
    }
}

#[cfg(test)]
#[path = "lifecycle_test.rs"]
mod tests;
