//! Error taxonomy surfaced to the hosting application.

use crate::reassembler::ProtocolViolation;

/// Error returned by [`Connection`](crate::Connection) operations and waiters.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// A send was attempted while the connection is not `Open`.
    #[error("connection is not open")]
    NotConnected,
    /// The command id is already awaiting a response.
    #[error("command id {0} is already pending")]
    DuplicateId(i64),
    /// The connection closed before a response arrived.
    #[error("connection closed")]
    ConnectionClosed,
    /// The peer answered the command with an error.
    #[error("command {id} failed: {message}")]
    Remote { id: i64, message: String },
    /// The request was abandoned locally; the connection may still be open.
    #[error("command {id} was abandoned")]
    Abandoned { id: i64 },
    /// No response arrived before the caller's deadline; the id was abandoned.
    #[error("timed out waiting for response to command {id}")]
    Timeout { id: i64 },
    /// The command could not be encoded; nothing was written.
    #[error("command encoding failed: {0}")]
    Codec(#[from] frames::CodecError),
    /// The websocket connection or handshake failed.
    #[error("websocket connect failed: {0}")]
    WsConnect(Box<tokio_tungstenite::tungstenite::Error>),
    /// A framing anomaly, for callers that drive the reassembler directly.
    #[error("protocol violation: {0}")]
    Protocol(#[from] ProtocolViolation),
}

impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WsConnect(Box::new(err))
    }
}

/// Result alias for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
