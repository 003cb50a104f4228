//! Inbound frame reassembly.
//!
//! DESIGN
//! ======
//! The peer sends a transferable response as two frames: a control frame
//! flagged `is_transferable`, then the raw binary payload. The reassembler
//! is a single-slot state machine that pairs them back into one
//! [`ReassembledMessage`]:
//!
//! - `Idle` + control frame → deliver, or arm the slot if transferable
//! - `AwaitingBinary` + binary frame → deliver the pair, back to `Idle`
//! - `Idle` + binary frame → violation, frame dropped
//! - `AwaitingBinary` + control frame → violation, stale slot dropped,
//!   the new frame is handled as if `Idle`
//!
//! Heartbeat acknowledgements are discarded before any of the above and
//! never touch the slot.
//!
//! Violations are returned, not raised: one bad exchange resynchronizes on
//! the next well-formed control frame instead of taking the connection down.

use bytes::Bytes;
use frames::{ControlMessage, HEARTBEAT_PONG, WireFrame};
use serde_json::Value;
use tracing::debug;

// =============================================================================
// TYPES
// =============================================================================

/// Payload of a reassembled message.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Plain response: the control frame's `data` (`null` when absent).
    Json(Value),
    /// Transferable response with no stream port.
    Binary(Bytes),
    /// Transferable push for a subscribed view.
    Delta { port_id: i64, delta: Bytes },
    /// The peer reported a failure via the `error` field.
    Error(String),
}

/// One logical inbound message, ready for correlation.
#[derive(Debug, Clone, PartialEq)]
pub struct ReassembledMessage {
    pub command_id: i64,
    pub payload: Payload,
}

/// Marker left by a transferable control frame until its binary arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingBinary {
    pub command_id: i64,
    pub port_id: Option<i64>,
}

/// Framing anomaly detected while reassembling.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolViolation {
    #[error("binary frame of {len} bytes arrived with no transferable header pending")]
    UnexpectedBinary { len: usize },
    #[error("text frame arrived while awaiting the binary payload for command {command_id}")]
    InterruptedTransfer { command_id: i64 },
    #[error("malformed control frame: {0}")]
    MalformedControl(String),
}

/// Result of feeding one frame to the reassembler.
///
/// A frame can produce a message and violations together: an interrupting
/// control frame drops the stale slot and is still delivered. Violations are
/// listed in the order they were detected.
#[derive(Debug, Default, PartialEq)]
pub struct Step {
    pub message: Option<ReassembledMessage>,
    pub violations: Vec<ProtocolViolation>,
}

impl Step {
    fn deliver(message: ReassembledMessage) -> Self {
        Self {
            message: Some(message),
            violations: Vec::new(),
        }
    }

    fn violation(violation: ProtocolViolation) -> Self {
        Self {
            message: None,
            violations: vec![violation],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    AwaitingBinary(PendingBinary),
}

// =============================================================================
// REASSEMBLER
// =============================================================================

/// One per connection, owned by the reader task.
#[derive(Debug)]
pub struct Reassembler {
    state: State,
}

impl Default for Reassembler {
    fn default() -> Self {
        Self::new()
    }
}

impl Reassembler {
    #[must_use]
    pub fn new() -> Self {
        Self { state: State::Idle }
    }

    /// The armed slot, if a transferable header is waiting for its payload.
    #[must_use]
    pub fn pending(&self) -> Option<PendingBinary> {
        match self.state {
            State::Idle => None,
            State::AwaitingBinary(marker) => Some(marker),
        }
    }

    pub fn on_frame(&mut self, frame: WireFrame) -> Step {
        match frame {
            WireFrame::Text(text) => self.on_text(&text),
            WireFrame::Binary(bytes) => self.on_binary(bytes),
        }
    }

    pub fn on_text(&mut self, text: &str) -> Step {
        if text == HEARTBEAT_PONG {
            debug!("reassembler: heartbeat ack discarded");
            return Step::default();
        }

        let interrupted = match std::mem::replace(&mut self.state, State::Idle) {
            State::Idle => None,
            State::AwaitingBinary(marker) => Some(ProtocolViolation::InterruptedTransfer {
                command_id: marker.command_id,
            }),
        };

        let mut step = self.on_control(text);
        if let Some(violation) = interrupted {
            step.violations.insert(0, violation);
        }
        step
    }

    pub fn on_binary(&mut self, bytes: Bytes) -> Step {
        let State::AwaitingBinary(marker) = std::mem::replace(&mut self.state, State::Idle) else {
            return Step::violation(ProtocolViolation::UnexpectedBinary { len: bytes.len() });
        };

        let payload = match marker.port_id {
            Some(port_id) => Payload::Delta { port_id, delta: bytes },
            None => Payload::Binary(bytes),
        };

        Step::deliver(ReassembledMessage {
            command_id: marker.command_id,
            payload,
        })
    }

    /// Handle a control frame in the `Idle` state.
    fn on_control(&mut self, text: &str) -> Step {
        let control = match ControlMessage::parse(text) {
            Ok(control) => control,
            Err(e) => return Step::violation(ProtocolViolation::MalformedControl(e.to_string())),
        };

        if control.is_transferable {
            self.state = State::AwaitingBinary(PendingBinary {
                command_id: control.id,
                port_id: control.port_id(),
            });
            return Step::default();
        }

        let payload = match control.error {
            Some(message) => Payload::Error(message),
            None => Payload::Json(control.data.unwrap_or(Value::Null)),
        };

        Step::deliver(ReassembledMessage {
            command_id: control.id,
            payload,
        })
    }
}

#[cfg(test)]
#[path = "reassembler_test.rs"]
mod tests;
