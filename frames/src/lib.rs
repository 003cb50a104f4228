//! Shared wire model for the tabular streaming protocol.
//!
//! This crate owns the representation of commands and control frames used
//! by the `tabwire` client and by test peers. Control frames are JSON text.
//! A transferable message is a control frame flagged `is_transferable`
//! followed by exactly one raw binary frame carrying its payload.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Heartbeat token sent by the client.
pub const HEARTBEAT_PING: &str = "ping";

/// Heartbeat acknowledgement sent back by the peer.
pub const HEARTBEAT_PONG: &str = "pong";

/// Top-level control frame keys that [`Command::fields`] may not override.
const RESERVED_FIELDS: [&str; 4] = ["id", "cmd", "args", "is_transferable"];

/// Error returned by the encode/decode functions in this crate.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The control frame is not valid JSON or lacks a required field.
    #[error("invalid control frame: {0}")]
    Json(#[from] serde_json::Error),
    /// A binary argument appeared somewhere other than the first position.
    #[error("binary argument at position {position} cannot be transferred; only the first argument may be binary")]
    MisplacedBinary { position: usize },
    /// An extra field collides with a key the control frame owns.
    #[error("field `{0}` is reserved by the control frame")]
    ReservedField(String),
    /// The control frame announced a binary payload but none was supplied.
    #[error("command {id} announced a binary payload but none followed")]
    MissingPayload { id: i64 },
    /// A binary payload was supplied for a control frame that did not announce one.
    #[error("command {id} received a binary payload it did not announce")]
    UnexpectedPayload { id: i64 },
}

// =============================================================================
// COMMANDS
// =============================================================================

/// One positional command argument.
#[derive(Clone, Debug, PartialEq)]
pub enum Arg {
    /// Any JSON-serializable value.
    Json(Value),
    /// An opaque binary blob (e.g. serialized flat rows).
    Binary(Bytes),
}

impl Arg {
    #[must_use]
    pub fn is_binary(&self) -> bool {
        matches!(self, Self::Binary(_))
    }
}

impl From<Value> for Arg {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

impl From<Bytes> for Arg {
    fn from(bytes: Bytes) -> Self {
        Self::Binary(bytes)
    }
}

impl From<Vec<u8>> for Arg {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Binary(Bytes::from(bytes))
    }
}

/// A logical command addressed to the remote table/view engine.
#[derive(Clone, Debug, PartialEq)]
pub struct Command {
    /// Caller-chosen id, unique among commands awaiting a response.
    pub id: i64,
    /// Command name, serialized as `cmd`.
    pub cmd: String,
    /// Ordered positional arguments.
    pub args: Vec<Arg>,
    /// Extra top-level fields (`name`, `method`, `subscribe`, ...).
    pub fields: Map<String, Value>,
}

impl Command {
    pub fn new(id: i64, cmd: impl Into<String>) -> Self {
        Self {
            id,
            cmd: cmd.into(),
            args: Vec::new(),
            fields: Map::new(),
        }
    }

    #[must_use]
    pub fn with_arg(mut self, arg: impl Into<Arg>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn with_binary(mut self, bytes: impl Into<Bytes>) -> Self {
        self.args.push(Arg::Binary(bytes.into()));
        self
    }

    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// True when the first argument is a binary blob, i.e. the command
    /// encodes to a control frame plus a binary frame.
    #[must_use]
    pub fn is_transferable(&self) -> bool {
        self.args.first().is_some_and(Arg::is_binary)
    }
}

// =============================================================================
// FRAMES
// =============================================================================

/// A single frame as it travels over the transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WireFrame {
    Text(String),
    Binary(Bytes),
}

/// Output of [`encode_command`]: a control frame and, for transferable
/// commands, the binary frame that must be written immediately after it.
#[derive(Clone, Debug, PartialEq)]
pub struct Encoded {
    pub control: String,
    pub payload: Option<Bytes>,
}

impl Encoded {
    /// Frames in write order.
    #[must_use]
    pub fn into_frames(self) -> Vec<WireFrame> {
        let mut frames = Vec::with_capacity(2);
        frames.push(WireFrame::Text(self.control));
        if let Some(payload) = self.payload {
            frames.push(WireFrame::Binary(payload));
        }
        frames
    }
}

#[derive(Serialize)]
struct OutboundControl<'a> {
    id: i64,
    cmd: &'a str,
    args: Vec<Value>,
    #[serde(skip_serializing_if = "is_false")]
    is_transferable: bool,
    #[serde(flatten)]
    fields: &'a Map<String, Value>,
}

#[derive(Deserialize)]
struct InboundCommand {
    id: i64,
    #[serde(default)]
    cmd: String,
    #[serde(default)]
    args: Vec<Value>,
    #[serde(default)]
    is_transferable: bool,
    #[serde(flatten)]
    fields: Map<String, Value>,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_false(value: &bool) -> bool {
    !*value
}

/// Encode a command into its control frame and optional binary payload.
///
/// A binary first argument is lifted out into the payload and replaced by
/// an empty object, so the peer still sees the full argument arity.
///
/// # Errors
///
/// Returns [`CodecError::MisplacedBinary`] for a binary argument that is
/// not first, and [`CodecError::ReservedField`] when an extra field would
/// shadow a control key. Nothing is produced on error.
pub fn encode_command(command: Command) -> Result<Encoded, CodecError> {
    let Command { id, cmd, args, fields } = command;

    if let Some(key) = fields.keys().find(|k| RESERVED_FIELDS.contains(&k.as_str())) {
        return Err(CodecError::ReservedField(key.clone()));
    }

    let mut payload = None;
    let mut json_args = Vec::with_capacity(args.len());
    for (position, arg) in args.into_iter().enumerate() {
        match arg {
            Arg::Json(value) => json_args.push(value),
            Arg::Binary(bytes) if position == 0 => {
                payload = Some(bytes);
                json_args.push(Value::Object(Map::new()));
            }
            Arg::Binary(_) => return Err(CodecError::MisplacedBinary { position }),
        }
    }

    let control = serde_json::to_string(&OutboundControl {
        id,
        cmd: &cmd,
        args: json_args,
        is_transferable: payload.is_some(),
        fields: &fields,
    })?;

    Ok(Encoded { control, payload })
}

/// Rebuild a command from its control frame and optional binary frame, the
/// way the receiving peer does.
///
/// # Errors
///
/// Returns [`CodecError::Json`] for malformed control text, and
/// [`CodecError::MissingPayload`] / [`CodecError::UnexpectedPayload`] when
/// the payload does not match the `is_transferable` flag.
pub fn decode_command(control: &str, payload: Option<Bytes>) -> Result<Command, CodecError> {
    let raw: InboundCommand = serde_json::from_str(control)?;
    let mut args: Vec<Arg> = raw.args.into_iter().map(Arg::Json).collect();

    match (raw.is_transferable, payload) {
        (true, Some(bytes)) => {
            if let Some(first) = args.first_mut() {
                *first = Arg::Binary(bytes);
            } else {
                args.push(Arg::Binary(bytes));
            }
        }
        (true, None) => return Err(CodecError::MissingPayload { id: raw.id }),
        (false, Some(_)) => return Err(CodecError::UnexpectedPayload { id: raw.id }),
        (false, None) => {}
    }

    Ok(Command {
        id: raw.id,
        cmd: raw.cmd,
        args,
        fields: raw.fields,
    })
}

// =============================================================================
// CONTROL MESSAGES
// =============================================================================

/// An inbound control frame from the peer.
///
/// Unknown keys are ignored. `data.port_id`, when present on a transferable
/// message, names the stream port the following binary delta belongs to.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ControlMessage {
    pub id: i64,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_transferable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ControlMessage {
    /// Plain response carrying `data`.
    #[must_use]
    pub fn reply(id: i64, data: Value) -> Self {
        Self {
            id,
            is_transferable: false,
            data: Some(data),
            error: None,
        }
    }

    /// Header announcing a binary payload, optionally for a stream port.
    #[must_use]
    pub fn transferable(id: i64, port_id: Option<i64>) -> Self {
        let data = port_id.map(|port| serde_json::json!({ "port_id": port }));
        Self {
            id,
            is_transferable: true,
            data,
            error: None,
        }
    }

    /// Failed response.
    #[must_use]
    pub fn failure(id: i64, message: impl Into<String>) -> Self {
        Self {
            id,
            is_transferable: false,
            data: None,
            error: Some(message.into()),
        }
    }

    /// Parse a control frame.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Json`] for malformed JSON or a missing/non-integer `id`.
    pub fn parse(text: &str) -> Result<Self, CodecError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Serialize to control frame text.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Json`] if `data` cannot be serialized.
    pub fn to_text(&self) -> Result<String, CodecError> {
        Ok(serde_json::to_string(self)?)
    }

    /// `data.port_id`, if the data object carries an integer one.
    #[must_use]
    pub fn port_id(&self) -> Option<i64> {
        self.data.as_ref()?.get("port_id")?.as_i64()
    }
}

#[cfg(test)]
#[path = "lib_test.rs"]
mod tests;
