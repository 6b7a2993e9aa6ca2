//! Frame codec for the legacy colon-delimited wire format.
//!
//! # Wire format
//!
//! ```text
//! FRAME:     [1 digit: type code] ":" [digits: message id, optional]
//!            ["+": ack-requested marker, optional] ":" [data]
//!
//! DISCONNECT: "0::"
//! CONNECT:    "1::"
//! HEARTBEAT:  "2::"
//! EVENT:      "5:::" ++ {"name": <string>, "args": [<json>...]}
//! ```
//!
//! Each transport message carries exactly one frame. Decoding is
//! prefix-based: the first fully-formed frame wins and trailing bytes are
//! ignored, including after the event JSON object.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A protocol message as carried by one wire frame.
///
/// Only `Disconnect`, `Connect`, `Heartbeat`, and `Event` travel on the
/// wire. The remaining variants mirror the legacy type codes `3`, `4`,
/// `6`, `7`, and `8`; they are reserved for wire-format compatibility and
/// are never encoded or decoded by this engine.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// `0::`: either side ends the session.
    Disconnect,
    /// `1::`: handshake acknowledgment, sent by the server on accept.
    Connect,
    /// `2::`: liveness probe, and the client's reply to one.
    Heartbeat,
    /// `5:::{...}`: a named application event with an ordered payload.
    Event {
        name: String,
        args: Vec<Value>,
    },
    /// Reserved legacy code `3`.
    Raw(String),
    /// Reserved legacy code `4`.
    Json(Value),
    /// Reserved legacy code `6`.
    Ack,
    /// Reserved legacy code `7`.
    Error,
    /// Reserved legacy code `8`.
    Noop,
}

/// Errors produced when encoding a [`Message`] for the wire.
#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    /// The variant is reserved and has no wire encoding.
    #[error("message variant is reserved and cannot be encoded")]
    Reserved,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Serialized body of an event frame. Field order is the wire order.
#[derive(Serialize)]
struct EventBody<'a> {
    name: &'a str,
    args: &'a [Value],
}

impl Message {
    /// Creates an [`Message::Event`] from a name and payload values.
    pub fn event(name: impl Into<String>, args: Vec<Value>) -> Self {
        Message::Event {
            name: name.into(),
            args,
        }
    }

    /// Encodes the message as one wire frame.
    ///
    /// Reserved variants are never produced internally; encoding one
    /// returns [`EncodeError::Reserved`].
    pub fn encode(&self) -> Result<String, EncodeError> {
        match self {
            Message::Disconnect => Ok("0::".to_string()),
            Message::Connect => Ok("1::".to_string()),
            Message::Heartbeat => Ok("2::".to_string()),
            Message::Event { name, args } => {
                let body = serde_json::to_string(&EventBody { name, args })?;
                Ok(format!("5:::{body}"))
            }
            Message::Raw(_) | Message::Json(_) | Message::Ack | Message::Error | Message::Noop => {
                Err(EncodeError::Reserved)
            }
        }
    }

    /// Decodes the first frame in `raw`.
    ///
    /// Returns `None` for an unknown type code or a malformed frame; the
    /// caller treats that as a protocol violation. Trailing bytes after a
    /// fully-formed frame are accepted.
    pub fn decode(raw: &str) -> Option<Message> {
        let bytes = raw.as_bytes();
        let code = *bytes.first()?;
        if !code.is_ascii_digit() {
            return None;
        }

        let mut idx = 1;
        if bytes.get(idx) != Some(&b':') {
            return None;
        }
        idx += 1;

        // Optional numeric message id, discarded.
        while bytes.get(idx).is_some_and(u8::is_ascii_digit) {
            idx += 1;
        }
        // Optional ack-requested marker, accepted but not surfaced.
        if bytes.get(idx) == Some(&b'+') {
            idx += 1;
        }
        if bytes.get(idx) != Some(&b':') {
            return None;
        }
        idx += 1;

        let rest = &raw[idx..];
        match code {
            b'0' => Some(Message::Disconnect),
            b'1' => Some(Message::Connect),
            b'2' => Some(Message::Heartbeat),
            b'5' => decode_event(rest),
            _ => None,
        }
    }
}

/// Decodes the body of an event frame: a further `:` then a JSON object
/// with a required `name` string and an optional `args` array.
fn decode_event(rest: &str) -> Option<Message> {
    let json = rest.strip_prefix(':')?;

    // Parse the first JSON value only; trailing bytes are allowed.
    let mut de = serde_json::Deserializer::from_str(json);
    let value = serde_json::Value::deserialize(&mut de).ok()?;

    let obj = value.as_object()?;
    let name = obj.get("name")?.as_str()?.to_string();
    let args = match obj.get("args") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(args)) => args.clone(),
        Some(_) => return None,
    };

    Some(Message::Event { name, args })
}
