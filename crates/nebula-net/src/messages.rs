//! Command-tagged messages and their binary envelope.
//!
//! Inbound and outbound traffic share one shape: a [`CommandId`] plus an
//! arbitrary JSON payload. The session layer never looks inside the payload;
//! only the TCP transport needs bytes, via [`encode_message`] and
//! [`decode_message`].

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::transport::TransportError;

/// Current wire-protocol version. Prepended to every encoded message.
pub const PROTOCOL_VERSION: u8 = 1;

/// Integer tag identifying a message type, used for outbound routing and
/// inbound dispatch alike.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CommandId(pub u32);

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cmd#{}", self.0)
    }
}

impl From<u32> for CommandId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

/// A single command-tagged message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Routing tag.
    pub command_id: CommandId,
    /// Opaque payload handed to every handler registered for `command_id`.
    pub payload: Value,
}

impl Message {
    /// Build a message from any serializable payload.
    pub fn new(command_id: CommandId, payload: impl Into<Value>) -> Self {
        Self {
            command_id,
            payload: payload.into(),
        }
    }

    /// Build a message by serializing a typed payload.
    pub fn from_serialize<T: Serialize>(
        command_id: CommandId,
        payload: &T,
    ) -> Result<Self, TransportError> {
        Ok(Self {
            command_id,
            payload: serde_json::to_value(payload).map_err(TransportError::Encode)?,
        })
    }
}

/// On-wire record. The payload travels as JSON bytes because postcard is not
/// self-describing and cannot rebuild a [`Value`].
#[derive(Serialize, Deserialize)]
struct Envelope {
    command_id: u32,
    payload: Vec<u8>,
}

/// Encode a message as `[PROTOCOL_VERSION, postcard(envelope)...]`.
pub fn encode_message(message: &Message) -> Result<Vec<u8>, TransportError> {
    let envelope = Envelope {
        command_id: message.command_id.0,
        payload: serde_json::to_vec(&message.payload).map_err(TransportError::Encode)?,
    };
    let body = postcard::to_allocvec(&envelope).map_err(TransportError::Envelope)?;

    let mut bytes = Vec::with_capacity(body.len() + 1);
    bytes.push(PROTOCOL_VERSION);
    bytes.extend_from_slice(&body);
    Ok(bytes)
}

/// Decode bytes produced by [`encode_message`].
pub fn decode_message(bytes: &[u8]) -> Result<Message, TransportError> {
    let (&version, body) = bytes.split_first().ok_or(TransportError::EmptyMessage)?;
    if version != PROTOCOL_VERSION {
        return Err(TransportError::UnsupportedVersion(version));
    }

    let envelope: Envelope = postcard::from_bytes(body).map_err(TransportError::Envelope)?;
    let payload = serde_json::from_slice(&envelope.payload).map_err(TransportError::Decode)?;
    Ok(Message {
        command_id: CommandId(envelope.command_id),
        payload,
    })
}
