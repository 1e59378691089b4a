//! Inbound frame decoding.
//!
//! A client frame is either a routing envelope
//! `{"type":"broadcast","to":[...],"body":...}` or anything else, which is
//! echoed back to the sender unchanged.

use bytes::Bytes;
use serde::{Deserialize, Deserializer};
use serde_json::value::RawValue;
use tracing::debug;

use super::hub::BroadcastRequest;
use crate::errors::ProtocolError;

/// Envelope `type` that routes a frame through the hub.
pub const BROADCAST_KIND: &str = "broadcast";

/// Wire shape of a command frame.
#[derive(Debug, Deserialize)]
pub struct Envelope {
    /// Command kind.
    #[serde(rename = "type", default)]
    pub kind: String,
    /// Target user ids. Missing or empty means everyone.
    #[serde(default)]
    pub to: Option<Vec<String>>,
    /// Payload, kept as the exact JSON text the client sent. A literal
    /// `null` is kept as `null`; only a missing key is `None`.
    #[serde(default, deserialize_with = "raw_if_present")]
    pub body: Option<Box<RawValue>>,
}

/// Capture a field's raw JSON, `null` included.
pub(crate) fn raw_if_present<'de, D>(de: D) -> Result<Option<Box<RawValue>>, D::Error>
where
    D: Deserializer<'de>,
{
    Box::<RawValue>::deserialize(de).map(Some)
}

impl Envelope {
    /// Parse a frame as an envelope.
    pub fn parse(frame: &[u8]) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_slice(frame)?)
    }
}

/// What a session should do with an inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Send the frame back to its sender.
    Echo(Bytes),
    /// Hand the request to the hub. The frame itself is consumed.
    Broadcast(BroadcastRequest),
}

/// Decode one inbound frame. Never fails: anything that is not a broadcast
/// envelope becomes [`Command::Echo`] of the original bytes.
pub fn decode(frame: Bytes) -> Command {
    let envelope = match Envelope::parse(&frame) {
        Ok(envelope) => envelope,
        Err(e) => {
            debug!(error = %e, bytes = frame.len(), "frame is not a command, echoing");
            return Command::Echo(frame);
        }
    };

    if envelope.kind != BROADCAST_KIND {
        debug!(kind = %envelope.kind, "unrecognised command kind, echoing");
        return Command::Echo(frame);
    }

    let payload = envelope
        .body
        .map(|body| Bytes::copy_from_slice(body.get().as_bytes()))
        .unwrap_or_default();
    Command::Broadcast(BroadcastRequest {
        targets: envelope.to.unwrap_or_default(),
        payload,
    })
}
