//! Cross-frame wire protocol
//!
//! Every message is a JSON envelope posted with a `*` target origin:
//!
//!   { "type": "ADP.Registry.pullOBA",     "data": 123 }
//!   { "type": "ADP.Registry.pullOBA_ACK", "data": { "id": 123, "items": [ ... ] } }
//!   { "type": "ADP.Registry.unRegOBA",    "data": 123 }
//!
//! `unRegOBA_ACK` is part of the vocabulary but never sent.

use crate::error::{Error, Result};
use crate::types::{RawItem, SessionId};
use serde::{Deserialize, Serialize};

/// Envelope emitted when a message cannot be serialized.
pub const NULL_MESSAGE: &str = r#"{"type":"NULL"}"#;

/// A cross-frame protocol message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum WireMessage {
    /// Ask a frame for its items for a session.
    #[serde(rename = "ADP.Registry.pullOBA")]
    Pull(SessionId),

    /// Items answering a `Pull`.
    #[serde(rename = "ADP.Registry.pullOBA_ACK")]
    PullAck(PullAck),

    /// Ask a frame to forget a session it already handed over.
    #[serde(rename = "ADP.Registry.unRegOBA")]
    Unregister(SessionId),

    #[serde(rename = "ADP.Registry.unRegOBA_ACK")]
    UnregisterAck(UnregisterAck),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullAck {
    pub id: SessionId,
    #[serde(default)]
    pub items: Vec<RawItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnregisterAck {
    pub id: SessionId,
    #[serde(default)]
    pub result: bool,
}

impl WireMessage {
    pub fn pull(id: SessionId) -> Self {
        Self::Pull(id)
    }

    pub fn pull_ack(id: SessionId, items: Vec<RawItem>) -> Self {
        Self::PullAck(PullAck { id, items })
    }

    pub fn unregister(id: SessionId) -> Self {
        Self::Unregister(id)
    }

    /// The session this message is about.
    pub fn session(&self) -> SessionId {
        match self {
            Self::Pull(id) | Self::Unregister(id) => *id,
            Self::PullAck(ack) => ack.id,
            Self::UnregisterAck(ack) => ack.id,
        }
    }

    /// Wire name of the message type.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Pull(_) => "ADP.Registry.pullOBA",
            Self::PullAck(_) => "ADP.Registry.pullOBA_ACK",
            Self::Unregister(_) => "ADP.Registry.unRegOBA",
            Self::UnregisterAck(_) => "ADP.Registry.unRegOBA_ACK",
        }
    }

    /// Serialize to the JSON envelope; falls back to [`NULL_MESSAGE`].
    pub fn to_wire(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            tracing::warn!("Failed to serialize {} message: {}", self.kind(), e);
            NULL_MESSAGE.to_string()
        })
    }

    /// Parse an inbound envelope. Unknown types and shape errors are
    /// `InvalidMessage`.
    pub fn parse(data: &str) -> Result<Self> {
        serde_json::from_str(data)
            .map_err(|e| Error::invalid_message(format!("{}: {}", e, truncate(data, 120))))
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pull_uses_adjacent_envelope() {
        let wire = WireMessage::pull(SessionId::new(42)).to_wire();
        assert_eq!(wire, r#"{"type":"ADP.Registry.pullOBA","data":42}"#);
    }

    #[test]
    fn parses_ack_from_other_implementations() {
        let raw = r#"{"type":"ADP.Registry.pullOBA_ACK","data":{"id":7,"items":[{"title":"t","linkText":"l","url":"u","extra":1}]}}"#;
        let msg = WireMessage::parse(raw).unwrap();
        match msg {
            WireMessage::PullAck(ack) => {
                assert_eq!(ack.id, SessionId::new(7));
                assert_eq!(ack.items, vec![RawItem::new("t", "l", "u")]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn null_type_is_rejected() {
        assert!(WireMessage::parse(NULL_MESSAGE).is_err());
        assert!(WireMessage::parse("not json").is_err());
    }
}
