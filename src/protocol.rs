//! Wire format for the realtime channel.
//!
//! Frames are JSON text messages: `{"type": "message"|"typing", "payload": {...}}`.
//! Outbound chat sends additionally carry a caller-generated
//! `correlation_id` inside the payload, echoed back in the server's
//! acknowledgment frame.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Recognized inbound frame kinds. Anything else is dropped with a
/// diagnostic by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameKind {
    Message,
    Typing,
}

/// A realtime frame as it appears on the wire.
///
/// The kind is kept as a raw string so frames with unknown kinds still
/// decode — classification happens separately so the dispatcher can drop
/// them without failing the whole read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    #[serde(rename = "type")]
    pub kind: String,
    pub payload: Value,
}

impl Frame {
    pub fn new(kind: FrameKind, payload: Value) -> Self {
        let kind = match kind {
            FrameKind::Message => "message",
            FrameKind::Typing => "typing",
        };
        Self {
            kind: kind.to_string(),
            payload,
        }
    }

    pub fn message(payload: Value) -> Self {
        Self::new(FrameKind::Message, payload)
    }

    pub fn typing(payload: Value) -> Self {
        Self::new(FrameKind::Typing, payload)
    }

    /// Map the raw kind string to a recognized kind, if any.
    pub fn classify(&self) -> Option<FrameKind> {
        match self.kind.as_str() {
            "message" => Some(FrameKind::Message),
            "typing" => Some(FrameKind::Typing),
            _ => None,
        }
    }

    /// The correlation identifier carried in the payload, if present.
    pub fn correlation_id(&self) -> Option<&str> {
        self.payload.get("correlation_id")?.as_str()
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// An outbound chat message as the application hands it to the dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub conversation_id: String,
    pub body: String,
}

/// A fire-and-forget typing signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypingSignal {
    pub conversation_id: String,
    pub typing: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decode_message_frame() {
        let frame =
            Frame::decode(r#"{"type":"message","payload":{"body":"hi","correlation_id":"c1"}}"#)
                .unwrap();
        assert_eq!(frame.classify(), Some(FrameKind::Message));
        assert_eq!(frame.correlation_id(), Some("c1"));
    }

    #[test]
    fn decode_typing_frame() {
        let frame = Frame::decode(r#"{"type":"typing","payload":{"typing":true}}"#).unwrap();
        assert_eq!(frame.classify(), Some(FrameKind::Typing));
        assert_eq!(frame.correlation_id(), None);
    }

    #[test]
    fn unknown_kind_decodes_but_does_not_classify() {
        let frame = Frame::decode(r#"{"type":"presence","payload":{}}"#).unwrap();
        assert_eq!(frame.classify(), None);
        assert_eq!(frame.kind, "presence");
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(Frame::decode("{not json").is_err());
    }

    #[test]
    fn encode_roundtrip_preserves_correlation_id() {
        let frame = Frame::message(json!({"correlation_id": "abc", "body": "hello"}));
        let decoded = Frame::decode(&frame.encode().unwrap()).unwrap();
        assert_eq!(decoded.correlation_id(), Some("abc"));
        assert_eq!(decoded.classify(), Some(FrameKind::Message));
    }
}
