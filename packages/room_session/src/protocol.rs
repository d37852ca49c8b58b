//! Wire Protocol
//!
//! Frame types for the room message stream and the payloads of the REST
//! collaborators.

use serde::{Deserialize, Serialize};

use crate::error::MalformedFrame;
use crate::message::ChatMessage;

/// Frames sent from the client to the stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Message { text: String },
}

/// Result of decoding one inbound stream frame.
#[derive(Debug, Clone)]
pub enum InboundFrame {
    /// A broadcast chat message.
    Message(ChatMessage),
    /// A frame type this client does not handle. Ignored so the protocol
    /// can evolve without breaking older clients.
    Unhandled(String),
}

/// Decode an inbound frame.
///
/// Frames are JSON objects with a `type` discriminator; `"message"` is the
/// only type handled. Unknown types decode to `Unhandled`; payloads that
/// are not JSON, lack a discriminator, or carry an undecodable message
/// body are `MalformedFrame` errors.
pub fn decode_inbound(raw: &str) -> Result<InboundFrame, MalformedFrame> {
    let value: serde_json::Value =
        serde_json::from_str(raw).map_err(|e| MalformedFrame::new(e.to_string()))?;
    let Some(kind) = value.get("type").and_then(|t| t.as_str()) else {
        return Err(MalformedFrame::new("missing type discriminator"));
    };
    if kind != "message" {
        return Ok(InboundFrame::Unhandled(kind.to_string()));
    }
    let message: ChatMessage = serde_json::from_value(value)
        .map_err(|e| MalformedFrame::new(format!("undecodable message frame: {}", e)))?;
    Ok(InboundFrame::Message(message))
}

/// Encode an outbound send as `{"type":"message","text":...}`.
pub fn encode_outbound(text: &str) -> Result<String, serde_json::Error> {
    serde_json::to_string(&ClientFrame::Message {
        text: text.to_string(),
    })
}

/// History page payload from the REST backend, messages most-recent-first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryPage {
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub has_more: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_outbound_matches_wire_shape() {
        let json = encode_outbound("hi").unwrap();
        assert_eq!(json, r#"{"type":"message","text":"hi"}"#);
    }

    #[test]
    fn client_frame_roundtrip() {
        let json = r#"{"type":"message","text":"hello there"}"#;
        let frame: ClientFrame = serde_json::from_str(json).unwrap();
        match frame {
            ClientFrame::Message { text } => assert_eq!(text, "hello there"),
        }
    }

    #[test]
    fn decode_inbound_message_frame() {
        let raw = r#"{
            "type": "message",
            "id": 10,
            "room_id": "room-7",
            "sender_id": "u-1",
            "sender_name": "Alice",
            "text": "hi",
            "sent_at": 1700000000000
        }"#;
        match decode_inbound(raw).unwrap() {
            InboundFrame::Message(msg) => {
                assert_eq!(msg.id, 10);
                assert_eq!(msg.room_id, "room-7");
                assert_eq!(msg.text, "hi");
            }
            other => panic!("expected Message, got {:?}", other),
        }
    }

    #[test]
    fn decode_inbound_ignores_unknown_type() {
        let raw = r#"{"type":"presence","user_id":"u-1"}"#;
        match decode_inbound(raw).unwrap() {
            InboundFrame::Unhandled(kind) => assert_eq!(kind, "presence"),
            other => panic!("expected Unhandled, got {:?}", other),
        }
    }

    #[test]
    fn decode_inbound_rejects_non_json() {
        let err = decode_inbound("not json at all").unwrap_err();
        assert!(err.to_string().contains("malformed frame"));
    }

    #[test]
    fn decode_inbound_rejects_missing_discriminator() {
        let err = decode_inbound(r#"{"id":1,"text":"hi"}"#).unwrap_err();
        assert!(err.reason.contains("missing type"));
    }

    #[test]
    fn decode_inbound_rejects_message_with_missing_fields() {
        let err = decode_inbound(r#"{"type":"message","id":1}"#).unwrap_err();
        assert!(err.reason.contains("undecodable"));
    }

    #[test]
    fn history_page_defaults_has_more() {
        let json = r#"{"messages":[]}"#;
        let page: HistoryPage = serde_json::from_str(json).unwrap();
        assert!(page.messages.is_empty());
        assert!(!page.has_more);
    }

    #[test]
    fn history_page_deserializes_messages() {
        let json = r#"{
            "messages": [
                {"id":9,"room_id":"room-7","sender_id":"u-1","sender_name":"Alice","text":"b","sent_at":200},
                {"id":8,"room_id":"room-7","sender_id":"u-2","sender_name":"Bob","text":"a","sent_at":100}
            ],
            "has_more": true
        }"#;
        let page: HistoryPage = serde_json::from_str(json).unwrap();
        assert_eq!(page.messages.len(), 2);
        assert!(page.has_more);
        // Newest first, as the backend pages.
        assert_eq!(page.messages[0].id, 9);
    }
}
