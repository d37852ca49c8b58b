//! Message Model
//!
//! The canonical chat message representation and the timeline merge rules
//! used by the session controller.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::RoomMismatch;

/// A single chat message as delivered by the backend.
///
/// The id is server-assigned; nothing is materialized locally for a
/// pending send. Sender metadata is denormalized at receipt time and
/// never revalidated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: i64,
    pub room_id: String,
    pub sender_id: String,
    pub sender_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_avatar: Option<String>,
    pub text: String,
    /// Unix timestamp in milliseconds. The timeline ordering key.
    pub sent_at: i64,
    #[serde(default)]
    pub edited: bool,
    /// Set for historical messages only; the live stream carries no edit
    /// events, so edits made during an open session appear on reopen.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edited_at: Option<i64>,
}

/// Whether a merge inserted the message or found its id already present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Inserted,
    Duplicate,
}

/// Ordered, deduplicated message history for one open room.
///
/// Unique by `id`; non-decreasing in `sent_at` as rendered, with ties kept
/// in arrival order.
#[derive(Debug, Clone)]
pub struct Timeline {
    room_id: String,
    messages: Vec<ChatMessage>,
    seen: HashSet<i64>,
}

impl Timeline {
    pub fn new(room_id: impl Into<String>) -> Self {
        Self {
            room_id: room_id.into(),
            messages: Vec::new(),
            seen: HashSet::new(),
        }
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Merge one message into the timeline.
    ///
    /// Idempotent: replaying a message with an already-present id returns
    /// `Duplicate` and leaves the timeline untouched. Live events arrive in
    /// non-decreasing timestamp order, so insertion is normally an append;
    /// an out-of-order timestamp is placed after every entry that sorts at
    /// or before it, preserving arrival order among ties.
    pub fn merge(&mut self, incoming: ChatMessage) -> Result<MergeOutcome, RoomMismatch> {
        if incoming.room_id != self.room_id {
            return Err(RoomMismatch {
                timeline_room: self.room_id.clone(),
                message_room: incoming.room_id,
            });
        }
        if !self.seen.insert(incoming.id) {
            return Ok(MergeOutcome::Duplicate);
        }
        let pos = self
            .messages
            .partition_point(|m| m.sent_at <= incoming.sent_at);
        if pos == self.messages.len() {
            self.messages.push(incoming);
        } else {
            self.messages.insert(pos, incoming);
        }
        Ok(MergeOutcome::Inserted)
    }

    /// Merge a history page into the timeline.
    ///
    /// The REST backend pages newest-first, so the page must be reversed
    /// before insertion to keep the timeline ascending. Returns the number
    /// of newly inserted messages.
    pub fn merge_history(
        &mut self,
        page: Vec<ChatMessage>,
        most_recent_first: bool,
    ) -> Result<usize, RoomMismatch> {
        let mut inserted = 0;
        if most_recent_first {
            for msg in page.into_iter().rev() {
                if self.merge(msg)? == MergeOutcome::Inserted {
                    inserted += 1;
                }
            }
        } else {
            for msg in page {
                if self.merge(msg)? == MergeOutcome::Inserted {
                    inserted += 1;
                }
            }
        }
        Ok(inserted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(id: i64, room: &str, sent_at: i64) -> ChatMessage {
        ChatMessage {
            id,
            room_id: room.to_string(),
            sender_id: "u-1".to_string(),
            sender_name: "Alice".to_string(),
            sender_avatar: None,
            text: format!("message {}", id),
            sent_at,
            edited: false,
            edited_at: None,
        }
    }

    #[test]
    fn merge_appends_in_timestamp_order() {
        let mut timeline = Timeline::new("room-7");
        timeline.merge(msg(1, "room-7", 100)).unwrap();
        timeline.merge(msg(2, "room-7", 200)).unwrap();
        timeline.merge(msg(3, "room-7", 300)).unwrap();

        let ids: Vec<i64> = timeline.messages().iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn merge_is_idempotent() {
        let mut timeline = Timeline::new("room-7");
        assert_eq!(
            timeline.merge(msg(1, "room-7", 100)).unwrap(),
            MergeOutcome::Inserted
        );
        assert_eq!(
            timeline.merge(msg(1, "room-7", 100)).unwrap(),
            MergeOutcome::Duplicate
        );
        assert_eq!(timeline.len(), 1);
    }

    #[test]
    fn duplicate_replay_does_not_reorder() {
        let mut timeline = Timeline::new("room-7");
        timeline.merge(msg(1, "room-7", 100)).unwrap();
        timeline.merge(msg(2, "room-7", 200)).unwrap();
        timeline.merge(msg(1, "room-7", 100)).unwrap();

        let ids: Vec<i64> = timeline.messages().iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn timestamp_ties_keep_arrival_order() {
        let mut timeline = Timeline::new("room-7");
        timeline.merge(msg(1, "room-7", 100)).unwrap();
        timeline.merge(msg(2, "room-7", 100)).unwrap();
        timeline.merge(msg(3, "room-7", 100)).unwrap();

        let ids: Vec<i64> = timeline.messages().iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn out_of_order_live_message_is_inserted_by_timestamp() {
        let mut timeline = Timeline::new("room-7");
        timeline.merge(msg(1, "room-7", 100)).unwrap();
        timeline.merge(msg(3, "room-7", 300)).unwrap();
        timeline.merge(msg(2, "room-7", 200)).unwrap();

        let ids: Vec<i64> = timeline.messages().iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn merge_rejects_message_for_other_room() {
        let mut timeline = Timeline::new("room-7");
        let err = timeline.merge(msg(1, "room-9", 100)).unwrap_err();
        assert_eq!(err.timeline_room, "room-7");
        assert_eq!(err.message_room, "room-9");
        assert!(timeline.is_empty());
    }

    #[test]
    fn merge_history_reverses_newest_first_page() {
        let mut timeline = Timeline::new("room-7");
        // Page as the backend returns it: most recent first.
        let page = vec![
            msg(3, "room-7", 300),
            msg(2, "room-7", 200),
            msg(1, "room-7", 100),
        ];
        let inserted = timeline.merge_history(page, true).unwrap();
        assert_eq!(inserted, 3);

        let ids: Vec<i64> = timeline.messages().iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn merge_history_accepts_oldest_first_page() {
        let mut timeline = Timeline::new("room-7");
        let page = vec![msg(1, "room-7", 100), msg(2, "room-7", 200)];
        timeline.merge_history(page, false).unwrap();

        let ids: Vec<i64> = timeline.messages().iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn merge_history_skips_already_merged_ids() {
        let mut timeline = Timeline::new("room-7");
        timeline.merge(msg(2, "room-7", 200)).unwrap();
        let page = vec![
            msg(3, "room-7", 300),
            msg(2, "room-7", 200),
            msg(1, "room-7", 100),
        ];
        let inserted = timeline.merge_history(page, true).unwrap();
        assert_eq!(inserted, 2);
        assert_eq!(timeline.len(), 3);
    }

    #[test]
    fn chat_message_serde_defaults_optional_fields() {
        let json = r#"{
            "id": 42,
            "room_id": "room-7",
            "sender_id": "u-1",
            "sender_name": "Alice",
            "text": "hello",
            "sent_at": 1700000000000
        }"#;
        let msg: ChatMessage = serde_json::from_str(json).unwrap();
        assert!(msg.sender_avatar.is_none());
        assert!(!msg.edited);
        assert!(msg.edited_at.is_none());
    }

    #[test]
    fn chat_message_serde_roundtrip_with_edit_fields() {
        let original = ChatMessage {
            id: 7,
            room_id: "room-7".to_string(),
            sender_id: "u-2".to_string(),
            sender_name: "Bob".to_string(),
            sender_avatar: Some("avatars/bob.png".to_string()),
            text: "edited text".to_string(),
            sent_at: 1700000000000,
            edited: true,
            edited_at: Some(1700000060000),
        };
        let json = serde_json::to_string(&original).unwrap();
        let decoded: ChatMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, original);
    }
}
