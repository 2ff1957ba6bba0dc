//! Per-conversation message logs.
//!
//! Insertion-ordered, append-only except for reconciliation removals.  The
//! store never reorders a live log; display order is arrival order, and the
//! sync engine is responsible for removing a provisional entry before its
//! confirmed counterpart is appended.

use std::collections::HashMap;

use tracing::debug;

use medlane_shared::types::{ConversationId, MessageId};

use crate::models::Message;

/// In-memory message logs keyed by conversation.
#[derive(Debug, Clone, Default)]
pub struct MessageStore {
    logs: HashMap<ConversationId, Vec<Message>>,
}

impl MessageStore {
    /// Create a new, empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message to its conversation's log.
    ///
    /// Returns `false` without mutating when an entry with the same id is
    /// already present.  This is the id-level dedup backstop against
    /// at-least-once delivery from the transport.
    pub fn append(&mut self, message: Message) -> bool {
        let log = self.logs.entry(message.conversation_id.clone()).or_default();
        if log.iter().any(|existing| existing.id == message.id) {
            debug!(message = %message.id, "Dropping duplicate message");
            return false;
        }
        log.push(message);
        true
    }

    /// Remove a single entry, returning it if it existed.
    pub fn remove_by_id(
        &mut self,
        conversation: &ConversationId,
        id: &MessageId,
    ) -> Option<Message> {
        let log = self.logs.get_mut(conversation)?;
        let idx = log.iter().position(|m| &m.id == id)?;
        Some(log.remove(idx))
    }

    /// The conversation's log in display order.  Unknown conversations read
    /// as empty.
    pub fn all(&self, conversation: &ConversationId) -> &[Message] {
        self.logs.get(conversation).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Set `is_read` on the message with the given id, wherever it lives.
    ///
    /// Read-receipt events carry no conversation context, so this is a global
    /// scan by id.  O(total messages), acceptable at this scale.  Returns the
    /// owning conversation when a message was found.
    pub fn mark_read(&mut self, id: &MessageId) -> Option<ConversationId> {
        for (conversation, log) in self.logs.iter_mut() {
            if let Some(msg) = log.iter_mut().find(|m| &m.id == id) {
                msg.is_read = true;
                return Some(conversation.clone());
            }
        }
        None
    }

    /// Install a freshly fetched history for a conversation.
    ///
    /// The REST boundary may return either order, so the history is sorted
    /// oldest-first here (stable, so equal timestamps keep arrival order).
    /// Provisional entries still awaiting confirmation in the old log are
    /// re-appended after the history; everything else is replaced.  Ids are
    /// deduplicated, first occurrence wins.
    pub fn set_history(&mut self, conversation: &ConversationId, mut history: Vec<Message>) {
        history.sort_by_key(|m| m.sent_at);

        let pending: Vec<Message> = self
            .logs
            .remove(conversation)
            .unwrap_or_default()
            .into_iter()
            .filter(|m| m.is_provisional())
            .collect();

        let mut log: Vec<Message> = Vec::with_capacity(history.len() + pending.len());
        for msg in history.into_iter().chain(pending) {
            if !log.iter().any(|existing| existing.id == msg.id) {
                log.push(msg);
            }
        }

        debug!(conversation = %conversation, count = log.len(), "Installed message history");
        self.logs.insert(conversation.clone(), log);
    }

    /// Empty a conversation's log, keeping the conversation known.
    pub fn clear(&mut self, conversation: &ConversationId) {
        if let Some(log) = self.logs.get_mut(conversation) {
            debug!(conversation = %conversation, dropped = log.len(), "Clearing message log");
            log.clear();
        }
    }

    /// Drop a conversation's log entirely, cascading a directory removal.
    pub fn remove_conversation(&mut self, conversation: &ConversationId) {
        if let Some(log) = self.logs.remove(conversation) {
            debug!(conversation = %conversation, dropped = log.len(), "Dropping message log");
        }
    }

    /// Total number of messages across every conversation.
    pub fn total_len(&self) -> usize {
        self.logs.values().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use medlane_shared::types::UserId;

    fn test_message(conversation: &str, id: &str, offset_secs: i64) -> Message {
        Message {
            id: id.into(),
            conversation_id: conversation.into(),
            sender_id: UserId::from("u1"),
            receiver_id: None,
            body: "hello".to_string(),
            kind: Default::default(),
            sent_at: Utc::now() + Duration::seconds(offset_secs),
            sender_role: None,
            sender_display_name: None,
            is_read: false,
        }
    }

    #[test]
    fn test_append_dedupes_by_id() {
        let mut store = MessageStore::new();
        let conversation = ConversationId::from("c1");

        assert!(store.append(test_message("c1", "m1", 0)));
        assert!(!store.append(test_message("c1", "m1", 5)));
        assert_eq!(store.all(&conversation).len(), 1);
    }

    #[test]
    fn test_remove_by_id() {
        let mut store = MessageStore::new();
        let conversation = ConversationId::from("c1");
        store.append(test_message("c1", "m1", 0));
        store.append(test_message("c1", "m2", 1));

        let removed = store.remove_by_id(&conversation, &MessageId::from("m1"));
        assert_eq!(removed.unwrap().id.as_str(), "m1");
        assert_eq!(store.all(&conversation).len(), 1);
        assert!(store
            .remove_by_id(&conversation, &MessageId::from("m1"))
            .is_none());
    }

    #[test]
    fn test_all_unknown_conversation_is_empty() {
        let store = MessageStore::new();
        assert!(store.all(&ConversationId::from("nope")).is_empty());
    }

    #[test]
    fn test_mark_read_scans_every_conversation() {
        let mut store = MessageStore::new();
        store.append(test_message("c1", "m1", 0));
        store.append(test_message("c2", "m2", 0));

        let owner = store.mark_read(&MessageId::from("m2"));
        assert_eq!(owner, Some(ConversationId::from("c2")));
        assert!(store.all(&ConversationId::from("c2"))[0].is_read);
        assert!(!store.all(&ConversationId::from("c1"))[0].is_read);
        assert!(store.mark_read(&MessageId::from("missing")).is_none());
    }

    #[test]
    fn test_set_history_normalizes_to_oldest_first() {
        let mut store = MessageStore::new();
        let conversation = ConversationId::from("c1");

        // Newest-first input, as some endpoints return it.
        store.set_history(
            &conversation,
            vec![
                test_message("c1", "m3", 30),
                test_message("c1", "m2", 20),
                test_message("c1", "m1", 10),
            ],
        );

        let ids: Vec<&str> = store
            .all(&conversation)
            .iter()
            .map(|m| m.id.as_str())
            .collect();
        assert_eq!(ids, vec!["m1", "m2", "m3"]);
    }

    #[test]
    fn test_set_history_keeps_pending_provisionals() {
        let mut store = MessageStore::new();
        let conversation = ConversationId::from("c1");

        let mut provisional = test_message("c1", "ignored", 0);
        provisional.id = MessageId::provisional();
        let provisional_id = provisional.id.clone();
        store.append(test_message("c1", "old", -60));
        store.append(provisional);

        store.set_history(&conversation, vec![test_message("c1", "m1", -30)]);

        let log = store.all(&conversation);
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].id.as_str(), "m1");
        assert_eq!(log[1].id, provisional_id);
    }

    #[test]
    fn test_clear_keeps_conversation_known() {
        let mut store = MessageStore::new();
        let conversation = ConversationId::from("c1");
        store.append(test_message("c1", "m1", 0));

        store.clear(&conversation);
        assert!(store.all(&conversation).is_empty());
        assert!(store.append(test_message("c1", "m1", 0)));
    }

    #[test]
    fn test_remove_conversation_drops_log() {
        let mut store = MessageStore::new();
        store.append(test_message("c1", "m1", 0));
        store.append(test_message("c2", "m2", 0));

        store.remove_conversation(&ConversationId::from("c1"));
        assert_eq!(store.total_len(), 1);
        assert!(store.all(&ConversationId::from("c1")).is_empty());
    }
}
