//! Conversation directory.
//!
//! An ordered in-memory collection of conversation summaries, replaced
//! wholesale on REST fetch and patched in place by live events.

use tracing::debug;

use medlane_shared::types::{ConversationId, MessageId};

use crate::models::{Conversation, Message};

/// Holds every conversation the current user can see, newest activity first
/// for fresh inserts.  The directory never re-sorts on its own; wholesale
/// ordering comes from `replace_all`.
#[derive(Debug, Clone, Default)]
pub struct ConversationDirectory {
    conversations: Vec<Conversation>,
}

impl ConversationDirectory {
    /// Create a new, empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole directory with a freshly fetched list.
    pub fn replace_all(&mut self, conversations: Vec<Conversation>) {
        debug!(count = conversations.len(), "Replacing conversation directory");
        self.conversations = conversations;
    }

    /// Insert-or-replace by id.  Existing entries keep their position; new
    /// entries go to the front.
    pub fn upsert(&mut self, conversation: Conversation) {
        match self.position(&conversation.id) {
            Some(idx) => {
                debug!(conversation = %conversation.id, "Updating directory entry");
                self.conversations[idx] = conversation;
            }
            None => {
                debug!(conversation = %conversation.id, "Inserting directory entry");
                self.conversations.insert(0, conversation);
            }
        }
    }

    /// Remove a conversation, returning it so the caller can cascade the
    /// removal into the message store.
    pub fn remove(&mut self, id: &ConversationId) -> Option<Conversation> {
        let idx = self.position(id)?;
        debug!(conversation = %id, "Removing directory entry");
        Some(self.conversations.remove(idx))
    }

    /// Update `last_message` and `last_activity_at` from a newly reconciled
    /// message.  Returns `false` when the conversation is unknown; the caller
    /// schedules a directory refresh instead of fabricating a summary.
    pub fn touch(&mut self, id: &ConversationId, message: &Message) -> bool {
        match self.conversations.iter_mut().find(|c| &c.id == id) {
            Some(conversation) => {
                conversation.last_activity_at = message.sent_at;
                conversation.last_message = Some(message.clone());
                true
            }
            None => false,
        }
    }

    /// Flip `is_read` on the `last_message` preview when it is the message a
    /// read receipt named.  Keeps the directory copy in step with the log.
    pub fn mark_last_message_read(&mut self, id: &ConversationId, message_id: &MessageId) -> bool {
        match self
            .conversations
            .iter_mut()
            .find(|c| &c.id == id)
            .and_then(|c| c.last_message.as_mut())
        {
            Some(last) if &last.id == message_id => {
                last.is_read = true;
                true
            }
            _ => false,
        }
    }

    /// Drop the `last_message` preview, used when a conversation's log is
    /// cleared.  Returns `false` when the conversation is unknown.
    pub fn clear_last_message(&mut self, id: &ConversationId) -> bool {
        match self.conversations.iter_mut().find(|c| &c.id == id) {
            Some(conversation) => {
                conversation.last_message = None;
                true
            }
            None => false,
        }
    }

    /// Look up a conversation by id.
    pub fn get(&self, id: &ConversationId) -> Option<&Conversation> {
        self.conversations.iter().find(|c| &c.id == id)
    }

    /// Whether a conversation is present.
    pub fn contains(&self, id: &ConversationId) -> bool {
        self.position(id).is_some()
    }

    /// All conversations in directory order (snapshot view).
    pub fn all(&self) -> &[Conversation] {
        &self.conversations
    }

    /// Number of conversations.
    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }

    fn position(&self, id: &ConversationId) -> Option<usize> {
        self.conversations.iter().position(|c| &c.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use medlane_shared::types::UserId;

    use crate::models::UserSummary;

    fn test_conversation(id: &str) -> Conversation {
        Conversation {
            id: ConversationId::from(id),
            participants: vec![
                UserSummary {
                    id: UserId::from("u1"),
                    name: "Pat".to_string(),
                    role: "patient".to_string(),
                    avatar: None,
                },
                UserSummary {
                    id: UserId::from("u2"),
                    name: "Drew".to_string(),
                    role: "provider".to_string(),
                    avatar: None,
                },
            ],
            last_message: None,
            last_activity_at: Utc::now(),
        }
    }

    fn test_message(conversation: &str, id: &str) -> Message {
        Message {
            id: id.into(),
            conversation_id: conversation.into(),
            sender_id: UserId::from("u2"),
            receiver_id: Some(UserId::from("u1")),
            body: "hello".to_string(),
            kind: Default::default(),
            sent_at: Utc::now(),
            sender_role: None,
            sender_display_name: None,
            is_read: false,
        }
    }

    #[test]
    fn test_upsert_inserts_new_at_front() {
        let mut dir = ConversationDirectory::new();
        dir.upsert(test_conversation("c1"));
        dir.upsert(test_conversation("c2"));

        assert_eq!(dir.len(), 2);
        assert_eq!(dir.all()[0].id.as_str(), "c2");
        assert_eq!(dir.all()[1].id.as_str(), "c1");
    }

    #[test]
    fn test_upsert_replaces_in_place() {
        let mut dir = ConversationDirectory::new();
        dir.upsert(test_conversation("c1"));
        dir.upsert(test_conversation("c2"));

        let mut updated = test_conversation("c1");
        updated.participants.reverse();
        dir.upsert(updated);

        assert_eq!(dir.len(), 2);
        // c1 keeps its original slot.
        assert_eq!(dir.all()[1].id.as_str(), "c1");
        assert_eq!(dir.all()[1].participants[0].id.as_str(), "u2");
    }

    #[test]
    fn test_replace_all_overwrites_everything() {
        let mut dir = ConversationDirectory::new();
        dir.upsert(test_conversation("c1"));

        dir.replace_all(vec![test_conversation("c2"), test_conversation("c3")]);
        assert_eq!(dir.len(), 2);
        assert!(!dir.contains(&ConversationId::from("c1")));
    }

    #[test]
    fn test_remove_returns_entry() {
        let mut dir = ConversationDirectory::new();
        dir.upsert(test_conversation("c1"));

        let removed = dir.remove(&ConversationId::from("c1"));
        assert_eq!(removed.unwrap().id.as_str(), "c1");
        assert!(dir.is_empty());
        assert!(dir.remove(&ConversationId::from("c1")).is_none());
    }

    #[test]
    fn test_touch_updates_summary() {
        let mut dir = ConversationDirectory::new();
        dir.upsert(test_conversation("c1"));
        let msg = test_message("c1", "m1");

        assert!(dir.touch(&ConversationId::from("c1"), &msg));
        let conv = dir.get(&ConversationId::from("c1")).unwrap();
        assert_eq!(conv.last_message.as_ref().unwrap().id.as_str(), "m1");
        assert_eq!(conv.last_activity_at, msg.sent_at);
    }

    #[test]
    fn test_touch_unknown_conversation_is_false() {
        let mut dir = ConversationDirectory::new();
        let msg = test_message("c9", "m1");
        assert!(!dir.touch(&ConversationId::from("c9"), &msg));
    }

    #[test]
    fn test_mark_last_message_read_matches_by_id() {
        let mut dir = ConversationDirectory::new();
        dir.upsert(test_conversation("c1"));
        dir.touch(&ConversationId::from("c1"), &test_message("c1", "m1"));

        // A receipt for some other message leaves the preview alone.
        assert!(!dir.mark_last_message_read(&ConversationId::from("c1"), &MessageId::from("m9")));
        assert!(dir.mark_last_message_read(&ConversationId::from("c1"), &MessageId::from("m1")));
        let conv = dir.get(&ConversationId::from("c1")).unwrap();
        assert!(conv.last_message.as_ref().unwrap().is_read);
    }

    #[test]
    fn test_clear_last_message() {
        let mut dir = ConversationDirectory::new();
        dir.upsert(test_conversation("c1"));
        dir.touch(&ConversationId::from("c1"), &test_message("c1", "m1"));

        assert!(dir.clear_last_message(&ConversationId::from("c1")));
        assert!(dir.get(&ConversationId::from("c1")).unwrap().last_message.is_none());
    }
}
