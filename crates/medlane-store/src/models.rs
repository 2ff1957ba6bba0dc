//! Domain model structs held in the in-memory stores.
//!
//! Every struct derives `Serialize` and `Deserialize` (camelCase, matching the
//! REST payload shape) so it can be decoded straight from the directory
//! endpoints and handed to an embedding UI layer without translation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use medlane_shared::protocol::{InboundMessage, MessageKind};
use medlane_shared::types::{ConversationId, MessageId, UserId};

// ---------------------------------------------------------------------------
// User summary
// ---------------------------------------------------------------------------

/// Denormalized participant identity, enough to render a conversation row.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    /// Opaque user identifier.
    pub id: UserId,
    /// Display name.
    pub name: String,
    /// Platform role, `"patient"` or `"provider"`.
    #[serde(default)]
    pub role: String,
    /// Optional avatar URL.
    #[serde(default)]
    pub avatar: Option<String>,
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A single chat message, provisional or server-confirmed.
///
/// Provisional entries are minted locally at send time and replaced by their
/// confirmed counterpart during reconciliation; the two are told apart purely
/// by the id prefix.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Unique within the conversation's log.
    pub id: MessageId,
    /// The conversation this message belongs to.
    pub conversation_id: ConversationId,
    /// Author.
    pub sender_id: UserId,
    /// Addressee of a direct message, when the server includes it.
    #[serde(default)]
    pub receiver_id: Option<UserId>,
    /// Text content, trimmed at send time.
    pub body: String,
    /// Content tag; only `text` is exercised by the sync engine.
    #[serde(default)]
    pub kind: MessageKind,
    /// Client clock for provisional entries, server clock once confirmed.
    pub sent_at: DateTime<Utc>,
    /// Denormalized sender metadata for rendering without a join.
    #[serde(default)]
    pub sender_role: Option<String>,
    #[serde(default)]
    pub sender_display_name: Option<String>,
    /// Mutated only by read-receipt events.
    #[serde(default)]
    pub is_read: bool,
}

impl Message {
    /// Build the optimistic local entry for an outgoing send.  Temporary id,
    /// `sent_at` stamped from the local clock, sender fields taken from the
    /// current user.
    pub fn provisional(
        conversation_id: ConversationId,
        receiver_id: UserId,
        body: String,
        sender: &UserSummary,
    ) -> Self {
        Self {
            id: MessageId::provisional(),
            conversation_id,
            sender_id: sender.id.clone(),
            receiver_id: Some(receiver_id),
            body,
            kind: MessageKind::Text,
            sent_at: Utc::now(),
            sender_role: Some(sender.role.clone()),
            sender_display_name: Some(sender.name.clone()),
            is_read: false,
        }
    }

    /// Whether this entry still awaits server confirmation.
    pub fn is_provisional(&self) -> bool {
        self.id.is_provisional()
    }
}

impl From<InboundMessage> for Message {
    fn from(msg: InboundMessage) -> Self {
        Self {
            id: msg.id,
            conversation_id: msg.conversation_id,
            sender_id: msg.sender_id,
            receiver_id: msg.receiver_id,
            body: msg.body,
            kind: msg.kind,
            sent_at: msg.sent_at,
            sender_role: msg.sender_role,
            sender_display_name: msg.sender_display_name,
            is_read: msg.is_read,
        }
    }
}

// ---------------------------------------------------------------------------
// Conversation
// ---------------------------------------------------------------------------

/// A conversation summary as shown in the directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    /// Unique conversation identifier.
    pub id: ConversationId,
    /// Participants, two in the current direct-messaging scope.  Treated as a
    /// set: order carries no meaning.
    pub participants: Vec<UserSummary>,
    /// Most recent message across both optimistic and confirmed sources.
    #[serde(default)]
    pub last_message: Option<Message>,
    /// Timestamp backing directory ordering; kept consistent with
    /// `last_message`.
    pub last_activity_at: DateTime<Utc>,
}

impl Conversation {
    /// Membership test over the participant set, order-insensitive.
    pub fn has_participant(&self, user_id: &UserId) -> bool {
        self.participants.iter().any(|p| &p.id == user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use medlane_shared::constants::PROVISIONAL_ID_PREFIX;

    fn test_user(id: &str) -> UserSummary {
        UserSummary {
            id: UserId::from(id),
            name: format!("User {id}"),
            role: "patient".to_string(),
            avatar: None,
        }
    }

    #[test]
    fn test_provisional_message_shape() {
        let sender = test_user("u1");
        let before = Utc::now();
        let msg = Message::provisional(
            ConversationId::from("c1"),
            UserId::from("u2"),
            "Hi".to_string(),
            &sender,
        );

        assert!(msg.id.as_str().starts_with(PROVISIONAL_ID_PREFIX));
        assert!(msg.is_provisional());
        assert!(!msg.is_read);
        assert_eq!(msg.sender_id, sender.id);
        assert_eq!(msg.sender_display_name.as_deref(), Some("User u1"));
        assert!(msg.sent_at >= before && msg.sent_at <= Utc::now());
    }

    #[test]
    fn test_participant_order_is_irrelevant() {
        let a = test_user("u1");
        let b = test_user("u2");
        let conv = Conversation {
            id: ConversationId::from("c1"),
            participants: vec![b.clone(), a.clone()],
            last_message: None,
            last_activity_at: Utc::now(),
        };

        assert!(conv.has_participant(&a.id));
        assert!(conv.has_participant(&b.id));
        assert!(!conv.has_participant(&UserId::from("u3")));
    }

    #[test]
    fn test_conversation_decodes_from_camel_case() {
        let json = r#"{
            "id": "c1",
            "participants": [{"id": 7, "name": "Dana", "role": "provider"}],
            "lastMessage": null,
            "lastActivityAt": "2024-03-01T10:00:00Z"
        }"#;

        let conv: Conversation = serde_json::from_str(json).unwrap();
        assert_eq!(conv.id.as_str(), "c1");
        assert_eq!(conv.participants[0].id.as_str(), "7");
        assert!(conv.last_message.is_none());
    }
}
