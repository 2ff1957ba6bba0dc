//! Identifier newtypes and the connection-state tag.
//!
//! Ids are opaque strings end to end. Some upstream services serialize ids as
//! JSON numbers, so every id type deserializes from either a string or a
//! number and stores the decimal string form; later comparisons are therefore
//! always plain string comparisons.

use chrono::Utc;
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::constants::PROVISIONAL_ID_PREFIX;

/// String that also accepts a JSON number during deserialization.
#[derive(Deserialize)]
#[serde(untagged)]
enum LenientString {
    String(String),
    Number(serde_json::Number),
}

impl From<LenientString> for String {
    fn from(value: LenientString) -> Self {
        match value {
            LenientString::String(s) => s,
            LenientString::Number(n) => n.to_string(),
        }
    }
}

macro_rules! string_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Default, Serialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                LenientString::deserialize(deserializer).map(|s| Self(s.into()))
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

string_id! {
    /// A user identity (patient, provider or admin).
    UserId
}

string_id! {
    /// A direct conversation between two users.
    ConversationId
}

string_id! {
    /// A message identity. Server-issued for confirmed messages, locally
    /// minted (with the provisional prefix) for optimistic ones.
    MessageId
}

impl MessageId {
    /// Mint a provisional id for an optimistic send: epoch milliseconds plus
    /// a random suffix so two sends in the same millisecond cannot collide.
    pub fn provisional() -> Self {
        let millis = Utc::now().timestamp_millis();
        let suffix: u16 = rand::random();
        Self(format!("{PROVISIONAL_ID_PREFIX}{millis}-{suffix:04x}"))
    }

    /// Mint an id for an inbound message that arrived without one. Synthetic
    /// ids are server-side messages, so they do not carry the provisional
    /// prefix.
    pub fn synthetic() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Whether this id marks a locally-created message awaiting confirmation.
    pub fn is_provisional(&self) -> bool {
        self.0.starts_with(PROVISIONAL_ID_PREFIX)
    }
}

/// Connection state of the transport channel, owned exclusively by the
/// synchronization engine. Everything else only reads it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
    AuthFailed,
}

impl ConnectionStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionStatus::Connected)
    }

    /// Sends are only accepted while connected; `Reconnecting` and
    /// `Disconnected` reject rather than queue (there is no offline queue).
    pub fn can_send(&self) -> bool {
        self.is_connected()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provisional_ids_are_marked_and_unique() {
        let a = MessageId::provisional();
        let b = MessageId::provisional();

        assert!(a.is_provisional());
        assert!(b.is_provisional());
        assert_ne!(a, b);
    }

    #[test]
    fn test_synthetic_ids_are_not_provisional() {
        assert!(!MessageId::synthetic().is_provisional());
    }

    #[test]
    fn test_id_deserializes_from_number() {
        let id: UserId = serde_json::from_str("42").unwrap();
        assert_eq!(id, UserId::from("42"));

        let id: MessageId = serde_json::from_str("\"m1\"").unwrap();
        assert_eq!(id.as_str(), "m1");
    }

    #[test]
    fn test_id_serializes_as_plain_string() {
        let json = serde_json::to_string(&ConversationId::from("c1")).unwrap();
        assert_eq!(json, "\"c1\"");
    }

    #[test]
    fn test_can_send_only_while_connected() {
        assert!(ConnectionStatus::Connected.can_send());
        assert!(!ConnectionStatus::Connecting.can_send());
        assert!(!ConnectionStatus::Reconnecting { attempt: 2 }.can_send());
        assert!(!ConnectionStatus::Disconnected.can_send());
        assert!(!ConnectionStatus::AuthFailed.can_send());
    }
}
