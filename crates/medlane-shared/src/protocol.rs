//! Wire protocol for the messaging service.
//!
//! Every frame is a JSON text envelope `{"event": ..., "payload": ...}` with a
//! kebab-case event name. Outbound commands are serialized strictly; inbound
//! frames are decoded into raw shapes with every field optional and then
//! [`normalize`d](RawServerFrame::normalize) into typed [`ServerEvent`]s.
//! Repairable defects (missing message id, unparseable timestamp) are repaired
//! during normalization; unplaceable frames fail with a [`ProtocolError`] and
//! are dropped by the transport loop.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::ProtocolError;
use crate::types::{ConversationId, MessageId, UserId};

/// Commands the client publishes over the transport channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "payload", rename_all = "kebab-case")]
pub enum ClientCommand {
    /// Ask the service to persist and broadcast a message.
    #[serde(rename_all = "camelCase")]
    SendMessage {
        conversation_id: ConversationId,
        receiver_id: UserId,
        body: String,
        kind: MessageKind,
    },

    /// Subscribe to live events for a conversation.
    #[serde(rename_all = "camelCase")]
    JoinConversation { conversation_id: ConversationId },

    /// Unsubscribe from a conversation's live events.
    #[serde(rename_all = "camelCase")]
    LeaveConversation { conversation_id: ConversationId },

    /// Acknowledge that a message has been read.
    #[serde(rename_all = "camelCase")]
    MarkRead {
        conversation_id: ConversationId,
        message_id: MessageId,
    },
}

impl ClientCommand {
    /// Serialize to the text-frame envelope.
    pub fn to_text(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Message content tag. Only `text` is exercised by the sync engine; unknown
/// tags decode as text so a newer server cannot wedge an older client.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Text,
    Image,
    File,
}

impl<'de> Deserialize<'de> for MessageKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let tag = String::deserialize(deserializer)?;
        Ok(match tag.to_ascii_lowercase().as_str() {
            "image" => MessageKind::Image,
            "file" => MessageKind::File,
            _ => MessageKind::Text,
        })
    }
}

/// A server-confirmed message after normalization: id and timestamp are
/// guaranteed present.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub receiver_id: Option<UserId>,
    pub body: String,
    pub kind: MessageKind,
    pub sent_at: DateTime<Utc>,
    pub sender_role: Option<String>,
    pub sender_display_name: Option<String>,
    pub is_read: bool,
}

/// Typed inbound events, produced by [`RawServerFrame::normalize`].
///
/// Lifecycle signals (`disconnected`, `reconnecting`, `reconnect-failed`) are
/// synthesized by the transport loop from socket state and never travel as
/// wire frames, so they do not appear here.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    /// Handshake succeeded; the session is live.
    Connected,
    /// A new message is available.
    Message(InboundMessage),
    /// A message was read by some participant.
    ReadReceipt {
        message_id: MessageId,
        reader_id: Option<UserId>,
    },
    /// The credential was rejected.
    AuthError { reason: String },
}

impl ServerEvent {
    /// Parse and normalize a text frame in one step.
    pub fn from_text(text: &str) -> Result<Self, ProtocolError> {
        RawServerFrame::parse(text)?.normalize()
    }
}

// ---------------------------------------------------------------------------
// Raw inbound shapes
// ---------------------------------------------------------------------------

/// An inbound envelope before any validation. The payload stays opaque until
/// the event name selects a shape for it.
#[derive(Debug, Clone, Deserialize)]
pub struct RawServerFrame {
    pub event: String,
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
}

/// `message` payload with every field optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RawInboundMessage {
    pub id: Option<MessageId>,
    pub conversation_id: Option<ConversationId>,
    pub sender_id: Option<UserId>,
    pub receiver_id: Option<UserId>,
    pub body: Option<String>,
    pub kind: Option<MessageKind>,
    #[serde(deserialize_with = "de_lenient_timestamp")]
    pub sent_at: Option<DateTime<Utc>>,
    pub sender_role: Option<String>,
    pub sender_display_name: Option<String>,
    pub is_read: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct RawReadReceipt {
    message_id: Option<MessageId>,
    reader_id: Option<UserId>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct RawAuthError {
    reason: Option<String>,
}

impl RawServerFrame {
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Convert a raw frame into a typed event, repairing what can be repaired
    /// and rejecting what cannot.
    pub fn normalize(self) -> Result<ServerEvent, ProtocolError> {
        match self.event.as_str() {
            "connected" => Ok(ServerEvent::Connected),

            "message" => {
                let raw: RawInboundMessage = parse_payload(self.payload)?;
                raw.normalize().map(ServerEvent::Message)
            }

            "read-receipt" => {
                let raw: RawReadReceipt = parse_payload(self.payload)?;
                let message_id = raw
                    .message_id
                    .ok_or(ProtocolError::MissingField("messageId"))?;
                Ok(ServerEvent::ReadReceipt {
                    message_id,
                    reader_id: raw.reader_id,
                })
            }

            "auth-error" => {
                let raw: RawAuthError = parse_payload(self.payload)?;
                Ok(ServerEvent::AuthError {
                    reason: raw.reason.unwrap_or_default(),
                })
            }

            other => Err(ProtocolError::Malformed(format!(
                "unknown event {other:?}"
            ))),
        }
    }
}

impl RawInboundMessage {
    /// Best-effort repair: a missing id is synthesized (a message must never
    /// enter a store unidentified) and a missing or unparseable timestamp
    /// falls back to now. A message without a conversation or sender cannot
    /// be placed anywhere, so those two stay fatal.
    pub fn normalize(self) -> Result<InboundMessage, ProtocolError> {
        let conversation_id = self
            .conversation_id
            .ok_or(ProtocolError::MissingField("conversationId"))?;
        let sender_id = self
            .sender_id
            .ok_or(ProtocolError::MissingField("senderId"))?;

        Ok(InboundMessage {
            id: self.id.unwrap_or_else(MessageId::synthetic),
            conversation_id,
            sender_id,
            receiver_id: self.receiver_id,
            body: self.body.unwrap_or_default(),
            kind: self.kind.unwrap_or_default(),
            sent_at: self.sent_at.unwrap_or_else(Utc::now),
            sender_role: self.sender_role,
            sender_display_name: self.sender_display_name,
            is_read: self.is_read.unwrap_or(false),
        })
    }
}

fn parse_payload<T: serde::de::DeserializeOwned>(
    payload: Option<serde_json::Value>,
) -> Result<T, ProtocolError> {
    match payload {
        Some(value) => Ok(serde_json::from_value(value)?),
        None => Err(ProtocolError::MissingField("payload")),
    }
}

/// Accepts RFC-3339 strings or epoch milliseconds; anything else decodes as
/// `None` for the caller to repair.
fn de_lenient_timestamp<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<DateTime<Utc>>, D::Error> {
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.and_then(parse_timestamp))
}

fn parse_timestamp(value: serde_json::Value) -> Option<DateTime<Utc>> {
    match value {
        serde_json::Value::String(s) => DateTime::parse_from_rfc3339(&s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        serde_json::Value::Number(n) => n
            .as_i64()
            .and_then(|millis| Utc.timestamp_millis_opt(millis).single()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(json: &str) -> RawServerFrame {
        RawServerFrame::parse(json).unwrap()
    }

    #[test]
    fn test_send_message_envelope_shape() {
        let cmd = ClientCommand::SendMessage {
            conversation_id: ConversationId::from("c1"),
            receiver_id: UserId::from("u2"),
            body: "Hi".to_string(),
            kind: MessageKind::Text,
        };

        let value: serde_json::Value = serde_json::from_str(&cmd.to_text().unwrap()).unwrap();
        assert_eq!(value["event"], "send-message");
        assert_eq!(value["payload"]["conversationId"], "c1");
        assert_eq!(value["payload"]["receiverId"], "u2");
        assert_eq!(value["payload"]["body"], "Hi");
        assert_eq!(value["payload"]["kind"], "text");
    }

    #[test]
    fn test_mark_read_envelope_shape() {
        let cmd = ClientCommand::MarkRead {
            conversation_id: ConversationId::from("c1"),
            message_id: MessageId::from("m1"),
        };

        let value: serde_json::Value = serde_json::from_str(&cmd.to_text().unwrap()).unwrap();
        assert_eq!(value["event"], "mark-read");
        assert_eq!(value["payload"]["messageId"], "m1");
    }

    #[test]
    fn test_numeric_ids_normalize_to_strings() {
        let event = frame(
            r#"{"event":"message","payload":{"id":7,"conversationId":12,"senderId":99,"body":"hey"}}"#,
        )
        .normalize()
        .unwrap();

        match event {
            ServerEvent::Message(msg) => {
                assert_eq!(msg.id.as_str(), "7");
                assert_eq!(msg.conversation_id.as_str(), "12");
                assert_eq!(msg.sender_id.as_str(), "99");
            }
            other => panic!("expected message, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_id_is_synthesized() {
        let event = frame(
            r#"{"event":"message","payload":{"conversationId":"c1","senderId":"u1","body":"x"}}"#,
        )
        .normalize()
        .unwrap();

        match event {
            ServerEvent::Message(msg) => {
                assert!(!msg.id.as_str().is_empty());
                assert!(!msg.id.is_provisional());
            }
            other => panic!("expected message, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_conversation_is_fatal() {
        let result = frame(r#"{"event":"message","payload":{"senderId":"u1","body":"x"}}"#)
            .normalize();
        assert!(matches!(
            result,
            Err(ProtocolError::MissingField("conversationId"))
        ));
    }

    #[test]
    fn test_epoch_millis_timestamp() {
        let event = frame(
            r#"{"event":"message","payload":{"id":"m1","conversationId":"c1","senderId":"u1","body":"x","sentAt":1700000000000}}"#,
        )
        .normalize()
        .unwrap();

        match event {
            ServerEvent::Message(msg) => {
                assert_eq!(msg.sent_at, Utc.timestamp_millis_opt(1_700_000_000_000).unwrap());
            }
            other => panic!("expected message, got {other:?}"),
        }
    }

    #[test]
    fn test_garbled_timestamp_falls_back_to_now() {
        let before = Utc::now();
        let event = frame(
            r#"{"event":"message","payload":{"id":"m1","conversationId":"c1","senderId":"u1","body":"x","sentAt":"not-a-date"}}"#,
        )
        .normalize()
        .unwrap();

        match event {
            ServerEvent::Message(msg) => {
                assert!(msg.sent_at >= before);
                assert!(msg.sent_at <= Utc::now());
            }
            other => panic!("expected message, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_event_is_malformed() {
        let result = frame(r#"{"event":"typing","payload":{}}"#).normalize();
        assert!(matches!(result, Err(ProtocolError::Malformed(_))));
    }

    #[test]
    fn test_unknown_kind_decodes_as_text() {
        let kind: MessageKind = serde_json::from_str("\"sticker\"").unwrap();
        assert_eq!(kind, MessageKind::Text);
    }

    #[test]
    fn test_read_receipt_normalizes() {
        let event = frame(r#"{"event":"read-receipt","payload":{"messageId":"m1","readerId":"u2"}}"#)
            .normalize()
            .unwrap();
        assert_eq!(
            event,
            ServerEvent::ReadReceipt {
                message_id: MessageId::from("m1"),
                reader_id: Some(UserId::from("u2")),
            }
        );
    }

    #[test]
    fn test_auth_error_reason_defaults_empty() {
        let event = frame(r#"{"event":"auth-error","payload":{}}"#).normalize().unwrap();
        assert_eq!(event, ServerEvent::AuthError { reason: String::new() });
    }
}
