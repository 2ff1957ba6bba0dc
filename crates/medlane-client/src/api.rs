//! REST surface for everything the websocket does not carry.
//!
//! Conversation listings, history backfill, conversation management and the
//! unread counter all live behind plain HTTP endpoints. [`RestApi`] is the
//! production implementation; [`ConversationApi`] exists so the sync layer
//! can be exercised against a mock without a server.

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

use medlane_shared::protocol::RawInboundMessage;
use medlane_shared::types::{ConversationId, UserId};
use medlane_store::{Conversation, Message};

use crate::session::CredentialSource;

#[derive(Debug, Error)]
pub enum ApiError {
    /// The request never produced a response.
    #[error("network error: {0}")]
    Network(String),

    /// The server answered with a non-success status other than 401/403.
    #[error("server returned {status}: {body}")]
    Http { status: u16, body: String },

    /// The server refused the bearer token. Treated like an `auth-error`
    /// frame on the websocket.
    #[error("credential rejected: {reason}")]
    AuthRejected { reason: String },

    /// The response body did not match the expected shape.
    #[error("could not decode response: {0}")]
    Decode(String),
}

/// Conversation and message endpoints the client depends on.
#[async_trait]
pub trait ConversationApi: Send + Sync {
    async fn list_conversations(&self) -> Result<Vec<Conversation>, ApiError>;

    /// Full history for one conversation, in whatever order the server
    /// chooses. Callers normalize the order when storing.
    async fn fetch_messages(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Vec<Message>, ApiError>;

    async fn create_conversation(&self, participant_id: &UserId) -> Result<Conversation, ApiError>;

    async fn delete_conversation(&self, conversation_id: &ConversationId) -> Result<(), ApiError>;

    async fn clear_messages(&self, conversation_id: &ConversationId) -> Result<(), ApiError>;

    async fn fetch_unread_count(&self) -> Result<u32, ApiError>;
}

#[derive(Debug, Deserialize)]
struct UnreadCountBody {
    #[serde(default)]
    count: u32,
}

/// HTTP client for the conversation API. The bearer token is read from the
/// credential source on every request, so a refreshed session takes effect
/// without rebuilding the client.
pub struct RestApi {
    client: reqwest::Client,
    base_url: String,
    credentials: Arc<dyn CredentialSource>,
}

impl RestApi {
    pub fn new(base_url: impl Into<String>, credentials: Arc<dyn CredentialSource>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            credentials,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.credentials.get() {
            Some(session) => builder.bearer_auth(session.token),
            None => builder,
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let request = self.authorize(self.client.get(self.url(path)));
        decode_response(request.send().await.map_err(network_error)?).await
    }

    async fn post_json<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T, ApiError> {
        let request = self.authorize(self.client.post(self.url(path)).json(body));
        decode_response(request.send().await.map_err(network_error)?).await
    }

    async fn delete(&self, path: &str) -> Result<(), ApiError> {
        let request = self.authorize(self.client.delete(self.url(path)));
        // Success bodies vary by endpoint here; only the status matters.
        success_body(request.send().await.map_err(network_error)?).await?;
        Ok(())
    }
}

#[async_trait]
impl ConversationApi for RestApi {
    async fn list_conversations(&self) -> Result<Vec<Conversation>, ApiError> {
        self.get_json("/api/conversations").await
    }

    async fn fetch_messages(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Vec<Message>, ApiError> {
        let raw: Vec<RawInboundMessage> = self
            .get_json(&format!("/api/conversations/{}/messages", conversation_id))
            .await?;

        // History rows go through the same normalization as socket frames;
        // rows missing a conversation or sender cannot be placed and are
        // skipped rather than failing the whole fetch.
        let mut messages = Vec::with_capacity(raw.len());
        for row in raw {
            match row.normalize() {
                Ok(inbound) => messages.push(Message::from(inbound)),
                Err(err) => warn!(%conversation_id, error = %err, "Skipping malformed history row"),
            }
        }
        Ok(messages)
    }

    async fn create_conversation(&self, participant_id: &UserId) -> Result<Conversation, ApiError> {
        self.post_json(
            "/api/conversations",
            &serde_json::json!({ "participantId": participant_id }),
        )
        .await
    }

    async fn delete_conversation(&self, conversation_id: &ConversationId) -> Result<(), ApiError> {
        self.delete(&format!("/api/conversations/{}", conversation_id))
            .await
    }

    async fn clear_messages(&self, conversation_id: &ConversationId) -> Result<(), ApiError> {
        self.delete(&format!("/api/conversations/{}/messages", conversation_id))
            .await
    }

    async fn fetch_unread_count(&self) -> Result<u32, ApiError> {
        let body: UnreadCountBody = self.get_json("/api/messages/unread-count").await?;
        Ok(body.count)
    }
}

fn network_error(err: reqwest::Error) -> ApiError {
    ApiError::Network(err.to_string())
}

/// Map auth and HTTP failures to errors; return the body text on success.
async fn success_body(response: reqwest::Response) -> Result<String, ApiError> {
    let status = response.status();
    let text = response.text().await.map_err(network_error)?;

    if status.as_u16() == 401 || status.as_u16() == 403 {
        return Err(ApiError::AuthRejected {
            reason: auth_reason(&text),
        });
    }
    if !status.is_success() {
        return Err(ApiError::Http {
            status: status.as_u16(),
            body: text,
        });
    }
    Ok(text)
}

async fn decode_response<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ApiError> {
    let text = success_body(response).await?;
    // 204-style responses carry no body; map them to JSON null so optional
    // targets decode.
    let body = if text.trim().is_empty() { "null" } else { &text };
    serde_json::from_str(body).map_err(|e| ApiError::Decode(e.to_string()))
}

/// Best-effort human-readable reason out of an auth failure body.
fn auth_reason(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        for key in ["message", "error"] {
            if let Some(reason) = value.get(key).and_then(|v| v.as_str()) {
                return reason.to_string();
            }
        }
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        "credential rejected".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::session::MemorySessionStore;

    #[test]
    fn test_url_joins_without_double_slash() {
        let api = RestApi::new(
            "https://api.example.test/",
            Arc::new(MemorySessionStore::default()),
        );
        assert_eq!(
            api.url("/api/conversations"),
            "https://api.example.test/api/conversations"
        );
    }

    #[test]
    fn test_auth_reason_prefers_message_field() {
        assert_eq!(
            auth_reason(r#"{"message":"Token expired","code":401}"#),
            "Token expired"
        );
        assert_eq!(auth_reason(r#"{"error":"expired token"}"#), "expired token");
    }

    #[test]
    fn test_auth_reason_falls_back_to_raw_body() {
        assert_eq!(auth_reason("Unauthorized"), "Unauthorized");
        assert_eq!(auth_reason("   "), "credential rejected");
    }
}
