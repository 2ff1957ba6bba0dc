use thiserror::Error;

use crate::api::ApiError;

/// Errors surfaced by [`MessagingClient`](crate::client::MessagingClient) operations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// No stored session; the caller must sign in before connecting.
    #[error("no credential available; sign in first")]
    MissingCredential,

    /// The operation needs a live channel and the client is offline.
    #[error("not connected")]
    NotConnected,

    /// Message bodies must contain at least one non-whitespace character.
    #[error("message body is empty")]
    EmptyBody,

    /// The websocket task could not be started.
    #[error("transport setup failed: {0}")]
    Transport(String),

    /// The transport's command queue is full. The send was not queued; the
    /// caller may retry once the backlog drains.
    #[error("transport command queue is full")]
    Busy,

    /// The channel task is gone; a reconnect is required.
    #[error("connection channel closed")]
    ChannelClosed,

    #[error(transparent)]
    Api(#[from] ApiError),
}
