//! Events the client broadcasts to the embedding application.
//!
//! Every state change that a UI would render arrives here: new messages,
//! provisional confirmations, connection transitions, unread updates. The
//! stream is a [`tokio::sync::broadcast`] channel, so slow subscribers can
//! lag and miss events; snapshots on the client remain the source of truth.

use serde::Serialize;

use medlane_shared::types::{ConnectionStatus, ConversationId, MessageId};
use medlane_store::Message;

/// Notification pushed to [`MessagingClient::subscribe`](crate::client::MessagingClient::subscribe) listeners.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "event", content = "payload", rename_all = "kebab-case")]
pub enum ClientEvent {
    /// A message landed in a conversation log. Covers both peers' messages
    /// and this user's own optimistic sends.
    MessageReceived(Message),

    /// A provisional message was replaced by its authoritative echo.
    #[serde(rename_all = "camelCase")]
    MessageConfirmed {
        provisional_id: MessageId,
        message: Message,
    },

    /// A conversation's log or metadata changed in a way that is cheaper to
    /// re-read from the snapshot than to describe incrementally.
    ConversationUpdated(ConversationId),

    /// The conversation directory was replaced wholesale after a fetch.
    DirectoryRefreshed,

    /// The connection lifecycle moved to a new state.
    ConnectionChanged(ConnectionStatus),

    /// The global unread counter changed.
    UnreadChanged(u32),

    /// The stored credential was rejected as expired and has been cleared.
    /// The application should route the user back to sign-in.
    SessionInvalidated,
}
