//! Synchronization engine: one reducer over all local messaging state.
//!
//! The engine owns the conversation directory, the message logs, the unread
//! counter and the connection status. Inputs arrive as [`SyncEvent`]s (from
//! the transport task and from completed fetches) or as user commands (the
//! `prepare_send`/`join`/`mark_read` family). Every entry point mutates state
//! synchronously and returns [`Effect`]s describing the I/O the caller must
//! perform; the engine itself never awaits, so it can sit behind a plain
//! mutex and stays testable without a runtime.
//!
//! Reconciliation lives here. An incoming message is dropped if its id is
//! already in the log, collapses a matching provisional when it is this
//! user's own echo, and otherwise appends. A message for a conversation the
//! directory does not know schedules a directory refresh instead of guessing
//! at a summary.

use std::collections::HashSet;

use tracing::{debug, info, warn};

use medlane_net::LifecycleEvent;
use medlane_shared::constants::{EXPIRED_CREDENTIAL_MARKER, RECONCILE_WINDOW};
use medlane_shared::protocol::{ClientCommand, MessageKind, ServerEvent};
use medlane_shared::types::{ConnectionStatus, ConversationId, MessageId, UserId};
use medlane_store::{Conversation, ConversationDirectory, Message, MessageStore, UserSummary};

use crate::error::ClientError;
use crate::events::ClientEvent;

/// Everything the reducer reacts to besides direct user commands.
#[derive(Debug)]
pub enum SyncEvent {
    /// Connection lifecycle change from the transport task. REST calls that
    /// hit a 401 feed the same variant, so both auth paths converge here.
    Lifecycle(LifecycleEvent),
    /// A normalized server event from the live channel.
    Server(ServerEvent),
    /// A conversation directory fetch completed.
    DirectoryFetched(Vec<Conversation>),
    /// A history fetch for one conversation completed.
    HistoryFetched {
        conversation_id: ConversationId,
        messages: Vec<Message>,
    },
    /// An unread counter fetch completed.
    UnreadFetched(u32),
}

/// I/O the caller must perform after a reducer step. Effects are executed in
/// order; none of them feed back into the reducer synchronously.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Fetch the conversation directory, then feed the result back as
    /// [`SyncEvent::DirectoryFetched`].
    RefreshDirectory,
    /// Fetch the unread counter, then feed the result back as
    /// [`SyncEvent::UnreadFetched`].
    RefreshUnread,
    /// Write a protocol command to the live channel.
    Emit(ClientCommand),
    /// The credential is expired: clear it and route the user to sign-in.
    ForceLogout,
    /// Tear down the transport task.
    Shutdown,
    /// Broadcast an event to subscribers.
    Notify(ClientEvent),
}

/// The reducer state. One instance per signed-in client.
pub struct SyncEngine {
    directory: ConversationDirectory,
    store: MessageStore,
    status: ConnectionStatus,
    unread: u32,
    /// Conversations the user has joined; re-subscribed after every
    /// reconnect.
    joined: HashSet<ConversationId>,
    /// The signed-in user. Sender identity for provisional entries and the
    /// "is this my own echo" test during unread accounting.
    user: UserSummary,
}

impl SyncEngine {
    pub fn new(user: UserSummary) -> Self {
        Self {
            directory: ConversationDirectory::new(),
            store: MessageStore::new(),
            status: ConnectionStatus::Disconnected,
            unread: 0,
            joined: HashSet::new(),
            user,
        }
    }

    /// Swap the signed-in identity, used when the client connects with a
    /// fresh session.
    pub fn set_user(&mut self, user: UserSummary) {
        self.user = user;
    }

    // -----------------------------------------------------------------------
    // Snapshots
    // -----------------------------------------------------------------------

    pub fn status(&self) -> ConnectionStatus {
        self.status.clone()
    }

    pub fn conversations(&self) -> Vec<Conversation> {
        self.directory.all().to_vec()
    }

    pub fn messages(&self, conversation_id: &ConversationId) -> Vec<Message> {
        self.store.all(conversation_id).to_vec()
    }

    pub fn unread_count(&self) -> u32 {
        self.unread
    }

    // -----------------------------------------------------------------------
    // User commands
    // -----------------------------------------------------------------------

    /// Validate an outgoing send and build its provisional entry plus wire
    /// command. Mutates nothing, so a failed channel write aborts cleanly;
    /// the caller emits the command first and then calls [`commit_send`].
    ///
    /// [`commit_send`]: SyncEngine::commit_send
    pub fn prepare_send(
        &self,
        conversation_id: ConversationId,
        receiver_id: UserId,
        body: &str,
    ) -> Result<(Message, ClientCommand), ClientError> {
        if !self.status.can_send() {
            return Err(ClientError::NotConnected);
        }
        let trimmed = body.trim();
        if trimmed.is_empty() {
            return Err(ClientError::EmptyBody);
        }

        let provisional = Message::provisional(
            conversation_id.clone(),
            receiver_id.clone(),
            trimmed.to_string(),
            &self.user,
        );
        let command = ClientCommand::SendMessage {
            conversation_id,
            receiver_id,
            body: trimmed.to_string(),
            kind: MessageKind::Text,
        };
        Ok((provisional, command))
    }

    /// Record an optimistic send after its command went out on the wire.
    pub fn commit_send(&mut self, provisional: Message) -> Vec<Effect> {
        let conversation_id = provisional.conversation_id.clone();
        self.store.append(provisional.clone());

        let mut effects = vec![Effect::Notify(ClientEvent::MessageReceived(
            provisional.clone(),
        ))];
        if self.directory.touch(&conversation_id, &provisional) {
            effects.push(Effect::Notify(ClientEvent::ConversationUpdated(
                conversation_id,
            )));
        } else {
            info!(%conversation_id, "Sent into unknown conversation; scheduling directory refresh");
            effects.push(Effect::RefreshDirectory);
        }
        effects
    }

    /// Subscribe to a conversation's live events. Requires a live channel.
    pub fn join(&mut self, conversation_id: ConversationId) -> Result<Vec<Effect>, ClientError> {
        if !self.status.can_send() {
            return Err(ClientError::NotConnected);
        }
        self.joined.insert(conversation_id.clone());
        Ok(vec![Effect::Emit(ClientCommand::JoinConversation {
            conversation_id,
        })])
    }

    /// Unsubscribe from a conversation's live events. Always succeeds
    /// locally; the wire command goes out only while connected. Leaving does
    /// not cancel in-flight sends or discard provisional entries.
    pub fn leave(&mut self, conversation_id: &ConversationId) -> Vec<Effect> {
        self.joined.remove(conversation_id);
        if self.status.can_send() {
            vec![Effect::Emit(ClientCommand::LeaveConversation {
                conversation_id: conversation_id.clone(),
            })]
        } else {
            Vec::new()
        }
    }

    /// Mark a message read locally and acknowledge it to the service. The
    /// unread counter only moves when the message was an unread incoming
    /// one; re-marking and own messages leave it alone.
    pub fn mark_read(
        &mut self,
        conversation_id: &ConversationId,
        message_id: &MessageId,
    ) -> Vec<Effect> {
        let was_unread_incoming = self
            .store
            .all(conversation_id)
            .iter()
            .find(|m| &m.id == message_id)
            .map(|m| !m.is_read && m.sender_id != self.user.id)
            .unwrap_or(false);

        let mut effects = Vec::new();
        if self.store.mark_read(message_id).is_some() {
            self.directory
                .mark_last_message_read(conversation_id, message_id);
            effects.push(Effect::Notify(ClientEvent::ConversationUpdated(
                conversation_id.clone(),
            )));
        }
        if was_unread_incoming {
            self.unread = self.unread.saturating_sub(1);
            effects.push(Effect::Notify(ClientEvent::UnreadChanged(self.unread)));
        }
        // The acknowledgement goes out even when the message is not in the
        // local log; server state is authoritative for read flags.
        if self.status.can_send() {
            effects.push(Effect::Emit(ClientCommand::MarkRead {
                conversation_id: conversation_id.clone(),
                message_id: message_id.clone(),
            }));
        }
        effects
    }

    /// Add a conversation obtained over REST (create or refresh of one).
    pub fn insert_conversation(&mut self, conversation: Conversation) -> Vec<Effect> {
        let conversation_id = conversation.id.clone();
        self.directory.upsert(conversation);
        vec![Effect::Notify(ClientEvent::ConversationUpdated(
            conversation_id,
        ))]
    }

    /// Drop a conversation and its log after a REST delete. The unread
    /// counter is re-fetched because deleted unread messages no longer
    /// count.
    pub fn remove_conversation(&mut self, conversation_id: &ConversationId) -> Vec<Effect> {
        self.directory.remove(conversation_id);
        self.store.remove_conversation(conversation_id);
        self.joined.remove(conversation_id);
        vec![
            Effect::Notify(ClientEvent::ConversationUpdated(conversation_id.clone())),
            Effect::RefreshUnread,
        ]
    }

    /// Empty a conversation's log after a REST clear, keeping the
    /// conversation itself.
    pub fn clear_messages(&mut self, conversation_id: &ConversationId) -> Vec<Effect> {
        self.store.clear(conversation_id);
        self.directory.clear_last_message(conversation_id);
        vec![
            Effect::Notify(ClientEvent::ConversationUpdated(conversation_id.clone())),
            Effect::RefreshUnread,
        ]
    }

    // -----------------------------------------------------------------------
    // Event reduction
    // -----------------------------------------------------------------------

    /// Advance the state by one event. Never awaits and never re-enters
    /// itself; whatever I/O the step requires comes back as effects.
    pub fn apply(&mut self, event: SyncEvent) -> Vec<Effect> {
        match event {
            SyncEvent::Lifecycle(lifecycle) => self.apply_lifecycle(lifecycle),
            SyncEvent::Server(server) => self.apply_server(server),
            SyncEvent::DirectoryFetched(conversations) => {
                self.directory.replace_all(conversations);
                vec![Effect::Notify(ClientEvent::DirectoryRefreshed)]
            }
            SyncEvent::HistoryFetched {
                conversation_id,
                messages,
            } => {
                self.store.set_history(&conversation_id, messages);
                vec![Effect::Notify(ClientEvent::ConversationUpdated(
                    conversation_id,
                ))]
            }
            SyncEvent::UnreadFetched(count) => self.set_unread(count),
        }
    }

    fn apply_lifecycle(&mut self, lifecycle: LifecycleEvent) -> Vec<Effect> {
        match lifecycle {
            LifecycleEvent::Connecting => self.set_status(ConnectionStatus::Connecting),
            LifecycleEvent::Connected => {
                let mut effects = self.set_status(ConnectionStatus::Connected);
                if effects.is_empty() {
                    // Duplicate signal; the resync for this connect already
                    // ran.
                    return effects;
                }
                effects.push(Effect::RefreshDirectory);
                effects.push(Effect::RefreshUnread);
                for conversation_id in &self.joined {
                    effects.push(Effect::Emit(ClientCommand::JoinConversation {
                        conversation_id: conversation_id.clone(),
                    }));
                }
                effects
            }
            LifecycleEvent::Reconnecting { attempt } => {
                self.set_status(ConnectionStatus::Reconnecting { attempt })
            }
            LifecycleEvent::Disconnected => self.set_status(ConnectionStatus::Disconnected),
            // Exhausted retries read as plain disconnection; the UI offers a
            // manual reconnect either way.
            LifecycleEvent::ReconnectFailed => self.set_status(ConnectionStatus::Disconnected),
            LifecycleEvent::AuthRejected { reason } => self.apply_auth_rejected(&reason),
        }
    }

    fn apply_server(&mut self, event: ServerEvent) -> Vec<Effect> {
        match event {
            // The transport already signaled the handshake; the server's own
            // ack frame carries nothing further.
            ServerEvent::Connected => Vec::new(),
            ServerEvent::Message(inbound) => self.apply_message(Message::from(inbound)),
            ServerEvent::ReadReceipt { message_id, .. } => self.apply_read_receipt(&message_id),
            ServerEvent::AuthError { reason } => self.apply_auth_rejected(&reason),
        }
    }

    /// Reconcile one inbound message into the log.
    fn apply_message(&mut self, message: Message) -> Vec<Effect> {
        let conversation_id = message.conversation_id.clone();

        if self
            .store
            .all(&conversation_id)
            .iter()
            .any(|m| m.id == message.id)
        {
            debug!(id = %message.id, "Dropping duplicate message");
            return Vec::new();
        }

        // Own echo: collapse the provisional it confirms. Content matching
        // cannot tell identical rapid sends apart; the first match wins.
        let collapsed = self
            .find_matching_provisional(&message)
            .and_then(|id| self.store.remove_by_id(&conversation_id, &id))
            .map(|provisional| provisional.id);

        self.store.append(message.clone());

        let mut effects = Vec::new();
        match collapsed {
            Some(provisional_id) => effects.push(Effect::Notify(ClientEvent::MessageConfirmed {
                provisional_id,
                message: message.clone(),
            })),
            None => effects.push(Effect::Notify(ClientEvent::MessageReceived(message.clone()))),
        }

        if self.directory.touch(&conversation_id, &message) {
            effects.push(Effect::Notify(ClientEvent::ConversationUpdated(
                conversation_id,
            )));
        } else {
            info!(%conversation_id, "Message for unknown conversation; scheduling directory refresh");
            effects.push(Effect::RefreshDirectory);
        }

        if message.sender_id != self.user.id {
            self.unread += 1;
            effects.push(Effect::Notify(ClientEvent::UnreadChanged(self.unread)));
        }

        effects
    }

    /// First provisional from the same sender with the same trimmed body
    /// whose local timestamp is within the reconcile window of the server's.
    fn find_matching_provisional(&self, incoming: &Message) -> Option<MessageId> {
        let window_ms = RECONCILE_WINDOW.as_millis() as i64;
        self.store
            .all(&incoming.conversation_id)
            .iter()
            .find(|m| {
                m.is_provisional()
                    && m.sender_id == incoming.sender_id
                    && m.body.trim() == incoming.body.trim()
                    && (m.sent_at.timestamp_millis() - incoming.sent_at.timestamp_millis()).abs()
                        <= window_ms
            })
            .map(|m| m.id.clone())
    }

    fn apply_read_receipt(&mut self, message_id: &MessageId) -> Vec<Effect> {
        let Some(conversation_id) = self.store.mark_read(message_id) else {
            debug!(%message_id, "Read receipt for unknown message");
            return Vec::new();
        };
        self.directory
            .mark_last_message_read(&conversation_id, message_id);
        vec![Effect::Notify(ClientEvent::ConversationUpdated(
            conversation_id,
        ))]
    }

    /// Credential rejection, from either transport. Runs its side effects at
    /// most once; repeated rejections while already failed are no-ops.
    fn apply_auth_rejected(&mut self, reason: &str) -> Vec<Effect> {
        let already_failed = matches!(self.status, ConnectionStatus::AuthFailed);
        let mut effects = self.set_status(ConnectionStatus::AuthFailed);
        if already_failed {
            return effects;
        }

        effects.push(Effect::Shutdown);
        if reason.to_lowercase().contains(EXPIRED_CREDENTIAL_MARKER) {
            info!(reason, "Credential expired; forcing sign-out");
            effects.push(Effect::ForceLogout);
            effects.push(Effect::Notify(ClientEvent::SessionInvalidated));
        } else {
            warn!(reason, "Credential rejected");
        }
        effects
    }

    fn set_status(&mut self, status: ConnectionStatus) -> Vec<Effect> {
        if self.status == status {
            return Vec::new();
        }
        debug!(?status, "Connection status changed");
        self.status = status.clone();
        vec![Effect::Notify(ClientEvent::ConnectionChanged(status))]
    }

    fn set_unread(&mut self, count: u32) -> Vec<Effect> {
        if self.unread == count {
            return Vec::new();
        }
        self.unread = count;
        vec![Effect::Notify(ClientEvent::UnreadChanged(count))]
    }
}

impl Default for SyncEngine {
    fn default() -> Self {
        Self::new(UserSummary::default())
    }
}
