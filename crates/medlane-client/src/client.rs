//! The messaging client facade.
//!
//! [`MessagingClient`] wires the pieces together: it spawns the transport
//! task, runs the notification loop that feeds transport events into the
//! [`SyncEngine`], executes the effects each reducer step returns, and
//! exposes the operations an application calls. State reads are snapshots;
//! change notifications arrive on the broadcast stream from
//! [`MessagingClient::subscribe`].
//!
//! Locking discipline: the engine sits behind a plain mutex and every apply
//! is synchronous, so the lock is never held across an await. Network I/O
//! (REST fetches triggered by effects) happens outside the lock and feeds
//! its results back in as further events.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

use medlane_net::{
    spawn_channel, ChannelCommand, ChannelConfig, ChannelNotification, LifecycleEvent,
};
use medlane_shared::constants::EVENT_CHANNEL_CAPACITY;
use medlane_shared::types::{ConnectionStatus, ConversationId, MessageId, UserId};
use medlane_store::{Conversation, Message};

use crate::api::{ApiError, ConversationApi, RestApi};
use crate::engine::{Effect, SyncEngine, SyncEvent};
use crate::error::ClientError;
use crate::events::ClientEvent;
use crate::session::CredentialSource;

const DEFAULT_API_URL: &str = "https://api.medlane.health";

/// Client configuration: the REST endpoint plus the transport settings.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the REST API.
    /// Env: `MEDLANE_API_URL`
    /// Default: `https://api.medlane.health`
    pub api_url: String,

    /// Live channel settings. The token field is overwritten from the
    /// credential source at connect time.
    pub channel: ChannelConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            channel: ChannelConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults.
    pub fn from_env() -> Self {
        let mut config = Self {
            channel: ChannelConfig::from_env(),
            ..Self::default()
        };
        if let Ok(url) = std::env::var("MEDLANE_API_URL") {
            config.api_url = url;
        }
        config
    }
}

/// Shared handle for executing reducer effects. Cloned into the
/// notification loop and into the background tasks user commands schedule.
struct EffectContext {
    engine: Arc<Mutex<SyncEngine>>,
    api: Arc<dyn ConversationApi>,
    credentials: Arc<dyn CredentialSource>,
    events_tx: broadcast::Sender<ClientEvent>,
    cmd_tx: Option<mpsc::Sender<ChannelCommand>>,
}

impl EffectContext {
    fn apply(&self, event: SyncEvent) -> Vec<Effect> {
        self.engine
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .apply(event)
    }

    /// Apply one event and run everything it causes.
    async fn dispatch(&self, event: SyncEvent) {
        let effects = self.apply(event);
        self.run(effects).await;
    }

    /// Execute effects in order. Fetch effects feed their result back into
    /// the reducer and the follow-up effects join the back of the queue, so
    /// a refresh triggered by a refresh still terminates.
    async fn run(&self, effects: Vec<Effect>) {
        let mut queue: VecDeque<Effect> = effects.into();
        while let Some(effect) = queue.pop_front() {
            let Some(fetch) = self.run_local(effect) else {
                continue;
            };
            match fetch {
                Effect::RefreshDirectory => match self.api.list_conversations().await {
                    Ok(conversations) => {
                        queue.extend(self.apply(SyncEvent::DirectoryFetched(conversations)));
                    }
                    Err(err) => queue.extend(self.auth_effects(err, "directory refresh failed")),
                },
                Effect::RefreshUnread => match self.api.fetch_unread_count().await {
                    Ok(count) => queue.extend(self.apply(SyncEvent::UnreadFetched(count))),
                    Err(err) => queue.extend(self.auth_effects(err, "unread refresh failed")),
                },
                _ => {}
            }
        }
    }

    /// Execute a non-fetch effect inline. Fetch effects are handed back for
    /// the caller to schedule.
    fn run_local(&self, effect: Effect) -> Option<Effect> {
        match effect {
            Effect::Notify(event) => {
                // Send fails only when nobody subscribed yet.
                let _ = self.events_tx.send(event);
                None
            }
            Effect::Emit(command) => {
                self.emit(ChannelCommand::Emit(command));
                None
            }
            Effect::Shutdown => {
                self.emit(ChannelCommand::Shutdown);
                None
            }
            Effect::ForceLogout => {
                warn!("Credential expired; clearing session and requesting sign-in");
                self.credentials.clear();
                self.credentials.force_reauth();
                None
            }
            fetch => Some(fetch),
        }
    }

    /// A REST auth rejection feeds the same lifecycle path as an auth-error
    /// frame; everything else is logged and dropped.
    fn auth_effects(&self, err: ApiError, context: &'static str) -> Vec<Effect> {
        match err {
            ApiError::AuthRejected { reason } => {
                self.apply(SyncEvent::Lifecycle(LifecycleEvent::AuthRejected { reason }))
            }
            err => {
                warn!(error = %err, "{}", context);
                Vec::new()
            }
        }
    }

    fn emit(&self, command: ChannelCommand) {
        if let Some(tx) = self.cmd_tx.as_ref() {
            if tx.try_send(command).is_ok() {
                return;
            }
        }
        warn!("Dropping outbound command; transport is not running");
    }
}

/// Drains transport notifications into the reducer for the lifetime of one
/// connection (including its reconnect cycles).
///
/// Each connect bumps the client's generation counter; a loop whose
/// generation is no longer current belongs to a superseded channel and stops
/// instead of dispatching. Without this, the old channel's trailing
/// `Disconnected` could land after the new channel's `Connected` and wedge
/// the status. Dropping the receiver also makes the zombie channel's sends
/// fail, which shuts its task down.
async fn notification_loop(
    ctx: EffectContext,
    mut notif_rx: mpsc::Receiver<ChannelNotification>,
    generation: u64,
    current: Arc<AtomicU64>,
) {
    while let Some(notification) = notif_rx.recv().await {
        if current.load(Ordering::SeqCst) != generation {
            debug!("Dropping notification from a superseded connection");
            break;
        }
        let event = match notification {
            ChannelNotification::Lifecycle(lifecycle) => SyncEvent::Lifecycle(lifecycle),
            ChannelNotification::Event(event) => SyncEvent::Server(event),
        };
        ctx.dispatch(event).await;
    }
    debug!("Notification loop finished");
}

/// Real-time messaging client for one signed-in user.
pub struct MessagingClient {
    engine: Arc<Mutex<SyncEngine>>,
    api: Arc<dyn ConversationApi>,
    credentials: Arc<dyn CredentialSource>,
    cmd_tx: Mutex<Option<mpsc::Sender<ChannelCommand>>>,
    /// Bumped on every connect and disconnect; notification loops from
    /// superseded channels compare against it and stand down.
    generation: Arc<AtomicU64>,
    events_tx: broadcast::Sender<ClientEvent>,
    config: ClientConfig,
}

impl MessagingClient {
    pub fn new(config: ClientConfig, credentials: Arc<dyn CredentialSource>) -> Self {
        let api = Arc::new(RestApi::new(
            config.api_url.clone(),
            Arc::clone(&credentials),
        ));
        Self::with_api(config, credentials, api)
    }

    /// Build a client over a custom [`ConversationApi`] implementation.
    pub fn with_api(
        config: ClientConfig,
        credentials: Arc<dyn CredentialSource>,
        api: Arc<dyn ConversationApi>,
    ) -> Self {
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            engine: Arc::new(Mutex::new(SyncEngine::default())),
            api,
            credentials,
            cmd_tx: Mutex::new(None),
            generation: Arc::new(AtomicU64::new(0)),
            events_tx,
            config,
        }
    }

    /// Start the live channel with the stored credential. Idempotent while a
    /// channel is already running; returns [`ClientError::MissingCredential`]
    /// when no usable session is stored.
    ///
    /// Connecting does not wait for the handshake. Progress arrives as
    /// [`ClientEvent::ConnectionChanged`] events, and each successful
    /// handshake triggers a directory and unread resync.
    pub fn connect(&self) -> Result<(), ClientError> {
        // The guard is held for the whole body (nothing here awaits), so two
        // racing connects cannot both pass the liveness check and spawn a
        // second physical channel.
        let mut guard = self.cmd_tx.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(tx) = guard.as_ref() {
            if !tx.is_closed() {
                debug!("Connect requested while already running; ignoring");
                return Ok(());
            }
        }

        let session = self
            .credentials
            .get()
            .filter(|s| !s.token.trim().is_empty())
            .ok_or(ClientError::MissingCredential)?;
        self.state().set_user(session.user.clone());

        let mut channel = self.config.channel.clone();
        channel.token = session.token;
        let (cmd_tx, notif_rx) =
            spawn_channel(channel).map_err(|err| ClientError::Transport(err.to_string()))?;

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *guard = Some(cmd_tx.clone());

        let ctx = EffectContext {
            engine: Arc::clone(&self.engine),
            api: Arc::clone(&self.api),
            credentials: Arc::clone(&self.credentials),
            events_tx: self.events_tx.clone(),
            cmd_tx: Some(cmd_tx),
        };
        tokio::spawn(notification_loop(
            ctx,
            notif_rx,
            generation,
            Arc::clone(&self.generation),
        ));
        Ok(())
    }

    /// Close the live channel. Local state is kept; a later [`connect`]
    /// resyncs it.
    ///
    /// [`connect`]: MessagingClient::connect
    pub fn disconnect(&self) {
        let taken = self
            .cmd_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(tx) = taken {
            // Invalidate the channel's notification loop and reflect the
            // user's intent immediately, so its trailing lifecycle events
            // cannot race a subsequent connect.
            self.generation.fetch_add(1, Ordering::SeqCst);
            let _ = tx.try_send(ChannelCommand::Shutdown);
            let effects = self
                .state()
                .apply(SyncEvent::Lifecycle(LifecycleEvent::Disconnected));
            self.finish_effects(effects);
        }
    }

    // -----------------------------------------------------------------------
    // Messaging operations
    // -----------------------------------------------------------------------

    /// Send a message optimistically. The command goes out on the wire
    /// first; only then is the provisional entry recorded and returned, so a
    /// dead transport leaves no half-sent state. Never blocks on a network
    /// round-trip.
    pub fn send_message(
        &self,
        conversation_id: ConversationId,
        receiver_id: UserId,
        body: &str,
    ) -> Result<Message, ClientError> {
        let (provisional, command) =
            self.state()
                .prepare_send(conversation_id, receiver_id, body)?;

        self.try_emit(ChannelCommand::Emit(command))?;

        let effects = self.state().commit_send(provisional.clone());
        self.finish_effects(effects);
        Ok(provisional)
    }

    /// Subscribe to a conversation's live events. The subscription is
    /// re-established automatically after every reconnect.
    pub fn join_conversation(&self, conversation_id: ConversationId) -> Result<(), ClientError> {
        let effects = self.state().join(conversation_id)?;
        self.finish_effects(effects);
        Ok(())
    }

    /// Unsubscribe from a conversation's live events. Succeeds offline and
    /// leaves in-flight sends and provisional entries alone.
    pub fn leave_conversation(&self, conversation_id: &ConversationId) {
        let effects = self.state().leave(conversation_id);
        self.finish_effects(effects);
    }

    /// Mark a message read locally and acknowledge it to the service.
    pub fn mark_as_read(&self, conversation_id: &ConversationId, message_id: &MessageId) {
        let effects = self.state().mark_read(conversation_id, message_id);
        self.finish_effects(effects);
    }

    // -----------------------------------------------------------------------
    // REST-backed operations
    // -----------------------------------------------------------------------

    /// Fetch the conversation directory and install it.
    pub async fn fetch_conversations(&self) -> Result<Vec<Conversation>, ClientError> {
        match self.api.list_conversations().await {
            Ok(conversations) => {
                let effects = self
                    .state()
                    .apply(SyncEvent::DirectoryFetched(conversations.clone()));
                self.finish_effects(effects);
                Ok(conversations)
            }
            Err(err) => Err(self.handle_api_error(err)),
        }
    }

    /// Fetch a conversation's history and merge it into the log. Returns
    /// the merged log, oldest first, with pending provisional entries still
    /// in place.
    pub async fn fetch_messages(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Vec<Message>, ClientError> {
        match self.api.fetch_messages(conversation_id).await {
            Ok(messages) => {
                let effects = self.state().apply(SyncEvent::HistoryFetched {
                    conversation_id: conversation_id.clone(),
                    messages,
                });
                self.finish_effects(effects);
                Ok(self.state().messages(conversation_id))
            }
            Err(err) => Err(self.handle_api_error(err)),
        }
    }

    /// Open (or return the existing) conversation with another user.
    pub async fn create_conversation(
        &self,
        participant_id: &UserId,
    ) -> Result<Conversation, ClientError> {
        match self.api.create_conversation(participant_id).await {
            Ok(conversation) => {
                let effects = self.state().insert_conversation(conversation.clone());
                self.finish_effects(effects);
                Ok(conversation)
            }
            Err(err) => Err(self.handle_api_error(err)),
        }
    }

    /// Delete a conversation on the server and drop it locally.
    pub async fn delete_conversation(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<(), ClientError> {
        match self.api.delete_conversation(conversation_id).await {
            Ok(()) => {
                let effects = self.state().remove_conversation(conversation_id);
                self.finish_effects(effects);
                Ok(())
            }
            Err(err) => Err(self.handle_api_error(err)),
        }
    }

    /// Clear a conversation's messages on the server and locally, keeping
    /// the conversation itself.
    pub async fn clear_conversation_messages(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<(), ClientError> {
        match self.api.clear_messages(conversation_id).await {
            Ok(()) => {
                let effects = self.state().clear_messages(conversation_id);
                self.finish_effects(effects);
                Ok(())
            }
            Err(err) => Err(self.handle_api_error(err)),
        }
    }

    // -----------------------------------------------------------------------
    // Snapshots and events
    // -----------------------------------------------------------------------

    pub fn status(&self) -> ConnectionStatus {
        self.state().status()
    }

    pub fn conversations(&self) -> Vec<Conversation> {
        self.state().conversations()
    }

    pub fn messages(&self, conversation_id: &ConversationId) -> Vec<Message> {
        self.state().messages(conversation_id)
    }

    pub fn unread_count(&self) -> u32 {
        self.state().unread_count()
    }

    /// Subscribe to change notifications. Each subscriber gets its own
    /// receiver; a lagging subscriber loses old events but can always
    /// recover from the snapshots.
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.events_tx.subscribe()
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn state(&self) -> MutexGuard<'_, SyncEngine> {
        self.engine.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn effect_context(&self) -> EffectContext {
        EffectContext {
            engine: Arc::clone(&self.engine),
            api: Arc::clone(&self.api),
            credentials: Arc::clone(&self.credentials),
            events_tx: self.events_tx.clone(),
            cmd_tx: self
                .cmd_tx
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
        }
    }

    fn try_emit(&self, command: ChannelCommand) -> Result<(), ClientError> {
        let guard = self.cmd_tx.lock().unwrap_or_else(PoisonError::into_inner);
        let tx = guard.as_ref().ok_or(ClientError::NotConnected)?;
        tx.try_send(command).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => ClientError::Busy,
            mpsc::error::TrySendError::Closed(_) => ClientError::ChannelClosed,
        })
    }

    /// Run command-path effects: local ones inline (so notifications are
    /// observable before the call returns), fetches on a background task so
    /// no user command waits on the network.
    fn finish_effects(&self, effects: Vec<Effect>) {
        let ctx = self.effect_context();
        let fetches: Vec<Effect> = effects
            .into_iter()
            .filter_map(|effect| ctx.run_local(effect))
            .collect();
        if !fetches.is_empty() {
            tokio::spawn(async move { ctx.run(fetches).await });
        }
    }

    fn handle_api_error(&self, err: ApiError) -> ClientError {
        if let ApiError::AuthRejected { reason } = &err {
            let effects = self.state().apply(SyncEvent::Lifecycle(
                LifecycleEvent::AuthRejected {
                    reason: reason.clone(),
                },
            ));
            self.finish_effects(effects);
        }
        ClientError::Api(err)
    }
}
