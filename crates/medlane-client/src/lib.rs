//! Real-time messaging client for the Medlane care platform.
//!
//! [`client::MessagingClient`] is the surface an application embeds: connect
//! with a stored credential, send and receive messages over the live
//! channel, manage conversations over REST, and subscribe to change
//! notifications. The synchronization rules (optimistic sends, echo
//! reconciliation, unread bookkeeping, resync after reconnect) live in
//! [`engine::SyncEngine`]; transport and wire types come from the
//! `medlane-net` and `medlane-shared` crates.

pub mod api;
pub mod client;
pub mod engine;
pub mod error;
pub mod events;
pub mod session;

use tracing_subscriber::{fmt, EnvFilter};

pub use api::{ApiError, ConversationApi, RestApi};
pub use client::{ClientConfig, MessagingClient};
pub use engine::{Effect, SyncEngine, SyncEvent};
pub use error::ClientError;
pub use events::ClientEvent;
pub use session::{CredentialSource, MemorySessionStore, Session};

/// Install the default log subscriber, for embedding applications that do
/// not bring their own.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("medlane_client=debug,medlane_net=debug,medlane_store=info,warn")
    });

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}
