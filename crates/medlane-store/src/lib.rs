//! # medlane-store
//!
//! In-memory state for the messaging client: the conversation directory and
//! the per-conversation message logs.
//!
//! Nothing here persists across process restarts by design; the server is the
//! source of truth and the sync engine repopulates these stores on every
//! (re)connect.  The stores are plain data structures with no interior
//! locking; the engine owns them and serializes access.

pub mod directory;
pub mod messages;
pub mod models;

pub use directory::ConversationDirectory;
pub use messages::MessageStore;
pub use models::{Conversation, Message, UserSummary};
