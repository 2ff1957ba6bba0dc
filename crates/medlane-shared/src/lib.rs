//! # medlane-shared
//!
//! Identifiers, wire protocol types and tuning constants shared between the
//! transport layer, the local stores and the synchronization engine.
//!
//! Everything that crosses the websocket boundary is decoded leniently here
//! (string-or-number ids, RFC-3339 or epoch-millisecond timestamps) so the
//! rest of the workspace only ever sees well-typed values.

pub mod constants;
pub mod protocol;
pub mod types;

mod error;

pub use error::ProtocolError;
pub use protocol::{ClientCommand, InboundMessage, MessageKind, RawServerFrame, ServerEvent};
pub use types::{ConnectionStatus, ConversationId, MessageId, UserId};
