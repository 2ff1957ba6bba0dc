// Client transport layer: one websocket task driven through typed channels.

pub mod channel;
pub mod config;
pub mod reconnect;

pub use channel::{spawn_channel, ChannelCommand, ChannelNotification, LifecycleEvent};
pub use config::{ChannelConfig, ConfigError};
pub use reconnect::{ConnectionFsm, FsmInput, ReconnectPolicy};
