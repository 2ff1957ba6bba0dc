//! Transport channel configuration.
//!
//! All settings have sensible defaults so a client can connect with nothing
//! but a credential token.

use thiserror::Error;
use url::Url;

use medlane_shared::constants::{
    COMMAND_CHANNEL_CAPACITY, NOTIFICATION_CHANNEL_CAPACITY, PROTOCOL_VERSION,
};

use crate::reconnect::ReconnectPolicy;

/// Errors raised while validating a channel configuration.  These fail fast,
/// before any connection attempt is made.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The credential token is empty or whitespace.  Connecting without a
    /// credential is a configuration error, not an auth failure.
    #[error("credential token is empty")]
    MissingToken,

    /// The websocket URL did not parse.
    #[error("invalid websocket url: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

/// Transport channel configuration.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Websocket endpoint of the messaging service.
    /// Env: `MEDLANE_WS_URL`
    /// Default: `wss://api.medlane.health/ws`
    pub ws_url: String,

    /// Bearer credential for the session, supplied by the credential source.
    /// Travels as a `token` query parameter on the connect URL.
    /// Default: empty (must be set before spawning).
    pub token: String,

    /// Reconnect bounds after a transport drop.
    /// Env: `MEDLANE_RECONNECT_ATTEMPTS`, `MEDLANE_RECONNECT_DELAY_MS`
    /// Default: 5 attempts, 3000 ms fixed delay.
    pub reconnect: ReconnectPolicy,

    /// Capacity of the command channel into the transport task.
    pub command_capacity: usize,

    /// Capacity of the notification channel out of the transport task.
    pub notification_capacity: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            ws_url: "wss://api.medlane.health/ws".to_string(),
            token: String::new(),
            reconnect: ReconnectPolicy::default(),
            command_capacity: COMMAND_CHANNEL_CAPACITY,
            notification_capacity: NOTIFICATION_CHANNEL_CAPACITY,
        }
    }
}

impl ChannelConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults.  The token is not read from the environment; it comes from
    /// the session credential source.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("MEDLANE_WS_URL") {
            config.ws_url = url;
        }

        if let Ok(val) = std::env::var("MEDLANE_RECONNECT_ATTEMPTS") {
            if let Ok(n) = val.parse::<u32>() {
                config.reconnect.max_attempts = n;
            } else {
                tracing::warn!(value = %val, "Invalid MEDLANE_RECONNECT_ATTEMPTS, using default");
            }
        }

        if let Ok(val) = std::env::var("MEDLANE_RECONNECT_DELAY_MS") {
            if let Ok(ms) = val.parse::<u64>() {
                config.reconnect.delay = std::time::Duration::from_millis(ms);
            } else {
                tracing::warn!(value = %val, "Invalid MEDLANE_RECONNECT_DELAY_MS, using default");
            }
        }

        config
    }

    /// Check the configuration before any connection attempt.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.token.trim().is_empty() {
            return Err(ConfigError::MissingToken);
        }
        Ok(())
    }

    /// Build the connect URL with the credential and protocol version
    /// attached as query parameters.
    pub fn connect_url(&self) -> Result<Url, ConfigError> {
        let mut url = Url::parse(&self.ws_url)?;
        url.query_pairs_mut()
            .append_pair("token", &self.token)
            .append_pair("version", PROTOCOL_VERSION);
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ChannelConfig::default();
        assert_eq!(config.reconnect.max_attempts, 5);
        assert_eq!(config.command_capacity, COMMAND_CHANNEL_CAPACITY);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_blank_token() {
        let config = ChannelConfig {
            token: "   ".to_string(),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::MissingToken)));
    }

    #[test]
    fn test_connect_url_carries_token() {
        let config = ChannelConfig {
            ws_url: "wss://example.com/ws".to_string(),
            token: "t-123".to_string(),
            ..Default::default()
        };

        let url = config.connect_url().unwrap();
        assert!(url.query_pairs().any(|(k, v)| k == "token" && v == "t-123"));
        assert!(url.query_pairs().any(|(k, _)| k == "version"));
    }

    #[test]
    fn test_connect_url_rejects_garbage() {
        let config = ChannelConfig {
            ws_url: "not a url".to_string(),
            token: "t".to_string(),
            ..Default::default()
        };
        assert!(config.connect_url().is_err());
    }
}
