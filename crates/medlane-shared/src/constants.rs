use std::time::Duration;

/// Protocol version string sent during the websocket handshake.
pub const PROTOCOL_VERSION: &str = "medlane/1";

/// Prefix marking a locally-minted provisional message id.
///
/// A message whose id carries this prefix has been shown to its author but not
/// yet confirmed by the server.
pub const PROVISIONAL_ID_PREFIX: &str = "local-";

/// Tolerance window for pairing a provisional message with its server echo.
///
/// The provisional timestamp is client-clock time and the confirmed timestamp
/// is server-clock time; they diverge by clock skew plus round-trip latency,
/// so the match is a window rather than an exact comparison.
pub const RECONCILE_WINDOW: Duration = Duration::from_secs(30);

/// Maximum reconnect attempts after a transport drop before giving up.
pub const RECONNECT_MAX_ATTEMPTS: u32 = 5;

/// Fixed delay between reconnect attempts (no exponential backoff).
pub const RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// Substring of an auth-rejection reason that identifies an expired
/// credential, matched case-insensitively.
pub const EXPIRED_CREDENTIAL_MARKER: &str = "expired";

/// Capacity of the command channel into the transport task.
pub const COMMAND_CHANNEL_CAPACITY: usize = 256;

/// Capacity of the notification channel out of the transport task.
pub const NOTIFICATION_CHANNEL_CAPACITY: usize = 256;

/// Capacity of the client event broadcast channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 128;
