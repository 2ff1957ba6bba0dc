use thiserror::Error;

/// Errors raised while decoding or normalizing wire frames.
///
/// A `ProtocolError` means one inbound frame is unusable; callers log it and
/// drop the frame. It is never allowed to take down the event loop.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// A required field was still absent after best-effort repair.
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    /// The frame was structurally unusable (unknown event, wrong shape).
    #[error("malformed frame: {0}")]
    Malformed(String),

    /// The frame was not valid JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
