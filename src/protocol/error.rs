//! Decode errors for push-channel frames.

/// Why a single inbound frame was rejected.
///
/// Every variant is recoverable: the frame is dropped and the channel keeps
/// listening.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// Blank frame (keep-alive or stray newline).
    #[error("empty frame")]
    EmptyFrame,

    /// The frame was not valid JSON or lacked a `type` tag.
    #[error("malformed frame: {0}")]
    Json(#[from] serde_json::Error),

    /// A well-formed envelope with a `type` outside the protocol.
    #[error("unknown message type: {0}")]
    UnknownType(String),

    /// The envelope was recognised but its `data` did not match.
    #[error("invalid {kind} payload: {source}")]
    InvalidPayload {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// A flush or chunk named a stream other than stdout/stderr/stdin.
    #[error("unknown stream: {0}")]
    UnknownStream(String),
}
