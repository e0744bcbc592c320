//! Errors for the push and request/response channels.

/// Transport failure. None of these are fatal to the engine: the push channel
/// reconnects on its own and a failed request is retried on the next
/// connection.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("push channel is not connected")]
    NotConnected,

    #[error("push channel is closed")]
    Closed,

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected status {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}
