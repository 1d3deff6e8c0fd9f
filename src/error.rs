//! Error types for chatrelay.

use thiserror::Error;

/// Common error type for chatrelay.
#[derive(Error, Debug)]
pub enum RelayError {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding error.
    ///
    /// Raised for malformed client frames and for corrupt history snapshots.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Image payload was not valid base64.
    #[error("decode error: {0}")]
    Decode(#[from] base64::DecodeError),

    /// Client violated the wire protocol (e.g. blank identity).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// WebSocket send/receive failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl From<axum::Error> for RelayError {
    fn from(e: axum::Error) -> Self {
        RelayError::Transport(e.to_string())
    }
}

/// Result type alias for chatrelay operations.
pub type Result<T> = std::result::Result<T, RelayError>;
