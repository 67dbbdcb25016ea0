//! Backend client error types.

use thiserror::Error;

/// Error type for backend operations.
#[derive(Error, Debug)]
pub enum BackendError {
    /// Transport-level failure (DNS, connect, TLS, body read).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success response from the backend.
    #[error("Backend rejected the request ({status}): {message}")]
    Status { status: u16, message: String },

    /// Payload decode failure.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// An operation that needs a session was called without one.
    #[error("Not authenticated")]
    NotAuthenticated,

    /// Realtime feed failure.
    #[error("Realtime error: {0}")]
    Realtime(String),
}

/// Result type alias using BackendError.
pub type BackendResult<T> = Result<T, BackendError>;
