//! Store error types.

use aliens_backend::BackendError;
use aliens_session::SessionError;
use thiserror::Error;

/// Error type for store operations.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Result type alias using StoreError.
pub type StoreResult<T> = Result<T, StoreError>;
