//! Session error types.

use aliens_backend::BackendError;
use thiserror::Error;

/// Error type for session and profile operations.
#[derive(Error, Debug)]
pub enum SessionError {
    /// Credential exchange failed. The message is the user-facing one; the
    /// backend detail is logged, and included only when configured.
    #[error("{0}")]
    LoginFailed(String),

    /// Account creation failed.
    #[error("{0}")]
    RegistrationFailed(String),

    /// Guest provisioning failed.
    #[error("Could not create a guest account")]
    GuestProvisioningFailed,

    /// A required field is empty.
    #[error("All fields are required")]
    MissingFields,

    /// Password and confirmation differ.
    #[error("Passwords do not match")]
    PasswordMismatch,

    /// Password shorter than the minimum.
    #[error("Password must be at least {min} characters", min = crate::guest::MIN_PASSWORD_LEN)]
    PasswordTooShort,

    /// Upgrade attempted by a non-guest identity.
    #[error("Only guest accounts can be upgraded")]
    NotAGuest,

    /// Upgrade attempted on an expired guest.
    #[error("Guest session has expired")]
    GuestExpired,

    /// No active session.
    #[error("Sign-in required")]
    NotAuthenticated,

    /// Token cache IO failure.
    #[error("Session cache error: {0}")]
    Cache(#[from] std::io::Error),

    /// Token cache decode failure.
    #[error("Session cache error: {0}")]
    CacheDecode(#[from] serde_json::Error),

    /// Backend failure.
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Result type alias using SessionError.
pub type SessionResult<T> = Result<T, SessionError>;
