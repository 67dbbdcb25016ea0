//! Session and identity management.
//!
//! Covers password login, registration, guest account provisioning with a
//! 24-hour lifetime, guest-to-permanent upgrade, token persistence across
//! restarts, and the expired-guest cleanup sweep.

mod error;
pub mod guest;
mod manager;

pub use error::{SessionError, SessionResult};
pub use guest::{
    guest_access_decision, validate_upgrade, GuestCredentials, GuestDecision, UpgradeRequest,
    GUEST_EMAIL_DOMAIN, GUEST_SESSION_HOURS, MIN_PASSWORD_LEN,
};
pub use manager::{
    backend_timestamp, AvatarUpload, ProfileUpdate, RegisterRequest, SessionEvent, SessionManager,
};
