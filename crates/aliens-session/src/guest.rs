//! Guest account provisioning helpers and upgrade validation.
//!
//! Guests are real backend accounts with synthesized credentials, a
//! reserved email domain, and a 24-hour expiry stamped at creation time.

use crate::{SessionError, SessionResult};
use aliens_types::Profile;
use chrono::{DateTime, Duration, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;

/// Reserved email domain for guest accounts; the cleanup sweep and backend
/// rules key off it.
pub const GUEST_EMAIL_DOMAIN: &str = "temp.ttl.local";

/// Guest session lifetime in hours.
pub const GUEST_SESSION_HOURS: i64 = 24;

/// Generated guest password length.
pub const GUEST_PASSWORD_LEN: usize = 12;

/// Minimum password length accepted anywhere.
pub const MIN_PASSWORD_LEN: usize = 6;

const ADJECTIVES: &[&str] = &[
    "Cheerful", "Clever", "Friendly", "Creative", "Active", "Kind", "Curious", "Unique",
];

const NOUNS: &[&str] = &[
    "Guest", "Wanderer", "Traveler", "Explorer", "Voyager", "Newcomer", "Friend", "Companion",
];

/// Freshly generated guest credentials.
#[derive(Debug, Clone)]
pub struct GuestCredentials {
    pub name: String,
    pub email: String,
    pub password: String,
    pub expires_at: DateTime<Utc>,
}

impl GuestCredentials {
    /// Generate a new set of guest credentials expiring
    /// [`GUEST_SESSION_HOURS`] from now.
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();

        let adjective = ADJECTIVES[rng.gen_range(0..ADJECTIVES.len())];
        let noun = NOUNS[rng.gen_range(0..NOUNS.len())];
        let number = rng.gen_range(1..=999);
        let name = format!("{adjective}{noun}{number}");

        let password: String = (&mut rng)
            .sample_iter(&Alphanumeric)
            .take(GUEST_PASSWORD_LEN)
            .map(char::from)
            .collect();

        let suffix: String = (&mut rng)
            .sample_iter(&Alphanumeric)
            .take(6)
            .map(char::from)
            .collect::<String>()
            .to_lowercase();
        let email = format!(
            "guest_{}_{}@{}",
            Utc::now().timestamp_millis(),
            suffix,
            GUEST_EMAIL_DOMAIN
        );

        Self {
            name,
            email,
            password,
            expires_at: Utc::now() + Duration::hours(GUEST_SESSION_HOURS),
        }
    }
}

/// Guest-to-permanent-account upgrade request.
#[derive(Debug, Clone)]
pub struct UpgradeRequest {
    pub email: String,
    pub password: String,
    pub password_confirm: String,
    pub name: String,
}

/// Validate an upgrade request against the acting identity. No state
/// changes and no network traffic happen here; a failure leaves everything
/// untouched.
pub fn validate_upgrade(
    current: Option<&Profile>,
    request: &UpgradeRequest,
    now: DateTime<Utc>,
) -> SessionResult<()> {
    let profile = current.ok_or(SessionError::NotAuthenticated)?;

    if !profile.is_guest() {
        return Err(SessionError::NotAGuest);
    }
    if profile.is_expired(now) {
        return Err(SessionError::GuestExpired);
    }
    if request.email.trim().is_empty()
        || request.name.trim().is_empty()
        || request.password.is_empty()
        || request.password_confirm.is_empty()
    {
        return Err(SessionError::MissingFields);
    }
    if request.password != request.password_confirm {
        return Err(SessionError::PasswordMismatch);
    }
    if request.password.len() < MIN_PASSWORD_LEN {
        return Err(SessionError::PasswordTooShort);
    }

    Ok(())
}

/// What `ensure_guest_access` should do for a given current identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuestDecision {
    /// Keep the current session.
    UseCurrent,
    /// Log out the expired guest, then provision a fresh one.
    ReplaceExpired,
    /// No session at all; provision a guest.
    Provision,
}

/// Decide how `ensure_guest_access` should treat the current identity.
pub fn guest_access_decision(current: Option<&Profile>, now: DateTime<Utc>) -> GuestDecision {
    match current {
        Some(profile) if profile.is_guest() && profile.is_expired(now) => {
            GuestDecision::ReplaceExpired
        }
        Some(_) => GuestDecision::UseCurrent,
        None => GuestDecision::Provision,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aliens_types::Role;

    fn profile(role: Role, expires_at: Option<DateTime<Utc>>) -> Profile {
        Profile {
            id: "p1".into(),
            name: "Visitor".into(),
            email: "visitor@temp.ttl.local".into(),
            bio: None,
            avatar: None,
            avatar_url: None,
            native_languages: vec![],
            learning_languages: vec![],
            age: None,
            country: String::new(),
            city: None,
            interests: vec![],
            is_registered: false,
            role,
            expires_at,
        }
    }

    fn valid_request() -> UpgradeRequest {
        UpgradeRequest {
            email: "real@example.com".into(),
            password: "hunter22".into(),
            password_confirm: "hunter22".into(),
            name: "Real Name".into(),
        }
    }

    #[test]
    fn generated_credentials_have_expected_shape() {
        let creds = GuestCredentials::generate();

        assert_eq!(creds.password.len(), GUEST_PASSWORD_LEN);
        assert!(creds.password.chars().all(|c| c.is_ascii_alphanumeric()));

        assert!(creds.email.starts_with("guest_"));
        assert!(creds.email.ends_with(&format!("@{GUEST_EMAIL_DOMAIN}")));

        assert!(!creds.name.is_empty());
        let trailing_number: String = creds
            .name
            .chars()
            .rev()
            .take_while(|c| c.is_ascii_digit())
            .collect();
        assert!(!trailing_number.is_empty());
    }

    #[test]
    fn generated_expiry_is_24_hours_out() {
        let before = Utc::now() + Duration::hours(GUEST_SESSION_HOURS) - Duration::minutes(1);
        let creds = GuestCredentials::generate();
        let after = Utc::now() + Duration::hours(GUEST_SESSION_HOURS) + Duration::minutes(1);

        assert!(creds.expires_at > before);
        assert!(creds.expires_at < after);
    }

    #[test]
    fn generated_emails_are_unique() {
        let a = GuestCredentials::generate();
        let b = GuestCredentials::generate();
        assert_ne!(a.email, b.email);
    }

    #[test]
    fn upgrade_requires_a_session() {
        let err = validate_upgrade(None, &valid_request(), Utc::now()).unwrap_err();
        assert!(matches!(err, SessionError::NotAuthenticated));
    }

    #[test]
    fn upgrade_rejects_registered_users() {
        let p = profile(Role::User, None);
        let err = validate_upgrade(Some(&p), &valid_request(), Utc::now()).unwrap_err();
        assert!(matches!(err, SessionError::NotAGuest));
    }

    #[test]
    fn upgrade_rejects_expired_guests() {
        let now = Utc::now();
        let p = profile(Role::Guest, Some(now - Duration::hours(1)));
        let err = validate_upgrade(Some(&p), &valid_request(), now).unwrap_err();
        assert!(matches!(err, SessionError::GuestExpired));
    }

    #[test]
    fn upgrade_rejects_mismatched_passwords() {
        let now = Utc::now();
        let p = profile(Role::Guest, Some(now + Duration::hours(1)));
        let mut request = valid_request();
        request.password_confirm = "different".into();

        let err = validate_upgrade(Some(&p), &request, now).unwrap_err();
        assert!(matches!(err, SessionError::PasswordMismatch));
    }

    #[test]
    fn upgrade_rejects_short_passwords() {
        let now = Utc::now();
        let p = profile(Role::Guest, Some(now + Duration::hours(1)));
        let mut request = valid_request();
        request.password = "short".into();
        request.password_confirm = "short".into();

        let err = validate_upgrade(Some(&p), &request, now).unwrap_err();
        assert!(matches!(err, SessionError::PasswordTooShort));
    }

    #[test]
    fn upgrade_rejects_empty_fields() {
        let now = Utc::now();
        let p = profile(Role::Guest, Some(now + Duration::hours(1)));
        let mut request = valid_request();
        request.name = "  ".into();

        let err = validate_upgrade(Some(&p), &request, now).unwrap_err();
        assert!(matches!(err, SessionError::MissingFields));
    }

    #[test]
    fn upgrade_accepts_a_live_guest() {
        let now = Utc::now();
        let p = profile(Role::Guest, Some(now + Duration::hours(1)));
        assert!(validate_upgrade(Some(&p), &valid_request(), now).is_ok());
    }

    #[test]
    fn guest_access_keeps_live_sessions() {
        let now = Utc::now();
        let live_guest = profile(Role::Guest, Some(now + Duration::hours(1)));
        let user = profile(Role::User, None);

        assert_eq!(
            guest_access_decision(Some(&live_guest), now),
            GuestDecision::UseCurrent
        );
        assert_eq!(
            guest_access_decision(Some(&user), now),
            GuestDecision::UseCurrent
        );
    }

    #[test]
    fn guest_access_replaces_expired_guests() {
        // Guest created at T0 with a 24h expiry, observed at T0+25h.
        let now = Utc::now();
        let stale = profile(Role::Guest, Some(now - Duration::hours(1)));

        assert_eq!(
            guest_access_decision(Some(&stale), now),
            GuestDecision::ReplaceExpired
        );
    }

    #[test]
    fn guest_access_provisions_when_anonymous() {
        assert_eq!(
            guest_access_decision(None, Utc::now()),
            GuestDecision::Provision
        );
    }
}
