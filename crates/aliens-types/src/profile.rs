//! User identity types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Account role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Registered, permanent account.
    #[default]
    User,
    /// Auto-provisioned, time-limited account.
    Guest,
}

/// A user profile as the application sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub bio: Option<String>,
    /// Stored avatar filename, if any.
    #[serde(default)]
    pub avatar: Option<String>,
    /// Resolved, fetchable avatar URL.
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub native_languages: Vec<String>,
    #[serde(default)]
    pub learning_languages: Vec<String>,
    #[serde(default)]
    pub age: Option<u32>,
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub interests: Vec<String>,
    #[serde(default)]
    pub is_registered: bool,
    #[serde(default)]
    pub role: Role,
    /// Guest accounts only: the moment the account stops being valid.
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Profile {
    /// Whether this profile is a guest account.
    pub fn is_guest(&self) -> bool {
        self.role == Role::Guest
    }

    /// Whether the account has expired as of `now`.
    ///
    /// Profiles without an expiry never expire.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at < now,
            None => false,
        }
    }
}

/// The author of a card or message.
///
/// The backend resolves the `author` relation only when asked to (and only
/// when the record still exists), so an author can be genuinely unknown.
/// Callers must handle that case explicitly instead of receiving a
/// placeholder profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Author {
    Known(Profile),
    Unknown,
}

/// Fallback label shown for authors the backend could not resolve.
pub const UNKNOWN_AUTHOR_NAME: &str = "Unknown author";

impl Author {
    /// Author's id, when known.
    pub fn id(&self) -> Option<&str> {
        match self {
            Author::Known(profile) => Some(&profile.id),
            Author::Unknown => None,
        }
    }

    /// Display name, with a fallback label for unknown authors.
    pub fn display_name(&self) -> &str {
        match self {
            Author::Known(profile) => &profile.name,
            Author::Unknown => UNKNOWN_AUTHOR_NAME,
        }
    }

    /// Whether this author is the profile with the given id.
    pub fn is(&self, profile_id: &str) -> bool {
        self.id() == Some(profile_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn guest(expires_at: Option<DateTime<Utc>>) -> Profile {
        Profile {
            id: "g1".into(),
            name: "CuriousVisitor42".into(),
            email: "guest_1_abc@temp.ttl.local".into(),
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
            role: Role::Guest,
            expires_at,
        }
    }

    #[test]
    fn expiry_requires_a_set_timestamp() {
        let now = Utc::now();
        assert!(!guest(None).is_expired(now));
    }

    #[test]
    fn expiry_is_strictly_in_the_past() {
        let now = Utc::now();
        assert!(guest(Some(now - Duration::seconds(1))).is_expired(now));
        assert!(!guest(Some(now + Duration::hours(24))).is_expired(now));
    }

    #[test]
    fn role_serde_is_lowercase() {
        assert_eq!(serde_json::to_string(&Role::Guest).unwrap(), "\"guest\"");
        assert_eq!(serde_json::to_string(&Role::User).unwrap(), "\"user\"");
        let role: Role = serde_json::from_str("\"guest\"").unwrap();
        assert_eq!(role, Role::Guest);
    }

    #[test]
    fn unknown_author_has_fallback_name_and_no_id() {
        let author = Author::Unknown;
        assert_eq!(author.display_name(), UNKNOWN_AUTHOR_NAME);
        assert!(author.id().is_none());
        assert!(!author.is("anyone"));
    }

    #[test]
    fn known_author_exposes_profile_fields() {
        let author = Author::Known(guest(None));
        assert_eq!(author.display_name(), "CuriousVisitor42");
        assert_eq!(author.id(), Some("g1"));
        assert!(author.is("g1"));
        assert!(!author.is("g2"));
    }
}
