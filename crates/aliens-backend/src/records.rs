//! Wire records as the backend serves them, and their conversions into
//! domain types.
//!
//! The backend resolves the `author` relation only when the request carries
//! `expand=author`; the expansion is also absent when the referenced user
//! has been deleted (expired-guest reaping). A missing expansion converts to
//! [`Author::Unknown`] so callers have to deal with it.

use aliens_types::{Author, Card, Message, Profile, Role};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Users collection name.
pub const USERS: &str = "users";
/// Cards collection name.
pub const CARDS: &str = "cards";
/// Messages collection name.
pub const MESSAGES: &str = "messages";

/// Paged list envelope returned by collection list endpoints.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListResult<T> {
    pub page: u32,
    pub per_page: u32,
    pub total_items: u64,
    pub total_pages: u32,
    pub items: Vec<T>,
}

/// A record in the `users` collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub id: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub name: String,
    /// Stored avatar filename.
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
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
    #[serde(default)]
    pub expires_at: Option<String>,
    #[serde(default)]
    pub created: String,
    #[serde(default)]
    pub updated: String,
}

/// Resolved relations on a card or message record.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecordExpand {
    #[serde(default)]
    pub author: Option<UserRecord>,
}

/// A record in the `cards` collection. The collection carries no `updated`
/// field.
#[derive(Debug, Clone, Deserialize)]
pub struct CardRecord {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub language: String,
    /// Owning user id (the unexpanded relation value).
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub created: String,
    #[serde(default)]
    pub expand: Option<RecordExpand>,
}

/// A record in the `messages` collection.
#[derive(Debug, Clone, Deserialize)]
pub struct MessageRecord {
    pub id: String,
    #[serde(default)]
    pub text: String,
    /// Owning card id.
    #[serde(default)]
    pub card: String,
    /// Owning user id (the unexpanded relation value).
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub created: String,
    #[serde(default)]
    pub updated: String,
    #[serde(default)]
    pub expand: Option<RecordExpand>,
}

/// Parse a backend datetime. The backend serves `2024-01-02 15:04:05.000Z`
/// (space separator) while RFC 3339 uses `T`; both are accepted.
pub fn parse_datetime(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let normalized = trimmed.replacen(' ', "T", 1);
    DateTime::parse_from_rfc3339(&normalized)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

impl UserRecord {
    /// Convert into a domain profile.
    ///
    /// `base_url` is the backend base URL used to resolve the avatar file
    /// reference into a fetchable URL; pass `None` to skip resolution.
    pub fn into_profile(self, base_url: Option<&str>) -> Profile {
        let avatar_url = match (&self.avatar, base_url) {
            (Some(filename), Some(base)) if !filename.is_empty() => Some(format!(
                "{}/api/files/{}/{}/{}",
                base.trim_end_matches('/'),
                USERS,
                self.id,
                filename
            )),
            _ => None,
        };

        Profile {
            id: self.id,
            name: self.name,
            email: self.email,
            bio: self.bio,
            avatar: self.avatar,
            avatar_url,
            native_languages: self.native_languages,
            learning_languages: self.learning_languages,
            age: self.age,
            country: self.country,
            city: self.city,
            interests: self.interests,
            is_registered: self.is_registered,
            role: self.role,
            expires_at: self.expires_at.as_deref().and_then(parse_datetime),
        }
    }
}

fn author_from_expand(expand: Option<RecordExpand>, base_url: Option<&str>) -> Author {
    match expand.and_then(|e| e.author) {
        Some(user) => Author::Known(user.into_profile(base_url)),
        None => Author::Unknown,
    }
}

impl CardRecord {
    /// Convert into a domain card.
    pub fn into_card(self, base_url: Option<&str>) -> Card {
        Card {
            id: self.id,
            title: self.title,
            text: self.text,
            language: self.language,
            author: author_from_expand(self.expand, base_url),
        }
    }
}

impl MessageRecord {
    /// Convert into a domain message.
    pub fn into_message(self, base_url: Option<&str>) -> Message {
        Message {
            id: self.id,
            text: self.text,
            card_id: self.card,
            author: author_from_expand(self.expand, base_url),
            created: parse_datetime(&self.created).unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
            updated: parse_datetime(&self.updated).unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
        }
    }
}
