//! Chat message type.

use crate::Author;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A chat message. Always belongs to exactly one card.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub text: String,
    pub card_id: String,
    pub author: Author,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

impl Message {
    /// Whether the message was written by the profile with the given id.
    pub fn is_authored_by(&self, profile_id: &str) -> bool {
        self.author.is(profile_id)
    }
}
