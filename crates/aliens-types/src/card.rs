//! Topic card type.

use crate::Author;
use serde::{Deserialize, Serialize};

/// A conversation-starter card, tagged with a single language.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Card {
    pub id: String,
    pub title: String,
    pub text: String,
    pub language: String,
    pub author: Author,
}

impl Card {
    /// Whether the card is owned by the profile with the given id.
    pub fn is_owned_by(&self, profile_id: &str) -> bool {
        self.author.is(profile_id)
    }
}
