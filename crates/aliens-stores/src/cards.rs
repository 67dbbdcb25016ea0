//! Card collection store.
//!
//! Holds the loaded card list, debounces repeated loads, and funnels every
//! mutation through a forced reload so the list always reflects the backend.

use crate::{StoreError, StoreResult};
use aliens_backend::records::{self, CardRecord, ListResult};
use aliens_backend::{BackendError, ListQuery, PocketBaseClient};
use aliens_types::Card;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};

/// Language filter value meaning "no filter".
pub const ALL_LANGUAGES: &str = "all";

const LOAD_DEBOUNCE: Duration = Duration::from_secs(2);

/// Admission control for list loads. One load runs at a time, and unforced
/// loads inside the debounce window are dropped.
#[derive(Debug)]
struct LoadGate {
    window: Duration,
    in_flight: bool,
    last_finished: Option<Instant>,
}

impl LoadGate {
    fn new(window: Duration) -> Self {
        Self {
            window,
            in_flight: false,
            last_finished: None,
        }
    }

    /// Try to admit a load at `now`. Forced loads always run; unforced
    /// loads are dropped while a load is in flight or inside the debounce
    /// window.
    fn try_begin(&mut self, forced: bool, now: Instant) -> bool {
        if !forced {
            if self.in_flight {
                return false;
            }
            if let Some(last) = self.last_finished {
                if now.duration_since(last) < self.window {
                    return false;
                }
            }
        }
        self.in_flight = true;
        true
    }

    fn finish(&mut self, now: Instant) {
        self.in_flight = false;
        self.last_finished = Some(now);
    }
}

/// Fields of a new card.
#[derive(Debug, Clone)]
pub struct NewCard {
    pub title: String,
    pub text: String,
    pub language: String,
}

/// Partial card update. `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct CardPatch {
    pub title: Option<String>,
    pub text: Option<String>,
    pub language: Option<String>,
}

/// Store for the card collection.
pub struct CardStore {
    client: Arc<PocketBaseClient>,
    cards: RwLock<Vec<Card>>,
    gate: Mutex<LoadGate>,
    last_error: RwLock<Option<String>>,
}

impl CardStore {
    pub fn new(client: Arc<PocketBaseClient>) -> Self {
        Self {
            client,
            cards: RwLock::new(Vec::new()),
            gate: Mutex::new(LoadGate::new(LOAD_DEBOUNCE)),
            last_error: RwLock::new(None),
        }
    }

    /// Snapshot of the loaded cards, newest first.
    pub async fn cards(&self) -> Vec<Card> {
        self.cards.read().await.clone()
    }

    /// The user-facing message of the last failed operation, if any.
    pub async fn last_error(&self) -> Option<String> {
        self.last_error.read().await.clone()
    }

    /// Load the card list. Unforced calls are debounced and skipped while a
    /// load is already running; mutations reload with `forced = true`.
    pub async fn load(&self, forced: bool) -> StoreResult<()> {
        {
            let mut gate = self.gate.lock().await;
            if !gate.try_begin(forced, Instant::now()) {
                tracing::debug!(forced, "card load skipped");
                return Ok(());
            }
        }

        let result = self.fetch_all().await;
        self.gate.lock().await.finish(Instant::now());

        match result {
            Ok(cards) => {
                tracing::debug!(count = cards.len(), "cards loaded");
                *self.cards.write().await = cards;
                *self.last_error.write().await = None;
                Ok(())
            }
            Err(e) => Err(self.record_failure(e, "Failed to load cards").await),
        }
    }

    async fn fetch_all(&self) -> StoreResult<Vec<Card>> {
        let query = ListQuery::default().sort("-created").expand("author");
        let list: ListResult<CardRecord> = self.client.list(records::CARDS, &query).await?;
        let base_url = self.client.base_url().to_string();
        Ok(list
            .items
            .into_iter()
            .map(|record| record.into_card(Some(&base_url)))
            .collect())
    }

    /// Create a card owned by the current user, then reload the list.
    pub async fn create_card(&self, card: &NewCard) -> StoreResult<()> {
        let author = self.require_user_id()?;
        let body = serde_json::json!({
            "title": card.title,
            "text": card.text,
            "language": card.language,
            "author": author,
        });

        let created: Result<CardRecord, _> = self.client.create(records::CARDS, &body).await;
        if let Err(e) = created {
            return Err(self.record_failure(e.into(), "Failed to create card").await);
        }
        self.load(true).await
    }

    /// Patch a card, then reload the list.
    pub async fn update_card(&self, card_id: &str, patch: &CardPatch) -> StoreResult<()> {
        let mut body = serde_json::Map::new();
        if let Some(title) = &patch.title {
            body.insert("title".into(), title.clone().into());
        }
        if let Some(text) = &patch.text {
            body.insert("text".into(), text.clone().into());
        }
        if let Some(language) = &patch.language {
            body.insert("language".into(), language.clone().into());
        }

        let updated: Result<CardRecord, _> =
            self.client.update(records::CARDS, card_id, &body).await;
        if let Err(e) = updated {
            return Err(self.record_failure(e.into(), "Failed to update card").await);
        }
        self.load(true).await
    }

    /// Delete a card, then reload the list. Whether the caller may delete is
    /// the backend's call; a rejection surfaces as an error here.
    pub async fn delete_card(&self, card_id: &str) -> StoreResult<()> {
        if let Err(e) = self.client.delete(records::CARDS, card_id).await {
            return Err(self.record_failure(e.into(), "Failed to delete card").await);
        }
        self.load(true).await
    }

    /// Find a loaded card by id.
    pub async fn card_by_id(&self, card_id: &str) -> Option<Card> {
        self.cards
            .read()
            .await
            .iter()
            .find(|card| card.id == card_id)
            .cloned()
    }

    /// Loaded cards in the given language; [`ALL_LANGUAGES`] returns all.
    pub async fn cards_by_language(&self, language: &str) -> Vec<Card> {
        let cards = self.cards.read().await;
        if language == ALL_LANGUAGES {
            return cards.clone();
        }
        cards
            .iter()
            .filter(|card| card.language == language)
            .cloned()
            .collect()
    }

    /// Distinct languages across the loaded cards, sorted.
    pub async fn available_languages(&self) -> Vec<String> {
        let mut languages: Vec<String> = self
            .cards
            .read()
            .await
            .iter()
            .map(|card| card.language.clone())
            .collect();
        languages.sort();
        languages.dedup();
        languages
    }

    fn require_user_id(&self) -> StoreResult<String> {
        self.client
            .token()
            .map(|t| t.record_id)
            .ok_or(StoreError::Backend(BackendError::NotAuthenticated))
    }

    /// Record a generic user-facing message and log the detail.
    async fn record_failure(&self, error: StoreError, message: &str) -> StoreError {
        tracing::error!(error = %error, "{message}");
        *self.last_error.write().await = Some(message.to_string());
        error
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aliens_types::Author;

    fn card(id: &str, language: &str) -> Card {
        Card {
            id: id.into(),
            title: format!("card {id}"),
            text: String::new(),
            language: language.into(),
            author: Author::Unknown,
        }
    }

    fn store_with_cards(cards: Vec<Card>) -> CardStore {
        let store = CardStore::new(Arc::new(PocketBaseClient::new("http://127.0.0.1:1")));
        *store.cards.try_write().unwrap() = cards;
        store
    }

    #[test]
    fn gate_admits_first_load() {
        let mut gate = LoadGate::new(LOAD_DEBOUNCE);
        assert!(gate.try_begin(false, Instant::now()));
    }

    #[test]
    fn gate_drops_unforced_load_while_in_flight() {
        let mut gate = LoadGate::new(LOAD_DEBOUNCE);
        let now = Instant::now();
        assert!(gate.try_begin(false, now));
        assert!(!gate.try_begin(false, now));
    }

    #[test]
    fn gate_admits_forced_reload_while_unforced_load_in_flight() {
        // A mutation's forced reload must run even when a list load is
        // already in flight, or the cache would stay stale.
        let mut gate = LoadGate::new(LOAD_DEBOUNCE);
        let now = Instant::now();
        assert!(gate.try_begin(false, now));
        assert!(gate.try_begin(true, now));
    }

    #[test]
    fn gate_debounces_unforced_loads() {
        let mut gate = LoadGate::new(LOAD_DEBOUNCE);
        let start = Instant::now();
        assert!(gate.try_begin(false, start));
        gate.finish(start);

        assert!(!gate.try_begin(false, start + Duration::from_millis(500)));
        assert!(gate.try_begin(false, start + Duration::from_secs(3)));
    }

    #[test]
    fn gate_forced_load_bypasses_debounce() {
        let mut gate = LoadGate::new(LOAD_DEBOUNCE);
        let start = Instant::now();
        assert!(gate.try_begin(false, start));
        gate.finish(start);

        assert!(gate.try_begin(true, start + Duration::from_millis(100)));
    }

    #[tokio::test]
    async fn load_requires_a_token() {
        let store = CardStore::new(Arc::new(PocketBaseClient::new("http://127.0.0.1:1")));
        let result = store.load(false).await;
        assert!(matches!(
            result,
            Err(StoreError::Backend(BackendError::NotAuthenticated))
        ));
        assert_eq!(
            store.last_error().await.as_deref(),
            Some("Failed to load cards")
        );
    }

    #[tokio::test]
    async fn create_requires_a_token_before_any_network_call() {
        let store = CardStore::new(Arc::new(PocketBaseClient::new("http://127.0.0.1:1")));
        let result = store
            .create_card(&NewCard {
                title: "t".into(),
                text: "x".into(),
                language: "English".into(),
            })
            .await;
        assert!(matches!(
            result,
            Err(StoreError::Backend(BackendError::NotAuthenticated))
        ));
    }

    #[tokio::test]
    async fn card_by_id_finds_loaded_cards() {
        let store = store_with_cards(vec![card("c1", "English"), card("c2", "German")]);
        assert!(store.card_by_id("c2").await.is_some());
        assert!(store.card_by_id("missing").await.is_none());
    }

    #[tokio::test]
    async fn cards_by_language_filters_with_all_sentinel() {
        let store = store_with_cards(vec![
            card("c1", "English"),
            card("c2", "German"),
            card("c3", "English"),
        ]);

        assert_eq!(store.cards_by_language("English").await.len(), 2);
        assert_eq!(store.cards_by_language("French").await.len(), 0);
        assert_eq!(store.cards_by_language(ALL_LANGUAGES).await.len(), 3);
    }

    #[tokio::test]
    async fn available_languages_are_distinct_and_sorted() {
        let store = store_with_cards(vec![
            card("c1", "German"),
            card("c2", "English"),
            card("c3", "German"),
        ]);

        assert_eq!(store.available_languages().await, vec!["English", "German"]);
    }
}
