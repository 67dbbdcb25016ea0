//! Per-card message store with realtime sync.
//!
//! Messages live in one slot per card. Loads fill a slot, sends append
//! after the backend ack, and a background task applies realtime change
//! events. Inserts deduplicate by id, so an ack and the matching realtime
//! create never double up.

use crate::{StoreError, StoreResult};
use aliens_backend::records::{self, ListResult, MessageRecord};
use aliens_backend::{
    filter_eq, BackendError, ListQuery, PocketBaseClient, RealtimeEvent, RecordAction,
};
use aliens_types::Message;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

const MESSAGES_PER_PAGE: u32 = 100;

/// In-memory message slots, one per card. Pure data structure; the store
/// wraps it in a lock.
#[derive(Debug, Default)]
pub struct MessageCache {
    slots: HashMap<String, Vec<Message>>,
}

impl MessageCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages of a card, oldest first. Empty when the slot was never
    /// loaded.
    pub fn messages(&self, card_id: &str) -> Vec<Message> {
        self.slots.get(card_id).cloned().unwrap_or_default()
    }

    /// Whether the card's slot holds anything.
    pub fn is_loaded(&self, card_id: &str) -> bool {
        self.slots.get(card_id).is_some_and(|slot| !slot.is_empty())
    }

    /// Replace a card's slot wholesale.
    pub fn replace_slot(&mut self, card_id: &str, messages: Vec<Message>) {
        self.slots.insert(card_id.to_string(), messages);
    }

    /// Append a message to its card's slot. Returns false when a message
    /// with the same id is already present.
    pub fn insert(&mut self, message: Message) -> bool {
        let slot = self.slots.entry(message.card_id.clone()).or_default();
        if slot.iter().any(|m| m.id == message.id) {
            return false;
        }
        slot.push(message);
        true
    }

    /// Remove a message by id, wherever it lives. Returns false when no
    /// slot held it.
    pub fn remove(&mut self, message_id: &str) -> bool {
        for slot in self.slots.values_mut() {
            if let Some(pos) = slot.iter().position(|m| m.id == message_id) {
                slot.remove(pos);
                return true;
            }
        }
        false
    }

    pub fn clear(&mut self) {
        self.slots.clear();
    }
}

/// Handle to the background realtime-sync task.
pub struct RealtimeSyncHandle {
    task: tokio::task::JoinHandle<()>,
}

impl RealtimeSyncHandle {
    /// Stop applying realtime events. The feed itself is owned by the
    /// caller and keeps running.
    pub fn stop(self) {
        self.task.abort();
    }
}

/// Store for per-card chat messages.
pub struct MessageStore {
    client: Arc<PocketBaseClient>,
    cache: Arc<RwLock<MessageCache>>,
    last_error: RwLock<Option<String>>,
    loading: AtomicBool,
    /// Set once the realtime sync task has been started.
    initialized: AtomicBool,
}

impl MessageStore {
    pub fn new(client: Arc<PocketBaseClient>) -> Self {
        Self {
            client,
            cache: Arc::new(RwLock::new(MessageCache::new())),
            last_error: RwLock::new(None),
            loading: AtomicBool::new(false),
            initialized: AtomicBool::new(false),
        }
    }

    /// Whether a message load is currently in flight.
    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::Relaxed)
    }

    /// Whether the realtime sync task has been started.
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Relaxed)
    }

    /// Snapshot of a card's messages, oldest first.
    pub async fn messages_for(&self, card_id: &str) -> Vec<Message> {
        self.cache.read().await.messages(card_id)
    }

    /// The user-facing message of the last failed operation, if any.
    pub async fn last_error(&self) -> Option<String> {
        self.last_error.read().await.clone()
    }

    /// Load a card's messages. A slot that already holds messages is left
    /// alone unless `forced`; realtime keeps it current.
    pub async fn load_messages(&self, card_id: &str, forced: bool) -> StoreResult<()> {
        if !forced && self.cache.read().await.is_loaded(card_id) {
            tracing::debug!(card = card_id, "message load skipped, slot already filled");
            return Ok(());
        }

        let query = ListQuery::default()
            .per_page(MESSAGES_PER_PAGE)
            .sort("created")
            .filter(filter_eq("card", card_id))
            .expand("author");

        self.loading.store(true, Ordering::Relaxed);
        let list: Result<ListResult<MessageRecord>, _> =
            self.client.list(records::MESSAGES, &query).await;
        self.loading.store(false, Ordering::Relaxed);
        match list {
            Ok(list) => {
                let base_url = self.client.base_url().to_string();
                let messages: Vec<Message> = list
                    .items
                    .into_iter()
                    .map(|record| record.into_message(Some(&base_url)))
                    .collect();
                tracing::debug!(card = card_id, count = messages.len(), "messages loaded");
                self.cache.write().await.replace_slot(card_id, messages);
                *self.last_error.write().await = None;
                Ok(())
            }
            Err(e) => Err(self.record_failure(e.into(), "Failed to load messages").await),
        }
    }

    /// Send a message to a card's thread. The acked record is re-fetched
    /// with its author resolved before it lands in the slot.
    pub async fn send_message(&self, card_id: &str, text: &str) -> StoreResult<Message> {
        let author = self.require_user_id()?;
        let body = serde_json::json!({
            "text": text,
            "card": card_id,
            "author": author,
        });

        let created: MessageRecord = match self.client.create(records::MESSAGES, &body).await {
            Ok(record) => record,
            Err(e) => {
                return Err(self.record_failure(e.into(), "Failed to send message").await)
            }
        };

        let message = self.fetch_message(&created.id).await?;
        self.cache.write().await.insert(message.clone());
        *self.last_error.write().await = None;
        Ok(message)
    }

    /// Delete a message and drop it from its slot.
    pub async fn delete_message(&self, message_id: &str) -> StoreResult<()> {
        if let Err(e) = self.client.delete(records::MESSAGES, message_id).await {
            return Err(self.record_failure(e.into(), "Failed to delete message").await);
        }
        self.cache.write().await.remove(message_id);
        Ok(())
    }

    /// Drop every loaded slot, e.g. on logout.
    pub async fn clear(&self) {
        self.cache.write().await.clear();
    }

    /// Spawn a task applying the realtime feed's message events to the
    /// cache. Pass [`aliens_backend::RealtimeClient::subscribe`]'s receiver;
    /// the caller owns the feed connection itself.
    pub fn spawn_realtime_sync(
        &self,
        mut events: broadcast::Receiver<RealtimeEvent>,
    ) -> RealtimeSyncHandle {
        self.initialized.store(true, Ordering::Relaxed);
        let client = Arc::clone(&self.client);
        let cache = Arc::clone(&self.cache);

        let task = tokio::spawn(async move {
            loop {
                let event = match events.recv().await {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "realtime sync lagged behind the feed");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };

                let RealtimeEvent::Record(record_event) = event else {
                    continue;
                };
                if record_event.topic != records::MESSAGES {
                    continue;
                }

                let Some(id) = record_event.record.get("id").and_then(|v| v.as_str()) else {
                    tracing::warn!("record event without an id");
                    continue;
                };

                match record_event.action {
                    RecordAction::Create => {
                        // The pushed record carries no author expansion.
                        match Self::fetch_message_with(&client, id).await {
                            Ok(message) => {
                                cache.write().await.insert(message);
                            }
                            Err(e) => {
                                tracing::warn!(message = id, error = %e, "failed to resolve pushed message")
                            }
                        }
                    }
                    RecordAction::Delete => {
                        cache.write().await.remove(id);
                    }
                    RecordAction::Update => {}
                }
            }
        });

        RealtimeSyncHandle { task }
    }

    async fn fetch_message(&self, message_id: &str) -> StoreResult<Message> {
        Self::fetch_message_with(&self.client, message_id)
            .await
            .map_err(StoreError::Backend)
    }

    async fn fetch_message_with(
        client: &PocketBaseClient,
        message_id: &str,
    ) -> Result<Message, BackendError> {
        let record: MessageRecord = client
            .get_one(records::MESSAGES, message_id, Some("author"))
            .await?;
        Ok(record.into_message(Some(client.base_url())))
    }

    fn require_user_id(&self) -> StoreResult<String> {
        self.client
            .token()
            .map(|t| t.record_id)
            .ok_or(StoreError::Backend(BackendError::NotAuthenticated))
    }

    async fn record_failure(&self, error: StoreError, message: &str) -> StoreError {
        tracing::error!(error = %error, "{message}");
        *self.last_error.write().await = Some(message.to_string());
        error
    }
}
