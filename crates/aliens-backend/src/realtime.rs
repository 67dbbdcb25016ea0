//! Realtime change-feed client.
//!
//! The backend pushes `{action, record}` change events per collection over a
//! server-sent-events stream: the first event (`PB_CONNECT`) carries a client
//! id, which the client echoes back in a subscription request naming the
//! collections it wants. The connection re-establishes itself with
//! exponential backoff when it drops.

use crate::{BackendError, BackendResult};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{broadcast, Notify, RwLock};
use tokio::time::Duration;
use tracing::{debug, error, info, warn};

/// Realtime client configuration.
#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    /// Base reconnect delay in seconds.
    pub reconnect_base_delay_secs: u64,
    /// Maximum reconnect delay in seconds.
    pub reconnect_max_delay_secs: u64,
    /// Maximum reconnect attempts.
    pub max_reconnect_attempts: u32,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            reconnect_base_delay_secs: 2,
            reconnect_max_delay_secs: 30,
            max_reconnect_attempts: 10,
        }
    }
}

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Subscribing,
    Connected,
}

/// Change action carried by a record event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordAction {
    Create,
    Update,
    Delete,
}

/// A record change pushed by the backend. The record payload carries no
/// relation expansion; consumers re-fetch when they need the author.
#[derive(Debug, Clone)]
pub struct RecordEvent {
    /// Collection (subscription topic) the change belongs to.
    pub topic: String,
    pub action: RecordAction,
    pub record: serde_json::Value,
}

/// Events emitted by the realtime client.
#[derive(Debug, Clone)]
pub enum RealtimeEvent {
    /// Subscription established.
    Connected,
    /// Feed dropped (reconnect may follow).
    Disconnected(Option<String>),
    /// A record change on a subscribed collection.
    Record(RecordEvent),
    /// Error occurred.
    Error(String),
}

#[derive(Debug, Deserialize)]
struct ConnectPayload {
    #[serde(rename = "clientId")]
    client_id: String,
}

#[derive(Debug, Deserialize)]
struct RecordPayload {
    action: RecordAction,
    record: serde_json::Value,
}

/// One parsed server-sent event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SseMessage {
    pub id: Option<String>,
    pub event: Option<String>,
    pub data: String,
}

/// Incremental UTF-8 decoder for the raw byte stream.
///
/// Network chunks can split a multi-byte character; an incomplete trailing
/// sequence is held back until the next chunk instead of being mangled into
/// replacement characters. Genuinely invalid bytes decode lossily.
#[derive(Debug, Default)]
struct Utf8StreamDecoder {
    pending: Vec<u8>,
}

impl Utf8StreamDecoder {
    /// Consume a chunk and return everything decodable so far.
    fn decode(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);
        let mut out = String::new();

        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    return out;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(std::str::from_utf8(&self.pending[..valid]).unwrap_or(""));
                    match e.error_len() {
                        // Invalid sequence: replace it and keep going.
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + len);
                        }
                        // Incomplete trailing character: wait for more bytes.
                        None => {
                            self.pending.drain(..valid);
                            return out;
                        }
                    }
                }
            }
        }
    }
}

/// Incremental parser for an SSE byte stream.
///
/// Feed decoded chunks in any split; complete events (terminated by a blank
/// line) come back out.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: String,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume a chunk and return every event completed by it.
    pub fn feed(&mut self, chunk: &str) -> Vec<SseMessage> {
        self.buffer.push_str(chunk);
        let mut messages = Vec::new();

        while let Some(pos) = self.buffer.find("\n\n") {
            let block: String = self.buffer.drain(..pos + 2).collect();
            if let Some(message) = Self::parse_block(&block) {
                messages.push(message);
            }
        }

        messages
    }

    fn parse_block(block: &str) -> Option<SseMessage> {
        let mut message = SseMessage::default();
        let mut data_lines: Vec<&str> = Vec::new();

        for line in block.lines() {
            let line = line.strip_suffix('\r').unwrap_or(line);
            if line.is_empty() || line.starts_with(':') {
                continue;
            }
            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line, ""),
            };
            match field {
                "id" => message.id = Some(value.to_string()),
                "event" => message.event = Some(value.to_string()),
                "data" => data_lines.push(value),
                _ => {}
            }
        }

        if message.id.is_none() && message.event.is_none() && data_lines.is_empty() {
            return None;
        }
        message.data = data_lines.join("\n");
        Some(message)
    }
}

/// Realtime feed client with automatic reconnection.
///
/// One logical connection per client; `connect` runs until the feed closes
/// for good, so call sites spawn it. Events fan out over a broadcast
/// channel.
pub struct RealtimeClient {
    http: reqwest::Client,
    base_url: String,
    config: RealtimeConfig,
    state: Arc<RwLock<ConnectionState>>,
    event_tx: broadcast::Sender<RealtimeEvent>,
    auth_token: Arc<RwLock<Option<String>>>,
    topics: Arc<RwLock<Vec<String>>>,
    reconnect_attempts: Arc<RwLock<u32>>,
    shutdown: Arc<Notify>,
}

impl RealtimeClient {
    /// Create a new realtime client against the given backend base URL.
    pub fn new(base_url: impl Into<String>, config: RealtimeConfig) -> Self {
        let (event_tx, _) = broadcast::channel(100);
        let base_url = base_url.into();

        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            config,
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            event_tx,
            auth_token: Arc::new(RwLock::new(None)),
            topics: Arc::new(RwLock::new(Vec::new())),
            reconnect_attempts: Arc::new(RwLock::new(0)),
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Create with default configuration.
    pub fn with_defaults(base_url: impl Into<String>) -> Self {
        Self::new(base_url, RealtimeConfig::default())
    }

    /// Subscribe to client events.
    pub fn subscribe(&self) -> broadcast::Receiver<RealtimeEvent> {
        self.event_tx.subscribe()
    }

    /// Get the current connection state.
    pub async fn state(&self) -> ConnectionState {
        *self.state.read().await
    }

    /// Check if the subscription is established.
    pub async fn is_connected(&self) -> bool {
        *self.state.read().await == ConnectionState::Connected
    }

    fn realtime_url(&self) -> String {
        format!("{}/api/realtime", self.base_url)
    }

    /// Open the feed and keep it open, reconnecting on drops.
    ///
    /// Runs until `disconnect` is called or reconnection gives up; spawn it.
    pub async fn connect(&self, auth_token: &str, topics: Vec<String>) -> BackendResult<()> {
        let current_state = *self.state.read().await;
        if current_state != ConnectionState::Disconnected {
            debug!("already connecting or connected");
            return Ok(());
        }

        // Stored for reconnection
        *self.auth_token.write().await = Some(auth_token.to_string());
        *self.topics.write().await = topics;
        *self.reconnect_attempts.write().await = 0;

        self.run().await
    }

    async fn run(&self) -> BackendResult<()> {
        loop {
            match self.stream_once().await {
                Ok(StreamEnd::Shutdown) => return Ok(()),
                Ok(StreamEnd::Dropped(reason)) => {
                    *self.state.write().await = ConnectionState::Disconnected;
                    let _ = self.event_tx.send(RealtimeEvent::Disconnected(reason));
                }
                Err(e) => {
                    *self.state.write().await = ConnectionState::Disconnected;
                    error!(error = %e, "realtime stream failed");
                    let _ = self
                        .event_tx
                        .send(RealtimeEvent::Disconnected(Some(e.to_string())));
                }
            }

            if !self.wait_for_reconnect().await {
                return Ok(());
            }
        }
    }

    /// Open one SSE connection and pump it until it ends.
    async fn stream_once(&self) -> BackendResult<StreamEnd> {
        *self.state.write().await = ConnectionState::Connecting;
        info!(url = %self.realtime_url(), "connecting to realtime feed");

        let response = self
            .http
            .get(self.realtime_url())
            .header("Accept", "text/event-stream")
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(BackendError::Realtime(format!(
                "feed returned {}",
                response.status()
            )));
        }

        let mut stream = response.bytes_stream();
        let mut decoder = Utf8StreamDecoder::default();
        let mut parser = SseParser::new();

        loop {
            tokio::select! {
                _ = self.shutdown.notified() => {
                    debug!("realtime shutdown requested");
                    return Ok(StreamEnd::Shutdown);
                }
                chunk = stream.next() => {
                    let Some(chunk) = chunk else {
                        info!("realtime feed closed by server");
                        return Ok(StreamEnd::Dropped(None));
                    };
                    let chunk = chunk?;
                    let text = decoder.decode(&chunk);
                    for message in parser.feed(&text) {
                        self.handle_message(message).await?;
                    }
                }
            }
        }
    }

    async fn handle_message(&self, message: SseMessage) -> BackendResult<()> {
        match message.event.as_deref() {
            Some("PB_CONNECT") => {
                let payload: ConnectPayload = serde_json::from_str(&message.data)?;
                self.submit_subscriptions(&payload.client_id).await?;
            }
            Some(topic) => {
                let subscribed = self.topics.read().await.iter().any(|t| t == topic);
                if !subscribed {
                    debug!(topic, "event on unsubscribed topic");
                    return Ok(());
                }
                match serde_json::from_str::<RecordPayload>(&message.data) {
                    Ok(payload) => {
                        let _ = self.event_tx.send(RealtimeEvent::Record(RecordEvent {
                            topic: topic.to_string(),
                            action: payload.action,
                            record: payload.record,
                        }));
                    }
                    Err(e) => {
                        warn!(topic, error = %e, "unparseable record event");
                        let _ = self
                            .event_tx
                            .send(RealtimeEvent::Error(format!("bad record event: {e}")));
                    }
                }
            }
            None => debug!("event without a name, ignoring"),
        }
        Ok(())
    }

    /// Tell the backend which collections this connection wants.
    async fn submit_subscriptions(&self, client_id: &str) -> BackendResult<()> {
        *self.state.write().await = ConnectionState::Subscribing;

        let token = self
            .auth_token
            .read()
            .await
            .clone()
            .ok_or(BackendError::NotAuthenticated)?;
        let topics = self.topics.read().await.clone();

        let response = self
            .http
            .post(self.realtime_url())
            .header("Authorization", token)
            .json(&serde_json::json!({
                "clientId": client_id,
                "subscriptions": topics,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(BackendError::Realtime(format!(
                "subscription request rejected: {status}"
            )));
        }

        *self.state.write().await = ConnectionState::Connected;
        *self.reconnect_attempts.write().await = 0;
        info!(topics = ?topics, "realtime subscription established");
        let _ = self.event_tx.send(RealtimeEvent::Connected);
        Ok(())
    }

    /// Back off before the next attempt. Returns false when reconnection
    /// should stop.
    async fn wait_for_reconnect(&self) -> bool {
        let mut attempts = self.reconnect_attempts.write().await;
        *attempts += 1;

        if *attempts > self.config.max_reconnect_attempts {
            warn!("max reconnect attempts reached");
            return false;
        }

        let delay = std::cmp::min(
            self.config.reconnect_base_delay_secs * 2u64.pow(*attempts - 1),
            self.config.reconnect_max_delay_secs,
        );
        info!(attempt = *attempts, delay_secs = delay, "scheduling realtime reconnect");
        drop(attempts);

        tokio::select! {
            _ = self.shutdown.notified() => false,
            _ = tokio::time::sleep(Duration::from_secs(delay)) => {
                self.auth_token.read().await.is_some()
            }
        }
    }

    /// Tear the feed down. Safe to call when already disconnected.
    pub async fn disconnect(&self) {
        *self.reconnect_attempts.write().await = self.config.max_reconnect_attempts + 1;
        self.shutdown.notify_waiters();

        *self.state.write().await = ConnectionState::Disconnected;
        *self.auth_token.write().await = None;
        *self.topics.write().await = Vec::new();

        info!("disconnected from realtime feed");
        let _ = self
            .event_tx
            .send(RealtimeEvent::Disconnected(Some("client disconnected".to_string())));
    }
}

enum StreamEnd {
    /// Torn down on purpose.
    Shutdown,
    /// Server closed the stream or the transport dropped.
    Dropped(Option<String>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_realtime_config_default() {
        let config = RealtimeConfig::default();
        assert_eq!(config.reconnect_base_delay_secs, 2);
        assert_eq!(config.reconnect_max_delay_secs, 30);
        assert_eq!(config.max_reconnect_attempts, 10);
    }

    #[tokio::test]
    async fn test_realtime_client_initial_state() {
        let client = RealtimeClient::with_defaults("http://127.0.0.1:8090");
        assert_eq!(client.state().await, ConnectionState::Disconnected);
        assert!(!client.is_connected().await);
    }

    #[tokio::test]
    async fn test_disconnect_when_not_connected() {
        let client = RealtimeClient::with_defaults("http://127.0.0.1:8090");
        client.disconnect().await;
        assert_eq!(client.state().await, ConnectionState::Disconnected);
    }

    #[test]
    fn test_utf8_decoder_holds_back_split_character() {
        // "é" is 0xC3 0xA9; split it across two chunks.
        let mut decoder = Utf8StreamDecoder::default();
        assert_eq!(decoder.decode(b"caf\xc3"), "caf");
        assert_eq!(decoder.decode(b"\xa9!"), "é!");
    }

    #[test]
    fn test_utf8_decoder_replaces_invalid_bytes() {
        let mut decoder = Utf8StreamDecoder::default();
        assert_eq!(decoder.decode(b"a\xffb"), "a\u{FFFD}b");
    }

    #[test]
    fn test_utf8_decoder_passes_ascii_through() {
        let mut decoder = Utf8StreamDecoder::default();
        assert_eq!(decoder.decode(b"data:{}\n\n"), "data:{}\n\n");
    }

    #[test]
    fn test_sse_parser_connect_event() {
        let mut parser = SseParser::new();
        let messages = parser.feed(
            "id:abc123\nevent:PB_CONNECT\ndata:{\"clientId\":\"abc123\"}\n\n",
        );

        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].event.as_deref(), Some("PB_CONNECT"));
        assert_eq!(messages[0].data, "{\"clientId\":\"abc123\"}");
    }

    #[test]
    fn test_sse_parser_handles_chunk_splits() {
        let mut parser = SseParser::new();
        assert!(parser.feed("event:messages\nda").is_empty());
        let messages = parser.feed("ta:{\"action\":\"create\",\"record\":{}}\n\n");

        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].event.as_deref(), Some("messages"));
        assert_eq!(messages[0].data, "{\"action\":\"create\",\"record\":{}}");
    }

    #[test]
    fn test_sse_parser_joins_multiline_data() {
        let mut parser = SseParser::new();
        let messages = parser.feed("data:line1\ndata:line2\n\n");

        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].data, "line1\nline2");
    }

    #[test]
    fn test_sse_parser_skips_comments_and_blank_blocks() {
        let mut parser = SseParser::new();
        assert!(parser.feed(":keep-alive\n\n").is_empty());
    }

    #[test]
    fn test_sse_parser_strips_leading_space() {
        let mut parser = SseParser::new();
        let messages = parser.feed("event: messages\ndata: {}\n\n");

        assert_eq!(messages[0].event.as_deref(), Some("messages"));
        assert_eq!(messages[0].data, "{}");
    }

    #[test]
    fn test_sse_parser_multiple_events_in_one_chunk() {
        let mut parser = SseParser::new();
        let messages = parser.feed(
            "event:messages\ndata:{\"action\":\"create\",\"record\":{\"id\":\"m1\"}}\n\n\
             event:messages\ndata:{\"action\":\"delete\",\"record\":{\"id\":\"m2\"}}\n\n",
        );
        assert_eq!(messages.len(), 2);
    }

    #[test]
    fn test_record_action_serde() {
        let action: RecordAction = serde_json::from_str("\"create\"").unwrap();
        assert_eq!(action, RecordAction::Create);
        let action: RecordAction = serde_json::from_str("\"delete\"").unwrap();
        assert_eq!(action, RecordAction::Delete);
    }

    #[test]
    fn test_record_payload_decode() {
        let payload: RecordPayload = serde_json::from_str(
            r#"{"action":"create","record":{"id":"m1","card":"c1"}}"#,
        )
        .unwrap();
        assert_eq!(payload.action, RecordAction::Create);
        assert_eq!(payload.record["card"], "c1");
    }

    #[tokio::test]
    async fn test_subscribe_returns_receiver() {
        let client = RealtimeClient::with_defaults("http://127.0.0.1:8090");
        let mut rx = client.subscribe();
        client.disconnect().await;

        // disconnect emits an event even when idle
        let event = rx.recv().await.unwrap();
        assert!(matches!(event, RealtimeEvent::Disconnected(_)));
    }
}
