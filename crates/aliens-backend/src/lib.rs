//! Client for the record-storage backend.
//!
//! This crate provides:
//! - REST CRUD over the `users`, `cards`, and `messages` collections with
//!   relation expansion and filter/sort expressions
//! - Password authentication and token refresh
//! - File reference resolution into fetchable URLs
//! - A realtime change-feed client with automatic reconnection

mod client;
mod error;
mod realtime;
pub mod records;

pub use client::{
    filter_and, filter_eq, filter_lt, AuthResponse, AuthToken, ListQuery, PocketBaseClient,
};
pub use error::{BackendError, BackendResult};
pub use realtime::{
    ConnectionState, RealtimeClient, RealtimeConfig, RealtimeEvent, RecordAction, RecordEvent,
    SseMessage, SseParser,
};

// Multipart bodies (profile updates with an avatar file) are built by
// callers; re-exported so they don't need their own reqwest dependency.
pub use reqwest::multipart;
