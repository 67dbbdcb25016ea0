//! Domain types for the Talk-to-Aliens client.
//!
//! These are the application-shaped records the stores and session manager
//! work with, decoupled from the backend's wire format (which lives in
//! `aliens-backend`).

mod card;
mod message;
mod profile;
pub mod routes;

pub use card::Card;
pub use message::Message;
pub use profile::{Author, Profile, Role};
