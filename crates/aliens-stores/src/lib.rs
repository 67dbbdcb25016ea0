//! Client-side state stores.
//!
//! Each store owns one slice of application state: the card list, the
//! per-card message slots, and the route guard. Stores are shared behind
//! `Arc` and talk to the backend through one [`PocketBaseClient`].
//!
//! [`PocketBaseClient`]: aliens_backend::PocketBaseClient

mod cards;
mod error;
mod guard;
mod messages;

pub use cards::{CardPatch, CardStore, NewCard, ALL_LANGUAGES};
pub use error::{StoreError, StoreResult};
pub use guard::{guard_decision, GuardAction, GuardOutcome, GuardState, RouteGuard};
pub use messages::{MessageCache, MessageStore, RealtimeSyncHandle};
