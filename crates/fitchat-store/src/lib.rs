//! # fitchat-store
//!
//! Storage seams for the FitChat client.
//!
//! - [`ConversationStore`] is the realtime hierarchical store the chat lives
//!   in: subscribe to a path, append a child, apply a multi-path update.
//!   [`MemoryStore`] is an in-process implementation with the same snapshot
//!   semantics, used for local development and tests.
//! - [`SessionStore`] exposes the signed-in user and bearer token.
//!   [`SessionDb`] persists them in a small SQLite database.

pub mod database;
pub mod memory;
pub mod migrations;
pub mod remote;
pub mod session;

mod error;

pub use database::SessionDb;
pub use error::StoreError;
pub use memory::MemoryStore;
pub use remote::{ConversationStore, StoreEvent, Subscription};
pub use session::SessionStore;
