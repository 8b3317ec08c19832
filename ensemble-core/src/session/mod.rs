//! Sessions: one conversation each, managed as a bounded pool
//!
//! - [`chat::ChatSession`] runs turns for a single conversation
//! - [`manager::SessionManager`] owns the live-session cache, LRU eviction,
//!   and TTL expiry
//! - [`store::SessionStore`] is the persistence seam

pub mod chat;
pub mod manager;
pub mod store;

pub use chat::{ChatSession, MAX_ITERATIONS_SENTINEL};
pub use manager::{SessionManager, DEFAULT_SESSION_ID};
pub use store::{InMemorySessionStore, SessionMetadata, SessionStore, StoreError};
