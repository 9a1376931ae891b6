//! Per-conversation session state: handshake, key derivation, persistence.
//!
//! Each unordered pair of identities has at most one session key at a time.
//! The two-message handshake (`initiate` / `accept`) runs through the relay;
//! key derivation is symmetric, so both sides converge on the same key even
//! when they initiate simultaneously.
//!
//! Sessions are persisted client-side as the `(own secret key, peer public
//! key)` pair so they can be restored across reconnects without a new
//! handshake. That trade-off (restorable history over forward secrecy) is
//! deliberate; the persistence strategy is pluggable via [`SessionStore`] so a
//! ratcheting scheme can replace it without touching the relay.

mod handshake;
mod store;

pub use handshake::{Conversation, EstablishedSession, SessionManager, SessionState};
pub use store::{MemorySessionStore, SessionRecord, SessionStore, SqliteSessionStore};
