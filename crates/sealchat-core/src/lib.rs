//! # Sealchat Core Library
//!
//! The end-to-end encrypted messaging core: two identified parties exchange
//! messages through a relay that stores and forwards ciphertext without ever
//! having access to plaintext.
//!
//! ## Trust Model
//!
//! The relay is honest-but-curious: it routes and stores opaque envelopes but
//! must never be able to read them. All key agreement happens between the two
//! endpoints; the only secret the relay ever sees is nothing.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │            Relay server edge            │
//! ├─────────────────────────────────────────┤
//! │   relay    │  presence  │   history     │
//! ├─────────────────────────────────────────┤
//! │            protocol (wire)              │
//! ├─────────────────────────────────────────┤
//! │    crypto     │        session          │
//! └─────────────────────────────────────────┘
//! ```
//!
//! `crypto` and `session` run at the client edge (plaintext never crosses the
//! relay or the history store); `presence`, `relay` and `history` run inside
//! the relay process.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, clippy::all)]
#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod crypto;
pub mod error;
pub mod history;
pub mod identity;
pub mod logging;
pub mod presence;
pub mod protocol;
pub mod relay;
pub mod session;

pub use error::{Error, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Wire protocol version for compatibility checks
pub const PROTOCOL_VERSION: u8 = 1;

/// Maximum ciphertext size accepted in a single envelope (64 KiB)
pub const MAX_CIPHERTEXT_SIZE: usize = 65536;
