//! Append-only encrypted message history.
//!
//! The store holds opaque envelopes: ciphertext, nonce and optional tag are
//! written verbatim and read back verbatim. There is no code path that
//! stores, derives, or logs plaintext, and no mutation or deletion operation.
//! Retention is an external policy concern.

mod schema;
mod store;

pub use store::{HistoryConfig, HistoryStore};

use crate::crypto::random_bytes;
use crate::error::{Error, Result};
use crate::identity::Identity;
use std::fmt;

/// Size of a message identifier in bytes.
pub const MESSAGE_ID_SIZE: usize = 16;

/// Unique, store-assigned identifier for one envelope.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageId([u8; MESSAGE_ID_SIZE]);

impl MessageId {
    /// Generate a fresh random identifier.
    pub fn random() -> Self {
        Self(random_bytes())
    }

    /// Create from bytes.
    pub fn from_bytes(bytes: [u8; MESSAGE_ID_SIZE]) -> Self {
        Self(bytes)
    }

    /// Parse from a byte slice.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let bytes: [u8; MESSAGE_ID_SIZE] = bytes
            .try_into()
            .map_err(|_| Error::Encoding("invalid message id length".into()))?;
        Ok(Self(bytes))
    }

    /// Parse from a hex string.
    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s).map_err(|_| Error::Encoding("invalid message id hex".into()))?;
        Self::from_slice(&bytes)
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; MESSAGE_ID_SIZE] {
        &self.0
    }

    /// Hex representation used on the wire.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageId({})", self.to_hex())
    }
}

/// One persisted, immutable relay record.
#[derive(Debug, Clone)]
pub struct Envelope {
    /// Unique identifier, assigned at append time.
    pub message_id: MessageId,
    /// Sender identity.
    pub from: Identity,
    /// Recipient identity.
    pub to: Identity,
    /// Opaque ciphertext (tag embedded unless `tag` is present).
    pub ciphertext: Vec<u8>,
    /// AEAD nonce, stored verbatim.
    pub nonce: Vec<u8>,
    /// Detached authentication tag, for schemes that separate it.
    pub tag: Option<Vec<u8>>,
    /// Store-assigned creation time (Unix milliseconds).
    pub created_at: i64,
}
