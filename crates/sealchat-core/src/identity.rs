//! Identity values and conversation pair keys.
//!
//! An [`Identity`] is an opaque, stable identifier issued by the external
//! identity collaborator. The core never interprets it; it is only used as a
//! routing and storage key.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum accepted identity length in bytes.
pub const MAX_IDENTITY_LEN: usize = 128;

/// An opaque party identifier. Immutable once assigned.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    /// Wrap a verified identity value.
    ///
    /// The core only rejects values it cannot use as keys: empty strings and
    /// oversized values. Everything else is the collaborator's business.
    pub fn new(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        if value.is_empty() {
            return Err(Error::Protocol("empty identity".into()));
        }
        if value.len() > MAX_IDENTITY_LEN {
            return Err(Error::Protocol("identity too long".into()));
        }
        Ok(Self(value))
    }

    /// Get the identity as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Identity({})", self.0)
    }
}

impl AsRef<str> for Identity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// The unordered pair of identities naming a conversation.
///
/// Both parties must arrive at the same key for the same conversation, so the
/// two identities are stored sorted.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct PairKey {
    lo: Identity,
    hi: Identity,
}

impl PairKey {
    /// Build the pair key for two identities, in either order.
    pub fn new(a: &Identity, b: &Identity) -> Self {
        if a <= b {
            Self { lo: a.clone(), hi: b.clone() }
        } else {
            Self { lo: b.clone(), hi: a.clone() }
        }
    }

    /// The lexicographically smaller identity.
    pub fn lo(&self) -> &Identity {
        &self.lo
    }

    /// The lexicographically larger identity.
    pub fn hi(&self) -> &Identity {
        &self.hi
    }

    /// Stable storage key for this pair.
    pub fn storage_key(&self) -> String {
        format!("{}\u{1f}{}", self.lo, self.hi)
    }
}
