//! X25519 key types for per-conversation key agreement.
//!
//! A fresh [`KeyPair`] is generated per handshake attempt unless a persisted
//! session is restored. Secret material is zeroized on drop.

use crate::error::{Error, Result};
use rand::rngs::OsRng;
use std::fmt;
use x25519_dalek::{PublicKey as DalekPublic, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// Size of X25519 keys and derived session keys in bytes.
pub const KEY_SIZE: usize = 32;

/// An X25519 public key, exported in handshake messages.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PublicKey([u8; KEY_SIZE]);

impl PublicKey {
    /// Create from raw bytes.
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Parse from a byte slice, rejecting malformed lengths.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let bytes: [u8; KEY_SIZE] = bytes
            .try_into()
            .map_err(|_| Error::InvalidPeerKey(format!("expected {} bytes", KEY_SIZE)))?;
        Ok(Self(bytes))
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }

    fn to_dalek(self) -> DalekPublic {
        DalekPublic::from(self.0)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({}...)", hex::encode(&self.0[..8]))
    }
}

impl From<DalekPublic> for PublicKey {
    fn from(key: DalekPublic) -> Self {
        Self(*key.as_bytes())
    }
}

/// A shared secret from X25519 agreement, before the KDF stretch.
///
/// Zeroized on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SharedSecret([u8; KEY_SIZE]);

impl SharedSecret {
    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SharedSecret([REDACTED])")
    }
}

/// The symmetric key for one conversation, derived via agreement + stretch.
///
/// Zeroized on drop. Never transmitted or persisted directly; it is re-derived
/// from the stored (secret key, peer public key) pair on restore.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SessionKey([u8; KEY_SIZE]);

impl SessionKey {
    /// Wrap raw key bytes (test vectors, KDF output).
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionKey([REDACTED])")
    }
}

/// An X25519 key-agreement pair.
pub struct KeyPair {
    secret: StaticSecret,
    public: PublicKey,
}

impl KeyPair {
    /// Generate a fresh random keypair.
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(DalekPublic::from(&secret));
        Self { secret, public }
    }

    /// Restore from persisted secret key bytes.
    pub fn from_secret_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        let secret = StaticSecret::from(bytes);
        let public = PublicKey::from(DalekPublic::from(&secret));
        Self { secret, public }
    }

    /// Get the public key.
    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    /// Export secret key bytes for session persistence.
    ///
    /// Storing these alongside the peer's public key trades forward secrecy
    /// for the ability to decrypt history after a restart.
    pub fn secret_bytes(&self) -> Zeroizing<[u8; KEY_SIZE]> {
        Zeroizing::new(self.secret.to_bytes())
    }

    /// Perform X25519 agreement with a peer public key.
    ///
    /// Fails with `InvalidPeerKey` when the peer key is non-contributory
    /// (a low-order point), which would yield an all-zero secret.
    pub fn diffie_hellman(&self, their_public: &PublicKey) -> Result<SharedSecret> {
        let shared = self.secret.diffie_hellman(&their_public.to_dalek());
        if !shared.was_contributory() {
            return Err(Error::InvalidPeerKey("non-contributory peer key".into()));
        }
        Ok(SharedSecret(*shared.as_bytes()))
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &self.public)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// Derive the conversation session key from our keypair and the peer's
/// public key: X25519 agreement stretched through fixed-salt HKDF-SHA256.
///
/// Symmetric by construction: `derive(A, B_pub) == derive(B, A_pub)`.
pub fn derive_session_key(key_pair: &KeyPair, peer_public: &PublicKey) -> Result<SessionKey> {
    let shared = key_pair.diffie_hellman(peer_public)?;
    let stretched = super::hkdf_derive(
        Some(super::SESSION_KDF_SALT),
        shared.as_bytes(),
        super::SESSION_KDF_INFO,
        KEY_SIZE,
    )?;
    let bytes: [u8; KEY_SIZE] = stretched
        .as_slice()
        .try_into()
        .map_err(|_| Error::Crypto("KDF output length mismatch".into()))?;
    Ok(SessionKey::from_bytes(bytes))
}
