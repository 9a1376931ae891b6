//! Authenticated encryption using ChaCha20-Poly1305.
//!
//! Every message gets a fresh random nonce; nonce reuse under the same key
//! breaks confidentiality for this AEAD. The 16-byte Poly1305 tag may be
//! embedded at the end of the ciphertext or carried detached — both
//! representations are accepted symmetrically by [`decrypt`].

use super::keys::SessionKey;
use crate::error::{Error, Result};
use chacha20poly1305::{
    aead::{Aead, AeadInPlace, KeyInit},
    ChaCha20Poly1305, Key, Nonce as ChaNonce,
};
use rand::RngCore;
use zeroize::Zeroizing;

/// Size of nonce in bytes (96 bits).
pub const NONCE_SIZE: usize = 12;

/// Size of the authentication tag in bytes (128 bits).
pub const TAG_SIZE: usize = 16;

/// A per-message nonce. Must be unique per session key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Nonce([u8; NONCE_SIZE]);

impl Nonce {
    /// Create a fresh random nonce.
    pub fn random() -> Self {
        let mut bytes = [0u8; NONCE_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Create from bytes.
    pub fn from_bytes(bytes: [u8; NONCE_SIZE]) -> Self {
        Self(bytes)
    }

    /// Parse from a byte slice, rejecting malformed lengths.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let bytes: [u8; NONCE_SIZE] = bytes
            .try_into()
            .map_err(|_| Error::Encoding(format!("nonce must be {} bytes", NONCE_SIZE)))?;
        Ok(Self(bytes))
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; NONCE_SIZE] {
        &self.0
    }
}

impl From<[u8; NONCE_SIZE]> for Nonce {
    fn from(bytes: [u8; NONCE_SIZE]) -> Self {
        Self(bytes)
    }
}

/// Encrypt plaintext with a fresh random nonce.
///
/// Returns the ciphertext with the tag embedded at the end, plus the nonce.
pub fn encrypt(key: &SessionKey, plaintext: &[u8]) -> Result<(Vec<u8>, Nonce)> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
    let nonce = Nonce::random();

    let ciphertext = cipher
        .encrypt(ChaNonce::from_slice(nonce.as_bytes()), plaintext)
        .map_err(|_| Error::Crypto("encryption failed".into()))?;

    Ok((ciphertext, nonce))
}

/// Encrypt plaintext with a fresh random nonce, tag detached.
///
/// Returns `(ciphertext, nonce, tag)` where the ciphertext is exactly as long
/// as the plaintext.
pub fn encrypt_detached(
    key: &SessionKey,
    plaintext: &[u8],
) -> Result<(Vec<u8>, Nonce, [u8; TAG_SIZE])> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
    let nonce = Nonce::random();

    let mut buffer = plaintext.to_vec();
    let tag = cipher
        .encrypt_in_place_detached(ChaNonce::from_slice(nonce.as_bytes()), b"", &mut buffer)
        .map_err(|_| Error::Crypto("encryption failed".into()))?;

    Ok((buffer, nonce, tag.into()))
}

/// Decrypt a ciphertext produced by [`encrypt`] or [`encrypt_detached`].
///
/// Pass `tag: None` when the tag is embedded in the ciphertext, `Some(tag)`
/// when it was carried detached. Fails with `AuthenticationFailed` on any
/// verification failure; the error never says why.
pub fn decrypt(
    key: &SessionKey,
    ciphertext: &[u8],
    nonce: &Nonce,
    tag: Option<&[u8]>,
) -> Result<Zeroizing<Vec<u8>>> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
    let cha_nonce = ChaNonce::from_slice(nonce.as_bytes());

    let plaintext = match tag {
        Some(tag) => {
            if tag.len() != TAG_SIZE {
                return Err(Error::AuthenticationFailed);
            }
            let mut combined = Vec::with_capacity(ciphertext.len() + TAG_SIZE);
            combined.extend_from_slice(ciphertext);
            combined.extend_from_slice(tag);
            cipher.decrypt(cha_nonce, combined.as_slice())
        }
        None => {
            if ciphertext.len() < TAG_SIZE {
                return Err(Error::AuthenticationFailed);
            }
            cipher.decrypt(cha_nonce, ciphertext)
        }
    }
    .map_err(|_| Error::AuthenticationFailed)?;

    Ok(Zeroizing::new(plaintext))
}
