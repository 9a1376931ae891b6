//! Cryptographic primitives for Sealchat.
//!
//! All cryptography uses well-audited primitives:
//!
//! - **X25519**: per-conversation key agreement
//! - **HKDF-SHA256**: fixed-salt stretch of the shared secret into a session key
//! - **ChaCha20-Poly1305**: authenticated encryption of message payloads
//!
//! Secret key material is zeroized on drop. No custom cryptography.

mod aead;
mod keys;

pub use aead::{
    decrypt, encrypt, encrypt_detached, Nonce, NONCE_SIZE, TAG_SIZE,
};
pub use keys::{
    derive_session_key, KeyPair, PublicKey, SessionKey, SharedSecret, KEY_SIZE,
};

use crate::error::{Error, Result};
use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroizing;

/// Fixed salt for session-key derivation.
///
/// Both parties must use the same salt or they derive different keys from the
/// same shared secret.
pub const SESSION_KDF_SALT: &[u8] = b"sealchat-e2e-salt";

/// Domain-separation info string for session-key derivation.
pub const SESSION_KDF_INFO: &[u8] = b"sealchat session key v1";

/// Derive keys using HKDF-SHA256.
pub fn hkdf_derive(
    salt: Option<&[u8]>,
    input_key_material: &[u8],
    info: &[u8],
    output_length: usize,
) -> Result<Zeroizing<Vec<u8>>> {
    let hkdf = Hkdf::<Sha256>::new(salt, input_key_material);
    let mut output = Zeroizing::new(vec![0u8; output_length]);
    hkdf.expand(info, &mut output)
        .map_err(|_| Error::Crypto("HKDF expansion failed".into()))?;
    Ok(output)
}

/// Generate cryptographically secure random bytes.
pub fn random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    rand::RngCore::fill_bytes(&mut rand::rngs::OsRng, &mut bytes);
    bytes
}
