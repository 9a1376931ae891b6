//! Error types for the Sealchat core.
//!
//! Crypto error messages are intentionally generic: a decrypt failure never
//! reveals whether the tag, the key, or the ciphertext was at fault.

use thiserror::Error;

/// Core error type for Sealchat operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Peer public key is malformed or not a usable curve point.
    #[error("invalid peer public key")]
    InvalidPeerKey(String),

    /// AEAD tag verification failed: tampering, wrong key, or corruption.
    /// Per-message and non-fatal; the session is not torn down.
    #[error("message authentication failed")]
    AuthenticationFailed,

    /// Other cryptographic operation failed.
    #[error("cryptographic operation failed")]
    Crypto(String),

    /// History or session persistence failed. Surfaced to the caller;
    /// no delivery is attempted after a failed write.
    #[error("persistence error")]
    Persistence(String),

    /// Malformed or out-of-state wire message.
    #[error("protocol error")]
    Protocol(String),

    /// Encoding/decoding error (hex fields, lengths).
    #[error("encoding error")]
    Encoding(String),

    /// Encrypt/decrypt attempted without an established session key.
    #[error("no established session")]
    NoSession,
}

/// Result type alias using Sealchat's Error.
pub type Result<T> = std::result::Result<T, Error>;

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::Persistence(e.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Persistence(e.to_string())
    }
}
