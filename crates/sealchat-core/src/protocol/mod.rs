//! Wire protocol for the relay connection.
//!
//! Messages are JSON-encoded tagged unions over WebSocket text frames.
//! Binary fields (keys, ciphertext, nonces, tags, ids) travel hex-encoded.
//! The tagged-union shape gives the router an exhaustive match over every
//! inbound message kind.

mod messages;

pub use messages::{parse_public_key, ClientMessage, ServerMessage, WireEnvelope};

use crate::error::{Error, Result};

/// Decode a hex-encoded wire field, naming the field in the error.
pub fn decode_hex_field(field: &str, value: &str) -> Result<Vec<u8>> {
    hex::decode(value).map_err(|_| Error::Encoding(format!("invalid hex in field '{}'", field)))
}
