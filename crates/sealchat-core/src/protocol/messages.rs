//! Client and server message definitions.

use super::decode_hex_field;
use crate::crypto::{Nonce, PublicKey};
use crate::error::Result;
use crate::history::Envelope;
use crate::identity::Identity;
use serde::{Deserialize, Serialize};

/// Messages a client sends to the relay.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Ask to open an encrypted session with a peer.
    Initiate {
        /// Recipient identity.
        to: Identity,
        /// Sender's public key, hex-encoded.
        public_key: String,
    },
    /// Complete a key exchange started by the peer.
    Accept {
        /// Recipient identity.
        to: Identity,
        /// Responder's public key, hex-encoded.
        public_key: String,
    },
    /// Relay an encrypted message. The server assigns message id and
    /// creation time.
    Send {
        /// Recipient identity.
        to: Identity,
        /// Hex-encoded ciphertext.
        ciphertext: String,
        /// Hex-encoded nonce.
        nonce: String,
        /// Hex-encoded detached tag, when the scheme separates it.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tag: Option<String>,
    },
    /// Fetch persisted envelopes for a conversation, oldest first.
    HistoryRequest {
        /// The other party of the conversation.
        peer: Identity,
        /// Maximum number of envelopes; server-capped.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        limit: Option<u32>,
    },
}

/// Messages the relay pushes to a client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Sent once after the connection is registered.
    Connected {
        /// The authenticated identity of this connection.
        identity: Identity,
    },
    /// A peer asks to open an encrypted session.
    Initiate {
        /// Initiator identity.
        from: Identity,
        /// Initiator's public key, hex-encoded.
        public_key: String,
    },
    /// A peer completed a key exchange.
    Accept {
        /// Responder identity.
        from: Identity,
        /// Responder's public key, hex-encoded.
        public_key: String,
    },
    /// An encrypted message addressed to this connection.
    Deliver {
        /// Sender identity.
        from: Identity,
        /// Assigned envelope id, hex-encoded.
        message_id: String,
        /// Hex-encoded ciphertext.
        ciphertext: String,
        /// Hex-encoded nonce.
        nonce: String,
        /// Hex-encoded detached tag, if any.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tag: Option<String>,
        /// Store-assigned creation time (Unix milliseconds).
        created_at: i64,
    },
    /// Acknowledges a `send`: the envelope is durably stored.
    Sent {
        /// Assigned envelope id, hex-encoded.
        message_id: String,
    },
    /// Response to a `history_request`, oldest first.
    HistoryResponse {
        /// The conversation peer the history was requested for.
        peer: Identity,
        /// Stored envelopes.
        envelopes: Vec<WireEnvelope>,
    },
    /// A party connected or disconnected.
    PresenceChanged {
        /// The party whose presence changed.
        identity: Identity,
        /// Whether it is now present.
        online: bool,
    },
    /// A per-connection, non-fatal failure.
    Error {
        /// Human-readable description.
        message: String,
    },
}

/// Wire form of a stored [`Envelope`], binary fields hex-encoded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireEnvelope {
    /// Envelope id, hex-encoded.
    pub message_id: String,
    /// Sender identity.
    pub from: Identity,
    /// Recipient identity.
    pub to: Identity,
    /// Hex-encoded ciphertext.
    pub ciphertext: String,
    /// Hex-encoded nonce.
    pub nonce: String,
    /// Hex-encoded detached tag, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    /// Store-assigned creation time (Unix milliseconds).
    pub created_at: i64,
}

impl WireEnvelope {
    /// Decode the ciphertext field.
    pub fn ciphertext_bytes(&self) -> Result<Vec<u8>> {
        decode_hex_field("ciphertext", &self.ciphertext)
    }

    /// Decode the nonce field.
    pub fn nonce_bytes(&self) -> Result<Nonce> {
        Nonce::from_slice(&decode_hex_field("nonce", &self.nonce)?)
    }

    /// Decode the detached tag field, if present.
    pub fn tag_bytes(&self) -> Result<Option<Vec<u8>>> {
        self.tag
            .as_deref()
            .map(|t| decode_hex_field("tag", t))
            .transpose()
    }
}

impl From<&Envelope> for WireEnvelope {
    fn from(env: &Envelope) -> Self {
        Self {
            message_id: env.message_id.to_hex(),
            from: env.from.clone(),
            to: env.to.clone(),
            ciphertext: hex::encode(&env.ciphertext),
            nonce: hex::encode(&env.nonce),
            tag: env.tag.as_deref().map(hex::encode),
            created_at: env.created_at,
        }
    }
}

impl ServerMessage {
    /// Build a `deliver` push from a freshly persisted envelope.
    pub fn deliver(env: &Envelope) -> Self {
        ServerMessage::Deliver {
            from: env.from.clone(),
            message_id: env.message_id.to_hex(),
            ciphertext: hex::encode(&env.ciphertext),
            nonce: hex::encode(&env.nonce),
            tag: env.tag.as_deref().map(hex::encode),
            created_at: env.created_at,
        }
    }
}

/// Parse a hex-encoded public key from a handshake message.
pub fn parse_public_key(value: &str) -> Result<PublicKey> {
    let bytes = hex::decode(value)
        .map_err(|_| crate::error::Error::InvalidPeerKey("public key is not hex".into()))?;
    PublicKey::from_slice(&bytes)
}
