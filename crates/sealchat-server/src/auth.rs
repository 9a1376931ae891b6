//! The identity boundary.
//!
//! Registration and credential verification belong to an external
//! collaborator; all this relay needs is a verified, stable identity per
//! connection. The collaborator issues opaque tokens, and this registry maps
//! them back to identities. Connections without a resolvable token never
//! reach the core.

use anyhow::Context;
use sealchat_core::identity::Identity;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Opaque token -> identity map.
#[derive(Default)]
pub struct TokenRegistry {
    tokens: RwLock<HashMap<String, Identity>>,
}

impl TokenRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a registry from a JSON object of `token: identity` pairs.
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read token file {}", path))?;
        let parsed: HashMap<String, String> =
            serde_json::from_str(&raw).context("token file is not a JSON object")?;

        let mut tokens = HashMap::with_capacity(parsed.len());
        for (token, identity) in parsed {
            let identity = Identity::new(identity)
                .map_err(|e| anyhow::anyhow!("invalid identity in token file: {}", e))?;
            tokens.insert(token, identity);
        }
        Ok(Self {
            tokens: RwLock::new(tokens),
        })
    }

    /// Attach an identity to a token.
    pub async fn register(&self, token: impl Into<String>, identity: Identity) {
        self.tokens.write().await.insert(token.into(), identity);
    }

    /// Resolve a token to its verified identity.
    pub async fn verify(&self, token: &str) -> Option<Identity> {
        self.tokens.read().await.get(token).cloned()
    }
}
