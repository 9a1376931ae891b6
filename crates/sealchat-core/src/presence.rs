//! Identity/presence registry: which identities currently have a live
//! transport to the relay.
//!
//! At most one live transport per identity. A superseding connect replaces
//! the previous transport silently — the superseded sender is handed back to
//! the caller for a courtesy notification, and no presence flap is broadcast.
//! All operations are guarded by a single `RwLock`, so connect, disconnect
//! and lookup for the same identity never interleave incoherently.

use crate::identity::Identity;
use crate::protocol::ServerMessage;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{mpsc, RwLock};
use tracing::debug;

/// Identifies one live connection, so a stale disconnect (from a superseded
/// socket winding down) cannot remove its successor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnId(u64);

/// The sending half of a live client transport.
pub type ClientSender = mpsc::Sender<ServerMessage>;

struct PresenceRecord {
    conn_id: ConnId,
    sender: ClientSender,
    last_seen: i64,
}

/// Process-wide identity -> live transport registry.
#[derive(Default)]
pub struct PresenceRegistry {
    inner: RwLock<HashMap<Identity, PresenceRecord>>,
    next_conn: AtomicU64,
}

impl PresenceRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a live transport for an identity.
    ///
    /// Returns the new connection id and, when this connect supersedes an
    /// existing transport, the superseded sender.
    pub async fn connect(
        &self,
        identity: &Identity,
        sender: ClientSender,
    ) -> (ConnId, Option<ClientSender>) {
        let conn_id = ConnId(self.next_conn.fetch_add(1, Ordering::Relaxed));
        let record = PresenceRecord {
            conn_id,
            sender,
            last_seen: chrono::Utc::now().timestamp(),
        };

        let mut inner = self.inner.write().await;
        let superseded = inner.insert(identity.clone(), record).map(|old| {
            debug!(identity = %identity, "connection superseded");
            old.sender
        });
        (conn_id, superseded)
    }

    /// Remove a transport. A stale `conn_id` (already superseded) is a no-op.
    /// Returns whether the identity actually went offline.
    pub async fn disconnect(&self, identity: &Identity, conn_id: ConnId) -> bool {
        let mut inner = self.inner.write().await;
        match inner.get(identity) {
            Some(record) if record.conn_id == conn_id => {
                inner.remove(identity);
                true
            }
            _ => false,
        }
    }

    /// Look up the live transport for an identity, if present.
    pub async fn lookup(&self, identity: &Identity) -> Option<ClientSender> {
        let inner = self.inner.read().await;
        inner.get(identity).map(|record| record.sender.clone())
    }

    /// Whether an identity currently has a live transport.
    pub async fn is_present(&self, identity: &Identity) -> bool {
        self.inner.read().await.contains_key(identity)
    }

    /// All currently present identities.
    pub async fn list_present(&self) -> Vec<Identity> {
        let inner = self.inner.read().await;
        let mut present: Vec<Identity> = inner.keys().cloned().collect();
        present.sort();
        present
    }

    /// Refresh `last_seen` for an identity (called on successful handshake
    /// and registration steps).
    pub async fn touch(&self, identity: &Identity) {
        let mut inner = self.inner.write().await;
        if let Some(record) = inner.get_mut(identity) {
            record.last_seen = chrono::Utc::now().timestamp();
        }
    }

    /// Fan a message out to every present transport, best effort.
    pub async fn broadcast(&self, message: ServerMessage) {
        let inner = self.inner.read().await;
        for (identity, record) in inner.iter() {
            if record.sender.try_send(message.clone()).is_err() {
                debug!(identity = %identity, "dropped broadcast to saturated connection");
            }
        }
    }
}
