//! The relay router: durable storage first, live delivery best effort.
//!
//! `send` persists an envelope before any delivery attempt; a message is
//! never pushed to a transport without being durably recorded, and a failed
//! write aborts the whole operation. Live delivery is fire-and-forget with no
//! acknowledgment or retry — an absent or slow recipient recovers missed
//! messages via history fetch on its next connect.

use crate::error::Result;
use crate::history::{Envelope, HistoryStore};
use crate::identity::Identity;
use crate::logging::RedactedBytes;
use crate::presence::PresenceRegistry;
use crate::protocol::ServerMessage;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// Routes encrypted envelopes between storage and live transports.
pub struct RelayRouter {
    history: Arc<Mutex<HistoryStore>>,
    presence: Arc<PresenceRegistry>,
}

impl RelayRouter {
    /// Create a router over the shared history store and presence registry.
    pub fn new(history: Arc<Mutex<HistoryStore>>, presence: Arc<PresenceRegistry>) -> Self {
        Self { history, presence }
    }

    /// The presence registry this router consults.
    pub fn presence(&self) -> &Arc<PresenceRegistry> {
        &self.presence
    }

    /// Relay an encrypted message: persist, then forward if the recipient is
    /// present. Returns the stored envelope (with its assigned id) regardless
    /// of delivery outcome.
    ///
    /// Callers must have rejected self-addressed messages before this point.
    pub async fn send(
        &self,
        from: &Identity,
        to: &Identity,
        ciphertext: Vec<u8>,
        nonce: Vec<u8>,
        tag: Option<Vec<u8>>,
    ) -> Result<Envelope> {
        // Durability precedes delivery: a persistence failure aborts the send
        // with no partial state.
        let envelope = {
            let history = self.history.lock().await;
            history.append(from, to, &ciphertext, &nonce, tag.as_deref())?
        };

        debug!(
            from = %from,
            to = %to,
            message_id = %envelope.message_id,
            ciphertext = %RedactedBytes(&envelope.ciphertext),
            "envelope persisted"
        );

        if let Some(sender) = self.presence.lookup(to).await {
            if sender.try_send(ServerMessage::deliver(&envelope)).is_err() {
                debug!(to = %to, message_id = %envelope.message_id, "live delivery dropped");
            }
        }
        // Recipient offline is a normal, silent branch.

        Ok(envelope)
    }

    /// Forward a handshake message to a present peer. Returns whether a live
    /// transport accepted it; an offline peer is a silent non-event.
    pub async fn forward_handshake(&self, to: &Identity, message: ServerMessage) -> bool {
        match self.presence.lookup(to).await {
            Some(sender) => sender.try_send(message).is_ok(),
            None => {
                debug!(to = %to, "handshake peer not present");
                false
            }
        }
    }

    /// Stored envelopes between two identities, oldest first.
    pub async fn history_between(
        &self,
        a: &Identity,
        b: &Identity,
        limit: u32,
    ) -> Result<Vec<Envelope>> {
        let history = self.history.lock().await;
        history.between(a, b, limit)
    }

    /// Most recent envelopes across all conversations, newest first.
    pub async fn history_recent(&self, limit: u32) -> Result<Vec<Envelope>> {
        let history = self.history.lock().await;
        history.recent(limit)
    }

    /// Total number of stored envelopes.
    pub async fn message_count(&self) -> Result<u64> {
        let history = self.history.lock().await;
        history.message_count()
    }
}
