//! Shared server state and REST response types.

use crate::auth::TokenRegistry;
use sealchat_core::relay::RelayRouter;
use serde::Serialize;

/// Application shared state.
pub struct AppState {
    /// Persist-then-forward router over history and presence.
    pub relay: RelayRouter,
    /// Opaque token -> identity boundary with the external auth collaborator.
    pub auth: TokenRegistry,
    /// Upper bound on history page sizes.
    pub history_page_limit: u32,
}

/// Uniform REST response wrapper.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    /// Whether the request succeeded.
    pub success: bool,
    /// Payload on success.
    pub data: Option<T>,
    /// Description on failure.
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    /// A successful response carrying data.
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    /// A failed response carrying a description.
    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

/// Operational counters for `/api/admin/stats`.
#[derive(Debug, Serialize)]
pub struct StatsData {
    /// Total stored envelopes. All of them are ciphertext; the relay cannot
    /// read any of it.
    pub total_envelopes: u64,
    /// Identities with a live transport right now.
    pub present: usize,
}
