//! Sealchat relay server library.
//!
//! The relay terminates authenticated WebSocket connections, routes handshake
//! and ciphertext traffic between parties, and exposes a thin REST read
//! surface over the encrypted history store. It never sees plaintext.

pub mod api;
pub mod auth;
pub mod models;

use axum::routing::get;
use axum::Router;
use models::AppState;
use std::sync::Arc;

/// Build the relay's HTTP/WebSocket router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(api::health))
        .route("/api/ws", get(api::ws_handler))
        .route("/api/history/:peer_a/:peer_b", get(api::history_between))
        .route("/api/presence", get(api::presence_list))
        .route("/api/admin/envelopes", get(api::admin_envelopes))
        .route("/api/admin/stats", get(api::admin_stats))
        .with_state(state)
}
