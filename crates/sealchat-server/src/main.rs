//! Sealchat relay server.
//!
//! Accepts authenticated WebSocket connections, relays handshake and
//! ciphertext traffic between parties, and persists every envelope before
//! attempting delivery. The server stores and routes only ciphertext.

use anyhow::Result;
use clap::Parser;
use sealchat_core::history::{HistoryConfig, HistoryStore};
use sealchat_core::presence::PresenceRegistry;
use sealchat_core::relay::RelayRouter;
use sealchat_server::auth::TokenRegistry;
use sealchat_server::models::AppState;
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

/// Sealchat relay - end-to-end encrypted message routing
#[derive(Parser)]
#[command(name = "sealchat-server")]
#[command(author, version, about)]
struct Args {
    /// Listen address
    #[arg(short, long, default_value = "127.0.0.1:5002")]
    listen: String,

    /// Path to the history database
    #[arg(long, default_value = "sealchat.db")]
    database: String,

    /// JSON file mapping identity tokens to identities
    #[arg(long)]
    tokens: Option<String>,

    /// Maximum envelopes returned per history page
    #[arg(long, default_value = "200")]
    history_page_limit: u32,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = if args.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let history = HistoryStore::open(&HistoryConfig {
        path: args.database.clone(),
        in_memory: false,
    })
    .map_err(|e| anyhow::anyhow!("failed to open history database: {}", e))?;

    let auth = match &args.tokens {
        Some(path) => TokenRegistry::from_file(path)?,
        None => {
            tracing::warn!("no --tokens file given; no connection can authenticate");
            TokenRegistry::new()
        }
    };

    let relay = RelayRouter::new(
        Arc::new(Mutex::new(history)),
        Arc::new(PresenceRegistry::new()),
    );
    let state = Arc::new(AppState {
        relay,
        auth,
        history_page_limit: args.history_page_limit,
    });

    let app = sealchat_server::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(&args.listen).await?;
    tracing::info!(
        address = %args.listen,
        database = %args.database,
        "sealchat relay started"
    );

    axum::serve(listener, app).await?;
    Ok(())
}
