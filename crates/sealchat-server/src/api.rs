//! WebSocket relay endpoint and REST read handlers.

use crate::models::{ApiResponse, AppState, StatsData};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use futures_util::{SinkExt, StreamExt};
use sealchat_core::crypto::Nonce;
use sealchat_core::identity::Identity;
use sealchat_core::presence::ClientSender;
use sealchat_core::protocol::{
    decode_hex_field, parse_public_key, ClientMessage, ServerMessage, WireEnvelope,
};
use sealchat_core::MAX_CIPHERTEXT_SIZE;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Outbound queue depth per connection; slow consumers drop pushes rather
/// than stall the relay.
const WS_OUTBOX_CAPACITY: usize = 64;

/// Maximum inbound frame size: hex encoding doubles the ciphertext budget,
/// plus JSON framing headroom.
const WS_MAX_TEXT_BYTES: usize = MAX_CIPHERTEXT_SIZE * 2 + 4096;

/// Default history page when the client names no limit.
const DEFAULT_HISTORY_LIMIT: u32 = 100;

/// Liveness probe.
pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// WebSocket endpoint. The identity token is verified before the upgrade;
/// unauthenticated connections never reach the relay core.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<HashMap<String, String>>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let Some(token) = params.get("token") else {
        return StatusCode::UNAUTHORIZED.into_response();
    };
    let Some(identity) = state.auth.verify(token).await else {
        warn!("websocket upgrade with unknown token rejected");
        return StatusCode::UNAUTHORIZED.into_response();
    };

    ws.max_message_size(WS_MAX_TEXT_BYTES)
        .on_upgrade(move |socket| handle_socket(socket, state, identity))
        .into_response()
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, identity: Identity) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut rx) = mpsc::channel::<ServerMessage>(WS_OUTBOX_CAPACITY);

    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let Ok(json) = serde_json::to_string(&message) else {
                continue;
            };
            if ws_tx.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
    });

    let presence = state.relay.presence();
    let (conn_id, superseded) = presence.connect(&identity, tx.clone()).await;
    let _ = tx
        .send(ServerMessage::Connected {
            identity: identity.clone(),
        })
        .await;
    match superseded {
        Some(old) => {
            // Silent swap: the peer stays online, observers see no flap. The
            // old socket gets one courtesy error before it winds down.
            let _ = old.try_send(ServerMessage::Error {
                message: "connection superseded by a newer connection".into(),
            });
        }
        None => {
            presence
                .broadcast(ServerMessage::PresenceChanged {
                    identity: identity.clone(),
                    online: true,
                })
                .await;
        }
    }
    info!(identity = %identity, "client connected");

    while let Some(frame) = ws_rx.next().await {
        let Ok(frame) = frame else { break };
        let text = match frame {
            Message::Text(text) => text,
            Message::Binary(_) => {
                send_error(&tx, "binary frames are not supported").await;
                continue;
            }
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => continue,
        };

        let message: ClientMessage = match serde_json::from_str(&text) {
            Ok(message) => message,
            Err(err) => {
                debug!(identity = %identity, error = %err, "unparseable frame");
                send_error(&tx, "invalid message").await;
                continue;
            }
        };

        dispatch(&state, &identity, &tx, message).await;
    }

    // A stale conn_id (this socket was superseded) is a no-op and must not
    // broadcast an offline flap for the successor.
    if presence.disconnect(&identity, conn_id).await {
        presence
            .broadcast(ServerMessage::PresenceChanged {
                identity: identity.clone(),
                online: false,
            })
            .await;
    }
    writer.abort();
    info!(identity = %identity, "client disconnected");
}

/// Exhaustive dispatch over every inbound message kind.
async fn dispatch(
    state: &Arc<AppState>,
    identity: &Identity,
    tx: &ClientSender,
    message: ClientMessage,
) {
    match message {
        ClientMessage::Initiate { to, public_key } => {
            handle_handshake(state, identity, tx, to, public_key, Handshake::Initiate).await;
        }
        ClientMessage::Accept { to, public_key } => {
            handle_handshake(state, identity, tx, to, public_key, Handshake::Accept).await;
        }
        ClientMessage::Send {
            to,
            ciphertext,
            nonce,
            tag,
        } => {
            handle_send(state, identity, tx, to, ciphertext, nonce, tag).await;
        }
        ClientMessage::HistoryRequest { peer, limit } => {
            handle_history(state, identity, tx, peer, limit).await;
        }
    }
}

enum Handshake {
    Initiate,
    Accept,
}

async fn handle_handshake(
    state: &Arc<AppState>,
    identity: &Identity,
    tx: &ClientSender,
    to: Identity,
    public_key: String,
    kind: Handshake,
) {
    if to == *identity {
        send_error(tx, "cannot open a session with yourself").await;
        return;
    }
    // The relay routes handshakes blindly, but a key it cannot even parse
    // would poison the peer; reject it here.
    if let Err(err) = parse_public_key(&public_key) {
        debug!(identity = %identity, error = %err, "rejected handshake key");
        send_error(tx, "invalid public key").await;
        return;
    }

    let outbound = match kind {
        Handshake::Initiate => ServerMessage::Initiate {
            from: identity.clone(),
            public_key,
        },
        Handshake::Accept => ServerMessage::Accept {
            from: identity.clone(),
            public_key,
        },
    };

    // Peer offline is a normal silent branch; the handshake is retried by
    // whichever side reconnects first.
    state.relay.forward_handshake(&to, outbound).await;
    state.relay.presence().touch(identity).await;
}

async fn handle_send(
    state: &Arc<AppState>,
    identity: &Identity,
    tx: &ClientSender,
    to: Identity,
    ciphertext: String,
    nonce: String,
    tag: Option<String>,
) {
    if to == *identity {
        send_error(tx, "cannot send to yourself").await;
        return;
    }

    let ciphertext = match decode_hex_field("ciphertext", &ciphertext) {
        Ok(bytes) => bytes,
        Err(_) => {
            send_error(tx, "invalid ciphertext encoding").await;
            return;
        }
    };
    if ciphertext.len() > MAX_CIPHERTEXT_SIZE {
        send_error(tx, "message too large").await;
        return;
    }
    let nonce = match decode_hex_field("nonce", &nonce).and_then(|b| Nonce::from_slice(&b)) {
        Ok(nonce) => nonce,
        Err(_) => {
            send_error(tx, "invalid nonce").await;
            return;
        }
    };
    let tag = match tag.as_deref().map(|t| decode_hex_field("tag", t)).transpose() {
        Ok(tag) => tag,
        Err(_) => {
            send_error(tx, "invalid tag encoding").await;
            return;
        }
    };

    match state
        .relay
        .send(identity, &to, ciphertext, nonce.as_bytes().to_vec(), tag)
        .await
    {
        Ok(envelope) => {
            let _ = tx
                .send(ServerMessage::Sent {
                    message_id: envelope.message_id.to_hex(),
                })
                .await;
        }
        Err(err) => {
            // Persistence failure: surfaced to the sender, nothing delivered,
            // retry is the caller's decision.
            warn!(identity = %identity, error = %err, "failed to persist envelope");
            send_error(tx, "failed to persist message").await;
        }
    }
}

async fn handle_history(
    state: &Arc<AppState>,
    identity: &Identity,
    tx: &ClientSender,
    peer: Identity,
    limit: Option<u32>,
) {
    let limit = limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .min(state.history_page_limit);

    match state.relay.history_between(identity, &peer, limit).await {
        Ok(envelopes) => {
            let envelopes = envelopes.iter().map(WireEnvelope::from).collect();
            let _ = tx
                .send(ServerMessage::HistoryResponse { peer, envelopes })
                .await;
        }
        Err(err) => {
            warn!(identity = %identity, error = %err, "history fetch failed");
            send_error(tx, "failed to load history").await;
        }
    }
}

async fn send_error(tx: &ClientSender, message: &str) {
    let _ = tx
        .send(ServerMessage::Error {
            message: message.to_string(),
        })
        .await;
}

fn parse_limit(params: &HashMap<String, String>, cap: u32) -> u32 {
    params
        .get("limit")
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .min(cap)
}

/// `between` read surface for the external CRUD layer. Administrative
/// inspection never returns plaintext: none is ever stored.
pub async fn history_between(
    State(state): State<Arc<AppState>>,
    Path((peer_a, peer_b)): Path<(String, String)>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<ApiResponse<Vec<WireEnvelope>>> {
    let (a, b) = match (Identity::new(peer_a), Identity::new(peer_b)) {
        (Ok(a), Ok(b)) => (a, b),
        _ => return Json(ApiResponse::err("invalid identity")),
    };
    let limit = parse_limit(&params, state.history_page_limit);

    match state.relay.history_between(&a, &b, limit).await {
        Ok(envelopes) => Json(ApiResponse::ok(
            envelopes.iter().map(WireEnvelope::from).collect(),
        )),
        Err(err) => {
            warn!(error = %err, "history query failed");
            Json(ApiResponse::err("failed to load history"))
        }
    }
}

/// Most recent envelopes across all conversations, for operational
/// inspection.
pub async fn admin_envelopes(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<ApiResponse<Vec<WireEnvelope>>> {
    let limit = parse_limit(&params, state.history_page_limit);

    match state.relay.history_recent(limit).await {
        Ok(envelopes) => Json(ApiResponse::ok(
            envelopes.iter().map(WireEnvelope::from).collect(),
        )),
        Err(err) => {
            warn!(error = %err, "recent envelopes query failed");
            Json(ApiResponse::err("failed to load envelopes"))
        }
    }
}

/// Operational counters.
pub async fn admin_stats(State(state): State<Arc<AppState>>) -> Json<ApiResponse<StatsData>> {
    let present = state.relay.presence().list_present().await.len();
    match state.relay.message_count().await {
        Ok(total_envelopes) => Json(ApiResponse::ok(StatsData {
            total_envelopes,
            present,
        })),
        Err(err) => {
            warn!(error = %err, "stats query failed");
            Json(ApiResponse::err("failed to load stats"))
        }
    }
}

/// Identities currently connected to this relay.
pub async fn presence_list(State(state): State<Arc<AppState>>) -> Json<ApiResponse<Vec<String>>> {
    let present = state
        .relay
        .presence()
        .list_present()
        .await
        .into_iter()
        .map(|identity| identity.as_str().to_string())
        .collect();
    Json(ApiResponse::ok(present))
}
