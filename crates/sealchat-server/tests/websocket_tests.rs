//! Full-stack integration tests for the relay server.
//!
//! Tests cover:
//! - WebSocket authentication at the upgrade boundary
//! - The complete handshake + encrypted message flow between two clients
//! - Offline delivery via history fetch and session restoration
//! - Presence broadcasts and silent connection supersession
//! - Self-send rejection and malformed-frame handling
//! - The REST read surface over the history store

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::Mutex;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use sealchat_core::history::{HistoryConfig, HistoryStore};
use sealchat_core::identity::Identity;
use sealchat_core::presence::PresenceRegistry;
use sealchat_core::protocol::{parse_public_key, ClientMessage, ServerMessage};
use sealchat_core::relay::RelayRouter;
use sealchat_core::session::{MemorySessionStore, SessionManager, SessionState};

use sealchat_server::auth::TokenRegistry;
use sealchat_server::models::AppState;

// ========================================
// Test Helpers
// ========================================

type WsTx = futures_util::stream::SplitSink<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
    Message,
>;
type WsRx = futures_util::stream::SplitStream<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
>;

fn identity(s: &str) -> Identity {
    Identity::new(s).expect("valid identity")
}

/// Create an AppState over an in-memory history store.
fn test_app_state() -> Arc<AppState> {
    let history = HistoryStore::open(&HistoryConfig {
        path: String::new(),
        in_memory: true,
    })
    .expect("should open in-memory history");

    Arc::new(AppState {
        relay: RelayRouter::new(
            Arc::new(Mutex::new(history)),
            Arc::new(PresenceRegistry::new()),
        ),
        auth: TokenRegistry::new(),
        history_page_limit: 200,
    })
}

async fn register_token(state: &AppState, token: &str, id: &str) -> Identity {
    let id = identity(id);
    state.auth.register(token, id.clone()).await;
    id
}

/// Start a test server and return the address it's listening on.
async fn start_test_server(router: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind to random port");
    let addr = listener.local_addr().expect("get local addr");
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("serve");
    });
    addr
}

async fn ws_connect(addr: SocketAddr, token: &str) -> (WsTx, WsRx) {
    let url = format!("ws://{}/api/ws?token={}", addr, token);
    let (stream, _response) = connect_async(&url)
        .await
        .expect("WebSocket connect should succeed");
    stream.split()
}

/// Read the next server message, with a timeout so a missing push fails the
/// test instead of hanging it.
async fn read_ws_msg(rx: &mut WsRx) -> ServerMessage {
    let msg = tokio::time::timeout(std::time::Duration::from_secs(5), rx.next())
        .await
        .expect("should receive message within timeout")
        .expect("stream should not end")
        .expect("message should be ok");

    match msg {
        Message::Text(text) => serde_json::from_str(&text).expect("should be valid JSON"),
        other => panic!("expected text message, got: {:?}", other),
    }
}

async fn send_ws_msg(tx: &mut WsTx, msg: &ClientMessage) {
    let json = serde_json::to_string(msg).expect("serialize");
    tx.send(Message::Text(json)).await.expect("send");
}

/// Connect and consume the `connected` + own `presence_changed` frames.
async fn connect_ready(addr: SocketAddr, token: &str, expected: &Identity) -> (WsTx, WsRx) {
    let (tx, mut rx) = ws_connect(addr, token).await;

    match read_ws_msg(&mut rx).await {
        ServerMessage::Connected { identity } => assert_eq!(&identity, expected),
        other => panic!("expected connected, got {:?}", other),
    }
    match read_ws_msg(&mut rx).await {
        ServerMessage::PresenceChanged { identity, online } => {
            assert_eq!(&identity, expected);
            assert!(online);
        }
        other => panic!("expected own presence_changed, got {:?}", other),
    }
    (tx, rx)
}

// ========================================
// Connection & authentication
// ========================================

#[tokio::test]
async fn test_ws_connect_with_valid_token() {
    let state = test_app_state();
    let u1 = register_token(&state, "tok-1", "u1").await;
    let addr = start_test_server(sealchat_server::router(state)).await;

    let (_tx, mut rx) = ws_connect(addr, "tok-1").await;
    match read_ws_msg(&mut rx).await {
        ServerMessage::Connected { identity } => assert_eq!(identity, u1),
        other => panic!("expected connected, got {:?}", other),
    }
}

#[tokio::test]
async fn test_ws_reject_unknown_token() {
    let state = test_app_state();
    let addr = start_test_server(sealchat_server::router(state)).await;

    let url = format!("ws://{}/api/ws?token=unknown-token", addr);
    assert!(
        connect_async(&url).await.is_err(),
        "WebSocket with unknown token should fail"
    );
}

#[tokio::test]
async fn test_ws_reject_missing_token() {
    let state = test_app_state();
    let addr = start_test_server(sealchat_server::router(state)).await;

    let url = format!("ws://{}/api/ws", addr);
    assert!(
        connect_async(&url).await.is_err(),
        "WebSocket without token should fail"
    );
}

// ========================================
// Handshake + encrypted message flow
// ========================================

#[tokio::test]
async fn test_full_handshake_and_message_flow() {
    let state = test_app_state();
    let u1 = register_token(&state, "tok-1", "u1").await;
    let u2 = register_token(&state, "tok-2", "u2").await;
    let addr = start_test_server(sealchat_server::router(state)).await;

    let (mut tx1, mut rx1) = connect_ready(addr, "tok-1", &u1).await;
    let (mut tx2, mut rx2) = connect_ready(addr, "tok-2", &u2).await;

    // u1 observes u2 coming online.
    match read_ws_msg(&mut rx1).await {
        ServerMessage::PresenceChanged { identity, online } => {
            assert_eq!(identity, u2);
            assert!(online);
        }
        other => panic!("expected presence_changed, got {:?}", other),
    }

    // Client-side session state, persisted per party.
    let store1 = MemorySessionStore::new();
    let store2 = MemorySessionStore::new();
    let mut session1 = SessionManager::new(u1.clone(), &store1);
    let mut session2 = SessionManager::new(u2.clone(), &store2);

    // u1 initiates through the relay.
    let init_key = session1.initiate(&u2).expect("initiate");
    send_ws_msg(
        &mut tx1,
        &ClientMessage::Initiate {
            to: u2.clone(),
            public_key: hex::encode(init_key.as_bytes()),
        },
    )
    .await;

    // u2 receives the initiate, derives its key, replies with accept.
    let accept_key = match read_ws_msg(&mut rx2).await {
        ServerMessage::Initiate { from, public_key } => {
            assert_eq!(from, u1);
            let peer_key = parse_public_key(&public_key).expect("peer key");
            session2.on_initiate(&u1, peer_key).expect("on_initiate")
        }
        other => panic!("expected initiate, got {:?}", other),
    };
    assert_eq!(session2.state(&u1), SessionState::Established);
    send_ws_msg(
        &mut tx2,
        &ClientMessage::Accept {
            to: u1.clone(),
            public_key: hex::encode(accept_key.as_bytes()),
        },
    )
    .await;

    // u1 receives the accept and derives the same key.
    match read_ws_msg(&mut rx1).await {
        ServerMessage::Accept { from, public_key } => {
            assert_eq!(from, u2);
            let peer_key = parse_public_key(&public_key).expect("peer key");
            session1.on_accept(&u2, peer_key).expect("on_accept");
        }
        other => panic!("expected accept, got {:?}", other),
    }
    assert_eq!(session1.state(&u2), SessionState::Established);

    // u1 encrypts "hi" and relays it.
    let (ciphertext, nonce) = session1
        .session(&u2)
        .expect("session")
        .encrypt(b"hi")
        .expect("encrypt");
    send_ws_msg(
        &mut tx1,
        &ClientMessage::Send {
            to: u2.clone(),
            ciphertext: hex::encode(&ciphertext),
            nonce: hex::encode(nonce.as_bytes()),
            tag: None,
        },
    )
    .await;

    // u1 gets the storage acknowledgment with the assigned id.
    let message_id = match read_ws_msg(&mut rx1).await {
        ServerMessage::Sent { message_id } => message_id,
        other => panic!("expected sent, got {:?}", other),
    };
    assert_eq!(message_id.len(), 32);

    // u2 receives exactly one deliver matching the envelope and decrypts it.
    match read_ws_msg(&mut rx2).await {
        ServerMessage::Deliver {
            from,
            message_id: delivered_id,
            ciphertext: delivered_ciphertext,
            nonce: delivered_nonce,
            tag,
            ..
        } => {
            assert_eq!(from, u1);
            assert_eq!(delivered_id, message_id);
            assert_eq!(delivered_ciphertext, hex::encode(&ciphertext));
            assert!(tag.is_none());

            let plaintext = session2
                .session(&u1)
                .expect("session")
                .decrypt(
                    &hex::decode(&delivered_ciphertext).expect("hex"),
                    &sealchat_core::crypto::Nonce::from_slice(
                        &hex::decode(&delivered_nonce).expect("hex"),
                    )
                    .expect("nonce"),
                    None,
                )
                .expect("decrypt");
            assert_eq!(&*plaintext, b"hi");
        }
        other => panic!("expected deliver, got {:?}", other),
    }
}

#[tokio::test]
async fn test_offline_send_recovered_via_history() {
    let state = test_app_state();
    let u1 = register_token(&state, "tok-1", "u1").await;
    let u2 = register_token(&state, "tok-2", "u2").await;
    let addr = start_test_server(sealchat_server::router(state)).await;

    let store1 = MemorySessionStore::new();
    let store2 = MemorySessionStore::new();
    let mut session1 = SessionManager::new(u1.clone(), &store1);

    // First visit: both online, handshake runs, then u2 goes away.
    {
        let (mut tx1, mut rx1) = connect_ready(addr, "tok-1", &u1).await;
        let (mut tx2, mut rx2) = connect_ready(addr, "tok-2", &u2).await;
        let _ = read_ws_msg(&mut rx1).await; // u2 online

        let mut session2 = SessionManager::new(u2.clone(), &store2);
        let init_key = session1.initiate(&u2).expect("initiate");
        send_ws_msg(
            &mut tx1,
            &ClientMessage::Initiate {
                to: u2.clone(),
                public_key: hex::encode(init_key.as_bytes()),
            },
        )
        .await;

        let accept_key = match read_ws_msg(&mut rx2).await {
            ServerMessage::Initiate { public_key, .. } => {
                let peer_key = parse_public_key(&public_key).expect("peer key");
                session2.on_initiate(&u1, peer_key).expect("on_initiate")
            }
            other => panic!("expected initiate, got {:?}", other),
        };
        send_ws_msg(
            &mut tx2,
            &ClientMessage::Accept {
                to: u1.clone(),
                public_key: hex::encode(accept_key.as_bytes()),
            },
        )
        .await;
        match read_ws_msg(&mut rx1).await {
            ServerMessage::Accept { public_key, .. } => {
                let peer_key = parse_public_key(&public_key).expect("peer key");
                session1.on_accept(&u2, peer_key).expect("on_accept");
            }
            other => panic!("expected accept, got {:?}", other),
        }

        tx2.send(Message::Close(None)).await.expect("close");
        // u1 observes u2 going offline.
        match read_ws_msg(&mut rx1).await {
            ServerMessage::PresenceChanged { identity, online } => {
                assert_eq!(identity, u2);
                assert!(!online);
            }
            other => panic!("expected presence_changed, got {:?}", other),
        }

        // Send while u2 is offline: persisted, not delivered.
        let (ciphertext, nonce) = session1
            .session(&u2)
            .expect("session")
            .encrypt(b"missed you")
            .expect("encrypt");
        send_ws_msg(
            &mut tx1,
            &ClientMessage::Send {
                to: u2.clone(),
                ciphertext: hex::encode(&ciphertext),
                nonce: hex::encode(nonce.as_bytes()),
                tag: None,
            },
        )
        .await;
        match read_ws_msg(&mut rx1).await {
            ServerMessage::Sent { .. } => {}
            other => panic!("expected sent, got {:?}", other),
        }
    }

    // u2 reconnects in a fresh process: session restored from persistence,
    // envelope recovered via history fetch.
    let (mut tx2, mut rx2) = ws_connect(addr, "tok-2").await;
    match read_ws_msg(&mut rx2).await {
        ServerMessage::Connected { identity } => assert_eq!(identity, u2),
        other => panic!("expected connected, got {:?}", other),
    }
    let mut session2 = SessionManager::new(u2.clone(), &store2);
    assert_eq!(session2.open(&u1).expect("open"), SessionState::Restored);

    send_ws_msg(
        &mut tx2,
        &ClientMessage::HistoryRequest {
            peer: u1.clone(),
            limit: None,
        },
    )
    .await;

    // Presence events from u1's old socket winding down may interleave here.
    let response = loop {
        match read_ws_msg(&mut rx2).await {
            ServerMessage::PresenceChanged { .. } => continue,
            other => break other,
        }
    };
    match response {
        ServerMessage::HistoryResponse { peer, envelopes } => {
            assert_eq!(peer, u1);
            assert_eq!(envelopes.len(), 1);
            let envelope = &envelopes[0];
            assert_eq!(envelope.from, u1);

            let plaintext = session2
                .session(&u1)
                .expect("restored session")
                .decrypt(
                    &envelope.ciphertext_bytes().expect("ciphertext"),
                    &envelope.nonce_bytes().expect("nonce"),
                    envelope.tag_bytes().expect("tag").as_deref(),
                )
                .expect("decrypt");
            assert_eq!(&*plaintext, b"missed you");
        }
        other => panic!("expected history_response, got {:?}", other),
    }
}

// ========================================
// Presence
// ========================================

#[tokio::test]
async fn test_presence_broadcasts_online_and_offline() {
    let state = test_app_state();
    let u1 = register_token(&state, "tok-1", "u1").await;
    let u2 = register_token(&state, "tok-2", "u2").await;
    let addr = start_test_server(sealchat_server::router(state)).await;

    let (_tx1, mut rx1) = connect_ready(addr, "tok-1", &u1).await;

    let (mut tx2, _rx2) = connect_ready(addr, "tok-2", &u2).await;
    match read_ws_msg(&mut rx1).await {
        ServerMessage::PresenceChanged { identity, online } => {
            assert_eq!(identity, u2);
            assert!(online);
        }
        other => panic!("expected presence_changed, got {:?}", other),
    }

    tx2.send(Message::Close(None)).await.expect("close");
    match read_ws_msg(&mut rx1).await {
        ServerMessage::PresenceChanged { identity, online } => {
            assert_eq!(identity, u2);
            assert!(!online);
        }
        other => panic!("expected presence_changed, got {:?}", other),
    }
}

#[tokio::test]
async fn test_superseding_connect_has_no_presence_flap() {
    let state = test_app_state();
    let u1 = register_token(&state, "tok-1", "u1").await;
    let u2 = register_token(&state, "tok-2", "u2").await;
    let u3 = register_token(&state, "tok-3", "u3").await;
    let addr = start_test_server(sealchat_server::router(state)).await;

    // u1 watches.
    let (_tx1, mut rx1) = connect_ready(addr, "tok-1", &u1).await;

    // u2 connects; u1 sees it come online once.
    let (_tx2_old, mut rx2_old) = connect_ready(addr, "tok-2", &u2).await;
    match read_ws_msg(&mut rx1).await {
        ServerMessage::PresenceChanged { identity, online } => {
            assert_eq!(identity, u2);
            assert!(online);
        }
        other => panic!("expected presence_changed, got {:?}", other),
    }

    // A second connection for u2 supersedes the first, silently.
    let (_tx2_new, mut rx2_new) = ws_connect(addr, "tok-2").await;
    match read_ws_msg(&mut rx2_new).await {
        ServerMessage::Connected { identity } => assert_eq!(identity, u2),
        other => panic!("expected connected, got {:?}", other),
    }

    // The superseded socket is told why it is going away.
    match read_ws_msg(&mut rx2_old).await {
        ServerMessage::Error { message } => assert!(message.contains("superseded")),
        other => panic!("expected error, got {:?}", other),
    }

    // u3 connects. If the supersession had leaked a presence flap, u1 would
    // see it before u3's online event.
    let (_tx3, _rx3) = connect_ready(addr, "tok-3", &u3).await;
    match read_ws_msg(&mut rx1).await {
        ServerMessage::PresenceChanged { identity, online } => {
            assert_eq!(identity, u3, "no presence event may leak from supersession");
            assert!(online);
        }
        other => panic!("expected presence_changed, got {:?}", other),
    }
}

// ========================================
// Boundary rejections
// ========================================

#[tokio::test]
async fn test_self_send_rejected() {
    let state = test_app_state();
    let u1 = register_token(&state, "tok-1", "u1").await;
    let addr = start_test_server(sealchat_server::router(state.clone())).await;

    let (mut tx1, mut rx1) = connect_ready(addr, "tok-1", &u1).await;

    send_ws_msg(
        &mut tx1,
        &ClientMessage::Send {
            to: u1.clone(),
            ciphertext: "aa".into(),
            nonce: "00".repeat(12),
            tag: None,
        },
    )
    .await;

    match read_ws_msg(&mut rx1).await {
        ServerMessage::Error { message } => assert!(message.contains("yourself")),
        other => panic!("expected error, got {:?}", other),
    }

    // Nothing was persisted.
    let stored = state
        .relay
        .history_between(&u1, &u1, 10)
        .await
        .expect("between");
    assert!(stored.is_empty());
}

#[tokio::test]
async fn test_malformed_frames_get_error_and_connection_survives() {
    let state = test_app_state();
    let u1 = register_token(&state, "tok-1", "u1").await;
    let addr = start_test_server(sealchat_server::router(state)).await;

    let (mut tx1, mut rx1) = connect_ready(addr, "tok-1", &u1).await;

    tx1.send(Message::Text("not json".into())).await.expect("send");
    match read_ws_msg(&mut rx1).await {
        ServerMessage::Error { message } => assert_eq!(message, "invalid message"),
        other => panic!("expected error, got {:?}", other),
    }

    // Bad hex in a send is a per-message failure, not a disconnect.
    send_ws_msg(
        &mut tx1,
        &ClientMessage::Send {
            to: identity("u2"),
            ciphertext: "zz".into(),
            nonce: "00".repeat(12),
            tag: None,
        },
    )
    .await;
    match read_ws_msg(&mut rx1).await {
        ServerMessage::Error { message } => assert!(message.contains("ciphertext")),
        other => panic!("expected error, got {:?}", other),
    }

    // The connection still works.
    send_ws_msg(
        &mut tx1,
        &ClientMessage::HistoryRequest {
            peer: identity("u2"),
            limit: Some(5),
        },
    )
    .await;
    match read_ws_msg(&mut rx1).await {
        ServerMessage::HistoryResponse { envelopes, .. } => assert!(envelopes.is_empty()),
        other => panic!("expected history_response, got {:?}", other),
    }
}

#[tokio::test]
async fn test_invalid_handshake_key_rejected() {
    let state = test_app_state();
    let u1 = register_token(&state, "tok-1", "u1").await;
    let addr = start_test_server(sealchat_server::router(state)).await;

    let (mut tx1, mut rx1) = connect_ready(addr, "tok-1", &u1).await;

    send_ws_msg(
        &mut tx1,
        &ClientMessage::Initiate {
            to: identity("u2"),
            public_key: "deadbeef".into(), // wrong length
        },
    )
    .await;

    match read_ws_msg(&mut rx1).await {
        ServerMessage::Error { message } => assert!(message.contains("public key")),
        other => panic!("expected error, got {:?}", other),
    }
}

// ========================================
// REST read surface
// ========================================

#[tokio::test]
async fn test_rest_history_and_stats() {
    let state = test_app_state();
    let u1 = register_token(&state, "tok-1", "u1").await;
    let u2 = register_token(&state, "tok-2", "u2").await;
    let addr = start_test_server(sealchat_server::router(state.clone())).await;

    state
        .relay
        .send(&u1, &u2, b"cipher-one".to_vec(), vec![1u8; 12], None)
        .await
        .expect("send");
    state
        .relay
        .send(&u2, &u1, b"cipher-two".to_vec(), vec![2u8; 12], Some(vec![3u8; 16]))
        .await
        .expect("send");

    // History between the pair is symmetric and oldest-first.
    let body = http_get_json(addr, "/api/history/u1/u2?limit=10").await;
    assert_eq!(body["success"], true);
    let envelopes = body["data"].as_array().expect("array");
    assert_eq!(envelopes.len(), 2);
    assert_eq!(envelopes[0]["ciphertext"], hex::encode(b"cipher-one"));
    assert_eq!(envelopes[1]["ciphertext"], hex::encode(b"cipher-two"));
    assert_eq!(envelopes[1]["tag"], hex::encode([3u8; 16]));

    let mirrored = http_get_json(addr, "/api/history/u2/u1?limit=10").await;
    assert_eq!(body["data"], mirrored["data"]);

    // Admin recency view is newest-first.
    let body = http_get_json(addr, "/api/admin/envelopes?limit=1").await;
    let envelopes = body["data"].as_array().expect("array");
    assert_eq!(envelopes.len(), 1);
    assert_eq!(envelopes[0]["ciphertext"], hex::encode(b"cipher-two"));

    // Stats counts stored envelopes.
    let body = http_get_json(addr, "/api/admin/stats").await;
    assert_eq!(body["data"]["total_envelopes"], 2);

    let body = http_get_json(addr, "/api/health").await;
    assert_eq!(body["status"], "ok");
}

/// Minimal HTTP GET returning the JSON body; enough for the read surface.
async fn http_get_json(addr: SocketAddr, path: &str) -> serde_json::Value {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let mut stream = tokio::net::TcpStream::connect(addr).await.expect("connect");
    let request = format!(
        "GET {} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
        path, addr
    );
    stream.write_all(request.as_bytes()).await.expect("write request");

    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.expect("read response");
    let response = String::from_utf8_lossy(&response);
    let body_start = response.find("\r\n\r\n").expect("header terminator") + 4;
    serde_json::from_str(&response[body_start..]).expect("json body")
}
