//! End-to-end tests against a real server on a loopback port.

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tandem_core::repository::ConversationRepository;
use tandem_core::MatchStatus;
use tandem_server::{AppState, Config};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WAIT: Duration = Duration::from_secs(2);

async fn spawn_server() -> (SocketAddr, Arc<AppState>) {
    spawn_server_with(|_| {}).await
}

async fn spawn_server_with(configure: impl FnOnce(&mut Config)) -> (SocketAddr, Arc<AppState>) {
    let mut config = Config::default();
    config.metrics.enabled = false;
    config.auth.allowed_origins = vec!["https://app.example.com".to_string()];
    config.auth.tokens = HashMap::from([
        ("t-alice".to_string(), "alice".to_string()),
        ("t-bob".to_string(), "bob".to_string()),
    ]);
    configure(&mut config);

    let state = tandem_server::start(config);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server_state = state.clone();
    tokio::spawn(async move {
        tandem_server::serve(listener, server_state, std::future::pending())
            .await
            .unwrap();
    });

    (addr, state)
}

/// Create an accepted match between alice and bob and return the
/// conversation id.
async fn seed_conversation(state: &AppState) -> String {
    let record = state.matches.propose("alice", "bob").await.unwrap();
    state
        .matches
        .request_change(&record.id, MatchStatus::Accepted)
        .await
        .unwrap();
    state
        .store
        .select_conversations_by_user_id("alice")
        .await
        .unwrap()
        .remove(0)
        .id
}

async fn connect(addr: SocketAddr, token: &str) -> Client {
    let (ws, _) = connect_async(format!("ws://{}/ws?token={}", addr, token))
        .await
        .unwrap();
    ws
}

async fn wait_until(mut check: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not met in time");
}

/// Read frames until one with `action` arrives, skipping everything else.
async fn recv_action(ws: &mut Client, action: &str) -> Value {
    tokio::time::timeout(WAIT, async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => {
                    let frame: Value = serde_json::from_str(&text).unwrap();
                    if frame["action"] == action {
                        return frame;
                    }
                }
                Some(Ok(_)) => continue,
                other => panic!("connection ended while waiting for {}: {:?}", action, other),
            }
        }
    })
    .await
    .expect("frame not received in time")
}

/// Assert no frame with `action` arrives within a short window.
async fn expect_no_action(ws: &mut Client, action: &str) {
    let _ = tokio::time::timeout(Duration::from_millis(300), async {
        while let Some(Ok(message)) = ws.next().await {
            if let Message::Text(text) = message {
                let frame: Value = serde_json::from_str(&text).unwrap();
                assert_ne!(frame["action"], action, "unexpected {} frame", action);
            }
        }
    })
    .await;
}

/// Wait for the server to close the socket.
async fn expect_closed(ws: &mut Client) {
    tokio::time::timeout(WAIT, async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await
    .expect("socket was not closed");
}

#[tokio::test]
async fn test_typing_is_relayed_to_other_party_only() {
    let (addr, state) = spawn_server().await;
    let conv_id = seed_conversation(&state).await;

    let mut alice = connect(addr, "t-alice").await;
    let mut bob = connect(addr, "t-bob").await;
    wait_until(|| state.registry.len() == 2).await;

    let inbound = serde_json::json!({"action": "onTypingStart", "payload": conv_id});
    alice
        .send(Message::Text(inbound.to_string()))
        .await
        .unwrap();

    let frame = recv_action(&mut bob, "onTypingStart").await;
    assert_eq!(frame["data"]["convId"], conv_id.as_str());

    expect_no_action(&mut alice, "onTypingStart").await;
}

#[tokio::test]
async fn test_bad_token_is_unauthorized() {
    let (addr, state) = spawn_server().await;

    let err = connect_async(format!("ws://{}/ws?token=t-mallory", addr))
        .await
        .unwrap_err();
    match err {
        WsError::Http(response) => assert_eq!(response.status().as_u16(), 401),
        other => panic!("expected HTTP 401, got {:?}", other),
    }
    assert!(state.registry.is_empty());
}

#[tokio::test]
async fn test_foreign_origin_is_forbidden() {
    let (addr, _state) = spawn_server().await;

    let mut request = format!("ws://{}/ws?token=t-alice", addr)
        .into_client_request()
        .unwrap();
    request
        .headers_mut()
        .insert("Origin", "https://evil.example.com".parse().unwrap());

    match connect_async(request).await.unwrap_err() {
        WsError::Http(response) => assert_eq!(response.status().as_u16(), 403),
        other => panic!("expected HTTP 403, got {:?}", other),
    }
}

#[tokio::test]
async fn test_bearer_header_and_allowed_origin() {
    let (addr, state) = spawn_server().await;

    let mut request = format!("ws://{}/ws", addr).into_client_request().unwrap();
    request
        .headers_mut()
        .insert("Authorization", "Bearer t-bob".parse().unwrap());
    request
        .headers_mut()
        .insert("Origin", "https://app.example.com".parse().unwrap());

    let (_bob, _) = connect_async(request).await.unwrap();
    wait_until(|| state.registry.is_connected("bob")).await;
}

#[tokio::test]
async fn test_reveal_fans_out_to_both_parties() {
    let (addr, state) = spawn_server().await;
    seed_conversation(&state).await;
    let record_id = state
        .store
        .select_conversations_by_user_id("bob")
        .await
        .unwrap()[0]
        .match_id
        .clone();

    let mut alice = connect(addr, "t-alice").await;
    let mut bob = connect(addr, "t-bob").await;
    wait_until(|| state.registry.len() == 2).await;

    state
        .matches
        .reveal_change(&record_id, MatchStatus::Requested)
        .await
        .unwrap();

    for ws in [&mut alice, &mut bob] {
        let frame = recv_action(ws, "onMatchRevealed").await;
        assert_eq!(frame["data"]["match"]["id"], record_id.as_str());
        assert_eq!(frame["data"]["match"]["revealStatus"], "requested");
    }
}

#[tokio::test]
async fn test_presence_reaches_counterpart() {
    let (addr, state) = spawn_server().await;
    seed_conversation(&state).await;

    let mut alice = connect(addr, "t-alice").await;
    wait_until(|| state.registry.is_connected("alice")).await;
    let _bob = connect(addr, "t-bob").await;

    let frame = recv_action(&mut alice, "onPresenceChanged").await;
    assert_eq!(frame["data"]["presence"]["userId"], "bob");
    assert_eq!(frame["data"]["presence"]["isOnline"], true);
}

#[tokio::test]
async fn test_leaving_cleans_up() {
    let (addr, state) = spawn_server().await;

    let mut alice = connect(addr, "t-alice").await;
    wait_until(|| state.registry.is_connected("alice")).await;

    alice
        .send(Message::Text(r#"{"action":"onLeaving"}"#.to_string()))
        .await
        .unwrap();
    expect_closed(&mut alice).await;

    wait_until(|| state.registry.is_empty()).await;
    tokio::time::timeout(WAIT, async {
        while state.presence.get("alice").await.unwrap().is_online {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("alice still online");
}

#[tokio::test]
async fn test_unknown_action_closes_connection() {
    let (addr, state) = spawn_server().await;

    let mut alice = connect(addr, "t-alice").await;
    wait_until(|| state.registry.is_connected("alice")).await;

    alice
        .send(Message::Text(r#"{"action":"onDance","payload":"x"}"#.to_string()))
        .await
        .unwrap();
    expect_closed(&mut alice).await;
    wait_until(|| !state.registry.is_connected("alice")).await;
}

#[tokio::test]
async fn test_oversized_frame_closes_connection() {
    let (addr, state) = spawn_server_with(|config| config.limits.max_message_size = 1024).await;

    let mut alice = connect(addr, "t-alice").await;
    wait_until(|| state.registry.is_connected("alice")).await;

    let payload = "x".repeat(4096);
    let inbound = serde_json::json!({"action": "onTypingStart", "payload": payload});
    // The server may drop the socket before the write completes
    let _ = alice.send(Message::Text(inbound.to_string())).await;

    expect_closed(&mut alice).await;
    wait_until(|| !state.registry.is_connected("alice")).await;
}

#[tokio::test]
async fn test_capacity_rejects_new_users_but_not_reconnects() {
    let (addr, state) = spawn_server_with(|config| config.limits.max_connections = 1).await;

    let mut alice = connect(addr, "t-alice").await;
    wait_until(|| state.registry.is_connected("alice")).await;

    match connect_async(format!("ws://{}/ws?token=t-bob", addr))
        .await
        .unwrap_err()
    {
        WsError::Http(response) => assert_eq!(response.status().as_u16(), 503),
        other => panic!("expected HTTP 503, got {:?}", other),
    }

    // The displaced session gives its slot back once it has closed
    let _again = connect(addr, "t-alice").await;
    expect_closed(&mut alice).await;
    wait_until(|| state.registry.len() == 1 && state.slots.active() == 1).await;
}

#[tokio::test]
async fn test_reconnect_replaces_old_socket() {
    let (addr, state) = spawn_server().await;

    let mut first = connect(addr, "t-alice").await;
    wait_until(|| state.registry.is_connected("alice")).await;
    let first_id = state.registry.connection_of("alice").unwrap().id().clone();

    let _second = connect(addr, "t-alice").await;
    wait_until(|| {
        state
            .registry
            .connection_of("alice")
            .is_some_and(|c| c.id() != &first_id)
    })
    .await;

    // The displaced socket is closed, and its cleanup keeps alice online
    expect_closed(&mut first).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(state.registry.len(), 1);
    assert!(state.registry.is_consistent());
    assert!(state.presence.get("alice").await.unwrap().is_online);
}

#[tokio::test]
async fn test_health_endpoint() {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let (addr, _state) = spawn_server().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"GET /health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();

    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    assert!(response.starts_with("HTTP/1.1 200"));
    assert!(response.contains(r#""status":"ok""#));
}
