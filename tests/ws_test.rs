//! Integration tests for the agent upgrade endpoint: auth, frame-level
//! ping/pong, malformed frames, and registry cleanup on disconnect.

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use relay_server::state::AppState;

const TEST_API_KEY: &str = "test-api-key";
const AGENT_TOKEN: &str = "valid-token-user-1";
const USER_ID: &str = "user-1";

type AgentStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Start the gateway on a random port. Returns the shared state so tests can
/// observe the registry and pending table directly.
async fn start_test_server() -> (String, SocketAddr, AppState) {
    let state = AppState::new(Some(TEST_API_KEY.to_string()));
    let app = relay_server::routes::build_router(state.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{}", addr), addr, state)
}

async fn connect_agent(addr: SocketAddr) -> AgentStream {
    let ws_url = format!("ws://{}/v1/ws?auth_token={}", addr, AGENT_TOKEN);
    let (stream, _) = tokio_tungstenite::connect_async(&ws_url)
        .await
        .expect("Failed to connect agent");
    // Registration happens in the spawned connection task after the
    // handshake; give it a moment before asserting on the registry.
    tokio::time::sleep(Duration::from_millis(100)).await;
    stream
}

async fn send_frame(agent: &mut AgentStream, frame: serde_json::Value) {
    agent
        .send(Message::Text(frame.to_string().into()))
        .await
        .expect("Failed to send frame");
}

/// Read the next JSON frame, skipping transport-level control messages.
async fn next_json(agent: &mut AgentStream) -> Option<serde_json::Value> {
    loop {
        match agent.next().await? {
            Ok(Message::Text(text)) => return serde_json::from_str(&text).ok(),
            Ok(Message::Close(_)) => return None,
            Ok(_) => continue,
            Err(_) => return None,
        }
    }
}

#[tokio::test]
async fn test_agent_connects_with_valid_token() {
    let (_base_url, addr, state) = start_test_server().await;
    let mut agent = connect_agent(addr).await;

    // Registered and quiet: the server sends nothing unprompted.
    assert_eq!(state.registry.connection_count(USER_ID), 1);
    let result = tokio::time::timeout(Duration::from_millis(300), agent.next()).await;
    assert!(result.is_err(), "Expected no unsolicited message from server");
}

#[tokio::test]
async fn test_upgrade_rejected_without_token() {
    let (_base_url, addr, _state) = start_test_server().await;

    let ws_url = format!("ws://{}/v1/ws", addr);
    let err = tokio_tungstenite::connect_async(&ws_url)
        .await
        .expect_err("Upgrade without token should be rejected");
    match err {
        tokio_tungstenite::tungstenite::Error::Http(response) => {
            assert_eq!(response.status(), 401);
        }
        other => panic!("Expected HTTP 401 rejection, got: {:?}", other),
    }
}

#[tokio::test]
async fn test_upgrade_rejected_with_invalid_token() {
    let (_base_url, addr, _state) = start_test_server().await;

    let ws_url = format!("ws://{}/v1/ws?auth_token=wrong-token", addr);
    let err = tokio_tungstenite::connect_async(&ws_url)
        .await
        .expect_err("Upgrade with invalid token should be rejected");
    match err {
        tokio_tungstenite::tungstenite::Error::Http(response) => {
            assert_eq!(response.status(), 401);
        }
        other => panic!("Expected HTTP 401 rejection, got: {:?}", other),
    }
}

#[tokio::test]
async fn test_frame_ping_pong() {
    let (_base_url, addr, _state) = start_test_server().await;
    let mut agent = connect_agent(addr).await;

    send_frame(&mut agent, json!({"id": "p1", "type": "ping"})).await;

    let pong = tokio::time::timeout(Duration::from_secs(2), next_json(&mut agent))
        .await
        .expect("Expected pong within timeout")
        .expect("Expected pong frame");
    assert_eq!(pong["type"], "pong");
    assert_eq!(pong["id"], "p1");
}

#[tokio::test]
async fn test_malformed_frame_keeps_channel_open() {
    let (_base_url, addr, _state) = start_test_server().await;
    let mut agent = connect_agent(addr).await;

    agent
        .send(Message::Text("this is not json".to_string().into()))
        .await
        .expect("Failed to send garbage");

    // The channel survives and still answers pings.
    send_frame(&mut agent, json!({"id": "p2", "type": "ping"})).await;
    let pong = tokio::time::timeout(Duration::from_secs(2), next_json(&mut agent))
        .await
        .expect("Expected pong within timeout")
        .expect("Expected pong frame");
    assert_eq!(pong["type"], "pong");
    assert_eq!(pong["id"], "p2");
}

#[tokio::test]
async fn test_unknown_frame_type_is_ignored() {
    let (_base_url, addr, _state) = start_test_server().await;
    let mut agent = connect_agent(addr).await;

    send_frame(&mut agent, json!({"id": "x", "type": "telemetry", "payload": {}})).await;

    send_frame(&mut agent, json!({"id": "p3", "type": "ping"})).await;
    let pong = tokio::time::timeout(Duration::from_secs(2), next_json(&mut agent))
        .await
        .expect("Expected pong within timeout")
        .expect("Expected pong frame");
    assert_eq!(pong["id"], "p3");
}

#[tokio::test]
async fn test_registry_cleanup_on_disconnect() {
    let (base_url, addr, state) = start_test_server().await;

    let mut agent = connect_agent(addr).await;
    assert_eq!(state.registry.connection_count(USER_ID), 1);

    agent.close(None).await.expect("Failed to close");
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(state.registry.connection_count(USER_ID), 0);

    // With no agent left, proxy requests fail fast with 503.
    let client = reqwest::Client::new();
    let resp = client
        .get(format!("{}/v1beta/models", base_url))
        .header("x-goog-api-key", TEST_API_KEY)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 503);
}

#[tokio::test]
async fn test_multiple_agents_register_in_one_pool() {
    let (_base_url, addr, state) = start_test_server().await;

    let _agent_one = connect_agent(addr).await;
    let _agent_two = connect_agent(addr).await;
    assert_eq!(state.registry.connection_count(USER_ID), 2);
}
