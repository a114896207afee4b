//! End-to-end relay tests over real WebSocket connections.
//!
//! Each test binds an ephemeral port, runs the full server stack, and
//! drives it with tokio-tungstenite clients.

use banter_server::config::Config;
use banter_server::handlers::{serve, AppState};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

fn test_config() -> Config {
    let mut config = Config::default();
    config.host = "127.0.0.1".to_string();
    config.port = 0;
    config.metrics.enabled = false;
    config
}

async fn start_relay(config: Config) -> (SocketAddr, Arc<AppState>, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = Arc::new(AppState::new(config));
    let serve_state = state.clone();
    let task = tokio::spawn(async move {
        serve(listener, serve_state).await.unwrap();
    });
    (addr, state, task)
}

async fn connect(addr: SocketAddr) -> Client {
    let (client, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
    client
}

async fn send_json(client: &mut Client, value: Value) {
    client
        .send(Message::Text(value.to_string()))
        .await
        .unwrap();
}

async fn recv_json(client: &mut Client) -> Value {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .expect("timed out waiting for a message")
            .expect("stream ended")
            .expect("websocket error");
        match message {
            Message::Text(text) => return serde_json::from_str(&text).unwrap(),
            // tungstenite answers pings on our behalf; skip control frames
            _ => continue,
        }
    }
}

/// Assert that no text message arrives within the window.
async fn assert_silent(client: &mut Client, window: Duration) {
    let result = tokio::time::timeout(window, async {
        loop {
            match client.next().await {
                Some(Ok(Message::Text(text))) => return text,
                Some(Ok(_)) => continue,
                Some(Err(_)) | None => std::future::pending().await,
            }
        }
    })
    .await;
    if let Ok(text) = result {
        panic!("expected silence, received: {text}");
    }
}

async fn join(client: &mut Client, name: &str) {
    send_json(client, json!({"type": "join", "username": name})).await;
    assert_eq!(recv_json(client).await, json!({"type": "joined"}));
}

#[tokio::test]
async fn test_join_broadcasts_roster_to_everyone() {
    let (addr, _state, _task) = start_relay(test_config()).await;

    let mut alice = connect(addr).await;
    join(&mut alice, "alice").await;
    assert_eq!(
        recv_json(&mut alice).await,
        json!({"type": "user-list", "users": ["alice"], "count": 1})
    );

    let mut bob = connect(addr).await;
    join(&mut bob, "bob").await;
    let expected = json!({"type": "user-list", "users": ["alice", "bob"], "count": 2});
    assert_eq!(recv_json(&mut bob).await, expected);
    assert_eq!(recv_json(&mut alice).await, expected);
}

#[tokio::test]
async fn test_broadcast_and_direct_message() {
    let (addr, _state, _task) = start_relay(test_config()).await;

    let mut alice = connect(addr).await;
    join(&mut alice, "alice").await;
    recv_json(&mut alice).await; // roster ["alice"]

    let mut bob = connect(addr).await;
    join(&mut bob, "bob").await;
    recv_json(&mut bob).await; // roster ["alice","bob"]
    recv_json(&mut alice).await;

    // Broadcast: bob receives, alice (the author) does not get an echo.
    send_json(&mut alice, json!({"type": "chat-message", "text": "hi"})).await;
    let received = recv_json(&mut bob).await;
    assert_eq!(received["type"], "chat-message");
    assert_eq!(received["author"], "alice");
    assert_eq!(received["text"], "hi");
    assert!(received["timestamp"].is_u64());

    // Direct message: delivered to bob once, confirmed to alice once.
    send_json(
        &mut alice,
        json!({"type": "chat-message", "text": "hey", "recipient": "bob"}),
    )
    .await;
    let expected = json!({"type": "direct-message", "from": "alice", "text": "hey"});
    assert_eq!(recv_json(&mut bob).await, expected);
    assert_eq!(recv_json(&mut alice).await, expected);

    // Direct message to an unknown name: notice to the sender only.
    send_json(
        &mut alice,
        json!({"type": "chat-message", "text": "hello?", "recipient": "nobody"}),
    )
    .await;
    let notice = recv_json(&mut alice).await;
    assert_eq!(notice["type"], "system");
    assert_silent(&mut bob, Duration::from_millis(300)).await;
}

#[tokio::test]
async fn test_typing_indicators_skip_sender() {
    let (addr, _state, _task) = start_relay(test_config()).await;

    let mut alice = connect(addr).await;
    join(&mut alice, "alice").await;
    recv_json(&mut alice).await;

    let mut bob = connect(addr).await;
    join(&mut bob, "bob").await;
    recv_json(&mut bob).await;
    recv_json(&mut alice).await;

    send_json(&mut bob, json!({"type": "typing", "username": "bob"})).await;
    assert_eq!(
        recv_json(&mut alice).await,
        json!({"type": "typing", "username": "bob"})
    );

    send_json(&mut bob, json!({"type": "stop-typing", "username": "bob"})).await;
    assert_eq!(
        recv_json(&mut alice).await,
        json!({"type": "stop-typing", "username": "bob"})
    );
    assert_silent(&mut bob, Duration::from_millis(300)).await;
}

#[tokio::test]
async fn test_username_taken_until_owner_disconnects() {
    let (addr, _state, _task) = start_relay(test_config()).await;

    let mut alice = connect(addr).await;
    join(&mut alice, "alice").await;
    recv_json(&mut alice).await;

    let mut intruder = connect(addr).await;
    send_json(&mut intruder, json!({"type": "join", "username": "alice"})).await;
    assert_eq!(
        recv_json(&mut intruder).await,
        json!({"type": "username_taken"})
    );

    // The name frees up as soon as its owner disconnects.
    alice.close(None).await.unwrap();
    assert_eq!(
        recv_json(&mut intruder).await,
        json!({"type": "user-list", "users": [], "count": 0})
    );
    join(&mut intruder, "alice").await;
}

#[tokio::test]
async fn test_malformed_envelopes_do_not_kill_the_connection() {
    let (addr, _state, _task) = start_relay(test_config()).await;

    let mut alice = connect(addr).await;
    join(&mut alice, "alice").await;
    recv_json(&mut alice).await;

    let mut bob = connect(addr).await;
    join(&mut bob, "bob").await;
    recv_json(&mut bob).await;
    recv_json(&mut alice).await;

    alice
        .send(Message::Text("not json".to_string()))
        .await
        .unwrap();
    send_json(&mut alice, json!({"type": "warp", "to": "mars"})).await;
    alice
        .send(Message::Binary(vec![0xde, 0xad]))
        .await
        .unwrap();

    // The connection survived and still routes.
    send_json(&mut alice, json!({"type": "chat-message", "text": "still here"})).await;
    let received = recv_json(&mut bob).await;
    assert_eq!(received["text"], "still here");
}

#[tokio::test]
async fn test_unidentified_disconnect_is_silent() {
    let (addr, _state, _task) = start_relay(test_config()).await;

    let mut alice = connect(addr).await;
    join(&mut alice, "alice").await;
    recv_json(&mut alice).await;

    // Connects but never joins.
    let mut lurker = connect(addr).await;
    lurker.close(None).await.unwrap();

    // No roster broadcast for a connection that never identified.
    assert_silent(&mut alice, Duration::from_millis(300)).await;
}

#[tokio::test]
async fn test_unresponsive_connection_is_evicted() {
    let mut config = test_config();
    config.heartbeat.interval_ms = 100;
    config.heartbeat.timeout_ms = 100;
    let (addr, _state, _task) = start_relay(config).await;

    let mut alice = connect(addr).await;
    join(&mut alice, "alice").await;
    recv_json(&mut alice).await;

    let mut ghost = connect(addr).await;
    join(&mut ghost, "ghost").await;
    recv_json(&mut ghost).await;
    assert_eq!(
        recv_json(&mut alice).await,
        json!({"type": "user-list", "users": ["alice", "ghost"], "count": 2})
    );

    // The ghost keeps its socket open but stops reading, so it never
    // answers probes. alice keeps reading, which answers hers automatically.
    let _ghost = ghost;
    assert_eq!(
        recv_json(&mut alice).await,
        json!({"type": "user-list", "users": ["alice"], "count": 1})
    );

    // The evicted name is immediately available again.
    let mut replacement = connect(addr).await;
    join(&mut replacement, "ghost").await;
}

#[tokio::test]
async fn test_graceful_shutdown_closes_connections() {
    let (addr, state, task) = start_relay(test_config()).await;

    let mut alice = connect(addr).await;
    join(&mut alice, "alice").await;
    recv_json(&mut alice).await;

    state.shutdown();

    // The server closes the session and the accept loop winds down.
    let end = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match alice.next().await {
                Some(Ok(Message::Close(_))) | None => return,
                Some(Ok(_)) => continue,
                Some(Err(_)) => return,
            }
        }
    })
    .await;
    assert!(end.is_ok(), "client was not closed on shutdown");

    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("server did not stop")
        .unwrap();
}
