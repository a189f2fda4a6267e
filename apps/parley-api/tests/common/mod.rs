#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use futures_util::{SinkExt, StreamExt};
use http::header::COOKIE;
use http::HeaderValue;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use parley_api::auth::session::{issue_session, COOKIE_NAME};
use parley_api::bridge::memory_bus::MemoryBus;
use parley_api::bridge::EventBus;
use parley_api::config::{Config, GatewayConfig};
use parley_api::db::kv::MemoryStore;
use parley_api::db::relations::MemoryRelationStore;
use parley_api::gateway::events::ServerEvent;
use parley_api::gateway::session::SessionHandle;
use parley_api::AppState;

pub const TEST_SECRET: &str = "test-secret-do-not-use-in-production";

pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Users, guild and channel most tests start from:
/// alice (`usr_a`) and bob (`usr_b`) are both in `gld_1`, which has the
/// public channel `ch_1`.
pub fn seeded_relations() -> Arc<MemoryRelationStore> {
    let relations = Arc::new(MemoryRelationStore::new());
    relations.add_user("usr_a", "alice");
    relations.add_user("usr_b", "bob");
    relations.add_guild_member("gld_1", "usr_a");
    relations.add_guild_member("gld_1", "usr_b");
    relations.add_channel("ch_1", Some("gld_1"), true);
    relations
}

/// Build an AppState backed by in-memory stores and a running gateway on
/// the given bus.
pub fn test_state_on(relations: Arc<MemoryRelationStore>, bus: Arc<dyn EventBus>) -> AppState {
    test_state_with(relations, bus, GatewayConfig::default())
}

/// Same, with custom gateway timings.
pub fn test_state_with(
    relations: Arc<MemoryRelationStore>,
    bus: Arc<dyn EventBus>,
    gateway: GatewayConfig,
) -> AppState {
    let mut config = Config::for_tests(TEST_SECRET);
    config.gateway = gateway;
    let gateway = parley_api::gateway::spawn(&config.gateway, relations.clone(), bus);

    AppState {
        kv: Arc::new(MemoryStore::new()),
        relations,
        config: Arc::new(config),
        hub: gateway.hub,
        emitter: gateway.emitter,
    }
}

pub fn test_state(relations: Arc<MemoryRelationStore>) -> AppState {
    test_state_on(relations, Arc::new(MemoryBus::new()))
}

/// Build the full application router wired to the test state.
pub fn test_app(state: &AppState) -> Router {
    parley_api::routes::router().with_state(state.clone())
}

/// Start an actual TCP server for WebSocket testing. The server runs in the
/// background.
pub async fn start_ws_server(state: &AppState) -> SocketAddr {
    let app = test_app(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    addr
}

/// Sign a session for `user_id` and return the cookie value.
pub async fn login(state: &AppState, user_id: &str) -> String {
    issue_session(state.kv.as_ref(), &state.config.secret, user_id)
        .await
        .expect("issue session")
}

/// Connect to `/ws` presenting the session cookie.
pub async fn connect_ws(addr: SocketAddr, cookie: &str) -> WsClient {
    let mut request = format!("ws://{addr}/ws")
        .into_client_request()
        .expect("request");
    request.headers_mut().insert(
        COOKIE,
        HeaderValue::from_str(&format!("{COOKIE_NAME}={cookie}")).expect("cookie header"),
    );

    let (ws, _) = tokio_tungstenite::connect_async(request)
        .await
        .expect("ws connect");
    ws
}

pub async fn send_action(ws: &mut WsClient, frame: Value) {
    ws.send(Message::Text(frame.to_string().into()))
        .await
        .expect("send frame");
}

/// Read frames until one carries one of `actions`; anything else (presence
/// noise, pings) is skipped.
pub async fn next_of(ws: &mut WsClient, actions: &[&str]) -> Value {
    let deadline = time::Instant::now() + Duration::from_secs(5);
    loop {
        let msg = time::timeout_at(deadline, ws.next())
            .await
            .unwrap_or_else(|_| panic!("timeout waiting for {actions:?}"))
            .expect("stream ended")
            .expect("ws read error");

        let Message::Text(text) = msg else {
            continue;
        };
        let frame: Value = serde_json::from_str(&text).expect("parse frame");
        if actions.iter().any(|a| frame["action"] == *a) {
            return frame;
        }
    }
}

pub async fn next_action(ws: &mut WsClient, action: &str) -> Value {
    next_of(ws, &[action]).await
}

/// Round-trip a `getRequestCount`. Frames from one connection are handled
/// in order, so once the reply arrives every earlier frame has reached the
/// hub.
pub async fn sync(ws: &mut WsClient) -> Value {
    send_action(ws, serde_json::json!({"action": "getRequestCount"})).await;
    next_action(ws, "requestCount").await
}

// ---------------------------------------------------------------------------
// In-process sessions
// ---------------------------------------------------------------------------

pub fn session(user_id: &str, username: &str) -> (SessionHandle, mpsc::Receiver<Arc<ServerEvent>>) {
    SessionHandle::new(user_id, username, 16)
}

pub async fn recv(rx: &mut mpsc::Receiver<Arc<ServerEvent>>) -> ServerEvent {
    let event = time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timeout waiting for event")
        .expect("session queue closed");
    (*event).clone()
}

/// Give background tasks (presence announcer, bridge) a moment, then assert
/// nothing more arrived.
pub async fn assert_quiet(rx: &mut mpsc::Receiver<Arc<ServerEvent>>) {
    time::sleep(Duration::from_millis(100)).await;
    if let Ok(event) = rx.try_recv() {
        panic!("unexpected event: {event:?}");
    }
}

pub async fn wait_for_subscribers(bus: &MemoryBus, n: usize) {
    for _ in 0..200 {
        if bus.subscriber_count() >= n {
            return;
        }
        time::sleep(Duration::from_millis(10)).await;
    }
    panic!("bus listeners never subscribed");
}
