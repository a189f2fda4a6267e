mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum_test::TestServer;
use futures_util::{SinkExt, StreamExt};
use http::{header, Request, StatusCode};
use serde_json::json;
use tokio_tungstenite::tungstenite::Message;
use tower::ServiceExt;

use parley_api::auth::session::{sign, COOKIE_NAME};
use parley_api::bridge::memory_bus::MemoryBus;
use parley_api::config::GatewayConfig;
use parley_api::gateway::events::ServerEvent;

#[tokio::test]
async fn health_check() {
    let state = common::test_state(common::seeded_relations());
    let server = TestServer::new(common::test_app(&state)).unwrap();

    let resp = server.get("/health").await;
    resp.assert_status_ok();
    resp.assert_json(&json!({"status": "ok"}));
}

// ---------------------------------------------------------------------------
// Handshake
// ---------------------------------------------------------------------------

fn upgrade_request(cookie: Option<String>) -> Request<Body> {
    let mut builder = Request::builder()
        .uri("/ws")
        .header(header::CONNECTION, "upgrade")
        .header(header::UPGRADE, "websocket")
        .header(header::SEC_WEBSOCKET_VERSION, "13")
        .header(header::SEC_WEBSOCKET_KEY, "dGhlIHNhbXBsZSBub25jZQ==");
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    builder.body(Body::empty()).unwrap()
}

#[tokio::test]
async fn handshake_without_cookie_is_refused() {
    let state = common::test_state(common::seeded_relations());
    let app = common::test_app(&state);

    let resp = app.oneshot(upgrade_request(None)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(state.hub.snapshot().await.unwrap().sessions, 0);
}

#[tokio::test]
async fn handshake_with_forged_cookie_is_refused() {
    let state = common::test_state(common::seeded_relations());

    // Right shape, wrong key.
    let forged = sign("some-other-secret", "sess_forged");
    let resp = common::test_app(&state)
        .oneshot(upgrade_request(Some(format!("{COOKIE_NAME}={forged}"))))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    // Correctly signed, but no such session.
    let unknown = sign(common::TEST_SECRET, "sess_unknown");
    let resp = common::test_app(&state)
        .oneshot(upgrade_request(Some(format!("{COOKIE_NAME}={unknown}"))))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn handshake_for_deleted_user_is_refused() {
    let relations = common::seeded_relations();
    let state = common::test_state(relations);
    // Session exists, user record does not.
    let cookie = common::login(&state, "usr_gone").await;

    let resp = common::test_app(&state)
        .oneshot(upgrade_request(Some(format!("{COOKIE_NAME}={cookie}"))))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn handshake_registers_and_close_unregisters() {
    let state = common::test_state(common::seeded_relations());
    let addr = common::start_ws_server(&state).await;
    let cookie = common::login(&state, "usr_a").await;

    let mut ws = common::connect_ws(addr, &cookie).await;
    common::sync(&mut ws).await;

    let snapshot = state.hub.snapshot().await.unwrap();
    assert_eq!(snapshot.sessions, 1);
    assert_eq!(snapshot.online_users, 1);

    ws.send(Message::Close(None)).await.unwrap();
    drop(ws);

    for _ in 0..100 {
        if state.hub.snapshot().await.unwrap().sessions == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("session was not unregistered after close");
}

fn short_keepalive(ping_interval: Duration) -> GatewayConfig {
    GatewayConfig {
        ping_interval,
        pong_wait: Duration::from_millis(300),
        ..GatewayConfig::default()
    }
}

#[tokio::test]
async fn silent_client_is_dropped_after_read_deadline() {
    // Pings are never sent within the test, so no pong can arrive.
    let state = common::test_state_with(
        common::seeded_relations(),
        Arc::new(MemoryBus::new()),
        short_keepalive(Duration::from_secs(60)),
    );
    let addr = common::start_ws_server(&state).await;
    let cookie = common::login(&state, "usr_a").await;

    let (watch, mut watch_rx) = common::session("usr_w", "w");
    state.hub.register(watch.clone()).await.unwrap();
    state.hub.subscribe(&watch.id, "gld_1").await.unwrap();

    let _ws = common::connect_ws(addr, &cookie).await;
    assert_eq!(
        common::recv(&mut watch_rx).await,
        ServerEvent::UserOnline("usr_a".into())
    );

    assert_eq!(
        common::recv(&mut watch_rx).await,
        ServerEvent::UserOffline("usr_a".into())
    );
    let snapshot = state.hub.snapshot().await.unwrap();
    assert_eq!(snapshot.sessions, 1);
    assert_eq!(snapshot.online_users, 1);
    common::assert_quiet(&mut watch_rx).await;
}

#[tokio::test]
async fn client_answering_pings_stays_connected() {
    let state = common::test_state_with(
        common::seeded_relations(),
        Arc::new(MemoryBus::new()),
        short_keepalive(Duration::from_millis(100)),
    );
    let addr = common::start_ws_server(&state).await;
    let cookie = common::login(&state, "usr_a").await;
    let mut ws = common::connect_ws(addr, &cookie).await;

    // Reading lets tungstenite answer each ping with a pong.
    let until = tokio::time::Instant::now() + Duration::from_millis(900);
    while let Ok(frame) = tokio::time::timeout_at(until, ws.next()).await {
        frame.expect("stream ended").expect("ws read error");
    }

    assert_eq!(state.hub.snapshot().await.unwrap().sessions, 1);
    let frame = common::sync(&mut ws).await;
    assert_eq!(frame["action"], "requestCount");
}

// ---------------------------------------------------------------------------
// Actions over a live socket
// ---------------------------------------------------------------------------

#[tokio::test]
async fn typing_reaches_others_in_channel_but_not_sender() {
    let state = common::test_state(common::seeded_relations());
    let addr = common::start_ws_server(&state).await;
    let alice_cookie = common::login(&state, "usr_a").await;
    let bob_cookie = common::login(&state, "usr_b").await;

    let mut alice = common::connect_ws(addr, &alice_cookie).await;
    let mut bob = common::connect_ws(addr, &bob_cookie).await;

    for ws in [&mut alice, &mut bob] {
        common::send_action(ws, json!({"action": "joinChannel", "room": "ch_1"})).await;
        common::sync(ws).await;
    }

    common::send_action(&mut alice, json!({"action": "startTyping", "room": "ch_1"})).await;

    let frame = common::next_action(&mut bob, "addToTyping").await;
    assert_eq!(frame, json!({"action": "addToTyping", "data": "alice"}));

    // Alice's next frame of either kind must be her own request count.
    common::send_action(&mut alice, json!({"action": "getRequestCount"})).await;
    let frame = common::next_of(&mut alice, &["addToTyping", "requestCount"]).await;
    assert_eq!(frame["action"], "requestCount");

    common::send_action(&mut alice, json!({"action": "stopTyping", "room": "ch_1"})).await;
    let frame = common::next_action(&mut bob, "removeFromTyping").await;
    assert_eq!(frame["data"], "alice");
}

#[tokio::test]
async fn request_count_reply() {
    let relations = common::seeded_relations();
    relations.add_user("usr_c", "carol");
    relations.add_friend_request("usr_c", "usr_a");
    relations.add_friend_request("usr_b", "usr_a");
    let state = common::test_state(relations);
    let addr = common::start_ws_server(&state).await;
    let cookie = common::login(&state, "usr_a").await;

    let mut ws = common::connect_ws(addr, &cookie).await;
    let frame = common::sync(&mut ws).await;
    assert_eq!(frame, json!({"action": "requestCount", "data": 2}));
}

#[tokio::test]
async fn unknown_and_malformed_frames_keep_the_session() {
    let state = common::test_state(common::seeded_relations());
    let addr = common::start_ws_server(&state).await;
    let cookie = common::login(&state, "usr_a").await;

    let mut ws = common::connect_ws(addr, &cookie).await;
    ws.send(Message::Text("not json".into())).await.unwrap();
    common::send_action(&mut ws, json!({"action": "teleport", "room": "x"})).await;
    common::send_action(&mut ws, json!({"action": "joinGuild"})).await;

    let frame = common::sync(&mut ws).await;
    assert_eq!(frame["action"], "requestCount");
}

#[tokio::test]
async fn voice_join_then_disconnect_notifies_guild() {
    let state = common::test_state(common::seeded_relations());
    let addr = common::start_ws_server(&state).await;
    let alice_cookie = common::login(&state, "usr_a").await;
    let bob_cookie = common::login(&state, "usr_b").await;

    let mut alice = common::connect_ws(addr, &alice_cookie).await;
    let mut bob = common::connect_ws(addr, &bob_cookie).await;

    for ws in [&mut alice, &mut bob] {
        common::send_action(ws, json!({"action": "joinGuild", "room": "gld_1"})).await;
        common::sync(ws).await;
    }

    common::send_action(
        &mut alice,
        json!({"action": "joinVoice", "room": "gld_1", "message": {"isMuted": true, "isDeafened": false}}),
    )
    .await;

    let frame = common::next_action(&mut bob, "vc_add_member").await;
    assert_eq!(
        frame["data"],
        json!({"id": "usr_a", "username": "alice", "isMuted": true, "isDeafened": false})
    );

    common::send_action(&mut alice, json!({"action": "deafenUser", "room": "gld_1"})).await;
    let frame = common::next_action(&mut bob, "vc_update_member").await;
    assert_eq!(frame["data"]["isDeafened"], true);
    assert_eq!(frame["data"]["isMuted"], true);

    alice.send(Message::Close(None)).await.unwrap();
    drop(alice);

    let frame = common::next_action(&mut bob, "vc_remove_member").await;
    assert_eq!(frame["data"]["id"], "usr_a");
    assert_eq!(state.hub.snapshot().await.unwrap().voice_members, 0);

    let frame = common::next_action(&mut bob, "user_offline").await;
    assert_eq!(frame["data"], "usr_a");
}

#[tokio::test]
async fn non_member_cannot_watch_guild() {
    let relations = common::seeded_relations();
    relations.add_user("usr_c", "carol");
    let state = common::test_state(relations);
    let addr = common::start_ws_server(&state).await;
    let alice_cookie = common::login(&state, "usr_a").await;
    let carol_cookie = common::login(&state, "usr_c").await;

    let mut carol = common::connect_ws(addr, &carol_cookie).await;
    common::send_action(&mut carol, json!({"action": "joinGuild", "room": "gld_1"})).await;
    common::sync(&mut carol).await;

    let mut alice = common::connect_ws(addr, &alice_cookie).await;
    common::send_action(&mut alice, json!({"action": "joinGuild", "room": "gld_1"})).await;
    common::sync(&mut alice).await;

    state
        .emitter
        .new_channel("gld_1", &json!({"id": "ch_2", "name": "general"}))
        .await;

    let frame = common::next_action(&mut alice, "new_channel").await;
    assert_eq!(frame["data"]["id"], "ch_2");

    // Carol gets nothing for the guild; her next frame is her own reply.
    let frame = {
        common::send_action(&mut carol, json!({"action": "getRequestCount"})).await;
        common::next_of(&mut carol, &["new_channel", "requestCount"]).await
    };
    assert_eq!(frame["action"], "requestCount");
}
