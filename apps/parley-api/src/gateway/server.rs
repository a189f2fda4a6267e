//! WebSocket upgrade handler and the per-connection reader/writer pair.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

use crate::auth::middleware::AuthUser;
use crate::config::GatewayConfig;
use crate::AppState;

use super::events::ServerEvent;
use super::handler::handle_frame;
use super::session::SessionHandle;

/// Close codes.
const CLOSE_NORMAL: u16 = 1000;
const CLOSE_GOING_AWAY: u16 = 1001;

pub fn router() -> Router<AppState> {
    Router::new().route("/ws", get(ws_upgrade))
}

/// `AuthUser` runs first, so a request without a valid session cookie is
/// refused with 401 before any upgrade happens.
async fn ws_upgrade(
    user: AuthUser,
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| run_session(socket, state, user))
}

async fn run_session(socket: WebSocket, state: AppState, user: AuthUser) {
    let gateway = state.config.gateway.clone();
    let (session, outbound) =
        SessionHandle::new(user.user_id, user.username, gateway.outbound_capacity);

    if state.hub.register(session.clone()).await.is_err() {
        tracing::warn!(user_id = %session.user_id, "hub unavailable, dropping connection");
        return;
    }
    tracing::info!(
        session_id = %session.id,
        user_id = %session.user_id,
        "gateway session established"
    );

    let (ws_tx, ws_rx) = socket.split();
    let writer = tokio::spawn(write_pump(
        ws_tx,
        outbound,
        session.close_signal(),
        gateway.clone(),
    ));

    read_pump(ws_rx, &state, &session, &gateway).await;

    // Whichever side ended first, stop the other and deregister once.
    session.close();
    let _ = writer.await;
    let _ = state.hub.unregister(&session.id).await;

    tracing::info!(
        session_id = %session.id,
        user_id = %session.user_id,
        "gateway session ended"
    );
}

/// Read frames until the client leaves, the socket fails, the keepalive
/// deadline passes, or the session is closed from elsewhere.
async fn read_pump(
    mut ws_rx: SplitStream<WebSocket>,
    state: &AppState,
    session: &SessionHandle,
    gateway: &GatewayConfig,
) {
    let closed = session.close_signal();
    let mut deadline = Instant::now() + gateway.pong_wait;

    loop {
        let msg = tokio::select! {
            _ = closed.cancelled() => break,
            msg = time::timeout_at(deadline, ws_rx.next()) => msg,
        };

        let msg = match msg {
            Ok(Some(Ok(msg))) => msg,
            Ok(Some(Err(e))) => {
                tracing::debug!(?e, session_id = %session.id, "ws read error");
                break;
            }
            Ok(None) => break,
            Err(_elapsed) => {
                tracing::debug!(session_id = %session.id, "keepalive missed, closing connection");
                break;
            }
        };

        match msg {
            Message::Text(text) => {
                let handled =
                    handle_frame(&state.hub, state.relations.as_ref(), session, text.as_str())
                        .await;
                if handled.is_err() {
                    tracing::warn!(session_id = %session.id, "hub gone, closing connection");
                    break;
                }
            }
            Message::Pong(_) => deadline = Instant::now() + gateway.pong_wait,
            Message::Close(_) => break,
            Message::Binary(_) | Message::Ping(_) => {}
        }
    }
}

/// Drain the outbound queue onto the socket and ping on a fixed interval.
/// Every write is bounded by the configured write deadline.
async fn write_pump(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<Arc<ServerEvent>>,
    closed: CancellationToken,
    gateway: GatewayConfig,
) {
    let mut ping = time::interval_at(
        Instant::now() + gateway.ping_interval,
        gateway.ping_interval,
    );

    loop {
        tokio::select! {
            _ = closed.cancelled() => {
                let _ = time::timeout(
                    gateway.write_wait,
                    send_close(&mut ws_tx, CLOSE_GOING_AWAY, "session closed"),
                )
                .await;
                break;
            }

            event = outbound.recv() => {
                let Some(event) = event else {
                    let _ = send_close(&mut ws_tx, CLOSE_NORMAL, "").await;
                    break;
                };
                let json = match serde_json::to_string(event.as_ref()) {
                    Ok(json) => json,
                    Err(err) => {
                        tracing::error!(action = event.action(), error = %err, "failed to encode event");
                        continue;
                    }
                };
                if !send_within(&mut ws_tx, Message::Text(json.into()), gateway.write_wait).await {
                    break;
                }
            }

            _ = ping.tick() => {
                if !send_within(&mut ws_tx, Message::Ping(Bytes::new()), gateway.write_wait).await {
                    break;
                }
            }
        }
    }

    closed.cancel();
}

async fn send_within(
    ws_tx: &mut SplitSink<WebSocket, Message>,
    msg: Message,
    wait: Duration,
) -> bool {
    match time::timeout(wait, ws_tx.send(msg)).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            tracing::debug!(?e, "ws write error");
            false
        }
        Err(_elapsed) => {
            tracing::debug!("ws write deadline exceeded");
            false
        }
    }
}

/// Send a WebSocket close frame with a code and reason.
async fn send_close(
    ws_tx: &mut SplitSink<WebSocket, Message>,
    code: u16,
    reason: &str,
) -> Result<(), axum::Error> {
    let close_msg = Message::Close(Some(axum::extract::ws::CloseFrame {
        code,
        reason: reason.to_string().into(),
    }));
    ws_tx.send(close_msg).await
}
