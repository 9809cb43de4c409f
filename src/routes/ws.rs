//! WebSocket handler — chatroom channel subscriptions.
//!
//! DESIGN
//! ======
//! On upgrade, generates a subscriber ID and enters a `select!` loop:
//! - Incoming client frames → parse + dispatch by syscall prefix
//! - Frames published on subscribed channels → forward to client
//!
//! The only client-driven prefix is `channel`. Message events are produced by
//! the HTTP send path and arrive here through the broadcast hub.
//!
//! LIFECYCLE
//! =========
//! 1. `GET /api/ws?ticket=…` → ticket redeemed (single use) → upgrade
//! 2. Send `session:connected` with `subscriber_id` and `user_id`
//! 3. Client sends `channel:subscribe` / `channel:unsubscribe` frames
//! 4. Close → drop every subscription held by this connection

use std::collections::HashMap;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::frame::{Data, Frame};
use crate::services::{account, broadcast};
use crate::state::AppState;

/// Per-connection outbound queue depth. Events beyond this are dropped.
const SUBSCRIBER_QUEUE: usize = 256;

// =============================================================================
// UPGRADE
// =============================================================================

pub async fn handle_ws(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    ws: WebSocketUpgrade,
) -> Response {
    let Some(ticket) = params.get("ticket") else {
        return (StatusCode::UNAUTHORIZED, "ticket required").into_response();
    };

    let user_id = match account::redeem_ws_ticket(&state, ticket).await {
        Ok(Some(uid)) => uid,
        Ok(None) => return (StatusCode::UNAUTHORIZED, "invalid or expired ticket").into_response(),
        Err(e) => {
            tracing::error!(error = %e, "ws ticket validation failed");
            return (StatusCode::INTERNAL_SERVER_ERROR, "ticket validation error").into_response();
        }
    };

    ws.on_upgrade(move |socket| run_ws(socket, state, user_id))
}

// =============================================================================
// CONNECTION
// =============================================================================

async fn run_ws(mut socket: WebSocket, state: AppState, user_id: i64) {
    let subscriber_id = Uuid::new_v4();
    let (client_tx, mut client_rx) = mpsc::channel::<Frame>(SUBSCRIBER_QUEUE);

    let welcome = Frame::request("session:connected", Data::new())
        .with_data("subscriber_id", subscriber_id.to_string())
        .with_data("user_id", user_id);
    if send_frame(&mut socket, &welcome).await.is_err() {
        return;
    }

    info!(%subscriber_id, user_id, "ws: client connected");

    loop {
        tokio::select! {
            msg = socket.recv() => {
                let Some(Ok(msg)) = msg else { break };
                match msg {
                    Message::Text(text) => {
                        let replies = process_inbound_text(&state, subscriber_id, user_id, &client_tx, text.as_str()).await;
                        for frame in replies {
                            let _ = send_frame(&mut socket, &frame).await;
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            Some(frame) = client_rx.recv() => {
                if send_frame(&mut socket, &frame).await.is_err() {
                    break;
                }
            }
        }
    }

    state.hub.unsubscribe_all(subscriber_id).await;
    info!(%subscriber_id, "ws: client disconnected");
}

async fn send_frame(socket: &mut WebSocket, frame: &Frame) -> Result<(), axum::Error> {
    let json = match serde_json::to_string(frame) {
        Ok(json) => json,
        Err(e) => {
            warn!(error = %e, syscall = %frame.syscall, "ws: failed to encode frame");
            return Ok(());
        }
    };
    socket.send(Message::Text(json.into())).await
}

// =============================================================================
// FRAME DISPATCH
// =============================================================================

/// Parse and process one inbound text frame and return frames for the sender.
///
/// Kept free of socket I/O so tests can drive subscription handling directly.
async fn process_inbound_text(
    state: &AppState,
    subscriber_id: Uuid,
    user_id: i64,
    client_tx: &mpsc::Sender<Frame>,
    text: &str,
) -> Vec<Frame> {
    let req: Frame = match serde_json::from_str(text) {
        Ok(r) => r,
        Err(e) => {
            warn!(%subscriber_id, error = %e, "ws: invalid inbound frame");
            let err = Frame::request("gateway:error", Data::new()).with_data("message", format!("invalid json: {e}"));
            return vec![err];
        }
    };

    info!(%subscriber_id, id = %req.id, syscall = %req.syscall, "ws: recv frame");

    let reply = match req.prefix() {
        "channel" => handle_channel(state, subscriber_id, user_id, client_tx, &req).await,
        prefix => req.error(format!("unknown prefix: {prefix}")),
    };
    vec![reply]
}

// =============================================================================
// CHANNEL HANDLERS
// =============================================================================

/// Channel name from the frame header, falling back to `data.channel`.
fn requested_channel(req: &Frame) -> Option<String> {
    req.channel
        .clone()
        .or_else(|| req.data.get("channel").and_then(|v| v.as_str()).map(str::to_owned))
}

async fn handle_channel(
    state: &AppState,
    subscriber_id: Uuid,
    user_id: i64,
    client_tx: &mpsc::Sender<Frame>,
    req: &Frame,
) -> Frame {
    let Some(channel) = requested_channel(req) else {
        return req.error("channel required");
    };

    match req.op() {
        "subscribe" => match broadcast::authorize_subscription(state, user_id, &channel).await {
            Ok(chatroom_id) => {
                state.hub.subscribe(&channel, subscriber_id, client_tx.clone()).await;
                let mut data = Data::new();
                data.insert("chatroom_id".into(), chatroom_id.into());
                data.insert("subscribers".into(), state.hub.subscriber_count(&channel).await.into());
                req.done_with(data).with_channel(channel)
            }
            Err(e) => {
                warn!(%subscriber_id, user_id, %channel, error = %e, "ws: subscribe rejected");
                req.error_from(&e).with_channel(channel)
            }
        },
        "unsubscribe" => {
            state.hub.unsubscribe(&channel, subscriber_id).await;
            req.done().with_channel(channel)
        }
        op => req.error(format!("unknown channel op: {op}")),
    }
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
