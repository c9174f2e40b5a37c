//! WebSocket handler: authenticated project rooms.
//!
//! DESIGN
//! ======
//! The token is checked before the upgrade; a missing or bad token gets a
//! plain 401 and no socket. After the upgrade the connection enters a
//! `select!` loop:
//! - Inbound client messages → parse + dispatch to `collab`
//! - Messages queued on the connection's channel (room broadcasts, direct
//!   replies) → forward to the client
//!
//! Dispatch errors become `error` events; they never close the socket.
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade → register with presence and attach the outbound channel
//! 2. `join_project` / `leave_project` / `sync_since` → dispatch
//! 3. Close → `collab::disconnect` broadcasts `user_left` where needed
//!
//! A `ConnectionGuard` owns step 3. If the connection task unwinds before
//! reaching it, the guard's `Drop` schedules the disconnect instead, so a
//! dead socket never stays registered in presence or a room.

use std::collections::HashMap;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::auth::auth_error_to_status;
use crate::protocol::{ClientMessage, ServerMessage};
use crate::services::auth::{self as auth_svc, Identity};
use crate::services::collab;
use crate::state::AppState;

// =============================================================================
// UPGRADE
// =============================================================================

pub async fn handle_ws(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let token = auth_svc::extract_token(&params, &headers);
    let identity = match auth_svc::authenticate(state.verifier.as_ref(), token.as_deref()).await {
        Ok(identity) => identity,
        Err(e) => {
            info!(error = %e, "ws: upgrade refused");
            return auth_error_to_status(e).into_response();
        }
    };

    ws.on_upgrade(move |socket| run_ws(socket, state, identity))
}

// =============================================================================
// CONNECTION
// =============================================================================

/// Disconnects a registered connection exactly once.
struct ConnectionGuard {
    state: AppState,
    connection_id: Uuid,
    armed: bool,
}

impl ConnectionGuard {
    fn new(state: AppState, connection_id: Uuid) -> Self {
        Self { state, connection_id, armed: true }
    }

    async fn close(mut self) {
        self.armed = false;
        collab::disconnect(&self.state, self.connection_id).await;
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(connection_id = %self.connection_id, "ws: no runtime to release connection");
            return;
        };
        warn!(connection_id = %self.connection_id, "ws: connection task ended abnormally, releasing");
        let state = self.state.clone();
        let connection_id = self.connection_id;
        runtime.spawn(async move { collab::disconnect(&state, connection_id).await });
    }
}

async fn run_ws(mut socket: WebSocket, state: AppState, identity: Identity) {
    let user_id = identity.user_id;
    let (connection_id, mut outbound) = collab::connect(&state, identity).await;
    let guard = ConnectionGuard::new(state.clone(), connection_id);
    info!(%connection_id, %user_id, "ws: client connected");

    loop {
        tokio::select! {
            msg = socket.recv() => {
                let Some(Ok(msg)) = msg else { break };
                match msg {
                    Message::Text(text) => {
                        let replies = process_inbound_text(&state, connection_id, text.as_str()).await;
                        if send_all(&mut socket, &replies).await.is_err() {
                            break;
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            Some(msg) = outbound.recv() => {
                if send_message(&mut socket, &msg).await.is_err() {
                    break;
                }
            }
        }
    }

    guard.close().await;
    info!(%connection_id, "ws: client disconnected");
}

// =============================================================================
// DISPATCH
// =============================================================================

/// Parse and process one inbound text message and return messages for the
/// sender. Room traffic produced along the way goes through the channels.
async fn process_inbound_text(state: &AppState, connection_id: Uuid, text: &str) -> Vec<ServerMessage> {
    let msg: ClientMessage = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            warn!(%connection_id, error = %e, "ws: invalid inbound message");
            return vec![ServerMessage::invalid_message(format!("invalid message: {e}"))];
        }
    };
    debug!(%connection_id, ?msg, "ws: recv");

    match msg {
        ClientMessage::JoinProject { project_id } => match collab::join_project(state, connection_id, project_id).await {
            Ok(_) => Vec::new(),
            Err(e) => {
                info!(%connection_id, %project_id, error = %e, "ws: join refused");
                vec![ServerMessage::error_from(&e)]
            }
        },
        ClientMessage::LeaveProject { project_id } => {
            collab::leave_project(state, connection_id, project_id).await;
            Vec::new()
        }
        ClientMessage::SyncSince { project_id, since_seq } => {
            match collab::sync_since(state, connection_id, project_id, since_seq).await {
                Ok(batch) => vec![batch],
                Err(e) => vec![ServerMessage::error_from(&e)],
            }
        }
    }
}

async fn send_all(socket: &mut WebSocket, messages: &[ServerMessage]) -> Result<(), ()> {
    for msg in messages {
        send_message(socket, msg).await?;
    }
    Ok(())
}

async fn send_message(socket: &mut WebSocket, msg: &ServerMessage) -> Result<(), ()> {
    let json = match serde_json::to_string(msg) {
        Ok(j) => j,
        Err(e) => {
            warn!(error = %e, "ws: failed to serialize message");
            return Err(());
        }
    };
    if let ServerMessage::Error { code, message } = msg {
        warn!(code, message, "ws: send error event");
    }
    socket.send(Message::Text(json.into())).await.map_err(|_| ())
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
