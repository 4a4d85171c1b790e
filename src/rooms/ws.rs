//! Websocket transport: one task per connection, explicit lifecycle
//! Connected → Authenticated? → Joined{..} → Disconnected, with a single
//! idempotent teardown on every exit path.

use axum::{
    debug_handler,
    extract::{
        Query, State, WebSocketUpgrade,
        ws::{Message as WsMessage, WebSocket},
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::{
    ApiError, AppState, ConnId,
    auth::UserIdentity,
    events::{ClientEvent, ServerEvent},
    messages::pipeline,
    presence,
};

#[derive(Deserialize)]
pub struct ConnectQuery {
    token: Option<String>,
}

/// `GET /ws?token=<jwt>`. Identity is resolved once, before the upgrade;
/// a missing or invalid token degrades to an anonymous connection.
#[debug_handler]
pub async fn upgrade(
    State(state): State<AppState>,
    Query(query): Query<ConnectQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let identity = state.auth.authenticate(query.token.as_deref());
    ws.on_upgrade(move |socket| run_connection(state, identity, socket))
}

async fn run_connection(state: AppState, identity: Option<UserIdentity>, socket: WebSocket) {
    let conn: ConnId = Uuid::now_v7();
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    state.peers.insert(conn, tx);
    if let Some(user) = &identity {
        tracing::debug!(%conn, user = %user.id, "connection authenticated");
        if state.presence.register(user.id, conn) {
            presence::broadcast_online(&state.presence, &state.peers);
        }
    }
    // Late joiner: one direct snapshot so this client starts in sync.
    state.peers.send(
        conn,
        &ServerEvent::OnlineUsers {
            users: state.presence.snapshot(),
        },
    );

    // Writer task: drains the connection's queue so a slow socket never
    // blocks the senders feeding it.
    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if sink.send(WsMessage::Text(frame.into())).await.is_err() {
                break;
            }
        }
    });

    // Events on one connection are handled one at a time, in order.
    while let Some(Ok(frame)) = stream.next().await {
        let Ok(event) = serde_json::from_slice::<ClientEvent>(&frame.into_data()) else {
            continue;
        };
        handle_event(&state, conn, identity.as_ref(), event).await;
    }

    teardown(&state, conn, identity.as_ref());
    writer.abort();
}

/// Dispatches one inbound event for a connection.
pub async fn handle_event(
    state: &AppState,
    conn: ConnId,
    identity: Option<&UserIdentity>,
    event: ClientEvent,
) {
    match event {
        ClientEvent::Join { group_id } => {
            // Anonymous connections are barred from rooms entirely: no
            // identity, no subscription, no fan-out.
            if identity.is_some() {
                state.rooms.join(conn, group_id);
            } else {
                state.peers.send(
                    conn,
                    &ServerEvent::Error {
                        message: ApiError::Unauthorized.to_string(),
                    },
                );
            }
        }
        ClientEvent::Leave { group_id } => state.rooms.leave(conn, group_id),
        ClientEvent::Send { group_id, payload } => {
            if let Err(err) = pipeline::send_message(state, identity, group_id, &payload).await {
                // Reported to the initiating connection only; store
                // internals are not leaked to clients.
                let message = match &err {
                    ApiError::Internal(inner) => {
                        tracing::error!(%conn, error = %inner, "send failed");
                        "delivery failed".to_string()
                    }
                    other => other.to_string(),
                };
                state.peers.send(conn, &ServerEvent::Error { message });
            }
        }
        ClientEvent::Typing { group_id } => {
            // Anonymous connections have no identity to attribute typing to.
            if let Some(user) = identity {
                pipeline::fan_out(
                    state,
                    group_id,
                    Some(conn),
                    &ServerEvent::Typing {
                        user_id: user.id,
                        group_id,
                    },
                );
            }
        }
    }
}

/// Retracts the connection from peers, presence, and every joined room.
/// Runs exactly once per connection; each retraction is itself idempotent,
/// so an abnormal transport close cannot leave dangling entries.
fn teardown(state: &AppState, conn: ConnId, identity: Option<&UserIdentity>) {
    state.peers.remove(conn);
    state.rooms.disconnect(conn);
    if let Some(user) = identity {
        if state.presence.unregister(user.id, conn) {
            presence::broadcast_online(&state.presence, &state.peers);
        }
    }
}
