//! The send path: membership authorization → durable append → pointer
//! advance → fan-out, in that order.
//!
//! Durability comes first: once the append succeeds the message is sent,
//! even if the pointer update or any individual delivery fails afterwards.
//! There is no transaction spanning persistence and broadcast.

use uuid::Uuid;

use super::{MessagePayload, store::Message};
use crate::{
    ApiError, ApiResult, AppState, ConnId,
    auth::UserIdentity,
    events::ServerEvent,
    groups::store::Group,
};

/// Sends one message to a group on behalf of `sender`.
///
/// The membership check runs against the durable group record on every
/// call; a prior room join grants nothing, because membership may have
/// been revoked since. Steps before the append fail fast with no side
/// effect; a pointer-update failure after the append is logged and the
/// message is broadcast regardless; per-connection delivery failures are
/// dropped (clients reconcile through history on reconnect).
pub async fn send_message(
    state: &AppState,
    sender: Option<&UserIdentity>,
    group_id: Uuid,
    payload: &MessagePayload,
) -> ApiResult<Message> {
    let sender = sender.ok_or(ApiError::Unauthorized)?;
    let group = require_member(state, group_id, sender.id).await?;
    payload.validate()?;

    let message = state.messages.append(group.id, sender, payload).await?;

    match state
        .groups
        .cas_last_message(group.id, message.id, message.created_at, message.seq)
        .await
    {
        Ok(true) => {}
        // Lost the race to a newer message; the pointer is already where
        // it should be.
        Ok(false) => tracing::debug!(group = %group.id, message = %message.id,
            "lastMessage pointer superseded"),
        // Non-fatal: the pointer is a preview cache, history is the truth.
        Err(err) => tracing::warn!(group = %group.id, error = %err,
            "lastMessage pointer update failed"),
    }

    fan_out(
        state,
        group_id,
        None,
        &ServerEvent::Message {
            message: message.clone(),
        },
    );
    Ok(message)
}

/// Idempotent read-receipt add.
pub async fn mark_read(
    state: &AppState,
    user: &UserIdentity,
    message_id: Uuid,
) -> ApiResult<()> {
    state.messages.add_reader(message_id, user.id).await
}

/// Hard delete, allowed to the sender or an admin of the message's group.
pub async fn delete_message(
    state: &AppState,
    requester: &UserIdentity,
    message_id: Uuid,
) -> ApiResult<()> {
    let message = state
        .messages
        .get(message_id)
        .await?
        .ok_or(ApiError::NotFound("message"))?;

    if message.sender_id != requester.id {
        let group = state
            .groups
            .get(message.group_id)
            .await?
            .ok_or(ApiError::NotFound("group"))?;
        if !group.is_admin(requester.id) {
            return Err(ApiError::Forbidden(
                "only the sender or a group admin may delete a message",
            ));
        }
    }

    state.messages.delete(message_id).await
}

/// History slice for initial load: up to `limit` messages, oldest→newest,
/// drawn from the most recent by creation time. Same membership check as
/// the send path.
pub async fn recent(
    state: &AppState,
    requester: &UserIdentity,
    group_id: Uuid,
    limit: u32,
) -> ApiResult<Vec<Message>> {
    require_member(state, group_id, requester.id).await?;
    state.messages.list_recent(group_id, limit).await
}

/// Authoritative membership check against the Group Store.
pub async fn require_member(
    state: &AppState,
    group_id: Uuid,
    user_id: Uuid,
) -> ApiResult<Group> {
    let group = state
        .groups
        .get(group_id)
        .await?
        .ok_or(ApiError::NotFound("group"))?;
    if !group.is_member(user_id) {
        return Err(ApiError::Forbidden("not a group member"));
    }
    Ok(group)
}

/// Best-effort delivery of one event to every connection currently joined
/// to the group's room, minus `skip`. Serializes once; never awaits a
/// receiver; a broken connection fails only itself.
pub fn fan_out(state: &AppState, group_id: Uuid, skip: Option<ConnId>, event: &ServerEvent) {
    let Ok(frame) = serde_json::to_string(event) else {
        return;
    };
    for conn in state.rooms.subscribers(group_id) {
        if Some(conn) == skip {
            continue;
        }
        state.peers.send_raw(conn, frame.clone());
    }
}
