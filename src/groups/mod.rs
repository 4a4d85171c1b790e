pub mod store;

use axum::{
    Json, Router, debug_handler,
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post},
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{ApiError, ApiResult, AppState, auth::UserIdentity, messages::store::Message};
use store::{Group, Role};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list).post(create))
        .route("/{id}", delete(remove))
        .route("/{id}/members", post(add_member))
        .route("/{id}/members/{user_id}", delete(remove_member))
        .route("/{id}/admins/{user_id}", post(promote).delete(demote))
}

/// Group list entry with the lastMessage preview resolved. A dangling
/// pointer (message since deleted) resolves to no preview.
#[derive(Serialize)]
struct GroupSummary {
    id: Uuid,
    name: String,
    owner_id: Uuid,
    last_message: Option<Message>,
}

#[debug_handler]
async fn list(
    State(state): State<AppState>,
    me: UserIdentity,
) -> ApiResult<Json<Vec<GroupSummary>>> {
    let rows = state.groups.list_for_user(me.id).await?;
    let mut out = Vec::with_capacity(rows.len());
    for (id, name, owner_id, last_message_id) in rows {
        let last_message = match last_message_id {
            Some(message_id) => state.messages.get(message_id).await?,
            None => None,
        };
        out.push(GroupSummary {
            id,
            name,
            owner_id,
            last_message,
        });
    }
    Ok(Json(out))
}

#[derive(Deserialize)]
struct CreateGroupBody {
    name: String,
}

#[debug_handler]
async fn create(
    State(state): State<AppState>,
    me: UserIdentity,
    Json(body): Json<CreateGroupBody>,
) -> ApiResult<(StatusCode, Json<Group>)> {
    let name = body.name.trim();
    if name.is_empty() {
        return Err(ApiError::InvalidArgument("group name is empty".into()));
    }
    let group = state.groups.create(me.id, name).await?;
    Ok((StatusCode::CREATED, Json(group)))
}

#[debug_handler]
async fn remove(
    State(state): State<AppState>,
    me: UserIdentity,
    Path(group_id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    let group = load(&state, group_id).await?;
    if group.owner_id != me.id {
        return Err(ApiError::Forbidden("only the owner may delete the group"));
    }
    state.groups.delete(group_id).await?;
    Ok(Json(serde_json::json!({ "message": "group deleted" })))
}

#[derive(Deserialize)]
struct AddMemberBody {
    user_id: Uuid,
}

#[debug_handler]
async fn add_member(
    State(state): State<AppState>,
    me: UserIdentity,
    Path(group_id): Path<Uuid>,
    Json(body): Json<AddMemberBody>,
) -> ApiResult<Json<Group>> {
    let group = load(&state, group_id).await?;
    if !group.is_admin(me.id) {
        return Err(ApiError::Forbidden("only admins may add members"));
    }
    if !state.groups.add_member(group_id, body.user_id).await? {
        return Err(ApiError::InvalidArgument("already a member".into()));
    }
    load(&state, group_id).await.map(Json)
}

#[debug_handler]
async fn remove_member(
    State(state): State<AppState>,
    me: UserIdentity,
    Path((group_id, user_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<Json<Group>> {
    let group = load(&state, group_id).await?;
    if !group.is_admin(me.id) {
        return Err(ApiError::Forbidden("only admins may remove members"));
    }
    if user_id == group.owner_id {
        return Err(ApiError::Forbidden("the owner cannot be removed"));
    }
    if !state.groups.remove_member(group_id, user_id).await? {
        return Err(ApiError::NotFound("member"));
    }
    load(&state, group_id).await.map(Json)
}

#[debug_handler]
async fn promote(
    State(state): State<AppState>,
    me: UserIdentity,
    Path((group_id, user_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<Json<Group>> {
    set_role(&state, &me, group_id, user_id, Role::Admin).await
}

#[debug_handler]
async fn demote(
    State(state): State<AppState>,
    me: UserIdentity,
    Path((group_id, user_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<Json<Group>> {
    set_role(&state, &me, group_id, user_id, Role::Member).await
}

/// Admin status is the owner's call alone, and the owner's own role is
/// immutable.
async fn set_role(
    state: &AppState,
    me: &UserIdentity,
    group_id: Uuid,
    user_id: Uuid,
    role: Role,
) -> ApiResult<Json<Group>> {
    let group = load(state, group_id).await?;
    if group.owner_id != me.id {
        return Err(ApiError::Forbidden("only the owner may change admin status"));
    }
    if user_id == group.owner_id {
        return Err(ApiError::Forbidden("the owner's role cannot be changed"));
    }
    if !state.groups.set_role(group_id, user_id, role).await? {
        return Err(ApiError::NotFound("member"));
    }
    load(state, group_id).await.map(Json)
}

async fn load(state: &AppState, group_id: Uuid) -> ApiResult<Group> {
    state
        .groups
        .get(group_id)
        .await?
        .ok_or(ApiError::NotFound("group"))
}
