pub mod pipeline;
pub mod store;

use axum::{
    Json, Router, debug_handler,
    extract::{Multipart, Path, Query, State},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{ApiError, ApiResult, AppState, auth::UserIdentity, media};
use store::Message;

/// Message content: exactly one of text, image reference, or voice
/// reference. Media references are opaque strings minted by the media
/// store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessagePayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice_url: Option<String>,
}

impl MessagePayload {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            text: Some(content.into()),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> ApiResult<()> {
        if self.text.as_deref().is_some_and(|t| t.trim().is_empty()) {
            return Err(ApiError::InvalidArgument("message text is empty".into()));
        }
        let kinds = [
            self.text.is_some(),
            self.image_url.is_some(),
            self.voice_url.is_some(),
        ];
        match kinds.iter().filter(|present| **present).count() {
            1 => Ok(()),
            0 => Err(ApiError::InvalidArgument("message has no content".into())),
            _ => Err(ApiError::InvalidArgument(
                "message must carry exactly one content kind".into(),
            )),
        }
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        // {id} is a group id for GET/POST and a message id for DELETE.
        .route("/{id}", get(history).post(send_text).delete(remove))
        .route("/{id}/image", post(send_image))
        .route("/{id}/voice", post(send_voice))
        .route("/{id}/read", post(mark_read))
}

#[derive(Deserialize)]
struct HistoryQuery {
    limit: Option<u32>,
}

const DEFAULT_HISTORY_LIMIT: u32 = 50;
const MAX_HISTORY_LIMIT: u32 = 200;

#[debug_handler]
async fn history(
    State(state): State<AppState>,
    requester: UserIdentity,
    Path(group_id): Path<Uuid>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<Vec<Message>>> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT);
    let messages = pipeline::recent(&state, &requester, group_id, limit).await?;
    Ok(Json(messages))
}

#[derive(Deserialize)]
struct SendTextBody {
    text: String,
}

/// REST fallback for text sends; runs the same pipeline as the socket
/// path, fan-out included.
#[debug_handler]
async fn send_text(
    State(state): State<AppState>,
    sender: UserIdentity,
    Path(group_id): Path<Uuid>,
    Json(body): Json<SendTextBody>,
) -> ApiResult<Json<Message>> {
    let payload = MessagePayload::text(body.text);
    let message = pipeline::send_message(&state, Some(&sender), group_id, &payload).await?;
    Ok(Json(message))
}

#[debug_handler]
async fn send_image(
    State(state): State<AppState>,
    sender: UserIdentity,
    Path(group_id): Path<Uuid>,
    multipart: Multipart,
) -> ApiResult<Json<Message>> {
    let url = media::store_upload(&state.upload_dir, multipart, "image").await?;
    let payload = MessagePayload {
        image_url: Some(url),
        ..MessagePayload::default()
    };
    let message = pipeline::send_message(&state, Some(&sender), group_id, &payload).await?;
    Ok(Json(message))
}

#[debug_handler]
async fn send_voice(
    State(state): State<AppState>,
    sender: UserIdentity,
    Path(group_id): Path<Uuid>,
    multipart: Multipart,
) -> ApiResult<Json<Message>> {
    let url = media::store_upload(&state.upload_dir, multipart, "voice").await?;
    let payload = MessagePayload {
        voice_url: Some(url),
        ..MessagePayload::default()
    };
    let message = pipeline::send_message(&state, Some(&sender), group_id, &payload).await?;
    Ok(Json(message))
}

#[debug_handler]
async fn mark_read(
    State(state): State<AppState>,
    requester: UserIdentity,
    Path(message_id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    pipeline::mark_read(&state, &requester, message_id).await?;
    Ok(Json(serde_json::json!({ "message": "read" })))
}

#[debug_handler]
async fn remove(
    State(state): State<AppState>,
    requester: UserIdentity,
    Path(message_id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    pipeline::delete_message(&state, &requester, message_id).await?;
    Ok(Json(serde_json::json!({ "message": "message deleted" })))
}
