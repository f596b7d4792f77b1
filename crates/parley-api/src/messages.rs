use anyhow::anyhow;
use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use uuid::Uuid;

use parley_types::api::{Claims, SendMessageRequest};
use parley_types::models::Message;

use crate::AppState;
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
    /// Pass the `created_at` of the oldest message from the previous page to
    /// fetch older messages.
    pub before: Option<String>,
}

fn default_limit() -> u32 {
    50
}

/// REST transport for the unified send path; the realtime transport invokes
/// the same `ChatService::send_message`.
pub async fn send_message(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let message = state
        .chat
        .send_message(claims.sub, req.conversation_id, req.content, req.kind)
        .await?;

    Ok((StatusCode::CREATED, Json(message)))
}

pub async fn list_messages(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Query(query): Query<MessageQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<Message>>, ApiError> {
    state.chat.check_member(conversation_id, claims.sub).await?;

    let db = state.db.clone();
    let cid = conversation_id.to_string();
    let limit = query.limit.min(200);
    let before = query.before;

    let rows = tokio::task::spawn_blocking(move || db.list_messages(&cid, limit, before.as_deref()))
        .await
        .map_err(|e| anyhow!("spawn_blocking join error: {}", e))??;

    let messages = rows
        .into_iter()
        .map(|row| row.into_message())
        .collect::<anyhow::Result<Vec<_>>>()?;
    Ok(Json(messages))
}

/// `{conversation_id}` names the conversation whose counter is cleared. The
/// counter is conversation-wide, so in a group this clears unread state for
/// all members at once.
pub async fn mark_read(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.chat.check_member(conversation_id, claims.sub).await?;

    let db = state.db.clone();
    let cid = conversation_id.to_string();
    tokio::task::spawn_blocking(move || db.reset_unread(&cid))
        .await
        .map_err(|e| anyhow!("spawn_blocking join error: {}", e))??;

    Ok(Json(serde_json::json!({
        "message": "Conversation marked as read"
    })))
}
