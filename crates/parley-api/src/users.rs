use anyhow::anyhow;
use axum::{Extension, Json, extract::{Query, State}};
use serde::Deserialize;

use parley_types::api::{Claims, UpdateProfileRequest};
use parley_types::models::UserProfile;

use crate::AppState;
use crate::error::ApiError;

pub async fn me(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<UserProfile>, ApiError> {
    let db = state.db.clone();
    let id = claims.sub.to_string();
    let user = tokio::task::spawn_blocking(move || db.get_user_by_id(&id))
        .await
        .map_err(|e| anyhow!("spawn_blocking join error: {}", e))??
        .ok_or_else(|| ApiError::NotFound("User not found.".into()))?;

    Ok(Json(user.into_profile()?))
}

pub async fn update_profile(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpdateProfileRequest>,
) -> Result<Json<UserProfile>, ApiError> {
    if let Some(name) = &req.name {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Err(ApiError::Validation("Name must not be empty".into()));
        }
        if trimmed.len() > 64 {
            return Err(ApiError::Validation(
                "Name must be at most 64 characters".into(),
            ));
        }
    }

    let db = state.db.clone();
    let id = claims.sub.to_string();
    let name = req.name.map(|n| n.trim().to_string());
    let avatar = req.avatar;
    let user = tokio::task::spawn_blocking(move || {
        db.update_profile(&id, name.as_deref(), avatar.as_deref())
    })
    .await
    .map_err(|e| anyhow!("spawn_blocking join error: {}", e))??;

    Ok(Json(user.into_profile()?))
}

pub async fn list_users(
    State(state): State<AppState>,
    Extension(_claims): Extension<Claims>,
) -> Result<Json<Vec<UserProfile>>, ApiError> {
    let db = state.db.clone();
    let rows = tokio::task::spawn_blocking(move || db.list_users())
        .await
        .map_err(|e| anyhow!("spawn_blocking join error: {}", e))??;

    let profiles = rows
        .into_iter()
        .map(|row| row.into_profile())
        .collect::<anyhow::Result<Vec<_>>>()?;
    Ok(Json(profiles))
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
}

pub async fn search_users(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
    Extension(_claims): Extension<Claims>,
) -> Result<Json<Vec<UserProfile>>, ApiError> {
    let needle = query.q.trim().to_string();
    if needle.is_empty() {
        return Ok(Json(vec![]));
    }

    let db = state.db.clone();
    let rows = tokio::task::spawn_blocking(move || db.search_users(&needle))
        .await
        .map_err(|e| anyhow!("spawn_blocking join error: {}", e))??;

    let profiles = rows
        .into_iter()
        .map(|row| row.into_profile())
        .collect::<anyhow::Result<Vec<_>>>()?;
    Ok(Json(profiles))
}
