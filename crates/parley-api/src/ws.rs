use anyhow::anyhow;
use axum::{
    extract::{Query, State, WebSocketUpgrade},
    response::IntoResponse,
};
use serde::Deserialize;

use parley_gateway::connection;

use crate::AppState;
use crate::auth::verify_token;
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct WsAuth {
    pub token: Option<String>,
}

/// WebSocket upgrade with synchronous authentication: the access token is
/// verified before the upgrade is accepted, so an invalid handshake never
/// reaches the connection loop.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(auth): Query<WsAuth>,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, ApiError> {
    let token = auth
        .token
        .ok_or_else(|| ApiError::Authentication("No token provided".into()))?;

    let claims = verify_token(&state.config.jwt_secret, &token)
        .map_err(|_| ApiError::Authentication("Invalid token".into()))?;

    let db = state.db.clone();
    let id = claims.sub.to_string();
    let user = tokio::task::spawn_blocking(move || db.get_user_by_id(&id))
        .await
        .map_err(|e| anyhow!("spawn_blocking join error: {}", e))??
        .ok_or_else(|| ApiError::Authentication("Invalid token".into()))?;

    let chat = state.chat.clone();
    Ok(ws.on_upgrade(move |socket| {
        connection::handle_connection(socket, chat, claims.sub, user.name)
    }))
}
