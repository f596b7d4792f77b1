use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};

use parley_types::api::Claims;

use crate::AppState;
use crate::auth::verify_token;
use crate::error::ApiError;

/// Extract and validate the bearer JWT from the Authorization header.
/// Verified claims are inserted as a request extension for handlers.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let auth_header = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::Authentication("No token provided".into()))?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or_else(|| ApiError::Authentication("No token provided".into()))?;

    let claims: Claims = verify_token(&state.config.jwt_secret, token)
        .map_err(|_| ApiError::Authentication("Invalid token".into()))?;

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}
