use anyhow::anyhow;
use axum::{Extension, Json, extract::State};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use parley_types::api::{Claims, PresignRequest, PresignResponse, UploadImageRequest, UploadResponse};

use crate::AppState;
use crate::error::ApiError;

/// Accepts a base64 image (raw or `data:<mime>;base64,` data URL), stores it
/// content-addressed under the upload directory, and returns the public URL.
pub async fn upload_image(
    State(state): State<AppState>,
    Extension(_claims): Extension<Claims>,
    Json(req): Json<UploadImageRequest>,
) -> Result<Json<UploadResponse>, ApiError> {
    let (mime, payload) = split_data_url(&req.image);

    let bytes = B64
        .decode(payload.trim())
        .map_err(|_| ApiError::Validation("Invalid base64 image payload".into()))?;
    if bytes.is_empty() {
        return Err(ApiError::Validation("Empty image payload".into()));
    }

    let filename = format!("{}.{}", hex::encode(Sha256::digest(&bytes)), extension_for(mime));
    let path = state.config.upload_dir.join(&filename);

    tokio::fs::create_dir_all(&state.config.upload_dir)
        .await
        .map_err(|e| anyhow!("cannot create upload dir: {}", e))?;
    tokio::fs::write(&path, &bytes)
        .await
        .map_err(|e| anyhow!("cannot write upload: {}", e))?;

    Ok(Json(UploadResponse {
        url: format!("{}/uploads/{}", state.config.public_base_url, filename),
    }))
}

/// Dev-mode parity with the hosted object store: the "presigned" URL is just
/// the public uploads location for the generated file id.
pub async fn presign(
    State(state): State<AppState>,
    Extension(_claims): Extension<Claims>,
    Json(req): Json<PresignRequest>,
) -> Result<Json<PresignResponse>, ApiError> {
    let sanitized = sanitize_filename(&req.filename);
    if sanitized.is_empty() {
        return Err(ApiError::Validation("filename required".into()));
    }

    let file_id = format!("{}-{}", Uuid::new_v4(), sanitized);
    let url = format!("{}/uploads/{}", state.config.public_base_url, file_id);

    Ok(Json(PresignResponse {
        upload_url: url.clone(),
        file_url: url,
    }))
}

fn split_data_url(input: &str) -> (&str, &str) {
    if let Some(rest) = input.strip_prefix("data:") {
        if let Some((header, payload)) = rest.split_once(",") {
            let mime = header.strip_suffix(";base64").unwrap_or(header);
            return (mime, payload);
        }
    }
    ("image/png", input)
}

fn extension_for(mime: &str) -> &'static str {
    match mime {
        "image/png" => "png",
        "image/jpeg" | "image/jpg" => "jpg",
        "image/gif" => "gif",
        "image/webp" => "webp",
        _ => "bin",
    }
}

fn sanitize_filename(name: &str) -> String {
    name.trim()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
        .collect()
}
