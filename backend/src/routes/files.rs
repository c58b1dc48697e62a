//! File upload and retrieval.
//!
//! Uploading is a two-step flow: an authenticated client asks for a single-use
//! upload URL, then posts the raw bytes to it. The URL itself is the credential
//! for the second step.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Serialize;

use crate::error::ApiResult;
use crate::ingest::{IssuedUpload, ResolvedFile};
use crate::store::{FileObject, StoreError};
use crate::AppState;

use super::authorize;

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UploadResponse {
    storage_id: String,
}

/// Load a file's metadata, hiding files owned by someone else.
pub(super) fn owned_file(state: &AppState, file_id: &str, user_id: &str) -> Result<FileObject, StoreError> {
    let file = state.store.get_file(file_id)?;
    if file.user_id != user_id {
        return Err(StoreError::NotFound("File"));
    }
    Ok(file)
}

/// POST /api/files/upload-url
async fn generate_upload_url(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<Json<IssuedUpload>> {
    let user = authorize(&state, &headers).await?;
    Ok(Json(state.files.generate_upload_target(&user.sub, Utc::now())?))
}

/// POST /api/uploads/:token
async fn upload(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<UploadResponse>> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or(DEFAULT_CONTENT_TYPE);

    let file = state.files.accept_upload(&token, content_type, &body, Utc::now()).await?;
    Ok(Json(UploadResponse { storage_id: file.id }))
}

/// GET /api/files/:id
async fn get_file(
    State(state): State<Arc<AppState>>,
    Path(file_id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Json<ResolvedFile>> {
    let user = authorize(&state, &headers).await?;
    owned_file(&state, &file_id, &user.sub)?;
    Ok(Json(state.files.resolve(&file_id)?))
}

/// GET /api/files/:id/content
async fn get_file_content(
    State(state): State<Arc<AppState>>,
    Path(file_id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let user = authorize(&state, &headers).await?;
    let file = owned_file(&state, &file_id, &user.sub)?;
    let bytes = state.files.read(&file.id).await?;
    Ok(([(header::CONTENT_TYPE, file.content_type)], bytes).into_response())
}

/// DELETE /api/files/:id
async fn delete_file(
    State(state): State<Arc<AppState>>,
    Path(file_id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<StatusCode> {
    let user = authorize(&state, &headers).await?;
    owned_file(&state, &file_id, &user.sub)?;
    state.files.delete(&file_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub fn router(state: Arc<AppState>) -> Router {
    let upload_limit = state.config.storage.max_upload_bytes;

    Router::new()
        .route("/api/files/upload-url", post(generate_upload_url))
        .route(
            "/api/uploads/:token",
            post(upload).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/api/files/:id", get(get_file).delete(delete_file))
        .route("/api/files/:id/content", get(get_file_content))
        .with_state(state)
}
