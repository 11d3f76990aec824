//! `/api/ssh-files/{connectionId}/user/{userId}/{op}` routes.
//!
//! Every operation is a POST. All but `upload` take a JSON
//! [`FileOperationRequest`]; `upload` takes a multipart body with a `file`
//! part and the destination in the `remotePath` query parameter.

use std::sync::Arc;

use axum::extract::{Multipart, Path, Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;
use tracing::debug;
use webshell_core::files::utils::file_name;
use webshell_core::files::{FileEntry, FileOperationRequest};

use crate::app::AppState;
use crate::error::{ApiError, ApiResponse};

type Target = Path<(String, String)>;
type JsonResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/:connection_id/user/:user_id/list", post(list))
        .route("/:connection_id/user/:user_id/read", post(read))
        .route("/:connection_id/user/:user_id/write", post(write))
        .route("/:connection_id/user/:user_id/mkdir", post(mkdir))
        .route("/:connection_id/user/:user_id/delete", post(delete))
        .route("/:connection_id/user/:user_id/rename", post(rename))
        .route("/:connection_id/user/:user_id/upload", post(upload))
        .route("/:connection_id/user/:user_id/download", post(download))
}

fn field(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or("")
}

async fn list(
    State(state): State<Arc<AppState>>,
    Path((connection_id, user_id)): Target,
    Json(req): Json<FileOperationRequest>,
) -> JsonResult<Vec<FileEntry>> {
    let entries = state
        .files
        .list(&connection_id, &user_id, field(&req.path))
        .await?;
    Ok(ApiResponse::ok("Listed directory", entries))
}

async fn read(
    State(state): State<Arc<AppState>>,
    Path((connection_id, user_id)): Target,
    Json(req): Json<FileOperationRequest>,
) -> JsonResult<String> {
    let content = state
        .files
        .read(&connection_id, &user_id, field(&req.path))
        .await?;
    Ok(ApiResponse::ok("Read file", content))
}

async fn write(
    State(state): State<Arc<AppState>>,
    Path((connection_id, user_id)): Target,
    Json(req): Json<FileOperationRequest>,
) -> JsonResult<bool> {
    state
        .files
        .write(&connection_id, &user_id, field(&req.path), field(&req.content))
        .await?;
    Ok(ApiResponse::ok("Wrote file", true))
}

async fn mkdir(
    State(state): State<Arc<AppState>>,
    Path((connection_id, user_id)): Target,
    Json(req): Json<FileOperationRequest>,
) -> JsonResult<bool> {
    state
        .files
        .mkdir(&connection_id, &user_id, field(&req.path))
        .await?;
    Ok(ApiResponse::ok("Created directory", true))
}

async fn delete(
    State(state): State<Arc<AppState>>,
    Path((connection_id, user_id)): Target,
    Json(req): Json<FileOperationRequest>,
) -> JsonResult<bool> {
    state
        .files
        .delete(&connection_id, &user_id, field(&req.path))
        .await?;
    Ok(ApiResponse::ok("Deleted", true))
}

async fn rename(
    State(state): State<Arc<AppState>>,
    Path((connection_id, user_id)): Target,
    Json(req): Json<FileOperationRequest>,
) -> JsonResult<bool> {
    state
        .files
        .rename(
            &connection_id,
            &user_id,
            field(&req.source_path),
            field(&req.target_path),
        )
        .await?;
    Ok(ApiResponse::ok("Renamed", true))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadQuery {
    remote_path: Option<String>,
}

async fn upload(
    State(state): State<Arc<AppState>>,
    Path((connection_id, user_id)): Target,
    Query(query): Query<UploadQuery>,
    mut multipart: Multipart,
) -> JsonResult<bool> {
    let mut content = None;
    while let Some(part) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Invalid multipart body: {e}")))?
    {
        if part.name() == Some("file") {
            let bytes = part
                .bytes()
                .await
                .map_err(|e| ApiError::BadRequest(format!("Failed to read upload: {e}")))?;
            content = Some(bytes.to_vec());
            break;
        }
    }
    let content =
        content.ok_or_else(|| ApiError::BadRequest("Multipart part `file` is missing".into()))?;

    debug!(
        "Uploading {} bytes to {} on {connection_id}",
        content.len(),
        field(&query.remote_path)
    );
    state
        .files
        .upload(&connection_id, &user_id, field(&query.remote_path), content)
        .await?;
    Ok(ApiResponse::ok("Uploaded file", true))
}

async fn download(
    State(state): State<Arc<AppState>>,
    Path((connection_id, user_id)): Target,
    Json(req): Json<FileOperationRequest>,
) -> Result<Response, ApiError> {
    let path = field(&req.path);
    let bytes = state.files.download(&connection_id, &user_id, path).await?;
    let headers = [
        (header::CONTENT_TYPE, "application/octet-stream".to_string()),
        (header::CONTENT_DISPOSITION, attachment_disposition(path)),
        (header::CONTENT_LENGTH, bytes.len().to_string()),
    ];
    Ok((headers, bytes).into_response())
}

/// `attachment; filename="<percent-encoded basename>"`.
fn attachment_disposition(path: &str) -> String {
    format!(
        "attachment; filename=\"{}\"",
        urlencoding::encode(file_name(path))
    )
}
