use std::sync::Arc;

use axum::Json;
use axum::extract::{Multipart, Path, State};
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::response::IntoResponse;
use serde_json::json;
use taskdb::attachments::owner_dir;

use super::read_form;
use crate::auth::Principal;
use crate::error::ApiError;
use crate::state::AppState;

/// Store files without binding them to a task. The returned attachment
/// triples are later passed along with `createTask`.
pub async fn upload(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let form = read_form(multipart).await?;
    if form.files.is_empty() {
        return Err(ApiError::BadRequest("No files uploaded".into()));
    }
    let stored = state.tasks.upload(principal.owner(), form.files).await?;
    Ok(Json(json!({ "attachments": stored })))
}

/// Serve a stored attachment. Only the owning session (or anyone, for the
/// anonymous directory in anonymous mode) may read it.
pub async fn download(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path((owner, filename)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    if owner != owner_dir(principal.owner()) {
        return Err(ApiError::Forbidden);
    }
    let path = state
        .tasks
        .files()
        .locate(&owner, &filename)
        .map_err(|_| ApiError::NotFound("File not found"))?;

    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ApiError::NotFound("File not found"));
        }
        Err(e) => return Err(ApiError::internal(e)),
    };
    let mime = mime_guess::from_path(&path).first_or_octet_stream();
    Ok((
        [
            (CONTENT_TYPE, mime.to_string()),
            (CONTENT_DISPOSITION, "inline".to_string()),
        ],
        bytes,
    ))
}
