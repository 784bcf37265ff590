use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequest, Multipart, Path, Query, Request, State};
use axum::http::StatusCode;
use axum::http::header::CONTENT_TYPE;
use axum::response::IntoResponse;
use serde::Deserialize;
use serde_json::json;
use taskdb::{NewTask, StatusFilter, Task, TaskPatch};

use super::read_form;
use crate::auth::Principal;
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub filter: Option<String>,
}

pub async fn list(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Task>>, ApiError> {
    let filter = query
        .filter
        .as_deref()
        .unwrap_or_default()
        .parse::<StatusFilter>()
        .unwrap_or_default();
    let tasks = state.tasks.list(principal.owner(), filter).await?;
    Ok(Json(tasks))
}

pub async fn get(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(id): Path<String>,
) -> Result<Json<Task>, ApiError> {
    Ok(Json(state.tasks.get(&id, principal.owner()).await?))
}

/// Accepts a JSON body, or a multipart form with `title`, `description`,
/// `dueDate` and up to five `attachments` files.
pub async fn create(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    request: Request,
) -> Result<impl IntoResponse, ApiError> {
    let is_multipart = request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("multipart/form-data"));

    let task = if is_multipart {
        let multipart = Multipart::from_request(request, &state).await?;
        let form = read_form(multipart).await?;
        let new = NewTask {
            title: form.field("title").unwrap_or_default().to_string(),
            description: form.field("description").map(str::to_string),
            due_date: form.field("dueDate").map(str::to_string),
            attachments: Vec::new(),
        };
        state
            .tasks
            .create_with_uploads(principal.owner(), new, form.files)
            .await?
    } else {
        let Json(new) = Json::<NewTask>::from_request(request, &state).await?;
        state.tasks.create(principal.owner(), new).await?
    };
    Ok((StatusCode::CREATED, Json(task)))
}

pub async fn update(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(id): Path<String>,
    payload: Result<Json<TaskPatch>, JsonRejection>,
) -> Result<Json<Task>, ApiError> {
    let Json(patch) = payload?;
    Ok(Json(state.tasks.update(&id, principal.owner(), patch).await?))
}

pub async fn toggle(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(id): Path<String>,
) -> Result<Json<Task>, ApiError> {
    Ok(Json(state.tasks.toggle(&id, principal.owner()).await?))
}

pub async fn delete(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.tasks.delete(&id, principal.owner()).await?;
    Ok(Json(json!({ "message": "Deleted" })))
}

pub async fn upload(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(id): Path<String>,
    multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let form = read_form(multipart).await?;
    if form.files.is_empty() {
        return Err(ApiError::BadRequest("No files uploaded".into()));
    }
    let (_, added) = state.tasks.attach(&id, principal.owner(), form.files).await?;
    Ok(Json(json!({ "attachments": added })))
}

pub async fn remove_attachment(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path((id, filename)): Path<(String, String)>,
) -> Result<Json<Task>, ApiError> {
    Ok(Json(
        state
            .tasks
            .detach(&id, principal.owner(), &filename)
            .await?,
    ))
}
