use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::http::header::SET_COOKIE;
use axum::response::IntoResponse;
use serde::Deserialize;
use serde_json::json;
use taskdb::StoreError;

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct Credentials {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

pub async fn register(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<Credentials>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(credentials) = payload?;
    state
        .users
        .register(&credentials.username, &credentials.password)
        .await?;
    Ok((StatusCode::CREATED, Json(json!({ "message": "Registered" }))))
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<Credentials>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(credentials) = payload?;
    if credentials.username.trim().is_empty() || credentials.password.is_empty() {
        return Err(ApiError::BadRequest("Username and password required".into()));
    }
    let user = state
        .users
        .authenticate(&credentials.username, &credentials.password)
        .await?
        .ok_or(ApiError::Unauthorized("Invalid credentials"))?;

    let token = state.tokens.issue(&user)?;
    let cookie = state.tokens.session_cookie(token);
    log::info!("User {} logged in", user.username);
    Ok((
        [(SET_COOKIE, cookie.to_string())],
        Json(json!({ "message": "OK", "user": { "username": user.username } })),
    ))
}

pub async fn logout(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let cookie = state.tokens.removal_cookie();
    (
        [(SET_COOKIE, cookie.to_string())],
        Json(json!({ "message": "Logged out" })),
    )
}

/// The session's account, as long as it still exists.
pub async fn me(
    State(state): State<Arc<AppState>>,
    AuthUser(claims): AuthUser,
) -> Result<impl IntoResponse, ApiError> {
    let user = match state.users.get(&claims.id).await {
        Ok(user) => user,
        Err(StoreError::NotFound(_)) => return Err(ApiError::Unauthorized("Unauthorized")),
        Err(e) => return Err(e.into()),
    };
    Ok(Json(json!({ "user": { "id": user.id, "username": user.username } })))
}
