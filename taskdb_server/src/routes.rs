//! REST handlers, grouped by resource.

use axum::Json;
use axum::extract::Multipart;
use axum::extract::multipart::{MultipartError, MultipartRejection};
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use serde_json::{Value, json};
use taskdb::Upload;
use taskdb::attachments::{MAX_FILE_SIZE, MAX_FILES};

use crate::error::ApiError;

pub mod auth;
pub mod tasks;
pub mod uploads;

/// Liveness check for load balancers.
pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Multipart field that carries attachment files.
pub const ATTACHMENTS_FIELD: &str = "attachments";

/// Request body cap: a full batch of maximum-size files plus form overhead.
pub const BODY_LIMIT: usize = MAX_FILES * MAX_FILE_SIZE + 1024 * 1024;

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<MultipartRejection> for ApiError {
    fn from(rejection: MultipartRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<MultipartError> for ApiError {
    fn from(e: MultipartError) -> Self {
        match e.status() {
            StatusCode::PAYLOAD_TOO_LARGE => ApiError::PayloadTooLarge(e.body_text()),
            _ => ApiError::BadRequest(e.body_text()),
        }
    }
}

/// A parsed multipart form: attachment files plus plain text fields.
#[derive(Debug, Default)]
pub struct UploadForm {
    pub files: Vec<Upload>,
    pub fields: Vec<(String, String)>,
}

impl UploadForm {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Read every part of `multipart`. Limits are enforced while streaming, so an
/// oversized request fails before it is fully buffered.
pub async fn read_form(mut multipart: Multipart) -> Result<UploadForm, ApiError> {
    let mut form = UploadForm::default();
    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        let Some(original_name) = field.file_name().map(str::to_string) else {
            let value = field.text().await?;
            form.fields.push((name, value));
            continue;
        };

        if name != ATTACHMENTS_FIELD {
            return Err(ApiError::BadRequest(format!("Unexpected file field {name:?}")));
        }
        if form.files.len() == MAX_FILES {
            return Err(ApiError::BadRequest(format!(
                "Too many files, at most {MAX_FILES} allowed"
            )));
        }
        let bytes = field.bytes().await?;
        if bytes.len() > MAX_FILE_SIZE {
            return Err(ApiError::PayloadTooLarge(format!(
                "{original_name} is larger than {} MiB",
                MAX_FILE_SIZE / (1024 * 1024)
            )));
        }
        form.files.push(Upload::new(original_name, bytes.to_vec()));
    }
    Ok(form)
}
