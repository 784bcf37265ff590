use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Record with ID {0} not found")]
    NotFound(String),

    /// The task exists but has no attachment with this filename.
    #[error("Attachment {0} not found")]
    AttachmentNotFound(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    /// An uploaded payload exceeds the per-file size limit.
    #[error("Payload too large: {0}")]
    TooLarge(String),

    /// The document exists but is not a JSON array of records. It is left
    /// untouched on disk.
    #[error("Document {path} could not be parsed: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error), // Automatically converts std::io::Error to StoreError

    #[error("Serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Password hashing failed: {0}")]
    Hash(#[from] bcrypt::BcryptError),
}

impl StoreError {
    pub fn validation(msg: impl Into<String>) -> Self {
        StoreError::Validation(msg.into())
    }

    /// `true` for outcomes caused by the caller (bad input, missing record,
    /// uniqueness) rather than by the storage layer.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            StoreError::NotFound(_)
                | StoreError::AttachmentNotFound(_)
                | StoreError::Validation(_)
                | StoreError::Conflict(_)
                | StoreError::TooLarge(_)
        )
    }
}

pub type Result<T, E = StoreError> = std::result::Result<T, E>;
