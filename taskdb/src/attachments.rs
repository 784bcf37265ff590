//! Attachment files stored outside the task document.
//!
//! Files live under `<root>/<owner>/<filename>`. Owner-less tasks use the
//! [`ANONYMOUS_OWNER`] directory. Stored names are `<uuid>-<original>`, with
//! whitespace in the original replaced by `_`, so concurrent uploads of the
//! same file never collide.

use std::path::{Component, Path, PathBuf};

use uuid::Uuid;

use crate::error::{Result, StoreError};
use crate::types::{Attachment, Upload};

/// Directory used for uploads that have no owner.
pub const ANONYMOUS_OWNER: &str = "anonymous";

/// URL prefix under which stored attachments are served.
pub const DEFAULT_URL_PREFIX: &str = "/api/uploads";

/// Maximum number of files accepted in one upload.
pub const MAX_FILES: usize = 5;

/// Maximum size of a single uploaded file.
pub const MAX_FILE_SIZE: usize = 5 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct AttachmentStore {
    root: PathBuf,
    url_prefix: String,
}

impl AttachmentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            url_prefix: DEFAULT_URL_PREFIX.to_string(),
        }
    }

    pub fn with_url_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.url_prefix = prefix.into().trim_end_matches('/').to_string();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write every upload into the owner's directory.
    ///
    /// If one write fails, the files already written by this call are removed
    /// before the error is returned.
    pub async fn save(&self, owner: Option<&str>, uploads: Vec<Upload>) -> Result<Vec<Attachment>> {
        if uploads.len() > MAX_FILES {
            return Err(StoreError::validation(format!(
                "At most {MAX_FILES} files per upload"
            )));
        }
        if let Some(big) = uploads.iter().find(|u| u.bytes.len() > MAX_FILE_SIZE) {
            return Err(StoreError::TooLarge(format!(
                "{} exceeds the {MAX_FILE_SIZE} byte limit",
                big.original_name
            )));
        }

        let owner = owner_dir(owner);
        if !is_plain_name(owner) {
            return Err(StoreError::validation("Invalid owner"));
        }
        let dir = self.root.join(owner);
        tokio::fs::create_dir_all(&dir).await?;

        let mut saved: Vec<Attachment> = Vec::with_capacity(uploads.len());
        for upload in uploads {
            let filename = format!("{}-{}", Uuid::new_v4().simple(), sanitize(&upload.original_name));
            if let Err(e) = tokio::fs::write(dir.join(&filename), &upload.bytes).await {
                log::error!("Failed to store {filename}: {e}");
                for attachment in &saved {
                    self.delete(Some(owner), &attachment.filename).await;
                }
                return Err(e.into());
            }
            log::debug!("Stored {} as {owner}/{filename}", upload.original_name);
            saved.push(Attachment {
                path: format!("{}/{owner}/{filename}", self.url_prefix),
                filename,
                original_name: upload.original_name,
            });
        }
        Ok(saved)
    }

    /// Remove a stored file. Failures, including a file that is already gone,
    /// are logged and otherwise ignored.
    pub async fn delete(&self, owner: Option<&str>, filename: &str) {
        let path = match self.locate(owner_dir(owner), filename) {
            Ok(path) => path,
            Err(e) => {
                log::warn!("Not deleting attachment {filename:?}: {e}");
                return;
            }
        };
        match tokio::fs::remove_file(&path).await {
            Ok(()) => log::debug!("Deleted {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::warn!("Could not delete {}: already missing", path.display())
            }
            Err(e) => log::warn!("Could not delete {}: {e}", path.display()),
        }
    }

    /// Resolve the on-disk path of `owner/filename`.
    ///
    /// Both parts must be single plain path components.
    pub fn locate(&self, owner: &str, filename: &str) -> Result<PathBuf> {
        if !is_plain_name(owner) || !is_plain_name(filename) {
            return Err(StoreError::validation("Invalid file name"));
        }
        Ok(self.root.join(owner).join(filename))
    }
}

/// Directory name for an optional owner.
pub fn owner_dir(owner: Option<&str>) -> &str {
    owner.unwrap_or(ANONYMOUS_OWNER)
}

/// `true` when `name` is a single normal path component (no separators,
/// no `.`/`..`, not empty).
pub fn is_plain_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    ) && !name.contains(['/', '\\'])
}

fn sanitize(original: &str) -> String {
    let base = original
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| if c.is_whitespace() { '_' } else { c })
        .filter(|c| !c.is_control())
        .collect();
    match cleaned.trim_matches('.') {
        "" => "file".to_string(),
        _ => cleaned,
    }
}
