//! Per-document lock registry.
//!
//! Every collection document has exactly one async mutex per process. The
//! [`LockRegistry`] hands out that mutex by absolute path, so two
//! [`Store`](crate::Store) handles opened on the same directory still
//! serialize their read-modify-write sequences against each other.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock, Mutex};

/// Shared lock guarding one collection document.
pub type DocumentLock = Arc<tokio::sync::Mutex<()>>;

static GLOBAL: LazyLock<LockRegistry> = LazyLock::new(LockRegistry::new);

/// Registry of document locks, keyed by absolute path.
///
/// Thread-safe via an interior `Mutex`. Entries are never removed; a process
/// only ever touches a handful of documents.
#[derive(Debug, Default)]
pub struct LockRegistry {
    locks: Mutex<HashMap<PathBuf, DocumentLock>>,
}

impl LockRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// The process-wide registry used by [`Store`](crate::Store).
    pub fn global() -> &'static LockRegistry {
        &GLOBAL
    }

    /// Return the lock for `path`, creating it on first use.
    pub fn lock_for(&self, path: &Path) -> DocumentLock {
        let key = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(key).or_default().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracked(registry: &LockRegistry) -> usize {
        registry.locks.lock().unwrap().len()
    }

    #[test]
    fn test_same_path_shares_lock() {
        let registry = LockRegistry::new();
        let a = registry.lock_for(Path::new("data/tasks.json"));
        let b = registry.lock_for(Path::new("data/tasks.json"));
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(tracked(&registry), 1);
    }

    #[test]
    fn test_relative_and_absolute_paths_share_lock() {
        let registry = LockRegistry::new();
        let relative = Path::new("data/users.json");
        let absolute = std::path::absolute(relative).unwrap();
        let a = registry.lock_for(relative);
        let b = registry.lock_for(&absolute);
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_distinct_documents_get_distinct_locks() {
        let registry = LockRegistry::new();
        let a = registry.lock_for(Path::new("data/tasks.json"));
        let b = registry.lock_for(Path::new("data/users.json"));
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(tracked(&registry), 2);
    }
}
