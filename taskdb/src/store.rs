use std::io::Write;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use chrono::{DateTime, SubsecRound, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{Result, StoreError};
use crate::registry::{DocumentLock, LockRegistry};

/// A record kept in a collection document.
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Opaque unique identifier, immutable after creation.
    fn id(&self) -> &str;

    /// Owning user, if the record is owner-scoped.
    fn owner_id(&self) -> Option<&str> {
        None
    }

    /// Stamp a mutation time. Records without an `updatedAt` ignore it.
    fn touch(&mut self, _at: DateTime<Utc>) {}
}

/// What to do with a document that exists but cannot be parsed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CorruptionPolicy {
    /// Fail with [`StoreError::Corrupt`] and never overwrite the document.
    #[default]
    Refuse,
    /// Log a warning and treat the document as an empty collection. The next
    /// successful write replaces it.
    TreatAsEmpty,
}

/// Which records an id lookup may match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope<'a> {
    /// Any record with the id, whoever owns it.
    Any,
    /// Only records owned by exactly this owner. `Owner(None)` matches
    /// owner-less records and nothing else.
    Owner(Option<&'a str>),
}

impl Scope<'_> {
    fn admits(self, owner: Option<&str>) -> bool {
        match self {
            Scope::Any => true,
            Scope::Owner(expected) => owner == expected,
        }
    }
}

/// Root of a set of JSON collection documents in one data directory.
#[derive(Debug, Clone)]
pub struct Store {
    data_dir: PathBuf,
    policy: CorruptionPolicy,
}

impl Store {
    /// Open a store with the default (refusing) corruption policy.
    pub fn open(data_dir: impl Into<PathBuf>) -> Self {
        StoreBuilder::new(data_dir).build()
    }

    /// Handle to the collection stored in `<data_dir>/<name>.json`.
    pub fn collection<T: Record>(&self, name: &str) -> Collection<T> {
        let path = self.data_dir.join(format!("{name}.json"));
        Collection {
            name: name.to_string(),
            lock: LockRegistry::global().lock_for(&path),
            path,
            policy: self.policy,
            _record: PhantomData,
        }
    }
}

/// Builder for [`Store`].
pub struct StoreBuilder {
    data_dir: PathBuf,
    policy: CorruptionPolicy,
}

impl StoreBuilder {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            policy: CorruptionPolicy::default(),
        }
    }

    pub fn with_corruption_policy(mut self, policy: CorruptionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn build(self) -> Store {
        Store {
            data_dir: self.data_dir,
            policy: self.policy,
        }
    }
}

/// One JSON document holding every record of type `T`.
///
/// Each operation holds the document's lock for its whole duration, so
/// overlapping `insert`/`update`/`remove` calls are applied one after the
/// other and none of them is lost. `load_all` followed by `save_all` is not
/// atomic as a pair; use `update` or `insert` for read-modify-write.
pub struct Collection<T> {
    name: String,
    path: PathBuf,
    lock: DocumentLock,
    policy: CorruptionPolicy,
    _record: PhantomData<fn() -> T>,
}

impl<T> Clone for Collection<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            path: self.path.clone(),
            lock: self.lock.clone(),
            policy: self.policy,
            _record: PhantomData,
        }
    }
}

impl<T> std::fmt::Debug for Collection<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection")
            .field("name", &self.name)
            .field("path", &self.path)
            .finish()
    }
}

impl<T: Record> Collection<T> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every record. An absent or blank document is an empty collection.
    pub async fn load_all(&self) -> Result<Vec<T>> {
        let _guard = self.lock.lock().await;
        self.read().await
    }

    /// Replace the document with `records`.
    pub async fn save_all(&self, records: &[T]) -> Result<()> {
        let _guard = self.lock.lock().await;
        self.write(records).await
    }

    /// Find a record by id within `scope`. A record outside the scope is
    /// reported exactly like a missing one.
    pub async fn find_by_id(&self, id: &str, scope: Scope<'_>) -> Result<T> {
        let records = self.load_all().await?;
        records
            .into_iter()
            .find(|r| matches(r, id, scope))
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    /// First record satisfying `predicate`.
    pub async fn find<P>(&self, predicate: P) -> Result<Option<T>>
    where
        P: Fn(&T) -> bool,
    {
        let records = self.load_all().await?;
        Ok(records.into_iter().find(|r| predicate(r)))
    }

    /// Append a record. A record whose id is already present is rejected.
    pub async fn insert(&self, record: T) -> Result<T> {
        self.insert_checked(record, |_| Ok(())).await
    }

    /// Append a record after `check` accepted the current contents. The check
    /// runs under the document lock, so it sees every earlier write.
    pub async fn insert_checked<C>(&self, record: T, check: C) -> Result<T>
    where
        C: FnOnce(&[T]) -> Result<()>,
    {
        let _guard = self.lock.lock().await;
        let mut records = self.read().await?;
        if records.iter().any(|r| r.id() == record.id()) {
            return Err(StoreError::Conflict(format!(
                "{} already contains {}",
                self.name,
                record.id()
            )));
        }
        check(&records)?;
        records.push(record.clone());
        self.write(&records).await?;
        log::debug!("Inserted {} into {}", record.id(), self.name);
        Ok(record)
    }

    /// Apply `mutator` to the matching record, stamp `updatedAt` and save.
    ///
    /// If the mutator returns an error nothing is written.
    pub async fn update<F>(&self, id: &str, scope: Scope<'_>, mutator: F) -> Result<T>
    where
        F: FnOnce(&mut T) -> Result<()>,
    {
        let _guard = self.lock.lock().await;
        let mut records = self.read().await?;
        let record = records
            .iter_mut()
            .find(|r| matches::<T>(r, id, scope))
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        mutator(record)?;
        record.touch(now());
        let updated = record.clone();
        self.write(&records).await?;
        log::debug!("Updated {id} in {}", self.name);
        Ok(updated)
    }

    /// Remove the matching record and return it so the caller can clean up
    /// anything stored alongside it. A miss writes nothing.
    pub async fn remove(&self, id: &str, scope: Scope<'_>) -> Result<T> {
        let _guard = self.lock.lock().await;
        let mut records = self.read().await?;
        let idx = records
            .iter()
            .position(|r| matches(r, id, scope))
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        let removed = records.remove(idx);
        self.write(&records).await?;
        log::debug!("Removed {id} from {}", self.name);
        Ok(removed)
    }

    // Callers must hold the document lock.
    async fn read(&self) -> Result<Vec<T>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        match serde_json::from_str(&content) {
            Ok(records) => Ok(records),
            Err(source) => match self.policy {
                CorruptionPolicy::Refuse => {
                    log::error!("Refusing to use {}: {source}", self.path.display());
                    Err(StoreError::Corrupt {
                        path: self.path.clone(),
                        source,
                    })
                }
                CorruptionPolicy::TreatAsEmpty => {
                    log::warn!(
                        "Could not parse {}, treating it as empty: {source}",
                        self.path.display()
                    );
                    Ok(Vec::new())
                }
            },
        }
    }

    // Callers must hold the document lock.
    async fn write(&self, records: &[T]) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(records)?;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_atomic(&path, &bytes))
            .await
            .map_err(std::io::Error::other)??;
        Ok(())
    }
}

fn matches<T: Record>(record: &T, id: &str, scope: Scope<'_>) -> bool {
    record.id() == id && scope.admits(record.owner_id())
}

/// Current time at the millisecond precision documents are stored with, so a
/// freshly stamped record equals the same record read back from disk.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

/// Write `bytes` to `path` through a temporary file in the same directory,
/// so readers see either the old or the new document, never a prefix.
fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.as_file_mut().write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
