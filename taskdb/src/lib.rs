//! # taskdb
//!
//! File-backed JSON record store for a personal to-do list.
//!
//! Each collection (tasks, users) is one pretty-printed JSON array on disk.
//! Every read-modify-write holds the collection's process-wide lock for its
//! whole duration, so concurrent requests never overwrite each other's
//! changes. Task access is owner-scoped: a record owned by someone else is
//! reported exactly like a missing one.
//!
//! ## Quick start
//!
//! ```ignore
//! use taskdb::{AttachmentStore, NewTask, StatusFilter, Store, TaskService};
//!
//! let store = Store::open("./data");
//! let tasks = TaskService::new(store.collection("tasks"), AttachmentStore::new("./uploads"));
//!
//! let task = tasks.create(Some("alice"), NewTask::titled("Buy milk")).await?;
//! tasks.toggle(&task.id, Some("alice")).await?;
//! let done = tasks.list(Some("alice"), StatusFilter::Completed).await?;
//! ```
//!
//! ## Key types
//!
//! - [`Store`] / [`Collection`]: JSON documents with serialized mutations
//! - [`TaskService`]: owner-scoped task operations and attachment lifecycle
//! - [`UserDirectory`]: accounts with bcrypt password hashes
//! - [`AttachmentStore`]: uploaded files under `<root>/<owner>/`
//! - [`ChangeNotification`]: event emitted after every task write

pub mod attachments;
pub mod error;
pub mod messages;
pub mod registry;
pub mod store;
pub mod tasks;
pub mod types;
pub mod users;

pub use attachments::AttachmentStore;
pub use error::{Result, StoreError};
pub use messages::{ChangeKind, ChangeNotification};
pub use registry::LockRegistry;
pub use store::{Collection, CorruptionPolicy, Record, Scope, Store, StoreBuilder};
pub use tasks::TaskService;
pub use types::{Attachment, NewTask, StatusFilter, Task, TaskPatch, Upload, User};
pub use users::UserDirectory;
