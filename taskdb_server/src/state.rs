use std::sync::Arc;

use taskdb::{AttachmentStore, CorruptionPolicy, StoreBuilder, TaskService, UserDirectory};

use crate::auth::{TokenAuthority, load_or_create_secret};
use crate::config::Config;
use crate::graphql::{TaskSchema, build_schema};

/// Everything a request handler needs. One instance is shared by every
/// front-end, so a write through any of them reaches all subscribers.
pub struct AppState {
    pub config: Config,
    pub tasks: TaskService,
    pub users: UserDirectory,
    pub tokens: TokenAuthority,
    pub schema: TaskSchema,
}

impl AppState {
    pub fn new(config: Config) -> std::io::Result<Arc<Self>> {
        let policy = if config.lenient_documents {
            CorruptionPolicy::TreatAsEmpty
        } else {
            CorruptionPolicy::Refuse
        };
        let store = StoreBuilder::new(&config.data_dir)
            .with_corruption_policy(policy)
            .build();

        let tasks = TaskService::new(
            store.collection("tasks"),
            AttachmentStore::new(&config.uploads_dir),
        );
        let users = UserDirectory::new(store.collection("users"));

        let secret = load_or_create_secret(&config.secret_path())?;
        let tokens = TokenAuthority::new(secret.as_bytes(), config.token_ttl)
            .with_secure_cookies(config.secure_cookies);

        let schema = build_schema(
            tasks.clone(),
            users.clone(),
            tokens.clone(),
            config.allow_anonymous,
        );

        log::info!(
            "Data in {}, uploads in {}",
            config.data_dir.display(),
            config.uploads_dir.display()
        );

        Ok(Arc::new(Self {
            config,
            tasks,
            users,
            tokens,
            schema,
        }))
    }
}
