use uuid::Uuid;

use crate::error::{Result, StoreError};
use crate::store::{self, Collection, Scope};
use crate::types::User;

/// bcrypt work factor for new password hashes.
pub const HASH_COST: u32 = 10;

/// Account registry backed by the `users` collection.
#[derive(Debug, Clone)]
pub struct UserDirectory {
    users: Collection<User>,
}

impl UserDirectory {
    pub fn new(users: Collection<User>) -> Self {
        Self { users }
    }

    /// Create an account. Usernames are stored verbatim and compared exactly;
    /// the uniqueness check happens under the collection lock, so two
    /// concurrent registrations cannot both succeed.
    pub async fn register(&self, username: &str, password: &str) -> Result<User> {
        if username.trim().is_empty() || password.is_empty() {
            return Err(StoreError::validation("Username and password required"));
        }

        let password = password.to_string();
        let password_hash = tokio::task::spawn_blocking(move || bcrypt::hash(password, HASH_COST))
            .await
            .map_err(std::io::Error::other)??;

        let user = User {
            id: Uuid::new_v4().to_string(),
            username: username.to_string(),
            password_hash,
            created_at: store::now(),
        };
        let user = self
            .users
            .insert_checked(user, |existing| {
                if existing.iter().any(|u| u.username == username) {
                    return Err(StoreError::Conflict("User exists".to_string()));
                }
                Ok(())
            })
            .await?;
        log::info!("Registered user {}", user.username);
        Ok(user)
    }

    /// Check credentials. Unknown users and wrong passwords both yield `None`.
    pub async fn authenticate(&self, username: &str, password: &str) -> Result<Option<User>> {
        let Some(user) = self.users.find(|u| u.username == username).await? else {
            return Ok(None);
        };

        let password = password.to_string();
        let hash = user.password_hash.clone();
        let valid = tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
            .await
            .map_err(std::io::Error::other)?
            .unwrap_or_else(|e| {
                log::warn!("Unreadable password hash: {e}");
                false
            });
        Ok(valid.then_some(user))
    }

    /// Look up an account by id.
    pub async fn get(&self, id: &str) -> Result<User> {
        self.users.find_by_id(id, Scope::Any).await
    }
}
