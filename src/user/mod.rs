mod memory;
mod postgres;

pub use memory::MemoryUserRepository;
pub use postgres::PgUserRepository;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::database::StoreError;

/// User as saved on database.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub email: String,
    /// Argon2id PHC string.
    #[serde(skip)]
    pub password: String,
    pub created_at: DateTime<Utc>,
}

/// Account about to be inserted. `password` is already hashed.
#[derive(Clone, Debug)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub password: String,
}

/// Storage port for [`User`].
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Insert a user. A taken email fails with [`StoreError::Conflict`].
    async fn create(&self, user: &NewUser) -> Result<User, StoreError>;

    /// Find a user using its lower-cased `email`.
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;

    async fn email_exists(&self, email: &str) -> Result<bool, StoreError>;
}
