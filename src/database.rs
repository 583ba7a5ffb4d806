//! PostgreSQL pool and storage errors shared by every repository.
use std::time::Duration;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use crate::config::Postgres;

pub const DEFAULT_CREDENTIALS: &str = "postgres";
pub const DEFAULT_DATABASE_NAME: &str = "tasklane";
pub const DEFAULT_POOL_SIZE: u32 = 25;
const MIN_CONNECTIONS: u32 = 5;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_LIFETIME: Duration = Duration::from_secs(60 * 60);
const IDLE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Failure of a storage backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A unique constraint refused the record.
    #[error("record already exists: {0}")]
    Conflict(String),
    #[error(transparent)]
    Sql(#[from] sqlx::Error),
}

impl StoreError {
    /// Turn unique violations into [`StoreError::Conflict`].
    pub fn from_insert(err: sqlx::Error, key: &str) -> Self {
        match err.as_database_error() {
            Some(db) if db.is_unique_violation() => Self::Conflict(key.to_owned()),
            _ => Self::Sql(err),
        }
    }
}

/// Custom db structure to pass to Axum.
#[derive(Clone, Debug)]
pub struct Database {
    pub postgres: PgPool,
}

impl Database {
    /// Init database connections.
    pub async fn new(config: &Postgres) -> Result<Self, sqlx::Error> {
        let max = config.pool_size.unwrap_or(DEFAULT_POOL_SIZE);
        let pool = PgPoolOptions::new()
            .max_connections(max)
            .min_connections(MIN_CONNECTIONS.min(max))
            .acquire_timeout(CONNECT_TIMEOUT)
            .max_lifetime(MAX_LIFETIME)
            .idle_timeout(IDLE_TIMEOUT);
        let postgres = pool.connect(&connection_url(config)).await?;

        tracing::info!(hostname = %config.address, "postgres connected");

        Ok(Self { postgres })
    }

    /// Execute migrations scripts.
    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!().run(&self.postgres).await
    }
}

fn connection_url(config: &Postgres) -> String {
    if let Some(url) = &config.url {
        return url.clone();
    }

    let username = config.username.as_deref().unwrap_or(DEFAULT_CREDENTIALS);
    let password = config.password.as_deref().unwrap_or(DEFAULT_CREDENTIALS);
    let database = config.database.as_deref().unwrap_or(DEFAULT_DATABASE_NAME);

    format!("postgres://{username}:{password}@{}/{database}", config.address)
}
