//! Refresh sessions: server-side records backing every live refresh token.
//!
//! A session is keyed by the `jti` of its refresh token. Sessions are never
//! updated; rotation inserts a new record and deletes the old one, and the
//! delete is what makes a refresh token single-use.

mod manager;
mod memory;
mod postgres;

pub use manager::*;
pub use memory::MemorySessionStore;
pub use postgres::PgSessionStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::database::StoreError;
use crate::token::TokenError;

/// Errors raised by the session lifecycle.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Missing, invalid, expired or already consumed credential.
    #[error("unauthorized")]
    Unauthorized,
    #[error(transparent)]
    Token(#[from] TokenError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Durable record of a live refresh token.
#[derive(Clone, Debug, PartialEq, sqlx::FromRow)]
pub struct RefreshSession {
    pub jti: String,
    pub user_id: i64,
    pub user_agent: String,
    pub ip_address: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl RefreshSession {
    /// Whether the session can no longer be used at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Authenticated caller, as asserted by a verified access token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    pub user_id: i64,
    pub email: String,
}

/// Request metadata recorded on new sessions.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClientMeta {
    pub user_agent: String,
    pub ip_address: String,
}

/// Storage port for [`RefreshSession`].
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Insert a session. A duplicate `jti` fails with [`StoreError::Conflict`].
    async fn create(&self, session: &RefreshSession) -> std::result::Result<(), StoreError>;

    /// Exact-match lookup by `jti`.
    async fn get(&self, jti: &str) -> std::result::Result<Option<RefreshSession>, StoreError>;

    /// Remove a session. Returns `true` only for the caller that removed it.
    async fn delete(&self, jti: &str) -> std::result::Result<bool, StoreError>;

    /// Remove every session of a user and return how many were removed.
    async fn delete_by_owner(&self, user_id: i64) -> std::result::Result<u64, StoreError>;

    /// Remove sessions expired at `now`.
    async fn purge_expired(&self, now: DateTime<Utc>) -> std::result::Result<u64, StoreError>;
}
