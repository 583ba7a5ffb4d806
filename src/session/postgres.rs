use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres};

use super::{RefreshSession, SessionStore};
use crate::database::StoreError;

/// PostgreSQL [`SessionStore`] on the `refresh_sessions` table.
#[derive(Clone, Debug)]
pub struct PgSessionStore {
    pool: Pool<Postgres>,
}

impl PgSessionStore {
    /// Create a new [`PgSessionStore`].
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn create(&self, session: &RefreshSession) -> Result<(), StoreError> {
        sqlx::query(
            r#"INSERT INTO refresh_sessions (jti, user_id, user_agent, ip_address, created_at, expires_at)
                VALUES ($1, $2, $3, $4, $5, $6)"#,
        )
        .bind(&session.jti)
        .bind(session.user_id)
        .bind(&session.user_agent)
        .bind(&session.ip_address)
        .bind(session.created_at)
        .bind(session.expires_at)
        .execute(&self.pool)
        .await
        .map_err(|err| StoreError::from_insert(err, &session.jti))?;

        Ok(())
    }

    async fn get(&self, jti: &str) -> Result<Option<RefreshSession>, StoreError> {
        Ok(sqlx::query_as::<_, RefreshSession>(
            r#"SELECT jti, user_id, user_agent, ip_address, created_at, expires_at
                FROM refresh_sessions WHERE jti = $1"#,
        )
        .bind(jti)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn delete(&self, jti: &str) -> Result<bool, StoreError> {
        // Two concurrent deletes of one row: only one sees it affected.
        let result = sqlx::query("DELETE FROM refresh_sessions WHERE jti = $1")
            .bind(jti)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn delete_by_owner(&self, user_id: i64) -> Result<u64, StoreError> {
        let result =
            sqlx::query("DELETE FROM refresh_sessions WHERE user_id = $1")
                .bind(user_id)
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let result =
            sqlx::query("DELETE FROM refresh_sessions WHERE expires_at <= $1")
                .bind(now)
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected())
    }
}
