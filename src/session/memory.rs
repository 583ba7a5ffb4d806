use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use super::{RefreshSession, SessionStore};
use crate::database::StoreError;

/// In-memory [`SessionStore`], used by tests and database-less runs.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: DashMap<String, RefreshSession>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn remove_where(&self, predicate: impl Fn(&RefreshSession) -> bool) -> u64 {
        let mut removed = 0;
        self.sessions.retain(|_, session| {
            let remove = predicate(session);
            removed += u64::from(remove);
            !remove
        });
        removed
    }

    /// Number of stored sessions owned by `user_id`.
    #[cfg(test)]
    pub fn count_by_owner(&self, user_id: i64) -> usize {
        self.sessions
            .iter()
            .filter(|entry| entry.user_id == user_id)
            .count()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn create(&self, session: &RefreshSession) -> Result<(), StoreError> {
        match self.sessions.entry(session.jti.clone()) {
            Entry::Occupied(_) => Err(StoreError::Conflict(session.jti.clone())),
            Entry::Vacant(entry) => {
                entry.insert(session.clone());
                Ok(())
            },
        }
    }

    async fn get(&self, jti: &str) -> Result<Option<RefreshSession>, StoreError> {
        Ok(self.sessions.get(jti).map(|entry| entry.value().clone()))
    }

    async fn delete(&self, jti: &str) -> Result<bool, StoreError> {
        Ok(self.sessions.remove(jti).is_some())
    }

    async fn delete_by_owner(&self, user_id: i64) -> Result<u64, StoreError> {
        Ok(self.remove_where(|session| session.user_id == user_id))
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        Ok(self.remove_where(|session| session.is_expired(now)))
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn session(jti: &str, user_id: i64, expires_in: Duration) -> RefreshSession {
        let now = Utc::now();
        RefreshSession {
            jti: jti.into(),
            user_id,
            user_agent: "test".into(),
            ip_address: "127.0.0.1".into(),
            created_at: now,
            expires_at: now + expires_in,
        }
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let store = MemorySessionStore::new();
        let record = session("a", 1, Duration::days(1));

        store.create(&record).await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), Some(record.clone()));
        assert_eq!(store.get("b").await.unwrap(), None);

        assert!(matches!(
            store.create(&record).await,
            Err(StoreError::Conflict(jti)) if jti == "a"
        ));
    }

    #[tokio::test]
    async fn test_delete_reports_removal_once() {
        let store = MemorySessionStore::new();
        store.create(&session("a", 1, Duration::days(1))).await.unwrap();

        assert!(store.delete("a").await.unwrap());
        assert!(!store.delete("a").await.unwrap());
        assert!(!store.delete("missing").await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_by_owner() {
        let store = MemorySessionStore::new();
        for (jti, owner) in [("a", 1), ("b", 1), ("c", 2)] {
            store.create(&session(jti, owner, Duration::days(1))).await.unwrap();
        }

        assert_eq!(store.delete_by_owner(1).await.unwrap(), 2);
        assert_eq!(store.delete_by_owner(1).await.unwrap(), 0);
        assert_eq!(store.count_by_owner(2), 1);
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let store = MemorySessionStore::new();
        store.create(&session("old", 1, Duration::seconds(-1))).await.unwrap();
        store.create(&session("new", 1, Duration::days(1))).await.unwrap();

        assert_eq!(store.purge_expired(Utc::now()).await.unwrap(), 1);
        assert!(store.get("old").await.unwrap().is_none());
        assert!(store.get("new").await.unwrap().is_some());
    }
}
