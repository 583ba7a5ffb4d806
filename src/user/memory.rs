use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use super::{NewUser, User, UserRepository};
use crate::database::StoreError;

/// In-memory [`UserRepository`], keyed by email.
#[derive(Debug, Default)]
pub struct MemoryUserRepository {
    users: DashMap<String, User>,
    next_id: AtomicI64,
}

impl MemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserRepository for MemoryUserRepository {
    async fn create(&self, user: &NewUser) -> Result<User, StoreError> {
        match self.users.entry(user.email.clone()) {
            Entry::Occupied(_) => Err(StoreError::Conflict(user.email.clone())),
            Entry::Vacant(entry) => {
                let user = User {
                    id: self.next_id.fetch_add(1, Ordering::Relaxed) + 1,
                    name: user.name.clone(),
                    email: user.email.clone(),
                    password: user.password.clone(),
                    created_at: Utc::now(),
                };
                entry.insert(user.clone());
                Ok(user)
            },
        }
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        Ok(self.users.get(email).map(|entry| entry.value().clone()))
    }

    async fn email_exists(&self, email: &str) -> Result<bool, StoreError> {
        Ok(self.users.contains_key(email))
    }
}
