//! Todos owned by users.

mod memory;
mod postgres;

pub use memory::MemoryTodoRepository;
pub use postgres::PgTodoRepository;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::database::StoreError;

pub const DEFAULT_PAGE: i64 = 1;
pub const DEFAULT_LIMIT: i64 = 10;
pub const MAX_LIMIT: i64 = 100;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Todo {
    pub id: i64,
    #[serde(skip)]
    pub user_id: i64,
    pub title: String,
    pub description: String,
    pub completed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct NewTodo {
    pub user_id: i64,
    pub title: String,
    pub description: String,
}

/// Filter on the `completed` flag.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    Completed,
    Pending,
}

impl Status {
    /// Parse `completed` or `pending`. Anything else means no filter.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "completed" => Some(Self::Completed),
            "pending" => Some(Self::Pending),
            _ => None,
        }
    }

    fn completed(self) -> bool {
        self == Self::Completed
    }
}

/// Whitelisted orderings.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Sort {
    /// Newest first.
    #[default]
    CreatedAt,
    /// Alphabetical.
    Title,
    /// Most recently updated first.
    UpdatedAt,
}

impl Sort {
    pub fn parse(value: &str) -> Self {
        match value {
            "title" => Self::Title,
            "updated_at" => Self::UpdatedAt,
            _ => Self::CreatedAt,
        }
    }

    fn as_sql(self) -> &'static str {
        match self {
            Self::CreatedAt => "created_at DESC, id DESC",
            Self::Title => "title ASC, id ASC",
            Self::UpdatedAt => "updated_at DESC, id DESC",
        }
    }
}

/// Normalized listing parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ListQuery {
    pub page: i64,
    pub limit: i64,
    pub status: Option<Status>,
    pub sort: Sort,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            page: DEFAULT_PAGE,
            limit: DEFAULT_LIMIT,
            status: None,
            sort: Sort::default(),
        }
    }
}

impl ListQuery {
    /// Build from raw query-string values. Unparsable or out of range page
    /// and limit fall back to their defaults.
    pub fn new(
        page: Option<&str>,
        limit: Option<&str>,
        status: Option<&str>,
        sort_by: Option<&str>,
    ) -> Self {
        let page = page
            .and_then(|page| page.trim().parse::<i64>().ok())
            .filter(|page| *page >= 1)
            .unwrap_or(DEFAULT_PAGE);
        let limit = limit
            .and_then(|limit| limit.trim().parse::<i64>().ok())
            .filter(|limit| (1..=MAX_LIMIT).contains(limit))
            .unwrap_or(DEFAULT_LIMIT);

        Self {
            page,
            limit,
            status: status.and_then(Status::parse),
            sort: sort_by.map(Sort::parse).unwrap_or_default(),
        }
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1).saturating_mul(self.limit)
    }
}

/// Storage port for [`Todo`].
#[async_trait]
pub trait TodoRepository: Send + Sync {
    async fn create(&self, todo: &NewTodo) -> Result<Todo, StoreError>;

    async fn find_by_id(&self, id: i64) -> Result<Option<Todo>, StoreError>;

    /// One page of a user's todos, and the size of the filtered set.
    async fn list(
        &self,
        user_id: i64,
        query: &ListQuery,
    ) -> Result<(Vec<Todo>, i64), StoreError>;

    /// Save title, description and completion of a todo owned by
    /// `todo.user_id`. Returns `None` when no such todo exists.
    async fn update(&self, todo: &Todo) -> Result<Option<Todo>, StoreError>;

    /// Returns `false` when the todo is missing or owned by someone else.
    async fn delete(&self, id: i64, user_id: i64) -> Result<bool, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_query_defaults() {
        assert_eq!(ListQuery::new(None, None, None, None), ListQuery::default());

        let query = ListQuery::new(Some("0"), Some("101"), Some("done"), Some("name"));
        assert_eq!(query, ListQuery::default());

        let query = ListQuery::new(Some("abc"), Some("-3"), None, None);
        assert_eq!(query, ListQuery::default());
    }

    #[test]
    fn test_list_query_values() {
        let query = ListQuery::new(Some("3"), Some("100"), Some("pending"), Some("title"));

        assert_eq!(query.page, 3);
        assert_eq!(query.limit, 100);
        assert_eq!(query.status, Some(Status::Pending));
        assert_eq!(query.sort, Sort::Title);
        assert_eq!(query.offset(), 200);
    }
}
