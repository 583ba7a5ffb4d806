use std::cmp::Ordering as CmpOrdering;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;

use super::{ListQuery, NewTodo, Sort, Todo, TodoRepository};
use crate::database::StoreError;

/// In-memory [`TodoRepository`].
#[derive(Debug, Default)]
pub struct MemoryTodoRepository {
    todos: DashMap<i64, Todo>,
    next_id: AtomicI64,
}

impl MemoryTodoRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

fn compare(sort: Sort, a: &Todo, b: &Todo) -> CmpOrdering {
    match sort {
        Sort::CreatedAt => b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)),
        Sort::Title => a.title.cmp(&b.title).then(a.id.cmp(&b.id)),
        Sort::UpdatedAt => b.updated_at.cmp(&a.updated_at).then(b.id.cmp(&a.id)),
    }
}

#[async_trait]
impl TodoRepository for MemoryTodoRepository {
    async fn create(&self, todo: &NewTodo) -> Result<Todo, StoreError> {
        let now = Utc::now();
        let todo = Todo {
            id: self.next_id.fetch_add(1, Ordering::Relaxed) + 1,
            user_id: todo.user_id,
            title: todo.title.clone(),
            description: todo.description.clone(),
            completed: false,
            created_at: now,
            updated_at: now,
        };

        self.todos.insert(todo.id, todo.clone());
        Ok(todo)
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<Todo>, StoreError> {
        Ok(self.todos.get(&id).map(|entry| entry.value().clone()))
    }

    async fn list(
        &self,
        user_id: i64,
        query: &ListQuery,
    ) -> Result<(Vec<Todo>, i64), StoreError> {
        let mut todos: Vec<Todo> = self
            .todos
            .iter()
            .filter(|entry| entry.user_id == user_id)
            .filter(|entry| {
                query
                    .status
                    .is_none_or(|status| entry.completed == status.completed())
            })
            .map(|entry| entry.value().clone())
            .collect();

        let total = todos.len() as i64;
        todos.sort_by(|a, b| compare(query.sort, a, b));

        let page = todos
            .into_iter()
            .skip(usize::try_from(query.offset()).unwrap_or(usize::MAX))
            .take(usize::try_from(query.limit).unwrap_or(0))
            .collect();

        Ok((page, total))
    }

    async fn update(&self, todo: &Todo) -> Result<Option<Todo>, StoreError> {
        let Some(mut entry) = self
            .todos
            .get_mut(&todo.id)
            .filter(|entry| entry.user_id == todo.user_id)
        else {
            return Ok(None);
        };

        entry.title = todo.title.clone();
        entry.description = todo.description.clone();
        entry.completed = todo.completed;
        entry.updated_at = Utc::now();

        Ok(Some(entry.clone()))
    }

    async fn delete(&self, id: i64, user_id: i64) -> Result<bool, StoreError> {
        Ok(self
            .todos
            .remove_if(&id, |_, todo| todo.user_id == user_id)
            .is_some())
    }
}
