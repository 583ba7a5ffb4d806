use async_trait::async_trait;
use sqlx::{Pool, Postgres, QueryBuilder};

use super::{ListQuery, NewTodo, Todo, TodoRepository};
use crate::database::StoreError;

const COLUMNS: &str =
    "id, user_id, title, description, completed, created_at, updated_at";

#[derive(Clone, Debug)]
pub struct PgTodoRepository {
    pool: Pool<Postgres>,
}

impl PgTodoRepository {
    /// Create a new [`PgTodoRepository`].
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

fn push_filters(builder: &mut QueryBuilder<'_, Postgres>, user_id: i64, query: &ListQuery) {
    builder.push(" WHERE user_id = ").push_bind(user_id);

    if let Some(status) = query.status {
        builder.push(" AND completed = ").push_bind(status.completed());
    }
}

#[async_trait]
impl TodoRepository for PgTodoRepository {
    async fn create(&self, todo: &NewTodo) -> Result<Todo, StoreError> {
        Ok(sqlx::query_as::<_, Todo>(&format!(
            "INSERT INTO todos (user_id, title, description) VALUES ($1, $2, $3) RETURNING {COLUMNS}"
        ))
        .bind(todo.user_id)
        .bind(&todo.title)
        .bind(&todo.description)
        .fetch_one(&self.pool)
        .await?)
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<Todo>, StoreError> {
        Ok(
            sqlx::query_as::<_, Todo>(&format!("SELECT {COLUMNS} FROM todos WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn list(
        &self,
        user_id: i64,
        query: &ListQuery,
    ) -> Result<(Vec<Todo>, i64), StoreError> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM todos");
        push_filters(&mut count, user_id, query);
        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;

        let mut select =
            QueryBuilder::<Postgres>::new(format!("SELECT {COLUMNS} FROM todos"));
        push_filters(&mut select, user_id, query);
        // Ordering comes from a whitelist, never from the request.
        select
            .push(" ORDER BY ")
            .push(query.sort.as_sql())
            .push(" LIMIT ")
            .push_bind(query.limit)
            .push(" OFFSET ")
            .push_bind(query.offset());

        let todos = select
            .build_query_as::<Todo>()
            .fetch_all(&self.pool)
            .await?;

        Ok((todos, total))
    }

    async fn update(&self, todo: &Todo) -> Result<Option<Todo>, StoreError> {
        Ok(sqlx::query_as::<_, Todo>(&format!(
            r#"UPDATE todos
                SET title = $1, description = $2, completed = $3, updated_at = NOW()
                WHERE id = $4 AND user_id = $5
                RETURNING {COLUMNS}"#
        ))
        .bind(&todo.title)
        .bind(&todo.description)
        .bind(todo.completed)
        .bind(todo.id)
        .bind(todo.user_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn delete(&self, id: i64, user_id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM todos WHERE id = $1 AND user_id = $2")
            .bind(id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
