//! Todos-related HTTP API. Authorization required.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::Result;
use crate::router::Valid;
use crate::session::Identity;
use crate::todo::{ListQuery, NewTodo, Todo};
use crate::{AppState, ServerError};

/// Raw query string of `GET /todos`.
#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    page: Option<String>,
    limit: Option<String>,
    status: Option<String>,
    sort_by: Option<String>,
}

impl From<&ListParams> for ListQuery {
    fn from(params: &ListParams) -> Self {
        ListQuery::new(
            params.page.as_deref(),
            params.limit.as_deref(),
            params.status.as_deref(),
            params.sort_by.as_deref(),
        )
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ListResponse {
    pub data: Vec<Todo>,
    pub page: i64,
    pub limit: i64,
    pub total: i64,
}

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct CreateBody {
    #[serde(default)]
    #[validate(length(min = 1, max = 255, message = "Title is required."))]
    title: String,
    #[serde(default)]
    description: String,
}

/// Partial update. Empty strings leave fields untouched.
#[derive(Debug, Default, Serialize, Deserialize, Validate)]
pub struct UpdateBody {
    #[serde(default)]
    #[validate(length(max = 255))]
    title: String,
    #[serde(default)]
    description: String,
    completed: Option<bool>,
}

impl UpdateBody {
    fn apply(self, todo: &mut Todo) {
        if !self.title.is_empty() {
            todo.title = self.title;
        }
        if !self.description.is_empty() {
            todo.description = self.description;
        }
        if let Some(completed) = self.completed {
            todo.completed = completed;
        }
    }
}

pub async fn list(
    State(state): State<AppState>,
    identity: Identity,
    Query(params): Query<ListParams>,
) -> Result<Json<ListResponse>> {
    let query = ListQuery::from(&params);
    let (data, total) = state.todos.list(identity.user_id, &query).await?;

    Ok(Json(ListResponse {
        data,
        page: query.page,
        limit: query.limit,
        total,
    }))
}

pub async fn create(
    State(state): State<AppState>,
    identity: Identity,
    Valid(body): Valid<CreateBody>,
) -> Result<(StatusCode, Json<Todo>)> {
    let todo = state
        .todos
        .create(&NewTodo {
            user_id: identity.user_id,
            title: body.title,
            description: body.description,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(todo)))
}

pub async fn update(
    State(state): State<AppState>,
    identity: Identity,
    Path(id): Path<i64>,
    Valid(body): Valid<UpdateBody>,
) -> Result<Json<Todo>> {
    let mut todo = state
        .todos
        .find_by_id(id)
        .await?
        .ok_or(ServerError::NotFound)?;

    if todo.user_id != identity.user_id {
        return Err(ServerError::Forbidden);
    }

    body.apply(&mut todo);

    let todo = state
        .todos
        .update(&todo)
        .await?
        .ok_or(ServerError::NotFound)?;

    Ok(Json(todo))
}

pub async fn delete(
    State(state): State<AppState>,
    identity: Identity,
    Path(id): Path<i64>,
) -> Result<StatusCode> {
    if state.todos.delete(id, identity.user_id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ServerError::NotFound)
    }
}
