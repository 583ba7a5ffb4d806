//! Tasklane is a multi-tenant todo-list API with rotating refresh sessions.
#![forbid(unsafe_code)]

mod clock;
mod crypto;
mod database;
pub mod error;
mod middleware;
mod router;
pub mod session;
pub mod telemetry;
mod todo;
mod token;
mod user;

pub mod config;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::http::{Method, StatusCode, header};
use axum::routing::{get, post, put};
use axum::{Router, middleware as AxumMiddleware};
use error::ServerError;
use tasklane_limits::RateLimiter;
use tower::ServiceBuilder;
use tower_http::LatencyUnit;
use tower_http::cors::{Any, CorsLayer};
use tower_http::sensitive_headers::SetSensitiveHeadersLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{
    DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer,
};

use crate::clock::{Clock, SystemClock};
use crate::config::Configuration;
use crate::crypto::PasswordManager;
use crate::session::{
    MemorySessionStore, PgSessionStore, SessionManager, SessionStore,
};
use crate::todo::{MemoryTodoRepository, PgTodoRepository, TodoRepository};
use crate::token::JwtCodec;
use crate::user::{MemoryUserRepository, PgUserRepository, UserRepository};

/// MUST NEVER be used in production.
#[cfg(test)]
pub async fn make_request(
    app: Router,
    method: Method,
    path: &str,
    headers: Vec<(header::HeaderName, String)>,
    body: String,
) -> axum::http::Response<axum::body::Body> {
    use axum::extract::Request;
    use tower::util::ServiceExt;

    let mut request = Request::builder()
        .method(method)
        .uri(path)
        .header(header::CONTENT_TYPE, "application/json");
    for (name, value) in headers {
        request = request.header(name, value);
    }

    app.oneshot(request.body(axum::body::Body::from(body)).unwrap())
        .await
        .unwrap()
}

/// State sharing between routes.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Configuration>,
    pub users: Arc<dyn UserRepository>,
    pub todos: Arc<dyn TodoRepository>,
    pub sessions: Arc<SessionManager>,
    pub passwords: Arc<PasswordManager>,
    pub limiter: Arc<RateLimiter>,
}

/// Create router.
pub fn app(state: AppState) -> Router {
    let middleware = ServiceBuilder::new()
        // Hide credentials from traces.
        .layer(SetSensitiveHeadersLayer::new([
            header::AUTHORIZATION,
            header::COOKIE,
            header::SET_COOKIE,
        ]))
        // Add high level tracing/logging to all requests.
        .layer(
            TraceLayer::new_for_http()
                .on_body_chunk(|chunk: &Bytes, latency: Duration, _span: &tracing::Span| {
                    tracing::trace!(size_bytes = chunk.len(), latency = ?latency, "sending body chunk")
                })
                .make_span_with(DefaultMakeSpan::new().include_headers(true).level(tracing::Level::INFO))
                .on_request(DefaultOnRequest::new())
                .on_response(DefaultOnResponse::new().include_headers(true).latency_unit(LatencyUnit::Micros)),
        )
        // Set a timeout.
        .layer(TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, Duration::from_secs(10)))
        // Add CORS preflight support.
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
                .allow_headers(Any)
                .vary([header::AUTHORIZATION]),
        );

    // Bearer access token required.
    let protected = Router::new()
        // `GET /todos` goes to `list`, `POST /todos` to `create`.
        .route("/todos", get(router::todos::list).post(router::todos::create))
        // `PUT /todos/{id}` goes to `update`, `DELETE` to `delete`.
        .route(
            "/todos/{id}",
            put(router::todos::update).delete(router::todos::delete),
        )
        // `POST /logout-all` goes to `logout_all`.
        .route("/logout-all", post(router::logout::logout_all))
        .route_layer(AxumMiddleware::from_fn_with_state(
            Arc::clone(&state.sessions),
            middleware::authenticate,
        ));

    Router::new()
        // `GET /status.json` goes to `status`.
        .route("/status.json", get(router::status::status))
        // `POST /register` goes to `register`.
        .route("/register", post(router::register::handler))
        // `POST /login` goes to `login`.
        .route("/login", post(router::login::handler))
        // `POST /refresh` goes to `refresh`.
        .route("/refresh", post(router::refresh::handler))
        // `POST /logout` goes to `logout`.
        .route("/logout", post(router::logout::handler))
        .merge(protected)
        .with_state(state.clone())
        .route_layer(AxumMiddleware::from_fn(telemetry::track))
        .layer(AxumMiddleware::from_fn_with_state(
            Arc::clone(&state.limiter),
            tasklane_limits::axum::rate_limit,
        ))
        .layer(middleware)
}

/// Initialize the application state.
pub async fn initialize_state(
    config: Arc<Configuration>,
) -> Result<AppState, Box<dyn std::error::Error>> {
    let secret = config::signing_secret(|key| std::env::var(key).ok())?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let codec = JwtCodec::new(
        &secret,
        config.session.refresh_lifetime()?,
        Arc::clone(&clock),
    )?;

    let (users, todos, store): (
        Arc<dyn UserRepository>,
        Arc<dyn TodoRepository>,
        Arc<dyn SessionStore>,
    ) = match &config.postgres {
        Some(postgres) => {
            let db = database::Database::new(postgres).await?;
            // execute migrations scripts on start.
            db.migrate().await?;

            (
                Arc::new(PgUserRepository::new(db.postgres.clone())),
                Arc::new(PgTodoRepository::new(db.postgres.clone())),
                Arc::new(PgSessionStore::new(db.postgres)),
            )
        },
        None => {
            tracing::warn!(
                "missing `postgres` entry on `config.yaml` file, data is kept in memory"
            );

            (
                Arc::new(MemoryUserRepository::new()),
                Arc::new(MemoryTodoRepository::new()),
                Arc::new(MemorySessionStore::new()),
            )
        },
    };

    let passwords = Arc::new(PasswordManager::new(config.argon2.clone())?);
    let limiter = Arc::new(RateLimiter::new(
        config.rate_limit.requests,
        Duration::from_millis(config.rate_limit.window_ms),
    ));

    Ok(AppState {
        sessions: Arc::new(SessionManager::new(Arc::new(codec), store, clock)),
        config,
        users,
        todos,
        passwords,
        limiter,
    })
}
