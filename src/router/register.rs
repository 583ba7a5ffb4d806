use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::database::StoreError;
use crate::error::Result;
use crate::router::{TokenResponse, Valid};
use crate::session::Identity;
use crate::user::NewUser;
use crate::{AppState, ServerError};

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct Body {
    #[serde(default)]
    #[validate(length(min = 1, max = 255, message = "Name is required."))]
    name: String,
    #[serde(default)]
    #[validate(email(message = "Email must be formatted."))]
    email: String,
    #[serde(default)]
    #[validate(length(
        min = 6,
        max = 255,
        message = "Password must contain at least 6 characters."
    ))]
    password: String,
}

/// Handler to create user.
pub async fn handler(
    State(state): State<AppState>,
    Valid(body): Valid<Body>,
) -> Result<(StatusCode, Json<TokenResponse>)> {
    let email = body.email.trim().to_lowercase();

    if state.users.email_exists(&email).await? {
        return Err(ServerError::EmailTaken);
    }

    let password = state
        .passwords
        .hash(body.password)
        .await
        .map_err(|err| ServerError::internal("password hashing failed", err))?;

    let user = state
        .users
        .create(&NewUser {
            name: body.name,
            email,
            password,
        })
        .await
        .map_err(|err| match err {
            StoreError::Conflict(_) => ServerError::EmailTaken,
            err => err.into(),
        })?;

    tracing::info!(user_id = user.id, "user registered");

    let access_token = state.sessions.issue_access(&Identity {
        user_id: user.id,
        email: user.email,
    })?;

    Ok((StatusCode::CREATED, Json(TokenResponse { access_token })))
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};
    use serde_json::json;

    use crate::router::tests::{json_body, register, state};
    use crate::*;

    #[tokio::test]
    async fn test_register_handler() {
        let (state, _) = state();
        let app = app(state.clone());

        let response = register(app, "A@X.com", "secret1").await;
        assert_eq!(response.status(), StatusCode::CREATED);

        let body = json_body(response).await;
        let identity = state
            .sessions
            .authenticate(body["access_token"].as_str().unwrap())
            .unwrap();
        assert_eq!(identity.email, "a@x.com");

        let user = state.users.find_by_email("a@x.com").await.unwrap().unwrap();
        assert_eq!(user.id, identity.user_id);
        assert!(user.password.starts_with("$argon2id$"));
    }

    #[tokio::test]
    async fn test_register_duplicate_email() {
        let (state, _) = state();
        let app = app(state);

        let response = register(app.clone(), "a@x.com", "secret1").await;
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = register(app, "a@x.com", "secret2").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["title"], "Email already exists.");
    }

    #[tokio::test]
    async fn test_register_validation() {
        let (state, _) = state();
        let app = app(state);

        for body in [
            json!({ "name": "", "email": "a@x.com", "password": "secret1" }),
            json!({ "name": "Alice", "email": "not-an-email", "password": "secret1" }),
            json!({ "name": "Alice", "email": "a@x.com", "password": "short" }),
            json!({ "email": "a@x.com" }),
        ] {
            let response = make_request(
                app.clone(),
                Method::POST,
                "/register",
                vec![],
                body.to_string(),
            )
            .await;
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        }
    }
}
