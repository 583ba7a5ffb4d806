use axum::Json;
use axum::extract::State;
use axum_extra::extract::CookieJar;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::crypto::CryptoError;
use crate::error::Result;
use crate::router::{ClientInfo, TokenResponse, Valid, refresh_cookie};
use crate::session::Identity;
use crate::{AppState, ServerError};

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct Body {
    #[serde(default)]
    #[validate(email(message = "Email must be formatted."))]
    email: String,
    #[serde(default)]
    #[validate(length(min = 1, message = "Password is required."))]
    password: String,
}

/// Check credentials, open a session and set the refresh cookie.
///
/// Unknown email and wrong password answer the same way, after the same
/// Argon2 work.
pub async fn handler(
    State(state): State<AppState>,
    jar: CookieJar,
    ClientInfo(client): ClientInfo,
    Valid(body): Valid<Body>,
) -> Result<(CookieJar, Json<TokenResponse>)> {
    let email = body.email.trim().to_lowercase();

    let user = state.users.find_by_email(&email).await?;
    let stored = user.as_ref().map(|user| user.password.clone());

    match state.passwords.verify(body.password, stored).await {
        Ok(()) => {},
        Err(CryptoError::Mismatch) => {
            tracing::debug!(found = user.is_some(), "login with invalid credentials");
            return Err(ServerError::InvalidCredentials);
        },
        Err(err) => {
            return Err(ServerError::internal("password verification failed", err));
        },
    }

    let Some(user) = user else {
        return Err(ServerError::InvalidCredentials);
    };

    let tokens = state
        .sessions
        .login(
            &Identity {
                user_id: user.id,
                email: user.email,
            },
            &client,
        )
        .await?;

    let cookie = refresh_cookie(
        &state.config.session,
        tokens.refresh_token,
        tokens.expires_at,
    );

    Ok((
        jar.add(cookie),
        Json(TokenResponse {
            access_token: tokens.access_token,
        }),
    ))
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode, header};
    use serde_json::json;

    use crate::router::tests::{json_body, login, register, set_cookie, state};
    use crate::*;

    #[tokio::test]
    async fn test_login_handler() {
        let (state, store) = state();
        let app = app(state.clone());

        let (access_token, cookie) = login(app, "a@x.com").await;

        let identity = state.sessions.authenticate(&access_token).unwrap();
        assert_eq!(identity.email, "a@x.com");
        assert_eq!(store.count_by_owner(identity.user_id), 1);
        assert!(cookie.starts_with("refreshToken="));
    }

    #[tokio::test]
    async fn test_login_sets_cookie_attributes() {
        let (state, _) = state();
        let app = app(state);
        register(app.clone(), "a@x.com", "secret1").await;

        let response = make_request(
            app,
            Method::POST,
            "/login",
            vec![(header::USER_AGENT, "tests".into())],
            json!({ "email": "A@x.com", "password": "secret1" }).to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let cookie = set_cookie(&response, "refreshToken").unwrap();
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("SameSite=Lax"));
        assert!(cookie.contains("Path=/"));
        assert!(cookie.contains("Expires="));
    }

    #[tokio::test]
    async fn test_login_invalid_credentials() {
        let (state, store) = state();
        let app = app(state);
        register(app.clone(), "a@x.com", "secret1").await;

        for body in [
            json!({ "email": "a@x.com", "password": "wrong-password" }),
            json!({ "email": "nobody@x.com", "password": "secret1" }),
        ] {
            let response = make_request(
                app.clone(),
                Method::POST,
                "/login",
                vec![],
                body.to_string(),
            )
            .await;

            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
            assert!(set_cookie(&response, "refreshToken").is_none());
            assert_eq!(json_body(response).await["title"], "Invalid credentials.");
        }

        assert_eq!(store.count_by_owner(1), 0);
    }
}
