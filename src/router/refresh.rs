//! Get a new token with refresh token.

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum_extra::extract::CookieJar;
use serde::Deserialize;

use crate::AppState;
use crate::error::Result;
use crate::router::{ClientInfo, TokenResponse, refresh_cookie};

#[derive(Debug, Default, Deserialize)]
struct Body {
    refresh_token: Option<String>,
}

/// Refresh token from the cookie, else from a JSON body.
fn presented_token(jar: &CookieJar, cookie_name: &str, body: &[u8]) -> Option<String> {
    match jar.get(cookie_name) {
        Some(cookie) if !cookie.value().is_empty() => Some(cookie.value().to_owned()),
        _ => serde_json::from_slice::<Body>(body)
            .ok()
            .and_then(|body| body.refresh_token),
    }
}

/// Rotate the refresh token and return a new access token.
pub async fn handler(
    State(state): State<AppState>,
    jar: CookieJar,
    ClientInfo(client): ClientInfo,
    body: Bytes,
) -> Result<(CookieJar, Json<TokenResponse>)> {
    let config = &state.config.session;
    let presented = presented_token(&jar, &config.cookie_name, &body);

    let tokens = state
        .sessions
        .refresh(presented.as_deref(), &client)
        .await?;

    let cookie = refresh_cookie(config, tokens.refresh_token, tokens.expires_at);

    Ok((
        jar.add(cookie),
        Json(TokenResponse {
            access_token: tokens.access_token,
        }),
    ))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::http::{Method, StatusCode, header};
    use serde_json::json;

    use crate::clock::SystemClock;
    use crate::router::tests::{SECRET, cookie_pair, json_body, login, set_cookie, state};
    use crate::session::SessionStore;
    use crate::token::{JwtCodec, TokenCodec};
    use crate::*;

    fn jti(cookie: &str) -> String {
        let codec =
            JwtCodec::new(SECRET, chrono::Duration::days(7), Arc::new(SystemClock)).unwrap();
        let token = cookie.trim_start_matches("refreshToken=");
        codec.verify(token).unwrap().jti.unwrap()
    }

    async fn refresh(app: axum::Router, cookie: &str) -> axum::http::Response<axum::body::Body> {
        make_request(
            app,
            Method::POST,
            "/refresh",
            vec![(header::COOKIE, cookie.to_owned())],
            String::default(),
        )
        .await
    }

    #[tokio::test]
    async fn test_refresh_rotates_and_rejects_replay() {
        let (state, store) = state();
        let app = app(state.clone());
        let (_, cookie) = login(app.clone(), "a@x.com").await;
        let old_jti = jti(&cookie);

        let response = refresh(app.clone(), &cookie).await;
        assert_eq!(response.status(), StatusCode::OK);

        let new_cookie = cookie_pair(&set_cookie(&response, "refreshToken").unwrap());
        let body = json_body(response).await;
        let identity = state
            .sessions
            .authenticate(body["access_token"].as_str().unwrap())
            .unwrap();
        assert_eq!(identity.email, "a@x.com");

        let new_jti = jti(&new_cookie);
        assert_ne!(old_jti, new_jti);
        assert!(store.get(&old_jti).await.unwrap().is_none());
        assert!(store.get(&new_jti).await.unwrap().is_some());

        let response = refresh(app.clone(), &cookie).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = refresh(app, &new_cookie).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_refresh_from_body() {
        let (state, _) = state();
        let app = app(state);
        let (_, cookie) = login(app.clone(), "a@x.com").await;
        let token = cookie.trim_start_matches("refreshToken=");

        let response = make_request(
            app,
            Method::POST,
            "/refresh",
            vec![],
            json!({ "refresh_token": token }).to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(set_cookie(&response, "refreshToken").is_some());
    }

    #[tokio::test]
    async fn test_refresh_without_token() {
        let (state, _) = state();
        let app = app(state);

        let response =
            make_request(app.clone(), Method::POST, "/refresh", vec![], String::default())
                .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = refresh(app, "refreshToken=not.a.token").await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_access_token_cannot_refresh() {
        let (state, _) = state();
        let app = app(state);
        let (access_token, _) = login(app.clone(), "a@x.com").await;

        let response = refresh(app, &format!("refreshToken={access_token}")).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
