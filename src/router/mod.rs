pub mod login;
pub mod logout;
pub mod refresh;
pub mod register;
pub mod status;
pub mod todos;

use std::convert::Infallible;

use axum::Json;
use axum::extract::{FromRequest, FromRequestParts, Request};
use axum::http::header;
use axum::http::request::Parts;
use axum_extra::extract::cookie::{Cookie, SameSite};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tasklane_limits::axum::client_address;
use time::OffsetDateTime;
use validator::Validate;

use crate::ServerError;
use crate::config::Session;
use crate::session::ClientMeta;

/// Body returned when tokens are issued.
#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub message: String,
}

impl Message {
    pub fn new(message: &str) -> Self {
        Self {
            message: message.to_owned(),
        }
    }
}

/// JSON body checked with [`Validate`] before reaching the handler.
#[derive(Debug, Clone, Copy, Default)]
pub struct Valid<T>(pub T);

impl<S, T> FromRequest<S> for Valid<T>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
{
    type Rejection = ServerError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        value.validate()?;
        Ok(Valid(value))
    }
}

/// User agent and address of the caller.
#[derive(Debug, Clone)]
pub struct ClientInfo(pub ClientMeta);

impl<S> FromRequestParts<S> for ClientInfo
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> Result<Self, Self::Rejection> {
        let user_agent = parts
            .headers
            .get(header::USER_AGENT)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_owned();

        Ok(Self(ClientMeta {
            user_agent,
            ip_address: client_address(&parts.headers, &parts.extensions),
        }))
    }
}

fn base_cookie(config: &Session, value: String) -> Cookie<'static> {
    Cookie::build((config.cookie_name.clone(), value))
        .http_only(true)
        .secure(config.cookie_secure)
        .path("/")
        .same_site(SameSite::Lax)
        .build()
}

/// HTTP-only cookie carrying a refresh token until `expires_at`.
pub fn refresh_cookie(
    config: &Session,
    token: String,
    expires_at: DateTime<Utc>,
) -> Cookie<'static> {
    let mut cookie = base_cookie(config, token);
    cookie.set_expires(
        OffsetDateTime::from_unix_timestamp(expires_at.timestamp())
            .unwrap_or(OffsetDateTime::UNIX_EPOCH),
    );
    cookie
}

/// Empty refresh cookie that browsers drop immediately.
pub fn cleared_cookie(config: &Session) -> Cookie<'static> {
    let mut cookie = base_cookie(config, String::new());
    cookie.set_max_age(time::Duration::ZERO);
    cookie.set_expires(OffsetDateTime::UNIX_EPOCH);
    cookie
}
