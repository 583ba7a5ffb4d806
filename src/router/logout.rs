//! End one or every session.

use axum::Json;
use axum::extract::State;
use axum_extra::extract::CookieJar;

use crate::AppState;
use crate::error::Result;
use crate::router::{Message, cleared_cookie};
use crate::session::Identity;

/// Close the session behind the refresh cookie. Always succeeds.
pub async fn handler(
    State(state): State<AppState>,
    jar: CookieJar,
) -> (CookieJar, Json<Message>) {
    let config = &state.config.session;
    let token = jar
        .get(&config.cookie_name)
        .map(|cookie| cookie.value().to_owned());

    state.sessions.logout(token.as_deref()).await;

    (
        jar.add(cleared_cookie(config)),
        Json(Message::new("logged out")),
    )
}

/// Close every session of the authenticated caller.
pub async fn logout_all(
    State(state): State<AppState>,
    identity: Identity,
    jar: CookieJar,
) -> Result<(CookieJar, Json<Message>)> {
    state.sessions.logout_all(Some(&identity)).await?;

    Ok((
        jar.add(cleared_cookie(&state.config.session)),
        Json(Message::new("logged out from all devices")),
    ))
}
