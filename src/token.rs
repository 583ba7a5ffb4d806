//! Manage json web tokens.
//!
//! Access and refresh tokens are HMAC-signed JWTs sharing one secret. Access
//! tokens live 15 minutes and are never stored; refresh tokens carry a `jti`
//! that points to a server-side session.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Duration;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::clock::Clock;

/// Access tokens lifetime, in seconds (15 minutes).
pub const ACCESS_TOKEN_TTL: i64 = 60 * 15;
const SIGNING_ALGORITHM: Algorithm = Algorithm::HS256;

pub type Result<T> = std::result::Result<T, TokenError>;

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    /// Malformed, forged, expired or otherwise unusable token.
    #[error("invalid token")]
    Invalid,
    #[error("signing secret is empty")]
    EmptySecret,
    #[error("failed to sign token: {0}")]
    Signing(#[from] jsonwebtoken::errors::Error),
}

/// Purpose of a token.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

/// Pieces of information asserted on a JWT.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// User ID. Accepted as a number or a numeric string.
    #[serde(deserialize_with = "deserialize_subject")]
    pub sub: i64,
    #[serde(default)]
    pub email: String,
    /// Refresh session identifier. Absent on access tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
    pub typ: TokenKind,
    /// Identifies the time at which the JWT was issued.
    pub iat: i64,
    /// Identifies the expiration time on or after which the JWT must not be
    /// accepted for processing.
    pub exp: i64,
}

fn deserialize_subject<'de, D>(deserializer: D) -> std::result::Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Subject {
        Number(i64),
        Text(String),
    }

    let id = match Subject::deserialize(deserializer)? {
        Subject::Number(id) => id,
        Subject::Text(id) => id.trim().parse().map_err(D::Error::custom)?,
    };

    if id <= 0 {
        return Err(D::Error::custom("subject must be a positive identifier"));
    }

    Ok(id)
}

/// A freshly signed refresh token and the `jti` to store.
#[derive(Debug, Clone)]
pub struct RefreshToken {
    pub token: String,
    pub jti: String,
}

/// Port for token signing and verification.
pub trait TokenCodec: Send + Sync {
    /// Sign a short-lived access token.
    fn issue_access(&self, user_id: i64, email: &str) -> Result<String>;

    /// Sign a long-lived refresh token with a new unique `jti`.
    fn issue_refresh(&self, user_id: i64, email: &str) -> Result<RefreshToken>;

    /// Check signature, algorithm and expiry, then return the claims.
    fn verify(&self, token: &str) -> Result<Claims>;

    /// Lifetime given to refresh tokens.
    fn refresh_lifetime(&self) -> Duration;
}

/// HMAC JWT implementation of [`TokenCodec`].
pub struct JwtCodec {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    refresh_lifetime: Duration,
    clock: Arc<dyn Clock>,
}

impl JwtCodec {
    /// Create a new [`JwtCodec`].
    pub fn new(
        secret: &[u8],
        refresh_lifetime: Duration,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        if secret.is_empty() {
            return Err(TokenError::EmptySecret);
        }

        // Only the HMAC family is accepted, whatever the header claims.
        let mut validation = Validation::new(SIGNING_ALGORITHM);
        validation.algorithms =
            vec![Algorithm::HS256, Algorithm::HS384, Algorithm::HS512];
        // Expiry is checked against `clock`.
        validation.validate_exp = false;
        validation.required_spec_claims = HashSet::from(["exp".to_owned()]);
        validation.leeway = 0;

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
            refresh_lifetime,
            clock,
        })
    }

    fn sign(&self, claims: &Claims) -> Result<String> {
        Ok(encode(&Header::new(SIGNING_ALGORITHM), claims, &self.encoding_key)?)
    }
}

impl TokenCodec for JwtCodec {
    fn issue_access(&self, user_id: i64, email: &str) -> Result<String> {
        let now = self.clock.now().timestamp();

        self.sign(&Claims {
            sub: user_id,
            email: email.to_owned(),
            jti: None,
            typ: TokenKind::Access,
            iat: now,
            exp: now + ACCESS_TOKEN_TTL,
        })
    }

    fn issue_refresh(&self, user_id: i64, email: &str) -> Result<RefreshToken> {
        let now = self.clock.now().timestamp();
        let jti = Uuid::new_v4().to_string();

        let token = self.sign(&Claims {
            sub: user_id,
            email: email.to_owned(),
            jti: Some(jti.clone()),
            typ: TokenKind::Refresh,
            iat: now,
            exp: now + self.refresh_lifetime.num_seconds(),
        })?;

        Ok(RefreshToken { token, jti })
    }

    fn verify(&self, token: &str) -> Result<Claims> {
        let claims = decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(|err| {
                tracing::debug!(error = %err, "token rejected");
                TokenError::Invalid
            })?
            .claims;

        if claims.exp <= self.clock.now().timestamp() {
            tracing::debug!(sub = claims.sub, "token expired");
            return Err(TokenError::Invalid);
        }

        Ok(claims)
    }

    fn refresh_lifetime(&self) -> Duration {
        self.refresh_lifetime
    }
}
