//! Configuration manager for Tasklane.
//!
//! Most settings live in `config.yaml`; deployment specific values (signing
//! secret, database URL, cookie settings, port) may come from the
//! environment, which always wins over the file.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::extract::FromRef;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::AppState;

const DEFAULT_CONFIG_PATH: &str = "config.yaml";
const VERSION: &str = env!("CARGO_PKG_VERSION");
const DEFAULT_NAME: &str = "tasklane";
const DEFAULT_ADDRESS: &str = "0.0.0.0:8080";
const DEFAULT_COOKIE_NAME: &str = "refreshToken";
const DEFAULT_REFRESH_TTL: u64 = 60 * 60 * 24 * 7; // 7 days.

/// Environment variable holding the HMAC signing secret.
pub const SECRET_ENV: &str = "JWT_SECRET";

/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing or empty `{SECRET_ENV}` environment variable")]
    MissingSecret,
    #[error("`session.refresh_ttl` of {0} seconds is out of range")]
    RefreshTtl(u64),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    /// Instance name.
    pub name: String,
    /// Socket address to listen on.
    pub address: String,
    version: String,
    #[serde(skip)]
    path: PathBuf,
    /// Related to PostgreSQL configuration.
    #[serde(skip_serializing)]
    pub postgres: Option<Postgres>,
    /// Related to Argon2 configuration.
    #[serde(skip_serializing)]
    pub argon2: Option<Argon2>,
    /// Related to refresh sessions and their cookie.
    #[serde(skip_serializing)]
    pub session: Session,
    /// Related to request rate limiting.
    #[serde(skip_serializing)]
    pub rate_limit: RateLimit,
    /// Related to metrics, traces and logs exporters.
    #[serde(skip_serializing)]
    pub telemetry: Telemetry,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            name: DEFAULT_NAME.to_owned(),
            address: DEFAULT_ADDRESS.to_owned(),
            version: VERSION.to_owned(),
            path: PathBuf::default(),
            postgres: None,
            argon2: None,
            session: Session::default(),
            rate_limit: RateLimit::default(),
            telemetry: Telemetry::default(),
        }
    }
}

/// PostgreSQL configuration.
#[derive(Debug, Default, PartialEq, Clone, Serialize, Deserialize)]
pub struct Postgres {
    /// Full connection URL. Takes precedence over the other fields.
    pub url: Option<String>,
    /// Hostname:(?port) for PostgreSQL instance.
    #[serde(default)]
    pub address: String,
    /// Database name.
    pub database: Option<String>,
    /// Username credential to connect.
    pub username: Option<String>,
    /// Password credential to connect.
    pub password: Option<String>,
    /// Maximum pool connections.
    pub pool_size: Option<u32>,
}

/// Argon2 configuration.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Argon2 {
    /// Memory used while hashing.
    pub memory_cost: u32,
    /// Iterations of hash.
    pub iterations: u32,
    /// Parallelism degree.
    pub parallelism: u32,
    /// Output hash length.
    pub hash_length: usize,
}

impl Default for Argon2 {
    fn default() -> Self {
        Self {
            memory_cost: 1024 * 64, // 64 MiB.
            iterations: 4,
            parallelism: 2,
            hash_length: 32,
        }
    }
}

/// Refresh session configuration.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Session {
    /// Name of the HTTP-only cookie carrying the refresh token.
    pub cookie_name: String,
    /// Add the `Secure` attribute on the cookie.
    pub cookie_secure: bool,
    /// Refresh token (and session) lifetime, in seconds.
    pub refresh_ttl: u64,
    /// Purge expired sessions every N seconds. Disabled when absent.
    pub sweep_interval: Option<u64>,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            cookie_name: DEFAULT_COOKIE_NAME.to_owned(),
            cookie_secure: false,
            refresh_ttl: DEFAULT_REFRESH_TTL,
            sweep_interval: None,
        }
    }
}

impl Session {
    /// Refresh lifetime as a duration, rejecting values chrono cannot hold.
    pub fn refresh_lifetime(&self) -> Result<chrono::Duration, ConfigError> {
        i64::try_from(self.refresh_ttl)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .filter(|lifetime| *lifetime > chrono::Duration::zero())
            .ok_or(ConfigError::RefreshTtl(self.refresh_ttl))
    }
}

/// Sliding window rate limit, per client address.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimit {
    /// Requests allowed per window.
    pub requests: usize,
    /// Window length, in milliseconds.
    pub window_ms: u64,
}

impl Default for RateLimit {
    fn default() -> Self {
        Self {
            requests: 10,
            window_ms: 1_000,
        }
    }
}

/// Telemetry exporters.
#[derive(Debug, Default, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Telemetry {
    /// OTLP collector (gRPC) receiving traces and logs.
    pub otlp_endpoint: Option<String>,
    /// Serve Prometheus metrics on `/metrics`.
    pub prometheus: bool,
}

impl FromRef<AppState> for Arc<Configuration> {
    fn from_ref(state: &AppState) -> Arc<Configuration> {
        Arc::clone(&state.config)
    }
}

impl Configuration {
    pub fn path(mut self, path: PathBuf) -> Self {
        self.path = path;
        self
    }

    /// Application version, as built.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Reads the `config.yaml` file from the specified path or the default
    /// location, then applies environment overrides.
    pub fn read(self) -> Arc<Self> {
        let file_path = if self.path.is_file() {
            self.path.clone()
        } else {
            Path::new(DEFAULT_CONFIG_PATH).to_path_buf()
        };

        let config = match File::open(&file_path) {
            Ok(file) => match serde_yaml::from_reader::<_, Configuration>(file) {
                Ok(config) => Self {
                    version: VERSION.to_owned(),
                    path: file_path,
                    ..config
                },
                Err(err) => self.error(err),
            },
            Err(err) => self.error(err),
        };

        Arc::new(config.apply_env(|key| std::env::var(key).ok()))
    }

    /// Override file values with `REFRESH_COOKIE_NAME`, `COOKIE_SECURE`,
    /// `DATABASE_URL` and `PORT`.
    pub fn apply_env(mut self, var: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(name) = var("REFRESH_COOKIE_NAME").filter(|n| !n.is_empty()) {
            self.session.cookie_name = name;
        }

        if let Some(secure) = var("COOKIE_SECURE") {
            self.session.cookie_secure = secure == "true";
        }

        if let Some(url) = var("DATABASE_URL").filter(|u| !u.is_empty()) {
            self.postgres.get_or_insert_with(Postgres::default).url = Some(url);
        }

        if let Some(port) = var("PORT").and_then(|p| p.parse::<u16>().ok()) {
            let host = self
                .address
                .rsplit_once(':')
                .map(|(host, _)| host.to_owned())
                .unwrap_or_else(|| "0.0.0.0".to_owned());
            self.address = format!("{host}:{port}");
        }

        self
    }

    /// Return a default configuration as fallback.
    fn error(&self, err: impl std::error::Error) -> Self {
        tracing::error!(error = %err, path = %self.path.display(), "`config.yaml` file cannot be used");
        Self::default()
    }
}

/// Read the signing secret. The server must not start without one.
pub fn signing_secret(
    var: impl Fn(&str) -> Option<String>,
) -> Result<Zeroizing<Vec<u8>>, ConfigError> {
    match var(SECRET_ENV) {
        Some(secret) if !secret.is_empty() => {
            Ok(Zeroizing::new(secret.into_bytes()))
        },
        _ => Err(ConfigError::MissingSecret),
    }
}
