//! Password hashing and verification.

use std::sync::Arc;

use argon2::password_hash::{
    PasswordHash, PasswordHasher, PasswordVerifier, SaltString,
};
use argon2::{Argon2, Params, Version};
use rand::rngs::OsRng;

use crate::config::Argon2 as ArgonConfig;

type Result<T> = std::result::Result<T, CryptoError>;

#[derive(thiserror::Error, Debug)]
pub enum CryptoError {
    #[error("argon2 error: {0}")]
    Argon2(String),
    #[error("password does not match")]
    Mismatch,
    #[error("hashing task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

const DUMMY_PASSWORD: &str = "tasklane-dummy-password";

/// Password manager that uses Argon2id and PHC string format for hashing and
/// verification.
#[derive(Debug, Clone)]
pub struct PasswordManager {
    params: Params,
    /// Hash checked when no account matches, so both login failures cost the same.
    dummy_hash: String,
}

impl PasswordManager {
    /// Create a new [`PasswordManager`].
    pub fn new(config: Option<ArgonConfig>) -> Result<Self> {
        let config = config.unwrap_or_default();

        let params = Params::new(
            config.memory_cost,
            config.iterations,
            config.parallelism,
            Some(config.hash_length),
        )
        .map_err(|err| CryptoError::Argon2(err.to_string()))?;

        let mut manager = Self {
            params,
            dummy_hash: String::new(),
        };
        manager.dummy_hash = manager.hash_password(DUMMY_PASSWORD)?;

        Ok(manager)
    }

    fn argon2(&self) -> Argon2<'_> {
        Argon2::new(
            argon2::Algorithm::Argon2id,
            Version::V0x13,
            self.params.clone(),
        )
    }

    /// Hash password using Argon2id with a random salt.
    pub fn hash_password(&self, password: impl AsRef<[u8]>) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2()
            .hash_password(password.as_ref(), &salt)
            .map_err(|e| CryptoError::Argon2(e.to_string()))?;

        Ok(hash.to_string())
    }

    /// Verify password against a PHC string.
    /// Malformed hashes count as a mismatch.
    pub fn verify_password(
        &self,
        password: impl AsRef<[u8]>,
        phc_hash: &str,
    ) -> Result<()> {
        let parsed =
            PasswordHash::new(phc_hash).map_err(|_| CryptoError::Mismatch)?;

        self.argon2()
            .verify_password(password.as_ref(), &parsed)
            .map_err(|_| CryptoError::Mismatch)
    }
}

/// Argon2 is CPU and memory heavy; these run it on the blocking pool.
impl PasswordManager {
    /// Hash `password` off the async workers.
    pub async fn hash(self: &Arc<Self>, password: String) -> Result<String> {
        let manager = Arc::clone(self);
        tokio::task::spawn_blocking(move || manager.hash_password(password)).await?
    }

    /// Verify `password` against `phc_hash` off the async workers.
    ///
    /// Without a stored hash the dummy one is checked anyway and the result
    /// is always [`CryptoError::Mismatch`].
    pub async fn verify(
        self: &Arc<Self>,
        password: String,
        phc_hash: Option<String>,
    ) -> Result<()> {
        let manager = Arc::clone(self);
        tokio::task::spawn_blocking(move || match phc_hash {
            Some(hash) => manager.verify_password(password, &hash),
            None => {
                let _ = manager.verify_password(password, &manager.dummy_hash);
                Err(CryptoError::Mismatch)
            },
        })
        .await?
    }
}
