use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::task::JoinHandle;

use super::{ClientMeta, Error, Identity, RefreshSession, Result, SessionStore};
use crate::clock::Clock;
use crate::token::{Claims, TokenCodec, TokenKind};

/// Tokens handed to a client after login or refresh.
#[derive(Clone, Debug)]
pub struct IssuedTokens {
    pub access_token: String,
    pub refresh_token: String,
    /// Expiry of the backing session, used for the cookie.
    pub expires_at: DateTime<Utc>,
}

/// Drives login, refresh, logout and logout-all.
///
/// Every refresh token maps to exactly one stored session. Refreshing
/// consumes the session before issuing a new one, so a refresh token can
/// succeed at most once even when presented concurrently.
pub struct SessionManager {
    codec: Arc<dyn TokenCodec>,
    store: Arc<dyn SessionStore>,
    clock: Arc<dyn Clock>,
}

impl SessionManager {
    /// Create a new [`SessionManager`].
    pub fn new(
        codec: Arc<dyn TokenCodec>,
        store: Arc<dyn SessionStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            codec,
            store,
            clock,
        }
    }

    pub fn refresh_lifetime(&self) -> Duration {
        self.codec.refresh_lifetime()
    }

    /// Open a new session for an already authenticated user.
    pub async fn login(
        &self,
        identity: &Identity,
        client: &ClientMeta,
    ) -> Result<IssuedTokens> {
        let tokens = self.issue(identity, client).await?;

        metrics::counter!("session_logins_total").increment(1);
        tracing::info!(user_id = identity.user_id, "session opened");

        Ok(tokens)
    }

    /// Exchange a refresh token for a new pair, consuming the old session.
    pub async fn refresh(
        &self,
        presented: Option<&str>,
        client: &ClientMeta,
    ) -> Result<IssuedTokens> {
        let token = presented
            .filter(|token| !token.is_empty())
            .ok_or(Error::Unauthorized)?;

        let claims = self.codec.verify(token).map_err(|_| Error::Unauthorized)?;
        let jti = refresh_jti(&claims)?;

        let Some(session) = self.store.get(jti).await? else {
            tracing::debug!(user_id = claims.sub, "refresh session not found");
            return Err(self.reject("unknown"));
        };

        if session.is_expired(self.clock.now()) {
            self.store.delete(jti).await?;
            tracing::debug!(user_id = session.user_id, "refresh session expired");
            return Err(self.reject("expired"));
        }

        if session.user_id != claims.sub {
            tracing::warn!(
                user_id = session.user_id,
                sub = claims.sub,
                "refresh token subject does not own its session"
            );
            return Err(self.reject("mismatch"));
        }

        // Whoever removes the row owns the rotation.
        if !self.store.delete(jti).await? {
            tracing::warn!(user_id = session.user_id, "refresh token replayed");
            return Err(self.reject("replayed"));
        }

        let identity = Identity {
            user_id: session.user_id,
            email: claims.email,
        };
        let tokens = self.issue(&identity, client).await?;

        metrics::counter!("session_refreshes_total", "outcome" => "rotated")
            .increment(1);

        Ok(tokens)
    }

    /// Close the session behind `presented`, if any. Never fails.
    pub async fn logout(&self, presented: Option<&str>) {
        let Some(token) = presented.filter(|token| !token.is_empty()) else {
            return;
        };

        let claims = match self.codec.verify(token) {
            Ok(claims) => claims,
            Err(err) => {
                tracing::debug!(error = %err, "logout with unverifiable token");
                return;
            },
        };

        let Some(jti) = claims.jti.as_deref() else {
            return;
        };

        match self.store.delete(jti).await {
            Ok(removed) => {
                metrics::counter!("session_logouts_total").increment(1);
                tracing::debug!(user_id = claims.sub, removed, "session closed");
            },
            Err(err) => {
                tracing::error!(error = %err, user_id = claims.sub, "failed to delete session")
            },
        }
    }

    /// Close every session of `identity`.
    pub async fn logout_all(&self, identity: Option<&Identity>) -> Result<u64> {
        let identity = identity.ok_or(Error::Unauthorized)?;
        let removed = self.store.delete_by_owner(identity.user_id).await?;

        metrics::counter!("session_logouts_total").increment(removed);
        tracing::info!(user_id = identity.user_id, removed, "all sessions closed");

        Ok(removed)
    }

    /// Sign an access token without opening a session.
    pub fn issue_access(&self, identity: &Identity) -> Result<String> {
        Ok(self
            .codec
            .issue_access(identity.user_id, &identity.email)?)
    }

    /// Verify an access token and return its [`Identity`].
    pub fn authenticate(&self, access_token: &str) -> Result<Identity> {
        let claims = self
            .codec
            .verify(access_token)
            .map_err(|_| Error::Unauthorized)?;

        if claims.typ != TokenKind::Access {
            return Err(Error::Unauthorized);
        }

        Ok(Identity {
            user_id: claims.sub,
            email: claims.email,
        })
    }

    /// Remove sessions that expired.
    pub async fn purge_expired(&self) -> Result<u64> {
        let removed = self.store.purge_expired(self.clock.now()).await?;
        if removed > 0 {
            tracing::debug!(removed, "expired sessions purged");
        }
        Ok(removed)
    }

    async fn issue(
        &self,
        identity: &Identity,
        client: &ClientMeta,
    ) -> Result<IssuedTokens> {
        let access_token = self
            .codec
            .issue_access(identity.user_id, &identity.email)?;
        let refresh = self
            .codec
            .issue_refresh(identity.user_id, &identity.email)?;

        let created_at = self.clock.now();
        let session = RefreshSession {
            jti: refresh.jti,
            user_id: identity.user_id,
            user_agent: client.user_agent.clone(),
            ip_address: client.ip_address.clone(),
            created_at,
            expires_at: created_at + self.codec.refresh_lifetime(),
        };
        self.store.create(&session).await?;

        Ok(IssuedTokens {
            access_token,
            refresh_token: refresh.token,
            expires_at: session.expires_at,
        })
    }

    fn reject(&self, outcome: &'static str) -> Error {
        metrics::counter!("session_refreshes_total", "outcome" => outcome)
            .increment(1);
        Error::Unauthorized
    }
}

/// Purge expired sessions every `period` until the runtime stops.
pub fn spawn_sweeper(
    sessions: Arc<SessionManager>,
    period: std::time::Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            if let Err(err) = sessions.purge_expired().await {
                tracing::error!(error = %err, "session sweep failed");
            }
        }
    })
}

fn refresh_jti(claims: &Claims) -> Result<&str> {
    match claims.jti.as_deref() {
        Some(jti) if claims.typ == TokenKind::Refresh && !jti.is_empty() => {
            Ok(jti)
        },
        _ => Err(Error::Unauthorized),
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use chrono::TimeZone;

    use super::*;
    use crate::clock::ManualClock;
    use crate::database::StoreError;
    use crate::session::MemorySessionStore;
    use crate::token::JwtCodec;

    struct Harness {
        manager: SessionManager,
        store: Arc<MemorySessionStore>,
        clock: Arc<ManualClock>,
        codec: Arc<JwtCodec>,
    }

    fn harness() -> Harness {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap(),
        ));
        let codec = Arc::new(
            JwtCodec::new(b"secret", Duration::days(7), clock.clone()).unwrap(),
        );
        let store = Arc::new(MemorySessionStore::new());
        let manager = SessionManager::new(codec.clone(), store.clone(), clock.clone());

        Harness {
            manager,
            store,
            clock,
            codec,
        }
    }

    fn alice() -> Identity {
        Identity {
            user_id: 1,
            email: "a@x.com".into(),
        }
    }

    fn client() -> ClientMeta {
        ClientMeta {
            user_agent: "curl/8".into(),
            ip_address: "10.0.0.1".into(),
        }
    }

    fn jti_of(codec: &JwtCodec, token: &str) -> String {
        codec.verify(token).unwrap().jti.unwrap()
    }

    #[tokio::test]
    async fn test_login_creates_one_session() {
        let h = harness();
        let tokens = h.manager.login(&alice(), &client()).await.unwrap();

        let jti = jti_of(&h.codec, &tokens.refresh_token);
        let session = h.store.get(&jti).await.unwrap().unwrap();
        assert_eq!(session.user_id, 1);
        assert_eq!(session.user_agent, "curl/8");
        assert_eq!(session.ip_address, "10.0.0.1");
        assert_eq!(session.expires_at - session.created_at, Duration::days(7));
        assert_eq!(tokens.expires_at, session.expires_at);
        assert_eq!(h.store.count_by_owner(1), 1);

        let identity = h.manager.authenticate(&tokens.access_token).unwrap();
        assert_eq!(identity, alice());
    }

    #[tokio::test]
    async fn test_refresh_rotates_and_is_single_use() {
        let h = harness();
        let first = h.manager.login(&alice(), &client()).await.unwrap();
        let old_jti = jti_of(&h.codec, &first.refresh_token);

        let meta = ClientMeta {
            user_agent: "firefox".into(),
            ip_address: "10.0.0.2".into(),
        };
        let second = h
            .manager
            .refresh(Some(&first.refresh_token), &meta)
            .await
            .unwrap();
        let new_jti = jti_of(&h.codec, &second.refresh_token);

        assert_ne!(old_jti, new_jti);
        assert!(h.store.get(&old_jti).await.unwrap().is_none());
        let session = h.store.get(&new_jti).await.unwrap().unwrap();
        assert_eq!(session.user_agent, "firefox");
        assert_eq!(session.ip_address, "10.0.0.2");
        assert_eq!(h.manager.authenticate(&second.access_token).unwrap(), alice());

        let replay = h.manager.refresh(Some(&first.refresh_token), &meta).await;
        assert!(matches!(replay, Err(Error::Unauthorized)));
        assert_eq!(h.store.count_by_owner(1), 1);
    }

    /// Yields after every lookup so concurrent refreshes interleave between
    /// `get` and `delete`.
    struct YieldingStore(Arc<MemorySessionStore>);

    #[async_trait]
    impl SessionStore for YieldingStore {
        async fn create(&self, session: &RefreshSession) -> std::result::Result<(), StoreError> {
            self.0.create(session).await
        }

        async fn get(&self, jti: &str) -> std::result::Result<Option<RefreshSession>, StoreError> {
            let session = self.0.get(jti).await;
            tokio::task::yield_now().await;
            session
        }

        async fn delete(&self, jti: &str) -> std::result::Result<bool, StoreError> {
            self.0.delete(jti).await
        }

        async fn delete_by_owner(&self, user_id: i64) -> std::result::Result<u64, StoreError> {
            self.0.delete_by_owner(user_id).await
        }

        async fn purge_expired(
            &self,
            now: DateTime<Utc>,
        ) -> std::result::Result<u64, StoreError> {
            self.0.purge_expired(now).await
        }
    }

    #[tokio::test]
    async fn test_concurrent_refresh_single_winner() {
        let h = harness();
        let manager = SessionManager::new(
            h.codec.clone(),
            Arc::new(YieldingStore(h.store.clone())),
            h.clock.clone(),
        );
        let tokens = manager.login(&alice(), &client()).await.unwrap();
        let token = tokens.refresh_token.as_str();
        let meta = client();

        let (a, b) = tokio::join!(
            manager.refresh(Some(token), &meta),
            manager.refresh(Some(token), &meta),
        );

        let winners = [&a, &b].iter().filter(|result| result.is_ok()).count();
        assert_eq!(winners, 1);
        assert!(matches!(a.as_ref().err().or(b.as_ref().err()), Some(Error::Unauthorized)));
        assert_eq!(h.store.count_by_owner(1), 1);
    }

    #[tokio::test]
    async fn test_refresh_rejects_foreign_session() {
        let h = harness();
        let tokens = h.manager.login(&alice(), &client()).await.unwrap();
        let jti = jti_of(&h.codec, &tokens.refresh_token);

        // Same jti, stored under another user.
        let mut session = h.store.get(&jti).await.unwrap().unwrap();
        h.store.delete(&jti).await.unwrap();
        session.user_id = 2;
        h.store.create(&session).await.unwrap();

        let result = h.manager.refresh(Some(&tokens.refresh_token), &client()).await;

        assert!(matches!(result, Err(Error::Unauthorized)));
        assert!(h.store.get(&jti).await.unwrap().is_some());
        assert_eq!(h.store.count_by_owner(1), 0);
    }

    #[tokio::test]
    async fn test_expired_session_is_removed() {
        let h = harness();
        let tokens = h.manager.login(&alice(), &client()).await.unwrap();
        let jti = jti_of(&h.codec, &tokens.refresh_token);

        // Shorten the stored session below the token's own expiry.
        let mut session = h.store.get(&jti).await.unwrap().unwrap();
        h.store.delete(&jti).await.unwrap();
        session.expires_at = session.created_at + Duration::hours(1);
        h.store.create(&session).await.unwrap();

        h.clock.advance(Duration::hours(2));
        let result = h.manager.refresh(Some(&tokens.refresh_token), &client()).await;

        assert!(matches!(result, Err(Error::Unauthorized)));
        assert!(h.store.get(&jti).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expired_token_and_purge() {
        let h = harness();
        let tokens = h.manager.login(&alice(), &client()).await.unwrap();

        h.clock.advance(Duration::days(7));
        let result = h.manager.refresh(Some(&tokens.refresh_token), &client()).await;
        assert!(matches!(result, Err(Error::Unauthorized)));

        assert_eq!(h.manager.purge_expired().await.unwrap(), 1);
        assert_eq!(h.store.count_by_owner(1), 0);
    }

    #[tokio::test]
    async fn test_token_kinds_are_not_interchangeable() {
        let h = harness();
        let tokens = h.manager.login(&alice(), &client()).await.unwrap();

        assert!(matches!(
            h.manager.refresh(Some(&tokens.access_token), &client()).await,
            Err(Error::Unauthorized)
        ));
        assert!(matches!(
            h.manager.authenticate(&tokens.refresh_token),
            Err(Error::Unauthorized)
        ));
        assert!(matches!(
            h.manager.refresh(None, &client()).await,
            Err(Error::Unauthorized)
        ));
        assert!(matches!(
            h.manager.refresh(Some("garbage"), &client()).await,
            Err(Error::Unauthorized)
        ));
    }

    #[tokio::test]
    async fn test_logout_is_idempotent() {
        let h = harness();
        let tokens = h.manager.login(&alice(), &client()).await.unwrap();

        h.manager.logout(None).await;
        h.manager.logout(Some("garbage")).await;
        assert_eq!(h.store.count_by_owner(1), 1);

        h.manager.logout(Some(&tokens.refresh_token)).await;
        h.manager.logout(Some(&tokens.refresh_token)).await;
        assert_eq!(h.store.count_by_owner(1), 0);
    }

    #[tokio::test]
    async fn test_logout_all_leaves_others() {
        let h = harness();
        let bob = Identity {
            user_id: 2,
            email: "b@x.com".into(),
        };
        for _ in 0..3 {
            h.manager.login(&alice(), &client()).await.unwrap();
        }
        for _ in 0..2 {
            h.manager.login(&bob, &client()).await.unwrap();
        }

        assert_eq!(h.manager.logout_all(Some(&alice())).await.unwrap(), 3);
        assert_eq!(h.manager.logout_all(Some(&alice())).await.unwrap(), 0);
        assert_eq!(h.store.count_by_owner(1), 0);
        assert_eq!(h.store.count_by_owner(2), 2);

        assert!(matches!(
            h.manager.logout_all(None).await,
            Err(Error::Unauthorized)
        ));
    }

    #[tokio::test]
    async fn test_sweeper_purges_expired() {
        let h = harness();
        h.manager.login(&alice(), &client()).await.unwrap();
        h.clock.advance(Duration::days(8));

        let manager = Arc::new(h.manager);
        let sweeper = spawn_sweeper(manager, std::time::Duration::from_millis(5));
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        sweeper.abort();

        assert_eq!(h.store.count_by_owner(1), 0);
    }

    struct FailingStore;

    #[async_trait]
    impl SessionStore for FailingStore {
        async fn create(&self, _: &RefreshSession) -> std::result::Result<(), StoreError> {
            Err(StoreError::Sql(sqlx::Error::PoolTimedOut))
        }

        async fn get(&self, _: &str) -> std::result::Result<Option<RefreshSession>, StoreError> {
            Err(StoreError::Sql(sqlx::Error::PoolTimedOut))
        }

        async fn delete(&self, _: &str) -> std::result::Result<bool, StoreError> {
            Err(StoreError::Sql(sqlx::Error::PoolTimedOut))
        }

        async fn delete_by_owner(&self, _: i64) -> std::result::Result<u64, StoreError> {
            Err(StoreError::Sql(sqlx::Error::PoolTimedOut))
        }

        async fn purge_expired(
            &self,
            _: DateTime<Utc>,
        ) -> std::result::Result<u64, StoreError> {
            Err(StoreError::Sql(sqlx::Error::PoolTimedOut))
        }
    }

    #[tokio::test]
    async fn test_store_failure_fails_login() {
        let h = harness();
        let manager = SessionManager::new(h.codec.clone(), Arc::new(FailingStore), h.clock.clone());

        assert!(matches!(
            manager.login(&alice(), &client()).await,
            Err(Error::Store(_))
        ));

        let tokens = h.manager.login(&alice(), &client()).await.unwrap();
        // Logout swallows storage failures.
        manager.logout(Some(&tokens.refresh_token)).await;
        assert!(matches!(
            manager.refresh(Some(&tokens.refresh_token), &client()).await,
            Err(Error::Store(_))
        ));
    }
}
