use crate::domain::models::AuthSession;
use crate::infrastructure::auth_client::{
    AuthClient, AuthTokenResponse, PasswordSignInRequest, RefreshSessionRequest, SignOutRequest,
    SignUpOutcome, SignUpRequest,
};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::session_store::SessionStore;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

const EXPIRY_LEEWAY_SECONDS: i64 = 60;

#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub base_url: String,
    pub anon_key: String,
}

impl BackendConfig {
    pub fn new(base_url: impl Into<String>, anon_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            anon_key: anon_key.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnsureSessionResult {
    Existing(AuthSession),
    Refreshed(AuthSession),
    SignInRequired,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignUpResult {
    SignedIn(AuthSession),
    ConfirmationRequired { email: String },
}

type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub struct SessionManager<S, C>
where
    S: SessionStore,
    C: AuthClient,
{
    config: BackendConfig,
    session_store: Arc<S>,
    auth_client: Arc<C>,
    now_provider: NowProvider,
}

impl<S, C> SessionManager<S, C>
where
    S: SessionStore,
    C: AuthClient,
{
    pub fn new(config: BackendConfig, session_store: Arc<S>, auth_client: Arc<C>) -> Self {
        Self {
            config,
            session_store,
            auth_client,
            now_provider: Arc::new(Utc::now),
        }
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub fn is_session_valid(&self, session: &AuthSession) -> bool {
        session.is_valid_at((self.now_provider)(), EXPIRY_LEEWAY_SECONDS)
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<AuthSession, InfraError> {
        let email = email.trim();
        if email.is_empty() {
            return Err(InfraError::Auth("email must not be empty".to_string()));
        }
        if password.is_empty() {
            return Err(InfraError::Auth("password must not be empty".to_string()));
        }

        let response = self
            .auth_client
            .password_sign_in(PasswordSignInRequest {
                base_url: self.config.base_url.clone(),
                anon_key: self.config.anon_key.clone(),
                email: email.to_string(),
                password: password.to_string(),
            })
            .await?;

        let session = self.session_from_response(response, None);
        self.session_store.save_session(&session)?;
        Ok(session)
    }

    pub async fn sign_up(&self, email: &str, password: &str) -> Result<SignUpResult, InfraError> {
        let email = email.trim();
        if email.is_empty() {
            return Err(InfraError::Auth("email must not be empty".to_string()));
        }
        if password.is_empty() {
            return Err(InfraError::Auth("password must not be empty".to_string()));
        }

        let outcome = self
            .auth_client
            .sign_up(SignUpRequest {
                base_url: self.config.base_url.clone(),
                anon_key: self.config.anon_key.clone(),
                email: email.to_string(),
                password: password.to_string(),
            })
            .await?;

        match outcome {
            SignUpOutcome::SignedIn(response) => {
                let session = self.session_from_response(response, None);
                self.session_store.save_session(&session)?;
                Ok(SignUpResult::SignedIn(session))
            }
            SignUpOutcome::ConfirmationRequired { email } => {
                Ok(SignUpResult::ConfirmationRequired { email })
            }
        }
    }

    /// Returns a usable session, refreshing an expired one through the
    /// backend when a refresh token is available. Refresh failures degrade
    /// to `SignInRequired` instead of propagating.
    pub async fn ensure_session(&self) -> Result<EnsureSessionResult, InfraError> {
        let Some(stored_session) = self.session_store.load_session()? else {
            return Ok(EnsureSessionResult::SignInRequired);
        };

        if self.is_session_valid(&stored_session) {
            return Ok(EnsureSessionResult::Existing(stored_session));
        }

        self.refresh_stored(stored_session).await
    }

    /// Exchanges the stored refresh token for a fresh session even when the
    /// local clock still considers the current one valid. Used after the
    /// backend has rejected the current access token outright.
    pub async fn refresh_now(&self) -> Result<EnsureSessionResult, InfraError> {
        let Some(stored_session) = self.session_store.load_session()? else {
            return Ok(EnsureSessionResult::SignInRequired);
        };
        self.refresh_stored(stored_session).await
    }

    async fn refresh_stored(
        &self,
        stored_session: AuthSession,
    ) -> Result<EnsureSessionResult, InfraError> {
        let Some(refresh_token) = stored_session.refresh_token.clone() else {
            return Ok(EnsureSessionResult::SignInRequired);
        };

        let refreshed = self
            .auth_client
            .refresh_session(RefreshSessionRequest {
                base_url: self.config.base_url.clone(),
                anon_key: self.config.anon_key.clone(),
                refresh_token,
            })
            .await;

        match refreshed {
            Ok(response) => {
                let session =
                    self.session_from_response(response, stored_session.refresh_token.clone());
                self.session_store.save_session(&session)?;
                Ok(EnsureSessionResult::Refreshed(session))
            }
            Err(InfraError::Auth(_)) => Ok(EnsureSessionResult::SignInRequired),
            Err(error) => Err(error),
        }
    }

    /// Revokes the session with the backend and always clears the local
    /// copy, even when the remote call fails.
    pub async fn sign_out(&self) -> Result<(), InfraError> {
        if let Some(session) = self.session_store.load_session()? {
            let result = self
                .auth_client
                .sign_out(SignOutRequest {
                    base_url: self.config.base_url.clone(),
                    anon_key: self.config.anon_key.clone(),
                    access_token: session.access_token,
                })
                .await;
            if let Err(error) = result {
                if !matches!(error, InfraError::Auth(_)) {
                    return Err(error);
                }
            }
        }
        self.session_store.delete_session()
    }

    fn session_from_response(
        &self,
        response: AuthTokenResponse,
        fallback_refresh_token: Option<String>,
    ) -> AuthSession {
        let expires_at = (self.now_provider)() + Duration::seconds(response.expires_in.max(0));
        AuthSession {
            access_token: response.access_token,
            refresh_token: response.refresh_token.or(fallback_refresh_token),
            expires_at,
            user_id: response.user_id,
            email: response.email,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::session_store::InMemorySessionStore;
    use async_trait::async_trait;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Debug, Clone)]
    enum FakeResponse {
        Success(AuthTokenResponse),
        AuthError(String),
    }

    impl Default for FakeResponse {
        fn default() -> Self {
            Self::Success(AuthTokenResponse {
                access_token: "fake_access".to_string(),
                refresh_token: Some("fake_refresh".to_string()),
                expires_in: 3600,
                user_id: "usr-1".to_string(),
                email: "student@example.com".to_string(),
            })
        }
    }

    #[derive(Debug, Default)]
    struct FakeAuthClient {
        sign_in_response: Mutex<FakeResponse>,
        refresh_response: Mutex<FakeResponse>,
        sign_up_confirmation_required: Mutex<bool>,
        sign_in_calls: AtomicUsize,
        refresh_calls: AtomicUsize,
        sign_out_calls: AtomicUsize,
    }

    impl FakeAuthClient {
        fn set_sign_in_response(&self, response: FakeResponse) {
            *self.sign_in_response.lock().expect("sign-in mutex poisoned") = response;
        }

        fn set_refresh_response(&self, response: FakeResponse) {
            *self.refresh_response.lock().expect("refresh mutex poisoned") = response;
        }

        fn require_confirmation(&self) {
            *self
                .sign_up_confirmation_required
                .lock()
                .expect("confirmation mutex poisoned") = true;
        }
    }

    #[async_trait]
    impl AuthClient for FakeAuthClient {
        async fn password_sign_in(
            &self,
            _request: PasswordSignInRequest,
        ) -> Result<AuthTokenResponse, InfraError> {
            self.sign_in_calls.fetch_add(1, Ordering::SeqCst);
            match self
                .sign_in_response
                .lock()
                .expect("sign-in mutex poisoned")
                .clone()
            {
                FakeResponse::Success(value) => Ok(value),
                FakeResponse::AuthError(message) => Err(InfraError::Auth(message)),
            }
        }

        async fn sign_up(&self, request: SignUpRequest) -> Result<SignUpOutcome, InfraError> {
            if *self
                .sign_up_confirmation_required
                .lock()
                .expect("confirmation mutex poisoned")
            {
                return Ok(SignUpOutcome::ConfirmationRequired {
                    email: request.email,
                });
            }
            match self
                .sign_in_response
                .lock()
                .expect("sign-in mutex poisoned")
                .clone()
            {
                FakeResponse::Success(value) => Ok(SignUpOutcome::SignedIn(value)),
                FakeResponse::AuthError(message) => Err(InfraError::Auth(message)),
            }
        }

        async fn refresh_session(
            &self,
            _request: RefreshSessionRequest,
        ) -> Result<AuthTokenResponse, InfraError> {
            self.refresh_calls.fetch_add(1, Ordering::SeqCst);
            match self
                .refresh_response
                .lock()
                .expect("refresh mutex poisoned")
                .clone()
            {
                FakeResponse::Success(value) => Ok(value),
                FakeResponse::AuthError(message) => Err(InfraError::Auth(message)),
            }
        }

        async fn sign_out(&self, _request: SignOutRequest) -> Result<(), InfraError> {
            self.sign_out_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn test_config() -> BackendConfig {
        BackendConfig::new("https://backend.example.com", "anon-key")
    }

    fn token_pattern() -> impl Strategy<Value = String> {
        "[A-Za-z0-9._\\-]{1,64}".prop_map(|value| value.to_string())
    }

    fn arb_session() -> impl Strategy<Value = AuthSession> {
        (
            token_pattern(),
            prop::option::of(token_pattern()),
            120i64..604800i64,
            token_pattern(),
        )
            .prop_map(|(access_token, refresh_token, expires_in_seconds, user_id)| AuthSession {
                access_token,
                refresh_token,
                expires_at: Utc::now() + Duration::seconds(expires_in_seconds),
                user_id,
                email: "student@example.com".to_string(),
            })
    }

    proptest! {
        #[test]
        fn session_round_trips_through_store(session in arb_session()) {
            let store = InMemorySessionStore::default();
            store.save_session(&session).expect("save session");
            let loaded = store.load_session().expect("load session").expect("session exists");
            prop_assert_eq!(loaded, session);
        }
    }

    proptest! {
        #[test]
        fn valid_session_does_not_hit_the_network(session in arb_session()) {
            let runtime = tokio::runtime::Runtime::new().expect("runtime");
            runtime.block_on(async move {
                let store = Arc::new(InMemorySessionStore::default());
                store.save_session(&session).expect("save session");

                let client = Arc::new(FakeAuthClient::default());
                let manager = SessionManager::new(test_config(), Arc::clone(&store), Arc::clone(&client));
                let result = manager.ensure_session().await.expect("ensure session");

                assert!(matches!(result, EnsureSessionResult::Existing(_)));
                assert_eq!(client.sign_in_calls.load(Ordering::SeqCst), 0);
                assert_eq!(client.refresh_calls.load(Ordering::SeqCst), 0);
            });
        }
    }

    proptest! {
        #[test]
        fn expired_session_without_working_refresh_requires_sign_in(
            access_token in token_pattern(),
            refresh_token in prop::option::of(token_pattern()),
            expired_seconds_ago in 1i64..86400i64
        ) {
            let runtime = tokio::runtime::Runtime::new().expect("runtime");
            runtime.block_on(async move {
                let expired = AuthSession {
                    access_token,
                    refresh_token: refresh_token.clone(),
                    expires_at: Utc::now() - Duration::seconds(expired_seconds_ago),
                    user_id: "usr-1".to_string(),
                    email: "student@example.com".to_string(),
                };

                let store = Arc::new(InMemorySessionStore::default());
                store.save_session(&expired).expect("save session");

                let client = Arc::new(FakeAuthClient::default());
                client.set_refresh_response(FakeResponse::AuthError("invalid_grant".to_string()));

                let manager = SessionManager::new(test_config(), Arc::clone(&store), Arc::clone(&client));
                let result = manager.ensure_session().await.expect("ensure session");

                assert_eq!(result, EnsureSessionResult::SignInRequired);
                if refresh_token.is_some() {
                    assert_eq!(client.refresh_calls.load(Ordering::SeqCst), 1);
                } else {
                    assert_eq!(client.refresh_calls.load(Ordering::SeqCst), 0);
                }
            });
        }
    }

    #[tokio::test]
    async fn expired_session_with_refresh_token_is_refreshed() {
        let store = Arc::new(InMemorySessionStore::default());
        let expired = AuthSession {
            access_token: "expired-access".to_string(),
            refresh_token: Some("refresh-token".to_string()),
            expires_at: Utc::now() - Duration::seconds(120),
            user_id: "usr-1".to_string(),
            email: "student@example.com".to_string(),
        };
        store.save_session(&expired).expect("save session");

        let client = Arc::new(FakeAuthClient::default());
        client.set_refresh_response(FakeResponse::Success(AuthTokenResponse {
            access_token: "new-access".to_string(),
            refresh_token: None,
            expires_in: 3600,
            user_id: "usr-1".to_string(),
            email: "student@example.com".to_string(),
        }));

        let manager = SessionManager::new(test_config(), Arc::clone(&store), Arc::clone(&client));
        let result = manager.ensure_session().await.expect("ensure session");

        match result {
            EnsureSessionResult::Refreshed(session) => {
                assert_eq!(session.access_token, "new-access");
                assert_eq!(session.refresh_token, Some("refresh-token".to_string()));
            }
            _ => panic!("expected refreshed session"),
        }
    }

    #[tokio::test]
    async fn refresh_now_replaces_a_locally_valid_token() {
        let store = Arc::new(InMemorySessionStore::default());
        let rejected_by_backend = AuthSession {
            access_token: "stale-access".to_string(),
            refresh_token: Some("refresh-token".to_string()),
            expires_at: Utc::now() + Duration::seconds(3600),
            user_id: "usr-1".to_string(),
            email: "student@example.com".to_string(),
        };
        store.save_session(&rejected_by_backend).expect("save session");

        let client = Arc::new(FakeAuthClient::default());
        client.set_refresh_response(FakeResponse::Success(AuthTokenResponse {
            access_token: "fresh-access".to_string(),
            refresh_token: Some("fresh-refresh".to_string()),
            expires_in: 3600,
            user_id: "usr-1".to_string(),
            email: "student@example.com".to_string(),
        }));

        let manager = SessionManager::new(test_config(), Arc::clone(&store), Arc::clone(&client));

        // ensure_session keeps trusting the local expiry and never calls out.
        let ensured = manager.ensure_session().await.expect("ensure session");
        assert!(matches!(ensured, EnsureSessionResult::Existing(_)));
        assert_eq!(client.refresh_calls.load(Ordering::SeqCst), 0);

        // refresh_now bypasses the validity check and swaps the token.
        let forced = manager.refresh_now().await.expect("refresh now");
        match forced {
            EnsureSessionResult::Refreshed(session) => {
                assert_eq!(session.access_token, "fresh-access");
            }
            other => panic!("expected refreshed session, got {other:?}"),
        }
        assert_eq!(client.refresh_calls.load(Ordering::SeqCst), 1);

        let stored = store
            .load_session()
            .expect("load session")
            .expect("session stored");
        assert_eq!(stored.access_token, "fresh-access");
    }

    #[tokio::test]
    async fn refresh_now_without_a_refresh_token_requires_sign_in() {
        let store = Arc::new(InMemorySessionStore::default());
        store
            .save_session(&AuthSession {
                access_token: "stale-access".to_string(),
                refresh_token: None,
                expires_at: Utc::now() + Duration::seconds(3600),
                user_id: "usr-1".to_string(),
                email: "student@example.com".to_string(),
            })
            .expect("save session");

        let client = Arc::new(FakeAuthClient::default());
        let manager = SessionManager::new(test_config(), store, Arc::clone(&client));

        let result = manager.refresh_now().await.expect("refresh now");
        assert_eq!(result, EnsureSessionResult::SignInRequired);
        assert_eq!(client.refresh_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn sign_in_persists_session() {
        let store = Arc::new(InMemorySessionStore::default());
        let client = Arc::new(FakeAuthClient::default());
        client.set_sign_in_response(FakeResponse::Success(AuthTokenResponse {
            access_token: "signed-in-access".to_string(),
            refresh_token: Some("signed-in-refresh".to_string()),
            expires_in: 1800,
            user_id: "usr-7".to_string(),
            email: "student@example.com".to_string(),
        }));

        let manager = SessionManager::new(test_config(), Arc::clone(&store), Arc::clone(&client));
        let session = manager
            .sign_in("student@example.com", "hunter2")
            .await
            .expect("sign in");
        assert_eq!(session.user_id, "usr-7");

        let loaded = store
            .load_session()
            .expect("load session")
            .expect("session stored");
        assert_eq!(loaded.access_token, "signed-in-access");
    }

    #[tokio::test]
    async fn sign_in_rejects_blank_credentials() {
        let store = Arc::new(InMemorySessionStore::default());
        let client = Arc::new(FakeAuthClient::default());
        let manager = SessionManager::new(test_config(), store, Arc::clone(&client));

        assert!(manager.sign_in("  ", "password").await.is_err());
        assert!(manager.sign_in("student@example.com", "").await.is_err());
        assert_eq!(client.sign_in_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn sign_up_with_confirmation_does_not_store_session() {
        let store = Arc::new(InMemorySessionStore::default());
        let client = Arc::new(FakeAuthClient::default());
        client.require_confirmation();

        let manager = SessionManager::new(test_config(), Arc::clone(&store), client);
        let result = manager
            .sign_up("student@example.com", "hunter2")
            .await
            .expect("sign up");

        assert_eq!(
            result,
            SignUpResult::ConfirmationRequired {
                email: "student@example.com".to_string()
            }
        );
        assert!(store.load_session().expect("load session").is_none());
    }

    #[tokio::test]
    async fn sign_out_clears_stored_session() {
        let store = Arc::new(InMemorySessionStore::default());
        let client = Arc::new(FakeAuthClient::default());
        let manager = SessionManager::new(test_config(), Arc::clone(&store), Arc::clone(&client));

        let _ = manager
            .sign_in("student@example.com", "hunter2")
            .await
            .expect("sign in");
        manager.sign_out().await.expect("sign out");

        assert!(store.load_session().expect("load session").is_none());
        assert_eq!(client.sign_out_calls.load(Ordering::SeqCst), 1);
    }
}
