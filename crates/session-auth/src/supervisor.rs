//! Session supervision: bootstrap, login, logout and the identity view.
//!
//! The supervisor owns the auth FSM and the decoded [`Identity`]. It
//! registers itself as the coordinator's credential observer, so refreshes
//! made on behalf of any caller (including the request client) keep the
//! identity in step with the stored token.

use crate::api::AuthApi;
use crate::auth_fsm::{AuthMachine, AuthMachineInput, AuthState, AuthStateChangedPayload};
use crate::claims::{decode_access_token, Identity};
use crate::coordinator::{CredentialEvent, TokenRefreshCoordinator};
use crate::{AuthError, AuthResult};
use credential_store::{Credential, StorageError};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Callback type for auth state change notifications.
pub type AuthStateCallback = Box<dyn Fn(AuthStateChangedPayload) + Send + Sync>;

/// State shared with the coordinator's observer callback.
struct SharedState {
    identity: RwLock<Option<Identity>>,
    fsm: Mutex<AuthMachine>,
    state_callback: Mutex<Option<AuthStateCallback>>,
}

impl SharedState {
    fn state(&self) -> AuthState {
        AuthState::from(self.fsm.lock().state())
    }

    fn set_identity(&self, identity: Option<Identity>) {
        *self.identity.write() = identity;
    }

    /// Transition the FSM and notify the callback if the state changed.
    fn transition(&self, input: &AuthMachineInput) -> AuthResult<AuthState> {
        let mut fsm = self.fsm.lock();
        let old_state = AuthState::from(fsm.state());

        fsm.consume(input).map_err(|_| {
            AuthError::InvalidStateTransition(format!(
                "Cannot apply {:?} in state {:?}",
                input,
                fsm.state()
            ))
        })?;

        let new_state = AuthState::from(fsm.state());
        drop(fsm);

        if old_state != new_state {
            debug!(
                old_state = ?old_state,
                new_state = ?new_state,
                "Auth state transition"
            );
            self.notify_state_change(new_state);
        }

        Ok(new_state)
    }

    fn notify_state_change(&self, state: AuthState) {
        let callback = self.state_callback.lock();
        if let Some(callback) = callback.as_ref() {
            let (user_id, display_name) = self
                .identity
                .read()
                .as_ref()
                .map(|identity| {
                    (
                        Some(identity.user_id.clone()),
                        Some(identity.display_name.clone()),
                    )
                })
                .unwrap_or((None, None));

            callback(AuthStateChangedPayload {
                state,
                user_id,
                display_name,
            });
        }
    }

    fn on_credential_event(&self, event: &CredentialEvent) {
        match event {
            CredentialEvent::Refreshed { access_token } => match decode_access_token(access_token)
            {
                Ok(identity) => {
                    debug!(user_id = %identity.user_id, "Identity updated from refreshed token");
                    self.set_identity(Some(identity));
                }
                Err(e) => {
                    warn!(error = %e, "Refreshed token has invalid claims");
                    self.set_identity(None);
                }
            },
            CredentialEvent::Expired => {
                self.set_identity(None);
                // Bootstrap and login handle their own failures.
                if self.state() == AuthState::Authenticated {
                    info!("Session expired, returning to anonymous");
                    let _ = self.transition(&AuthMachineInput::SessionExpired);
                }
            }
            CredentialEvent::Cleared => self.set_identity(None),
        }
    }
}

/// Owns the authenticated identity view and the session lifecycle.
pub struct SessionSupervisor {
    coordinator: TokenRefreshCoordinator,
    api: Arc<dyn AuthApi>,
    shared: Arc<SharedState>,
    /// Serializes bootstrap, login and logout.
    op_guard: tokio::sync::Mutex<()>,
}

impl SessionSupervisor {
    /// Create a supervisor. Replaces any credential observer already set on
    /// `coordinator`.
    pub fn new(coordinator: TokenRefreshCoordinator, api: Arc<dyn AuthApi>) -> Self {
        let shared = Arc::new(SharedState {
            identity: RwLock::new(None),
            fsm: Mutex::new(AuthMachine::new()),
            state_callback: Mutex::new(None),
        });

        let observer_state = Arc::clone(&shared);
        coordinator.set_observer(Box::new(move |event| {
            observer_state.on_credential_event(event)
        }));

        Self {
            coordinator,
            api,
            shared,
            op_guard: tokio::sync::Mutex::new(()),
        }
    }

    /// Set a callback to be notified of auth state changes.
    pub fn set_state_callback(&self, callback: AuthStateCallback) {
        *self.shared.state_callback.lock() = Some(callback);
    }

    pub fn auth_state(&self) -> AuthState {
        self.shared.state()
    }

    pub fn coordinator(&self) -> &TokenRefreshCoordinator {
        &self.coordinator
    }

    /// The identity decoded from the current access token, if any.
    pub fn current_identity(&self) -> Option<Identity> {
        self.shared.identity.read().clone()
    }

    pub fn is_admin(&self) -> bool {
        self.shared
            .identity
            .read()
            .as_ref()
            .is_some_and(Identity::is_admin)
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.shared
            .identity
            .read()
            .as_ref()
            .is_some_and(|identity| identity.has_role(role))
    }

    /// Validate the stored session.
    ///
    /// A fresh credential is decoded without network traffic. An expired or
    /// malformed one is refreshed; if that fails the session is reset to
    /// anonymous and `Ok(None)` is returned.
    pub async fn bootstrap(&self) -> AuthResult<Option<Identity>> {
        let _op = self.op_guard.lock().await;
        self.shared.transition(&AuthMachineInput::Bootstrap)?;

        let stored = match self.coordinator.current_credential() {
            Ok(Some(credential)) => Some(credential),
            Ok(None) => {
                info!("No stored session");
                self.shared.set_identity(None);
                self.shared.transition(&AuthMachineInput::NoSession)?;
                return Ok(None);
            }
            Err(AuthError::Storage(StorageError::Encoding(_))) => None,
            Err(e) => {
                self.shared.set_identity(None);
                self.shared.transition(&AuthMachineInput::NoSession)?;
                return Err(e);
            }
        };

        if let Some(credential) = stored.filter(|c| c.is_fresh(self.coordinator.safety_margin()))
        {
            match decode_access_token(&credential.access_token) {
                Ok(identity) => {
                    info!(user_id = %identity.user_id, "Stored session is valid");
                    return self
                        .authenticated(identity, &AuthMachineInput::CredentialValid)
                        .map(Some);
                }
                Err(e) => warn!(error = %e, "Stored access token has invalid claims"),
            }
        }

        info!("Stored session expired or malformed, refreshing");
        let refreshed = match self.coordinator.force_refresh().await {
            Ok(token) => decode_access_token(&token),
            Err(e) => Err(e),
        };

        match refreshed {
            Ok(identity) => {
                info!(user_id = %identity.user_id, "Session refreshed on bootstrap");
                self.authenticated(identity, &AuthMachineInput::CredentialValid)
                    .map(Some)
            }
            Err(e) => {
                warn!(error = %e, "Session refresh failed on bootstrap, resetting to anonymous");
                self.shared.set_identity(None);
                if let Err(clear_error) = self.coordinator.invalidate() {
                    warn!(error = %clear_error, "Failed to clear session");
                }
                self.shared.transition(&AuthMachineInput::SessionExpired)?;
                Ok(None)
            }
        }
    }

    /// Same check as [`bootstrap`](Self::bootstrap), run when the
    /// application returns to the foreground.
    pub async fn on_visibility_regained(&self) -> AuthResult<Option<Identity>> {
        debug!("Visibility regained, revalidating session");
        self.bootstrap().await
    }

    /// Log in with email and password.
    ///
    /// Any failure, including an access token whose claims do not decode,
    /// leaves the session empty.
    pub async fn login(&self, email: &str, password: &str) -> AuthResult<Identity> {
        let _op = self.op_guard.lock().await;
        self.shared.transition(&AuthMachineInput::LoginAttempt)?;
        debug!(email = %email, "Attempting login");

        match self.exchange_credentials(email, password).await {
            Ok(identity) => {
                info!(user_id = %identity.user_id, "Logged in");
                self.authenticated(identity, &AuthMachineInput::LoginSuccess)
            }
            Err(e) => {
                warn!(error = %e, "Login failed");
                if let Err(clear_error) = self.coordinator.invalidate() {
                    warn!(error = %clear_error, "Failed to clear session");
                }
                self.shared.set_identity(None);
                self.shared.transition(&AuthMachineInput::LoginFailed)?;
                Err(e)
            }
        }
    }

    /// Create an account, then log in with the same credentials.
    pub async fn register(&self, name: &str, email: &str, password: &str) -> AuthResult<Identity> {
        debug!(email = %email, "Registering account");
        self.api.register(name, email, password).await?;
        info!(email = %email, "Account registered");
        self.login(email, password).await
    }

    /// Clear the session. No revoke call is made.
    pub async fn logout(&self) -> AuthResult<()> {
        let _op = self.op_guard.lock().await;
        self.shared.transition(&AuthMachineInput::LogoutRequested)?;

        let cleared = self.coordinator.invalidate();
        self.shared.set_identity(None);
        self.shared.transition(&AuthMachineInput::LogoutComplete)?;

        info!("Logged out");
        cleared
    }

    async fn exchange_credentials(&self, email: &str, password: &str) -> AuthResult<Identity> {
        let tokens = self.api.login(email, password).await?;
        let identity = decode_access_token(&tokens.access_token)?;
        self.coordinator.install(&Credential::new(
            tokens.access_token,
            tokens.refresh_token,
            identity.expires_at,
        ))?;
        Ok(identity)
    }

    fn authenticated(
        &self,
        identity: Identity,
        input: &AuthMachineInput,
    ) -> AuthResult<Identity> {
        self.shared.set_identity(Some(identity.clone()));
        self.shared.transition(input)?;
        Ok(identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::TokenPair;
    use crate::claims::test_tokens::{access_token, token_with_claims};
    use async_trait::async_trait;
    use chrono::Utc;
    use credential_store::{CredentialStore, MemoryStorage, SecureStorage, StorageKeys};
    use std::sync::atomic::{AtomicUsize, Ordering};

    const FAR_FUTURE: i64 = 4_000_000_000;

    #[derive(Default)]
    struct MockApi {
        login_calls: AtomicUsize,
        register_calls: AtomicUsize,
        refresh_calls: AtomicUsize,
        refresh_fails: bool,
        login_token: Option<String>,
    }

    #[async_trait]
    impl AuthApi for MockApi {
        async fn login(&self, email: &str, password: &str) -> AuthResult<TokenPair> {
            self.login_calls.fetch_add(1, Ordering::SeqCst);
            if email != "ada@example.com" || password != "secret" {
                return Err(AuthError::InvalidCredentials("HTTP 401".into()));
            }
            Ok(TokenPair {
                access_token: self
                    .login_token
                    .clone()
                    .unwrap_or_else(|| access_token("login", FAR_FUTURE)),
                refresh_token: "R-login".into(),
            })
        }

        async fn register(&self, _: &str, _: &str, _: &str) -> AuthResult<TokenPair> {
            self.register_calls.fetch_add(1, Ordering::SeqCst);
            Ok(TokenPair {
                access_token: String::new(),
                refresh_token: String::new(),
            })
        }

        async fn refresh(&self, _tokens: &TokenPair) -> AuthResult<TokenPair> {
            self.refresh_calls.fetch_add(1, Ordering::SeqCst);
            if self.refresh_fails {
                return Err(AuthError::Api {
                    status: 401,
                    body: "expired refresh token".into(),
                });
            }
            Ok(TokenPair {
                access_token: access_token("refreshed", FAR_FUTURE),
                refresh_token: "R2".into(),
            })
        }
    }

    fn supervisor_with(
        storage: MemoryStorage,
        api: MockApi,
    ) -> (SessionSupervisor, Arc<MockApi>) {
        let api = Arc::new(api);
        let coordinator =
            TokenRefreshCoordinator::new(CredentialStore::new(Box::new(storage)), api.clone());
        (SessionSupervisor::new(coordinator, api.clone()), api)
    }

    fn storage_with_token(expires_in: chrono::Duration) -> MemoryStorage {
        let expires_at = Utc::now() + expires_in;
        let storage = MemoryStorage::new();
        let credential = Credential::new(
            access_token("stored", expires_at.timestamp()),
            "R1",
            expires_at,
        );
        storage
            .set(
                StorageKeys::SESSION_CREDENTIAL,
                &serde_json::to_string(&credential).unwrap(),
            )
            .unwrap();
        storage
    }

    #[tokio::test]
    async fn test_bootstrap_without_session() {
        let (supervisor, api) = supervisor_with(MemoryStorage::new(), MockApi::default());

        assert!(supervisor.bootstrap().await.unwrap().is_none());
        assert_eq!(supervisor.auth_state(), AuthState::Anonymous);
        assert_eq!(api.refresh_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_bootstrap_with_fresh_session_is_offline() {
        let (supervisor, api) = supervisor_with(
            storage_with_token(chrono::Duration::hours(1)),
            MockApi::default(),
        );

        let identity = supervisor.bootstrap().await.unwrap().unwrap();
        assert_eq!(identity.user_id, "user-1");
        assert_eq!(supervisor.auth_state(), AuthState::Authenticated);
        assert!(supervisor.is_admin());
        assert_eq!(api.refresh_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_bootstrap_refreshes_expired_session() {
        let (supervisor, api) = supervisor_with(
            storage_with_token(chrono::Duration::hours(-3)),
            MockApi::default(),
        );

        let identity = supervisor.bootstrap().await.unwrap().unwrap();
        assert_eq!(identity.expires_at.timestamp(), FAR_FUTURE);
        assert_eq!(supervisor.current_identity(), Some(identity));
        assert_eq!(api.refresh_calls.load(Ordering::SeqCst), 1);

        // Visibility regained with a fresh token: no further network calls.
        assert!(supervisor.on_visibility_regained().await.unwrap().is_some());
        assert_eq!(api.refresh_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_bootstrap_refresh_failure_resets_to_anonymous() {
        let (supervisor, api) = supervisor_with(
            storage_with_token(chrono::Duration::hours(-3)),
            MockApi {
                refresh_fails: true,
                ..Default::default()
            },
        );

        assert!(supervisor.bootstrap().await.unwrap().is_none());
        assert_eq!(supervisor.auth_state(), AuthState::Anonymous);
        assert!(supervisor.current_identity().is_none());
        assert!(supervisor.coordinator().current_credential().unwrap().is_none());
        assert_eq!(api.refresh_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_bootstrap_malformed_record_resets_to_anonymous() {
        let storage = MemoryStorage::new();
        storage
            .set(StorageKeys::SESSION_CREDENTIAL, "{ truncated")
            .unwrap();
        let (supervisor, _) = supervisor_with(storage, MockApi::default());

        assert!(supervisor.bootstrap().await.unwrap().is_none());
        assert_eq!(supervisor.auth_state(), AuthState::Anonymous);
        assert!(supervisor.coordinator().current_credential().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_login_derives_identity_and_notifies() {
        let (supervisor, api) = supervisor_with(MemoryStorage::new(), MockApi::default());

        let states = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&states);
        supervisor.set_state_callback(Box::new(move |payload| sink.lock().push(payload.state)));

        let identity = supervisor.login("ada@example.com", "secret").await.unwrap();
        assert_eq!(identity.display_name, "Ada");
        assert!(supervisor.has_role("User"));
        assert!(supervisor.is_admin());
        assert_eq!(api.login_calls.load(Ordering::SeqCst), 1);

        let stored = supervisor.coordinator().current_credential().unwrap().unwrap();
        assert_eq!(stored.refresh_token, "R-login");
        assert_eq!(stored.expires_at.timestamp(), FAR_FUTURE);

        assert_eq!(
            *states.lock(),
            vec![AuthState::LoggingIn, AuthState::Authenticated]
        );
    }

    #[tokio::test]
    async fn test_login_with_invalid_claims_fails() {
        let (supervisor, _) = supervisor_with(
            MemoryStorage::new(),
            MockApi {
                login_token: Some(token_with_claims(serde_json::json!({ "sub": "1" }))),
                ..Default::default()
            },
        );

        let err = supervisor.login("ada@example.com", "secret").await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidClaims(_)));
        assert_eq!(supervisor.auth_state(), AuthState::Anonymous);
        assert!(supervisor.current_identity().is_none());
        assert!(supervisor.coordinator().current_credential().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_login_wrong_password() {
        let (supervisor, _) = supervisor_with(MemoryStorage::new(), MockApi::default());

        let err = supervisor.login("ada@example.com", "nope").await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials(_)));
        assert_eq!(supervisor.auth_state(), AuthState::Anonymous);
    }

    #[tokio::test]
    async fn test_register_then_login() {
        let (supervisor, api) = supervisor_with(MemoryStorage::new(), MockApi::default());

        let identity = supervisor
            .register("Ada", "ada@example.com", "secret")
            .await
            .unwrap();
        assert_eq!(identity.user_id, "user-1");
        assert_eq!(api.register_calls.load(Ordering::SeqCst), 1);
        assert_eq!(api.login_calls.load(Ordering::SeqCst), 1);
        assert_eq!(supervisor.auth_state(), AuthState::Authenticated);
    }

    #[tokio::test]
    async fn test_logout_clears_everything() {
        let (supervisor, api) = supervisor_with(MemoryStorage::new(), MockApi::default());
        supervisor.login("ada@example.com", "secret").await.unwrap();

        supervisor.logout().await.unwrap();
        assert_eq!(supervisor.auth_state(), AuthState::Anonymous);
        assert!(supervisor.current_identity().is_none());
        assert!(!supervisor.is_admin());
        assert!(supervisor.coordinator().current_credential().unwrap().is_none());
        assert_eq!(api.refresh_calls.load(Ordering::SeqCst), 0);

        // Logging out twice is harmless.
        supervisor.logout().await.unwrap();
    }

    #[tokio::test]
    async fn test_expiry_seen_by_other_callers_drops_identity() {
        let (supervisor, _) = supervisor_with(
            storage_with_token(chrono::Duration::hours(1)),
            MockApi {
                refresh_fails: true,
                ..Default::default()
            },
        );
        supervisor.bootstrap().await.unwrap().unwrap();

        // A request elsewhere got a 401 and forced a refresh, which failed.
        let err = supervisor.coordinator().force_refresh().await.unwrap_err();
        assert!(matches!(err, AuthError::SessionExpired));

        assert!(supervisor.current_identity().is_none());
        assert_eq!(supervisor.auth_state(), AuthState::Anonymous);
    }
}
