//! Single-flight access token refresh.
//!
//! Every caller that needs a bearer token goes through
//! [`TokenRefreshCoordinator`]. While a refresh round is in flight, later
//! callers queue a oneshot waiter instead of starting another round, so N
//! concurrent callers holding an expired token produce exactly one
//! `POST /token/refresh`, and all of them observe the same outcome.
//!
//! A round runs on its own task and cannot be cancelled by its callers.
//! [`invalidate`](TokenRefreshCoordinator::invalidate) and
//! [`install`](TokenRefreshCoordinator::install) bump a session epoch; a
//! round that completes under an older epoch writes nothing and hands its
//! waiters the outcome of the session change instead. Either way the state
//! stays `Refreshing` until the network call has returned.

use crate::api::{AuthApi, TokenPair};
use crate::claims::decode_access_token;
use crate::{AuthError, AuthResult};
use credential_store::{Credential, CredentialStore, StorageError};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Default clock-skew tolerance applied to the access token expiry.
pub const DEFAULT_SAFETY_MARGIN: Duration = Duration::from_secs(10);

/// Whether a refresh round is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshState {
    Idle,
    Refreshing,
}

/// Credential changes made by the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialEvent {
    /// A refresh round stored a new credential.
    Refreshed { access_token: String },
    /// A refresh round failed and the stored credential was cleared.
    Expired,
    /// The session was cleared on request (logout).
    Cleared,
}

/// Callback type for credential change notifications.
pub type CredentialObserver = Box<dyn Fn(&CredentialEvent) + Send + Sync>;

type Waiter = oneshot::Sender<AuthResult<String>>;

/// Outcome shared by every waiter of one round.
#[derive(Debug, Clone)]
enum RoundResult {
    Token(String),
    NotLoggedIn,
    SessionExpired,
}

impl RoundResult {
    fn into_result(self) -> AuthResult<String> {
        match self {
            RoundResult::Token(token) => Ok(token),
            RoundResult::NotLoggedIn => Err(AuthError::NotLoggedIn),
            RoundResult::SessionExpired => Err(AuthError::SessionExpired),
        }
    }
}

struct RefreshRound {
    state: RefreshState,
    waiters: Vec<Waiter>,
    /// Bumped by `invalidate` and `install`.
    epoch: u64,
    /// Outcome of the latest session change made while a round was in
    /// flight. Replaces that round's own result.
    superseded: Option<RoundResult>,
}

impl RefreshRound {
    fn supersede(&mut self, result: RoundResult) {
        self.epoch += 1;
        if self.state == RefreshState::Refreshing {
            self.superseded = Some(result);
        }
    }

    /// End the round and hand back its waiters.
    fn finish(&mut self) -> Vec<Waiter> {
        self.state = RefreshState::Idle;
        self.superseded = None;
        std::mem::take(&mut self.waiters)
    }
}

/// Ends the round if its task unwinds before resolving it. Dropping the
/// waiters fails them with `SessionExpired`.
struct RoundGuard {
    inner: Arc<Inner>,
    armed: bool,
}

impl Drop for RoundGuard {
    fn drop(&mut self) {
        if self.armed {
            warn!("Refresh round aborted, releasing its waiters");
            drop(self.inner.round.lock().finish());
        }
    }
}

enum Need {
    /// Any token that is still fresh will do.
    Valid,
    /// Refresh regardless of the stored expiry.
    Force,
    /// The API rejected this token; refresh unless it was already replaced.
    Replacing(String),
}

struct Inner {
    store: CredentialStore,
    api: Arc<dyn AuthApi>,
    safety_margin: Duration,
    round: Mutex<RefreshRound>,
    observer: RwLock<Option<CredentialObserver>>,
}

/// Keeps the bearer credential valid for many concurrent callers.
#[derive(Clone)]
pub struct TokenRefreshCoordinator {
    inner: Arc<Inner>,
}

impl TokenRefreshCoordinator {
    /// Create a coordinator over `store`, refreshing through `api`.
    pub fn new(store: CredentialStore, api: Arc<dyn AuthApi>) -> Self {
        Self::with_safety_margin(store, api, DEFAULT_SAFETY_MARGIN)
    }

    /// Create a coordinator with a custom expiry safety margin.
    pub fn with_safety_margin(
        store: CredentialStore,
        api: Arc<dyn AuthApi>,
        safety_margin: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                api,
                safety_margin,
                round: Mutex::new(RefreshRound {
                    state: RefreshState::Idle,
                    waiters: Vec::new(),
                    epoch: 0,
                    superseded: None,
                }),
                observer: RwLock::new(None),
            }),
        }
    }

    /// Set the callback notified of credential changes.
    pub fn set_observer(&self, observer: CredentialObserver) {
        *self.inner.observer.write() = Some(observer);
    }

    pub fn refresh_state(&self) -> RefreshState {
        self.inner.round.lock().state
    }

    pub fn safety_margin(&self) -> Duration {
        self.inner.safety_margin
    }

    /// The stored credential, without any freshness check.
    pub fn current_credential(&self) -> AuthResult<Option<Credential>> {
        Ok(self.inner.store.load()?)
    }

    /// Return a token that stays valid for at least the safety margin,
    /// refreshing (or joining the in-flight refresh) when needed.
    pub async fn get_valid_token(&self) -> AuthResult<String> {
        self.acquire(Need::Valid).await
    }

    /// Refresh now, or join the round already in flight.
    pub async fn force_refresh(&self) -> AuthResult<String> {
        self.acquire(Need::Force).await
    }

    /// Called after the API answered 401 to `rejected_token`.
    ///
    /// If another caller already replaced that token, the stored one is
    /// returned without a network call.
    pub async fn refresh_after_rejection(&self, rejected_token: &str) -> AuthResult<String> {
        self.acquire(Need::Replacing(rejected_token.to_string()))
            .await
    }

    /// Clear the session. An in-flight round is left to finish; its result
    /// is discarded, the store is cleared again, and its waiters fail with
    /// `SessionExpired` once the network call returns.
    pub fn invalidate(&self) -> AuthResult<()> {
        {
            let mut round = self.inner.round.lock();
            round.supersede(RoundResult::SessionExpired);
            self.inner.store.clear()?;
        }

        debug!("Session invalidated");
        self.inner.notify(&CredentialEvent::Cleared);
        Ok(())
    }

    /// Store a credential obtained outside a refresh round (login).
    ///
    /// Waiters of an in-flight round receive the new token when that round
    /// returns; the round's own result is discarded.
    pub fn install(&self, credential: &Credential) -> AuthResult<()> {
        let mut round = self.inner.round.lock();
        match self.inner.store.replace(credential) {
            Ok(()) => {
                round.supersede(RoundResult::Token(credential.access_token.clone()));
                Ok(())
            }
            Err(e) => {
                round.supersede(RoundResult::SessionExpired);
                Err(e.into())
            }
        }
    }

    async fn acquire(&self, need: Need) -> AuthResult<String> {
        let receiver = {
            let mut round = self.inner.round.lock();

            if round.state == RefreshState::Idle {
                if let Some(token) = self.inner.usable_token(&need)? {
                    return Ok(token);
                }
                round.state = RefreshState::Refreshing;
                let epoch = round.epoch;
                debug!(epoch, "Starting token refresh round");
                tokio::spawn(Inner::run_round(Arc::clone(&self.inner), epoch));
            } else {
                debug!("Refresh in flight, waiting for its result");
            }

            let (tx, rx) = oneshot::channel();
            round.waiters.push(tx);
            rx
        };

        receiver.await.unwrap_or(Err(AuthError::SessionExpired))
    }
}

impl Inner {
    /// Decide whether `need` can be served from the store. `Ok(None)` means
    /// a refresh round is required.
    fn usable_token(&self, need: &Need) -> AuthResult<Option<String>> {
        let credential = match self.store.load() {
            Ok(Some(credential)) => credential,
            Ok(None) => return Err(AuthError::NotLoggedIn),
            // Malformed record; the round clears it.
            Err(StorageError::Encoding(_)) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let fresh = credential.is_fresh(self.safety_margin);
        let usable = match need {
            Need::Valid => fresh,
            Need::Force => false,
            Need::Replacing(rejected) => fresh && credential.access_token != *rejected,
        };

        Ok(usable.then_some(credential.access_token))
    }

    async fn run_round(inner: Arc<Inner>, epoch: u64) {
        let mut guard = RoundGuard {
            inner: Arc::clone(&inner),
            armed: true,
        };
        let outcome = inner.refresh_once().await;

        let (result, event, waiters) = {
            let mut round = inner.round.lock();
            if round.epoch != epoch {
                info!("Discarding refresh result: session changed while refreshing");
                let result = round
                    .superseded
                    .take()
                    .unwrap_or(RoundResult::SessionExpired);
                if matches!(result, RoundResult::SessionExpired) {
                    if let Err(e) = inner.store.clear() {
                        warn!(error = %e, "Failed to clear credential store");
                    }
                }
                (result, None, round.finish())
            } else {
                let (result, event) = inner.settle(outcome);
                (result, event, round.finish())
            }
        };
        guard.armed = false;

        // Observers see the change before any waiter resumes.
        if let Some(event) = event {
            inner.notify(&event);
        }
        for waiter in waiters {
            let _ = waiter.send(result.clone().into_result());
        }
    }

    /// Apply a current round's outcome to the store.
    fn settle(
        &self,
        outcome: AuthResult<Option<Credential>>,
    ) -> (RoundResult, Option<CredentialEvent>) {
        match outcome {
            Ok(Some(credential)) => match self.store.replace(&credential) {
                Ok(()) => {
                    info!(expires_at = %credential.expires_at, "Access token refreshed");
                    (
                        RoundResult::Token(credential.access_token.clone()),
                        Some(CredentialEvent::Refreshed {
                            access_token: credential.access_token,
                        }),
                    )
                }
                Err(e) => {
                    warn!(error = %e, "Failed to store refreshed credential");
                    self.expire()
                }
            },
            Ok(None) => (RoundResult::NotLoggedIn, None),
            Err(e) => {
                warn!(error = %e, "Token refresh failed, clearing session");
                self.expire()
            }
        }
    }

    fn expire(&self) -> (RoundResult, Option<CredentialEvent>) {
        if let Err(e) = self.store.clear() {
            warn!(error = %e, "Failed to clear credential store");
        }
        (RoundResult::SessionExpired, Some(CredentialEvent::Expired))
    }

    /// One network refresh. `Ok(None)` means there was nothing to refresh.
    async fn refresh_once(&self) -> AuthResult<Option<Credential>> {
        let Some(current) = self.store.load()? else {
            return Ok(None);
        };

        let tokens = self
            .api
            .refresh(&TokenPair {
                access_token: current.access_token,
                refresh_token: current.refresh_token,
            })
            .await?;

        let identity = decode_access_token(&tokens.access_token)?;
        Ok(Some(Credential::new(
            tokens.access_token,
            tokens.refresh_token,
            identity.expires_at,
        )))
    }

    fn notify(&self, event: &CredentialEvent) {
        if let Some(observer) = self.observer.read().as_ref() {
            observer(event);
        }
    }
}
