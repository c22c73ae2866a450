//! Bridges the refresh coordinator into the realtime token source.

use async_trait::async_trait;
use realtime_hub::{RealtimeError, RealtimeResult, TokenProvider};
use session_auth::{AuthError, TokenRefreshCoordinator};

/// Each hub connection attempt waits on the coordinator, so a connect that
/// races a refresh simply joins it.
pub struct CoordinatorTokens {
    coordinator: TokenRefreshCoordinator,
}

impl CoordinatorTokens {
    pub fn new(coordinator: TokenRefreshCoordinator) -> Self {
        Self { coordinator }
    }
}

#[async_trait]
impl TokenProvider for CoordinatorTokens {
    async fn access_token(&self) -> RealtimeResult<Option<String>> {
        match self.coordinator.get_valid_token().await {
            Ok(token) => Ok(Some(token)),
            // The comments hub accepts anonymous viewers.
            Err(AuthError::NotLoggedIn) => Ok(None),
            Err(e) => Err(RealtimeError::AccessToken(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use credential_store::{CredentialStore, MemoryStorage};
    use session_auth::{AuthApi, AuthResult, TokenPair};
    use std::sync::Arc;

    struct Unreachable;

    #[async_trait]
    impl AuthApi for Unreachable {
        async fn login(&self, _: &str, _: &str) -> AuthResult<TokenPair> {
            Err(AuthError::NetworkUnavailable)
        }

        async fn register(&self, _: &str, _: &str, _: &str) -> AuthResult<TokenPair> {
            Err(AuthError::NetworkUnavailable)
        }

        async fn refresh(&self, _: &TokenPair) -> AuthResult<TokenPair> {
            Err(AuthError::NetworkUnavailable)
        }
    }

    #[tokio::test]
    async fn test_no_session_connects_anonymously() {
        let store = CredentialStore::new(Box::new(MemoryStorage::new()));
        let tokens = CoordinatorTokens::new(TokenRefreshCoordinator::new(
            store,
            Arc::new(Unreachable),
        ));

        assert_eq!(tokens.access_token().await.unwrap(), None);
    }
}
