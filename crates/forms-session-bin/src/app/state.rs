//! Session wiring.

use super::hub_tokens::CoordinatorTokens;
use credential_store::{CredentialStore, FileStorage};
use realtime_hub::{HubConfig, RealtimeConnectionManager, SignalRTransport};
use session_auth::{
    AuthenticatedRequestClient, HttpAuthApi, HttpRequestSender, SessionSupervisor,
    TokenRefreshCoordinator,
};
use session_config::{Config, Paths};
use std::sync::Arc;
use tracing::debug;

/// Everything a command needs, built once per process.
pub struct SessionApp {
    pub config: Arc<Config>,
    pub paths: Arc<Paths>,
    pub supervisor: SessionSupervisor,
    pub client: AuthenticatedRequestClient,
}

impl SessionApp {
    pub fn build(config: Config, paths: Paths) -> Result<Self, Box<dyn std::error::Error>> {
        let api_base = config.api_base_url()?;
        let timeout = config.request_timeout();

        let store = CredentialStore::new(Box::new(FileStorage::new(paths.credentials_file())));
        let api = Arc::new(HttpAuthApi::new(api_base.clone(), timeout)?);
        let coordinator =
            TokenRefreshCoordinator::with_safety_margin(store, api.clone(), config.token_expiry_margin());
        let supervisor = SessionSupervisor::new(coordinator.clone(), api);
        let sender = Arc::new(HttpRequestSender::new(api_base, timeout)?);
        let client = AuthenticatedRequestClient::new(coordinator, sender);

        debug!(
            api = %config.api_base_url,
            credentials = %paths.credentials_file().display(),
            "Session wired"
        );

        Ok(Self {
            config: Arc::new(config),
            paths: Arc::new(paths),
            supervisor,
            client,
        })
    }

    /// Realtime manager whose connections authenticate with the current
    /// session's token.
    pub fn realtime(&self) -> Result<RealtimeConnectionManager, Box<dyn std::error::Error>> {
        let transport = SignalRTransport::new(self.config.hub_url()?)
            .with_invoke_timeout(self.config.request_timeout());
        let tokens = CoordinatorTokens::new(self.supervisor.coordinator().clone());

        Ok(RealtimeConnectionManager::new(
            Arc::new(transport),
            Arc::new(tokens),
            HubConfig::from_config(&self.config),
        ))
    }
}
