//! Authenticated requests against the forms API.
//!
//! [`AuthenticatedRequestClient`] attaches the bearer token from the
//! [`TokenRefreshCoordinator`], and on a 401 refreshes through the same
//! single-flight round and resends the request exactly once.

use crate::api::{endpoint_url, map_send_error};
use crate::coordinator::TokenRefreshCoordinator;
use crate::{AuthError, AuthResult};
use async_trait::async_trait;
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

const STATUS_UNAUTHORIZED: u16 = 401;
const STATUS_FORBIDDEN: u16 = 403;

/// A request relative to the API base URL.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
    retried: bool,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
            retried: false,
        }
    }

    pub fn with_json<B: Serialize>(mut self, body: &B) -> AuthResult<Self> {
        self.body = Some(serde_json::to_value(body)?);
        Ok(self)
    }

    /// Whether this request was already resent after a 401.
    pub fn is_retried(&self) -> bool {
        self.retried
    }
}

/// Status and raw body of an API response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Decode the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> AuthResult<T> {
        Ok(serde_json::from_str(&self.body)?)
    }
}

/// Sends one request with the given bearer token.
///
/// Implementations return `Ok` for every HTTP status and `Err` only when no
/// response was received.
#[async_trait]
pub trait RequestSender: Send + Sync {
    async fn send(&self, request: &ApiRequest, bearer_token: &str) -> AuthResult<ApiResponse>;
}

/// [`RequestSender`] over HTTP.
pub struct HttpRequestSender {
    base_url: Url,
    http_client: Client,
}

impl HttpRequestSender {
    pub fn new(base_url: Url, timeout: Duration) -> AuthResult<Self> {
        let http_client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url,
            http_client,
        })
    }
}

#[async_trait]
impl RequestSender for HttpRequestSender {
    async fn send(&self, request: &ApiRequest, bearer_token: &str) -> AuthResult<ApiResponse> {
        let url = endpoint_url(&self.base_url, &request.path)?;
        debug!(method = %request.method, url = %url, "Sending API request");

        let mut builder = self
            .http_client
            .request(request.method.clone(), url)
            .bearer_auth(bearer_token);
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(map_send_error)?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(map_send_error)?;

        Ok(ApiResponse { status, body })
    }
}

/// Wraps outgoing API calls with credential handling.
#[derive(Clone)]
pub struct AuthenticatedRequestClient {
    coordinator: TokenRefreshCoordinator,
    sender: Arc<dyn RequestSender>,
}

impl AuthenticatedRequestClient {
    pub fn new(coordinator: TokenRefreshCoordinator, sender: Arc<dyn RequestSender>) -> Self {
        Self {
            coordinator,
            sender,
        }
    }

    /// Send `request` with a valid bearer token.
    ///
    /// - 401 on the first attempt: refresh and resend once.
    /// - 401 after the resend: [`AuthError::AuthorizationRevoked`].
    /// - 403: [`AuthError::Forbidden`], never retried.
    /// - Anything else is returned as is.
    pub async fn send(&self, mut request: ApiRequest) -> AuthResult<ApiResponse> {
        let mut token = self.coordinator.get_valid_token().await?;

        loop {
            let response = self.dispatch(&request, &token).await?;

            match response.status {
                STATUS_UNAUTHORIZED if !request.retried => {
                    request.retried = true;
                    warn!(
                        method = %request.method,
                        path = %request.path,
                        "Request unauthorized, refreshing token and retrying once"
                    );
                    token = self.coordinator.refresh_after_rejection(&token).await?;
                }
                STATUS_UNAUTHORIZED => {
                    warn!(path = %request.path, "Request unauthorized after token refresh");
                    return Err(AuthError::AuthorizationRevoked);
                }
                STATUS_FORBIDDEN => {
                    debug!(path = %request.path, "Request forbidden");
                    return Err(AuthError::Forbidden);
                }
                _ => return Ok(response),
            }
        }
    }

    /// One send, repeated once if no response arrived for a transient reason.
    async fn dispatch(&self, request: &ApiRequest, token: &str) -> AuthResult<ApiResponse> {
        match self.sender.send(request, token).await {
            Err(e) if e.is_transient() => {
                warn!(path = %request.path, error = %e, "Transient request failure, retrying once");
                self.sender.send(request, token).await
            }
            other => other,
        }
    }

    pub async fn get(&self, path: &str) -> AuthResult<ApiResponse> {
        self.send(ApiRequest::new(Method::GET, path)).await
    }

    /// GET `path` and decode a successful JSON body.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> AuthResult<T> {
        let response = self.get(path).await?;
        ensure_success(&response)?;
        response.json()
    }

    pub async fn post_json<B: Serialize + Sync>(&self, path: &str, body: &B) -> AuthResult<ApiResponse> {
        self.send(ApiRequest::new(Method::POST, path).with_json(body)?)
            .await
    }

    pub async fn put_json<B: Serialize + Sync>(&self, path: &str, body: &B) -> AuthResult<ApiResponse> {
        self.send(ApiRequest::new(Method::PUT, path).with_json(body)?)
            .await
    }

    pub async fn delete(&self, path: &str) -> AuthResult<ApiResponse> {
        self.send(ApiRequest::new(Method::DELETE, path)).await
    }
}

fn ensure_success(response: &ApiResponse) -> AuthResult<()> {
    if response.is_success() {
        Ok(())
    } else {
        Err(AuthError::Api {
            status: response.status,
            body: response.body.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{AuthApi, TokenPair};
    use crate::claims::test_tokens::access_token;
    use chrono::Utc;
    use credential_store::{Credential, CredentialStore, MemoryStorage};
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const FAR_FUTURE: i64 = 4_000_000_000;

    struct RefreshingApi {
        refresh_calls: AtomicUsize,
    }

    #[async_trait]
    impl AuthApi for RefreshingApi {
        async fn login(&self, _: &str, _: &str) -> AuthResult<TokenPair> {
            Err(AuthError::InvalidCredentials("unused".into()))
        }

        async fn register(&self, _: &str, _: &str, _: &str) -> AuthResult<TokenPair> {
            Err(AuthError::InvalidCredentials("unused".into()))
        }

        async fn refresh(&self, _tokens: &TokenPair) -> AuthResult<TokenPair> {
            let n = self.refresh_calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(TokenPair {
                access_token: access_token(&format!("refreshed-{}", n), FAR_FUTURE),
                refresh_token: format!("R{}", n),
            })
        }
    }

    /// Replies from a script and records the bearer token of every send.
    struct ScriptedSender {
        replies: Mutex<VecDeque<AuthResult<ApiResponse>>>,
        seen_tokens: Mutex<Vec<String>>,
    }

    impl ScriptedSender {
        fn new(replies: Vec<AuthResult<ApiResponse>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                seen_tokens: Mutex::new(Vec::new()),
            })
        }

        fn sends(&self) -> usize {
            self.seen_tokens.lock().len()
        }
    }

    #[async_trait]
    impl RequestSender for ScriptedSender {
        async fn send(&self, _request: &ApiRequest, bearer_token: &str) -> AuthResult<ApiResponse> {
            self.seen_tokens.lock().push(bearer_token.to_string());
            self.replies
                .lock()
                .pop_front()
                .unwrap_or_else(|| Ok(status(200)))
        }
    }

    fn status(code: u16) -> ApiResponse {
        ApiResponse {
            status: code,
            body: r#"{"ok":true}"#.into(),
        }
    }

    fn build_client(sender: Arc<ScriptedSender>) -> (AuthenticatedRequestClient, Arc<RefreshingApi>, String) {
        let api = Arc::new(RefreshingApi {
            refresh_calls: AtomicUsize::new(0),
        });
        let store = CredentialStore::new(Box::new(MemoryStorage::new()));
        let initial = access_token("initial", FAR_FUTURE);
        store
            .replace(&Credential::new(
                initial.clone(),
                "R0",
                Utc::now() + chrono::Duration::hours(1),
            ))
            .unwrap();
        let coordinator = TokenRefreshCoordinator::new(store, api.clone());
        (
            AuthenticatedRequestClient::new(coordinator, sender),
            api,
            initial,
        )
    }

    #[tokio::test]
    async fn test_attaches_current_token() {
        let sender = ScriptedSender::new(vec![Ok(status(200))]);
        let (client, api, initial) = build_client(sender.clone());

        let response = client.get("templates").await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(*sender.seen_tokens.lock(), vec![initial]);
        assert_eq!(api.refresh_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_401_refreshes_and_retries_once() {
        let sender = ScriptedSender::new(vec![Ok(status(401)), Ok(status(200))]);
        let (client, api, initial) = build_client(sender.clone());

        let response = client.get("forms/1").await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(api.refresh_calls.load(Ordering::SeqCst), 1);

        let seen = sender.seen_tokens.lock().clone();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], initial);
        assert_eq!(seen[1], access_token("refreshed-1", FAR_FUTURE));
    }

    #[tokio::test]
    async fn test_second_401_is_terminal() {
        let sender = ScriptedSender::new(vec![
            Ok(status(401)),
            Ok(status(401)),
            Ok(status(200)),
        ]);
        let (client, api, _) = build_client(sender.clone());

        let err = client.get("forms/1").await.unwrap_err();
        assert!(matches!(err, AuthError::AuthorizationRevoked));
        assert!(err.requires_login());
        assert_eq!(sender.sends(), 2);
        assert_eq!(api.refresh_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_403_is_forbidden_without_refresh() {
        let sender = ScriptedSender::new(vec![Ok(status(403))]);
        let (client, api, _) = build_client(sender.clone());

        let err = client.delete("templates/9").await.unwrap_err();
        assert!(matches!(err, AuthError::Forbidden));
        assert_eq!(sender.sends(), 1);
        assert_eq!(api.refresh_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_transient_failure_retried_once() {
        let sender = ScriptedSender::new(vec![
            Err(AuthError::NetworkUnavailable),
            Ok(status(201)),
        ]);
        let (client, _, _) = build_client(sender.clone());

        let response = client
            .post_json("comments", &serde_json::json!({ "content": "hi" }))
            .await
            .unwrap();
        assert_eq!(response.status, 201);
        assert_eq!(sender.sends(), 2);

        let sender = ScriptedSender::new(vec![
            Err(AuthError::Timeout),
            Err(AuthError::Timeout),
            Ok(status(200)),
        ]);
        let (client, _, _) = build_client(sender.clone());
        assert!(matches!(
            client.get("templates").await,
            Err(AuthError::Timeout)
        ));
        assert_eq!(sender.sends(), 2);
    }

    #[tokio::test]
    async fn test_other_statuses_pass_through() {
        let sender = ScriptedSender::new(vec![Ok(ApiResponse {
            status: 404,
            body: "missing".into(),
        })]);
        let (client, _, _) = build_client(sender.clone());

        let response = client.put_json("forms/3", &serde_json::json!({})).await.unwrap();
        assert_eq!(response.status, 404);

        let sender = ScriptedSender::new(vec![Ok(ApiResponse {
            status: 500,
            body: "boom".into(),
        })]);
        let (client, _, _) = build_client(sender);
        assert!(matches!(
            client.get_json::<Value>("forms/3").await,
            Err(AuthError::Api { status: 500, .. })
        ));
    }

    #[tokio::test]
    async fn test_get_json_decodes_body() {
        let sender = ScriptedSender::new(vec![Ok(ApiResponse {
            status: 200,
            body: r#"{"id":7,"title":"Survey"}"#.into(),
        })]);
        let (client, _, _) = build_client(sender);

        let value: Value = client.get_json("templates/7").await.unwrap();
        assert_eq!(value["title"], "Survey");
    }
}
