//! REST client for the authentication endpoints.

use crate::{AuthError, AuthResult};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// Tokens returned by login, register and refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// Body of `POST /token/refresh`. The API binds these by their PascalCase names.
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct RefreshRequest<'a> {
    access_token: &'a str,
    refresh_token: &'a str,
}

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, Serialize)]
struct RegisterRequest<'a> {
    name: &'a str,
    email: &'a str,
    password: &'a str,
}

/// The authentication endpoints of the forms API.
#[async_trait]
pub trait AuthApi: Send + Sync {
    /// Exchange email and password for a token pair.
    async fn login(&self, email: &str, password: &str) -> AuthResult<TokenPair>;

    /// Create an account. The returned tokens are not relied upon; callers
    /// log in afterwards.
    async fn register(&self, name: &str, email: &str, password: &str) -> AuthResult<TokenPair>;

    /// Trade the current pair for a new one.
    async fn refresh(&self, tokens: &TokenPair) -> AuthResult<TokenPair>;
}

/// [`AuthApi`] over HTTP.
pub struct HttpAuthApi {
    base_url: Url,
    http_client: Client,
}

impl HttpAuthApi {
    pub fn new(base_url: Url, timeout: Duration) -> AuthResult<Self> {
        let http_client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url,
            http_client,
        })
    }

    fn endpoint(&self, path: &str) -> AuthResult<Url> {
        endpoint_url(&self.base_url, path)
    }

    async fn post_for_tokens<B: Serialize + Sync>(
        &self,
        path: &str,
        body: &B,
    ) -> AuthResult<TokenPair> {
        let url = self.endpoint(path)?;
        debug!(url = %url, "Calling auth endpoint");

        let response = self
            .http_client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(map_send_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, body = %body, path = %path, "Auth endpoint failed");
            return Err(match status {
                StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED => {
                    AuthError::InvalidCredentials(format!("HTTP {}: {}", status, body))
                }
                _ => AuthError::Api {
                    status: status.as_u16(),
                    body,
                },
            });
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl AuthApi for HttpAuthApi {
    async fn login(&self, email: &str, password: &str) -> AuthResult<TokenPair> {
        self.post_for_tokens("authentication/login", &LoginRequest { email, password })
            .await
    }

    async fn register(&self, name: &str, email: &str, password: &str) -> AuthResult<TokenPair> {
        self.post_for_tokens(
            "authentication",
            &RegisterRequest {
                name,
                email,
                password,
            },
        )
        .await
    }

    async fn refresh(&self, tokens: &TokenPair) -> AuthResult<TokenPair> {
        self.post_for_tokens(
            "token/refresh",
            &RefreshRequest {
                access_token: &tokens.access_token,
                refresh_token: &tokens.refresh_token,
            },
        )
        .await
    }
}

/// Join `path` onto `base` keeping the base's own path segments
/// (`https://host/api` + `token/refresh` → `https://host/api/token/refresh`).
pub(crate) fn endpoint_url(base: &Url, path: &str) -> AuthResult<Url> {
    let mut base = base.clone();
    if !base.path().ends_with('/') {
        let with_slash = format!("{}/", base.path());
        base.set_path(&with_slash);
    }
    Ok(base.join(path.trim_start_matches('/'))?)
}

/// Connect failures and timeouts get their own variants so callers can
/// classify them without inspecting the reqwest error.
pub(crate) fn map_send_error(error: reqwest::Error) -> AuthError {
    if error.is_timeout() {
        AuthError::Timeout
    } else if error.is_connect() {
        AuthError::NetworkUnavailable
    } else {
        AuthError::Http(error)
    }
}
