//! Configuration management.

use crate::{CoreError, CoreResult, Paths};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Default REST API base URL (can be overridden at compile time via FORMS_API_URL).
pub const DEFAULT_API_BASE_URL: &str = match option_env!("FORMS_API_URL") {
    Some(url) => url,
    None => "https://localhost:7164/api",
};

/// Default comments hub URL (can be overridden at compile time via FORMS_HUB_URL).
pub const DEFAULT_HUB_URL: &str = match option_env!("FORMS_HUB_URL") {
    Some(url) => url,
    None => "https://customizableforms.runasp.net/hubs/comments",
};

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Seconds before `exp` at which an access token is already treated as expired.
pub const DEFAULT_TOKEN_EXPIRY_MARGIN_SECS: u64 = 10;

/// Timeout for a single HTTP request.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Delay before each reconnect attempt; the last entry repeats.
pub const DEFAULT_RECONNECT_DELAYS_MS: [u64; 5] = [0, 2_000, 5_000, 10_000, 30_000];

/// Main configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Base URL of the forms REST API.
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    /// URL of the realtime comments hub.
    #[serde(default = "default_hub_url")]
    pub hub_url: String,
    /// Clock-skew tolerance applied to access token expiry.
    #[serde(default = "default_token_expiry_margin_secs")]
    pub token_expiry_margin_secs: u64,
    /// Timeout for individual HTTP requests.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Reconnect backoff schedule in milliseconds.
    #[serde(default = "default_reconnect_delays_ms")]
    pub reconnect_delays_ms: Vec<u64>,
    /// Give up reconnecting after this many attempts. `None` retries forever.
    #[serde(default)]
    pub max_reconnect_attempts: Option<u32>,
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_api_base_url() -> String {
    DEFAULT_API_BASE_URL.to_string()
}

fn default_hub_url() -> String {
    DEFAULT_HUB_URL.to_string()
}

fn default_token_expiry_margin_secs() -> u64 {
    DEFAULT_TOKEN_EXPIRY_MARGIN_SECS
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

fn default_reconnect_delays_ms() -> Vec<u64> {
    DEFAULT_RECONNECT_DELAYS_MS.to_vec()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            api_base_url: default_api_base_url(),
            hub_url: default_hub_url(),
            token_expiry_margin_secs: DEFAULT_TOKEN_EXPIRY_MARGIN_SECS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            reconnect_delays_ms: default_reconnect_delays_ms(),
            max_reconnect_attempts: None,
        }
    }
}

impl Config {
    /// Create a new Config with default values, then override from environment.
    pub fn new() -> Self {
        let mut config = Self::default();
        config.load_from_env();
        config
    }

    /// Load configuration from the config file, falling back to defaults,
    /// then apply environment overrides.
    pub fn load(paths: &Paths) -> CoreResult<Self> {
        let config_path = paths.config_file();

        let mut config = if config_path.exists() {
            debug!(path = %config_path.display(), "loading config file");
            Self::load_from_file(&config_path)?
        } else {
            Self::default()
        };

        config.load_from_env();
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to the config file.
    pub fn save(&self, paths: &Paths) -> CoreResult<()> {
        paths.ensure_dirs()?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(paths.config_file(), content)?;
        Ok(())
    }

    fn load_from_env(&mut self) {
        if let Some(level) = env_override("FORMS_LOG_LEVEL") {
            self.log_level = level;
        }
        if let Some(url) = env_override("FORMS_API_URL") {
            self.api_base_url = url;
        }
        if let Some(url) = env_override("FORMS_HUB_URL") {
            self.hub_url = url;
        }
    }

    /// Check values that would otherwise only fail at first use.
    pub fn validate(&self) -> CoreResult<()> {
        self.api_base_url()?;
        self.hub_url()?;
        if self.reconnect_delays_ms.is_empty() {
            return Err(CoreError::Config(
                "reconnect_delays_ms must contain at least one delay".to_string(),
            ));
        }
        Ok(())
    }

    /// Get the API base URL as a parsed URL.
    pub fn api_base_url(&self) -> CoreResult<Url> {
        Url::parse(&self.api_base_url).map_err(CoreError::from)
    }

    /// Get the hub URL as a parsed URL.
    pub fn hub_url(&self) -> CoreResult<Url> {
        Url::parse(&self.hub_url).map_err(CoreError::from)
    }

    pub fn token_expiry_margin(&self) -> Duration {
        Duration::from_secs(self.token_expiry_margin_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn reconnect_delays(&self) -> Vec<Duration> {
        self.reconnect_delays_ms
            .iter()
            .map(|ms| Duration::from_millis(*ms))
            .collect()
    }
}

fn env_override(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.log_level, DEFAULT_LOG_LEVEL);
        assert_eq!(config.api_base_url, DEFAULT_API_BASE_URL);
        assert_eq!(config.hub_url, DEFAULT_HUB_URL);
        assert_eq!(config.token_expiry_margin(), Duration::from_secs(10));
        assert_eq!(config.reconnect_delays().len(), 5);
        assert_eq!(config.reconnect_delays()[0], Duration::ZERO);
        assert!(config.max_reconnect_attempts.is_none());
    }

    #[test]
    fn test_config_load_from_file_fills_missing_fields() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.json");

        std::fs::write(
            &config_path,
            r#"{ "log_level": "debug", "max_reconnect_attempts": 4 }"#,
        )
        .unwrap();

        let config = Config::load_from_file(&config_path).unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.max_reconnect_attempts, Some(4));
        assert_eq!(config.hub_url, DEFAULT_HUB_URL);
        assert_eq!(config.request_timeout_secs, DEFAULT_REQUEST_TIMEOUT_SECS);
    }

    #[test]
    fn test_config_save_and_load_roundtrip() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());

        let mut config = Config::default();
        config.token_expiry_margin_secs = 42;
        config.reconnect_delays_ms = vec![100, 200];
        config.save(&paths).unwrap();

        let loaded = Config::load(&paths).unwrap();
        assert_eq!(loaded.token_expiry_margin_secs, 42);
        assert_eq!(loaded.reconnect_delays_ms, vec![100, 200]);
    }

    #[test]
    fn test_config_load_nonexistent_uses_defaults() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());

        let config = Config::load(&paths).unwrap();
        assert_eq!(config.reconnect_delays_ms, DEFAULT_RECONNECT_DELAYS_MS.to_vec());
    }

    #[test]
    fn test_config_rejects_empty_backoff_schedule() {
        let mut config = Config::default();
        config.reconnect_delays_ms.clear();
        assert!(matches!(config.validate(), Err(CoreError::Config(_))));
    }

    #[test]
    fn test_config_invalid_url() {
        let mut config = Config::default();
        config.hub_url = "not a valid url".to_string();
        assert!(config.hub_url().is_err());
        assert!(config.validate().is_err());
    }
}
