//! # Observability
//!
//! Logging setup shared by the forms session crates.
//!
//! Library crates only emit events through the standard `tracing` macros.
//! The binary calls [`init_with_config`] once at startup, which decides
//! where those events go:
//!
//! - a JSONL file (one object per line, see [`LogEntry`]) when
//!   [`LogConfig::log_path`] is set, and
//! - a compact human-readable stream on stderr when
//!   [`LogConfig::also_stderr`] is set, or when no file is configured.
//!
//! `RUST_LOG` always wins over the configured default level.
//!
//! ## Usage
//!
//! ```rust,ignore
//! observability::init_with_config(observability::LogConfig {
//!     service_name: "forms-session".into(),
//!     default_level: "debug".into(),
//!     log_path: Some(paths.log_file()),
//!     also_stderr: true,
//! });
//! tracing::info!("ready");
//! ```

mod json_layer;
mod writer;

pub use json_layer::{JsonLayer, LogEntry};
pub use writer::{AppendLogWriter, WriterFactory};

use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Configuration for the logging system.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Name of the service, written into every JSONL line.
    pub service_name: String,

    /// Default level filter (e.g. "debug", "info").
    /// Overridden by the `RUST_LOG` environment variable.
    pub default_level: String,

    /// JSONL log file. `None` disables the file layer.
    pub log_path: Option<PathBuf>,

    /// Also emit compact logs to stderr.
    pub also_stderr: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown".into(),
            default_level: "info".into(),
            log_path: None,
            also_stderr: false,
        }
    }
}

/// Initialize logging with default settings for `service_name`.
pub fn init(service_name: &str) {
    init_with_config(LogConfig {
        service_name: service_name.into(),
        ..Default::default()
    });
}

/// Initialize logging with a custom configuration.
///
/// Installing a global subscriber twice is a no-op, so tests and embedders
/// may call this freely. If the log file cannot be opened, logging falls
/// back to stderr and the failure is reported there.
pub fn init_with_config(config: LogConfig) {
    let file_writer = config
        .log_path
        .as_ref()
        .map(|path| AppendLogWriter::new(path).map_err(|e| (path.clone(), e)));

    let (json_layer, open_error) = match file_writer {
        Some(Ok(writer)) => (
            Some(
                JsonLayer::new(config.service_name.clone(), WriterFactory::new(writer))
                    .with_filter(env_filter(&config.default_level)),
            ),
            None,
        ),
        Some(Err(failure)) => (None, Some(failure)),
        None => (None, None),
    };

    let stderr_enabled = config.also_stderr || json_layer.is_none();
    let stderr_layer = stderr_enabled.then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .compact()
            .with_writer(std::io::stderr)
            .with_filter(env_filter(&config.default_level))
    });

    let installed = tracing_subscriber::registry()
        .with(json_layer)
        .with(stderr_layer)
        .try_init()
        .is_ok();

    if !installed {
        return;
    }

    if let Some((path, error)) = open_error {
        tracing::warn!(
            log_path = %path.display(),
            error = %error,
            "failed to open log file, logging to stderr only"
        );
    }

    tracing::debug!(service = %config.service_name, "observability initialized");
}

fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Parse a level name, falling back to INFO for unknown input.
pub fn parse_level(level: &str) -> tracing::Level {
    match level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" | "warning" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    }
}

pub use tracing::{debug, error, info, instrument, trace, warn};
pub use tracing::Level;
