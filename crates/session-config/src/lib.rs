//! Configuration, filesystem layout and logging bootstrap for the forms
//! session crates.

mod config;
mod error;
mod logging;
mod paths;

pub use config::{
    Config, DEFAULT_API_BASE_URL, DEFAULT_HUB_URL, DEFAULT_LOG_LEVEL,
    DEFAULT_RECONNECT_DELAYS_MS, DEFAULT_REQUEST_TIMEOUT_SECS, DEFAULT_TOKEN_EXPIRY_MARGIN_SECS,
};
pub use error::{CoreError, CoreResult, FailureKind};
pub use logging::init_logging;
pub use paths::Paths;
