//! Logging initialization for the session binary.
//!
//! Thin wrapper over the observability crate: structured JSONL goes to
//! `~/.forms-session/logs/session.jsonl` and a compact copy to stderr.

use crate::Paths;

/// Service name written into every JSONL line.
const SERVICE_NAME: &str = "forms-session";

/// Initialize the logging system.
///
/// `level` is the default filter (trace, debug, info, warn, error); `RUST_LOG`
/// overrides it when set.
///
/// ```ignore
/// init_logging("info", &paths);
/// tracing::info!("session ready");
/// ```
pub fn init_logging(level: &str, paths: &Paths) {
    observability::init_with_config(observability::LogConfig {
        service_name: SERVICE_NAME.into(),
        default_level: level.into(),
        log_path: Some(paths.log_file()),
        also_stderr: true,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn init_logging_creates_log_file() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());

        init_logging("debug", &paths);
        assert!(paths.log_file().exists());
    }
}
