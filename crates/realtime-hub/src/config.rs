//! Reconnect policy.

use session_config::{Config, DEFAULT_RECONNECT_DELAYS_MS};
use std::time::Duration;

/// Connection manager settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubConfig {
    /// Delay before each reconnect attempt. The last entry repeats.
    pub reconnect_delays: Vec<Duration>,
    /// Stop reconnecting after this many attempts. `None` retries forever.
    pub max_reconnect_attempts: Option<u32>,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            reconnect_delays: DEFAULT_RECONNECT_DELAYS_MS
                .iter()
                .map(|ms| Duration::from_millis(*ms))
                .collect(),
            max_reconnect_attempts: None,
        }
    }
}

impl HubConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            reconnect_delays: config.reconnect_delays(),
            max_reconnect_attempts: config.max_reconnect_attempts,
        }
    }

    /// Delay before reconnect attempt `attempt` (zero-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let index = (attempt as usize).min(self.reconnect_delays.len().saturating_sub(1));
        self.reconnect_delays
            .get(index)
            .copied()
            .unwrap_or(Duration::ZERO)
    }

    /// Whether reconnect attempt `attempt` (zero-based) may run.
    pub fn allows_attempt(&self, attempt: u32) -> bool {
        self.max_reconnect_attempts
            .map_or(true, |max| attempt < max)
    }
}
