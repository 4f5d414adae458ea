//! Client configuration.

use std::time::Duration;

/// Result polling configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Number of polls before giving up on a result
    pub poll_attempts: u32,
    /// Delay between polls
    pub poll_interval: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            poll_attempts: 60,
            poll_interval: Duration::from_millis(1000),
        }
    }
}

impl ClientConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            poll_attempts: std::env::var("RESULT_POLL_ATTEMPTS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(60),
            poll_interval: Duration::from_millis(
                std::env::var("RESULT_POLL_INTERVAL_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(1000),
            ),
        }
    }

    /// Upper bound on how long a fetch waits.
    pub fn poll_budget(&self) -> Duration {
        self.poll_interval * self.poll_attempts
    }
}
