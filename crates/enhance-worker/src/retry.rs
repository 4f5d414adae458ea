//! Retries with exponential backoff for broker and store calls.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

/// Backoff schedule for one kind of operation.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts after the first one.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Used in log lines.
    pub operation: &'static str,
}

impl RetryPolicy {
    pub fn new(operation: &'static str) -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            operation,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Delay before retry number `retry` (1-based).
    fn delay(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Run `operation` until it succeeds or the retries are spent.
    ///
    /// Returns the last error when every attempt failed.
    pub async fn run<F, Fut, T, E>(&self, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut retry = 0u32;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if retry < self.max_retries => {
                    retry += 1;
                    let delay = self.delay(retry);
                    debug!(
                        "{} attempt {} failed, retrying in {:?}: {}",
                        self.operation, retry, delay, e
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    warn!("{} failed after {} attempts: {}", self.operation, retry + 1, e);
                    return Err(e);
                }
            }
        }
    }
}

/// Counts consecutive failures of a repeating operation and decides
/// which ones are worth logging.
#[derive(Debug, Default)]
pub struct FailureTracker {
    consecutive: u32,
    log_limit: u32,
}

impl FailureTracker {
    pub fn new(log_limit: u32) -> Self {
        Self {
            consecutive: 0,
            log_limit,
        }
    }

    pub fn record_success(&mut self) {
        if self.consecutive > self.log_limit {
            debug!("Recovered after {} consecutive failures", self.consecutive);
        }
        self.consecutive = 0;
    }

    /// Returns `true` if this failure should be logged.
    pub fn record_failure(&mut self) -> bool {
        self.consecutive += 1;
        if self.consecutive == self.log_limit + 1 {
            warn!(
                "Suppressing further failure logs after {} consecutive failures",
                self.log_limit
            );
        }
        self.consecutive <= self.log_limit
    }

    pub fn failure_count(&self) -> u32 {
        self.consecutive
    }

    /// Backoff to apply after the current streak of failures.
    pub fn backoff(&self, base: Duration, max: Duration) -> Duration {
        if self.consecutive == 0 {
            return Duration::ZERO;
        }
        let factor = 2u32.saturating_pow(self.consecutive.min(16) - 1);
        base.saturating_mul(factor).min(max)
    }
}
