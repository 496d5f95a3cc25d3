//! Retry utilities with exponential backoff.

use std::future::Future;
use std::time::Duration;
use tracing::{info, warn};

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts, the first one included.
    pub max_attempts: u32,
    /// Delay after the first failure (doubles each attempt).
    pub base_delay: Duration,
    /// Maximum delay between attempts.
    pub max_delay: Duration,
    /// Operation name for logging.
    pub operation_name: String,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            operation_name: "operation".to_string(),
        }
    }
}

impl RetryConfig {
    /// Create a new retry config with the given operation name.
    pub fn new(operation_name: impl Into<String>) -> Self {
        Self {
            operation_name: operation_name.into(),
            ..Default::default()
        }
    }

    /// Set the total number of attempts.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Set the base delay for exponential backoff.
    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Delay after failed attempt `attempt` (1-based): `base × 2^(attempt-1)`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let delay = self.base_delay.saturating_mul(2u32.pow(exponent));
        delay.min(self.max_delay)
    }
}

/// Run `operation` until it succeeds, fails fatally or runs out of attempts.
///
/// The operation receives the 1-based attempt number. Errors for which
/// `is_fatal` holds are returned at once, without sleeping.
pub async fn retry_with_resilience<F, Fut, T, E, P>(
    config: &RetryConfig,
    is_fatal: P,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut attempt = 1u32;

    loop {
        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if is_fatal(&e) => return Err(e),
            Err(e) if attempt < config.max_attempts => {
                let delay = config.delay_for_attempt(attempt);
                info!(
                    "Retry {}, attempt {} failed, retrying after {:?}: {}",
                    config.operation_name, attempt, delay, e
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                warn!(
                    "{} failed after {} attempts: {}",
                    config.operation_name, attempt, e
                );
                return Err(e);
            }
        }
    }
}

/// Counts consecutive failures against a ceiling.
#[derive(Debug)]
pub struct FailureTracker {
    consecutive_failures: u32,
    ceiling: u32,
}

impl FailureTracker {
    pub fn new(ceiling: u32) -> Self {
        Self {
            consecutive_failures: 0,
            ceiling: ceiling.max(1),
        }
    }

    /// Record a successful operation (resets failure count).
    pub fn record_success(&mut self) {
        if self.consecutive_failures > 0 {
            info!(
                "Recovered after {} consecutive failures",
                self.consecutive_failures
            );
        }
        self.consecutive_failures = 0;
    }

    /// Record a failed operation. Returns `true` once the ceiling is reached.
    pub fn record_failure(&mut self) -> bool {
        self.consecutive_failures += 1;
        self.consecutive_failures >= self.ceiling
    }

    /// Get the current consecutive failure count.
    pub fn failure_count(&self) -> u32 {
        self.consecutive_failures
    }
}
