//! Retry utilities for operations against the queue backend.
//!
//! Used for the bounded startup connect and to keep long-running worker
//! loops from flooding the logs while Redis is unavailable.

use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Delay policy between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Same delay every time.
    Fixed(Duration),
    /// Delay doubles each attempt, capped at `max`.
    Exponential { base: Duration, max: Duration },
}

impl Backoff {
    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        match *self {
            Backoff::Fixed(delay) => delay,
            Backoff::Exponential { base, max } => {
                let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
                base.saturating_mul(factor).min(max)
            }
        }
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retries (not including the initial attempt).
    pub max_retries: u32,
    /// Delay policy.
    pub backoff: Backoff,
    /// Operation name for logging.
    pub operation_name: String,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: Backoff::Exponential {
                base: Duration::from_millis(100),
                max: Duration::from_secs(5),
            },
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

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Wait the same `delay` between every attempt.
    pub fn with_fixed_backoff(mut self, delay: Duration) -> Self {
        self.backoff = Backoff::Fixed(delay);
        self
    }
}

/// Execute an async operation, retrying failures per `config`.
///
/// Returns the last error once retries are exhausted.
///
/// # Example
/// ```ignore
/// let config = RetryConfig::new("redis_connect")
///     .with_max_retries(10)
///     .with_fixed_backoff(Duration::from_secs(2));
/// let conn = retry_async(&config, || connect(&url)).await?;
/// ```
pub async fn retry_async<F, Fut, T, E>(config: &RetryConfig, operation: F) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0u32;

    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    debug!("{} succeeded after {} retries", config.operation_name, attempt);
                }
                return Ok(value);
            }
            Err(e) if attempt < config.max_retries => {
                attempt += 1;
                let delay = config.backoff.delay_for_attempt(attempt);
                warn!(
                    "{} failed (attempt {}/{}), retrying in {:?}: {}",
                    config.operation_name,
                    attempt,
                    config.max_retries + 1,
                    delay,
                    e
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// State tracker for repeated operations that may fail intermittently.
///
/// Background loops run continuously and should go quiet after a few
/// identical failures.
#[derive(Debug, Default)]
pub struct FailureTracker {
    consecutive_failures: u32,
    max_logged_failures: u32,
    suppressed: bool,
}

impl FailureTracker {
    pub fn new(max_logged_failures: u32) -> Self {
        Self {
            consecutive_failures: 0,
            max_logged_failures,
            suppressed: false,
        }
    }

    /// Record a successful operation (resets failure count).
    pub fn record_success(&mut self) {
        if self.consecutive_failures > 0 && self.suppressed {
            warn!(
                "Operation recovered after {} consecutive failures",
                self.consecutive_failures
            );
        }
        self.consecutive_failures = 0;
        self.suppressed = false;
    }

    /// Record a failed operation.
    ///
    /// Returns `true` if this failure should be logged.
    pub fn record_failure(&mut self) -> bool {
        self.consecutive_failures += 1;

        if self.consecutive_failures <= self.max_logged_failures {
            true
        } else if self.consecutive_failures == self.max_logged_failures + 1 {
            self.suppressed = true;
            warn!(
                "Suppressing further failure logs after {} consecutive failures",
                self.max_logged_failures
            );
            false
        } else {
            false
        }
    }

    pub fn failure_count(&self) -> u32 {
        self.consecutive_failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_backoff_delays() {
        let fixed = Backoff::Fixed(Duration::from_secs(2));
        assert_eq!(fixed.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(fixed.delay_for_attempt(9), Duration::from_secs(2));

        let exp = Backoff::Exponential {
            base: Duration::from_millis(100),
            max: Duration::from_secs(1),
        };
        assert_eq!(exp.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(exp.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(exp.delay_for_attempt(3), Duration::from_millis(400));
        assert_eq!(exp.delay_for_attempt(10), Duration::from_secs(1));
    }

    #[test]
    fn test_failure_tracker_suppression() {
        let mut tracker = FailureTracker::new(3);

        assert!(tracker.record_failure());
        assert!(tracker.record_failure());
        assert!(tracker.record_failure());

        // 4th failure triggers the suppression message
        assert!(!tracker.record_failure());
        assert!(!tracker.record_failure());

        tracker.record_success();
        assert_eq!(tracker.failure_count(), 0);
        assert!(tracker.record_failure());
    }

    #[tokio::test]
    async fn test_retry_eventual_success() {
        let config = RetryConfig::new("test").with_fixed_backoff(Duration::from_millis(1));
        let calls = AtomicU32::new(0);

        let result = retry_async(&config, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err("transient")
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_bound() {
        let config = RetryConfig::new("test")
            .with_max_retries(4)
            .with_fixed_backoff(Duration::from_millis(1));
        let calls = AtomicU32::new(0);

        let result: Result<(), &str> = retry_async(&config, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err("down") }
        })
        .await;

        assert_eq!(result, Err("down"));
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }
}
