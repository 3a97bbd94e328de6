//! Retry with backoff for connection establishment
//!
//! By default a connection is attempted exactly once. When retries are
//! configured, only errors that [`DbLinkError::is_recoverable`] accepts are
//! retried (network unreachability and timeouts). Authentication and
//! configuration failures are reported immediately.

use crate::config::RetryConfig;
use crate::errors::DbLinkError;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Retry policy configuration
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,

    /// Initial delay before first retry
    pub initial_delay: Duration,

    /// Maximum delay between retries
    pub max_delay: Duration,

    /// Backoff strategy to use
    pub backoff_strategy: BackoffStrategy,

    /// Whether to add jitter to delays
    pub jitter: bool,

    /// Predicate to determine if error is retryable
    pub retry_condition: fn(&DbLinkError) -> bool,
}

/// Backoff strategies for retry delays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffStrategy {
    /// Fixed delay between retries
    Fixed,

    /// Linear increase in delay
    Linear,

    /// Exponential backoff (delay doubles each time)
    Exponential,
}

/// Result of a retry operation
#[derive(Debug)]
pub enum RetryResult<T> {
    /// Operation succeeded
    Success(T),

    /// Operation failed after all retries
    Failed {
        /// Error returned by the final attempt
        last_error: DbLinkError,
        /// Attempts actually made
        attempts: u32,
        /// Wall time spent including delays
        total_duration: Duration,
    },
}

impl<T> RetryResult<T> {
    /// Collapse into a plain `Result`, keeping the last error
    pub fn into_result(self) -> Result<T, DbLinkError> {
        match self {
            Self::Success(value) => Ok(value),
            Self::Failed { last_error, .. } => Err(last_error),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            backoff_strategy: BackoffStrategy::Exponential,
            jitter: true,
            retry_condition: default_retry_condition,
        }
    }
}

impl RetryPolicy {
    /// Create a single-attempt policy
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a policy from the `[retry]` config section
    #[must_use]
    pub fn from_config(config: &RetryConfig) -> Self {
        Self::default()
            .with_max_attempts(config.max_attempts)
            .with_initial_delay(Duration::from_millis(config.initial_delay_ms))
            .with_max_delay(Duration::from_millis(config.max_delay_ms))
    }

    /// Set maximum number of attempts
    #[must_use]
    pub const fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set initial delay
    #[must_use]
    pub const fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set maximum delay
    #[must_use]
    pub const fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set backoff strategy
    #[must_use]
    pub const fn with_backoff_strategy(mut self, strategy: BackoffStrategy) -> Self {
        self.backoff_strategy = strategy;
        self
    }

    /// Enable or disable jitter
    #[must_use]
    pub const fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Set custom retry condition
    #[must_use]
    pub fn with_retry_condition(mut self, condition: fn(&DbLinkError) -> bool) -> Self {
        self.retry_condition = condition;
        self
    }

    /// Execute an operation with retry logic
    pub async fn execute<T, F, Fut>(&self, mut operation: F) -> RetryResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, DbLinkError>>,
    {
        let start_time = Instant::now();
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            debug!("Attempting operation (attempt {}/{})", attempt, max_attempts);

            match operation().await {
                Ok(result) => {
                    if attempt > 1 {
                        info!(
                            "Operation succeeded on attempt {} after {:?}",
                            attempt,
                            start_time.elapsed()
                        );
                    }
                    return RetryResult::Success(result);
                }
                Err(error) => {
                    let should_retry = (self.retry_condition)(&error);

                    if attempt < max_attempts && should_retry {
                        let delay = self.calculate_delay(attempt);
                        warn!(
                            "Operation failed on attempt {} ({}), retrying in {:?}: {}",
                            attempt,
                            error.context().operation,
                            delay,
                            error
                        );
                        sleep(delay).await;
                        attempt += 1;
                        continue;
                    }

                    if should_retry {
                        warn!("Operation failed on final attempt {}: {}", attempt, error);
                    } else {
                        warn!("Operation failed with non-retryable error: {}", error);
                    }

                    return RetryResult::Failed {
                        last_error: error,
                        attempts: attempt,
                        total_duration: start_time.elapsed(),
                    };
                }
            }
        }
    }

    /// Calculate delay for a given attempt
    fn calculate_delay(&self, attempt: u32) -> Duration {
        let base_delay = match self.backoff_strategy {
            BackoffStrategy::Fixed => self.initial_delay,
            BackoffStrategy::Linear => self.initial_delay.saturating_mul(attempt),
            BackoffStrategy::Exponential => {
                let multiplier = 2_u32.saturating_pow(attempt.saturating_sub(1));
                self.initial_delay.saturating_mul(multiplier)
            }
        };

        let mut delay = base_delay.min(self.max_delay);

        if self.jitter {
            #[allow(clippy::cast_precision_loss)]
            let jitter_amount = delay.as_millis() as f64 * 0.1; // 10% jitter
            let jitter = (fastrand::f64() * jitter_amount).mul_add(2.0, -jitter_amount);
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let jitter_duration = Duration::from_millis(jitter.abs() as u64);

            if jitter >= 0.0 {
                delay += jitter_duration;
            } else {
                delay = delay.saturating_sub(jitter_duration);
            }
        }

        delay
    }
}

/// Default retry condition - retry if error is recoverable
const fn default_retry_condition(error: &DbLinkError) -> bool {
    error.is_recoverable()
}
