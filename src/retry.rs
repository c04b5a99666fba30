use std::fmt;
use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep, Instant};

use crate::logging::{ErrorLogger, LogContext};

/// Exponential backoff: `delay(n) = base * 2^(n-1)`.
///
/// Pure and deterministic so every transport waits the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
}

impl Backoff {
    pub fn new(base: Duration) -> Self {
        Self { base }
    }

    pub fn from_millis(base_ms: u64) -> Self {
        Self::new(Duration::from_millis(base_ms))
    }

    pub fn base(&self) -> Duration {
        self.base
    }

    /// Delay to wait after failed attempt `attempt` (1-based; 0 is treated as 1)
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.max(1) - 1;
        let factor = 2u32.saturating_pow(exponent);
        self.base.saturating_mul(factor)
    }
}

/// Configuration for retry behavior
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 1000,
        }
    }
}

impl RetryConfig {
    pub fn new(max_attempts: u32, base_delay_ms: u64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay_ms,
        }
    }

    pub fn backoff(&self) -> Backoff {
        Backoff::from_millis(self.base_delay_ms)
    }
}

/// Errors that know whether another attempt could succeed
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

/// The last error of a retried operation together with the attempts spent
#[derive(Debug, Clone, PartialEq)]
pub struct RetryFailure<E> {
    pub attempts: u32,
    pub error: E,
}

impl<E: fmt::Display> fmt::Display for RetryFailure<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed after {} attempt(s): {}", self.attempts, self.error)
    }
}

/// Runs an async operation, sleeping per [`Backoff`] between retryable failures
pub struct RetryManager {
    config: RetryConfig,
    operation_name: String,
}

impl RetryManager {
    pub fn new(operation_name: &str, config: RetryConfig) -> Self {
        Self {
            config,
            operation_name: operation_name.to_string(),
        }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Execute `operation` until it succeeds, fails non-retryably or runs out of attempts.
    ///
    /// The closure receives the 1-based attempt number. Returns the value and
    /// the number of attempts used.
    pub async fn execute<T, E, F, Fut>(&self, mut operation: F) -> Result<(T, u32), RetryFailure<E>>
    where
        E: Retryable + fmt::Display,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let backoff = self.config.backoff();
        let max_attempts = self.config.max_attempts.max(1);
        let started = Instant::now();
        let mut attempt = 1;

        loop {
            match operation(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        ErrorLogger::log_recovery_success(
                            &self.operation_name,
                            attempt,
                            started.elapsed().as_millis() as u64,
                        );
                    }
                    return Ok((value, attempt));
                }
                Err(error) => {
                    if !error.is_retryable() {
                        LogContext::new("retry", &self.operation_name)
                            .with_retry_count(attempt)
                            .with_metadata("reason", serde_json::json!("non_retryable"))
                            .error(&format!("Non-retryable error, aborting: {}", error));
                        return Err(RetryFailure { attempts: attempt, error });
                    }

                    if attempt >= max_attempts {
                        ErrorLogger::log_retry_attempt(
                            &self.operation_name,
                            &error.to_string(),
                            attempt,
                            max_attempts,
                            None,
                        );
                        return Err(RetryFailure { attempts: attempt, error });
                    }

                    let delay = backoff.delay(attempt);
                    ErrorLogger::log_retry_attempt(
                        &self.operation_name,
                        &error.to_string(),
                        attempt,
                        max_attempts,
                        Some(delay.as_millis() as u64),
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
