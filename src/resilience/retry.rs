//! Retry Logic
//!
//! Exponential backoff retry for transient upstream failures.

use async_trait::async_trait;
use std::future::Future;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::SessionAuthError;

/// Retry configuration.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Delay after the first failed attempt; doubles per attempt.
    pub base_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

/// Default retry configuration.
pub const DEFAULT_RETRY_CONFIG: RetryConfig = RetryConfig {
    max_attempts: 3,
    base_delay: Duration::from_secs(1),
    max_delay: Duration::from_secs(30),
};

impl RetryConfig {
    /// Backoff after failed attempt `attempt` (1-based): `base_delay * 2^(attempt-1)`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Retry executor interface.
#[async_trait]
pub trait RetryExecutor: Send + Sync {
    /// Execute an operation with retry logic.
    async fn execute<T, F, Fut>(&self, operation: F) -> Result<T, SessionAuthError>
    where
        T: Send,
        F: Fn(u32) -> Fut + Send + Sync,
        Fut: Future<Output = Result<T, SessionAuthError>> + Send;

    /// Check if an error is retryable.
    fn is_retryable(&self, error: &SessionAuthError) -> bool;

    /// Get retry statistics.
    fn get_stats(&self) -> RetryStats;
}

/// Retry statistics.
#[derive(Debug, Clone, Default)]
pub struct RetryStats {
    pub total_attempts: u32,
    pub successful_retries: u32,
    pub failed_operations: u32,
}

/// Backoff retry executor.
pub struct BackoffRetryExecutor {
    config: RetryConfig,
    stats: Mutex<RetryStats>,
}

impl BackoffRetryExecutor {
    /// Create new retry executor.
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            stats: Mutex::new(RetryStats::default()),
        }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    fn stats(&self) -> std::sync::MutexGuard<'_, RetryStats> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for BackoffRetryExecutor {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

#[async_trait]
impl RetryExecutor for BackoffRetryExecutor {
    async fn execute<T, F, Fut>(&self, operation: F) -> Result<T, SessionAuthError>
    where
        T: Send,
        F: Fn(u32) -> Fut + Send + Sync,
        Fut: Future<Output = Result<T, SessionAuthError>> + Send,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            self.stats().total_attempts += 1;

            match operation(attempt).await {
                Ok(result) => {
                    if attempt > 1 {
                        self.stats().successful_retries += 1;
                    }
                    return Ok(result);
                }
                Err(error) => {
                    if !self.is_retryable(&error) || attempt >= max_attempts {
                        self.stats().failed_operations += 1;
                        if attempt >= max_attempts && self.is_retryable(&error) {
                            warn!(attempts = attempt, error = %error, "retry budget exhausted");
                        }
                        return Err(error);
                    }

                    let backoff = self.config.delay_for_attempt(attempt);
                    let delay = error
                        .retry_after()
                        .map(|after| after.max(backoff))
                        .unwrap_or(backoff);
                    debug!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "transient failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    fn is_retryable(&self, error: &SessionAuthError) -> bool {
        error.is_retryable()
    }

    fn get_stats(&self) -> RetryStats {
        self.stats().clone()
    }
}

/// Create retry executor.
pub fn create_retry_executor(config: RetryConfig) -> BackoffRetryExecutor {
    BackoffRetryExecutor::new(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AuthenticationError, NetworkError};
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    fn timeout_error() -> SessionAuthError {
        SessionAuthError::Network(NetworkError::Timeout {
            timeout: Duration::from_secs(10),
        })
    }

    #[test]
    fn test_retry_config_default() {
        let config = RetryConfig::default();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.base_delay, Duration::from_secs(1));
    }

    #[test]
    fn test_backoff_doubles_per_attempt() {
        let config = RetryConfig {
            max_attempts: 6,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1000),
        };
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(config.delay_for_attempt(3), Duration::from_millis(400));
        assert_eq!(config.delay_for_attempt(5), Duration::from_millis(1000));
        assert_eq!(config.delay_for_attempt(64), Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_success_after_failures() {
        let executor = BackoffRetryExecutor::new(RetryConfig {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
        });
        let calls = AtomicU32::new(0);
        let start = Instant::now();

        let result = executor
            .execute(|_| async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(timeout_error())
                } else {
                    Ok("success")
                }
            })
            .await;

        assert_eq!(result.unwrap(), "success");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(start.elapsed() >= Duration::from_millis(300));
        assert_eq!(executor.get_stats().successful_retries, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_exhausted_surfaces_last_error() {
        let executor = BackoffRetryExecutor::new(RetryConfig {
            max_attempts: 3,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_secs(1),
        });
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = executor
            .execute(|_| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(timeout_error())
            })
            .await;

        assert!(result.unwrap_err().is_timeout());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_error_is_not_retried() {
        let executor = BackoffRetryExecutor::default();
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = executor
            .execute(|_| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(SessionAuthError::Authentication(AuthenticationError::Failed {
                    message: "bad credentials".to_string(),
                }))
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_attempt_numbers_are_passed() {
        let executor = BackoffRetryExecutor::new(RetryConfig {
            max_attempts: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(1),
        });
        let seen = Mutex::new(Vec::new());

        let _: Result<(), _> = executor
            .execute(|attempt| {
                seen.lock().unwrap().push(attempt);
                async { Err(timeout_error()) }
            })
            .await;

        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
    }
}
