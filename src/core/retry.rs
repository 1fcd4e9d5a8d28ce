// ! Retry logic for HTTP exchanges
// !
// ! Module provides the backoff policy used by the HTTP transports to
// ! retransmit POSTs and polls while their transport is still open:
// ! - retry decisions based on error recoverability
// ! - exponential backoff with jitter
// ! - logging and metrics integration

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

use crate::core::error::{VibeError, VibeResult};
use crate::core::logging::{ErrorContext, ErrorLogger};

/// Retry policy configuration
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of attempts, `None` retries for as long as the caller allows
    pub max_attempts: Option<u32>,
    /// Initial retry delay in milliseconds
    pub initial_delay_ms: u64,
    /// Maximum retry delay in milliseconds
    pub max_delay_ms: u64,
    /// Exponential backoff multiplier
    pub backoff_multiplier: f64,
    /// Whether to add random jitter to delays
    pub enable_jitter: bool,
    /// Maximum jitter factor (0.0 to 1.0)
    pub jitter_factor: f64,
    /// Whether to respect error recoverability
    pub respect_recoverability: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: Some(8),
            initial_delay_ms: 100,
            max_delay_ms: 5_000,
            backoff_multiplier: 2.0,
            enable_jitter: true,
            jitter_factor: 0.1,
            respect_recoverability: true,
        }
    }
}

impl RetryConfig {
    /// Retry until the guarding condition turns false
    pub fn unbounded() -> Self {
        Self {
            max_attempts: None,
            ..Self::default()
        }
    }

    /// Never retry
    pub fn disabled() -> Self {
        Self {
            max_attempts: Some(1),
            ..Self::default()
        }
    }
}

/// Retry policy with error-based decisions
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    /// Create a new retry policy
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Execute `operation` until it succeeds, the error is final, or `keep_going` turns false.
    ///
    /// `keep_going` is checked before every retry so that an exchange belonging to a
    /// transport that has since closed is abandoned instead of retransmitted.
    pub async fn execute_while<F, Fut, T, C>(
        &self,
        mut operation: F,
        mut keep_going: C,
        context: ErrorContext,
    ) -> VibeResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = VibeResult<T>>,
        C: FnMut() -> bool,
    {
        let mut attempt: u32 = 0;

        loop {
            attempt = attempt.saturating_add(1);

            match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        ErrorLogger::log_retry_success(attempt, &context);
                    }
                    return Ok(value);
                }
                Err(error) => {
                    let should_retry = self.should_retry(&error, attempt) && keep_going();

                    ErrorLogger::log_retry_attempt(
                        &error,
                        attempt,
                        self.config.max_attempts,
                        should_retry,
                        &context,
                    );

                    if !should_retry {
                        return Err(error);
                    }

                    let delay = self.calculate_delay(attempt);
                    debug!(
                        "Retrying {} in {:?} (attempt {})",
                        context.operation, delay, attempt
                    );
                    sleep(delay).await;

                    if !keep_going() {
                        return Err(VibeError::Cancelled(format!(
                            "{} abandoned after {} attempts",
                            context.operation, attempt
                        )));
                    }
                }
            }
        }
    }

    /// Determine if an error should trigger a retry
    fn should_retry(&self, error: &VibeError, attempt: u32) -> bool {
        if let Some(max) = self.config.max_attempts {
            if attempt >= max {
                return false;
            }
        }

        if self.config.respect_recoverability && !error.is_recoverable() {
            debug!(
                "Not retrying non-recoverable error: {} (category: {})",
                error,
                error.category()
            );
            return false;
        }

        true
    }

    /// Calculate retry delay with exponential backoff and jitter
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let base_delay =
            self.config.initial_delay_ms as f64 * self.config.backoff_multiplier.powi(exponent);

        let capped_delay = base_delay.min(self.config.max_delay_ms as f64);

        let final_delay = if self.config.enable_jitter {
            #[cfg(feature = "fastrand")]
            {
                let jitter_range = capped_delay * self.config.jitter_factor;
                let jitter = (fastrand::f64() - 0.5) * 2.0 * jitter_range;
                (capped_delay + jitter).max(0.0)
            }
            #[cfg(not(feature = "fastrand"))]
            {
                capped_delay
            }
        } else {
            capped_delay
        };

        Duration::from_millis(final_delay as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_config(max_attempts: Option<u32>) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_delay_ms: 1,
            max_delay_ms: 5,
            enable_jitter: false,
            ..RetryConfig::default()
        }
    }

    #[tokio::test]
    async fn test_success_on_first_attempt() {
        let policy = RetryPolicy::new(RetryConfig::default());
        let result = policy
            .execute_while(
                || async { Ok::<_, VibeError>(42) },
                || true,
                ErrorContext::new("test"),
            )
            .await;

        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failures() {
        let policy = RetryPolicy::new(fast_config(Some(5)));
        let attempts = Arc::new(AtomicU32::new(0));

        let counter = attempts.clone();
        let result = policy
            .execute_while(
                move || {
                    let counter = counter.clone();
                    async move {
                        if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                            Err(VibeError::TransportSendFailure("reset".into()))
                        } else {
                            Ok("sent")
                        }
                    }
                },
                || true,
                ErrorContext::new("post"),
            )
            .await;

        assert_eq!(result.unwrap(), "sent");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_recoverable_error_is_final() {
        let policy = RetryPolicy::new(fast_config(None));
        let attempts = AtomicU32::new(0);

        let result: VibeResult<()> = policy
            .execute_while(
                || {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    async { Err(VibeError::malformed("garbage")) }
                },
                || true,
                ErrorContext::new("poll"),
            )
            .await;

        assert!(matches!(result, Err(VibeError::MalformedFrame(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stops_when_guard_turns_false() {
        let policy = RetryPolicy::new(fast_config(None));
        let attempts = AtomicU32::new(0);

        let result: VibeResult<()> = policy
            .execute_while(
                || {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    async { Err(VibeError::connection("refused")) }
                },
                || attempts.load(Ordering::SeqCst) < 3,
                ErrorContext::new("post"),
            )
            .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_delay_is_capped() {
        let policy = RetryPolicy::new(RetryConfig {
            enable_jitter: false,
            ..RetryConfig::default()
        });

        assert_eq!(policy.calculate_delay(1), Duration::from_millis(100));
        assert_eq!(policy.calculate_delay(2), Duration::from_millis(200));
        assert_eq!(policy.calculate_delay(30), Duration::from_millis(5_000));
    }
}
