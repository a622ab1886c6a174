//! Backoff for transient remote failures.
//!
//! The executor uses [`RetryState`] to space out polls after transport
//! errors, and [`with_retry_if`] to resubmit one-shot calls (thread creation,
//! message posting, run creation) that failed transiently.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

/// Backoff strategy for retry delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// delay = base * 2^attempt
    #[default]
    Exponential,
    /// delay = base * (attempt + 1)
    Linear,
    /// delay = base
    Constant,
}

/// Jitter applied on top of the backoff delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterStrategy {
    /// No jitter.
    None,
    /// Random from 0 to delay.
    Full,
    /// Half fixed, half random.
    #[default]
    Equal,
}

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum attempts for one-shot calls, including the first.
    pub max_attempts: usize,
    /// Base delay between retries in milliseconds.
    pub base_delay_ms: u64,
    /// Maximum delay cap in milliseconds.
    pub max_delay_ms: u64,
    /// Backoff strategy.
    pub backoff_strategy: BackoffStrategy,
    /// Jitter strategy.
    pub jitter_strategy: JitterStrategy,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 5000,
            backoff_strategy: BackoffStrategy::Exponential,
            jitter_strategy: JitterStrategy::Equal,
        }
    }
}

impl RetryConfig {
    /// Creates a new retry config.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum attempts.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the base delay.
    #[must_use]
    pub fn with_base_delay_ms(mut self, delay: u64) -> Self {
        self.base_delay_ms = delay;
        self
    }

    /// Sets the maximum delay.
    #[must_use]
    pub fn with_max_delay_ms(mut self, delay: u64) -> Self {
        self.max_delay_ms = delay;
        self
    }

    /// Sets the backoff strategy.
    #[must_use]
    pub fn with_backoff(mut self, strategy: BackoffStrategy) -> Self {
        self.backoff_strategy = strategy;
        self
    }

    /// Sets the jitter strategy.
    #[must_use]
    pub fn with_jitter(mut self, strategy: JitterStrategy) -> Self {
        self.jitter_strategy = strategy;
        self
    }
}

/// Consecutive-failure counter for one retried operation.
#[derive(Debug, Default, Clone)]
pub struct RetryState {
    /// Number of consecutive failures so far.
    pub attempt: usize,
}

impl RetryState {
    /// Creates a new retry state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a failure and returns the delay before the next try.
    pub fn next_delay(&mut self, config: &RetryConfig) -> Duration {
        let delay = self.calculate_delay(config);
        self.attempt += 1;
        delay
    }

    /// Clears the failure streak after a success.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Calculates the delay for the current attempt.
    #[must_use]
    pub fn calculate_delay(&self, config: &RetryConfig) -> Duration {
        let base = config.base_delay_ms;
        let max = config.max_delay_ms;
        let attempt = u32::try_from(self.attempt).unwrap_or(u32::MAX);

        let delay = match config.backoff_strategy {
            BackoffStrategy::Exponential => base.saturating_mul(2u64.saturating_pow(attempt)),
            BackoffStrategy::Linear => base.saturating_mul(u64::from(attempt).saturating_add(1)),
            BackoffStrategy::Constant => base,
        }
        .min(max);

        let jittered = match config.jitter_strategy {
            JitterStrategy::None => delay,
            JitterStrategy::Full => {
                if delay == 0 {
                    0
                } else {
                    rand::thread_rng().gen_range(0..=delay)
                }
            }
            JitterStrategy::Equal => {
                let half = delay / 2;
                if half == 0 {
                    delay
                } else {
                    half + rand::thread_rng().gen_range(0..=half)
                }
            }
        };

        Duration::from_millis(jittered)
    }

    /// Returns true if one-shot retries are exhausted.
    #[must_use]
    pub fn is_exhausted(&self, config: &RetryConfig) -> bool {
        self.attempt + 1 >= config.max_attempts
    }
}

/// Runs `operation` until it succeeds, `retryable` rejects the error, or
/// `config.max_attempts` calls were made.
pub async fn with_retry_if<T, E, F, Fut, P>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
    retryable: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let mut state = RetryState::new();

    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if retryable(&e) && !state.is_exhausted(config) => {
                let delay = state.next_delay(config);
                tracing::warn!(
                    operation = operation_name,
                    attempt = state.attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %e,
                    "Transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn no_jitter(base: u64) -> RetryConfig {
        RetryConfig::new()
            .with_base_delay_ms(base)
            .with_max_delay_ms(5000)
            .with_jitter(JitterStrategy::None)
    }

    #[test]
    fn test_retry_config_default() {
        let config = RetryConfig::default();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.base_delay_ms, 1000);
        assert_eq!(config.max_delay_ms, 5000);
        assert_eq!(config.jitter_strategy, JitterStrategy::Equal);
    }

    #[test]
    fn test_exponential_delay_is_capped() {
        let config = no_jitter(1000);
        let mut state = RetryState::new();

        let delays: Vec<u128> = (0..5).map(|_| state.next_delay(&config).as_millis()).collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 5000, 5000]);
        assert_eq!(state.attempt, 5);

        state.reset();
        assert_eq!(state.calculate_delay(&config), Duration::from_millis(1000));
    }

    #[test]
    fn test_linear_and_constant_delays() {
        let linear = no_jitter(100).with_backoff(BackoffStrategy::Linear);
        let constant = no_jitter(100).with_backoff(BackoffStrategy::Constant);
        let state = RetryState { attempt: 2 };

        assert_eq!(state.calculate_delay(&linear), Duration::from_millis(300));
        assert_eq!(state.calculate_delay(&constant), Duration::from_millis(100));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let full = no_jitter(100).with_jitter(JitterStrategy::Full);
        let equal = no_jitter(100).with_jitter(JitterStrategy::Equal);
        let state = RetryState::new();

        for _ in 0..20 {
            assert!(state.calculate_delay(&full) <= Duration::from_millis(100));
            let d = state.calculate_delay(&equal);
            assert!(d >= Duration::from_millis(50) && d <= Duration::from_millis(100));
        }
    }

    #[test]
    fn test_retry_config_deserializes_snake_case() {
        let config: RetryConfig = serde_json::from_str(
            r#"{"backoff_strategy": "linear", "jitter_strategy": "none", "max_attempts": 5}"#,
        )
        .unwrap();
        assert_eq!(config.backoff_strategy, BackoffStrategy::Linear);
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.base_delay_ms, 1000);
    }

    #[tokio::test]
    async fn test_with_retry_if_success_after_failures() {
        let config = no_jitter(1).with_max_attempts(5);
        let calls = Arc::new(AtomicUsize::new(0));

        let result: Result<i32, String> = with_retry_if(
            &config,
            "test",
            || {
                let calls = calls.clone();
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    if n < 3 {
                        Err(format!("attempt {n}"))
                    } else {
                        Ok(42)
                    }
                }
            },
            |_| true,
        )
        .await;

        assert_eq!(result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_with_retry_if_stops_at_max_attempts() {
        let config = no_jitter(1).with_max_attempts(3);
        let calls = Arc::new(AtomicUsize::new(0));

        let result: Result<i32, String> = with_retry_if(
            &config,
            "test",
            || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err("always fails".to_string())
                }
            },
            |_| true,
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_with_retry_if_skips_permanent_errors() {
        let config = no_jitter(1).with_max_attempts(5);
        let calls = Arc::new(AtomicUsize::new(0));

        let result: Result<i32, String> = with_retry_if(
            &config,
            "test",
            || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err("bad request".to_string())
                }
            },
            |e| e.contains("timeout"),
        )
        .await;

        assert_eq!(result, Err("bad request".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
