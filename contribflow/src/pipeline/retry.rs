//! Bounded retry with backoff for transient collaborator failures.
//!
//! Stages never retry business errors themselves. The store and GitHub
//! decorators wrap their calls in [`with_retry_if`] so only errors classified
//! as transient are retried, and only a bounded number of times.

use rand::Rng;
use serde::{Deserialize, Serialize};
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

/// Jitter strategy to spread out simultaneous retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterStrategy {
    /// No jitter
    None,
    /// Random from 0 to delay
    #[default]
    Full,
    /// Half fixed, half random
    Equal,
}

/// Configuration for retry behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries allowed after the first attempt.
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
            base_delay_ms: 500,
            max_delay_ms: 30_000,
            backoff_strategy: BackoffStrategy::Exponential,
            jitter_strategy: JitterStrategy::Full,
        }
    }
}

impl RetryConfig {
    /// Creates a new retry config.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A config that never retries.
    #[must_use]
    pub fn none() -> Self {
        Self::default().with_max_attempts(0)
    }

    /// Sets the maximum retries.
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

/// Retry bookkeeping for one operation.
#[derive(Debug, Default)]
pub struct RetryState {
    /// Retries performed so far.
    pub attempt: usize,
}

impl RetryState {
    /// Creates a new retry state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if no retries remain.
    #[must_use]
    pub fn is_exhausted(&self, config: &RetryConfig) -> bool {
        self.attempt >= config.max_attempts
    }

    /// Calculates the delay before the next retry.
    #[must_use]
    pub fn next_delay(&self, config: &RetryConfig) -> Duration {
        let base = config.base_delay_ms;
        let exponent = u32::try_from(self.attempt).unwrap_or(u32::MAX);
        let attempt = u64::try_from(self.attempt).unwrap_or(u64::MAX);

        let delay = match config.backoff_strategy {
            BackoffStrategy::Exponential => base.saturating_mul(2u64.saturating_pow(exponent)),
            BackoffStrategy::Linear => base.saturating_mul(attempt.saturating_add(1)),
            BackoffStrategy::Constant => base,
        }
        .min(config.max_delay_ms);

        let jittered = match config.jitter_strategy {
            JitterStrategy::None => delay,
            JitterStrategy::Full if delay > 0 => rand::thread_rng().gen_range(0..=delay),
            JitterStrategy::Equal if delay > 1 => {
                let half = delay / 2;
                half + rand::thread_rng().gen_range(0..=half)
            }
            JitterStrategy::Full | JitterStrategy::Equal => delay,
        };

        Duration::from_millis(jittered)
    }
}

/// Outcome of a retry decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the specified delay.
    Retry(Duration),
    /// No more retries, give up.
    GiveUp,
    /// Don't retry, the error is not retryable.
    NotRetryable,
}

/// Decides whether to retry and advances the state if so.
#[must_use]
pub fn should_retry(state: &mut RetryState, config: &RetryConfig, retryable: bool) -> RetryDecision {
    if !retryable {
        return RetryDecision::NotRetryable;
    }
    if state.is_exhausted(config) {
        return RetryDecision::GiveUp;
    }
    let delay = state.next_delay(config);
    state.attempt += 1;
    RetryDecision::Retry(delay)
}

/// Executes an operation, retrying every error.
pub async fn with_retry<T, E, F, Fut>(config: &RetryConfig, operation_name: &str, operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    with_retry_if(config, operation_name, operation, |_| true).await
}

/// Executes an operation, retrying only errors for which `is_retryable` holds.
pub async fn with_retry_if<T, E, F, Fut, P>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
    is_retryable: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut state = RetryState::new();

    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => match should_retry(&mut state, config, is_retryable(&e)) {
                RetryDecision::Retry(delay) => {
                    tracing::debug!(
                        operation = operation_name,
                        attempt = state.attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %e,
                        "Retrying after transient error"
                    );
                    tokio::time::sleep(delay).await;
                }
                RetryDecision::GiveUp => {
                    tracing::warn!(
                        operation = operation_name,
                        attempts = state.attempt + 1,
                        error = %e,
                        "Retries exhausted"
                    );
                    return Err(e);
                }
                RetryDecision::NotRetryable => return Err(e),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn fast(attempts: usize) -> RetryConfig {
        RetryConfig::new()
            .with_max_attempts(attempts)
            .with_base_delay_ms(1)
            .with_jitter(JitterStrategy::None)
    }

    #[test]
    fn test_exponential_delays_capped() {
        let config = RetryConfig::new()
            .with_base_delay_ms(100)
            .with_max_delay_ms(350)
            .with_jitter(JitterStrategy::None);
        let mut state = RetryState::new();

        assert_eq!(state.next_delay(&config), Duration::from_millis(100));
        state.attempt = 1;
        assert_eq!(state.next_delay(&config), Duration::from_millis(200));
        state.attempt = 2;
        assert_eq!(state.next_delay(&config), Duration::from_millis(350));
    }

    #[test]
    fn test_linear_and_constant_delays() {
        let linear = RetryConfig::new()
            .with_base_delay_ms(10)
            .with_backoff(BackoffStrategy::Linear)
            .with_jitter(JitterStrategy::None);
        let constant = linear.clone().with_backoff(BackoffStrategy::Constant);
        let state = RetryState { attempt: 2 };

        assert_eq!(state.next_delay(&linear), Duration::from_millis(30));
        assert_eq!(state.next_delay(&constant), Duration::from_millis(10));
    }

    #[test]
    fn test_full_jitter_stays_below_delay() {
        let config = RetryConfig::new()
            .with_base_delay_ms(100)
            .with_backoff(BackoffStrategy::Constant);
        let state = RetryState::new();
        for _ in 0..20 {
            assert!(state.next_delay(&config) <= Duration::from_millis(100));
        }
    }

    #[test]
    fn test_should_retry_decisions() {
        let config = fast(2);
        let mut state = RetryState::new();

        assert_eq!(should_retry(&mut state, &config, false), RetryDecision::NotRetryable);
        assert!(matches!(should_retry(&mut state, &config, true), RetryDecision::Retry(_)));
        assert!(matches!(should_retry(&mut state, &config, true), RetryDecision::Retry(_)));
        assert_eq!(should_retry(&mut state, &config, true), RetryDecision::GiveUp);
    }

    #[tokio::test]
    async fn test_with_retry_recovers() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let result: Result<u32, String> = with_retry(&fast(5), "flaky", || {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n < 3 {
                    Err(format!("attempt {n}"))
                } else {
                    Ok(7)
                }
            }
        })
        .await;

        assert_eq!(result, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_with_retry_is_bounded() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let result: Result<(), String> = with_retry(&fast(2), "down", || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err("still down".to_string()) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_with_retry_if_skips_permanent_errors() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let result: Result<(), String> = with_retry_if(
            &fast(5),
            "auth",
            || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err("unauthorized".to_string()) }
            },
            |e| e.contains("timeout"),
        )
        .await;

        assert_eq!(result, Err("unauthorized".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
