//! Bounded exponential backoff for transient provider faults.

use std::future::Future;
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use tokio::time::{Instant, timeout_at};
use tracing::warn;

use crate::provider::ProviderError;
use crate::telemetry::RunLog;

/// Default number of attempts, including the first call.
pub const DEFAULT_MAX_ATTEMPTS: usize = 5;
/// Default delay before the first retry.
pub const DEFAULT_MIN_DELAY: Duration = Duration::from_millis(500);
/// Default ceiling for a single backoff delay.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(10);

/// Retry budget applied to every provider call.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first; zero behaves like one.
    pub max_attempts: usize,
    /// Delay before the first retry; doubles on each further retry.
    pub min_delay: Duration,
    /// Upper bound for a single delay.
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Policy that performs a single attempt.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            max_attempts: 1,
            min_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    fn backoff(&self, attempts: usize) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(self.max_delay)
            .with_factor(2.0)
            .with_jitter()
            .with_max_times(attempts.min(self.max_attempts).saturating_sub(1))
    }

    /// Runs `call`, retrying throttling and connectivity faults until the
    /// budget is spent. Other faults are returned immediately.
    ///
    /// # Errors
    ///
    /// Returns the last [`ProviderError`] once retries are exhausted or a
    /// non-retryable fault occurs.
    pub async fn run<T, F, Fut>(
        &self,
        log: &RunLog,
        operation: &str,
        call: F,
    ) -> Result<T, ProviderError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        Self::retry_with(self.backoff(self.max_attempts), log, operation, call).await
    }

    /// Runs `call` like [`RetryPolicy::run`], but makes at most `max_calls`
    /// attempts and never backs off past `until`.
    ///
    /// Returns `None` when `until` passes while a call is still in flight.
    pub async fn run_until<T, F, Fut>(
        &self,
        log: &RunLog,
        operation: &str,
        until: Instant,
        max_calls: usize,
        call: F,
    ) -> Option<Result<T, ProviderError>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let remaining = until.saturating_duration_since(Instant::now());
        let backoff = self
            .backoff(max_calls.max(1))
            .with_total_delay(Some(remaining));
        timeout_at(until, Self::retry_with(backoff, log, operation, call))
            .await
            .ok()
    }

    async fn retry_with<T, F, Fut>(
        backoff: ExponentialBuilder,
        log: &RunLog,
        operation: &str,
        call: F,
    ) -> Result<T, ProviderError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        call.retry(backoff)
            .sleep(tokio::time::sleep)
            .when(ProviderError::is_retryable)
            .notify(|err: &ProviderError, delay: Duration| {
                warn!(
                    parent: log.span(),
                    operation,
                    error_kind = err.kind(),
                    error = %err,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "transient provider fault, backing off"
                );
            })
            .await
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            min_delay: DEFAULT_MIN_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}
