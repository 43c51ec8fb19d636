//! Bounded exponential backoff for remote calls.

use std::future::Future;
use std::time::Duration;

use rand::Rng as _;

use crate::error::{HubError, Result};

/// Retry decision returned by the error classifier callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryAction {
    Retry,
    Abort,
}

/// Exponential backoff configuration with jitter.
///
/// `max_attempts` counts the first try, so `3` means one call plus at most two
/// retries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// A policy that never sleeps. Used by tests and by mock-backed runs.
    #[must_use]
    pub const fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Compute the delay for a given retry (0-indexed).
    ///
    /// Formula: `min(base * 2^retry, max) + jitter(0..base/2)`, never above `max`.
    #[must_use]
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let base_ms = u64::try_from(self.base_delay.as_millis()).unwrap_or(u64::MAX);
        let max_ms = u64::try_from(self.max_delay.as_millis()).unwrap_or(u64::MAX);
        let exp_ms = base_ms.saturating_mul(1u64.checked_shl(retry).unwrap_or(u64::MAX));
        let capped = exp_ms.min(max_ms);
        let jitter = if base_ms >= 2 {
            rand::thread_rng().gen_range(0..base_ms / 2)
        } else {
            0
        };
        Duration::from_millis(capped.saturating_add(jitter).min(max_ms))
    }

    /// Delay before the next attempt, honouring a server hint when present.
    #[must_use]
    pub fn delay_after(&self, retry: u32, err: &HubError) -> Duration {
        err.retry_after()
            .map_or_else(|| self.delay_for_retry(retry), |hint| hint.min(self.max_delay))
    }
}

/// Default classifier: retry transient remote failures, abort on everything else.
#[must_use]
pub const fn classify(err: &HubError) -> RetryAction {
    if err.is_retryable() {
        RetryAction::Retry
    } else {
        RetryAction::Abort
    }
}

/// Retry an async operation with exponential backoff and jitter.
///
/// The operation receives the 0-indexed attempt number. Returns the first
/// `Ok`, the first error the classifier aborts on, or the last error once the
/// attempt budget is spent.
pub async fn retry_with_backoff<F, Fut, T, C>(
    policy: &RetryPolicy,
    classifier: C,
    mut operation: F,
) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
    C: Fn(&HubError) -> RetryAction,
{
    let total_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        match operation(attempt).await {
            Ok(val) => return Ok(val),
            Err(e) => {
                if classifier(&e) == RetryAction::Abort || attempt + 1 >= total_attempts {
                    return Err(e);
                }
                let delay = policy.delay_after(attempt, &e);
                tracing::warn!(
                    attempt = attempt + 1,
                    total_attempts,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %e,
                    "Retryable error, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
