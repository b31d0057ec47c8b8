//! Caller-side retry for scoped-access calls.
//!
//! The coordinator itself never retries. Callers that want another attempt
//! wrap the call in [`with_retry`], which backs off exponentially and only
//! retries failures that [`CoordinatorError::is_transient`] accepts.

use std::{future::Future, time::Duration};

use crate::error::CoordinatorError;

/// Default maximum number of retry attempts
const DEFAULT_MAX_RETRIES: u32 = 3;

/// Base delay in milliseconds for exponential backoff
const BASE_DELAY_MS: u64 = 50;

/// Maximum delay in milliseconds for exponential backoff
const MAX_DELAY_MS: u64 = 5000;

/// Backoff settings for [`with_retry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; `0` means a single attempt.
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay_ms: BASE_DELAY_MS,
            max_delay_ms: MAX_DELAY_MS,
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    #[must_use]
    pub const fn with_base_delay_ms(mut self, base_delay_ms: u64) -> Self {
        self.base_delay_ms = base_delay_ms;
        self
    }

    #[must_use]
    pub const fn with_max_delay_ms(mut self, max_delay_ms: u64) -> Self {
        self.max_delay_ms = max_delay_ms;
        self
    }

    /// Sleep before retry number `attempt` (zero-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2_u64.saturating_pow(attempt);
        let delay = self.base_delay_ms.saturating_mul(factor);
        Duration::from_millis(std::cmp::min(delay, self.max_delay_ms))
    }
}

/// Run `operation` until it succeeds, fails permanently, or runs out of retries.
///
/// # Errors
///
/// Returns the first non-transient error, or the last transient one once
/// `policy.max_retries` retries are spent.
pub async fn with_retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    mut operation: F,
) -> Result<T, CoordinatorError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CoordinatorError<E>>>,
{
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < policy.max_retries => {
                let delay = policy.delay_for(attempt);
                tracing::debug!(
                    kind = %err.kind(),
                    "Attempt {}/{} failed, retrying after {}ms",
                    attempt + 1,
                    policy.max_retries + 1,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
