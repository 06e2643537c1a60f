//! Generic bounded-retry primitive.
//!
//! The same loop serves both transient-failure classes in the pipeline:
//! "block not yet finalized" during live block lookups (exponential
//! backoff) and lock/deadlock-class storage conflicts (linear backoff).
//! Call sites differ only in policy and retryable-error predicate.

use std::future::Future;
use std::time::Duration;

use crate::error::IndexerError;

/// Backoff schedule between attempts.
#[derive(Debug, Clone, Copy)]
pub enum Backoff {
    /// `step × attempt`: 1s, 2s, 3s…
    Linear(Duration),
    /// `base × 2^(attempt-1)`: 2s, 4s, 8s…
    Exponential(Duration),
}

/// A bounded retry policy: how many attempts, and how long to sleep
/// between them.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    /// Policy for "cannot query unfinalized data" block lookups.
    pub fn unfinalized_block(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Exponential(Duration::from_secs(2)),
        }
    }

    /// Policy for lock/deadlock-class storage conflicts.
    pub fn storage_conflict() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::Linear(Duration::from_secs(1)),
        }
    }

    /// Delay to sleep after the `attempt`-th failure (1-based), or `None`
    /// when the attempt budget is exhausted.
    pub fn delay_after(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_attempts {
            return None;
        }
        Some(match self.backoff {
            Backoff::Linear(step) => step * attempt,
            Backoff::Exponential(base) => base * 2u32.saturating_pow(attempt - 1),
        })
    }
}

/// Run `op` under `policy`, retrying only while `is_retryable` holds.
///
/// The final error — retryable but out of attempts, or not retryable at
/// all — is propagated to the caller.
pub async fn retry<T, F, Fut>(
    policy: RetryPolicy,
    is_retryable: fn(&IndexerError) -> bool,
    mut op: F,
) -> Result<T, IndexerError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, IndexerError>>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if is_retryable(&e) => match policy.delay_after(attempt) {
                Some(delay) => {
                    tracing::warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                None => return Err(e),
            },
            Err(e) => return Err(e),
        }
    }
}
