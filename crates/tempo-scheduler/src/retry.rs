//! Retry policy engine.
//!
//! Decides whether a just-failed execution is retried and how long to wait
//! first. Backoff is exponential from a 1 second base with no cap and no
//! jitter: 2s before the first retry, 4s before the second, and so on.

use tokio::time::Duration;

/// Base backoff delay in milliseconds.
pub const BACKOFF_BASE_MS: u64 = 1_000;

/// Retry policy for one attempt sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of retries after the initial attempt.
    pub limit: u32,
}

/// Outcome of a failed execution, per the policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after waiting out the backoff delay.
    Retry { delay: Duration },
    /// Retries exhausted; surface the failure.
    Exhausted,
}

impl RetryPolicy {
    /// Create a policy allowing `limit` retries.
    pub fn new(limit: u32) -> Self {
        Self { limit }
    }

    /// Record a failed execution.
    ///
    /// While `attempts < limit`, increments the counter and returns the
    /// backoff delay for the next attempt. `attempts` counts failed runs
    /// so far and only ever grows.
    pub fn on_failure(&self, attempts: &mut u32) -> RetryDecision {
        if *attempts < self.limit {
            *attempts += 1;
            RetryDecision::Retry {
                delay: backoff_delay(*attempts),
            }
        } else {
            RetryDecision::Exhausted
        }
    }
}

/// Backoff delay before retry number `attempt`: `1000ms * 2^attempt`.
///
/// Growth is unbounded by policy; saturating arithmetic only guards the
/// u64 edge, far beyond any practical retry count.
pub fn backoff_delay(attempt: u32) -> Duration {
    let factor = 2u64.saturating_pow(attempt);
    Duration::from_millis(BACKOFF_BASE_MS.saturating_mul(factor))
}
