// ============================================================================
// Retry Policy
// ============================================================================
//
// Exponential backoff with additive jitter, plus the retryability predicate
// consulted by the task queue between attempts. Everything here is pure.
//
// ============================================================================

use crate::core::SyncError;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

/// Upper bound on the random component added to every backoff.
pub const MAX_JITTER_MS: u64 = 500;

/// Decides whether a failed attempt may be retried.
pub type RetryPredicate = Arc<dyn Fn(&SyncError) -> bool + Send + Sync>;

/// Predicate used when the caller does not supply one.
pub fn retry_everything() -> RetryPredicate {
    Arc::new(|_: &SyncError| true)
}

/// Predicate that only retries transient store failures.
pub fn retry_transient() -> RetryPredicate {
    Arc::new(SyncError::is_retryable)
}

/// Deterministic part of the delay: `initial * 2^(attempt-1)`.
pub fn backoff_ms(attempt: u32, initial_backoff_ms: u64) -> u64 {
    let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
    initial_backoff_ms.saturating_mul(factor)
}

/// Delay before the attempt following `attempt` (1-based).
///
/// `initial * 2^(attempt-1) + uniform[0, min(500, backoff))`
pub fn next_delay(attempt: u32, initial_backoff_ms: u64) -> Duration {
    delay_with_jitter(attempt, initial_backoff_ms, MAX_JITTER_MS)
}

fn delay_with_jitter(attempt: u32, initial_backoff_ms: u64, max_jitter_ms: u64) -> Duration {
    let backoff = backoff_ms(attempt, initial_backoff_ms);
    let jitter_cap = backoff.min(max_jitter_ms);
    let jitter = if jitter_cap == 0 {
        0
    } else {
        rand::rng().random_range(0..jitter_cap)
    };
    Duration::from_millis(backoff.saturating_add(jitter))
}

/// Runs a predicate, treating a panic inside it as "do not retry".
pub fn evaluate_predicate(predicate: &RetryPredicate, err: &SyncError) -> bool {
    catch_unwind(AssertUnwindSafe(|| predicate(err))).unwrap_or(false)
}

/// Retry budget and backoff parameters for one task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry, before jitter.
    pub initial_backoff_ms: u64,
    /// Cap on the jitter component.
    pub max_jitter_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 500,
            max_jitter_ms: MAX_JITTER_MS,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, initial_backoff_ms: u64) -> Self {
        Self {
            max_retries,
            initial_backoff_ms,
            max_jitter_ms: MAX_JITTER_MS,
        }
    }

    /// Whether another attempt may follow the failed `attempt` (1-based).
    pub fn allows_retry(&self, attempt: u32) -> bool {
        attempt <= self.max_retries
    }

    pub fn next_delay(&self, attempt: u32) -> Duration {
        delay_with_jitter(attempt, self.initial_backoff_ms, self.max_jitter_ms)
    }
}
