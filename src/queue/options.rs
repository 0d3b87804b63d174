use crate::core::{SyncError, TaskQueueConfig};
use crate::retry::{RetryPolicy, RetryPredicate, retry_everything};
use std::fmt;
use std::sync::Arc;

/// Per-call options for [`crate::TaskQueue::enqueue`].
///
/// Unset values fall back to the queue's [`TaskQueueConfig`].
#[derive(Clone, Default)]
pub struct EnqueueOptions {
    pub priority: Option<i32>,
    pub max_retries: Option<u32>,
    pub initial_backoff_ms: Option<u64>,
    pub should_retry: Option<RetryPredicate>,
    pub coalesce_key: Option<String>,
}

impl EnqueueOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lower values run sooner
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn initial_backoff_ms(mut self, backoff_ms: u64) -> Self {
        self.initial_backoff_ms = Some(backoff_ms);
        self
    }

    /// Narrow the set of errors that are retried
    pub fn should_retry<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&SyncError) -> bool + Send + Sync + 'static,
    {
        self.should_retry = Some(Arc::new(predicate));
        self
    }

    /// Same as [`Self::should_retry`] for an already shared predicate
    pub fn retry_predicate(mut self, predicate: RetryPredicate) -> Self {
        self.should_retry = Some(predicate);
        self
    }

    /// Merge with any queued task carrying the same key
    pub fn coalesce_key(mut self, key: impl Into<String>) -> Self {
        self.coalesce_key = Some(key.into());
        self
    }

    pub(crate) fn resolve_priority(&self, config: &TaskQueueConfig) -> i32 {
        self.priority.unwrap_or(config.default_priority)
    }

    pub(crate) fn resolve_retry(&self, config: &TaskQueueConfig) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retries.unwrap_or(config.default_max_retries),
            self.initial_backoff_ms
                .unwrap_or(config.default_initial_backoff_ms),
        )
    }

    pub(crate) fn resolve_predicate(&self) -> RetryPredicate {
        self.should_retry.clone().unwrap_or_else(retry_everything)
    }
}

impl fmt::Debug for EnqueueOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnqueueOptions")
            .field("priority", &self.priority)
            .field("max_retries", &self.max_retries)
            .field("initial_backoff_ms", &self.initial_backoff_ms)
            .field("should_retry", &self.should_retry.is_some())
            .field("coalesce_key", &self.coalesce_key)
            .finish()
    }
}
