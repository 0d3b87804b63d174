use super::options::EnqueueOptions;
use super::task::{QueuedTask, TaskPhase, TaskValue, TaskWork};
use crate::core::{Result, SyncError, TaskQueueConfig};
use futures::FutureExt;
use futures::future::join_all;
use lazy_static::lazy_static;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::{Instant, sleep};
use tracing::{Level, event};

lazy_static! {
    /// The app-wide queue used when no queue is injected explicitly.
    static ref GLOBAL_QUEUE: TaskQueue = TaskQueue::new(TaskQueueConfig::default());
}

/// Snapshot of one key's queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Tasks waiting for a slot
    pub pending: usize,
    /// Tasks currently executing (including backoff sleeps)
    pub active: usize,
}

impl QueueStats {
    pub fn is_idle(&self) -> bool {
        self.pending == 0 && self.active == 0
    }
}

#[derive(Default)]
struct KeyQueue {
    pending: Vec<QueuedTask>,
    active: usize,
}

impl KeyQueue {
    /// Ascending priority, arrival order among equals.
    ///
    /// Task ids grow with arrival, so a coalesced task re-inserted here keeps
    /// its place among tasks of equal priority.
    fn insert(&mut self, task: QueuedTask) {
        let rank = (task.priority, task.id);
        let position = self
            .pending
            .iter()
            .position(|queued| (queued.priority, queued.id) > rank)
            .unwrap_or(self.pending.len());
        self.pending.insert(position, task);
    }

    fn coalesce_position(&self, coalesce_key: &str) -> Option<usize> {
        self.pending
            .iter()
            .position(|queued| queued.coalesce_key.as_deref() == Some(coalesce_key))
    }
}

struct QueueInner {
    config: TaskQueueConfig,
    queues: Mutex<HashMap<String, KeyQueue>>,
    next_task_id: AtomicU64,
}

/// Keyed background queue for persistence work.
///
/// Cloning is cheap and yields a handle to the same queue.
///
/// # Examples
///
/// ```
/// use sheetsync::{EnqueueOptions, TaskQueue, TaskQueueConfig};
///
/// # tokio_test::block_on(async {
/// let queue = TaskQueue::new(TaskQueueConfig::default());
/// let value = queue
///     .enqueue("character-1", || async { Ok(41 + 1) }, EnqueueOptions::new())
///     .await
///     .unwrap();
/// assert_eq!(value, 42);
/// # });
/// ```
#[derive(Clone)]
pub struct TaskQueue {
    inner: Arc<QueueInner>,
}

impl TaskQueue {
    pub fn new(config: TaskQueueConfig) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                config,
                queues: Mutex::new(HashMap::new()),
                next_task_id: AtomicU64::new(1),
            }),
        }
    }

    /// The single process-wide queue.
    ///
    /// Components that are not handed a queue submit here, so per-key
    /// concurrency limits hold across the whole application.
    pub fn global() -> &'static TaskQueue {
        &GLOBAL_QUEUE
    }

    pub fn config(&self) -> &TaskQueueConfig {
        &self.inner.config
    }

    /// Submit `work` under `key`.
    ///
    /// Registration happens immediately; the returned future only waits for
    /// the outcome. If a task with the same coalesce key is still queued under
    /// `key`, no new task is created: the queued task adopts `work` and the
    /// caller shares its result.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn enqueue<T, F, Fut>(
        &self,
        key: impl Into<String>,
        work: F,
        options: EnqueueOptions,
    ) -> impl Future<Output = Result<T>> + Send + 'static
    where
        T: Clone + Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let key = key.into();
        let work: TaskWork = Arc::new(move || {
            let future = work();
            async move { future.await.map(|value| Arc::new(value) as TaskValue) }.boxed()
        });
        let priority = options.resolve_priority(&self.inner.config);
        let (tx, rx) = oneshot::channel();

        let task_id = {
            let mut queues = self.lock_queues();
            let queue = queues.entry(key.clone()).or_default();

            let coalesced = options
                .coalesce_key
                .as_deref()
                .and_then(|coalesce_key| queue.coalesce_position(coalesce_key));

            match coalesced {
                Some(position) => {
                    let mut existing = queue.pending.remove(position);
                    existing.absorb(work, priority, tx);
                    let task_id = existing.id;
                    event!(
                        Level::DEBUG,
                        key = %key,
                        task_id,
                        waiters = existing.waiters.len(),
                        "task coalesced"
                    );
                    queue.insert(existing);
                    task_id
                }
                None => {
                    let task_id = self.inner.next_task_id.fetch_add(1, Ordering::Relaxed);
                    queue.insert(QueuedTask {
                        id: task_id,
                        work,
                        priority,
                        retry: options.resolve_retry(&self.inner.config),
                        should_retry: options.resolve_predicate(),
                        coalesce_key: options.coalesce_key.clone(),
                        waiters: vec![tx],
                        phase: TaskPhase::Queued,
                    });
                    event!(Level::DEBUG, key = %key, task_id, priority, "task enqueued");
                    task_id
                }
            }
        };

        self.pump(&key);

        async move {
            let value = rx.await.map_err(|_| {
                SyncError::Cancelled(format!("task {} dropped before completion", task_id))
            })??;
            value.downcast_ref::<T>().cloned().ok_or_else(|| {
                SyncError::Internal(format!(
                    "task {} produced an output of an unexpected type",
                    task_id
                ))
            })
        }
    }

    /// Pending and active counts for `key`.
    pub fn stats(&self, key: &str) -> QueueStats {
        self.lock_queues()
            .get(key)
            .map(|queue| QueueStats {
                pending: queue.pending.len(),
                active: queue.active,
            })
            .unwrap_or_default()
    }

    /// Keys that currently have queued or running work.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.lock_queues().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Waits until `key` has nothing queued and nothing running.
    ///
    /// Best-effort: returns `false` once `timeout` elapses, leaving in-flight
    /// work untouched.
    pub async fn flush(&self, key: &str, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let poll = self.inner.config.drain_poll_interval();
        loop {
            if self.stats(key).is_idle() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                let stats = self.stats(key);
                event!(
                    Level::WARN,
                    key,
                    pending = stats.pending,
                    active = stats.active,
                    "queue flush timed out"
                );
                return false;
            }
            sleep(poll.min(deadline - now)).await;
        }
    }

    /// Drains every known key concurrently; `true` only if all drained.
    pub async fn flush_all(&self, timeout: Duration) -> bool {
        let keys = self.keys();
        let results = join_all(keys.iter().map(|key| self.flush(key, timeout))).await;
        results.into_iter().all(|drained| drained)
    }

    /// Starts queued tasks for `key` while slots are free.
    fn pump(&self, key: &str) {
        let mut queues = self.lock_queues();
        let Some(queue) = queues.get_mut(key) else {
            return;
        };

        while queue.active < self.inner.config.concurrency_per_key && !queue.pending.is_empty() {
            let task = queue.pending.remove(0);
            queue.active += 1;
            event!(
                Level::DEBUG,
                key,
                task_id = task.id,
                active = queue.active,
                "task dequeued"
            );

            let handle = self.clone();
            let key = key.to_string();
            tokio::spawn(async move {
                task.run_to_completion(&key).await;
                handle.finish(&key);
            });
        }

        if queue.active == 0 && queue.pending.is_empty() {
            queues.remove(key);
        }
    }

    fn finish(&self, key: &str) {
        {
            let mut queues = self.lock_queues();
            if let Some(queue) = queues.get_mut(key) {
                queue.active = queue.active.saturating_sub(1);
            }
        }
        self.pump(key);
    }

    fn lock_queues(&self) -> MutexGuard<'_, HashMap<String, KeyQueue>> {
        // No critical section panics mid-update; a poisoned map is still consistent.
        self.inner
            .queues
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
