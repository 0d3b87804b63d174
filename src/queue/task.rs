use crate::core::{Result, SyncError};
use crate::retry::{RetryPolicy, RetryPredicate, evaluate_predicate};
use futures::FutureExt;
use futures::future::BoxFuture;
use std::any::Any;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::sleep;
use tracing::{Level, event};

/// Type-erased task output, shared by every waiter of a task.
pub(crate) type TaskValue = Arc<dyn Any + Send + Sync>;
pub(crate) type TaskOutcome = Result<TaskValue>;
pub(crate) type TaskWork = Arc<dyn Fn() -> BoxFuture<'static, TaskOutcome> + Send + Sync>;
pub(crate) type TaskWaiter = oneshot::Sender<TaskOutcome>;

/// Lifecycle of one physical task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskPhase {
    Queued,
    Running { attempt: u32 },
    Retrying { attempt: u32, delay: Duration },
    Succeeded { attempts: u32 },
    Failed { attempts: u32 },
}

impl TaskPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded { .. } | Self::Failed { .. })
    }
}

impl fmt::Display for TaskPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Queued => write!(f, "queued"),
            Self::Running { attempt } => write!(f, "running(attempt={attempt})"),
            Self::Retrying { attempt, delay } => {
                write!(f, "retrying(attempt={attempt}, delay={}ms)", delay.as_millis())
            }
            Self::Succeeded { attempts } => write!(f, "succeeded(attempts={attempts})"),
            Self::Failed { attempts } => write!(f, "failed(attempts={attempts})"),
        }
    }
}

/// A task waiting for a concurrency slot (or running, once dequeued).
pub(crate) struct QueuedTask {
    pub id: u64,
    pub work: TaskWork,
    pub priority: i32,
    pub retry: RetryPolicy,
    pub should_retry: RetryPredicate,
    pub coalesce_key: Option<String>,
    pub waiters: Vec<TaskWaiter>,
    pub phase: TaskPhase,
}

impl QueuedTask {
    /// Folds a duplicate intent into this queued task: the newest work wins and
    /// the more urgent priority is kept.
    pub fn absorb(&mut self, work: TaskWork, priority: i32, waiter: TaskWaiter) {
        self.work = work;
        self.priority = self.priority.min(priority);
        self.waiters.push(waiter);
    }

    /// Runs the work until it succeeds or the retry policy gives up, then
    /// resolves every waiter with the same outcome.
    pub async fn run_to_completion(mut self, key: &str) {
        let outcome = self.run_with_retries(key).await;
        for waiter in self.waiters.drain(..) {
            // A dropped receiver only means that caller stopped listening.
            let _ = waiter.send(outcome.clone());
        }
    }

    async fn run_with_retries(&mut self, key: &str) -> TaskOutcome {
        let mut attempt = 1;
        loop {
            self.phase = TaskPhase::Running { attempt };
            event!(Level::DEBUG, key, task_id = self.id, phase = %self.phase, "task attempt started");

            let err = match run_attempt(&self.work).await {
                Ok(value) => {
                    self.phase = TaskPhase::Succeeded { attempts: attempt };
                    event!(Level::DEBUG, key, task_id = self.id, phase = %self.phase, "task succeeded");
                    return Ok(value);
                }
                Err(err) => err,
            };

            let retryable = !matches!(err, SyncError::TaskPanicked(_))
                && evaluate_predicate(&self.should_retry, &err)
                && self.retry.allows_retry(attempt);
            if !retryable {
                self.phase = TaskPhase::Failed { attempts: attempt };
                event!(
                    Level::WARN,
                    key,
                    task_id = self.id,
                    phase = %self.phase,
                    error = %err,
                    "task failed"
                );
                return Err(err);
            }

            let delay = self.retry.next_delay(attempt);
            self.phase = TaskPhase::Retrying { attempt, delay };
            event!(
                Level::INFO,
                key,
                task_id = self.id,
                phase = %self.phase,
                error = %err,
                "task attempt failed, backing off"
            );
            sleep(delay).await;
            attempt += 1;
        }
    }
}

/// One attempt, with panics in the work turned into `TaskPanicked`.
async fn run_attempt(work: &TaskWork) -> TaskOutcome {
    let future = match catch_unwind(AssertUnwindSafe(|| work())) {
        Ok(future) => future,
        Err(panic) => return Err(SyncError::TaskPanicked(panic_message(panic.as_ref()))),
    };

    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(panic) => Err(SyncError::TaskPanicked(panic_message(panic.as_ref()))),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
