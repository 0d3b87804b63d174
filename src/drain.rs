// ============================================================================
// Flush / Drain Coordination
// ============================================================================
//
// Best-effort shutdown drain: flush every live autosave scheduler, then wait
// for the task queue to empty. Timeouts stop the waiting, never the work.
//
// ============================================================================

use crate::autosave::{AutosaveScheduler, WeakAutosaveScheduler};
use crate::core::SyncError;
use crate::protocol::UpdateResult;
use crate::queue::TaskQueue;
use futures::future::join_all;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::{Instant, timeout_at};
use tracing::{Instrument, Level, event, info_span};

/// What a drain achieved before returning.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DrainReport {
    /// Schedulers whose buffered edits were saved
    pub flushed: usize,
    /// Schedulers whose batch came back as a version conflict
    pub conflicts: usize,
    /// Schedulers whose flush failed
    pub errors: Vec<(String, SyncError)>,
    /// Schedulers still saving when the deadline passed
    pub timed_out: usize,
    /// Whether the task queue emptied in time
    pub queue_drained: bool,
}

impl DrainReport {
    /// Everything saved, nothing pending.
    pub fn is_clean(&self) -> bool {
        self.conflicts == 0 && self.errors.is_empty() && self.timed_out == 0 && self.queue_drained
    }
}

/// Tracks schedulers and the queue so they can be drained together.
pub struct DrainCoordinator {
    queue: TaskQueue,
    schedulers: Mutex<Vec<WeakAutosaveScheduler>>,
}

impl DrainCoordinator {
    pub fn new(queue: TaskQueue) -> Self {
        Self {
            queue,
            schedulers: Mutex::new(Vec::new()),
        }
    }

    /// Includes `scheduler` in future drains without keeping it alive.
    ///
    /// Dropped schedulers are pruned here as well as on drain.
    pub fn register(&self, scheduler: &AutosaveScheduler) {
        let mut schedulers = self
            .schedulers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        schedulers.retain(WeakAutosaveScheduler::is_alive);
        schedulers.push(scheduler.downgrade());
    }

    /// Number of tracked schedulers, including any dropped since the last prune.
    pub fn tracked(&self) -> usize {
        self.schedulers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Schedulers that are still alive; dead entries are pruned.
    pub fn live_schedulers(&self) -> Vec<AutosaveScheduler> {
        let mut schedulers = self
            .schedulers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let live: Vec<AutosaveScheduler> =
            schedulers.iter().filter_map(|weak| weak.upgrade()).collect();
        schedulers.retain(WeakAutosaveScheduler::is_alive);
        live
    }

    /// Flushes every live scheduler, then drains the queue, all within `limit`.
    pub async fn drain(&self, limit: Duration) -> DrainReport {
        let deadline = Instant::now() + limit;
        let schedulers = self.live_schedulers();
        let span = info_span!("sync.drain", schedulers = schedulers.len());

        async move {
            let flushes = schedulers.iter().map(|scheduler| async move {
                let outcome = timeout_at(deadline, scheduler.flush()).await;
                (scheduler.entity_id().to_string(), outcome)
            });

            let mut report = DrainReport::default();
            for (entity_id, outcome) in join_all(flushes).await {
                match outcome {
                    Ok(Ok(None)) => {}
                    Ok(Ok(Some(UpdateResult::Success { .. }))) => report.flushed += 1,
                    Ok(Ok(Some(UpdateResult::Conflict { .. }))) => report.conflicts += 1,
                    Ok(Err(err)) => report.errors.push((entity_id, err)),
                    Err(_) => {
                        event!(Level::WARN, entity_id = %entity_id, "autosave flush timed out during drain");
                        report.timed_out += 1;
                    }
                }
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            report.queue_drained = self.queue.flush_all(remaining).await;
            event!(
                Level::INFO,
                flushed = report.flushed,
                conflicts = report.conflicts,
                errors = report.errors.len(),
                timed_out = report.timed_out,
                queue_drained = report.queue_drained,
                "drain finished"
            );
            report
        }
        .instrument(span)
        .await
    }
}
