use super::handler::SaveHandler;
use super::patch::PendingPatch;
use crate::core::{AutosaveConfig, Result, SyncError};
use crate::protocol::{UpdateResult, VersionedDocument};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{Level, event};

/// A batch the remote rejected because it moved on in the meantime.
#[derive(Debug, Clone, PartialEq)]
pub struct AutosaveConflict {
    /// The edits that were not written.
    pub rejected: PendingPatch,
    /// The remote document at the time of the conflict.
    pub remote: VersionedDocument,
}

#[derive(Default)]
struct SchedulerState {
    pending: PendingPatch,
    timer: Option<JoinHandle<()>>,
    timer_generation: u64,
    in_flight: bool,
    last_error: Option<SyncError>,
    conflict: Option<AutosaveConflict>,
}

struct SchedulerInner {
    entity_id: String,
    config: AutosaveConfig,
    handler: Arc<dyn SaveHandler>,
    state: Mutex<SchedulerState>,
    settled: Notify,
}

enum SaveStart {
    Idle,
    Busy,
    Started(JoinHandle<Result<UpdateResult>>),
}

/// Debounced, merging autosave for one entity.
///
/// Edits are buffered by [`Self::schedule`] and written as one batch once no
/// new edit has arrived for `debounce_ms`. At most one save runs at a time;
/// a failed batch is folded back under any newer edits.
///
/// Saves run on their own Tokio task, so dropping a `flush` future stops the
/// waiting but never the save.
#[derive(Clone)]
pub struct AutosaveScheduler {
    inner: Arc<SchedulerInner>,
}

/// Non-owning handle used by drain coordination.
#[derive(Clone)]
pub struct WeakAutosaveScheduler {
    inner: Weak<SchedulerInner>,
}

impl WeakAutosaveScheduler {
    pub fn upgrade(&self) -> Option<AutosaveScheduler> {
        self.inner.upgrade().map(|inner| AutosaveScheduler { inner })
    }

    pub fn is_alive(&self) -> bool {
        self.inner.strong_count() > 0
    }
}

impl AutosaveScheduler {
    pub fn new(
        entity_id: impl Into<String>,
        handler: Arc<dyn SaveHandler>,
        config: AutosaveConfig,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                entity_id: entity_id.into(),
                config,
                handler,
                state: Mutex::new(SchedulerState::default()),
                settled: Notify::new(),
            }),
        }
    }

    pub fn entity_id(&self) -> &str {
        &self.inner.entity_id
    }

    pub fn downgrade(&self) -> WeakAutosaveScheduler {
        WeakAutosaveScheduler {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Buffers `patch` and restarts the debounce window.
    ///
    /// Never waits and never fails. Must be called from within a Tokio runtime.
    pub fn schedule(&self, patch: PendingPatch) {
        if patch.is_empty() {
            return;
        }
        let mut state = self.lock_state();
        state.pending.merge(patch);
        self.arm_timer(&mut state);
    }

    /// Saves buffered edits now and waits for the outcome.
    ///
    /// Cancels the debounce timer. If a save is already running it is awaited
    /// rather than duplicated, then whatever accumulated meanwhile is saved.
    /// Returns `Ok(None)` when there was nothing to save.
    pub async fn flush(&self) -> Result<Option<UpdateResult>> {
        loop {
            let settled = self.inner.settled.notified();
            tokio::pin!(settled);
            settled.as_mut().enable();

            {
                let mut state = self.lock_state();
                Self::cancel_timer(&mut state);
            }

            match self.begin_save() {
                SaveStart::Idle => return Ok(None),
                SaveStart::Busy => settled.await,
                SaveStart::Started(handle) => {
                    return handle
                        .await
                        .map_err(|err| SyncError::Cancelled(format!("autosave task: {}", err)))?
                        .map(Some);
                }
            }
        }
    }

    pub fn has_pending(&self) -> bool {
        !self.lock_state().pending.is_empty()
    }

    pub fn is_saving(&self) -> bool {
        self.lock_state().in_flight
    }

    /// Copy of the edits not yet confirmed saved.
    pub fn pending_snapshot(&self) -> PendingPatch {
        self.lock_state().pending.clone()
    }

    /// Error from the most recent failed save, cleared by the next success.
    pub fn last_error(&self) -> Option<SyncError> {
        self.lock_state().last_error.clone()
    }

    /// Takes the most recent unresolved conflict, if any.
    pub fn take_conflict(&self) -> Option<AutosaveConflict> {
        self.lock_state().conflict.take()
    }

    fn arm_timer(&self, state: &mut SchedulerState) {
        Self::cancel_timer(state);
        let generation = state.timer_generation;
        let debounce = self.inner.config.debounce();
        let scheduler = self.clone();

        state.timer = Some(tokio::spawn(async move {
            sleep(debounce).await;
            scheduler.on_debounce_expired(generation).await;
        }));
    }

    fn cancel_timer(state: &mut SchedulerState) {
        state.timer_generation = state.timer_generation.wrapping_add(1);
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
    }

    async fn on_debounce_expired(&self, generation: u64) {
        {
            let mut state = self.lock_state();
            if state.timer_generation != generation {
                return;
            }
            // Detach: from here on this task must not be aborted by a new edit.
            state.timer = None;
        }

        event!(Level::DEBUG, entity_id = %self.inner.entity_id, "autosave debounce expired");
        match self.begin_save() {
            SaveStart::Started(handle) => {
                // Outcomes are recorded in state by `settle`; nothing to surface here.
                let _ = handle.await;
            }
            SaveStart::Busy => {
                // `settle` decides whether the pending edits get a new timer.
                event!(
                    Level::DEBUG,
                    entity_id = %self.inner.entity_id,
                    "autosave debounce expired during a running save, deferring"
                );
            }
            SaveStart::Idle => {}
        }
    }

    fn begin_save(&self) -> SaveStart {
        let snapshot = {
            let mut state = self.lock_state();
            if state.in_flight {
                return SaveStart::Busy;
            }
            if state.pending.is_empty() {
                return SaveStart::Idle;
            }
            state.in_flight = true;
            std::mem::take(&mut state.pending)
        };

        let scheduler = self.clone();
        SaveStart::Started(tokio::spawn(async move {
            // Keep the save off the caller's stack.
            tokio::task::yield_now().await;
            event!(
                Level::DEBUG,
                entity_id = %scheduler.inner.entity_id,
                fields = snapshot.len(),
                "autosave started"
            );
            let outcome = AssertUnwindSafe(scheduler.inner.handler.save(snapshot.clone()))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| {
                    Err(SyncError::TaskPanicked("autosave handler panicked".to_string()))
                });
            scheduler.settle(snapshot, outcome)
        }))
    }

    fn settle(
        &self,
        snapshot: PendingPatch,
        outcome: Result<UpdateResult>,
    ) -> Result<UpdateResult> {
        let entity_id = &self.inner.entity_id;
        let mut state = self.lock_state();
        state.in_flight = false;

        let settled = match outcome {
            Ok(UpdateResult::Success { new_version }) => {
                state.last_error = None;
                event!(Level::DEBUG, entity_id = %entity_id, new_version, "autosave succeeded");
                if !state.pending.is_empty() {
                    self.arm_timer(&mut state);
                }
                Ok(UpdateResult::Success { new_version })
            }
            Ok(UpdateResult::Conflict { remote }) => {
                event!(
                    Level::WARN,
                    entity_id = %entity_id,
                    remote_version = remote.version,
                    "autosave batch conflicted with remote changes"
                );
                state.conflict = Some(AutosaveConflict {
                    rejected: snapshot,
                    remote: remote.clone(),
                });
                // Only the rejected batch stops here; newer edits still go out.
                if !state.pending.is_empty() {
                    self.arm_timer(&mut state);
                }
                Ok(UpdateResult::Conflict { remote })
            }
            Err(err) => {
                event!(Level::WARN, entity_id = %entity_id, error = %err, "autosave failed");
                let newer = std::mem::take(&mut state.pending);
                let mut restored = snapshot;
                restored.merge(newer);
                state.pending = restored;
                state.last_error = Some(err.clone());
                Err(err)
            }
        };

        drop(state);
        self.inner.settled.notify_waiters();
        settled
    }

    fn lock_state(&self) -> MutexGuard<'_, SchedulerState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
