// ============================================================================
// sheetsync Library
// ============================================================================
//
// Client-side write-back synchronisation for character sheets:
// debounced autosave, a keyed background task queue with retries, and an
// optimistic-concurrency update protocol against a versioned document store.
//
// ============================================================================

pub mod autosave;
pub mod core;
pub mod drain;
pub mod protocol;
pub mod queue;
pub mod retry;

pub use autosave::{AutosaveConflict, AutosaveScheduler, PatchValue, PendingPatch, SaveHandler};
pub use core::{AutosaveConfig, EngineConfig, Result, SyncError, TaskQueueConfig};
pub use drain::{DrainCoordinator, DrainReport};
pub use protocol::{
    CharacterRepository, DocumentStore, FieldPathPatch, MemoryDocumentStore, PatchSaveHandler,
    UpdateOptions, UpdateResult, VersionedDocument, VersionedSaveHandler,
};
pub use queue::{EnqueueOptions, QueueStats, TaskPhase, TaskQueue};
pub use retry::{RetryPolicy, RetryPredicate};

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// High-level Engine API
// ============================================================================

/// Write-back engine for one document store.
///
/// Owns the repository, the task queue and the drain coordinator, and hands
/// out autosave schedulers wired to them.
///
/// # Examples
///
/// ```
/// use sheetsync::{EngineConfig, MemoryDocumentStore, PendingPatch, SyncEngine};
/// use serde_json::json;
/// use std::sync::Arc;
///
/// # tokio_test::block_on(async {
/// let store = Arc::new(MemoryDocumentStore::new());
/// let character = store.create(serde_json::Map::new()).await;
///
/// let engine = SyncEngine::new(store, EngineConfig::default()).unwrap();
/// let autosave = engine.autosave(&character.id);
/// autosave.schedule(PendingPatch::from_value(json!({ "identity": { "name": "Vex" } })).unwrap());
/// autosave.flush().await.unwrap();
///
/// let saved = engine.get_character(&character.id).await.unwrap();
/// assert_eq!(saved.version, 2);
/// assert_eq!(saved.get_path("identity.name"), Some(&json!("Vex")));
/// # });
/// ```
pub struct SyncEngine {
    config: EngineConfig,
    repository: Arc<CharacterRepository>,
    queue: TaskQueue,
    drain: DrainCoordinator,
}

impl SyncEngine {
    /// Engine with its own task queue.
    pub fn new(store: Arc<dyn DocumentStore>, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let queue = TaskQueue::new(config.queue.clone());
        Ok(Self::assemble(store, config, queue))
    }

    /// Engine submitting to the process-wide [`TaskQueue::global`].
    ///
    /// The queue section of `config` is ignored; the global queue keeps its own.
    pub fn with_global_queue(store: Arc<dyn DocumentStore>, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::assemble(store, config, TaskQueue::global().clone()))
    }

    fn assemble(store: Arc<dyn DocumentStore>, config: EngineConfig, queue: TaskQueue) -> Self {
        Self {
            repository: Arc::new(CharacterRepository::new(store)),
            drain: DrainCoordinator::new(queue.clone()),
            queue,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn queue(&self) -> &TaskQueue {
        &self.queue
    }

    pub fn repository(&self) -> &Arc<CharacterRepository> {
        &self.repository
    }

    /// Autosave for `character_id` using unconditional patches.
    pub fn autosave(&self, character_id: &str) -> AutosaveScheduler {
        let handler = PatchSaveHandler::new(
            Arc::clone(&self.repository),
            self.queue.clone(),
            character_id,
        );
        self.register(character_id, Arc::new(handler))
    }

    /// Autosave for `character_id` that detects conflicts against `base_version`.
    pub fn versioned_autosave(
        &self,
        character_id: &str,
        base_version: u64,
    ) -> (AutosaveScheduler, Arc<VersionedSaveHandler>) {
        let handler = Arc::new(VersionedSaveHandler::new(
            Arc::clone(&self.repository),
            self.queue.clone(),
            character_id,
            base_version,
        ));
        let scheduler = self.register(character_id, handler.clone());
        (scheduler, handler)
    }

    fn register(&self, character_id: &str, handler: Arc<dyn SaveHandler>) -> AutosaveScheduler {
        let scheduler =
            AutosaveScheduler::new(character_id, handler, self.config.autosave.clone());
        self.drain.register(&scheduler);
        scheduler
    }

    pub async fn get_character(&self, id: &str) -> Result<VersionedDocument> {
        self.repository.get_character(id).await
    }

    /// Version-checked update, run through the queue ahead of autosaves.
    pub async fn update_character(
        &self,
        id: &str,
        updates: PendingPatch,
        options: UpdateOptions,
    ) -> Result<UpdateResult> {
        let repository = Arc::clone(&self.repository);
        let character_id = id.to_string();
        self.queue
            .enqueue(
                id,
                move || {
                    let repository = Arc::clone(&repository);
                    let character_id = character_id.clone();
                    let updates = updates.clone();
                    async move {
                        repository
                            .update_character(&character_id, &updates, options)
                            .await
                    }
                },
                EnqueueOptions::new()
                    .priority(protocol::VERSIONED_SAVE_PRIORITY)
                    .retry_predicate(retry::retry_transient()),
            )
            .await
    }

    /// Unconditional patch, run through the queue; returns the new version.
    pub async fn patch_character(&self, id: &str, updates: PendingPatch) -> Result<u64> {
        let repository = Arc::clone(&self.repository);
        let character_id = id.to_string();
        self.queue
            .enqueue(
                id,
                move || {
                    let repository = Arc::clone(&repository);
                    let character_id = character_id.clone();
                    let updates = updates.clone();
                    async move { repository.patch_character(&character_id, &updates).await }
                },
                EnqueueOptions::new().retry_predicate(retry::retry_transient()),
            )
            .await
    }

    /// Arbitrary work on this engine's queue.
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
        self.queue.enqueue(key, work, options)
    }

    /// Best-effort flush of every autosave and the queue.
    pub async fn drain(&self, limit: Duration) -> DrainReport {
        self.drain.drain(limit).await
    }
}
