use super::document::UpdateResult;
use super::repository::{CharacterRepository, UpdateOptions};
use crate::autosave::{PendingPatch, SaveHandler};
use crate::core::Result;
use crate::queue::{EnqueueOptions, TaskQueue};
use crate::retry::retry_transient;
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Queue priority for explicit, version-aware saves.
pub const VERSIONED_SAVE_PRIORITY: i32 = 0;

/// Autosave handler using the unconditional write path.
///
/// Each batch goes through the task queue under the character id, retrying
/// only transient store failures. Batches are never coalesced: two schedulers
/// for the same character carry different fields, and replacing one batch
/// with the other would drop edits.
pub struct PatchSaveHandler {
    repository: Arc<CharacterRepository>,
    queue: TaskQueue,
    character_id: String,
}

impl PatchSaveHandler {
    pub fn new(
        repository: Arc<CharacterRepository>,
        queue: TaskQueue,
        character_id: impl Into<String>,
    ) -> Self {
        Self {
            repository,
            queue,
            character_id: character_id.into(),
        }
    }
}

#[async_trait]
impl SaveHandler for PatchSaveHandler {
    async fn save(&self, patch: PendingPatch) -> Result<UpdateResult> {
        let repository = Arc::clone(&self.repository);
        let character_id = self.character_id.clone();

        let new_version = self
            .queue
            .enqueue(
                self.character_id.clone(),
                move || {
                    let repository = Arc::clone(&repository);
                    let character_id = character_id.clone();
                    let patch = patch.clone();
                    async move { repository.patch_character(&character_id, &patch).await }
                },
                EnqueueOptions::new().retry_predicate(retry_transient()),
            )
            .await?;

        Ok(UpdateResult::Success { new_version })
    }
}

/// Handler for callers that opted into conflict detection.
///
/// Tracks the last version it wrote or was told about; a batch submitted
/// against a stale version comes back as a conflict and the base is left
/// untouched until [`Self::rebase`] is called after reconciliation.
pub struct VersionedSaveHandler {
    repository: Arc<CharacterRepository>,
    queue: TaskQueue,
    character_id: String,
    base_version: AtomicU64,
}

impl VersionedSaveHandler {
    pub fn new(
        repository: Arc<CharacterRepository>,
        queue: TaskQueue,
        character_id: impl Into<String>,
        base_version: u64,
    ) -> Self {
        Self {
            repository,
            queue,
            character_id: character_id.into(),
            base_version: AtomicU64::new(base_version),
        }
    }

    pub fn base_version(&self) -> u64 {
        self.base_version.load(Ordering::SeqCst)
    }

    pub fn rebase(&self, version: u64) {
        self.base_version.store(version, Ordering::SeqCst);
    }
}

#[async_trait]
impl SaveHandler for VersionedSaveHandler {
    async fn save(&self, patch: PendingPatch) -> Result<UpdateResult> {
        let repository = Arc::clone(&self.repository);
        let character_id = self.character_id.clone();
        let options = UpdateOptions::at_version(self.base_version());

        let result = self
            .queue
            .enqueue(
                self.character_id.clone(),
                move || {
                    let repository = Arc::clone(&repository);
                    let character_id = character_id.clone();
                    let patch = patch.clone();
                    async move {
                        repository
                            .update_character(&character_id, &patch, options)
                            .await
                    }
                },
                EnqueueOptions::new()
                    .priority(VERSIONED_SAVE_PRIORITY)
                    .retry_predicate(retry_transient()),
            )
            .await?;

        if let UpdateResult::Success { new_version } = &result {
            self.rebase(*new_version);
        }
        Ok(result)
    }
}
