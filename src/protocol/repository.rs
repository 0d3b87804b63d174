use super::document::{UpdateResult, VersionedDocument};
use super::shaping::shape_payload;
use super::store::{DocumentStore, TxDecision, TxMutator, TxOutcome};
use crate::autosave::PendingPatch;
use crate::core::Result;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{Instrument, Level, event, info_span};

/// Preconditions for [`CharacterRepository::update_character`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateOptions {
    /// Version the caller last observed; a mismatch yields a conflict.
    pub base_version: Option<u64>,
}

impl UpdateOptions {
    pub fn at_version(base_version: u64) -> Self {
        Self {
            base_version: Some(base_version),
        }
    }
}

/// Character reads and writes on top of a [`DocumentStore`].
///
/// Two write paths exist on purpose:
/// - [`Self::update_character`] checks an optional base version inside a
///   transaction and reports conflicts as data;
/// - [`Self::patch_character`] writes unconditionally. Autosave uses it, so
///   two sessions editing the same leaf are not detected.
pub struct CharacterRepository {
    store: Arc<dyn DocumentStore>,
}

impl CharacterRepository {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    pub async fn get_character(&self, id: &str) -> Result<VersionedDocument> {
        self.store.read(id).await
    }

    /// Version-checked atomic update.
    pub async fn update_character(
        &self,
        id: &str,
        updates: &PendingPatch,
        options: UpdateOptions,
    ) -> Result<UpdateResult> {
        let span = info_span!(
            "character.update",
            character_id = %id,
            base_version = ?options.base_version
        );

        async move {
            let payload = shape_payload(updates)?;
            let base_version = options.base_version;

            let mutator: TxMutator = Box::new(
                move |current: &Map<String, Value>, current_version: u64| -> Result<TxDecision> {
                    if base_version.is_some_and(|base| base != current_version) {
                        return Ok(TxDecision::Abort);
                    }
                    let mut fields = current.clone();
                    payload.apply_to(&mut fields)?;
                    Ok(TxDecision::Write {
                        fields,
                        version: current_version + 1,
                    })
                },
            );

            let outcome = self
                .store
                .transactional_update(id, mutator)
                .await?;

            match outcome {
                TxOutcome::Committed { version } => {
                    event!(Level::DEBUG, new_version = version, "character updated");
                    Ok(UpdateResult::Success {
                        new_version: version,
                    })
                }
                TxOutcome::Aborted { snapshot } => {
                    event!(
                        Level::WARN,
                        remote_version = snapshot.version,
                        "character update conflicted with a newer remote version"
                    );
                    Ok(UpdateResult::Conflict { remote: snapshot })
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Unconditional field-path write; returns the new version.
    pub async fn patch_character(&self, id: &str, updates: &PendingPatch) -> Result<u64> {
        let span = info_span!("character.patch", character_id = %id, fields = updates.len());

        async move {
            let payload = shape_payload(updates)?;
            let version = self.store.field_path_update(id, payload).await?;
            event!(Level::DEBUG, new_version = version, "character patched");
            Ok(version)
        }
        .instrument(span)
        .await
    }
}
