use super::document::{FieldPathPatch, VersionedDocument};
use crate::core::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};

/// Decision returned by a transaction body.
#[derive(Debug, Clone, PartialEq)]
pub enum TxDecision {
    Write {
        fields: Map<String, Value>,
        version: u64,
    },
    Abort,
}

/// Result of a transactional read-modify-write.
#[derive(Debug, Clone, PartialEq)]
pub enum TxOutcome {
    Committed { version: u64 },
    /// The body aborted; `snapshot` is what it saw.
    Aborted { snapshot: VersionedDocument },
}

/// Transaction body: receives the current fields and version.
///
/// May run more than once if the store retries the transaction internally.
pub type TxMutator = Box<dyn FnMut(&Map<String, Value>, u64) -> Result<TxDecision> + Send>;

/// The narrow contract the engine needs from a remote document store.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Point read.
    async fn read(&self, id: &str) -> Result<VersionedDocument>;

    /// Atomic read-modify-write of one document.
    async fn transactional_update(&self, id: &str, mutator: TxMutator) -> Result<TxOutcome>;

    /// Writes only the named leaves and atomically increments the version.
    /// Returns the new version.
    async fn field_path_update(&self, id: &str, patch: FieldPathPatch) -> Result<u64>;
}
