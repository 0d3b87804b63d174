use super::document::{FieldPathPatch, VersionedDocument};
use super::store::{DocumentStore, TxDecision, TxMutator, TxOutcome};
use crate::core::{Result, SyncError};
use async_trait::async_trait;
use chrono::Utc;
use log::debug;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Call counters, mostly useful in tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreCallCounts {
    pub reads: usize,
    pub transactions: usize,
    pub field_path_updates: usize,
}

/// In-process [`DocumentStore`] with versioned documents and fault injection.
pub struct MemoryDocumentStore {
    documents: Mutex<HashMap<String, VersionedDocument>>,
    /// Number of upcoming calls that fail with `StoreUnavailable`
    injected_failures: AtomicUsize,
    latency: Option<Duration>,
    reads: AtomicUsize,
    transactions: AtomicUsize,
    field_path_updates: AtomicUsize,
}

impl Default for MemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self {
            documents: Mutex::new(HashMap::new()),
            injected_failures: AtomicUsize::new(0),
            latency: None,
            reads: AtomicUsize::new(0),
            transactions: AtomicUsize::new(0),
            field_path_updates: AtomicUsize::new(0),
        }
    }

    /// Simulated round-trip time applied to every call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Creates a document under a fresh id at version 1.
    pub async fn create(&self, fields: Map<String, Value>) -> VersionedDocument {
        let id = Uuid::new_v4().to_string();
        self.insert(id, fields).await
    }

    /// Creates or overwrites `id` at version 1.
    pub async fn insert(&self, id: impl Into<String>, fields: Map<String, Value>) -> VersionedDocument {
        let mut document = VersionedDocument::new(id, fields, 1);
        document.updated_at = Some(Utc::now());
        debug!("memory store: inserted document '{}'", document.id);
        self.documents
            .lock()
            .await
            .insert(document.id.clone(), document.clone());
        document
    }

    /// Makes the next `count` calls fail with `StoreUnavailable`.
    pub fn fail_next(&self, count: usize) {
        self.injected_failures.store(count, Ordering::SeqCst);
    }

    pub fn call_counts(&self) -> StoreCallCounts {
        StoreCallCounts {
            reads: self.reads.load(Ordering::SeqCst),
            transactions: self.transactions.load(Ordering::SeqCst),
            field_path_updates: self.field_path_updates.load(Ordering::SeqCst),
        }
    }

    async fn simulate_round_trip(&self, operation: &str, id: &str) -> Result<()> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let injected = self
            .injected_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |remaining| {
                remaining.checked_sub(1)
            })
            .is_ok();
        if injected {
            debug!("memory store: injected failure for {} on '{}'", operation, id);
            return Err(SyncError::StoreUnavailable(format!(
                "injected failure during {}",
                operation
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn read(&self, id: &str) -> Result<VersionedDocument> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.simulate_round_trip("read", id).await?;

        self.documents
            .lock()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| SyncError::NotFound(id.to_string()))
    }

    async fn transactional_update(&self, id: &str, mut mutator: TxMutator) -> Result<TxOutcome> {
        self.transactions.fetch_add(1, Ordering::SeqCst);
        self.simulate_round_trip("transaction", id).await?;

        let mut documents = self.documents.lock().await;
        let document = documents
            .get_mut(id)
            .ok_or_else(|| SyncError::NotFound(id.to_string()))?;

        match mutator(&document.fields, document.version)? {
            TxDecision::Abort => {
                debug!(
                    "memory store: transaction on '{}' aborted at version {}",
                    id, document.version
                );
                Ok(TxOutcome::Aborted {
                    snapshot: document.clone(),
                })
            }
            TxDecision::Write { fields, version } => {
                if version <= document.version {
                    return Err(SyncError::Validation(format!(
                        "transaction on '{}' tried to move version {} back to {}",
                        id, document.version, version
                    )));
                }
                document.fields = fields;
                document.version = version;
                document.updated_at = Some(Utc::now());
                debug!("memory store: transaction on '{}' committed version {}", id, version);
                Ok(TxOutcome::Committed { version })
            }
        }
    }

    async fn field_path_update(&self, id: &str, patch: FieldPathPatch) -> Result<u64> {
        self.field_path_updates.fetch_add(1, Ordering::SeqCst);
        self.simulate_round_trip("field path update", id).await?;

        let mut documents = self.documents.lock().await;
        let document = documents
            .get_mut(id)
            .ok_or_else(|| SyncError::NotFound(id.to_string()))?;

        // Apply to a copy so a malformed path leaves the document untouched.
        let mut fields = document.fields.clone();
        patch.apply_to(&mut fields)?;
        document.fields = fields;
        document.version += 1;
        document.updated_at = Some(Utc::now());
        debug!(
            "memory store: field path update on '{}' wrote {} paths, version {}",
            id,
            patch.len(),
            document.version
        );
        Ok(document.version)
    }
}
