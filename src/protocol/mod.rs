// ============================================================================
// Update Protocol
// ============================================================================
//
// Optimistic concurrency against a versioned remote document:
// - payload shaping into minimal field-path writes
// - version-checked transactional updates (conflicts returned as data)
// - unconditional incrementing patches (the autosave path)
//
// ============================================================================

pub mod document;
pub mod handlers;
pub mod memory;
pub mod repository;
pub mod schema;
pub mod shaping;
pub mod store;

pub use document::{FieldPathPatch, UpdateResult, VersionedDocument};
pub use handlers::{PatchSaveHandler, VERSIONED_SAVE_PRIORITY, VersionedSaveHandler};
pub use memory::{MemoryDocumentStore, StoreCallCounts};
pub use repository::{CharacterRepository, UpdateOptions};
pub use shaping::shape_payload;
pub use store::{DocumentStore, TxDecision, TxMutator, TxOutcome};
