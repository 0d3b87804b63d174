// ============================================================================
// Autosave Scheduler
// ============================================================================
//
// Turns a stream of small local edits into infrequent consolidated saves:
// edits merge into a PendingPatch, a debounce timer decides when to save,
// and a failed batch is folded back so nothing is silently dropped.
//
// A process crash while a save is running can still lose that batch. This is
// a best-effort autosave, not a durability guarantee.
//
// ============================================================================

pub mod handler;
pub mod patch;
pub mod scheduler;

pub use handler::SaveHandler;
pub use patch::{PatchValue, PendingPatch};
pub use scheduler::{AutosaveConflict, AutosaveScheduler, WeakAutosaveScheduler};
