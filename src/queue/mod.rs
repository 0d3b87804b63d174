// ============================================================================
// Background Task Queue
// ============================================================================
//
// Per-entity queues of asynchronous persistence work:
// - priority ordered, stable for equal priority
// - concurrency ceiling per key
// - coalescing of queued tasks that share a coalesce key
// - retries with exponential backoff between attempts
//
// Every caller attached to a task (directly or through coalescing) receives
// the same final outcome.
//
// ============================================================================

pub mod options;
pub mod task;
pub mod task_queue;

pub use options::EnqueueOptions;
pub use task::TaskPhase;
pub use task_queue::{QueueStats, TaskQueue};
