use thiserror::Error;

/// Errors produced by the write-back engine.
///
/// Version conflicts on the versioned update path are *not* errors; they come
/// back as [`crate::UpdateResult::Conflict`]. `VersionConflict` only exists for
/// callers that want to turn such a result into a failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Document '{0}' not found")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Version conflict: expected {expected}, remote is at {actual}")]
    VersionConflict { expected: u64, actual: u64 },

    #[error("Task panicked: {0}")]
    TaskPanicked(String),

    #[error("Task cancelled: {0}")]
    Cancelled(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SyncError {
    /// Transient failures are worth another attempt; everything else is final.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_))
    }

    /// Retry predicate for store-backed work.
    pub fn is_retryable(err: &SyncError) -> bool {
        err.is_transient()
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        Self::Validation(err.to_string())
    }
}
