use super::patch::PendingPatch;
use crate::core::Result;
use crate::protocol::UpdateResult;
use async_trait::async_trait;
use std::future::Future;

/// Persists one consolidated batch of edits.
///
/// `Ok(UpdateResult::Conflict { .. })` is a terminal outcome for the batch;
/// `Err` means the batch was not saved and will be retried with later edits.
#[async_trait]
pub trait SaveHandler: Send + Sync {
    async fn save(&self, patch: PendingPatch) -> Result<UpdateResult>;
}

#[async_trait]
impl<F, Fut> SaveHandler for F
where
    F: Fn(PendingPatch) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<UpdateResult>> + Send + 'static,
{
    async fn save(&self, patch: PendingPatch) -> Result<UpdateResult> {
        (self)(patch).await
    }
}
