//! Conflict ledger port (driven/secondary port)
//!
//! Durable storage for conflict records so that unresolved conflicts survive
//! restarts. Records are only removed by an explicit [`IConflictLedger::delete`].

use crate::domain::{ConflictId, ConflictRecord, ResolutionStrategy};

/// Port trait for conflict persistence
#[async_trait::async_trait]
pub trait IConflictLedger: Send + Sync {
    /// Saves a conflict (insert or update by id)
    async fn save(&self, conflict: &ConflictRecord) -> anyhow::Result<()>;

    /// Retrieves a conflict by id
    async fn get(&self, id: &ConflictId) -> anyhow::Result<Option<ConflictRecord>>;

    /// Unresolved conflicts, oldest detection first
    async fn unresolved(&self) -> anyhow::Result<Vec<ConflictRecord>>;

    /// Every stored conflict, oldest detection first
    async fn all(&self) -> anyhow::Result<Vec<ConflictRecord>>;

    /// Marks a conflict resolved; returns false if it does not exist
    async fn mark_resolved(
        &self,
        id: &ConflictId,
        strategy: ResolutionStrategy,
    ) -> anyhow::Result<bool>;

    /// Deletes a conflict; returns false if it does not exist
    async fn delete(&self, id: &ConflictId) -> anyhow::Result<bool>;
}
