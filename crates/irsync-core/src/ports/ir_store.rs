//! IR store port (driven/secondary port)
//!
//! Persists versioned IR records. Implementations must serialize writes to a
//! given id so that versions stay strictly increasing when several workers
//! sync different files concurrently.

use crate::domain::{Fingerprint, IrDocument, IrId, IrRecord, StoreOutcome};

/// Port trait for versioned IR persistence
#[async_trait::async_trait]
pub trait IIrStore: Send + Sync {
    /// Latest stored version for `id`
    async fn latest(&self, id: &IrId) -> anyhow::Result<Option<IrRecord>>;

    /// Every retained version for `id`, oldest first
    async fn history(&self, id: &IrId) -> anyhow::Result<Vec<IrRecord>>;

    /// Appends a new version unless `fingerprint` equals the latest one
    ///
    /// The compare and the append happen under the same per-id lock.
    async fn append_if_changed(
        &self,
        id: &IrId,
        representation: IrDocument,
        fingerprint: Fingerprint,
    ) -> anyhow::Result<StoreOutcome>;

    /// Removes the record and its history; returns false if it did not exist
    async fn delete(&self, id: &IrId) -> anyhow::Result<bool>;

    /// All ids with at least one stored version
    async fn ids(&self) -> anyhow::Result<Vec<IrId>>;
}
