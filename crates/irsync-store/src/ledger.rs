//! JSON-file implementation of IConflictLedger
//!
//! The ledger is a single JSON array of conflict records at a configured
//! path. Saves update the matching record in place or append a new one, and
//! the whole array is rewritten atomically. Records are never dropped
//! implicitly; only [`IConflictLedger::delete`] removes one.
//!
//! Every change is written to disk before it becomes visible in memory, so a
//! failed write leaves the ledger as it was.

use std::path::{Path, PathBuf};

use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

use irsync_core::domain::{ConflictId, ConflictRecord, ResolutionStrategy};
use irsync_core::ports::IConflictLedger;

use crate::fs::write_atomic;
use crate::StoreError;

/// Conflict ledger backed by one JSON array file
pub struct JsonConflictLedger {
    path: Option<PathBuf>,
    conflicts: Mutex<Vec<ConflictRecord>>,
}

impl JsonConflictLedger {
    /// Opens the ledger at `path`, loading existing records if the file exists
    ///
    /// # Errors
    /// Returns [`StoreError`] if the file exists but cannot be read or parsed.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        let conflicts = match tokio::fs::read(path).await {
            Ok(content) if content.iter().all(u8::is_ascii_whitespace) => Vec::new(),
            Ok(content) => {
                serde_json::from_slice(&content).map_err(|e| StoreError::Corrupt {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                })?
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        info!(
            path = %path.display(),
            conflicts = conflicts.len(),
            "conflict ledger opened"
        );
        Ok(Self {
            path: Some(path.to_path_buf()),
            conflicts: Mutex::new(conflicts),
        })
    }

    /// Creates a ledger that never touches the disk
    pub fn in_memory() -> Self {
        Self {
            path: None,
            conflicts: Mutex::new(Vec::new()),
        }
    }

    async fn persist(&self, conflicts: &[ConflictRecord]) -> Result<(), StoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let data = serde_json::to_vec_pretty(conflicts)?;
        write_atomic(path, &data).await?;
        Ok(())
    }
}

fn by_detection(mut conflicts: Vec<ConflictRecord>) -> Vec<ConflictRecord> {
    conflicts.sort_by_key(|c| c.detected_at());
    conflicts
}

#[async_trait::async_trait]
impl IConflictLedger for JsonConflictLedger {
    #[instrument(skip(self, conflict), fields(conflict_id = %conflict.id()))]
    async fn save(&self, conflict: &ConflictRecord) -> anyhow::Result<()> {
        let mut conflicts = self.conflicts.lock().await;
        let mut next = conflicts.clone();
        match next.iter_mut().find(|c| c.id() == conflict.id()) {
            Some(existing) => *existing = conflict.clone(),
            None => next.push(conflict.clone()),
        }
        self.persist(&next).await?;
        *conflicts = next;
        debug!("conflict saved");
        Ok(())
    }

    async fn get(&self, id: &ConflictId) -> anyhow::Result<Option<ConflictRecord>> {
        let conflicts = self.conflicts.lock().await;
        Ok(conflicts.iter().find(|c| c.id() == id).cloned())
    }

    async fn unresolved(&self) -> anyhow::Result<Vec<ConflictRecord>> {
        let conflicts = self.conflicts.lock().await;
        Ok(by_detection(
            conflicts
                .iter()
                .filter(|c| !c.is_resolved())
                .cloned()
                .collect(),
        ))
    }

    async fn all(&self) -> anyhow::Result<Vec<ConflictRecord>> {
        let conflicts = self.conflicts.lock().await;
        Ok(by_detection(conflicts.clone()))
    }

    #[instrument(skip(self), fields(conflict_id = %id))]
    async fn mark_resolved(
        &self,
        id: &ConflictId,
        strategy: ResolutionStrategy,
    ) -> anyhow::Result<bool> {
        let mut conflicts = self.conflicts.lock().await;
        let mut next = conflicts.clone();
        let Some(conflict) = next.iter_mut().find(|c| c.id() == id) else {
            return Ok(false);
        };
        conflict.mark_resolved(strategy);
        self.persist(&next).await?;
        *conflicts = next;
        debug!(%strategy, "conflict marked resolved");
        Ok(true)
    }

    #[instrument(skip(self), fields(conflict_id = %id))]
    async fn delete(&self, id: &ConflictId) -> anyhow::Result<bool> {
        let mut conflicts = self.conflicts.lock().await;
        let next: Vec<ConflictRecord> =
            conflicts.iter().filter(|c| c.id() != id).cloned().collect();
        if next.len() == conflicts.len() {
            return Ok(false);
        }
        self.persist(&next).await?;
        *conflicts = next;
        debug!("conflict deleted");
        Ok(true)
    }
}
