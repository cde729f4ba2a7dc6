//! JSON-file implementation of IIrStore
//!
//! Each IR id owns one file `<sanitized-id>-<hash8>.json` under the store
//! directory, holding the retained version history oldest first. The whole
//! store is mirrored in memory; files are rewritten atomically on every
//! append.
//!
//! ## Concurrency
//!
//! Writes to one id are serialized by a per-id `tokio::sync::Mutex`. The
//! fingerprint comparison and the append happen under that lock, so two
//! workers syncing the same id can never produce the same version twice.
//! Different ids proceed in parallel.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use irsync_core::domain::{Fingerprint, IrDocument, IrId, IrRecord, StoreOutcome};
use irsync_core::ports::IIrStore;

use crate::fs::{remove_if_exists, write_atomic};
use crate::StoreError;

/// On-disk layout of one history file
#[derive(Debug, Serialize, Deserialize)]
struct HistoryFile {
    id: IrId,
    records: Vec<IrRecord>,
}

/// IR store backed by one JSON file per id
pub struct JsonIrStore {
    dir: Option<PathBuf>,
    history_limit: usize,
    records: DashMap<IrId, Vec<IrRecord>>,
    locks: DashMap<IrId, Arc<Mutex<()>>>,
}

impl JsonIrStore {
    /// Opens (or creates) a store in `dir`, loading every history file
    ///
    /// `history_limit` caps the versions kept per id; the latest version is
    /// always kept.
    ///
    /// # Errors
    /// Returns [`StoreError`] if the directory cannot be created or a history
    /// file cannot be parsed.
    pub async fn open(dir: &Path, history_limit: usize) -> Result<Self, StoreError> {
        tokio::fs::create_dir_all(dir).await?;

        let store = Self {
            dir: Some(dir.to_path_buf()),
            history_limit: history_limit.max(1),
            records: DashMap::new(),
            locks: DashMap::new(),
        };

        let mut entries = tokio::fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let content = tokio::fs::read(&path).await?;
            let file: HistoryFile =
                serde_json::from_slice(&content).map_err(|e| StoreError::Corrupt {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                })?;
            if file.records.iter().any(|r| r.id != file.id) {
                return Err(StoreError::Corrupt {
                    path: path.display().to_string(),
                    reason: "record id does not match file id".to_string(),
                });
            }
            store.records.insert(file.id, file.records);
        }

        info!(dir = %dir.display(), ids = store.records.len(), "IR store opened");
        Ok(store)
    }

    /// Creates a store that never touches the disk
    pub fn in_memory(history_limit: usize) -> Self {
        Self {
            dir: None,
            history_limit: history_limit.max(1),
            records: DashMap::new(),
            locks: DashMap::new(),
        }
    }

    fn lock_for(&self, id: &IrId) -> Arc<Mutex<()>> {
        self.locks
            .entry(id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn file_for(&self, id: &IrId) -> Option<PathBuf> {
        self.dir
            .as_ref()
            .map(|dir| dir.join(format!("{}.json", file_stem(id))))
    }

    async fn persist(&self, id: &IrId, records: &[IrRecord]) -> Result<(), StoreError> {
        let Some(path) = self.file_for(id) else {
            return Ok(());
        };
        let file = HistoryFile {
            id: id.clone(),
            records: records.to_vec(),
        };
        let data = serde_json::to_vec_pretty(&file)?;
        write_atomic(&path, &data).await?;
        Ok(())
    }
}

/// File stem for an id: readable prefix plus a short hash to keep distinct
/// ids from colliding after sanitization
fn file_stem(id: &IrId) -> String {
    let readable: String = id
        .as_str()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    let mut hasher = Sha256::new();
    hasher.update(id.as_str().as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    format!("{}-{}", readable, &digest[..8])
}

#[async_trait::async_trait]
impl IIrStore for JsonIrStore {
    async fn latest(&self, id: &IrId) -> anyhow::Result<Option<IrRecord>> {
        Ok(self
            .records
            .get(id)
            .and_then(|history| history.last().cloned()))
    }

    async fn history(&self, id: &IrId) -> anyhow::Result<Vec<IrRecord>> {
        Ok(self
            .records
            .get(id)
            .map(|history| history.value().clone())
            .unwrap_or_default())
    }

    #[instrument(skip(self, representation, fingerprint), fields(ir_id = %id))]
    async fn append_if_changed(
        &self,
        id: &IrId,
        representation: IrDocument,
        fingerprint: Fingerprint,
    ) -> anyhow::Result<StoreOutcome> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        let mut history = self
            .records
            .get(id)
            .map(|h| h.value().clone())
            .unwrap_or_default();

        if let Some(latest) = history.last() {
            if latest.fingerprint == fingerprint {
                debug!(version = latest.version, "fingerprint unchanged");
                return Ok(StoreOutcome::Unchanged(latest.clone()));
            }
        }

        let record = IrRecord::next(id.clone(), representation, fingerprint, history.last());
        history.push(record.clone());
        if history.len() > self.history_limit {
            let excess = history.len() - self.history_limit;
            history.drain(..excess);
        }

        self.persist(id, &history).await?;
        self.records.insert(id.clone(), history);

        debug!(
            version = record.version,
            fingerprint = record.fingerprint.short(),
            "IR version appended"
        );
        Ok(StoreOutcome::Appended(record))
    }

    #[instrument(skip(self), fields(ir_id = %id))]
    async fn delete(&self, id: &IrId) -> anyhow::Result<bool> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        let existed = self.records.remove(id).is_some();
        if let Some(path) = self.file_for(id) {
            if let Err(e) = remove_if_exists(&path).await {
                warn!(path = %path.display(), error = %e, "failed to remove IR history file");
                return Err(StoreError::from(e).into());
            }
        }
        if existed {
            debug!("IR record deleted");
        }
        Ok(existed)
    }

    async fn ids(&self) -> anyhow::Result<Vec<IrId>> {
        let mut ids: Vec<IrId> = self.records.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_stem_is_sanitized_and_distinct() {
        let a = IrId::new("a/src/Button".to_string()).unwrap();
        let b = IrId::new("a/src_Button".to_string()).unwrap();
        let stem_a = file_stem(&a);
        let stem_b = file_stem(&b);
        assert!(stem_a.starts_with("a_src_Button-"));
        assert!(stem_b.starts_with("a_src_Button-"));
        assert_ne!(stem_a, stem_b);
    }
}
