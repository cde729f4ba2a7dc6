//! Conflict resolution executor
//!
//! Applies resolution strategies by performing the actual file operations:
//! - `KeepA` / `KeepB`: convert the kept file to IR, store it, back up the
//!   other file and regenerate it from the IR
//! - `ManualMerge`: back up both files and leave the conflict open until
//!   [`ConflictResolver::complete_manual_merge`] names the authoritative side
//! - `Skip`: leave the conflict open and touch nothing
//!
//! Failures never escape as errors: they are reported in the returned
//! [`ResolutionOutcome`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use irsync_core::domain::{
    ConflictId, ConflictRecord, Fingerprint, PathMapper, ResolutionStrategy, Side,
};
use irsync_core::ports::{ConverterRegistry, IConflictLedger, IIrStore};

use crate::backup::BackupManager;
use crate::diff::ConflictPreview;
use crate::error::ConflictError;

/// Told about every file the resolver writes
///
/// The sync pipeline uses this to suppress the watcher echo of regenerated
/// files.
#[async_trait::async_trait]
pub trait WriteObserver: Send + Sync {
    async fn file_written(&self, path: &Path);
}

/// Result of applying a strategy to one conflict
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolutionOutcome {
    pub conflict_id: ConflictId,
    pub strategy: ResolutionStrategy,
    /// The strategy ran without error
    pub success: bool,
    /// The conflict is now marked resolved
    pub resolved: bool,
    pub backups: Vec<PathBuf>,
    /// File regenerated from the kept side, if any
    pub regenerated: Option<PathBuf>,
    pub error: Option<String>,
}

impl ResolutionOutcome {
    fn new(conflict_id: ConflictId, strategy: ResolutionStrategy) -> Self {
        Self {
            conflict_id,
            strategy,
            success: false,
            resolved: false,
            backups: Vec::new(),
            regenerated: None,
            error: None,
        }
    }

    fn failed(mut self, error: impl std::fmt::Display) -> Self {
        self.success = false;
        self.error = Some(error.to_string());
        self
    }
}

/// Applies conflict resolutions with real file operations
pub struct ConflictResolver {
    ledger: Arc<dyn IConflictLedger>,
    store: Arc<dyn IIrStore>,
    converters: ConverterRegistry,
    mapper: PathMapper,
    backups: BackupManager,
    observers: Vec<Arc<dyn WriteObserver>>,
}

impl ConflictResolver {
    pub fn new(
        ledger: Arc<dyn IConflictLedger>,
        store: Arc<dyn IIrStore>,
        converters: ConverterRegistry,
        mapper: PathMapper,
        backups: BackupManager,
    ) -> Self {
        Self {
            ledger,
            store,
            converters,
            mapper,
            backups,
            observers: Vec::new(),
        }
    }

    /// Adds an observer notified after each regeneration
    pub fn with_write_observer(mut self, observer: Arc<dyn WriteObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn backups(&self) -> &BackupManager {
        &self.backups
    }

    /// Unresolved conflicts, oldest first
    pub async fn unresolved(&self) -> Result<Vec<ConflictRecord>, ConflictError> {
        Ok(self.ledger.unresolved().await?)
    }

    /// Applies `strategy` to the conflict `id`
    pub async fn resolve(&self, id: &ConflictId, strategy: ResolutionStrategy) -> ResolutionOutcome {
        info!(conflict_id = %id, %strategy, "Applying conflict resolution");
        let outcome = ResolutionOutcome::new(*id, strategy);

        let conflict = match self.open_conflict(id).await {
            Ok(conflict) => conflict,
            Err(e) => return outcome.failed(e),
        };

        match strategy {
            ResolutionStrategy::KeepA => self.apply_keep(&conflict, Side::A, strategy, outcome).await,
            ResolutionStrategy::KeepB => self.apply_keep(&conflict, Side::B, strategy, outcome).await,
            ResolutionStrategy::ManualMerge => self.apply_manual_merge(&conflict, outcome).await,
            ResolutionStrategy::Skip => {
                debug!(conflict_id = %id, "Skip - conflict left open");
                ResolutionOutcome {
                    success: true,
                    ..outcome
                }
            }
        }
    }

    /// Finishes a manual merge by treating `authoritative` as the kept side
    ///
    /// The conflict is recorded as resolved by manual merge.
    pub async fn complete_manual_merge(
        &self,
        id: &ConflictId,
        authoritative: Side,
    ) -> ResolutionOutcome {
        let strategy = ResolutionStrategy::ManualMerge;
        let outcome = ResolutionOutcome::new(*id, strategy);
        match self.open_conflict(id).await {
            Ok(conflict) => {
                self.apply_keep(&conflict, authoritative, strategy, outcome)
                    .await
            }
            Err(e) => outcome.failed(e),
        }
    }

    /// Builds the side-by-side preview for a conflict
    ///
    /// # Errors
    /// Returns [`ConflictError::NotFound`] for unknown ids.
    pub async fn preview(&self, id: &ConflictId) -> Result<ConflictPreview, ConflictError> {
        let conflict = self
            .ledger
            .get(id)
            .await?
            .ok_or_else(|| ConflictError::NotFound(id.to_string()))?;
        ConflictPreview::load(&conflict).await
    }

    async fn open_conflict(&self, id: &ConflictId) -> Result<ConflictRecord, ConflictError> {
        let conflict = self
            .ledger
            .get(id)
            .await?
            .ok_or_else(|| ConflictError::NotFound(id.to_string()))?;
        if conflict.is_resolved() {
            return Err(ConflictError::AlreadyResolved(id.to_string()));
        }
        Ok(conflict)
    }

    async fn apply_manual_merge(
        &self,
        conflict: &ConflictRecord,
        mut outcome: ResolutionOutcome,
    ) -> ResolutionOutcome {
        for side in Side::ALL {
            match self.backups.create_backup(conflict.file(side)).await {
                Ok(Some(path)) => outcome.backups.push(path),
                Ok(None) => {}
                Err(e) => return outcome.failed(e),
            }
        }
        info!(
            conflict_id = %conflict.id(),
            backups = outcome.backups.len(),
            "Manual merge prepared; conflict stays open"
        );
        outcome.success = true;
        outcome
    }

    async fn apply_keep(
        &self,
        conflict: &ConflictRecord,
        kept: Side,
        recorded: ResolutionStrategy,
        mut outcome: ResolutionOutcome,
    ) -> ResolutionOutcome {
        let source = conflict.file(kept);
        let target = conflict.file(kept.opposite());

        match self.regenerate(kept, source, target, &mut outcome.backups).await {
            Ok(()) => outcome.regenerated = Some(target.to_path_buf()),
            Err(e) => {
                warn!(
                    conflict_id = %conflict.id(),
                    error = %format!("{e:#}"),
                    "Conflict resolution failed"
                );
                return outcome.failed(format!("{e:#}"));
            }
        }

        match self.ledger.mark_resolved(conflict.id(), recorded).await {
            Ok(_) => {
                info!(
                    conflict_id = %conflict.id(),
                    kept = %kept,
                    target = %target.display(),
                    "Conflict resolved successfully"
                );
                outcome.success = true;
                outcome.resolved = true;
                outcome
            }
            Err(e) => outcome.failed(format!("save conflict: {e:#}")),
        }
    }

    /// Converts `source`, stores its IR and regenerates `target` from it
    async fn regenerate(
        &self,
        kept: Side,
        source: &Path,
        target: &Path,
        backups: &mut Vec<PathBuf>,
    ) -> anyhow::Result<()> {
        let converter = self.converters.for_side(kept)?;
        let generator = self.converters.for_side(kept.opposite())?;

        let ir = converter.convert(kept, source).await?;
        let id = self.mapper.ir_id(kept, source)?;
        let fingerprint = Fingerprint::of_value(&ir);
        let stored = self.store.append_if_changed(&id, ir.clone(), fingerprint).await?;
        debug!(ir_id = %id, version = stored.record().version, "kept side stored");

        if let Some(backup) = self.backups.create_backup(target).await? {
            backups.push(backup);
        }
        generator.generate(kept.opposite(), &ir, target).await?;
        for observer in &self.observers {
            observer.file_written(target).await;
        }
        Ok(())
    }
}
