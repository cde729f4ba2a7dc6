//! Sync engine
//!
//! Consumes batches from the change queue. For each change:
//!
//! 1. edits on a read-only side and echoes of our own writes are skipped
//! 2. the conflict detector may hold the change
//! 3. deletions drop the cached IR, the stored record and the counterpart
//! 4. test files go through the best-effort test converter
//! 5. everything else is converted to IR, stored if the fingerprint changed,
//!    and regenerated on the opposite side
//!
//! Batches of at least `parallel_threshold` changes run on the worker pool.
//! Failures are isolated per change and reported as [`ChangeOutcome::Failed`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use irsync_conflict::{ConflictDetector, DetectionResult};
use irsync_core::config::{Config, EngineConfig};
use irsync_core::domain::{
    ConflictId, FileChangeEvent, Fingerprint, IrId, PathMapper, Side,
};
use irsync_core::ports::{ConverterRegistry, IIrStore, TestConversion};
use irsync_protocol::HotReloadHub;
use irsync_telemetry::SyncStatusTracker;

use crate::cache::ConversionCache;
use crate::echo::EchoGuard;
use crate::mode::ModeProfile;
use crate::pool::{ProgressReporter, WorkerPool};
use crate::queue::Batch;

// ============================================================================
// Outcomes
// ============================================================================

/// Why a change was not processed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The side is generated in the current mode
    ReadOnlySide,
    /// The event reports a file the engine itself wrote
    Echo,
}

/// Result of processing one change
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ChangeOutcome {
    /// A new IR version was stored and the counterpart regenerated
    Synced {
        source: PathBuf,
        target: PathBuf,
        ir_id: String,
        version: u64,
    },
    /// The IR fingerprint matched the stored version; nothing was written
    Unchanged {
        source: PathBuf,
        ir_id: String,
        version: u64,
    },
    /// A test file was converted, possibly to a stub
    TestConverted {
        source: PathBuf,
        target: PathBuf,
        stub: bool,
    },
    /// The source was removed; `target` is the counterpart that was deleted
    Deleted {
        source: PathBuf,
        target: Option<PathBuf>,
    },
    Skipped {
        source: PathBuf,
        reason: SkipReason,
    },
    /// Held by a conflict; `new` is false if the conflict already existed
    Conflicted {
        source: PathBuf,
        conflict_id: ConflictId,
        new: bool,
    },
    Failed {
        source: PathBuf,
        error: String,
    },
}

impl ChangeOutcome {
    pub fn source(&self) -> &Path {
        match self {
            ChangeOutcome::Synced { source, .. }
            | ChangeOutcome::Unchanged { source, .. }
            | ChangeOutcome::TestConverted { source, .. }
            | ChangeOutcome::Deleted { source, .. }
            | ChangeOutcome::Skipped { source, .. }
            | ChangeOutcome::Conflicted { source, .. }
            | ChangeOutcome::Failed { source, .. } => source,
        }
    }

    /// File written or removed on the opposite side, if any
    pub fn target(&self) -> Option<&Path> {
        match self {
            ChangeOutcome::Synced { target, .. } | ChangeOutcome::TestConverted { target, .. } => {
                Some(target)
            }
            ChangeOutcome::Deleted { target, .. } => target.as_deref(),
            _ => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, ChangeOutcome::Failed { .. })
    }

    pub fn is_conflicted(&self) -> bool {
        matches!(self, ChangeOutcome::Conflicted { .. })
    }
}

/// Outcomes of one batch, in batch order
#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    pub outcomes: Vec<ChangeOutcome>,
    pub parallel: bool,
    pub duration_ms: u64,
}

impl BatchSummary {
    fn count(&self, f: impl Fn(&ChangeOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|o| f(o)).count()
    }

    pub fn synced(&self) -> usize {
        self.count(|o| {
            matches!(
                o,
                ChangeOutcome::Synced { .. }
                    | ChangeOutcome::TestConverted { .. }
                    | ChangeOutcome::Deleted { .. }
            )
        })
    }

    pub fn unchanged(&self) -> usize {
        self.count(|o| matches!(o, ChangeOutcome::Unchanged { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, ChangeOutcome::Skipped { .. }))
    }

    pub fn conflicted(&self) -> usize {
        self.count(ChangeOutcome::is_conflicted)
    }

    pub fn failed(&self) -> usize {
        self.count(ChangeOutcome::is_failed)
    }
}

/// Result of the checks that run before anything is written
enum Admission {
    /// Safe to sync; `target` is the counterpart on the opposite side
    Ready { ir_id: IrId, target: PathBuf },
    /// Skipped, held or failed without syncing
    Settled(ChangeOutcome),
}

// ============================================================================
// SyncEngine
// ============================================================================

/// Batch thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    /// Batches at least this large use the worker pool
    pub parallel_threshold: usize,
    /// Batches larger than this report per-item progress
    pub progress_threshold: usize,
}

impl From<&EngineConfig> for EngineSettings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            parallel_threshold: config.parallel_threshold.max(1),
            progress_threshold: config.progress_threshold,
        }
    }
}

/// Converts changed files to IR and regenerates their counterparts
pub struct SyncEngine {
    mapper: PathMapper,
    converters: ConverterRegistry,
    store: Arc<dyn IIrStore>,
    detector: Arc<ConflictDetector>,
    tracker: Arc<SyncStatusTracker>,
    profile: ModeProfile,
    settings: EngineSettings,
    cache: Arc<ConversionCache>,
    echo: Arc<EchoGuard>,
    pool: WorkerPool,
    progress: Arc<ProgressReporter>,
    hub: Option<Arc<HotReloadHub>>,
    preserve_state: bool,
}

impl SyncEngine {
    /// Creates an engine with the services described by `config`
    ///
    /// The cache, echo guard, worker pool and progress reporter are built
    /// here; use the `with_*` methods to share existing ones.
    pub fn new(
        converters: ConverterRegistry,
        store: Arc<dyn IIrStore>,
        detector: Arc<ConflictDetector>,
        tracker: Arc<SyncStatusTracker>,
        config: &Config,
    ) -> Self {
        Self {
            mapper: config.path_mapper(),
            converters,
            store,
            detector,
            tracker,
            profile: ModeProfile::from_config(config),
            settings: EngineSettings::from(&config.engine),
            cache: Arc::new(ConversionCache::new(config.engine.cache_max_entries)),
            echo: Arc::new(EchoGuard::new(Duration::from_millis(config.engine.echo_ttl_ms))),
            pool: WorkerPool::new(config.engine.max_workers),
            progress: Arc::new(ProgressReporter::new()),
            hub: None,
            preserve_state: config.protocol.preserve_state,
        }
    }

    pub fn with_cache(mut self, cache: Arc<ConversionCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_echo_guard(mut self, echo: Arc<EchoGuard>) -> Self {
        self.echo = echo;
        self
    }

    pub fn with_progress(mut self, progress: Arc<ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    /// Publishes every new IR version to hot-reload clients
    pub fn with_hub(mut self, hub: Arc<HotReloadHub>) -> Self {
        self.hub = Some(hub);
        self
    }

    pub fn mapper(&self) -> &PathMapper {
        &self.mapper
    }

    pub fn profile(&self) -> &ModeProfile {
        &self.profile
    }

    pub fn cache(&self) -> &Arc<ConversionCache> {
        &self.cache
    }

    pub fn echo_guard(&self) -> &Arc<EchoGuard> {
        &self.echo
    }

    pub fn progress(&self) -> &Arc<ProgressReporter> {
        &self.progress
    }

    // ========================================================================
    // Batches
    // ========================================================================

    /// Processes a batch, in parallel when it is large enough
    ///
    /// Every change is admitted (read-only, echo and conflict checks) before
    /// any counterpart is written, so two sides of a pair edited in the same
    /// batch are both held as a conflict.
    pub async fn process_batch(self: &Arc<Self>, batch: Batch) -> BatchSummary {
        let started = Instant::now();
        let total = batch.len();
        let parallel = total > 1 && total >= self.settings.parallel_threshold;
        let progress =
            (total > self.settings.progress_threshold).then(|| self.progress.begin(total));
        let events: Vec<FileChangeEvent> = batch.into_iter().map(|c| c.event).collect();
        let admissions = self.admit_batch(&events).await;

        let outcomes = if parallel {
            let sources: Vec<PathBuf> = events.iter().map(|e| e.path().to_path_buf()).collect();
            let items: Vec<(FileChangeEvent, Admission)> =
                events.into_iter().zip(admissions).collect();
            let results = self
                .pool
                .run(items, |(event, admission)| {
                    let engine = Arc::clone(self);
                    let progress = progress.clone();
                    async move {
                        let outcome = engine.finish_change(&event, admission).await;
                        if let Some(progress) = &progress {
                            progress.item_done(event.path().to_path_buf(), !outcome.is_failed());
                        }
                        outcome
                    }
                })
                .await;
            results
                .into_iter()
                .zip(sources)
                .map(|(result, source)| {
                    result.unwrap_or_else(|e| ChangeOutcome::Failed {
                        source,
                        error: e.to_string(),
                    })
                })
                .collect()
        } else {
            let mut outcomes = Vec::with_capacity(total);
            for (event, admission) in events.iter().zip(admissions) {
                let outcome = self.finish_change(event, admission).await;
                if let Some(progress) = &progress {
                    progress.item_done(event.path().to_path_buf(), !outcome.is_failed());
                }
                outcomes.push(outcome);
            }
            outcomes
        };

        let summary = BatchSummary {
            outcomes,
            parallel,
            duration_ms: started.elapsed().as_millis() as u64,
        };
        info!(
            total,
            parallel,
            synced = summary.synced(),
            unchanged = summary.unchanged(),
            skipped = summary.skipped(),
            conflicted = summary.conflicted(),
            failed = summary.failed(),
            duration_ms = summary.duration_ms,
            "Batch processed"
        );
        summary
    }

    /// Admits every change of a batch, holding both files of a conflicted pair
    async fn admit_batch(&self, events: &[FileChangeEvent]) -> Vec<Admission> {
        let mut admissions = Vec::with_capacity(events.len());
        for event in events {
            admissions.push(self.admit(event).await);
        }

        let conflicted: HashMap<PathBuf, ConflictId> = admissions
            .iter()
            .filter_map(|admission| match admission {
                Admission::Settled(ChangeOutcome::Conflicted {
                    source,
                    conflict_id,
                    ..
                }) => Some((source.clone(), *conflict_id)),
                _ => None,
            })
            .collect();
        if conflicted.is_empty() {
            return admissions;
        }

        events
            .iter()
            .zip(admissions)
            .map(|(event, admission)| match admission {
                Admission::Ready { target, .. } if conflicted.contains_key(&target) => {
                    let conflict_id = conflicted[&target];
                    info!(
                        path = %event.path().display(),
                        %conflict_id,
                        "Counterpart conflicted in the same batch; holding change"
                    );
                    Admission::Settled(ChangeOutcome::Conflicted {
                        source: event.path().to_path_buf(),
                        conflict_id,
                        new: false,
                    })
                }
                other => other,
            })
            .collect()
    }

    // ========================================================================
    // Single changes
    // ========================================================================

    /// Processes one change; never fails, errors become [`ChangeOutcome::Failed`]
    #[instrument(skip(self, event), fields(path = %event.path().display(), side = %event.side(), kind = %event.kind()))]
    pub async fn process_change(&self, event: &FileChangeEvent) -> ChangeOutcome {
        let admission = self.admit(event).await;
        self.finish_change(event, admission).await
    }

    /// Decides whether `event` may be synced, without writing anything
    async fn admit(&self, event: &FileChangeEvent) -> Admission {
        let source = event.path().to_path_buf();
        let side = event.side();

        if let Some(reason) = self.profile.rejection(side) {
            warn!(path = %source.display(), %reason, "Skipping edit on read-only side");
            return Admission::Settled(ChangeOutcome::Skipped {
                source,
                reason: SkipReason::ReadOnlySide,
            });
        }
        if self.echo.is_echo(event).await {
            return Admission::Settled(ChangeOutcome::Skipped {
                source,
                reason: SkipReason::Echo,
            });
        }

        let located = self
            .mapper
            .ir_id(side, &source)
            .and_then(|id| Ok((id, self.mapper.counterpart(side, &source)?)));
        let (ir_id, target) = match located {
            Ok(located) => located,
            Err(e) => return Admission::Settled(self.fail_untracked(source, side, &e.to_string())),
        };

        match self.check_conflict(event, &ir_id, &target).await {
            Some(held) => Admission::Settled(held),
            None => Admission::Ready { ir_id, target },
        }
    }

    /// Syncs an admitted change under a tracked operation
    async fn finish_change(&self, event: &FileChangeEvent, admission: Admission) -> ChangeOutcome {
        let (ir_id, target) = match admission {
            Admission::Settled(outcome) => return outcome,
            Admission::Ready { ir_id, target } => (ir_id, target),
        };
        let source = event.path().to_path_buf();
        let side = event.side();

        let operation = self.tracker.start_operation(source.clone(), side);
        if let Err(e) = self.tracker.mark_processing(&operation) {
            debug!(error = %e, "operation already left pending");
        }

        let result = if event.kind().is_delete() {
            self.sync_delete(&source, &ir_id, &target).await
        } else if PathMapper::is_test_file(&source) {
            self.sync_test(&source, side, &target).await
        } else {
            self.sync_file(&source, side, &ir_id, &target).await
        };

        match result {
            Ok(outcome) => {
                let target = outcome.target().map(Path::to_path_buf);
                if let Err(e) = self.tracker.complete_operation(&operation, target) {
                    warn!(error = %e, "Failed to record completed operation");
                }
                outcome
            }
            Err(e) => {
                let error = format!("{e:#}");
                warn!(path = %source.display(), %error, "Sync failed");
                if let Err(e) = self.tracker.fail_operation(&operation, &error) {
                    warn!(error = %e, "Failed to record failed operation");
                }
                ChangeOutcome::Failed { source, error }
            }
        }
    }

    /// Returns the held outcome if the change must not be synced
    async fn check_conflict(
        &self,
        event: &FileChangeEvent,
        ir_id: &IrId,
        target: &Path,
    ) -> Option<ChangeOutcome> {
        if !self.detector.is_enabled() {
            return None;
        }
        let ir_version = match self.store.latest(ir_id).await {
            Ok(record) => record.map(|r| r.version),
            Err(e) => {
                warn!(%ir_id, error = %e, "Cannot read latest IR version");
                None
            }
        };

        let source = event.path().to_path_buf();
        match self.detector.check(event, target, ir_version).await {
            Ok(DetectionResult::NoConflict) => None,
            Ok(DetectionResult::Conflicted(conflict)) => {
                self.tracker.record_conflict(conflict.id());
                Some(ChangeOutcome::Conflicted {
                    source,
                    conflict_id: *conflict.id(),
                    new: true,
                })
            }
            Ok(DetectionResult::AlreadyConflicted(conflict_id)) => {
                Some(ChangeOutcome::Conflicted {
                    source,
                    conflict_id,
                    new: false,
                })
            }
            Err(e) => Some(self.fail_untracked(
                source,
                event.side(),
                &format!("conflict check failed: {e}"),
            )),
        }
    }

    /// Records a failure that happened before an operation was started
    fn fail_untracked(&self, source: PathBuf, side: Side, error: &str) -> ChangeOutcome {
        warn!(path = %source.display(), %error, "Sync failed");
        let operation = self.tracker.start_operation(source.clone(), side);
        if let Err(e) = self.tracker.fail_operation(&operation, error) {
            warn!(error = %e, "Failed to record failed operation");
        }
        ChangeOutcome::Failed {
            source,
            error: error.to_string(),
        }
    }

    async fn sync_delete(
        &self,
        source: &Path,
        ir_id: &IrId,
        target: &Path,
    ) -> anyhow::Result<ChangeOutcome> {
        self.cache.invalidate(source);
        let had_record = self
            .store
            .delete(ir_id)
            .await
            .with_context(|| format!("Failed to delete IR {ir_id}"))?;

        self.echo.record_deleted(target.to_path_buf());
        let removed = match tokio::fs::remove_file(target).await {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to delete {}", target.display()))
            }
        };
        if let Some(hub) = &self.hub {
            hub.forget(ir_id.as_str());
        }

        info!(%ir_id, had_record, target = %target.display(), removed, "Source deleted");
        Ok(ChangeOutcome::Deleted {
            source: source.to_path_buf(),
            target: removed.then(|| target.to_path_buf()),
        })
    }

    async fn sync_test(
        &self,
        source: &Path,
        side: Side,
        target: &Path,
    ) -> anyhow::Result<ChangeOutcome> {
        let conversion = match self.converters.test_converter() {
            Some(converter) => converter.convert_test(side, source).await,
            None => TestConversion::stub(source, "no test converter registered"),
        };
        if let TestConversion::Stub { reason, .. } = &conversion {
            warn!(path = %source.display(), %reason, "Emitting stub test");
        }

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        tokio::fs::write(target, conversion.content())
            .await
            .with_context(|| format!("Failed to write {}", target.display()))?;
        self.echo
            .record_content(target.to_path_buf(), conversion.content().as_bytes());

        info!(target = %target.display(), stub = conversion.is_stub(), "Test converted");
        Ok(ChangeOutcome::TestConverted {
            source: source.to_path_buf(),
            target: target.to_path_buf(),
            stub: conversion.is_stub(),
        })
    }

    async fn sync_file(
        &self,
        source: &Path,
        side: Side,
        ir_id: &IrId,
        target: &Path,
    ) -> anyhow::Result<ChangeOutcome> {
        let bytes = tokio::fs::read(source)
            .await
            .with_context(|| format!("Failed to read {}", source.display()))?;
        let source_fingerprint = Fingerprint::of_bytes(&bytes);

        let ir = match self.cache.get(source, &source_fingerprint) {
            Some(ir) => ir,
            None => {
                let converter = self.converters.for_side(side)?;
                let ir = converter
                    .convert(side, source)
                    .await
                    .with_context(|| format!("Failed to convert {}", source.display()))?;
                self.cache
                    .insert(source.to_path_buf(), source_fingerprint, ir.clone());
                ir
            }
        };

        let fingerprint = Fingerprint::of_value(&ir);
        let stored = self
            .store
            .append_if_changed(ir_id, ir.clone(), fingerprint)
            .await
            .with_context(|| format!("Failed to store IR {ir_id}"))?;
        let version = stored.record().version;

        let target_exists = tokio::fs::try_exists(target).await.unwrap_or(false);
        if !stored.is_appended() && target_exists {
            debug!(%ir_id, version, "IR unchanged; counterpart left alone");
            return Ok(ChangeOutcome::Unchanged {
                source: source.to_path_buf(),
                ir_id: ir_id.to_string(),
                version,
            });
        }

        let target_side = side.opposite();
        let generator = self.converters.for_side(target_side)?;
        generator
            .generate(target_side, &ir, target)
            .await
            .with_context(|| format!("Failed to generate {}", target.display()))?;
        self.echo.record_written(target).await;

        if let Some(hub) = &self.hub {
            hub.push(ir_id.as_str(), version, &ir, self.preserve_state);
        }

        info!(%ir_id, version, target = %target.display(), "Counterpart regenerated");
        Ok(ChangeOutcome::Synced {
            source: source.to_path_buf(),
            target: target.to_path_buf(),
            ir_id: ir_id.to_string(),
            version,
        })
    }
}
