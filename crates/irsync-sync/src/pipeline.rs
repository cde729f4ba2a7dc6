//! Sync pipeline
//!
//! Owns the change source, change queue, sync engine, conflict detector,
//! conflict resolver and status tracker, and runs them as two tasks:
//!
//! ```text
//! ChangeSource ──events──▶ forward task ──enqueue──▶ ChangeQueue
//! ChangeQueue ──batches──▶ engine task ──▶ SyncEngine::process_batch
//! ```
//!
//! [`SyncPipeline::stop`] tears down in order: the source stops (no more
//! timers), the forward task drains, the queue flushes and closes, and the
//! engine task finishes the last batch.

use std::path::Path;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use irsync_conflict::{
    BackupManager, ConflictDetector, ConflictHandler, ConflictPreview, ConflictResolver,
    ResolutionOutcome,
};
use irsync_core::config::Config;
use irsync_core::domain::{
    ConflictId, ConflictKind, ConflictRecord, FileChangeEvent, ResolutionStrategy, Side,
};
use irsync_core::ports::{ConverterRegistry, IConflictLedger, IIrStore};
use irsync_protocol::HotReloadHub;
use irsync_store::{JsonConflictLedger, JsonIrStore};
use irsync_telemetry::{MetricsRegistry, StatusHandler, StatusSnapshot, SyncStatusTracker};

use crate::engine::{BatchSummary, SyncEngine};
use crate::mode::ModeProfile;
use crate::pool::ProgressUpdate;
use crate::queue::{Batch, ChangeQueue, QueueSettings};
use crate::watcher::{ChangeSource, FileWatcher};
use crate::SyncError;

/// Batch summaries buffered for slow subscribers
const SUMMARY_BUFFER: usize = 64;

// ============================================================================
// Builder
// ============================================================================

/// Assembles a [`SyncPipeline`]
///
/// Anything not supplied is built from the configuration: JSON stores under
/// `storage.dir` and a [`FileWatcher`] over both sides.
pub struct SyncPipelineBuilder {
    config: Config,
    converters: ConverterRegistry,
    store: Option<Arc<dyn IIrStore>>,
    ledger: Option<Arc<dyn IConflictLedger>>,
    source: Option<Box<dyn ChangeSource>>,
    metrics: Option<Arc<MetricsRegistry>>,
    hub: Option<Arc<HotReloadHub>>,
}

impl SyncPipelineBuilder {
    pub fn store(mut self, store: Arc<dyn IIrStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn ledger(mut self, ledger: Arc<dyn IConflictLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// Replaces the file watcher, e.g. with a `ManualChangeSource`
    pub fn change_source(mut self, source: impl ChangeSource + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn hot_reload(mut self, hub: Arc<HotReloadHub>) -> Self {
        self.hub = Some(hub);
        self
    }

    /// Opens missing stores and wires every component together
    ///
    /// # Errors
    /// Returns [`SyncError::Store`] if a store cannot be opened and
    /// [`SyncError::Config`] for invalid watch patterns.
    pub async fn build(self) -> Result<SyncPipeline, SyncError> {
        let config = self.config;

        let store: Arc<dyn IIrStore> = match self.store {
            Some(store) => store,
            None => Arc::new(
                JsonIrStore::open(&config.storage.ir_dir(), config.storage.ir_history_limit)
                    .await?,
            ),
        };
        let ledger: Arc<dyn IConflictLedger> = match self.ledger {
            Some(ledger) => ledger,
            None => Arc::new(JsonConflictLedger::open(&config.storage.conflicts_file()).await?),
        };
        let source: Box<dyn ChangeSource> = match self.source {
            Some(source) => source,
            None => Box::new(FileWatcher::from_config(&config)?),
        };

        let profile = ModeProfile::from_config(&config);
        let detector = Arc::new(ConflictDetector::new(
            profile.conflict_window_ms(),
            Arc::clone(&ledger),
        ));

        let mut tracker = SyncStatusTracker::new(config.status.history_cap);
        if let Some(metrics) = &self.metrics {
            tracker = tracker.with_metrics(Arc::clone(metrics));
        }
        let open = ledger.unresolved().await?;
        if !open.is_empty() {
            info!(open = open.len(), "Restoring unresolved conflicts");
        }
        tracker.restore_open_conflicts(open.iter().map(|c| *c.id()));
        let tracker = Arc::new(tracker);

        let mut engine = SyncEngine::new(
            self.converters.clone(),
            Arc::clone(&store),
            Arc::clone(&detector),
            Arc::clone(&tracker),
            &config,
        );
        if let Some(hub) = &self.hub {
            engine = engine.with_hub(Arc::clone(hub));
        }
        let engine = Arc::new(engine);

        let resolver = ConflictResolver::new(
            ledger,
            Arc::clone(&store),
            self.converters,
            config.path_mapper(),
            BackupManager::new(config.conflicts.backup_retention),
        )
        .with_write_observer(engine.echo_guard().clone());

        info!(mode = %profile.describe(), "Sync pipeline built");
        let (summaries, _) = broadcast::channel(SUMMARY_BUFFER);
        Ok(SyncPipeline {
            config,
            profile,
            store,
            detector,
            resolver,
            tracker,
            engine,
            metrics: self.metrics,
            source: Mutex::new(source),
            running: Mutex::new(None),
            summaries,
        })
    }
}

// ============================================================================
// SyncPipeline
// ============================================================================

struct Running {
    queue: Arc<ChangeQueue>,
    forward: JoinHandle<()>,
    worker: JoinHandle<()>,
}

/// Watcher, queue and engine with a start/stop lifecycle
pub struct SyncPipeline {
    config: Config,
    profile: ModeProfile,
    store: Arc<dyn IIrStore>,
    detector: Arc<ConflictDetector>,
    resolver: ConflictResolver,
    tracker: Arc<SyncStatusTracker>,
    engine: Arc<SyncEngine>,
    metrics: Option<Arc<MetricsRegistry>>,
    source: Mutex<Box<dyn ChangeSource>>,
    running: Mutex<Option<Running>>,
    summaries: broadcast::Sender<BatchSummary>,
}

impl SyncPipeline {
    pub fn builder(config: Config, converters: ConverterRegistry) -> SyncPipelineBuilder {
        SyncPipelineBuilder {
            config,
            converters,
            store: None,
            ledger: None,
            source: None,
            metrics: None,
            hub: None,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn profile(&self) -> &ModeProfile {
        &self.profile
    }

    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    pub fn tracker(&self) -> &Arc<SyncStatusTracker> {
        &self.tracker
    }

    pub fn store(&self) -> &Arc<dyn IIrStore> {
        &self.store
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Starts watching and syncing
    ///
    /// # Errors
    /// Returns [`SyncError::AlreadyRunning`] on a second call, or the change
    /// source's error if it cannot start.
    #[instrument(skip(self))]
    pub async fn start(&self) -> Result<(), SyncError> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(SyncError::AlreadyRunning);
        }

        let events = {
            let mut source = self.source.lock().await;
            let events = source.subscribe();
            source.start().await?;
            events
        };

        let queue = Arc::new(ChangeQueue::start(
            QueueSettings::from(&self.config.queue),
            self.metrics.clone(),
        ));
        let batches = queue.subscribe();

        let forward = tokio::spawn(forward_events(events, Arc::clone(&queue)));
        let worker = tokio::spawn(run_batches(
            batches,
            Arc::clone(&self.engine),
            self.summaries.clone(),
        ));

        self.tracker.start_watching();
        *running = Some(Running {
            queue,
            forward,
            worker,
        });
        info!(mode = %self.profile.mode(), "Sync pipeline started");
        Ok(())
    }

    /// Stops watching, syncs whatever is still queued, then goes idle
    ///
    /// # Errors
    /// Returns [`SyncError::NotRunning`] if the pipeline was not started.
    #[instrument(skip(self))]
    pub async fn stop(&self) -> Result<(), SyncError> {
        let Some(running) = self.running.lock().await.take() else {
            return Err(SyncError::NotRunning);
        };

        if let Err(e) = self.source.lock().await.stop().await {
            warn!(error = %e, "Change source did not stop cleanly");
        }
        if let Err(e) = running.forward.await {
            warn!(error = %e, "Event forwarder failed");
        }
        match running.queue.close().await {
            Ok(flushed) => debug!(flushed, "change queue closed"),
            Err(e) => warn!(error = %e, "Change queue already closed"),
        }
        if let Err(e) = running.worker.await {
            warn!(error = %e, "Engine task failed");
        }

        self.tracker.stop();
        info!("Sync pipeline stopped");
        Ok(())
    }

    /// Queues a change as if the watcher had reported it
    ///
    /// # Errors
    /// Returns [`SyncError::NotRunning`] if the pipeline was not started.
    pub async fn inject(&self, event: FileChangeEvent) -> Result<(), SyncError> {
        match self.running.lock().await.as_ref() {
            Some(running) => running.queue.enqueue(event),
            None => Err(SyncError::NotRunning),
        }
    }

    /// Dispatches queued changes without waiting for the batch delay
    ///
    /// # Errors
    /// Returns [`SyncError::NotRunning`] if the pipeline was not started.
    pub async fn flush(&self) -> Result<usize, SyncError> {
        let queue = match self.running.lock().await.as_ref() {
            Some(running) => Arc::clone(&running.queue),
            None => return Err(SyncError::NotRunning),
        };
        queue.flush().await
    }

    // ========================================================================
    // Subscriptions
    // ========================================================================

    pub fn on_status_update(&self, handler: StatusHandler) {
        self.tracker.on_status_update(handler);
    }

    pub fn on_conflict(&self, handler: ConflictHandler) {
        self.detector.on_conflict(handler);
    }

    pub fn subscribe_progress(&self) -> broadcast::Receiver<ProgressUpdate> {
        self.engine.progress().subscribe()
    }

    /// Summary of every processed batch
    pub fn subscribe_batches(&self) -> broadcast::Receiver<BatchSummary> {
        self.summaries.subscribe()
    }

    pub fn status(&self) -> StatusSnapshot {
        self.tracker.snapshot()
    }

    // ========================================================================
    // Conflicts
    // ========================================================================

    /// Unresolved conflicts, oldest first
    ///
    /// # Errors
    /// Returns [`SyncError::Conflict`] if the ledger cannot be read.
    pub async fn get_unresolved_conflicts(&self) -> Result<Vec<ConflictRecord>, SyncError> {
        Ok(self.resolver.unresolved().await?)
    }

    /// Applies `strategy` to conflict `id`
    pub async fn resolve_conflict(
        &self,
        id: &ConflictId,
        strategy: ResolutionStrategy,
    ) -> ResolutionOutcome {
        let outcome = self.resolver.resolve(id, strategy).await;
        self.after_resolution(&outcome).await;
        outcome
    }

    /// Finishes a manual merge with `authoritative` as the kept side
    pub async fn complete_manual_merge(
        &self,
        id: &ConflictId,
        authoritative: Side,
    ) -> ResolutionOutcome {
        let outcome = self.resolver.complete_manual_merge(id, authoritative).await;
        self.after_resolution(&outcome).await;
        outcome
    }

    /// # Errors
    /// Returns [`SyncError::Conflict`] for unknown ids or unreadable files.
    pub async fn preview_conflict(&self, id: &ConflictId) -> Result<ConflictPreview, SyncError> {
        Ok(self.resolver.preview(id).await?)
    }

    /// Checks a file pair by modification time and IR version history
    ///
    /// # Errors
    /// Returns an error if the path is outside side A or a lookup fails.
    pub async fn audit(&self, side_a_file: &Path) -> Result<Option<ConflictKind>, SyncError> {
        Ok(self
            .detector
            .audit(self.store.as_ref(), self.engine.mapper(), side_a_file)
            .await?)
    }

    async fn after_resolution(&self, outcome: &ResolutionOutcome) {
        if !outcome.resolved {
            return;
        }
        if let Some(metrics) = &self.metrics {
            metrics.record_conflict(&outcome.strategy.to_string());
        }
        self.tracker.conflict_resolved(&outcome.conflict_id);
        debug!(
            open = self.tracker.open_conflicts(),
            "conflict resolution recorded"
        );
    }
}

// ============================================================================
// Tasks
// ============================================================================

async fn forward_events(mut events: mpsc::Receiver<FileChangeEvent>, queue: Arc<ChangeQueue>) {
    while let Some(event) = events.recv().await {
        if let Err(e) = queue.enqueue(event) {
            warn!(error = %e, "Dropping change");
            break;
        }
    }
    debug!("event forwarder finished");
}

async fn run_batches(
    mut batches: mpsc::Receiver<Batch>,
    engine: Arc<SyncEngine>,
    summaries: broadcast::Sender<BatchSummary>,
) {
    while let Some(batch) = batches.recv().await {
        let summary = engine.process_batch(batch).await;
        let purged = engine.echo_guard().purge_expired();
        if purged > 0 {
            debug!(purged, "expired echo records dropped");
        }
        // No subscribers is fine
        let _ = summaries.send(summary);
    }
    debug!("engine task finished");
}
