//! Sync status tracker
//!
//! An observable state machine fed by the operation lifecycle of the sync
//! engine.
//!
//! ## State Machine
//!
//! ```text
//! Idle ──► Watching ──► Syncing ──► Watching   (last in-flight op succeeded)
//!                          │    └──► Error      (any op failed)
//!                          └───────► Conflict   (conflict recorded)
//! ```
//!
//! While any recorded conflict is still open the settled state is `Conflict`
//! instead of `Watching`.
//!
//! Every transition and every finished operation is broadcast to subscribed
//! handlers. Handler errors and panics are logged and swallowed.

use std::collections::{HashMap, HashSet, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use irsync_core::domain::{ConflictId, OperationId, OperationStatus, Side, SyncOperation};

use crate::metrics::MetricsRegistry;
use crate::TelemetryError;

/// Default number of finished operations retained
pub const DEFAULT_HISTORY_CAP: usize = 100;

/// Smoothing factor of the running average latency
const LATENCY_ALPHA: f64 = 0.1;

/// Overall pipeline state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    #[default]
    Idle,
    Watching,
    Syncing,
    Error,
    Conflict,
}

impl SyncState {
    pub fn as_str(self) -> &'static str {
        match self {
            SyncState::Idle => "idle",
            SyncState::Watching => "watching",
            SyncState::Syncing => "syncing",
            SyncState::Error => "error",
            SyncState::Conflict => "conflict",
        }
    }
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Running counters
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncStatistics {
    pub total: u64,
    pub successful: u64,
    pub failed: u64,
    pub conflicts: u64,
    /// Exponential moving average of operation latency
    pub average_latency_ms: f64,
}

impl SyncStatistics {
    /// Folds one latency sample into the running average
    ///
    /// The first sample seeds the average.
    pub fn record_latency(&mut self, sample_ms: f64) {
        if self.successful + self.failed <= 1 {
            self.average_latency_ms = sample_ms;
        } else {
            self.average_latency_ms =
                LATENCY_ALPHA * sample_ms + (1.0 - LATENCY_ALPHA) * self.average_latency_ms;
        }
    }
}

/// What triggered a status event
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StatusChange {
    StateChanged { from: SyncState, to: SyncState },
    OperationStarted { operation: OperationId },
    OperationFinished { operation: Box<SyncOperation> },
    ConflictRecorded { conflict: ConflictId },
}

/// Payload delivered to status handlers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusEvent {
    pub timestamp: DateTime<Utc>,
    pub state: SyncState,
    pub change: StatusChange,
    pub message: Option<String>,
    pub statistics: SyncStatistics,
}

/// Point-in-time view of the tracker
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub state: SyncState,
    pub statistics: SyncStatistics,
    pub in_flight: usize,
    pub last_error: Option<String>,
}

/// Callback invoked for every status event
pub type StatusHandler = Arc<dyn Fn(&StatusEvent) -> anyhow::Result<()> + Send + Sync>;

#[derive(Default)]
struct TrackerState {
    state: SyncState,
    active: HashMap<OperationId, SyncOperation>,
    history: VecDeque<SyncOperation>,
    stats: SyncStatistics,
    last_error: Option<String>,
    open_conflicts: HashSet<ConflictId>,
}

impl TrackerState {
    /// State to rest in when nothing is in flight
    fn settled(&self) -> SyncState {
        if self.open_conflicts.is_empty() {
            SyncState::Watching
        } else {
            SyncState::Conflict
        }
    }
}

/// Aggregates operation lifecycles into a state and running statistics
pub struct SyncStatusTracker {
    inner: Mutex<TrackerState>,
    handlers: RwLock<Vec<StatusHandler>>,
    history_cap: usize,
    metrics: Option<Arc<MetricsRegistry>>,
}

impl SyncStatusTracker {
    pub fn new(history_cap: usize) -> Self {
        Self {
            inner: Mutex::new(TrackerState::default()),
            handlers: RwLock::new(Vec::new()),
            history_cap: history_cap.max(1),
            metrics: None,
        }
    }

    /// Also feeds every finished operation into `metrics`
    pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Subscribes a handler to every status event
    pub fn on_status_update(&self, handler: StatusHandler) {
        self.handlers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(handler);
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn state(&self) -> SyncState {
        self.lock().state
    }

    pub fn statistics(&self) -> SyncStatistics {
        self.lock().stats.clone()
    }

    /// Finished operations, oldest first
    pub fn history(&self) -> Vec<SyncOperation> {
        self.lock().history.iter().cloned().collect()
    }

    pub fn in_flight(&self) -> usize {
        self.lock().active.len()
    }

    /// Conflicts recorded and not yet resolved
    pub fn open_conflicts(&self) -> usize {
        self.lock().open_conflicts.len()
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        let inner = self.lock();
        StatusSnapshot {
            state: inner.state,
            statistics: inner.stats.clone(),
            in_flight: inner.active.len(),
            last_error: inner.last_error.clone(),
        }
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// The watcher is running; rests in `Conflict` if any conflict is open
    pub fn start_watching(&self) {
        let settled = self.lock().settled();
        self.transition(settled, None);
    }

    /// The pipeline stopped; in-flight operations are forgotten
    pub fn stop(&self) {
        self.lock().active.clear();
        self.transition(SyncState::Idle, None);
    }

    /// Creates a pending operation for `source` and moves to `Syncing`
    pub fn start_operation(&self, source: PathBuf, side: Side) -> OperationId {
        let operation = SyncOperation::new(source, side);
        let id = *operation.id();
        let in_flight = {
            let mut inner = self.lock();
            inner.active.insert(id, operation);
            inner.active.len()
        };
        if let Some(metrics) = &self.metrics {
            metrics.set_in_flight(in_flight as i64);
        }
        self.emit(StatusChange::OperationStarted { operation: id }, None);
        self.transition(SyncState::Syncing, None);
        id
    }

    /// Moves a pending operation to `Processing`
    ///
    /// # Errors
    /// Returns [`TelemetryError::UnknownOperation`] or a transition error.
    pub fn mark_processing(&self, id: &OperationId) -> Result<(), TelemetryError> {
        let mut inner = self.lock();
        let operation = inner
            .active
            .get_mut(id)
            .ok_or(TelemetryError::UnknownOperation(*id))?;
        operation.start_processing()?;
        Ok(())
    }

    /// Records a successful operation
    ///
    /// # Errors
    /// Returns [`TelemetryError::UnknownOperation`] for ids not in flight.
    pub fn complete_operation(
        &self,
        id: &OperationId,
        target: Option<PathBuf>,
    ) -> Result<(), TelemetryError> {
        self.finish(id, Ok(target))
    }

    /// Records a failed operation and moves to `Error`
    ///
    /// # Errors
    /// Returns [`TelemetryError::UnknownOperation`] for ids not in flight.
    pub fn fail_operation(&self, id: &OperationId, error: &str) -> Result<(), TelemetryError> {
        self.finish(id, Err(error.to_string()))
    }

    /// Registers conflicts left open by an earlier run without counting them
    pub fn restore_open_conflicts(&self, conflicts: impl IntoIterator<Item = ConflictId>) {
        self.lock().open_conflicts.extend(conflicts);
    }

    /// Forgets a resolved conflict; returns to `Watching` once none remain
    pub fn conflict_resolved(&self, conflict: &ConflictId) {
        let next = {
            let mut inner = self.lock();
            if !inner.open_conflicts.remove(conflict) {
                return;
            }
            let resting = inner.active.is_empty() && inner.state == SyncState::Conflict;
            resting.then(|| inner.settled())
        };
        if let Some(next) = next {
            self.transition(next, None);
        }
    }

    /// Counts a conflict and moves to `Conflict`
    pub fn record_conflict(&self, conflict: &ConflictId) {
        {
            let mut inner = self.lock();
            inner.stats.conflicts += 1;
            inner.open_conflicts.insert(*conflict);
        }
        if let Some(metrics) = &self.metrics {
            metrics.record_conflict("detected");
        }
        self.emit(StatusChange::ConflictRecorded { conflict: *conflict }, None);
        self.transition(
            SyncState::Conflict,
            Some(format!("conflict {conflict} needs resolution")),
        );
    }

    fn finish(
        &self,
        id: &OperationId,
        result: Result<Option<PathBuf>, String>,
    ) -> Result<(), TelemetryError> {
        let (operation, remaining) = {
            let mut inner = self.lock();
            let mut operation = inner
                .active
                .remove(id)
                .ok_or(TelemetryError::UnknownOperation(*id))?;

            if operation.status() == OperationStatus::Pending && result.is_ok() {
                operation.start_processing()?;
            }
            match &result {
                Ok(target) => operation.complete(target.clone())?,
                Err(error) => operation.fail(error.clone())?,
            }

            inner.stats.total += 1;
            match &result {
                Ok(_) => inner.stats.successful += 1,
                Err(error) => {
                    inner.stats.failed += 1;
                    inner.last_error = Some(error.clone());
                }
            }
            if let Some(duration) = operation.duration() {
                inner
                    .stats
                    .record_latency(duration.num_microseconds().unwrap_or(i64::MAX) as f64 / 1000.0);
            }

            inner.history.push_back(operation.clone());
            while inner.history.len() > self.history_cap {
                inner.history.pop_front();
            }
            (operation, inner.active.len())
        };

        if let Some(metrics) = &self.metrics {
            metrics.record_sync_operation(operation.side().as_str(), operation.status().name());
            metrics.set_in_flight(remaining as i64);
            if let Some(duration) = operation.duration() {
                metrics.observe_sync_duration(
                    operation.side().as_str(),
                    duration.num_milliseconds() as f64 / 1000.0,
                );
            }
        }

        let error = operation.error().map(str::to_owned);
        debug!(
            operation_id = %id,
            status = %operation.status(),
            remaining,
            "operation finished"
        );
        self.emit(
            StatusChange::OperationFinished {
                operation: Box::new(operation),
            },
            error.clone(),
        );

        if let Some(error) = error {
            self.transition(SyncState::Error, Some(error));
        } else if remaining == 0 {
            let settled = {
                let inner = self.lock();
                (inner.state == SyncState::Syncing).then(|| inner.settled())
            };
            if let Some(settled) = settled {
                self.transition(settled, None);
            }
        }
        Ok(())
    }

    fn transition(&self, to: SyncState, message: Option<String>) {
        let from = {
            let mut inner = self.lock();
            let from = inner.state;
            if from == to {
                return;
            }
            inner.state = to;
            from
        };
        debug!(%from, %to, "sync state changed");
        self.emit(StatusChange::StateChanged { from, to }, message);
    }

    fn emit(&self, change: StatusChange, message: Option<String>) {
        let event = {
            let inner = self.lock();
            StatusEvent {
                timestamp: Utc::now(),
                state: inner.state,
                change,
                message,
                statistics: inner.stats.clone(),
            }
        };

        let handlers = self
            .handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        for handler in handlers {
            match catch_unwind(AssertUnwindSafe(|| handler(&event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "status handler failed"),
                Err(_) => warn!("status handler panicked"),
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TrackerState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for SyncStatusTracker {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAP)
    }
}
