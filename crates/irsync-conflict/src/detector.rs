//! Conflict detection logic
//!
//! Decides whether a change reflects a simultaneous edit of both files of a
//! pair by comparing it with the most recent change to the counterpart file.
//!
//! The detector keeps the latest change time per path. When a change arrives
//! and the counterpart changed within the conflict window, a
//! [`ConflictRecord`] is created, persisted to the ledger and broadcast to
//! registered handlers. A window of zero disables detection entirely.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use irsync_core::domain::{
    ConflictId, ConflictKind, ConflictRecord, FileChangeEvent, IrId, PathMapper, Side,
};
use irsync_core::ports::{IConflictLedger, IIrStore};

use crate::error::ConflictError;

/// Result of conflict detection check
#[derive(Debug, Clone)]
pub enum DetectionResult {
    /// No conflict: safe to sync the change
    NoConflict,
    /// Conflict detected: both files changed within the window
    Conflicted(Box<ConflictRecord>),
    /// The pair already has an unresolved conflict; the change is held
    AlreadyConflicted(ConflictId),
}

impl DetectionResult {
    pub fn is_conflict(&self) -> bool {
        !matches!(self, DetectionResult::NoConflict)
    }
}

/// Callback invoked for every new conflict
pub type ConflictHandler = Arc<dyn Fn(&ConflictRecord) -> anyhow::Result<()> + Send + Sync>;

const MAX_WINDOW_MS: u64 = 86_400_000;

#[derive(Debug, Clone, Copy)]
struct RecentChange {
    side: Side,
    at: DateTime<Utc>,
}

/// Detects simultaneous edits to the two files of a pair
pub struct ConflictDetector {
    window: Duration,
    recent: Mutex<HashMap<PathBuf, RecentChange>>,
    ledger: Arc<dyn IConflictLedger>,
    handlers: RwLock<Vec<ConflictHandler>>,
}

impl ConflictDetector {
    /// Creates a detector with a window of `window_ms` milliseconds
    ///
    /// A window of zero disables detection. Windows are capped at one day.
    pub fn new(window_ms: u64, ledger: Arc<dyn IConflictLedger>) -> Self {
        Self {
            window: Duration::milliseconds(window_ms.min(MAX_WINDOW_MS) as i64),
            recent: Mutex::new(HashMap::new()),
            ledger,
            handlers: RwLock::new(Vec::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.window > Duration::zero()
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn ledger(&self) -> &Arc<dyn IConflictLedger> {
        &self.ledger
    }

    /// Registers a handler called for every new conflict
    ///
    /// Handler errors and panics are logged and never reach the pipeline.
    pub fn on_conflict(&self, handler: ConflictHandler) {
        self.handlers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(handler);
    }

    /// Checks `event` against the latest change to `counterpart`
    ///
    /// `ir_version` is the latest stored IR version of the changed file and is
    /// recorded on any new conflict.
    ///
    /// # Errors
    /// Returns [`ConflictError::Storage`] if the ledger cannot be read or
    /// written.
    pub async fn check(
        &self,
        event: &FileChangeEvent,
        counterpart: &Path,
        ir_version: Option<u64>,
    ) -> Result<DetectionResult, ConflictError> {
        if !self.is_enabled() {
            return Ok(DetectionResult::NoConflict);
        }

        if let Some(open) = self.open_conflict_for(event.path()).await? {
            debug!(
                path = %event.path().display(),
                conflict_id = %open,
                "pair has an unresolved conflict; holding change"
            );
            return Ok(DetectionResult::AlreadyConflicted(open));
        }

        let now = event.timestamp();
        let other = {
            let mut recent = self.recent.lock().unwrap_or_else(|e| e.into_inner());
            let horizon = now - self.window * 2;
            recent.retain(|_, change| change.at >= horizon);

            let other = recent
                .get(counterpart)
                .copied()
                .filter(|c| c.side != event.side() && (now - c.at).abs() <= self.window);
            if other.is_none() {
                recent.insert(
                    event.path().to_path_buf(),
                    RecentChange {
                        side: event.side(),
                        at: now,
                    },
                );
            }
            other
        };

        let Some(other) = other else {
            return Ok(DetectionResult::NoConflict);
        };

        let (a_file, a_ts, b_file, b_ts) = match event.side() {
            Side::A => (event.path().to_path_buf(), now, counterpart.to_path_buf(), other.at),
            Side::B => (counterpart.to_path_buf(), other.at, event.path().to_path_buf(), now),
        };
        let conflict = ConflictRecord::new(a_file, a_ts, b_file, b_ts, ir_version);

        info!(
            conflict_id = %conflict.id(),
            side_a = %conflict.side_a_file().display(),
            side_b = %conflict.side_b_file().display(),
            gap_ms = conflict.gap().num_milliseconds(),
            "Conflict detected: both files changed within the window"
        );

        self.ledger.save(&conflict).await?;
        // The counterpart change is consumed only once the conflict is stored
        self.recent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(counterpart);
        self.broadcast(&conflict);
        Ok(DetectionResult::Conflicted(Box::new(conflict)))
    }

    /// Forgets every recorded change
    pub fn clear(&self) {
        self.recent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    /// Number of paths currently remembered
    pub fn tracked_paths(&self) -> usize {
        self.recent.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    async fn open_conflict_for(&self, path: &Path) -> Result<Option<ConflictId>, ConflictError> {
        let open = self.ledger.unresolved().await?;
        Ok(open.iter().find(|c| c.involves(path)).map(|c| *c.id()))
    }

    fn broadcast(&self, conflict: &ConflictRecord) {
        let handlers = self
            .handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        for handler in handlers {
            match catch_unwind(AssertUnwindSafe(|| handler(conflict))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "conflict handler failed"),
                Err(_) => warn!("conflict handler panicked"),
            }
        }
    }

    // ========================================================================
    // Ad hoc audit checks
    // ========================================================================

    /// Flags two files whose modification times are within the window
    ///
    /// Missing files never conflict.
    pub async fn check_timestamps(&self, side_a: &Path, side_b: &Path) -> anyhow::Result<bool> {
        if !self.is_enabled() {
            return Ok(false);
        }
        let (Some(a), Some(b)) = (modified_at(side_a).await?, modified_at(side_b).await?) else {
            return Ok(false);
        };
        Ok((a - b).abs() <= self.window)
    }

    /// Flags a pair when more than one IR version of either id was written
    /// within the window ending at the newest version
    pub async fn check_versions(
        &self,
        store: &dyn IIrStore,
        ids: &[IrId],
    ) -> anyhow::Result<bool> {
        if !self.is_enabled() {
            return Ok(false);
        }
        let mut stamps = Vec::new();
        for id in ids {
            stamps.extend(store.history(id).await?.into_iter().map(|r| r.timestamp));
        }
        let Some(newest) = stamps.iter().max().copied() else {
            return Ok(false);
        };
        let within = stamps
            .iter()
            .filter(|ts| newest - **ts <= self.window)
            .count();
        Ok(within > 1)
    }

    /// Runs both audit checks on the pair containing `side_a_file`
    pub async fn audit(
        &self,
        store: &dyn IIrStore,
        mapper: &PathMapper,
        side_a_file: &Path,
    ) -> anyhow::Result<Option<ConflictKind>> {
        let side_b_file = mapper.counterpart(Side::A, side_a_file)?;
        let ids = [
            mapper.ir_id(Side::A, side_a_file)?,
            mapper.ir_id(Side::B, &side_b_file)?,
        ];

        let by_time = self.check_timestamps(side_a_file, &side_b_file).await?;
        let by_version = self.check_versions(store, &ids).await?;
        Ok(match (by_time, by_version) {
            (true, true) => Some(ConflictKind::Both),
            (true, false) => Some(ConflictKind::Timestamp),
            (false, true) => Some(ConflictKind::Version),
            (false, false) => None,
        })
    }
}

async fn modified_at(path: &Path) -> anyhow::Result<Option<DateTime<Utc>>> {
    match tokio::fs::metadata(path).await {
        Ok(meta) => Ok(Some(DateTime::<Utc>::from(meta.modified()?))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}
