//! irsync Telemetry - Status tracking and metrics
//!
//! Provides:
//! - `SyncStatusTracker`: observable state machine over sync operations
//! - `MetricsRegistry`: Prometheus counters, gauges and histograms

pub mod metrics;
pub mod tracker;

pub use metrics::MetricsRegistry;
pub use tracker::{
    StatusChange, StatusEvent, StatusHandler, StatusSnapshot, SyncState, SyncStatistics,
    SyncStatusTracker,
};

use irsync_core::domain::{DomainError, OperationId};

/// Errors reported by the status tracker
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// The operation is not in flight
    #[error("unknown operation: {0}")]
    UnknownOperation(OperationId),

    /// The requested lifecycle step is not allowed
    #[error(transparent)]
    Transition(#[from] DomainError),
}
