//! irsync Sync - Change pipeline between the two sides
//!
//! Provides:
//! - File watching with per-path debouncing
//! - A prioritized, bounded change queue that hands out batches
//! - The sync engine: convert, store, regenerate, with conflict holds
//! - A worker pool and progress reporting for large batches
//! - Echo suppression for files the engine writes itself
//! - Converter plugins that run external commands
//!
//! ## Modules
//!
//! - [`watcher`] - `ChangeSource` port, notify-backed watcher, debouncer
//! - [`queue`] - Batching change queue actor
//! - [`cache`] - LRU conversion cache keyed by source fingerprint
//! - [`engine`] - Per-change and per-batch sync logic
//! - [`pipeline`] - Wires watcher, queue, engine, detector and tracker together
//! - [`mode`] - Operating-mode profile
//! - [`plugin`] - `ProcessConverter`

pub mod cache;
pub mod echo;
pub mod engine;
pub mod mode;
pub mod pipeline;
pub mod plugin;
pub mod pool;
pub mod queue;
pub mod watcher;

pub use cache::{CacheStats, ConversionCache};
pub use echo::EchoGuard;
pub use engine::{BatchSummary, ChangeOutcome, EngineSettings, SkipReason, SyncEngine};
pub use mode::ModeProfile;
pub use pipeline::{SyncPipeline, SyncPipelineBuilder};
pub use plugin::ProcessConverter;
pub use pool::{BatchProgress, ProgressReporter, ProgressUpdate, WorkerPool};
pub use queue::{Batch, ChangeQueue, Priority, QueueSettings, QueuedChange};
pub use watcher::{
    ChangeSource, Debouncer, FileWatcher, ManualChangeHandle, ManualChangeSource, WatchTarget,
};

use thiserror::Error;

/// Errors that can occur while running the sync pipeline
#[derive(Debug, Error)]
pub enum SyncError {
    /// An I/O error occurred during file operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A domain-level error propagated from irsync-core
    #[error("Domain error: {0}")]
    Domain(#[from] irsync_core::domain::DomainError),

    /// The IR store or conflict ledger failed to open
    #[error("Store error: {0}")]
    Store(#[from] irsync_store::StoreError),

    #[error("Conflict error: {0}")]
    Conflict(#[from] irsync_conflict::ConflictError),

    /// Invalid watcher or pipeline settings
    #[error("Configuration error: {0}")]
    Config(String),

    /// The change queue no longer accepts changes
    #[error("Change queue is closed")]
    QueueClosed,

    /// A worker task panicked or was cancelled
    #[error("Worker failed: {0}")]
    Worker(String),

    #[error("Pipeline is already running")]
    AlreadyRunning,

    #[error("Pipeline is not running")]
    NotRunning,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
