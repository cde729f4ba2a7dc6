//! irsync Conflict - Conflict detection and resolution
//!
//! Provides:
//! - Window-based detection of simultaneous edits to both files of a pair
//! - Ad hoc auditing by modification time and IR version history
//! - Keep-A / keep-B / manual-merge / skip resolution with timestamped backups
//! - Diff previews and presentation adapters for any front end

pub mod backup;
pub mod detector;
pub mod diff;
pub mod error;
pub mod presenter;
pub mod resolver;

pub use backup::BackupManager;
pub use detector::{ConflictDetector, ConflictHandler, DetectionResult};
pub use diff::{ConflictPreview, LineDiff};
pub use error::ConflictError;
pub use presenter::{ConflictPresenter, DiffToolPresenter, JsonPresenter, TerminalPresenter};
pub use resolver::{ConflictResolver, ResolutionOutcome, WriteObserver};
