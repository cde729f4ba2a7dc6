//! Sync operation lifecycle
//!
//! A [`SyncOperation`] tracks the processing of one queued change.
//!
//! ## State Machine
//!
//! ```text
//! Pending ──► Processing ──► Completed
//!    │             │
//!    └─────────────┴──────► Failed
//! ```
//!
//! Transitions only move forward; `Completed` and `Failed` are terminal.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::DomainError;
use super::newtypes::{OperationId, Side};

/// Lifecycle status of a [`SyncOperation`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl OperationStatus {
    pub fn name(self) -> &'static str {
        match self {
            OperationStatus::Pending => "pending",
            OperationStatus::Processing => "processing",
            OperationStatus::Completed => "completed",
            OperationStatus::Failed => "failed",
        }
    }

    /// Returns true for `Completed` and `Failed`
    pub fn is_terminal(self) -> bool {
        matches!(self, OperationStatus::Completed | OperationStatus::Failed)
    }

    /// Checks whether moving to `target` keeps the lifecycle forward-only
    pub fn can_transition_to(self, target: OperationStatus) -> bool {
        matches!(
            (self, target),
            (OperationStatus::Pending, OperationStatus::Processing)
                | (OperationStatus::Pending, OperationStatus::Failed)
                | (OperationStatus::Processing, OperationStatus::Completed)
                | (OperationStatus::Processing, OperationStatus::Failed)
        )
    }
}

impl std::fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Processing record for one queued change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncOperation {
    id: OperationId,
    source_file: PathBuf,
    target_file: Option<PathBuf>,
    side: Side,
    status: OperationStatus,
    started_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    error: Option<String>,
}

impl SyncOperation {
    /// Creates a pending operation for `source_file`
    pub fn new(source_file: PathBuf, side: Side) -> Self {
        Self {
            id: OperationId::new(),
            source_file,
            target_file: None,
            side,
            status: OperationStatus::Pending,
            started_at: Utc::now(),
            completed_at: None,
            error: None,
        }
    }

    pub fn id(&self) -> &OperationId {
        &self.id
    }

    pub fn source_file(&self) -> &Path {
        &self.source_file
    }

    pub fn target_file(&self) -> Option<&Path> {
        self.target_file.as_deref()
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn status(&self) -> OperationStatus {
        self.status
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Time spent from start to completion, if completed
    pub fn duration(&self) -> Option<chrono::Duration> {
        self.completed_at.map(|end| end - self.started_at)
    }

    fn transition_to(&mut self, target: OperationStatus) -> Result<(), DomainError> {
        if !self.status.can_transition_to(target) {
            return Err(DomainError::InvalidState {
                from: self.status.name().to_string(),
                to: target.name().to_string(),
            });
        }
        self.status = target;
        Ok(())
    }

    /// Moves `Pending` to `Processing`
    ///
    /// # Errors
    /// Returns [`DomainError::InvalidState`] from any other status.
    pub fn start_processing(&mut self) -> Result<(), DomainError> {
        self.transition_to(OperationStatus::Processing)
    }

    /// Moves `Processing` to `Completed`, recording the generated file if any
    ///
    /// # Errors
    /// Returns [`DomainError::InvalidState`] unless the operation is processing.
    pub fn complete(&mut self, target_file: Option<PathBuf>) -> Result<(), DomainError> {
        self.transition_to(OperationStatus::Completed)?;
        self.target_file = target_file;
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Moves a non-terminal operation to `Failed`
    ///
    /// # Errors
    /// Returns [`DomainError::InvalidState`] if the operation already finished.
    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), DomainError> {
        self.transition_to(OperationStatus::Failed)?;
        self.error = Some(error.into());
        self.completed_at = Some(Utc::now());
        Ok(())
    }
}
