//! Error types for the conflict engine

use thiserror::Error;

/// Errors that can occur during conflict detection and resolution
#[derive(Debug, Error)]
pub enum ConflictError {
    /// Conflict not found in the ledger
    #[error("conflict not found: {0}")]
    NotFound(String),

    /// Conflict already resolved
    #[error("conflict already resolved: {0}")]
    AlreadyResolved(String),

    /// Resolution operation failed (convert, store, or generate)
    #[error("resolution failed: {0}")]
    ResolutionFailed(String),

    /// Creating, listing or restoring a backup failed
    #[error("backup of {path} failed: {reason}")]
    Backup { path: String, reason: String },

    /// Diff tool not found on the system
    #[error("diff tool not found: {0}")]
    DiffToolNotFound(String),

    /// Storage error
    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ConflictError::Backup {
            path: "/w/App.tsx".to_string(),
            reason: "permission denied".to_string(),
        };
        assert_eq!(err.to_string(), "backup of /w/App.tsx failed: permission denied");
        assert_eq!(
            ConflictError::NotFound("abc".into()).to_string(),
            "conflict not found: abc"
        );
    }
}
