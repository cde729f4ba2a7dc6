//! irsync Store - JSON-file persistence
//!
//! Stores:
//! - Versioned IR records, one history file per IR id
//! - The conflict ledger, a single JSON array
//!
//! ## Architecture
//!
//! This crate implements the `IIrStore` and `IConflictLedger` ports from
//! `irsync-core`. It is a driven (secondary) adapter in the hexagonal
//! architecture. Both adapters can also run purely in memory for tests.
//!
//! ## Key Components
//!
//! - [`JsonIrStore`] - Per-id version history with per-id write locks
//! - [`JsonConflictLedger`] - Conflict records that survive restarts
//! - [`StoreError`] - Error types for store operations
//!
//! ## Usage
//!
//! ```no_run
//! use std::path::Path;
//! use irsync_store::{JsonConflictLedger, JsonIrStore};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let store = JsonIrStore::open(Path::new(".irsync/ir"), 50).await?;
//! let ledger = JsonConflictLedger::open(Path::new(".irsync/conflicts.json")).await?;
//! // Use store as IIrStore and ledger as IConflictLedger...
//! # Ok(())
//! # }
//! ```

mod fs;
pub mod ir_store;
pub mod ledger;

pub use ir_store::JsonIrStore;
pub use ledger::JsonConflictLedger;

/// Errors that can occur during store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Reading or writing a store file failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization of domain types failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A store file exists but does not hold what it should
    #[error("Corrupt store file {path}: {reason}")]
    Corrupt {
        /// The offending file
        path: String,
        /// What was wrong with it
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_display() {
        let err = StoreError::Corrupt {
            path: "/x.json".to_string(),
            reason: "id mismatch".to_string(),
        };
        assert_eq!(err.to_string(), "Corrupt store file /x.json: id mismatch");
    }

    #[test]
    fn test_store_error_from_io() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: StoreError = io.into();
        assert!(matches!(err, StoreError::Io(_)));
    }
}
