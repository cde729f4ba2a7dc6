//! Domain entities and business logic
//!
//! This module contains the core domain types for irsync:
//! - Newtypes for sides, IR ids, fingerprints and entity identifiers
//! - File change events produced by the watcher
//! - Versioned IR records
//! - Conflict records and resolution strategies
//! - Sync operation lifecycle
//! - Path naming between the two sides
//! - Operating modes
//! - Domain-specific error types

pub mod conflict;
pub mod errors;
pub mod event;
pub mod ir;
pub mod mode;
pub mod naming;
pub mod newtypes;
pub mod operation;

// Re-export commonly used types
pub use conflict::{ConflictKind, ConflictRecord, ResolutionStrategy};
pub use errors::DomainError;
pub use event::{ChangeKind, FileChangeEvent};
pub use ir::{IrDocument, IrRecord, StoreOutcome};
pub use mode::SyncMode;
pub use naming::{NamingConvention, PathMapper, SideLayout};
pub use newtypes::*;
pub use operation::{OperationStatus, SyncOperation};
