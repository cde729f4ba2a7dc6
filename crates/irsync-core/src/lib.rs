//! irsync Core - Domain types, ports and configuration
//!
//! This crate contains the hexagonal architecture core with:
//! - **Domain entities** - `FileChangeEvent`, `IrRecord`, `ConflictRecord`, `SyncOperation`
//! - **Path mapping** - `PathMapper` derives IR ids and counterpart paths per side
//! - **Port definitions** - Traits for adapters: `IConverter`, `IIrStore`, `IConflictLedger`, `Clock`
//! - **Configuration** - YAML-backed `Config` with validation and a builder
//!
//! # Architecture
//!
//! The domain module holds pure types with no I/O. Ports define trait
//! interfaces that adapter crates implement (`irsync-store` for persistence,
//! converter plugins in `irsync-sync`).

pub mod config;
pub mod domain;
pub mod ports;
