//! Port definitions (hexagonal architecture interfaces)
//!
//! This module defines the port traits that form the boundaries of the
//! hexagonal architecture. Ports are interfaces that the domain core
//! depends on, but whose implementations live in adapter crates.
//!
//! ## Ports Overview
//!
//! - [`IConverter`] / [`ITestConverter`] - Pluggable source/IR conversion
//! - [`IIrStore`] - Versioned IR persistence
//! - [`IConflictLedger`] - Durable conflict records
//! - [`Clock`] - Current time, replaceable in tests

pub mod clock;
pub mod conflict_ledger;
pub mod converter;
pub mod ir_store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use conflict_ledger::IConflictLedger;
pub use converter::{ConverterRegistry, IConverter, ITestConverter, TestConversion};
pub use ir_store::IIrStore;
