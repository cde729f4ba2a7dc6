//! irsync Protocol - Hot-reload wire contract
//!
//! Provides:
//! - Tagged protocol messages with version and update checksums
//! - Staged decoding that reports unknown types, version mismatches and
//!   checksum mismatches as distinct errors
//! - JSON-pointer deltas between IR versions
//! - `HotReloadHub`: session registry that fans updates out to clients
//! - Line-delimited JSON transport and a TCP server

pub mod delta;
pub mod error;
pub mod hub;
pub mod message;
pub mod transport;
pub mod validation;

pub use delta::{DeltaKind, DeltaOp};
pub use error::ProtocolError;
pub use hub::{HotReloadHub, PushReport};
pub use message::{
    ErrorCode, MessageBody, ProtocolMessage, SchemaUpdate, UpdatePayload, PROTOCOL_VERSION,
};
pub use transport::{serve_connection, HotReloadServer};
pub use validation::{decode, encode, validate_message};
