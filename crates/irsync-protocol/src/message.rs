//! Hot-reload wire messages
//!
//! Every frame is a JSON object with a `type` tag, the protocol `version` and
//! a `timestamp`, plus the fields of its variant:
//!
//! ```json
//! {"type":"reload","version":1,"timestamp":"2024-05-01T10:00:00Z","preserve_state":true}
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use irsync_core::domain::IrDocument;

use crate::delta::DeltaOp;

/// Version spoken by this implementation; peers must match exactly
pub const PROTOCOL_VERSION: u32 = 1;

/// Every `type` tag this protocol defines
pub const MESSAGE_TYPES: &[&str] = &[
    "connect",
    "connected",
    "update",
    "reload",
    "error",
    "ping",
    "pong",
    "ack",
];

/// Stable failure codes carried by `error` messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    UnknownMessageType,
    VersionMismatch,
    ChecksumMismatch,
    Malformed,
    NotConnected,
    UnexpectedMessage,
    Internal,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::UnknownMessageType => "unknown_message_type",
            ErrorCode::VersionMismatch => "version_mismatch",
            ErrorCode::ChecksumMismatch => "checksum_mismatch",
            ErrorCode::Malformed => "malformed",
            ErrorCode::NotConnected => "not_connected",
            ErrorCode::UnexpectedMessage => "unexpected_message",
            ErrorCode::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Body of an `update`: either the whole IR or a patch against a base version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum UpdatePayload {
    /// Replace the client's copy
    Full(IrDocument),
    /// Merge into the client's copy of `base_version`
    Delta(Vec<DeltaOp>),
}

impl UpdatePayload {
    pub fn is_delta(&self) -> bool {
        matches!(self, UpdatePayload::Delta(_))
    }
}

/// A versioned IR update with its integrity checksum
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaUpdate {
    pub ir_id: String,
    pub version: u64,
    /// Version the delta applies to; `None` for full snapshots
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_version: Option<u64>,
    pub payload: UpdatePayload,
    /// SHA-256 (hex) of the JSON encoding of `payload`
    pub checksum: String,
}

impl SchemaUpdate {
    pub fn full(ir_id: impl Into<String>, version: u64, document: IrDocument) -> Self {
        let payload = UpdatePayload::Full(document);
        Self {
            ir_id: ir_id.into(),
            version,
            base_version: None,
            checksum: payload_checksum(&payload),
            payload,
        }
    }

    pub fn delta(
        ir_id: impl Into<String>,
        version: u64,
        base_version: u64,
        ops: Vec<DeltaOp>,
    ) -> Self {
        let payload = UpdatePayload::Delta(ops);
        Self {
            ir_id: ir_id.into(),
            version,
            base_version: Some(base_version),
            checksum: payload_checksum(&payload),
            payload,
        }
    }

    /// Recomputes the checksum and compares it to the carried one
    pub fn verify(&self) -> bool {
        payload_checksum(&self.payload) == self.checksum
    }
}

/// SHA-256 hex digest of the JSON encoding of `payload`
pub fn payload_checksum(payload: &UpdatePayload) -> String {
    // Encoding a JSON value tree cannot fail: every map key is a string
    let encoded = serde_json::to_vec(payload).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(&encoded);
    format!("{:x}", hasher.finalize())
}

/// The variant-specific part of a message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageBody {
    /// Client opens a session
    Connect { client_id: String },
    /// Server accepted the session
    Connected { session_id: String },
    /// New IR for one id
    Update { update: SchemaUpdate },
    /// Apply pending updates; `preserve_state` selects hot reload over restart
    Reload { preserve_state: bool },
    Error { code: ErrorCode, message: String },
    Ping { nonce: u64 },
    Pong { nonce: u64 },
    /// Client applied `version` of `ir_id`
    Ack { ir_id: String, version: u64 },
}

impl MessageBody {
    /// The `type` tag of this body
    pub fn type_name(&self) -> &'static str {
        match self {
            MessageBody::Connect { .. } => "connect",
            MessageBody::Connected { .. } => "connected",
            MessageBody::Update { .. } => "update",
            MessageBody::Reload { .. } => "reload",
            MessageBody::Error { .. } => "error",
            MessageBody::Ping { .. } => "ping",
            MessageBody::Pong { .. } => "pong",
            MessageBody::Ack { .. } => "ack",
        }
    }
}

/// One protocol frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolMessage {
    pub version: u32,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub body: MessageBody,
}

impl ProtocolMessage {
    /// Wraps `body` with the current protocol version and time
    pub fn new(body: MessageBody) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            timestamp: Utc::now(),
            body,
        }
    }

    pub fn connect(client_id: impl Into<String>) -> Self {
        Self::new(MessageBody::Connect {
            client_id: client_id.into(),
        })
    }

    pub fn connected(session_id: impl Into<String>) -> Self {
        Self::new(MessageBody::Connected {
            session_id: session_id.into(),
        })
    }

    pub fn update(update: SchemaUpdate) -> Self {
        Self::new(MessageBody::Update { update })
    }

    pub fn reload(preserve_state: bool) -> Self {
        Self::new(MessageBody::Reload { preserve_state })
    }

    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::new(MessageBody::Error {
            code,
            message: message.into(),
        })
    }

    pub fn ping(nonce: u64) -> Self {
        Self::new(MessageBody::Ping { nonce })
    }

    pub fn pong(nonce: u64) -> Self {
        Self::new(MessageBody::Pong { nonce })
    }

    pub fn ack(ir_id: impl Into<String>, version: u64) -> Self {
        Self::new(MessageBody::Ack {
            ir_id: ir_id.into(),
            version,
        })
    }

    /// The `type` tag of this message
    pub fn message_type(&self) -> &'static str {
        self.body.type_name()
    }
}
