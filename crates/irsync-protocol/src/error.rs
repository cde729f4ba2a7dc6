//! Error types for the hot-reload protocol

use thiserror::Error;

use crate::message::{ErrorCode, ProtocolMessage};

/// Errors raised while decoding, validating or serving protocol messages
///
/// Each variant maps to a stable [`ErrorCode`] sent back to the peer.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The `type` tag names no known message
    #[error("unknown message type: {0}")]
    UnknownMessageType(String),

    /// The peer speaks another protocol version
    #[error("protocol version mismatch: expected {expected}, got {actual}")]
    VersionMismatch { expected: u32, actual: u32 },

    /// An update payload does not match its checksum
    #[error("checksum mismatch for {ir_id} v{version}")]
    ChecksumMismatch { ir_id: String, version: u64 },

    /// The frame is not a valid message of its type
    #[error("malformed message: {0}")]
    Malformed(String),

    /// A session was required but none is open
    #[error("not connected: {0}")]
    NotConnected(String),

    /// A valid message arrived at the wrong point of the exchange
    #[error("unexpected message: {0}")]
    UnexpectedMessage(String),

    /// Reading or writing the transport failed
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ProtocolError::UnknownMessageType(_) => ErrorCode::UnknownMessageType,
            ProtocolError::VersionMismatch { .. } => ErrorCode::VersionMismatch,
            ProtocolError::ChecksumMismatch { .. } => ErrorCode::ChecksumMismatch,
            ProtocolError::Malformed(_) => ErrorCode::Malformed,
            ProtocolError::NotConnected(_) => ErrorCode::NotConnected,
            ProtocolError::UnexpectedMessage(_) => ErrorCode::UnexpectedMessage,
            ProtocolError::Io(_) => ErrorCode::Internal,
        }
    }

    /// The `error` frame reporting this failure to the peer
    pub fn to_message(&self) -> ProtocolMessage {
        ProtocolMessage::error(self.code(), self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageBody;

    #[test]
    fn test_error_frame_carries_code() {
        let err = ProtocolError::VersionMismatch {
            expected: 1,
            actual: 2,
        };
        match err.to_message().body {
            MessageBody::Error { code, message } => {
                assert_eq!(code, ErrorCode::VersionMismatch);
                assert_eq!(message, "protocol version mismatch: expected 1, got 2");
            }
            other => panic!("unexpected body: {other:?}"),
        }
    }
}
