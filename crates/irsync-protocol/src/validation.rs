//! Decoding and validation of incoming frames
//!
//! Decoding is staged so every rejection has a distinct kind: the `type` tag
//! is checked before the version, the version before the shape, and the
//! shape before update checksums.

use serde_json::Value;

use crate::error::ProtocolError;
use crate::message::{MessageBody, ProtocolMessage, MESSAGE_TYPES, PROTOCOL_VERSION};

/// Serializes a message as one frame (no trailing newline)
///
/// # Errors
/// Returns [`ProtocolError::Malformed`] if the message cannot be encoded.
pub fn encode(message: &ProtocolMessage) -> Result<String, ProtocolError> {
    serde_json::to_string(message).map_err(|e| ProtocolError::Malformed(e.to_string()))
}

/// Parses and validates one frame
///
/// # Errors
/// Returns the [`ProtocolError`] kind matching the first check that fails.
pub fn decode(frame: &str) -> Result<ProtocolMessage, ProtocolError> {
    let raw: Value =
        serde_json::from_str(frame).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
    let object = raw
        .as_object()
        .ok_or_else(|| ProtocolError::Malformed("frame is not a JSON object".to_string()))?;

    let kind = object
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| ProtocolError::Malformed("missing 'type' tag".to_string()))?;
    if !MESSAGE_TYPES.contains(&kind) {
        return Err(ProtocolError::UnknownMessageType(kind.to_string()));
    }

    let version = object
        .get("version")
        .and_then(Value::as_u64)
        .ok_or_else(|| ProtocolError::Malformed("missing 'version'".to_string()))?;
    check_version(u32::try_from(version).unwrap_or(u32::MAX))?;

    let message: ProtocolMessage =
        serde_json::from_value(raw).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
    validate_message(&message)?;
    Ok(message)
}

/// Validates an already typed message
///
/// # Errors
/// Returns [`ProtocolError::VersionMismatch`] or
/// [`ProtocolError::ChecksumMismatch`].
pub fn validate_message(message: &ProtocolMessage) -> Result<(), ProtocolError> {
    check_version(message.version)?;
    if let MessageBody::Update { update } = &message.body {
        if !update.verify() {
            return Err(ProtocolError::ChecksumMismatch {
                ir_id: update.ir_id.clone(),
                version: update.version,
            });
        }
        if update.payload.is_delta() && update.base_version.is_none() {
            return Err(ProtocolError::Malformed(
                "delta update without base_version".to_string(),
            ));
        }
    }
    Ok(())
}

fn check_version(actual: u32) -> Result<(), ProtocolError> {
    if actual != PROTOCOL_VERSION {
        return Err(ProtocolError::VersionMismatch {
            expected: PROTOCOL_VERSION,
            actual,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{SchemaUpdate, UpdatePayload};
    use serde_json::json;

    #[test]
    fn test_decode_valid_frame() {
        let frame = encode(&ProtocolMessage::ping(7)).unwrap();
        let msg = decode(&frame).unwrap();
        assert_eq!(msg.body, MessageBody::Ping { nonce: 7 });
    }

    #[test]
    fn test_unknown_type_is_reported() {
        let frame = r#"{"type":"teleport","version":1,"timestamp":"2024-01-01T00:00:00Z"}"#;
        match decode(frame) {
            Err(ProtocolError::UnknownMessageType(t)) => assert_eq!(t, "teleport"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_version_mismatch_is_reported() {
        let frame = r#"{"type":"ping","version":9,"timestamp":"2024-01-01T00:00:00Z","nonce":1}"#;
        assert!(matches!(
            decode(frame),
            Err(ProtocolError::VersionMismatch {
                expected: 1,
                actual: 9
            })
        ));
    }

    #[test]
    fn test_checksum_mismatch_is_reported() {
        let mut update = SchemaUpdate::full("a:App", 2, json!({"v": 1}));
        update.payload = UpdatePayload::Full(json!({"v": 666}));
        let frame = encode(&ProtocolMessage::update(update)).unwrap();
        assert!(matches!(
            decode(&frame),
            Err(ProtocolError::ChecksumMismatch { version: 2, .. })
        ));
    }

    #[test]
    fn test_malformed_frames() {
        assert!(matches!(decode("not json"), Err(ProtocolError::Malformed(_))));
        assert!(matches!(decode("[1,2]"), Err(ProtocolError::Malformed(_))));
        // Known type, right version, missing field
        let frame = r#"{"type":"ack","version":1,"timestamp":"2024-01-01T00:00:00Z"}"#;
        assert!(matches!(decode(frame), Err(ProtocolError::Malformed(_))));
    }

    #[test]
    fn test_delta_needs_base_version() {
        let mut update = SchemaUpdate::delta("a:App", 3, 2, vec![]);
        update.base_version = None;
        let msg = ProtocolMessage::update(update);
        assert!(matches!(
            validate_message(&msg),
            Err(ProtocolError::Malformed(_))
        ));
    }
}
