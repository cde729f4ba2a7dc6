//! Domain newtypes with validation
//!
//! This module provides strongly-typed wrappers for domain identifiers and values.
//! Each newtype ensures data validity at construction time.

use std::fmt::{self, Display, Formatter};
use std::path::{Component, Path};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::errors::DomainError;

// ============================================================================
// Side
// ============================================================================

/// One of the two artifact trees kept in sync
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    A,
    B,
}

impl Side {
    /// Returns the other side
    #[must_use]
    pub const fn opposite(self) -> Self {
        match self {
            Side::A => Side::B,
            Side::B => Side::A,
        }
    }

    /// Lowercase tag used in identifiers and logs
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Side::A => "a",
            Side::B => "b",
        }
    }

    /// Both sides, A first
    pub const ALL: [Side; 2] = [Side::A, Side::B];
}

impl Display for Side {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Side {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "a" => Ok(Side::A),
            "b" => Ok(Side::B),
            other => Err(DomainError::ValidationFailed(format!(
                "unknown side '{other}'; expected 'a' or 'b'"
            ))),
        }
    }
}

// ============================================================================
// IrId
// ============================================================================

/// Identifier of an IR record
///
/// Derived deterministically from the side and the file path relative to that
/// side's root: the extension of the file name is stripped and separators are
/// normalized to `/`. `src/components/Button.tsx` on side A becomes
/// `a/src/components/Button`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IrId(String);

impl IrId {
    /// Derives the id for `relative` (a path relative to the side root)
    ///
    /// # Errors
    /// Returns [`DomainError::InvalidIrId`] if the path is empty, absolute,
    /// or escapes the root via `..`.
    pub fn derive(side: Side, relative: &Path) -> Result<Self, DomainError> {
        let mut parts: Vec<String> = Vec::new();
        for component in relative.components() {
            match component {
                Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
                Component::CurDir => {}
                _ => {
                    return Err(DomainError::InvalidIrId(format!(
                        "path must be relative and stay inside the root: {}",
                        relative.display()
                    )))
                }
            }
        }

        let Some(last) = parts.pop() else {
            return Err(DomainError::InvalidIrId("empty relative path".to_string()));
        };
        parts.push(strip_extension(&last).to_string());

        Ok(Self(format!("{}/{}", side.as_str(), parts.join("/"))))
    }

    /// Wraps an already-derived id string
    ///
    /// # Errors
    /// Returns [`DomainError::InvalidIrId`] if the string does not start with a
    /// side prefix.
    pub fn new(value: String) -> Result<Self, DomainError> {
        let valid = value
            .split_once('/')
            .map(|(side, rest)| (side == "a" || side == "b") && !rest.is_empty())
            .unwrap_or(false);
        if !valid {
            return Err(DomainError::InvalidIrId(value));
        }
        Ok(Self(value))
    }

    /// Returns the side encoded in the id
    pub fn side(&self) -> Side {
        if self.0.starts_with("a/") {
            Side::A
        } else {
            Side::B
        }
    }

    /// Returns the id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for IrId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Strips the last extension of a file name, leaving dot-files intact
fn strip_extension(name: &str) -> &str {
    match name.rfind('.') {
        Some(0) | None => name,
        Some(pos) => &name[..pos],
    }
}

// ============================================================================
// Fingerprint
// ============================================================================

/// Content hash used to detect no-op conversions (lowercase hex SHA-256)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Validates and wraps a hex digest
    ///
    /// # Errors
    /// Returns [`DomainError::InvalidFingerprint`] unless the value is 64
    /// lowercase hex characters.
    pub fn new(value: String) -> Result<Self, DomainError> {
        let valid = value.len() == 64
            && value
                .chars()
                .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c));
        if !valid {
            return Err(DomainError::InvalidFingerprint(value));
        }
        Ok(Self(value))
    }

    /// Fingerprints raw bytes
    #[must_use]
    pub fn of_bytes(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        Self(format!("{:x}", hasher.finalize()))
    }

    /// Fingerprints an IR value through its canonical JSON encoding
    ///
    /// `serde_json` keeps object keys sorted, so equal values always encode
    /// to the same bytes.
    #[must_use]
    pub fn of_value(value: &serde_json::Value) -> Self {
        Self::of_bytes(value.to_string().as_bytes())
    }

    /// Returns the hex digest
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the first eight hex characters, for logs
    pub fn short(&self) -> &str {
        &self.0[..8]
    }
}

impl Display for Fingerprint {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// UUID-based ID types
// ============================================================================

/// Identifier for ConflictRecord entities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConflictId(Uuid);

impl ConflictId {
    /// Create a new random ConflictId
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the inner UUID value
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ConflictId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for ConflictId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ConflictId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| DomainError::InvalidId(format!("Invalid ConflictId: {e}")))
    }
}

/// Identifier for SyncOperation entities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(Uuid);

impl OperationId {
    /// Create a new random OperationId
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for OperationId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
