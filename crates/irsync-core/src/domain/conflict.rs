//! Conflict domain entities
//!
//! This module defines types for recording and resolving simultaneous edits
//! to the two files of a pair (one on each side).

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::newtypes::{ConflictId, Side};

/// How a conflict should be or was resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    /// Treat side A as authoritative and regenerate side B
    KeepA,
    /// Treat side B as authoritative and regenerate side A
    KeepB,
    /// Back up both files and wait for the caller to pick a side
    ManualMerge,
    /// Leave the conflict open without touching either file
    Skip,
}

impl ResolutionStrategy {
    /// The authoritative side for keep strategies
    pub fn kept_side(self) -> Option<Side> {
        match self {
            ResolutionStrategy::KeepA => Some(Side::A),
            ResolutionStrategy::KeepB => Some(Side::B),
            _ => None,
        }
    }

    /// The keep strategy for a given authoritative side
    pub fn keep(side: Side) -> Self {
        match side {
            Side::A => ResolutionStrategy::KeepA,
            Side::B => ResolutionStrategy::KeepB,
        }
    }
}

impl std::fmt::Display for ResolutionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ResolutionStrategy::KeepA => "keep_a",
            ResolutionStrategy::KeepB => "keep_b",
            ResolutionStrategy::ManualMerge => "manual_merge",
            ResolutionStrategy::Skip => "skip",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for ResolutionStrategy {
    type Err = super::errors::DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "keep_a" => Ok(ResolutionStrategy::KeepA),
            "keep_b" => Ok(ResolutionStrategy::KeepB),
            "manual_merge" => Ok(ResolutionStrategy::ManualMerge),
            "skip" => Ok(ResolutionStrategy::Skip),
            other => Err(super::errors::DomainError::ValidationFailed(format!(
                "unknown resolution strategy '{other}'"
            ))),
        }
    }
}

/// Which evidence flagged a conflict during an ad hoc audit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    /// Filesystem modification times are within the window
    Timestamp,
    /// More than one IR version was written within the window
    Version,
    /// Both checks flagged the pair
    Both,
}

/// A simultaneous edit of both files of a pair
///
/// Both timestamps are always set: a record is never created from a
/// single-side change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictRecord {
    id: ConflictId,
    side_a_file: PathBuf,
    side_b_file: PathBuf,
    side_a_timestamp: DateTime<Utc>,
    side_b_timestamp: DateTime<Utc>,
    /// Latest stored IR version of the changed file when detected
    ir_version: Option<u64>,
    detected_at: DateTime<Utc>,
    resolved: bool,
    resolution: Option<ResolutionStrategy>,
    resolved_at: Option<DateTime<Utc>>,
}

impl ConflictRecord {
    /// Creates a new unresolved conflict
    pub fn new(
        side_a_file: PathBuf,
        side_a_timestamp: DateTime<Utc>,
        side_b_file: PathBuf,
        side_b_timestamp: DateTime<Utc>,
        ir_version: Option<u64>,
    ) -> Self {
        Self {
            id: ConflictId::new(),
            side_a_file,
            side_b_file,
            side_a_timestamp,
            side_b_timestamp,
            ir_version,
            detected_at: Utc::now(),
            resolved: false,
            resolution: None,
            resolved_at: None,
        }
    }

    pub fn id(&self) -> &ConflictId {
        &self.id
    }

    pub fn side_a_file(&self) -> &Path {
        &self.side_a_file
    }

    pub fn side_b_file(&self) -> &Path {
        &self.side_b_file
    }

    pub fn side_a_timestamp(&self) -> DateTime<Utc> {
        self.side_a_timestamp
    }

    pub fn side_b_timestamp(&self) -> DateTime<Utc> {
        self.side_b_timestamp
    }

    /// File of the given side
    pub fn file(&self, side: Side) -> &Path {
        match side {
            Side::A => &self.side_a_file,
            Side::B => &self.side_b_file,
        }
    }

    pub fn ir_version(&self) -> Option<u64> {
        self.ir_version
    }

    pub fn detected_at(&self) -> DateTime<Utc> {
        self.detected_at
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved
    }

    pub fn resolution(&self) -> Option<ResolutionStrategy> {
        self.resolution
    }

    pub fn resolved_at(&self) -> Option<DateTime<Utc>> {
        self.resolved_at
    }

    /// Gap between the two edits
    pub fn gap(&self) -> chrono::Duration {
        (self.side_a_timestamp - self.side_b_timestamp).abs()
    }

    /// Returns true if `path` is either file of the pair
    pub fn involves(&self, path: &Path) -> bool {
        self.side_a_file == path || self.side_b_file == path
    }

    /// Marks the conflict resolved with the given strategy
    pub fn mark_resolved(&mut self, strategy: ResolutionStrategy) {
        self.resolved = true;
        self.resolution = Some(strategy);
        self.resolved_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sample() -> ConflictRecord {
        let t0 = Utc::now();
        ConflictRecord::new(
            PathBuf::from("/web/Button.tsx"),
            t0,
            PathBuf::from("/app/button.dart"),
            t0 + Duration::milliseconds(2000),
            Some(3),
        )
    }

    #[test]
    fn test_new_conflict_is_unresolved() {
        let conflict = sample();
        assert!(!conflict.is_resolved());
        assert!(conflict.resolution().is_none());
        assert_eq!(conflict.gap(), Duration::milliseconds(2000));
        assert_eq!(conflict.ir_version(), Some(3));
    }

    #[test]
    fn test_file_by_side_and_involves() {
        let conflict = sample();
        assert_eq!(conflict.file(Side::A), Path::new("/web/Button.tsx"));
        assert_eq!(conflict.file(Side::B), Path::new("/app/button.dart"));
        assert!(conflict.involves(Path::new("/app/button.dart")));
        assert!(!conflict.involves(Path::new("/app/other.dart")));
    }

    #[test]
    fn test_mark_resolved() {
        let mut conflict = sample();
        conflict.mark_resolved(ResolutionStrategy::KeepA);
        assert!(conflict.is_resolved());
        assert_eq!(conflict.resolution(), Some(ResolutionStrategy::KeepA));
        assert!(conflict.resolved_at().is_some());
    }

    #[test]
    fn test_strategy_parse_and_display() {
        for s in ["keep_a", "keep_b", "manual_merge", "skip"] {
            let parsed: ResolutionStrategy = s.parse().unwrap();
            assert_eq!(parsed.to_string(), s);
        }
        assert!("keep_both".parse::<ResolutionStrategy>().is_err());
        assert_eq!(ResolutionStrategy::KeepB.kept_side(), Some(Side::B));
        assert_eq!(ResolutionStrategy::keep(Side::A), ResolutionStrategy::KeepA);
    }

    #[test]
    fn test_serde_roundtrip_keeps_both_timestamps() {
        let conflict = sample();
        let json = serde_json::to_string(&conflict).unwrap();
        assert!(json.contains("side_a_timestamp"));
        assert!(json.contains("side_b_timestamp"));
        let back: ConflictRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, conflict);
    }
}
