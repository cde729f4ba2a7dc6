//! Operating modes

use serde::{Deserialize, Serialize};

use super::errors::DomainError;
use super::newtypes::Side;

/// Which side(s) may be edited by hand
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Side A is the source; side B is generated and read-only
    APrimary,
    /// Side B is the source; side A is generated and read-only
    BPrimary,
    /// Both sides are editable and conflict detection is active
    #[default]
    Bidirectional,
}

impl SyncMode {
    /// The single source side, or `None` in bidirectional mode
    pub fn source_side(self) -> Option<Side> {
        match self {
            SyncMode::APrimary => Some(Side::A),
            SyncMode::BPrimary => Some(Side::B),
            SyncMode::Bidirectional => None,
        }
    }

    /// Returns true if edits on `side` are synced
    pub fn is_editable(self, side: Side) -> bool {
        self.source_side().map_or(true, |source| source == side)
    }

    /// Sides whose trees are watched
    ///
    /// The read-only side stays watched so that hand edits to generated files
    /// can be reported and skipped.
    pub fn watched_sides(self) -> &'static [Side] {
        &Side::ALL
    }

    pub fn conflict_detection_enabled(self) -> bool {
        self == SyncMode::Bidirectional
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SyncMode::APrimary => "a_primary",
            SyncMode::BPrimary => "b_primary",
            SyncMode::Bidirectional => "bidirectional",
        }
    }
}

impl std::fmt::Display for SyncMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SyncMode {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "a_primary" | "a" => Ok(SyncMode::APrimary),
            "b_primary" | "b" => Ok(SyncMode::BPrimary),
            "bidirectional" | "both" => Ok(SyncMode::Bidirectional),
            other => Err(DomainError::ValidationFailed(format!(
                "unknown sync mode '{other}'"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_editable_sides() {
        assert!(SyncMode::APrimary.is_editable(Side::A));
        assert!(!SyncMode::APrimary.is_editable(Side::B));
        assert!(SyncMode::BPrimary.is_editable(Side::B));
        assert!(SyncMode::Bidirectional.is_editable(Side::A));
        assert!(SyncMode::Bidirectional.is_editable(Side::B));
    }

    #[test]
    fn test_conflict_detection_only_bidirectional() {
        assert!(SyncMode::Bidirectional.conflict_detection_enabled());
        assert!(!SyncMode::APrimary.conflict_detection_enabled());
        assert!(!SyncMode::BPrimary.conflict_detection_enabled());
    }

    #[test]
    fn test_parse_mode() {
        assert_eq!("a-primary".parse::<SyncMode>().unwrap(), SyncMode::APrimary);
        assert_eq!("B_PRIMARY".parse::<SyncMode>().unwrap(), SyncMode::BPrimary);
        assert_eq!("bidirectional".parse::<SyncMode>().unwrap(), SyncMode::Bidirectional);
        assert!("sideways".parse::<SyncMode>().is_err());
    }
}
