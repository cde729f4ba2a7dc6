//! Operating-mode profile
//!
//! Turns a [`SyncMode`] into the settings the rest of the pipeline needs:
//! the effective conflict window and which side's edits are accepted.

use irsync_core::config::Config;
use irsync_core::domain::{Side, SyncMode};

/// Per-mode watcher and detector settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeProfile {
    mode: SyncMode,
    conflict_window_ms: u64,
}

impl ModeProfile {
    /// Single-source modes collapse the conflict window to zero
    pub fn new(mode: SyncMode, configured_window_ms: u64) -> Self {
        let conflict_window_ms = if mode.conflict_detection_enabled() {
            configured_window_ms
        } else {
            0
        };
        Self {
            mode,
            conflict_window_ms,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.mode, config.conflicts.window_ms)
    }

    pub fn mode(&self) -> SyncMode {
        self.mode
    }

    pub fn conflict_window_ms(&self) -> u64 {
        self.conflict_window_ms
    }

    pub fn watched_sides(&self) -> &'static [Side] {
        self.mode.watched_sides()
    }

    /// Why an edit on `side` is not synced, if it is not
    pub fn rejection(&self, side: Side) -> Option<String> {
        if self.mode.is_editable(side) {
            return None;
        }
        Some(format!(
            "side {side} is generated and read-only in {} mode",
            self.mode
        ))
    }

    /// One-line summary for startup logs
    pub fn describe(&self) -> String {
        match self.mode.source_side() {
            Some(source) => format!(
                "{}: side {source} → side {}, conflicts disabled",
                self.mode,
                source.opposite()
            ),
            None => format!(
                "{}: both sides editable, conflict window {} ms",
                self.mode, self.conflict_window_ms
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_source_modes_disable_conflicts() {
        let profile = ModeProfile::new(SyncMode::APrimary, 5000);
        assert_eq!(profile.conflict_window_ms(), 0);
        assert!(profile.rejection(Side::A).is_none());
        let reason = profile.rejection(Side::B).unwrap();
        assert!(reason.contains("read-only"));

        let profile = ModeProfile::new(SyncMode::BPrimary, 5000);
        assert!(profile.rejection(Side::A).is_some());
        assert!(profile.rejection(Side::B).is_none());
    }

    #[test]
    fn test_bidirectional_keeps_window() {
        let profile = ModeProfile::new(SyncMode::Bidirectional, 3000);
        assert_eq!(profile.conflict_window_ms(), 3000);
        assert!(profile.rejection(Side::A).is_none());
        assert!(profile.rejection(Side::B).is_none());
        assert!(profile.describe().contains("3000"));
    }

    #[test]
    fn test_from_config() {
        let mut config = Config::default();
        config.mode = SyncMode::BPrimary;
        config.conflicts.window_ms = 9000;
        let profile = ModeProfile::from_config(&config);
        assert_eq!(profile.mode(), SyncMode::BPrimary);
        assert_eq!(profile.conflict_window_ms(), 0);
        assert_eq!(profile.watched_sides().len(), 2);
    }
}
