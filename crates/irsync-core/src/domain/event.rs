//! File change events
//!
//! A [`FileChangeEvent`] is emitted by the watcher once a path has been quiet
//! for the debounce window. It is immutable and consumed once by the change
//! queue.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::newtypes::Side;

/// What happened to the file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// The file was created
    Add,
    /// The file content changed
    Change,
    /// The file was removed
    Delete,
}

impl ChangeKind {
    /// Returns true for deletions
    pub fn is_delete(self) -> bool {
        matches!(self, ChangeKind::Delete)
    }
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ChangeKind::Add => "add",
            ChangeKind::Change => "change",
            ChangeKind::Delete => "delete",
        };
        f.write_str(s)
    }
}

/// A debounced change to a file on one side
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChangeEvent {
    kind: ChangeKind,
    path: PathBuf,
    side: Side,
    timestamp: DateTime<Utc>,
}

impl FileChangeEvent {
    /// Creates an event stamped with an explicit time
    pub fn new(kind: ChangeKind, path: PathBuf, side: Side, timestamp: DateTime<Utc>) -> Self {
        Self {
            kind,
            path,
            side,
            timestamp,
        }
    }

    /// Creates an event stamped with the current time
    pub fn now(kind: ChangeKind, path: PathBuf, side: Side) -> Self {
        Self::new(kind, path, side, Utc::now())
    }

    pub fn kind(&self) -> ChangeKind {
        self.kind
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_accessors() {
        let ts = Utc::now();
        let event = FileChangeEvent::new(
            ChangeKind::Change,
            PathBuf::from("/proj/web/App.tsx"),
            Side::A,
            ts,
        );
        assert_eq!(event.kind(), ChangeKind::Change);
        assert_eq!(event.path(), Path::new("/proj/web/App.tsx"));
        assert_eq!(event.side(), Side::A);
        assert_eq!(event.timestamp(), ts);
    }

    #[test]
    fn test_change_kind_serde() {
        let json = serde_json::to_string(&ChangeKind::Delete).unwrap();
        assert_eq!(json, "\"delete\"");
        assert!(ChangeKind::Delete.is_delete());
        assert!(!ChangeKind::Add.is_delete());
    }
}
