//! Echo suppression
//!
//! Files the engine writes on the opposite side come back through the
//! watcher. [`EchoGuard`] remembers what was written (or deleted) and drops
//! the matching event so a regeneration is never mistaken for a hand edit.

use std::path::{Path, PathBuf};
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;
use tracing::{debug, trace};

use irsync_conflict::WriteObserver;
use irsync_core::domain::{ChangeKind, FileChangeEvent, Fingerprint};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Expected {
    Content(Fingerprint),
    Deleted,
}

#[derive(Debug, Clone)]
struct Written {
    expected: Expected,
    at: Instant,
}

/// Remembers recent engine writes
pub struct EchoGuard {
    ttl: Duration,
    writes: DashMap<PathBuf, Written>,
}

impl EchoGuard {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            writes: DashMap::new(),
        }
    }

    /// Records the current content of `path` as written by us
    pub async fn record_written(&self, path: &Path) {
        match tokio::fs::read(path).await {
            Ok(bytes) => self.record_content(path.to_path_buf(), &bytes),
            Err(e) => debug!(path = %path.display(), error = %e, "cannot fingerprint written file"),
        }
    }

    pub fn record_content(&self, path: PathBuf, bytes: &[u8]) {
        self.writes.insert(
            path,
            Written {
                expected: Expected::Content(Fingerprint::of_bytes(bytes)),
                at: Instant::now(),
            },
        );
    }

    pub fn record_deleted(&self, path: PathBuf) {
        self.writes.insert(
            path,
            Written {
                expected: Expected::Deleted,
                at: Instant::now(),
            },
        );
    }

    /// Returns true if `event` only reports our own write
    ///
    /// The record is consumed either way, so a later hand edit is seen.
    pub async fn is_echo(&self, event: &FileChangeEvent) -> bool {
        let Some((path, written)) = self.writes.remove(event.path()) else {
            return false;
        };
        if written.at.elapsed() > self.ttl {
            trace!(path = %path.display(), "echo record expired");
            return false;
        }

        let echo = match (&written.expected, event.kind()) {
            (Expected::Deleted, ChangeKind::Delete) => true,
            (Expected::Deleted, _) | (Expected::Content(_), ChangeKind::Delete) => false,
            (Expected::Content(expected), _) => match tokio::fs::read(&path).await {
                Ok(bytes) => Fingerprint::of_bytes(&bytes) == *expected,
                Err(_) => false,
            },
        };
        if echo {
            debug!(path = %path.display(), kind = %event.kind(), "suppressing echo of own write");
        }
        echo
    }

    /// Drops expired records; returns how many were removed
    pub fn purge_expired(&self) -> usize {
        let before = self.writes.len();
        self.writes.retain(|_, w| w.at.elapsed() <= self.ttl);
        before - self.writes.len()
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }
}

#[async_trait::async_trait]
impl WriteObserver for EchoGuard {
    async fn file_written(&self, path: &Path) {
        self.record_written(path).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use irsync_core::domain::Side;
    use tempfile::TempDir;

    fn event(kind: ChangeKind, path: &Path) -> FileChangeEvent {
        FileChangeEvent::now(kind, path.to_path_buf(), Side::B)
    }

    #[tokio::test]
    async fn test_own_write_is_an_echo_once() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("button.dart");
        tokio::fs::write(&path, "generated").await.unwrap();

        let guard = EchoGuard::new(Duration::from_secs(10));
        guard.record_written(&path).await;

        assert!(guard.is_echo(&event(ChangeKind::Change, &path)).await);
        assert!(!guard.is_echo(&event(ChangeKind::Change, &path)).await);
    }

    #[tokio::test]
    async fn test_hand_edit_after_write_is_not_an_echo() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("button.dart");
        tokio::fs::write(&path, "generated").await.unwrap();

        let guard = EchoGuard::new(Duration::from_secs(10));
        guard.record_written(&path).await;
        tokio::fs::write(&path, "edited by hand").await.unwrap();

        assert!(!guard.is_echo(&event(ChangeKind::Change, &path)).await);
    }

    #[tokio::test]
    async fn test_deletion_marker() {
        let guard = EchoGuard::new(Duration::from_secs(10));
        let path = PathBuf::from("/w/app/gone.dart");
        guard.record_deleted(path.clone());
        assert!(guard.is_echo(&event(ChangeKind::Delete, &path)).await);

        guard.record_deleted(path.clone());
        assert!(!guard.is_echo(&event(ChangeKind::Add, &path)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_records_expire() {
        let guard = EchoGuard::new(Duration::from_millis(100));
        let path = PathBuf::from("/w/app/old.dart");
        guard.record_deleted(path.clone());
        guard.record_deleted(PathBuf::from("/w/app/other.dart"));

        tokio::time::advance(Duration::from_millis(150)).await;
        assert!(!guard.is_echo(&event(ChangeKind::Delete, &path)).await);
        assert_eq!(guard.purge_expired(), 1);
        assert!(guard.is_empty());
    }
}
