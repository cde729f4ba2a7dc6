//! Timestamped backups
//!
//! Every file overwritten during conflict resolution is first copied next to
//! itself as `name.backup.<epoch-ms>.ext`. Only the most recent backups per
//! file are retained.

use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::error::ConflictError;

/// Creates, lists, restores and prunes backups colocated with their originals
#[derive(Debug, Clone)]
pub struct BackupManager {
    retention: usize,
}

/// Splits a file name into stem and extension (with the dot), keeping
/// dot-files whole
fn split_name(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(pos) if pos > 0 => (&name[..pos], &name[pos..]),
        _ => (name, ""),
    }
}

fn backup_error(path: &Path, reason: impl std::fmt::Display) -> ConflictError {
    ConflictError::Backup {
        path: path.display().to_string(),
        reason: reason.to_string(),
    }
}

impl BackupManager {
    /// Keeps at most `retention` backups per file (at least one)
    pub fn new(retention: usize) -> Self {
        Self {
            retention: retention.max(1),
        }
    }

    pub fn retention(&self) -> usize {
        self.retention
    }

    /// Backup path for `original` stamped with `epoch_ms`
    ///
    /// `Button.tsx` becomes `Button.backup.<epoch_ms>.tsx`.
    pub fn backup_path(original: &Path, epoch_ms: i64) -> PathBuf {
        let name = original
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let (stem, ext) = split_name(&name);
        original.with_file_name(format!("{stem}.backup.{epoch_ms}{ext}"))
    }

    /// Parses the timestamp out of a backup file name for `original`
    fn backup_timestamp(original_name: &str, candidate: &str) -> Option<i64> {
        let (stem, ext) = split_name(original_name);
        let rest = candidate.strip_prefix(stem)?.strip_prefix(".backup.")?;
        let digits = rest.strip_suffix(ext)?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        digits.parse().ok()
    }

    /// Copies `original` to a fresh timestamped backup, then prunes old ones
    ///
    /// Returns `None` when `original` does not exist.
    ///
    /// # Errors
    /// Returns [`ConflictError::Backup`] if the copy fails.
    pub async fn create_backup(&self, original: &Path) -> Result<Option<PathBuf>, ConflictError> {
        if !tokio::fs::try_exists(original)
            .await
            .map_err(|e| backup_error(original, e))?
        {
            debug!(path = %original.display(), "nothing to back up");
            return Ok(None);
        }

        // Stamps stay strictly newer than every existing backup
        let mut stamp = Utc::now().timestamp_millis();
        if let Some((newest, _)) = self.stamped_backups(original).await?.first() {
            stamp = stamp.max(newest + 1);
        }
        let target = Self::backup_path(original, stamp);

        tokio::fs::copy(original, &target)
            .await
            .map_err(|e| backup_error(original, e))?;
        info!(
            path = %original.display(),
            backup = %target.display(),
            "backup created"
        );

        if let Err(e) = self.prune(original).await {
            warn!(path = %original.display(), error = %e, "failed to prune old backups");
        }
        Ok(Some(target))
    }

    /// Backups of `original`, newest first
    ///
    /// # Errors
    /// Returns [`ConflictError::Backup`] if the directory cannot be read.
    pub async fn list_backups(&self, original: &Path) -> Result<Vec<PathBuf>, ConflictError> {
        Ok(self
            .stamped_backups(original)
            .await?
            .into_iter()
            .map(|(_, p)| p)
            .collect())
    }

    async fn stamped_backups(&self, original: &Path) -> Result<Vec<(i64, PathBuf)>, ConflictError> {
        let Some(name) = original.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            return Ok(Vec::new());
        };
        let dir = match original.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(backup_error(original, e)),
        };

        let mut found: Vec<(i64, PathBuf)> = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| backup_error(original, e))?
        {
            let candidate = entry.file_name().to_string_lossy().into_owned();
            if let Some(ts) = Self::backup_timestamp(&name, &candidate) {
                found.push((ts, entry.path()));
            }
        }
        found.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(found)
    }

    /// Most recent backup of `original`, if any
    pub async fn latest_backup(&self, original: &Path) -> Result<Option<PathBuf>, ConflictError> {
        Ok(self.list_backups(original).await?.into_iter().next())
    }

    /// Overwrites `original` with the content of `backup`
    ///
    /// # Errors
    /// Returns [`ConflictError::Backup`] if the backup cannot be copied back.
    pub async fn restore_from_backup(
        &self,
        original: &Path,
        backup: &Path,
    ) -> Result<(), ConflictError> {
        if let Some(parent) = original.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| backup_error(original, e))?;
        }
        tokio::fs::copy(backup, original)
            .await
            .map_err(|e| backup_error(original, e))?;
        info!(
            path = %original.display(),
            backup = %backup.display(),
            "restored from backup"
        );
        Ok(())
    }

    /// Deletes all but the `retention` newest backups; returns how many went
    ///
    /// # Errors
    /// Returns [`ConflictError::Backup`] if listing or deleting fails.
    pub async fn prune(&self, original: &Path) -> Result<usize, ConflictError> {
        let backups = self.list_backups(original).await?;
        let mut removed = 0;
        for old in backups.iter().skip(self.retention) {
            tokio::fs::remove_file(old)
                .await
                .map_err(|e| backup_error(old, e))?;
            removed += 1;
        }
        if removed > 0 {
            debug!(path = %original.display(), removed, "pruned old backups");
        }
        Ok(removed)
    }
}

impl Default for BackupManager {
    fn default() -> Self {
        Self::new(5)
    }
}
