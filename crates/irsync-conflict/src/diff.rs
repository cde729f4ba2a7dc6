//! Conflict preview data
//!
//! A [`ConflictPreview`] is computed once per request and handed to
//! presenters. It holds both files as line arrays plus a per-line flag telling
//! whether the two sides differ at that position.

use std::path::{Path, PathBuf};

use serde::Serialize;

use irsync_core::domain::{ConflictId, ConflictRecord};

use crate::error::ConflictError;

/// One row of a side-by-side comparison
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LineDiff {
    /// 1-based line number
    pub line: usize,
    pub side_a: Option<String>,
    pub side_b: Option<String>,
    pub different: bool,
}

/// Side-by-side data for one conflict
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConflictPreview {
    pub conflict_id: ConflictId,
    pub side_a_file: PathBuf,
    pub side_b_file: PathBuf,
    pub side_a_lines: Vec<String>,
    pub side_b_lines: Vec<String>,
    pub lines: Vec<LineDiff>,
}

impl ConflictPreview {
    /// Builds a preview from the contents of both files
    pub fn build(conflict: &ConflictRecord, side_a_text: &str, side_b_text: &str) -> Self {
        let side_a_lines: Vec<String> = side_a_text.lines().map(str::to_owned).collect();
        let side_b_lines: Vec<String> = side_b_text.lines().map(str::to_owned).collect();

        let rows = side_a_lines.len().max(side_b_lines.len());
        let lines = (0..rows)
            .map(|i| {
                let a = side_a_lines.get(i).cloned();
                let b = side_b_lines.get(i).cloned();
                LineDiff {
                    line: i + 1,
                    different: a != b,
                    side_a: a,
                    side_b: b,
                }
            })
            .collect();

        Self {
            conflict_id: *conflict.id(),
            side_a_file: conflict.side_a_file().to_path_buf(),
            side_b_file: conflict.side_b_file().to_path_buf(),
            side_a_lines,
            side_b_lines,
            lines,
        }
    }

    /// Reads both files of `conflict` and builds the preview
    ///
    /// A missing file is shown as empty.
    ///
    /// # Errors
    /// Returns an error if a file exists but cannot be read.
    pub async fn load(conflict: &ConflictRecord) -> Result<Self, ConflictError> {
        let a = read_or_empty(conflict.side_a_file()).await?;
        let b = read_or_empty(conflict.side_b_file()).await?;
        Ok(Self::build(conflict, &a, &b))
    }

    /// Number of rows flagged as different
    pub fn differing_lines(&self) -> usize {
        self.lines.iter().filter(|l| l.different).count()
    }

    pub fn is_identical(&self) -> bool {
        self.differing_lines() == 0
    }
}

async fn read_or_empty(path: &Path) -> Result<String, ConflictError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
        Err(e) => Err(ConflictError::ResolutionFailed(format!(
            "read {}: {e}",
            path.display()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn conflict() -> ConflictRecord {
        let now = Utc::now();
        ConflictRecord::new(
            PathBuf::from("/w/App.tsx"),
            now,
            PathBuf::from("/m/app.dart"),
            now,
            None,
        )
    }

    #[test]
    fn test_per_line_flags() {
        let preview = ConflictPreview::build(&conflict(), "a\nb\nc", "a\nX\nc\nd");
        assert_eq!(preview.side_a_lines.len(), 3);
        assert_eq!(preview.side_b_lines.len(), 4);
        let flags: Vec<bool> = preview.lines.iter().map(|l| l.different).collect();
        assert_eq!(flags, vec![false, true, false, true]);
        assert_eq!(preview.differing_lines(), 2);
        assert_eq!(preview.lines[3].side_a, None);
        assert_eq!(preview.lines[3].line, 4);
    }

    #[test]
    fn test_identical_contents() {
        let preview = ConflictPreview::build(&conflict(), "same\n", "same\n");
        assert!(preview.is_identical());
    }

    #[tokio::test]
    async fn test_load_treats_missing_as_empty() {
        let dir = tempfile::TempDir::new().unwrap();
        let a = dir.path().join("App.tsx");
        tokio::fs::write(&a, "line").await.unwrap();
        let now = Utc::now();
        let record = ConflictRecord::new(a, now, dir.path().join("app.dart"), now, None);

        let preview = ConflictPreview::load(&record).await.unwrap();
        assert_eq!(preview.side_a_lines, vec!["line".to_string()]);
        assert!(preview.side_b_lines.is_empty());
        assert_eq!(preview.differing_lines(), 1);
    }
}
