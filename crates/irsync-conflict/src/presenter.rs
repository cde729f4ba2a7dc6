//! Presentation adapters
//!
//! The resolver only produces [`ConflictPreview`] data; presenters decide how
//! it reaches a human. Three adapters ship with the crate:
//!
//! - [`TerminalPresenter`] - plain text with a marker on every differing line
//! - [`JsonPresenter`] - one JSON document per line, for dashboards
//! - [`DiffToolPresenter`] - launches meld, kdiff3, vimdiff or diff

use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use serde_json::json;
use tracing::{debug, info};

use irsync_core::domain::ConflictRecord;

use crate::diff::ConflictPreview;
use crate::error::ConflictError;

/// Presents conflicts to some front end
#[async_trait::async_trait]
pub trait ConflictPresenter: Send + Sync {
    /// Announces a newly detected conflict
    async fn notify(&self, conflict: &ConflictRecord) -> anyhow::Result<()>;

    /// Shows the side-by-side preview of a conflict
    async fn present(&self, preview: &ConflictPreview) -> anyhow::Result<()>;
}

type SharedWriter = Mutex<Box<dyn Write + Send>>;

fn write_out(writer: &SharedWriter, text: &str) -> anyhow::Result<()> {
    let mut out = writer
        .lock()
        .map_err(|_| anyhow::anyhow!("presenter output lock poisoned"))?;
    out.write_all(text.as_bytes())?;
    out.flush()?;
    Ok(())
}

// ============================================================================
// Terminal
// ============================================================================

/// Plain-text renderer
pub struct TerminalPresenter {
    out: SharedWriter,
}

impl TerminalPresenter {
    /// Writes to stdout
    pub fn stdout() -> Self {
        Self::with_writer(std::io::stdout())
    }

    pub fn with_writer(writer: impl Write + Send + 'static) -> Self {
        Self {
            out: Mutex::new(Box::new(writer)),
        }
    }

    /// Renders a conflict announcement
    pub fn render_notice(conflict: &ConflictRecord) -> String {
        format!(
            "CONFLICT {}\n  A: {} ({})\n  B: {} ({})\n",
            conflict.id(),
            conflict.side_a_file().display(),
            conflict.side_a_timestamp().format("%H:%M:%S%.3f"),
            conflict.side_b_file().display(),
            conflict.side_b_timestamp().format("%H:%M:%S%.3f"),
        )
    }

    /// Renders a preview; differing rows start with `!`, equal rows with a space
    pub fn render(preview: &ConflictPreview) -> String {
        let width = preview
            .lines
            .iter()
            .filter_map(|l| l.side_a.as_ref().map(|s| s.chars().count()))
            .max()
            .unwrap_or(0)
            .min(60);

        let mut out = format!(
            "--- A: {}\n+++ B: {}\n",
            preview.side_a_file.display(),
            preview.side_b_file.display()
        );
        for row in &preview.lines {
            let marker = if row.different { '!' } else { ' ' };
            out.push_str(&format!(
                "{marker}{:>4} | {:<width$} | {}\n",
                row.line,
                row.side_a.as_deref().unwrap_or(""),
                row.side_b.as_deref().unwrap_or(""),
                width = width
            ));
        }
        out.push_str(&format!(
            "{} of {} lines differ\n",
            preview.differing_lines(),
            preview.lines.len()
        ));
        out
    }
}

#[async_trait::async_trait]
impl ConflictPresenter for TerminalPresenter {
    async fn notify(&self, conflict: &ConflictRecord) -> anyhow::Result<()> {
        write_out(&self.out, &Self::render_notice(conflict))
    }

    async fn present(&self, preview: &ConflictPreview) -> anyhow::Result<()> {
        write_out(&self.out, &Self::render(preview))
    }
}

// ============================================================================
// JSON
// ============================================================================

/// Line-delimited JSON renderer
pub struct JsonPresenter {
    out: SharedWriter,
}

impl JsonPresenter {
    pub fn stdout() -> Self {
        Self::with_writer(std::io::stdout())
    }

    pub fn with_writer(writer: impl Write + Send + 'static) -> Self {
        Self {
            out: Mutex::new(Box::new(writer)),
        }
    }

    pub fn render_notice(conflict: &ConflictRecord) -> serde_json::Value {
        json!({ "event": "conflict_detected", "conflict": conflict })
    }

    pub fn render(preview: &ConflictPreview) -> serde_json::Value {
        json!({
            "event": "conflict_preview",
            "differing_lines": preview.differing_lines(),
            "preview": preview,
        })
    }
}

#[async_trait::async_trait]
impl ConflictPresenter for JsonPresenter {
    async fn notify(&self, conflict: &ConflictRecord) -> anyhow::Result<()> {
        write_out(&self.out, &format!("{}\n", Self::render_notice(conflict)))
    }

    async fn present(&self, preview: &ConflictPreview) -> anyhow::Result<()> {
        write_out(&self.out, &format!("{}\n", Self::render(preview)))
    }
}

// ============================================================================
// External diff tool
// ============================================================================

/// Supported diff tools in order of preference
const DIFF_TOOLS: &[(&str, &[&str])] = &[
    ("meld", &[]),
    ("kdiff3", &[]),
    ("vimdiff", &[]),
    ("diff", &["--color=auto", "-u"]),
];

/// Opens both files of a conflict in an external diff tool
pub struct DiffToolPresenter {
    tool: String,
}

impl DiffToolPresenter {
    /// Uses `tool` if given, otherwise the first available of meld, kdiff3,
    /// vimdiff, diff
    ///
    /// # Errors
    /// Returns [`ConflictError::DiffToolNotFound`] if no tool is available.
    pub fn detect(override_tool: Option<&str>) -> Result<Self, ConflictError> {
        if let Some(tool) = override_tool {
            if Self::is_available(tool) {
                return Ok(Self {
                    tool: tool.to_string(),
                });
            }
            return Err(ConflictError::DiffToolNotFound(format!(
                "Configured diff tool '{}' not found in PATH",
                tool
            )));
        }

        for (tool, _) in DIFF_TOOLS {
            if Self::is_available(tool) {
                debug!(tool, "Detected diff tool");
                return Ok(Self {
                    tool: tool.to_string(),
                });
            }
        }

        Err(ConflictError::DiffToolNotFound(
            "No diff tool found. Install meld, kdiff3, or vimdiff".to_string(),
        ))
    }

    pub fn tool(&self) -> &str {
        &self.tool
    }

    /// Arguments passed to the tool for two files
    fn args(&self, side_a: &Path, side_b: &Path) -> Vec<String> {
        let mut args: Vec<String> = DIFF_TOOLS
            .iter()
            .find(|(name, _)| *name == self.tool)
            .map(|(_, extra)| extra.iter().map(|s| s.to_string()).collect())
            .unwrap_or_default();
        args.push(side_a.display().to_string());
        args.push(side_b.display().to_string());
        args
    }

    /// Launches the tool; GUI tools run in the background
    pub async fn launch(&self, side_a: &Path, side_b: &Path) -> Result<(), ConflictError> {
        info!(
            tool = %self.tool,
            side_a = %side_a.display(),
            side_b = %side_b.display(),
            "Launching diff tool"
        );

        let mut cmd = tokio::process::Command::new(&self.tool);
        cmd.args(self.args(side_a, side_b));

        if Self::is_gui_tool(&self.tool) {
            cmd.spawn().map_err(|e| {
                ConflictError::DiffToolNotFound(format!("Failed to launch {}: {e}", self.tool))
            })?;
        } else {
            // diff exits 1 when the files differ; only spawn failures are errors
            cmd.status().await.map_err(|e| {
                ConflictError::DiffToolNotFound(format!("Failed to run {}: {e}", self.tool))
            })?;
        }
        Ok(())
    }

    /// Check if a tool is available in PATH
    fn is_available(tool: &str) -> bool {
        std::process::Command::new("which")
            .arg(tool)
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    fn is_gui_tool(tool: &str) -> bool {
        matches!(tool, "meld" | "kdiff3" | "kompare" | "diffuse")
    }
}

#[async_trait::async_trait]
impl ConflictPresenter for DiffToolPresenter {
    async fn notify(&self, conflict: &ConflictRecord) -> anyhow::Result<()> {
        info!(
            conflict_id = %conflict.id(),
            "conflict detected; open it with `{}`",
            self.tool
        );
        Ok(())
    }

    async fn present(&self, preview: &ConflictPreview) -> anyhow::Result<()> {
        self.launch(&preview.side_a_file, &preview.side_b_file)
            .await
            .map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::path::PathBuf;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct Buffer(Arc<Mutex<Vec<u8>>>);

    impl Write for Buffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl Buffer {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    fn conflict() -> ConflictRecord {
        let now = Utc::now();
        ConflictRecord::new(
            PathBuf::from("/w/App.tsx"),
            now,
            PathBuf::from("/m/app.dart"),
            now,
            Some(2),
        )
    }

    #[test]
    fn test_terminal_render_marks_differences() {
        let preview = ConflictPreview::build(&conflict(), "same\nleft", "same\nright");
        let text = TerminalPresenter::render(&preview);
        let rows: Vec<&str> = text.lines().collect();
        assert!(rows[0].starts_with("--- A: /w/App.tsx"));
        assert!(rows[2].starts_with(' '));
        assert!(rows[3].starts_with('!'));
        assert!(text.contains("1 of 2 lines differ"));
    }

    #[tokio::test]
    async fn test_terminal_presenter_writes() {
        let buffer = Buffer::default();
        let presenter = TerminalPresenter::with_writer(buffer.clone());
        let c = conflict();
        presenter.notify(&c).await.unwrap();
        assert!(buffer.text().starts_with("CONFLICT "));
        assert!(buffer.text().contains("/m/app.dart"));
    }

    #[tokio::test]
    async fn test_json_presenter_emits_one_document_per_line() {
        let buffer = Buffer::default();
        let presenter = JsonPresenter::with_writer(buffer.clone());
        let c = conflict();
        let preview = ConflictPreview::build(&c, "a", "b");
        presenter.notify(&c).await.unwrap();
        presenter.present(&preview).await.unwrap();

        let text = buffer.text();
        let docs: Vec<serde_json::Value> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0]["event"], "conflict_detected");
        assert_eq!(docs[1]["differing_lines"], 1);
        assert_eq!(docs[1]["preview"]["lines"][0]["different"], true);
    }

    #[test]
    fn test_diff_tool_args() {
        let presenter = DiffToolPresenter {
            tool: "diff".to_string(),
        };
        let args = presenter.args(Path::new("/a"), Path::new("/b"));
        assert_eq!(args, vec!["--color=auto", "-u", "/a", "/b"]);
    }

    #[test]
    fn test_detect_unknown_override_fails() {
        let result = DiffToolPresenter::detect(Some("definitely-not-a-diff-tool-xyz"));
        assert!(matches!(result, Err(ConflictError::DiffToolNotFound(_))));
    }
}
