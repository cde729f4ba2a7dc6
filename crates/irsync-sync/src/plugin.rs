//! External-process converters
//!
//! [`ProcessConverter`] delegates conversion to configured commands:
//!
//! | Command    | Extra arguments         | stdin   | stdout          |
//! |------------|-------------------------|---------|-----------------|
//! | `convert`  | `<side> <source path>`  | -       | IR JSON         |
//! | `generate` | `<side> <output path>`  | IR JSON | -               |
//! | `test`     | `<source side> <path>`  | -       | target test src |
//!
//! A non-zero exit is a conversion error, or a stub for test conversion.

use std::ffi::OsStr;
use std::path::Path;
use std::process::{Output, Stdio};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use irsync_core::config::PluginsConfig;
use irsync_core::domain::{IrDocument, Side};
use irsync_core::ports::{IConverter, ITestConverter, TestConversion};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Converter backed by external commands
#[derive(Debug, Clone)]
pub struct ProcessConverter {
    convert: Vec<String>,
    generate: Vec<String>,
    test: Vec<String>,
    timeout: Duration,
}

impl ProcessConverter {
    pub fn new(convert: Vec<String>, generate: Vec<String>) -> Self {
        Self {
            convert,
            generate,
            test: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Converter for the configured commands, or `None` if they are unset
    pub fn from_config(plugins: &PluginsConfig) -> Option<Self> {
        if !plugins.is_configured() {
            return None;
        }
        Some(
            Self::new(plugins.convert.clone(), plugins.generate.clone())
                .with_test_command(plugins.test.clone()),
        )
    }

    pub fn with_test_command(mut self, test: Vec<String>) -> Self {
        self.test = test;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn has_test_command(&self) -> bool {
        !self.test.is_empty()
    }

    async fn run(&self, argv: &[String], args: [&OsStr; 2], stdin: Option<Vec<u8>>) -> Result<Output> {
        let (program, fixed) = argv.split_first().context("Plugin command is empty")?;

        let mut child = Command::new(program)
            .args(fixed)
            .args(args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn plugin '{program}'"))?;

        let writer = match (stdin, child.stdin.take()) {
            (Some(data), Some(mut pipe)) => Some(tokio::spawn(async move {
                let result = pipe.write_all(&data).await;
                drop(pipe);
                result
            })),
            _ => None,
        };

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .with_context(|| format!("Plugin '{program}' timed out after {:?}", self.timeout))?
            .with_context(|| format!("Failed to wait for plugin '{program}'"))?;

        if let Some(writer) = writer {
            writer
                .await
                .context("Plugin stdin writer panicked")?
                .with_context(|| format!("Failed to write stdin of plugin '{program}'"))?;
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "Plugin '{program}' exited with {}: {}",
                output.status,
                stderr.trim()
            );
        }
        debug!(%program, "plugin finished");
        Ok(output)
    }
}

#[async_trait::async_trait]
impl IConverter for ProcessConverter {
    async fn convert(&self, side: Side, path: &Path) -> Result<IrDocument> {
        let output = self
            .run(&self.convert, [OsStr::new(side.as_str()), path.as_os_str()], None)
            .await?;
        serde_json::from_slice(&output.stdout)
            .with_context(|| format!("Converter printed invalid IR for {}", path.display()))
    }

    async fn generate(&self, side: Side, ir: &IrDocument, output: &Path) -> Result<()> {
        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let payload = serde_json::to_vec(ir).context("Failed to encode IR")?;
        self.run(
            &self.generate,
            [OsStr::new(side.as_str()), output.as_os_str()],
            Some(payload),
        )
        .await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl ITestConverter for ProcessConverter {
    async fn convert_test(&self, source_side: Side, path: &Path) -> TestConversion {
        if self.test.is_empty() {
            return TestConversion::stub(path, "no test converter command configured");
        }
        let result = self
            .run(&self.test, [OsStr::new(source_side.as_str()), path.as_os_str()], None)
            .await
            .and_then(|output| {
                String::from_utf8(output.stdout).context("Test converter printed non-UTF-8 output")
            });
        match result {
            Ok(content) if !content.trim().is_empty() => TestConversion::Converted(content),
            Ok(_) => TestConversion::stub(path, "test converter produced no output"),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Test conversion failed; emitting stub");
                TestConversion::stub(path, format!("{e:#}"))
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn sh(script: &str) -> Vec<String> {
        vec![
            "sh".to_string(),
            "-c".to_string(),
            script.to_string(),
            "plugin".to_string(),
        ]
    }

    #[tokio::test]
    async fn test_convert_parses_stdout() {
        let converter = ProcessConverter::new(
            sh(r#"printf '{"side":"%s","file":"%s"}' "$1" "$(basename "$2")""#),
            sh("cat > \"$2\""),
        );
        let ir = converter
            .convert(Side::A, Path::new("/w/web/Button.tsx"))
            .await
            .unwrap();
        assert_eq!(ir, json!({"side": "a", "file": "Button.tsx"}));
    }

    #[tokio::test]
    async fn test_generate_feeds_stdin_and_creates_parents() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("lib/widgets/button.dart");
        let converter = ProcessConverter::new(sh("exit 1"), sh("cat > \"$2\""));

        let ir = json!({"type": "Button"});
        converter.generate(Side::B, &ir, &output).await.unwrap();
        let written = tokio::fs::read_to_string(&output).await.unwrap();
        assert_eq!(serde_json::from_str::<IrDocument>(&written).unwrap(), ir);
    }

    #[tokio::test]
    async fn test_failure_carries_stderr() {
        let converter = ProcessConverter::new(sh("echo 'bad syntax' >&2; exit 3"), sh("true"));
        let err = converter
            .convert(Side::A, Path::new("/w/web/App.tsx"))
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("bad syntax"));
    }

    #[tokio::test]
    async fn test_test_conversion_degrades_to_stub() {
        let base = ProcessConverter::new(sh("true"), sh("true"));
        let stub = base.convert_test(Side::A, Path::new("/w/Button.test.tsx")).await;
        assert!(stub.is_stub());
        assert!(stub.content().contains("TODO"));

        let failing = base.clone().with_test_command(sh("exit 2"));
        assert!(failing
            .convert_test(Side::A, Path::new("/w/Button.test.tsx"))
            .await
            .is_stub());

        let working = base.with_test_command(sh("echo \"// ported from side $1\""));
        let converted = working
            .convert_test(Side::A, Path::new("/w/Button.test.tsx"))
            .await;
        assert_eq!(converted, TestConversion::Converted("// ported from side a\n".to_string()));
    }

    #[test]
    fn test_from_config_requires_both_commands() {
        let mut plugins = PluginsConfig::default();
        assert!(ProcessConverter::from_config(&plugins).is_none());
        plugins.convert = vec!["conv".into()];
        plugins.generate = vec!["gen".into()];
        plugins.test = vec!["tst".into()];
        let converter = ProcessConverter::from_config(&plugins).unwrap();
        assert!(converter.has_test_command());
    }
}
