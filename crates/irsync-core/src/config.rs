//! Configuration module for irsync.
//!
//! Provides typed configuration structs that map to the YAML configuration file,
//! with loading, validation, defaults, and a builder pattern for programmatic use.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::domain::{NamingConvention, PathMapper, Side, SideLayout, SyncMode};

// ---------------------------------------------------------------------------
// Config struct with sub-sections
// ---------------------------------------------------------------------------

/// Top-level configuration for irsync.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub mode: SyncMode,
    pub side_a: SideConfig,
    pub side_b: SideConfig,
    pub watcher: WatcherConfig,
    pub queue: QueueConfig,
    pub engine: EngineConfig,
    pub conflicts: ConflictsConfig,
    pub status: StatusConfig,
    pub storage: StorageConfig,
    pub protocol: ProtocolConfig,
    pub plugins: PluginsConfig,
    pub logging: LoggingConfig,
}

/// One artifact tree.
///
/// `root` and `extension` are required whenever the section is present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SideConfig {
    /// Root directory of the tree.
    pub root: PathBuf,
    /// Extension of files generated on this side, without the dot.
    pub extension: String,
    /// Glob patterns (relative to `root`) of watched files. Empty means
    /// `**/*.<extension>`.
    #[serde(default)]
    pub patterns: Vec<String>,
    /// Case convention for generated file names.
    #[serde(default)]
    pub naming: NamingConvention,
}

/// File watcher settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    /// Quiet period per path before an event is emitted.
    pub debounce_ms: u64,
    /// Glob patterns of paths that are never reported.
    pub ignore: Vec<String>,
}

/// Change queue settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Queued changes beyond this count evict the oldest low-priority entry.
    pub max_queue_size: usize,
    /// A batch is dispatched immediately once this many changes are queued.
    pub batch_size: usize,
    /// Inactivity delay before a partial batch is dispatched.
    pub batch_delay_ms: u64,
}

/// Sync engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Batches at least this large are processed by the worker pool.
    pub parallel_threshold: usize,
    /// Worker pool size.
    pub max_workers: usize,
    /// Batches larger than this report per-item progress.
    pub progress_threshold: usize,
    /// Maximum entries kept in the conversion cache.
    pub cache_max_entries: usize,
    /// How long a file written by the engine is remembered for echo suppression.
    pub echo_ttl_ms: u64,
}

/// Conflict detection and resolution settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConflictsConfig {
    /// Maximum gap between opposite-side edits treated as simultaneous.
    pub window_ms: u64,
    /// Backups kept per file.
    pub backup_retention: usize,
    /// Presenter used by the daemon: `terminal`, `json`, or `diff_tool`.
    pub presenter: String,
    /// External diff tool; auto-detected when unset.
    pub diff_tool: Option<String>,
}

/// Status tracker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusConfig {
    /// Completed operations kept in the recent-history ring.
    pub history_cap: usize,
}

/// Persistent state settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding the IR store and the conflict ledger.
    pub dir: PathBuf,
    /// Versions kept per IR id; older ones are trimmed.
    pub ir_history_limit: usize,
}

/// Hot-reload server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    pub enabled: bool,
    /// Address the TCP listener binds to.
    pub bind: String,
    /// Sessions silent for longer than this are dropped.
    pub session_timeout_secs: u64,
    /// Sent with every `reload`: keep runtime state (hot reload) or discard
    /// it (hot restart).
    pub preserve_state: bool,
}

/// External converter commands (program followed by arguments).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginsConfig {
    /// Prints IR JSON for `<side> <path>` on stdout.
    pub convert: Vec<String>,
    /// Reads IR JSON on stdin and writes `<side> <output>`.
    pub generate: Vec<String>,
    /// Prints converted test source for `<source-side> <path>` on stdout.
    pub test: Vec<String>,
}

/// Logging / tracing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

// ---------------------------------------------------------------------------
// Config::load()
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a YAML file at `path`.
    ///
    /// Relative paths in the file are resolved against the file's directory.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let mut config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        if let Some(base) = path.parent() {
            config.resolve_paths(base);
        }
        Ok(config)
    }

    /// Try to load from `path`; fall back to [`Config::default`] on any error.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Default location of the configuration file: `irsync.yaml` in the
    /// working directory.
    pub fn default_path() -> PathBuf {
        PathBuf::from("irsync.yaml")
    }

    /// Joins every relative path in the configuration onto `base`.
    pub fn resolve_paths(&mut self, base: &Path) {
        for path in [
            &mut self.side_a.root,
            &mut self.side_b.root,
            &mut self.storage.dir,
        ] {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
    }

    /// Settings of one side.
    pub fn side(&self, side: Side) -> &SideConfig {
        match side {
            Side::A => &self.side_a,
            Side::B => &self.side_b,
        }
    }

    /// Builds the path mapper for the two configured sides.
    pub fn path_mapper(&self) -> PathMapper {
        PathMapper::new(self.side_a.layout(), self.side_b.layout())
    }
}

impl SideConfig {
    /// Watched glob patterns, defaulting to every file with the side's extension.
    pub fn effective_patterns(&self) -> Vec<String> {
        if self.patterns.is_empty() {
            vec![format!("**/*.{}", self.extension.trim_start_matches('.'))]
        } else {
            self.patterns.clone()
        }
    }

    pub fn layout(&self) -> SideLayout {
        SideLayout::new(self.root.clone(), &self.extension, self.naming)
    }
}

impl StorageConfig {
    /// Directory of the IR store.
    pub fn ir_dir(&self) -> PathBuf {
        self.dir.join("ir")
    }

    /// JSON file of the conflict ledger.
    pub fn conflicts_file(&self) -> PathBuf {
        self.dir.join("conflicts.json")
    }
}

impl PluginsConfig {
    pub fn is_configured(&self) -> bool {
        !self.convert.is_empty() && !self.generate.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

/// Side A defaults; side B uses [`SideConfig::default_b`].
impl Default for SideConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("side-a"),
            extension: "tsx".to_string(),
            patterns: Vec::new(),
            naming: NamingConvention::PascalCase,
        }
    }
}

impl SideConfig {
    /// Default settings for side B.
    fn default_b() -> Self {
        Self {
            root: PathBuf::from("side-b"),
            extension: "dart".to_string(),
            patterns: Vec::new(),
            naming: NamingConvention::SnakeCase,
        }
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 100,
            ignore: vec![
                "**/.git/**".to_string(),
                "**/node_modules/**".to_string(),
                "**/build/**".to_string(),
                "**/dist/**".to_string(),
                "**/.dart_tool/**".to_string(),
                "**/*.backup.*".to_string(),
            ],
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 100,
            batch_size: 10,
            batch_delay_ms: 500,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            parallel_threshold: 3,
            max_workers: 4,
            progress_threshold: 2,
            cache_max_entries: 1000,
            echo_ttl_ms: 10_000,
        }
    }
}

impl Default for ConflictsConfig {
    fn default() -> Self {
        Self {
            window_ms: 5000,
            backup_retention: 5,
            presenter: "terminal".to_string(),
            diff_tool: None,
        }
    }
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self { history_cap: 100 }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(".irsync"),
            ir_history_limit: 50,
        }
    }
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind: "127.0.0.1:7357".to_string(),
            session_timeout_secs: 60,
            preserve_state: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: SyncMode::default(),
            side_a: SideConfig::default(),
            side_b: SideConfig::default_b(),
            watcher: WatcherConfig::default(),
            queue: QueueConfig::default(),
            engine: EngineConfig::default(),
            conflicts: ConflictsConfig::default(),
            status: StatusConfig::default(),
            storage: StorageConfig::default(),
            protocol: ProtocolConfig::default(),
            plugins: PluginsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config::validate()
// ---------------------------------------------------------------------------

/// A single validation error found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path to the offending field, e.g. `"queue.batch_size"`.
    pub field: String,
    /// Human-readable explanation.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Valid values for `logging.level`.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Valid values for `conflicts.presenter`.
const VALID_PRESENTERS: &[&str] = &["terminal", "json", "diff_tool"];

fn positive(errors: &mut Vec<ValidationError>, field: &str, value: u64) {
    if value == 0 {
        errors.push(ValidationError {
            field: field.into(),
            message: "must be greater than 0".into(),
        });
    }
}

impl Config {
    /// Validate the configuration and return all errors found.
    ///
    /// An empty vector means the configuration is valid.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        // --- sides ---
        for (name, side) in [("side_a", &self.side_a), ("side_b", &self.side_b)] {
            if side.extension.trim_start_matches('.').is_empty() {
                errors.push(ValidationError {
                    field: format!("{name}.extension"),
                    message: "must not be empty".into(),
                });
            }
            for pattern in &side.patterns {
                if let Err(e) = glob::Pattern::new(pattern) {
                    errors.push(ValidationError {
                        field: format!("{name}.patterns"),
                        message: format!("invalid glob '{pattern}': {e}"),
                    });
                }
            }
        }
        if self.side_a.root.starts_with(&self.side_b.root)
            || self.side_b.root.starts_with(&self.side_a.root)
        {
            errors.push(ValidationError {
                field: "side_b.root".into(),
                message: format!(
                    "side roots must not overlap: {} and {}",
                    self.side_a.root.display(),
                    self.side_b.root.display()
                ),
            });
        }

        // --- watcher ---
        positive(&mut errors, "watcher.debounce_ms", self.watcher.debounce_ms);
        for pattern in &self.watcher.ignore {
            if let Err(e) = glob::Pattern::new(pattern) {
                errors.push(ValidationError {
                    field: "watcher.ignore".into(),
                    message: format!("invalid glob '{pattern}': {e}"),
                });
            }
        }

        // --- queue ---
        positive(&mut errors, "queue.max_queue_size", self.queue.max_queue_size as u64);
        positive(&mut errors, "queue.batch_size", self.queue.batch_size as u64);
        if self.queue.batch_size > self.queue.max_queue_size {
            errors.push(ValidationError {
                field: "queue.batch_size".into(),
                message: format!(
                    "batch_size ({}) must not exceed max_queue_size ({})",
                    self.queue.batch_size, self.queue.max_queue_size
                ),
            });
        }

        // --- engine ---
        positive(&mut errors, "engine.parallel_threshold", self.engine.parallel_threshold as u64);
        if self.engine.max_workers == 0 || self.engine.max_workers > 64 {
            errors.push(ValidationError {
                field: "engine.max_workers".into(),
                message: "must be in range 1..=64".into(),
            });
        }
        positive(&mut errors, "engine.cache_max_entries", self.engine.cache_max_entries as u64);

        // --- conflicts ---
        positive(&mut errors, "conflicts.backup_retention", self.conflicts.backup_retention as u64);
        if !VALID_PRESENTERS.contains(&self.conflicts.presenter.as_str()) {
            errors.push(ValidationError {
                field: "conflicts.presenter".into(),
                message: format!(
                    "invalid presenter '{}'; valid options: {}",
                    self.conflicts.presenter,
                    VALID_PRESENTERS.join(", ")
                ),
            });
        }

        // --- status ---
        positive(&mut errors, "status.history_cap", self.status.history_cap as u64);

        // --- storage ---
        positive(&mut errors, "storage.ir_history_limit", self.storage.ir_history_limit as u64);

        // --- protocol ---
        if self.protocol.enabled && self.protocol.bind.parse::<std::net::SocketAddr>().is_err() {
            errors.push(ValidationError {
                field: "protocol.bind".into(),
                message: format!("invalid socket address '{}'", self.protocol.bind),
            });
        }
        positive(&mut errors, "protocol.session_timeout_secs", self.protocol.session_timeout_secs);

        // --- plugins ---
        if self.plugins.convert.is_empty() != self.plugins.generate.is_empty() {
            errors.push(ValidationError {
                field: "plugins".into(),
                message: "convert and generate must be configured together".into(),
            });
        }

        // --- logging ---
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            errors.push(ValidationError {
                field: "logging.level".into(),
                message: format!(
                    "invalid level '{}'; valid options: {}",
                    self.logging.level,
                    VALID_LOG_LEVELS.join(", ")
                ),
            });
        }

        errors
    }
}

// ---------------------------------------------------------------------------
// ConfigBuilder
// ---------------------------------------------------------------------------

/// Builder for constructing a [`Config`] programmatically.
///
/// Starts from [`Config::default`] and allows selective overrides.
///
/// # Example
///
/// ```rust,no_run
/// use irsync_core::config::ConfigBuilder;
/// use irsync_core::domain::SyncMode;
/// use std::path::PathBuf;
///
/// let config = ConfigBuilder::new()
///     .mode(SyncMode::Bidirectional)
///     .side_a_root(PathBuf::from("/work/web"))
///     .side_b_root(PathBuf::from("/work/app"))
///     .conflict_window_ms(3000)
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder initialised with [`Config::default`] values.
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn mode(mut self, mode: SyncMode) -> Self {
        self.config.mode = mode;
        self
    }

    // --- sides ---

    pub fn side_a_root(mut self, root: PathBuf) -> Self {
        self.config.side_a.root = root;
        self
    }

    pub fn side_b_root(mut self, root: PathBuf) -> Self {
        self.config.side_b.root = root;
        self
    }

    pub fn side_extension(mut self, side: Side, extension: impl Into<String>) -> Self {
        match side {
            Side::A => self.config.side_a.extension = extension.into(),
            Side::B => self.config.side_b.extension = extension.into(),
        }
        self
    }

    pub fn side_naming(mut self, side: Side, naming: NamingConvention) -> Self {
        match side {
            Side::A => self.config.side_a.naming = naming,
            Side::B => self.config.side_b.naming = naming,
        }
        self
    }

    // --- watcher ---

    pub fn debounce_ms(mut self, ms: u64) -> Self {
        self.config.watcher.debounce_ms = ms;
        self
    }

    pub fn ignore(mut self, patterns: Vec<String>) -> Self {
        self.config.watcher.ignore = patterns;
        self
    }

    // --- queue ---

    pub fn max_queue_size(mut self, n: usize) -> Self {
        self.config.queue.max_queue_size = n;
        self
    }

    pub fn batch_size(mut self, n: usize) -> Self {
        self.config.queue.batch_size = n;
        self
    }

    pub fn batch_delay_ms(mut self, ms: u64) -> Self {
        self.config.queue.batch_delay_ms = ms;
        self
    }

    // --- engine ---

    pub fn parallel_threshold(mut self, n: usize) -> Self {
        self.config.engine.parallel_threshold = n;
        self
    }

    pub fn max_workers(mut self, n: usize) -> Self {
        self.config.engine.max_workers = n;
        self
    }

    pub fn echo_ttl_ms(mut self, ms: u64) -> Self {
        self.config.engine.echo_ttl_ms = ms;
        self
    }

    // --- conflicts ---

    pub fn conflict_window_ms(mut self, ms: u64) -> Self {
        self.config.conflicts.window_ms = ms;
        self
    }

    pub fn backup_retention(mut self, n: usize) -> Self {
        self.config.conflicts.backup_retention = n;
        self
    }

    // --- storage ---

    pub fn storage_dir(mut self, dir: PathBuf) -> Self {
        self.config.storage.dir = dir;
        self
    }

    // --- protocol ---

    pub fn protocol_bind(mut self, bind: impl Into<String>) -> Self {
        self.config.protocol.enabled = true;
        self.config.protocol.bind = bind.into();
        self
    }

    // --- plugins ---

    pub fn plugins(mut self, plugins: PluginsConfig) -> Self {
        self.config.plugins = plugins;
        self
    }

    // --- logging ---

    pub fn logging_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    // --- build ---

    /// Consume the builder and return the finished [`Config`].
    pub fn build(self) -> Config {
        self.config
    }

    /// Build and validate in one step. Returns `Err` with the list of
    /// validation errors if the configuration is invalid.
    pub fn build_validated(self) -> Result<Config, Vec<ValidationError>> {
        let config = self.build();
        let errors = config.validate();
        if errors.is_empty() {
            Ok(config)
        } else {
            Err(errors)
        }
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    // -- Defaults --

    #[test]
    fn default_config_has_sensible_values() {
        let cfg = Config::default();
        assert_eq!(cfg.mode, SyncMode::Bidirectional);
        assert_eq!(cfg.watcher.debounce_ms, 100);
        assert_eq!(cfg.queue.max_queue_size, 100);
        assert_eq!(cfg.queue.batch_size, 10);
        assert_eq!(cfg.queue.batch_delay_ms, 500);
        assert_eq!(cfg.engine.parallel_threshold, 3);
        assert_eq!(cfg.engine.progress_threshold, 2);
        assert_eq!(cfg.engine.echo_ttl_ms, 10_000);
        assert_eq!(cfg.conflicts.window_ms, 5000);
        assert_eq!(cfg.conflicts.backup_retention, 5);
        assert_eq!(cfg.status.history_cap, 100);
        assert_eq!(cfg.side_a.extension, "tsx");
        assert_eq!(cfg.side_b.extension, "dart");
        assert_eq!(cfg.side_b.naming, NamingConvention::SnakeCase);
        assert!(!cfg.protocol.enabled);
        assert!(cfg.protocol.preserve_state);
        assert_eq!(cfg.logging.level, "info");
    }

    #[test]
    fn default_config_passes_validation() {
        let errors = Config::default().validate();
        assert!(errors.is_empty(), "unexpected validation errors: {errors:?}");
    }

    // -- Loading --

    #[test]
    fn load_from_yaml_file_resolves_relative_paths() {
        let yaml = r#"
mode: a_primary
side_a:
  root: web
  extension: tsx
  naming: pascal_case
side_b:
  root: /abs/app
  extension: dart
  naming: snake_case
queue:
  batch_size: 5
conflicts:
  window_ms: 2000
protocol:
  preserve_state: false
plugins:
  convert: ["node", "convert.js"]
  generate: ["node", "generate.js"]
"#;
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("irsync.yaml");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(yaml.as_bytes()).unwrap();

        let cfg = Config::load(&path).expect("load config");
        assert_eq!(cfg.mode, SyncMode::APrimary);
        assert_eq!(cfg.side_a.root, dir.path().join("web"));
        assert_eq!(cfg.side_b.root, PathBuf::from("/abs/app"));
        assert_eq!(cfg.storage.dir, dir.path().join(".irsync"));
        assert_eq!(cfg.queue.batch_size, 5);
        // Unspecified fields keep their defaults
        assert_eq!(cfg.queue.batch_delay_ms, 500);
        assert_eq!(cfg.conflicts.window_ms, 2000);
        assert!(!cfg.protocol.preserve_state);
        assert_eq!(cfg.protocol.session_timeout_secs, 60);
        assert!(cfg.plugins.is_configured());
    }

    #[test]
    fn missing_side_b_section_uses_side_b_defaults() {
        let cfg: Config = serde_yaml::from_str("mode: bidirectional\n").unwrap();
        assert_eq!(cfg.side_b.extension, "dart");
        assert_eq!(cfg.side_a.extension, "tsx");
    }

    #[test]
    fn load_or_default_on_missing_file() {
        let cfg = Config::load_or_default(Path::new("/nonexistent/irsync.yaml"));
        assert_eq!(cfg.queue.batch_size, 10);
    }

    // -- Validation --

    #[test]
    fn validate_reports_dotted_fields() {
        let cfg = ConfigBuilder::new()
            .batch_size(0)
            .debounce_ms(0)
            .max_workers(0)
            .logging_level("loud")
            .build();
        let fields: Vec<_> = cfg.validate().into_iter().map(|e| e.field).collect();
        assert!(fields.contains(&"queue.batch_size".to_string()));
        assert!(fields.contains(&"watcher.debounce_ms".to_string()));
        assert!(fields.contains(&"engine.max_workers".to_string()));
        assert!(fields.contains(&"logging.level".to_string()));
    }

    #[test]
    fn validate_rejects_overlapping_roots() {
        let cfg = ConfigBuilder::new()
            .side_a_root(PathBuf::from("/work"))
            .side_b_root(PathBuf::from("/work/app"))
            .build();
        assert!(cfg.validate().iter().any(|e| e.field == "side_b.root"));
    }

    #[test]
    fn validate_requires_paired_plugins() {
        let cfg = ConfigBuilder::new()
            .plugins(PluginsConfig {
                convert: vec!["conv".into()],
                ..Default::default()
            })
            .build();
        assert!(cfg.validate().iter().any(|e| e.field == "plugins"));
    }

    #[test]
    fn build_validated_ok() {
        let cfg = ConfigBuilder::new()
            .side_a_root(PathBuf::from("/w/web"))
            .side_b_root(PathBuf::from("/w/app"))
            .conflict_window_ms(3000)
            .build_validated()
            .unwrap();
        assert_eq!(cfg.conflicts.window_ms, 3000);
    }

    #[test]
    fn effective_patterns_default_to_extension() {
        let cfg = Config::default();
        assert_eq!(cfg.side_a.effective_patterns(), vec!["**/*.tsx".to_string()]);
        let mapper = cfg.path_mapper();
        assert_eq!(mapper.layout(Side::B).extension, "dart");
    }
}
