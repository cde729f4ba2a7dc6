//! irsync Daemon - Background synchronization service
//!
//! Runs the sync pipeline between the two configured sides and handles:
//! - Configuration loading and validation
//! - Converter plugins from `plugins.*`
//! - Conflict notices through the configured presenter
//! - The optional hot-reload server
//! - Periodic Prometheus metrics snapshots under the storage directory
//! - Graceful shutdown on SIGTERM/SIGINT
//!
//! # Architecture
//!
//! `main` parses flags, initializes tracing and hands a `CancellationToken`
//! to [`DaemonService::run`]. The token is cancelled by the signal handler;
//! the service then stops the pipeline, which syncs any queued changes
//! before returning.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use irsync_conflict::{ConflictPresenter, DiffToolPresenter, JsonPresenter, TerminalPresenter};
use irsync_core::config::{Config, ConflictsConfig};
use irsync_core::domain::{ConflictRecord, SyncMode};
use irsync_core::ports::ConverterRegistry;
use irsync_protocol::{HotReloadHub, HotReloadServer};
use irsync_sync::{ProcessConverter, SyncPipeline};
use irsync_telemetry::{MetricsRegistry, StatusChange, StatusEvent};

/// How often the metrics snapshot is rewritten
const METRICS_INTERVAL: Duration = Duration::from_secs(15);

// ============================================================================
// CLI
// ============================================================================

#[derive(Debug, Parser)]
#[command(name = "irsyncd", version, about = "Keeps two source trees in sync through a shared IR")]
struct Cli {
    /// Configuration file
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Override the configured mode (a-primary, b-primary, bidirectional)
    #[arg(long)]
    mode: Option<SyncMode>,

    /// Override the configured log level
    #[arg(long)]
    log_level: Option<String>,

    /// Log as JSON lines
    #[arg(long)]
    json_logs: bool,

    /// Validate the configuration and exit
    #[arg(long)]
    check: bool,
}

impl Cli {
    /// Loads the configuration file and applies flag overrides
    fn load_config(&self) -> Result<Config> {
        let path = self.config.clone().unwrap_or_else(Config::default_path);
        let mut config = if path.exists() {
            Config::load(&path)?
        } else if self.config.is_some() {
            bail!("Config file {} does not exist", path.display());
        } else {
            Config::default()
        };

        if let Some(mode) = self.mode {
            config.mode = mode;
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
        if self.json_logs {
            config.logging.json = true;
        }
        Ok(config)
    }
}

fn init_tracing(config: &Config) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    if config.logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}

// ============================================================================
// Wiring helpers
// ============================================================================

/// Converter registry backed by the configured plugin commands
fn build_converters(config: &Config) -> Result<ConverterRegistry> {
    let Some(converter) = ProcessConverter::from_config(&config.plugins) else {
        bail!("No converter configured: set plugins.convert and plugins.generate");
    };
    let has_test_command = converter.has_test_command();
    let converter = Arc::new(converter);

    let mut registry = ConverterRegistry::uniform(converter.clone());
    if has_test_command {
        registry = registry.with_test_converter(converter);
    }
    Ok(registry)
}

fn build_presenter(conflicts: &ConflictsConfig) -> Result<Arc<dyn ConflictPresenter>> {
    let presenter: Arc<dyn ConflictPresenter> = match conflicts.presenter.as_str() {
        "json" => Arc::new(JsonPresenter::stdout()),
        "diff_tool" => Arc::new(
            DiffToolPresenter::detect(conflicts.diff_tool.as_deref())
                .context("Failed to set up diff tool presenter")?,
        ),
        _ => Arc::new(TerminalPresenter::stdout()),
    };
    Ok(presenter)
}

fn log_status(event: &StatusEvent) -> Result<()> {
    match &event.change {
        StatusChange::StateChanged { from, to } => info!(
            %from,
            %to,
            message = event.message.as_deref().unwrap_or(""),
            total = event.statistics.total,
            failed = event.statistics.failed,
            "Sync state changed"
        ),
        StatusChange::ConflictRecorded { conflict } => {
            warn!(conflict_id = %conflict, "Conflict needs resolution")
        }
        _ => {}
    }
    Ok(())
}

async fn write_metrics(metrics: &MetricsRegistry, path: &std::path::Path) {
    let result = async {
        let text = metrics.encode()?;
        tokio::fs::write(path, text)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))
    }
    .await;
    if let Err(e) = result {
        warn!(error = %e, "Metrics snapshot failed");
    }
}

// ============================================================================
// DaemonService
// ============================================================================

/// Owns the pipeline and the optional hot-reload server
struct DaemonService {
    config: Config,
    metrics: Arc<MetricsRegistry>,
    shutdown: CancellationToken,
}

impl DaemonService {
    fn new(config: Config, shutdown: CancellationToken) -> Result<Self> {
        let metrics = Arc::new(MetricsRegistry::new().context("Failed to create metrics")?);
        Ok(Self {
            config,
            metrics,
            shutdown,
        })
    }

    /// Runs until the shutdown token is cancelled
    ///
    /// 1. Builds converters, presenter and (optionally) the hot-reload hub
    /// 2. Builds and starts the sync pipeline
    /// 3. Snapshots metrics periodically until shutdown
    /// 4. Stops the pipeline and the hot-reload server
    async fn run(&self) -> Result<()> {
        let converters = build_converters(&self.config)?;
        let presenter = build_presenter(&self.config.conflicts)?;

        let mut builder = SyncPipeline::builder(self.config.clone(), converters)
            .metrics(Arc::clone(&self.metrics));

        let mut server_task = None;
        if self.config.protocol.enabled {
            let hub = Arc::new(HotReloadHub::new(Duration::from_secs(
                self.config.protocol.session_timeout_secs,
            )));
            let server = HotReloadServer::bind(&self.config.protocol.bind, Arc::clone(&hub))
                .await
                .with_context(|| {
                    format!("Failed to bind hot-reload server to {}", self.config.protocol.bind)
                })?;
            info!(addr = %server.local_addr()?, "Hot-reload server bound");
            server_task = Some(tokio::spawn(server.run(self.shutdown.child_token())));
            builder = builder.hot_reload(hub);
        }

        let pipeline = builder.build().await.context("Failed to build sync pipeline")?;
        pipeline.on_status_update(Arc::new(log_status));

        let runtime = tokio::runtime::Handle::current();
        pipeline.on_conflict(Arc::new(move |conflict: &ConflictRecord| -> Result<()> {
            let presenter = Arc::clone(&presenter);
            let conflict = conflict.clone();
            runtime.spawn(async move {
                if let Err(e) = presenter.notify(&conflict).await {
                    warn!(conflict_id = %conflict.id(), error = %e, "Conflict presenter failed");
                }
            });
            Ok(())
        }));

        let open = pipeline.get_unresolved_conflicts().await?;
        if !open.is_empty() {
            warn!(count = open.len(), "Unresolved conflicts from a previous run hold their files");
        }

        pipeline.start().await.context("Failed to start sync pipeline")?;
        info!(
            mode = %pipeline.profile().describe(),
            side_a = %self.config.side_a.root.display(),
            side_b = %self.config.side_b.root.display(),
            "irsync daemon running"
        );

        let metrics_path = self.config.storage.dir.join("metrics.prom");
        let mut ticker = tokio::time::interval(METRICS_INTERVAL);
        loop {
            tokio::select! {
                _ = ticker.tick() => write_metrics(&self.metrics, &metrics_path).await,
                _ = self.shutdown.cancelled() => break,
            }
        }

        info!("Stopping sync pipeline");
        if let Err(e) = pipeline.stop().await {
            warn!(error = %e, "Pipeline stop reported an error");
        }
        write_metrics(&self.metrics, &metrics_path).await;

        if let Some(task) = server_task {
            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "Hot-reload server failed"),
                Err(e) => warn!(error = %e, "Hot-reload server task panicked"),
            }
        }
        Ok(())
    }
}

// ============================================================================
// Graceful shutdown signal handler
// ============================================================================

/// Waits for SIGTERM or SIGINT and triggers the cancellation token
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C)");
        }
        _ = terminate => {
            info!("Received SIGTERM");
        }
    }

    token.cancel();
}

// ============================================================================
// Main entry point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = cli.load_config()?;
    init_tracing(&config);

    let errors = config.validate();
    if !errors.is_empty() {
        for e in &errors {
            error!(field = %e.field, "{}", e.message);
        }
        bail!("Configuration has {} error(s)", errors.len());
    }
    if cli.check {
        info!("Configuration is valid");
        return Ok(());
    }

    info!(mode = %config.mode, "irsync daemon starting (irsyncd)");

    let shutdown_token = CancellationToken::new();
    let signal_token = shutdown_token.clone();
    tokio::spawn(async move {
        shutdown_signal(signal_token).await;
    });

    let service = DaemonService::new(config, shutdown_token)?;
    let result = service.run().await;

    match &result {
        Ok(()) => info!("irsync daemon shut down gracefully"),
        Err(e) => error!(error = %e, "irsync daemon exiting with error"),
    }

    result
}

// ============================================================================
// Tests
// ============================================================================
