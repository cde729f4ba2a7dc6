//! File watching with per-path debouncing
//!
//! [`FileWatcher`] wraps the `notify` crate, keeps only paths matching a
//! side's include globs and none of the ignore globs, and feeds them through a
//! [`Debouncer`] so each path yields one [`FileChangeEvent`] once it has been
//! quiet for the debounce window.
//!
//! ## Architecture
//!
//! ```text
//! inotify / FSEvents / kqueue
//!       │  (notify callback thread)
//!       ▼
//!  raw channel ──→ pump task ──→ Debouncer ──→ subscribers (mpsc)
//! ```
//!
//! Both the watcher and [`ManualChangeSource`] implement [`ChangeSource`], so
//! the pipeline can be driven by synthetic events in tests.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use glob::{MatchOptions, Pattern};
use notify::event::{ModifyKind, RenameMode};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use irsync_core::config::Config;
use irsync_core::domain::{ChangeKind, FileChangeEvent, Side};

use crate::SyncError;

/// Buffered events per subscriber
const SUBSCRIBER_BUFFER: usize = 1024;

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

// ============================================================================
// ChangeSource
// ============================================================================

/// Anything that produces debounced change events
#[async_trait::async_trait]
pub trait ChangeSource: Send {
    /// Adds a listener; must be called before [`ChangeSource::start`]
    fn subscribe(&mut self) -> mpsc::Receiver<FileChangeEvent>;

    /// Begins emitting events
    async fn start(&mut self) -> Result<()>;

    /// Stops emitting, cancels pending timers and closes every subscriber
    async fn stop(&mut self) -> Result<()>;
}

// ============================================================================
// WatchTarget - include/ignore filtering per side
// ============================================================================

/// One watched root with its glob filters
#[derive(Debug, Clone)]
pub struct WatchTarget {
    side: Side,
    root: PathBuf,
    include: Vec<Pattern>,
    ignore: Vec<Pattern>,
}

fn compile(patterns: &[String]) -> Result<Vec<Pattern>, SyncError> {
    patterns
        .iter()
        .map(|p| {
            Pattern::new(p).map_err(|e| SyncError::Config(format!("invalid glob '{p}': {e}")))
        })
        .collect()
}

impl WatchTarget {
    /// # Errors
    /// Returns [`SyncError::Config`] if a pattern is not a valid glob.
    pub fn new(
        side: Side,
        root: impl Into<PathBuf>,
        include: &[String],
        ignore: &[String],
    ) -> Result<Self, SyncError> {
        Ok(Self {
            side,
            root: root.into(),
            include: compile(include)?,
            ignore: compile(ignore)?,
        })
    }

    /// Target for `side` as configured
    ///
    /// # Errors
    /// Returns [`SyncError::Config`] for invalid globs.
    pub fn from_config(config: &Config, side: Side) -> Result<Self, SyncError> {
        let side_config = config.side(side);
        Self::new(
            side,
            side_config.root.clone(),
            &side_config.effective_patterns(),
            &config.watcher.ignore,
        )
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns true if `path` is under the root, matches an include pattern
    /// and matches no ignore pattern
    pub fn matches(&self, path: &Path) -> bool {
        let Ok(relative) = path.strip_prefix(&self.root) else {
            return false;
        };
        if self
            .ignore
            .iter()
            .any(|p| p.matches_path_with(relative, MATCH_OPTIONS))
        {
            return false;
        }
        self.include
            .iter()
            .any(|p| p.matches_path_with(relative, MATCH_OPTIONS))
    }
}

// ============================================================================
// Debouncer
// ============================================================================

struct Pending {
    generation: u64,
    event: FileChangeEvent,
    timer: JoinHandle<()>,
}

#[derive(Default)]
struct DebounceState {
    next_generation: u64,
    pending: HashMap<PathBuf, Pending>,
}

/// Per-path quiet-period timers
///
/// Every raw event for a path restarts that path's timer. When a timer
/// elapses the merged event is sent to every sink.
pub struct Debouncer {
    delay: Duration,
    state: Arc<Mutex<DebounceState>>,
    sinks: Arc<Vec<mpsc::Sender<FileChangeEvent>>>,
}

/// Kind reported for a path that saw `previous` and then `next` in one window
///
/// `None` means the two cancel out (created then removed).
fn merge_kinds(previous: ChangeKind, next: ChangeKind) -> Option<ChangeKind> {
    match (previous, next) {
        (ChangeKind::Add, ChangeKind::Delete) => None,
        (ChangeKind::Add, _) => Some(ChangeKind::Add),
        (ChangeKind::Delete, ChangeKind::Add) => Some(ChangeKind::Change),
        (_, next) => Some(next),
    }
}

impl Debouncer {
    pub fn new(delay: Duration, sinks: Vec<mpsc::Sender<FileChangeEvent>>) -> Self {
        Self {
            delay,
            state: Arc::new(Mutex::new(DebounceState::default())),
            sinks: Arc::new(sinks),
        }
    }

    /// Records a raw event and (re)starts the timer for its path
    ///
    /// Must be called from within a tokio runtime.
    pub fn push(&self, event: FileChangeEvent) {
        let path = event.path().to_path_buf();
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        let kind = match state.pending.remove(&path) {
            Some(previous) => {
                previous.timer.abort();
                match merge_kinds(previous.event.kind(), event.kind()) {
                    Some(kind) => kind,
                    None => {
                        trace!(path = %path.display(), "create and delete cancelled out");
                        return;
                    }
                }
            }
            None => event.kind(),
        };
        let event = FileChangeEvent::new(kind, path.clone(), event.side(), event.timestamp());

        state.next_generation += 1;
        let generation = state.next_generation;
        let timer = tokio::spawn(Self::fire(
            self.delay,
            generation,
            path.clone(),
            Arc::clone(&self.state),
            Arc::clone(&self.sinks),
        ));
        state.pending.insert(
            path,
            Pending {
                generation,
                event,
                timer,
            },
        );
    }

    async fn fire(
        delay: Duration,
        generation: u64,
        path: PathBuf,
        state: Arc<Mutex<DebounceState>>,
        sinks: Arc<Vec<mpsc::Sender<FileChangeEvent>>>,
    ) {
        tokio::time::sleep(delay).await;
        let event = {
            let mut state = state.lock().unwrap_or_else(|e| e.into_inner());
            let current = state
                .pending
                .get(&path)
                .is_some_and(|p| p.generation == generation);
            if current {
                state.pending.remove(&path)
            } else {
                None
            }
        };
        let Some(Pending { event, .. }) = event else {
            return;
        };

        debug!(path = %path.display(), kind = %event.kind(), side = %event.side(), "change settled");
        for sink in sinks.iter() {
            if sink.send(event.clone()).await.is_err() {
                debug!(path = %path.display(), "change listener dropped");
            }
        }
    }

    /// Number of paths waiting for their quiet period to end
    pub fn pending_count(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pending
            .len()
    }

    /// Aborts every pending timer without emitting
    pub fn cancel_all(&self) -> usize {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let count = state.pending.len();
        for (_, pending) in state.pending.drain() {
            pending.timer.abort();
        }
        count
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

// ============================================================================
// FileWatcher
// ============================================================================

struct Running {
    _watcher: RecommendedWatcher,
    pump: JoinHandle<()>,
    debouncer: Arc<Debouncer>,
}

/// Watches the roots of both sides and emits debounced events
///
/// # Example
///
/// ```no_run
/// # use irsync_sync::watcher::{ChangeSource, FileWatcher};
/// # async fn example(config: irsync_core::config::Config) -> anyhow::Result<()> {
/// let mut watcher = FileWatcher::from_config(&config)?;
/// let mut rx = watcher.subscribe();
/// watcher.start().await?;
/// while let Some(event) = rx.recv().await {
///     println!("{} {}", event.kind(), event.path().display());
/// }
/// # Ok(())
/// # }
/// ```
pub struct FileWatcher {
    targets: Arc<Vec<WatchTarget>>,
    debounce: Duration,
    listeners: Vec<mpsc::Sender<FileChangeEvent>>,
    running: Option<Running>,
}

impl FileWatcher {
    pub fn new(targets: Vec<WatchTarget>, debounce: Duration) -> Self {
        Self {
            targets: Arc::new(targets),
            debounce,
            listeners: Vec::new(),
            running: None,
        }
    }

    /// Watcher for every side the configured mode watches
    ///
    /// # Errors
    /// Returns [`SyncError::Config`] for invalid globs.
    pub fn from_config(config: &Config) -> Result<Self, SyncError> {
        let targets = config
            .mode
            .watched_sides()
            .iter()
            .map(|side| WatchTarget::from_config(config, *side))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(
            targets,
            Duration::from_millis(config.watcher.debounce_ms),
        ))
    }

    pub fn targets(&self) -> &[WatchTarget] {
        &self.targets
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Paths with a debounce timer still pending
    pub fn pending_count(&self) -> usize {
        self.running
            .as_ref()
            .map_or(0, |r| r.debouncer.pending_count())
    }
}

#[async_trait::async_trait]
impl ChangeSource for FileWatcher {
    fn subscribe(&mut self) -> mpsc::Receiver<FileChangeEvent> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        self.listeners.push(tx);
        rx
    }

    async fn start(&mut self) -> Result<()> {
        if self.running.is_some() {
            warn!("File watcher already running");
            return Ok(());
        }

        let (raw_tx, raw_rx) = mpsc::unbounded_channel::<notify::Event>();
        let mut watcher = RecommendedWatcher::new(
            move |res: std::result::Result<notify::Event, notify::Error>| match res {
                Ok(event) => {
                    if raw_tx.send(event).is_err() {
                        trace!("raw event dropped after shutdown");
                    }
                }
                Err(err) => {
                    error!(error = %err, "File watcher error");
                }
            },
            notify::Config::default(),
        )
        .context("Failed to create file watcher")?;

        for target in self.targets.iter() {
            tokio::fs::create_dir_all(&target.root)
                .await
                .with_context(|| format!("Failed to create root {}", target.root.display()))?;
            watcher
                .watch(&target.root, RecursiveMode::Recursive)
                .with_context(|| format!("Failed to watch path: {}", target.root.display()))?;
            info!(side = %target.side, root = %target.root.display(), "Watching side");
        }

        let debouncer = Arc::new(Debouncer::new(self.debounce, self.listeners.clone()));
        let pump = tokio::spawn(pump_events(
            raw_rx,
            Arc::clone(&self.targets),
            Arc::clone(&debouncer),
        ));

        self.running = Some(Running {
            _watcher: watcher,
            pump,
            debouncer,
        });
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(running) = self.running.take() {
            let Running {
                _watcher: watcher,
                pump,
                debouncer,
            } = running;
            // Dropping the watcher releases the OS handles and closes the raw channel
            drop(watcher);
            pump.abort();
            let _ = pump.await;
            let cancelled = debouncer.cancel_all();
            info!(cancelled, "File watcher stopped");
        }
        self.listeners.clear();
        Ok(())
    }
}

async fn pump_events(
    mut raw: mpsc::UnboundedReceiver<notify::Event>,
    targets: Arc<Vec<WatchTarget>>,
    debouncer: Arc<Debouncer>,
) {
    while let Some(event) = raw.recv().await {
        for (kind, path) in map_notify_event(&event) {
            match targets.iter().find(|t| t.matches(&path)) {
                Some(target) => debouncer.push(FileChangeEvent::now(kind, path, target.side)),
                None => trace!(path = %path.display(), "ignoring unmatched path"),
            }
        }
    }
}

// ============================================================================
// Event mapping - notify::Event → (ChangeKind, path)
// ============================================================================

/// Converts a `notify::Event` into zero or more changes
///
/// - `Create(*)` → `Add`
/// - `Modify(Data(*))` and other content modifications → `Change`
/// - `Modify(Name(Both))` with two paths → `Delete` old, `Add` new
/// - `Modify(Name(From))` → `Delete`, `Modify(Name(To))` → `Add`
/// - `Remove(*)` → `Delete`
///
/// Access and metadata-only events are ignored.
fn map_notify_event(event: &notify::Event) -> Vec<(ChangeKind, PathBuf)> {
    let paths = &event.paths;
    let first = |kind: ChangeKind| {
        paths
            .first()
            .map(|p| vec![(kind, p.clone())])
            .unwrap_or_default()
    };

    match &event.kind {
        EventKind::Create(_) => first(ChangeKind::Add),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            if paths.len() >= 2 {
                vec![
                    (ChangeKind::Delete, paths[0].clone()),
                    (ChangeKind::Add, paths[1].clone()),
                ]
            } else {
                first(ChangeKind::Change)
            }
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => first(ChangeKind::Delete),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => first(ChangeKind::Add),
        EventKind::Modify(ModifyKind::Metadata(_)) => Vec::new(),
        EventKind::Modify(_) => first(ChangeKind::Change),
        EventKind::Remove(_) => first(ChangeKind::Delete),
        _ => {
            trace!(kind = ?event.kind, "Ignoring event kind");
            Vec::new()
        }
    }
}

// ============================================================================
// ManualChangeSource - synthetic events
// ============================================================================

/// A [`ChangeSource`] fed by hand through a [`ManualChangeHandle`]
///
/// Events are delivered as-is, without debouncing.
#[derive(Default)]
pub struct ManualChangeSource {
    shared: Arc<ManualShared>,
}

#[derive(Default)]
struct ManualShared {
    running: AtomicBool,
    listeners: Mutex<Vec<mpsc::Sender<FileChangeEvent>>>,
}

/// Cloneable handle used to emit events into a [`ManualChangeSource`]
#[derive(Clone)]
pub struct ManualChangeHandle {
    shared: Arc<ManualShared>,
}

impl ManualChangeSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&self) -> ManualChangeHandle {
        ManualChangeHandle {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl ManualChangeHandle {
    /// Sends `event` to every listener; returns false if the source is stopped
    pub async fn emit(&self, event: FileChangeEvent) -> bool {
        if !self.shared.running.load(Ordering::SeqCst) {
            return false;
        }
        let listeners = self
            .shared
            .listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        for listener in listeners {
            if listener.send(event.clone()).await.is_err() {
                debug!("change listener dropped");
            }
        }
        true
    }
}

#[async_trait::async_trait]
impl ChangeSource for ManualChangeSource {
    fn subscribe(&mut self) -> mpsc::Receiver<FileChangeEvent> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        self.shared
            .listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(tx);
        rx
    }

    async fn start(&mut self) -> Result<()> {
        self.shared.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        self.shared.running.store(false, Ordering::SeqCst);
        self.shared
            .listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn event(kind: ChangeKind, path: &str) -> FileChangeEvent {
        FileChangeEvent::now(kind, PathBuf::from(path), Side::A)
    }

    fn target() -> WatchTarget {
        WatchTarget::new(
            Side::A,
            "/proj/web",
            &["**/*.tsx".to_string()],
            &["**/node_modules/**".to_string(), "**/*.backup.*".to_string()],
        )
        .unwrap()
    }

    #[test]
    fn test_target_matches_extension_globs() {
        let t = target();
        assert!(t.matches(Path::new("/proj/web/App.tsx")));
        assert!(t.matches(Path::new("/proj/web/components/Button.tsx")));
        assert!(!t.matches(Path::new("/proj/web/styles.css")));
        assert!(!t.matches(Path::new("/proj/app/App.tsx")));
    }

    #[test]
    fn test_target_honours_ignore_patterns() {
        let t = target();
        assert!(!t.matches(Path::new("/proj/web/node_modules/lib/Thing.tsx")));
        assert!(!t.matches(Path::new("/proj/web/Button.backup.1700000000000.tsx")));
    }

    #[test]
    fn test_invalid_glob_is_a_config_error() {
        let err = WatchTarget::new(Side::B, "/x", &["[".to_string()], &[]).unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));
    }

    #[test]
    fn test_merge_kinds() {
        assert_eq!(merge_kinds(ChangeKind::Add, ChangeKind::Change), Some(ChangeKind::Add));
        assert_eq!(merge_kinds(ChangeKind::Add, ChangeKind::Delete), None);
        assert_eq!(merge_kinds(ChangeKind::Delete, ChangeKind::Add), Some(ChangeKind::Change));
        assert_eq!(merge_kinds(ChangeKind::Change, ChangeKind::Delete), Some(ChangeKind::Delete));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rapid_writes_collapse_to_one_event() {
        let (tx, mut rx) = mpsc::channel(8);
        let debouncer = Debouncer::new(Duration::from_millis(100), vec![tx]);

        for _ in 0..5 {
            debouncer.push(event(ChangeKind::Change, "/proj/web/App.tsx"));
            tokio::time::advance(Duration::from_millis(30)).await;
        }
        assert_eq!(debouncer.pending_count(), 1);

        let settled = rx.recv().await.unwrap();
        assert_eq!(settled.kind(), ChangeKind::Change);
        assert_eq!(settled.path(), Path::new("/proj/web/App.tsx"));
        assert_eq!(debouncer.pending_count(), 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_paths_debounce_independently() {
        let (tx, mut rx) = mpsc::channel(8);
        let debouncer = Debouncer::new(Duration::from_millis(100), vec![tx]);

        debouncer.push(event(ChangeKind::Add, "/proj/web/A.tsx"));
        tokio::time::advance(Duration::from_millis(60)).await;
        debouncer.push(event(ChangeKind::Change, "/proj/web/B.tsx"));

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.path(), Path::new("/proj/web/A.tsx"));
        assert_eq!(second.path(), Path::new("/proj/web/B.tsx"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_all_prevents_emission() {
        let (tx, mut rx) = mpsc::channel(8);
        let debouncer = Debouncer::new(Duration::from_millis(100), vec![tx]);
        debouncer.push(event(ChangeKind::Change, "/proj/web/A.tsx"));
        debouncer.push(event(ChangeKind::Change, "/proj/web/B.tsx"));

        assert_eq!(debouncer.cancel_all(), 2);
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_every_sink_receives_the_event() {
        let (tx1, mut rx1) = mpsc::channel(8);
        let (tx2, mut rx2) = mpsc::channel(8);
        let debouncer = Debouncer::new(Duration::from_millis(10), vec![tx1, tx2]);
        debouncer.push(event(ChangeKind::Delete, "/proj/web/Gone.tsx"));

        assert_eq!(rx1.recv().await.unwrap().kind(), ChangeKind::Delete);
        assert_eq!(rx2.recv().await.unwrap().kind(), ChangeKind::Delete);
    }

    #[test]
    fn test_map_rename_event() {
        let raw = notify::Event {
            kind: EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
            paths: vec![PathBuf::from("/w/Old.tsx"), PathBuf::from("/w/New.tsx")],
            attrs: Default::default(),
        };
        assert_eq!(
            map_notify_event(&raw),
            vec![
                (ChangeKind::Delete, PathBuf::from("/w/Old.tsx")),
                (ChangeKind::Add, PathBuf::from("/w/New.tsx")),
            ]
        );
    }

    #[test]
    fn test_map_create_modify_remove() {
        let make = |kind| notify::Event {
            kind,
            paths: vec![PathBuf::from("/w/A.tsx")],
            attrs: Default::default(),
        };
        assert_eq!(
            map_notify_event(&make(EventKind::Create(notify::event::CreateKind::File)))[0].0,
            ChangeKind::Add
        );
        assert_eq!(
            map_notify_event(&make(EventKind::Modify(ModifyKind::Data(
                notify::event::DataChange::Content
            ))))[0]
                .0,
            ChangeKind::Change
        );
        assert_eq!(
            map_notify_event(&make(EventKind::Remove(notify::event::RemoveKind::File)))[0].0,
            ChangeKind::Delete
        );
        assert!(map_notify_event(&make(EventKind::Modify(ModifyKind::Metadata(
            notify::event::MetadataKind::Permissions
        ))))
        .is_empty());
        assert!(map_notify_event(&make(EventKind::Access(notify::event::AccessKind::Any))).is_empty());
    }

    #[tokio::test]
    async fn test_manual_source_delivers_only_while_running() {
        let mut source = ManualChangeSource::new();
        let handle = source.handle();
        let mut rx = source.subscribe();

        assert!(!handle.emit(event(ChangeKind::Add, "/proj/web/A.tsx")).await);
        source.start().await.unwrap();
        assert!(handle.emit(event(ChangeKind::Add, "/proj/web/A.tsx")).await);
        assert_eq!(rx.recv().await.unwrap().kind(), ChangeKind::Add);

        source.stop().await.unwrap();
        assert!(rx.recv().await.is_none());
    }
}
