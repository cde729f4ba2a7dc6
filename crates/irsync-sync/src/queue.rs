//! Prioritised, batching change queue
//!
//! A single actor task owns the queued changes. Callers talk to it through
//! [`ChangeQueue`]; batches come out of [`ChangeQueue::subscribe`] receivers.
//!
//! Ordering is priority first (`High` < `Normal` < `Low`), then arrival. A
//! batch is handed off as soon as `batch_size` changes are queued, or after
//! `batch_delay` without a new change. A batch is only handed off when every
//! subscriber has room for it, so changes keep accumulating (and get evicted
//! past `max_queue_size`) while the consumer is busy.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use irsync_core::config::QueueConfig;
use irsync_core::domain::{FileChangeEvent, PathMapper};
use irsync_telemetry::MetricsRegistry;

use crate::SyncError;

/// Batches buffered per subscriber
const SUBSCRIBER_BUFFER: usize = 2;

/// File stems treated as application entry points
const ENTRY_POINT_STEMS: &[&str] = &["main", "app", "index"];

/// Directory names holding documentation
const DOC_DIRS: &[&str] = &["doc", "docs"];

// ============================================================================
// Priority
// ============================================================================

/// Dispatch priority derived from the file path
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    Normal,
    Low,
}

impl Priority {
    /// Entry points are `High`, tests and docs are `Low`
    pub fn for_path(path: &Path) -> Self {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        let in_docs = path.components().any(|c| match c {
            Component::Normal(name) => DOC_DIRS.contains(&name.to_string_lossy().as_ref()),
            _ => false,
        });
        if in_docs || PathMapper::is_test_file(path) {
            return Priority::Low;
        }
        if ENTRY_POINT_STEMS.contains(&stem.as_str()) {
            return Priority::High;
        }
        Priority::Normal
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Normal => "normal",
            Priority::Low => "low",
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A change waiting in the queue
#[derive(Debug, Clone)]
pub struct QueuedChange {
    pub event: FileChangeEvent,
    pub priority: Priority,
    pub queued_at: Instant,
    /// Arrival order, unique per queue
    pub seq: u64,
}

/// Changes handed to a subscriber together
pub type Batch = Vec<QueuedChange>;

/// Queue limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueSettings {
    pub max_queue_size: usize,
    pub batch_size: usize,
    pub batch_delay: Duration,
}

impl From<&QueueConfig> for QueueSettings {
    fn from(config: &QueueConfig) -> Self {
        Self {
            max_queue_size: config.max_queue_size.max(1),
            batch_size: config.batch_size.max(1),
            batch_delay: Duration::from_millis(config.batch_delay_ms),
        }
    }
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self::from(&QueueConfig::default())
    }
}

// ============================================================================
// Actor state
// ============================================================================

enum Command {
    Enqueue(FileChangeEvent),
    Flush(oneshot::Sender<usize>),
    Close(oneshot::Sender<usize>),
}

type Subscribers = Arc<Mutex<Vec<mpsc::Sender<Batch>>>>;

struct QueueState {
    settings: QueueSettings,
    entries: Vec<QueuedChange>,
    next_seq: u64,
    deadline: Option<Instant>,
}

impl QueueState {
    fn push(&mut self, event: FileChangeEvent) -> Option<QueuedChange> {
        let priority = Priority::for_path(event.path());
        self.next_seq += 1;
        self.entries.push(QueuedChange {
            event,
            priority,
            queued_at: Instant::now(),
            seq: self.next_seq,
        });
        self.entries.sort_by_key(|c| (c.priority, c.seq));

        if self.entries.len() > self.settings.max_queue_size {
            return self.evict();
        }
        None
    }

    /// Removes the oldest entry of the lowest priority class present
    fn evict(&mut self) -> Option<QueuedChange> {
        let lowest = self.entries.iter().map(|c| c.priority).max()?;
        let index = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, c)| c.priority == lowest)
            .min_by_key(|(_, c)| c.seq)
            .map(|(i, _)| i)?;
        Some(self.entries.remove(index))
    }

    /// Takes up to `batch_size` entries in order, keeping the latest per path
    fn take_batch(&mut self) -> Batch {
        let count = self.entries.len().min(self.settings.batch_size);
        let taken: Vec<QueuedChange> = self.entries.drain(..count).collect();

        let mut latest: HashMap<PathBuf, u64> = HashMap::new();
        for change in &taken {
            let seq = latest.entry(change.event.path().to_path_buf()).or_insert(0);
            *seq = (*seq).max(change.seq);
        }
        taken
            .into_iter()
            .filter(|c| latest.get(c.event.path()) == Some(&c.seq))
            .collect()
    }

    fn reschedule(&mut self) {
        self.deadline = if self.entries.is_empty() {
            None
        } else {
            Some(Instant::now() + self.settings.batch_delay)
        };
    }
}

struct Actor {
    state: QueueState,
    subscribers: Subscribers,
    depth: Arc<AtomicUsize>,
    evicted: Arc<AtomicU64>,
    metrics: Option<Arc<MetricsRegistry>>,
}

impl Actor {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        loop {
            let deadline = self.state.deadline;
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Enqueue(event)) => self.on_enqueue(event).await,
                    Some(Command::Flush(ack)) => {
                        let sent = self.drain().await;
                        let _ = ack.send(sent);
                    }
                    Some(Command::Close(ack)) => {
                        let sent = self.drain().await;
                        self.subscribers.lock().unwrap_or_else(|e| e.into_inner()).clear();
                        let _ = ack.send(sent);
                        break;
                    }
                    None => {
                        self.drain().await;
                        break;
                    }
                },
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.try_dispatch().await;
                    self.state.reschedule();
                }
            }
            self.depth.store(self.state.entries.len(), Ordering::SeqCst);
        }
        debug!("change queue stopped");
    }

    async fn on_enqueue(&mut self, event: FileChangeEvent) {
        if let Some(evicted) = self.state.push(event) {
            self.evicted.fetch_add(1, Ordering::SeqCst);
            warn!(
                path = %evicted.event.path().display(),
                priority = %evicted.priority,
                max_queue_size = self.state.settings.max_queue_size,
                "Change queue full; evicting oldest lowest-priority change"
            );
            if let Some(metrics) = &self.metrics {
                metrics.record_queue_eviction(evicted.priority.as_str());
            }
        }
        if self.state.entries.len() >= self.state.settings.batch_size {
            self.try_dispatch().await;
        }
        self.state.reschedule();
    }

    fn subscribers_ready(&self) -> bool {
        let subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        !subscribers.is_empty()
            && subscribers
                .iter()
                .all(|s| s.is_closed() || s.capacity() > 0)
    }

    /// Hands off one batch if every subscriber has room
    async fn try_dispatch(&mut self) {
        if self.state.entries.is_empty() {
            return;
        }
        if !self.subscribers_ready() {
            debug!(queued = self.state.entries.len(), "subscribers busy; holding batch");
            return;
        }
        let batch = self.state.take_batch();
        self.deliver(batch).await;
    }

    /// Hands off everything queued, waiting for subscribers as needed
    async fn drain(&mut self) -> usize {
        let mut sent = 0;
        while !self.state.entries.is_empty() {
            let batch = self.state.take_batch();
            sent += batch.len();
            self.deliver(batch).await;
        }
        self.state.deadline = None;
        sent
    }

    async fn deliver(&self, batch: Batch) {
        let subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if subscribers.is_empty() {
            warn!(dropped = batch.len(), "No queue subscribers; dropping batch");
            return;
        }
        debug!(size = batch.len(), "dispatching batch");
        for subscriber in &subscribers {
            if subscriber.send(batch.clone()).await.is_err() {
                debug!("batch subscriber dropped");
            }
        }
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|s| !s.is_closed());
    }
}

// ============================================================================
// ChangeQueue handle
// ============================================================================

/// Handle to the queue actor
pub struct ChangeQueue {
    commands: mpsc::UnboundedSender<Command>,
    subscribers: Subscribers,
    depth: Arc<AtomicUsize>,
    evicted: Arc<AtomicU64>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ChangeQueue {
    /// Spawns the queue actor on the current runtime
    pub fn start(settings: QueueSettings, metrics: Option<Arc<MetricsRegistry>>) -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        let subscribers: Subscribers = Arc::new(Mutex::new(Vec::new()));
        let depth = Arc::new(AtomicUsize::new(0));
        let evicted = Arc::new(AtomicU64::new(0));

        let actor = Actor {
            state: QueueState {
                settings,
                entries: Vec::new(),
                next_seq: 0,
                deadline: None,
            },
            subscribers: Arc::clone(&subscribers),
            depth: Arc::clone(&depth),
            evicted: Arc::clone(&evicted),
            metrics,
        };
        info!(
            max_queue_size = settings.max_queue_size,
            batch_size = settings.batch_size,
            batch_delay_ms = settings.batch_delay.as_millis() as u64,
            "Change queue started"
        );
        let task = tokio::spawn(actor.run(rx));

        Self {
            commands,
            subscribers,
            depth,
            evicted,
            task: Mutex::new(Some(task)),
        }
    }

    /// Adds a batch subscriber
    pub fn subscribe(&self) -> mpsc::Receiver<Batch> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(tx);
        rx
    }

    /// Queues a change
    ///
    /// # Errors
    /// Returns [`SyncError::QueueClosed`] after [`ChangeQueue::close`].
    pub fn enqueue(&self, event: FileChangeEvent) -> Result<(), SyncError> {
        self.commands
            .send(Command::Enqueue(event))
            .map_err(|_| SyncError::QueueClosed)
    }

    /// Changes waiting as of the actor's last step
    pub fn len(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Changes dropped because the queue was full
    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::SeqCst)
    }

    /// Dispatches everything queued now; returns the number of changes sent
    ///
    /// # Errors
    /// Returns [`SyncError::QueueClosed`] if the actor has stopped.
    pub async fn flush(&self) -> Result<usize, SyncError> {
        let (ack, done) = oneshot::channel();
        self.commands
            .send(Command::Flush(ack))
            .map_err(|_| SyncError::QueueClosed)?;
        done.await.map_err(|_| SyncError::QueueClosed)
    }

    /// Flushes, stops the actor and closes every subscriber
    ///
    /// # Errors
    /// Returns [`SyncError::QueueClosed`] if the queue was already closed.
    pub async fn close(&self) -> Result<usize, SyncError> {
        let (ack, done) = oneshot::channel();
        self.commands
            .send(Command::Close(ack))
            .map_err(|_| SyncError::QueueClosed)?;
        let sent = done.await.map_err(|_| SyncError::QueueClosed)?;

        let task = self.task.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(task) = task {
            let _ = task.await;
        }
        Ok(sent)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use irsync_core::domain::{ChangeKind, Side};

    fn settings(max: usize, batch: usize, delay_ms: u64) -> QueueSettings {
        QueueSettings {
            max_queue_size: max,
            batch_size: batch,
            batch_delay: Duration::from_millis(delay_ms),
        }
    }

    fn change(path: &str) -> FileChangeEvent {
        FileChangeEvent::now(ChangeKind::Change, PathBuf::from(path), Side::A)
    }

    fn paths(batch: &Batch) -> Vec<String> {
        batch
            .iter()
            .map(|c| c.event.path().display().to_string())
            .collect()
    }

    #[test]
    fn test_priority_heuristics() {
        assert_eq!(Priority::for_path(Path::new("/w/src/App.tsx")), Priority::High);
        assert_eq!(Priority::for_path(Path::new("/w/lib/main.dart")), Priority::High);
        assert_eq!(Priority::for_path(Path::new("/w/index.tsx")), Priority::High);
        assert_eq!(Priority::for_path(Path::new("/w/utils.tsx")), Priority::Normal);
        assert_eq!(Priority::for_path(Path::new("/w/Button.test.tsx")), Priority::Low);
        assert_eq!(Priority::for_path(Path::new("/w/test/app_test.dart")), Priority::Low);
        assert_eq!(Priority::for_path(Path::new("/w/docs/Guide.tsx")), Priority::Low);
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_batch_dispatches_immediately_rest_after_delay() {
        let queue = ChangeQueue::start(settings(100, 10, 500), None);
        let mut rx = queue.subscribe();
        let started = Instant::now();

        for i in 0..12 {
            queue.enqueue(change(&format!("/w/file{i:02}.tsx"))).unwrap();
        }

        let first = rx.recv().await.unwrap();
        assert_eq!(first.len(), 10);
        assert_eq!(started.elapsed(), Duration::ZERO);

        let second = rx.recv().await.unwrap();
        assert_eq!(second.len(), 2);
        assert!(started.elapsed() >= Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_high_priority_dispatched_first() {
        let queue = ChangeQueue::start(settings(100, 10, 500), None);
        let mut rx = queue.subscribe();

        queue.enqueue(change("/w/utils.tsx")).unwrap();
        tokio::time::advance(Duration::from_millis(50)).await;
        queue.enqueue(change("/w/app.tsx")).unwrap();

        let batch = rx.recv().await.unwrap();
        assert_eq!(paths(&batch), vec!["/w/app.tsx", "/w/utils.tsx"]);
        assert_eq!(batch[0].priority, Priority::High);
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_keeps_latest_event_per_path() {
        let queue = ChangeQueue::start(settings(100, 10, 100), None);
        let mut rx = queue.subscribe();

        queue.enqueue(change("/w/Card.tsx")).unwrap();
        queue.enqueue(change("/w/Other.tsx")).unwrap();
        queue
            .enqueue(FileChangeEvent::now(
                ChangeKind::Delete,
                PathBuf::from("/w/Card.tsx"),
                Side::A,
            ))
            .unwrap();

        let batch = rx.recv().await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(paths(&batch), vec!["/w/Other.tsx", "/w/Card.tsx"]);
        assert_eq!(batch[1].event.kind(), ChangeKind::Delete);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overflow_evicts_lowest_priority_first() {
        let queue = ChangeQueue::start(settings(3, 3, 500), None);

        // No subscriber yet, so nothing can be handed off
        queue.enqueue(change("/w/docs/Guide.tsx")).unwrap();
        queue.enqueue(change("/w/a.tsx")).unwrap();
        queue.enqueue(change("/w/b.tsx")).unwrap();
        queue.enqueue(change("/w/c.tsx")).unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(queue.len(), 3);

        let mut rx = queue.subscribe();
        assert_eq!(queue.flush().await.unwrap(), 3);
        assert_eq!(queue.evicted(), 1);

        let batch = rx.recv().await.unwrap();
        assert_eq!(paths(&batch), vec!["/w/a.tsx", "/w/b.tsx", "/w/c.tsx"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_busy_subscriber_holds_batches() {
        let queue = ChangeQueue::start(settings(100, 1, 100), None);
        let mut rx = queue.subscribe();

        for i in 0..4 {
            queue.enqueue(change(&format!("/w/f{i}.tsx"))).unwrap();
        }
        // Two batches fit in the subscriber buffer; the rest stay queued
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(queue.len(), 2);

        let mut seen = Vec::new();
        for _ in 0..4 {
            seen.extend(paths(&rx.recv().await.unwrap()));
        }
        assert_eq!(seen, vec!["/w/f0.tsx", "/w/f1.tsx", "/w/f2.tsx", "/w/f3.tsx"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_flushes_and_ends_subscribers() {
        let queue = ChangeQueue::start(settings(100, 10, 10_000), None);
        let mut rx = queue.subscribe();
        queue.enqueue(change("/w/a.tsx")).unwrap();

        assert_eq!(queue.close().await.unwrap(), 1);
        assert_eq!(rx.recv().await.unwrap().len(), 1);
        assert!(rx.recv().await.is_none());
        assert!(matches!(
            queue.enqueue(change("/w/b.tsx")),
            Err(SyncError::QueueClosed)
        ));
    }
}
