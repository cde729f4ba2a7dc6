//! Bounded worker pool and batch progress
//!
//! [`WorkerPool`] runs one task per item with at most `size` running at once.
//! Results come back in input order; a panicking task becomes an error for
//! its own item only.

use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{broadcast, Semaphore};
use tracing::{debug, error};

use crate::SyncError;

/// Progress events buffered for slow subscribers
const PROGRESS_BUFFER: usize = 256;

/// Runs tasks with bounded parallelism
#[derive(Clone)]
pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
    size: usize,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Runs `task` for every item and returns the results in input order
    pub async fn run<T, R, F, Fut>(&self, items: Vec<T>, mut task: F) -> Vec<Result<R, SyncError>>
    where
        T: Send + 'static,
        R: Send + 'static,
        F: FnMut(T) -> Fut,
        Fut: Future<Output = R> + Send + 'static,
    {
        let handles: Vec<_> = items
            .into_iter()
            .map(|item| {
                let sem = Arc::clone(&self.semaphore);
                let work = task(item);
                tokio::spawn(async move {
                    let _permit = sem
                        .acquire_owned()
                        .await
                        .map_err(|e| SyncError::Worker(e.to_string()))?;
                    Ok::<R, SyncError>(work.await)
                })
            })
            .collect();
        debug!(tasks = handles.len(), workers = self.size, "worker pool dispatched");

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => {
                    error!(error = %e, "worker task failed");
                    Err(SyncError::Worker(e.to_string()))
                }
            };
            results.push(result);
        }
        results
    }
}

// ============================================================================
// Progress
// ============================================================================

/// One finished item of a batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressUpdate {
    pub batch_id: u64,
    pub completed: usize,
    pub total: usize,
    pub path: PathBuf,
    pub success: bool,
}

impl ProgressUpdate {
    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return 100;
        }
        ((self.completed * 100) / self.total).min(100) as u8
    }
}

/// Broadcasts per-item progress of large batches
pub struct ProgressReporter {
    tx: broadcast::Sender<ProgressUpdate>,
    next_batch: AtomicU64,
}

impl ProgressReporter {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(PROGRESS_BUFFER);
        Self {
            tx,
            next_batch: AtomicU64::new(1),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressUpdate> {
        self.tx.subscribe()
    }

    /// Starts tracking a batch of `total` items
    pub fn begin(&self, total: usize) -> BatchProgress {
        BatchProgress {
            tx: self.tx.clone(),
            batch_id: self.next_batch.fetch_add(1, Ordering::Relaxed),
            total,
            completed: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

/// Progress of one batch, shared by its workers
#[derive(Clone)]
pub struct BatchProgress {
    tx: broadcast::Sender<ProgressUpdate>,
    batch_id: u64,
    total: usize,
    completed: Arc<AtomicUsize>,
}

impl BatchProgress {
    pub fn item_done(&self, path: PathBuf, success: bool) {
        let completed = self.completed.fetch_add(1, Ordering::SeqCst) + 1;
        // No subscribers is fine
        let _ = self.tx.send(ProgressUpdate {
            batch_id: self.batch_id,
            completed,
            total: self.total,
            path,
            success,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_results_keep_input_order() {
        let pool = WorkerPool::new(2);
        let results = pool
            .run(vec![30u64, 10, 20], |ms| async move {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                ms * 2
            })
            .await;
        let values: Vec<u64> = results.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(values, vec![60, 20, 40]);
    }

    #[tokio::test]
    async fn test_parallelism_is_bounded() {
        let pool = WorkerPool::new(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let results = pool
            .run((0..6).collect::<Vec<_>>(), |_| {
                let running = Arc::clone(&running);
                let peak = Arc::clone(&peak);
                async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                }
            })
            .await;
        assert_eq!(results.len(), 6);
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_panic_is_isolated() {
        let pool = WorkerPool::new(4);
        let results = pool
            .run(vec![1, 2, 3], |n| async move {
                if n == 2 {
                    panic!("boom");
                }
                n
            })
            .await;
        assert_eq!(results[0].as_ref().unwrap(), &1);
        assert!(matches!(results[1], Err(SyncError::Worker(_))));
        assert_eq!(results[2].as_ref().unwrap(), &3);
    }

    #[tokio::test]
    async fn test_progress_counts_up() {
        let reporter = ProgressReporter::new();
        let mut rx = reporter.subscribe();
        let batch = reporter.begin(2);
        batch.item_done(PathBuf::from("/a"), true);
        batch.item_done(PathBuf::from("/b"), false);

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!((first.completed, first.percent()), (1, 50));
        assert_eq!((second.completed, second.total), (2, 2));
        assert!(!second.success);
    }
}
