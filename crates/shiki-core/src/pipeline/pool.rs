//! Bounded worker pool with progress events and cooperative cancellation.
//!
//! One tokio task per item, at most `workers` in flight (semaphore). Each
//! completed item, success or failure, emits a [`ScanProgress`] event.
//! Items finished before the batch (cache hits) count toward both
//! `processed` and `total`.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

use crate::error::{PipelineError, PipelineResult, ShikiError};

/// Progress event emitted as each item completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanProgress {
    pub processed: usize,
    pub total: usize,
}

/// Receives progress events; called from worker tasks.
pub type ProgressCallback = Arc<dyn Fn(ScanProgress) + Send + Sync>;

/// Shared flag for cooperative cancellation.
///
/// Once cancelled, no new items are dispatched; items already running finish
/// and their results are discarded.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Outcome of a completed (not cancelled, not aborted) batch.
#[derive(Debug)]
pub struct PoolReport<T> {
    /// Successful outputs in dispatch order
    pub completed: Vec<T>,
    /// Items that failed and were skipped
    pub skipped: usize,
}

/// Runs jobs over a list of items with bounded concurrency.
#[derive(Clone)]
pub struct WorkerPool {
    workers: usize,
    progress: Option<ProgressCallback>,
    cancel: CancelToken,
    already_done: usize,
}

impl WorkerPool {
    /// `workers` is clamped to at least 1.
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
            progress: None,
            cancel: CancelToken::new(),
            already_done: 0,
        }
    }

    pub fn with_progress(mut self, progress: Option<ProgressCallback>) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Report `done` items as finished before the first job runs.
    pub fn with_already_done(mut self, done: usize) -> Self {
        self.already_done = done;
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Run `job` over every item.
    ///
    /// Per-item errors are logged and counted as skipped. The first fatal
    /// error (see [`PipelineError::is_fatal`]) stops dispatch; in-flight items
    /// are awaited and the error is returned. Cancellation behaves the same
    /// way and returns [`ShikiError::ScanCancelled`].
    pub async fn run<I, T, F, Fut>(&self, items: Vec<I>, job: F) -> Result<PoolReport<T>, ShikiError>
    where
        I: Send + 'static,
        T: Send + 'static,
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = PipelineResult<T>> + Send + 'static,
    {
        let total = items.len() + self.already_done;
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let job = Arc::new(job);
        let aborted = Arc::new(AtomicBool::new(false));
        let processed = Arc::new(AtomicUsize::new(self.already_done));
        let mut handles = Vec::with_capacity(items.len());

        if self.already_done > 0 {
            if let Some(progress) = &self.progress {
                progress(ScanProgress {
                    processed: self.already_done,
                    total,
                });
            }
        }

        for item in items {
            if self.cancel.is_cancelled() || aborted.load(Ordering::SeqCst) {
                break;
            }
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    tracing::warn!("Worker semaphore closed unexpectedly, stopping batch");
                    break;
                }
            };
            // Re-check: the flags may have flipped while waiting for a permit.
            if self.cancel.is_cancelled() || aborted.load(Ordering::SeqCst) {
                break;
            }

            let job = job.clone();
            let aborted = aborted.clone();
            let processed = processed.clone();
            let progress = self.progress.clone();

            handles.push(tokio::spawn(async move {
                let result = (*job)(item).await;
                if matches!(&result, Err(e) if e.is_fatal()) {
                    aborted.store(true, Ordering::SeqCst);
                }
                drop(permit); // Release before the callback
                let done = processed.fetch_add(1, Ordering::SeqCst) + 1;
                if let Some(progress) = progress {
                    progress(ScanProgress {
                        processed: done,
                        total,
                    });
                }
                result
            }));
        }

        let mut completed = Vec::with_capacity(handles.len());
        let mut skipped = 0usize;
        let mut fatal: Option<PipelineError> = None;

        for handle in handles {
            match handle.await {
                Ok(Ok(output)) => completed.push(output),
                Ok(Err(e)) if e.is_fatal() => {
                    tracing::error!("{e}");
                    fatal.get_or_insert(e);
                }
                Ok(Err(e)) => {
                    tracing::warn!("Skipping: {e}");
                    skipped += 1;
                }
                Err(e) => {
                    tracing::error!("Worker task panicked: {e}");
                    skipped += 1;
                }
            }
        }

        if let Some(e) = fatal {
            return Err(e.into());
        }
        if self.cancel.is_cancelled() {
            tracing::info!(
                "Scan cancelled after {} of {} items",
                processed.load(Ordering::SeqCst),
                total
            );
            return Err(ShikiError::ScanCancelled);
        }

        Ok(PoolReport { completed, skipped })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use std::time::Duration;

    #[tokio::test]
    async fn test_runs_all_items_in_dispatch_order() {
        let pool = WorkerPool::new(3);
        let report = pool
            .run((0..10u64).collect(), |i| async move {
                // Later items finish first.
                tokio::time::sleep(Duration::from_millis(10 - i)).await;
                Ok::<_, PipelineError>(i * 2)
            })
            .await
            .unwrap();
        assert_eq!(report.completed, (0..10u64).map(|i| i * 2).collect::<Vec<_>>());
        assert_eq!(report.skipped, 0);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let pool = WorkerPool::new(2);

        let (f, p) = (in_flight.clone(), peak.clone());
        pool.run((0..8).collect(), move |_: i32| {
            let (f, p) = (f.clone(), p.clone());
            async move {
                let now = f.fetch_add(1, Ordering::SeqCst) + 1;
                p.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                f.fetch_sub(1, Ordering::SeqCst);
                Ok::<_, PipelineError>(())
            }
        })
        .await
        .unwrap();

        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_item_failures_are_skipped() {
        let pool = WorkerPool::new(4);
        let report = pool
            .run((0..6u32).collect(), |i| async move {
                if i % 3 == 0 {
                    Err(PipelineError::Decode {
                        path: PathBuf::from(format!("{i}.jpg")),
                        message: "corrupt".into(),
                    })
                } else {
                    Ok(i)
                }
            })
            .await
            .unwrap();
        assert_eq!(report.completed, vec![1, 2, 4, 5]);
        assert_eq!(report.skipped, 2);
    }

    #[tokio::test]
    async fn test_fatal_error_aborts_batch() {
        let pool = WorkerPool::new(1);
        let started = Arc::new(AtomicUsize::new(0));
        let s = started.clone();
        let err = pool
            .run((0..20u32).collect(), move |i| {
                let s = s.clone();
                async move {
                    s.fetch_add(1, Ordering::SeqCst);
                    if i == 2 {
                        Err(PipelineError::Model {
                            message: "backend crashed".into(),
                        })
                    } else {
                        Ok(i)
                    }
                }
            })
            .await
            .unwrap_err();

        assert!(matches!(err, ShikiError::Pipeline(PipelineError::Model { .. })));
        // With one worker, nothing past the failing item gets far.
        assert!(started.load(Ordering::SeqCst) < 20);
    }

    #[tokio::test]
    async fn test_progress_events_reach_total() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let progress: ProgressCallback = Arc::new(move |p| sink.lock().unwrap().push(p));

        WorkerPool::new(2)
            .with_progress(Some(progress))
            .run((0..5u8).collect(), |i| async move { Ok::<_, PipelineError>(i) })
            .await
            .unwrap();

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 5);
        assert!(events.iter().all(|p| p.total == 5));
        let mut processed: Vec<usize> = events.iter().map(|p| p.processed).collect();
        processed.sort_unstable();
        assert_eq!(processed, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_already_done_items_count_toward_total() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let progress: ProgressCallback = Arc::new(move |p| sink.lock().unwrap().push(p));

        WorkerPool::new(1)
            .with_progress(Some(progress))
            .with_already_done(3)
            .run((0..2u8).collect(), |i| async move { Ok::<_, PipelineError>(i) })
            .await
            .unwrap();

        let events = events.lock().unwrap();
        let mut seen: Vec<(usize, usize)> = events.iter().map(|p| (p.processed, p.total)).collect();
        seen.sort_unstable();
        assert_eq!(seen, vec![(3, 5), (4, 5), (5, 5)]);
    }

    #[tokio::test]
    async fn test_cancel_stops_dispatch() {
        let cancel = CancelToken::new();
        let started = Arc::new(AtomicUsize::new(0));
        let (c, s) = (cancel.clone(), started.clone());

        let err = WorkerPool::new(1)
            .with_cancel(cancel.clone())
            .run((0..50u32).collect(), move |i| {
                let (c, s) = (c.clone(), s.clone());
                async move {
                    s.fetch_add(1, Ordering::SeqCst);
                    if i == 1 {
                        c.cancel();
                    }
                    Ok::<_, PipelineError>(i)
                }
            })
            .await
            .unwrap_err();

        assert!(matches!(err, ShikiError::ScanCancelled));
        assert!(started.load(Ordering::SeqCst) < 50);
    }
}
