use crate::error::HarvestError;
use crate::metrics::Metrics;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Serialize;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, warn};

/// Unit of work accepted by the pool.
pub type Job = BoxFuture<'static, ()>;

pub struct PoolWorker {
    id: usize,
    is_running: Arc<AtomicBool>,
    processed_count: Arc<AtomicUsize>,
    error_count: Arc<AtomicUsize>,
}

impl PoolWorker {
    pub fn new(id: usize) -> Self {
        Self {
            id,
            is_running: Arc::new(AtomicBool::new(false)),
            processed_count: Arc::new(AtomicUsize::new(0)),
            error_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub async fn run_with_shared_receiver(&self, jobs: Arc<Mutex<mpsc::Receiver<Job>>>) {
        debug!("Starting pool worker {}", self.id);
        self.is_running.store(true, Ordering::Relaxed);

        loop {
            let job = {
                let mut receiver = jobs.lock().await;
                receiver.recv().await
            };

            match job {
                Some(job) => {
                    if run_guarded(job).await {
                        self.processed_count.fetch_add(1, Ordering::Relaxed);
                    } else {
                        self.error_count.fetch_add(1, Ordering::Relaxed);
                        warn!("Worker {} recovered from a panicking job", self.id);
                    }
                }
                None => break,
            }
        }

        self.is_running.store(false, Ordering::Relaxed);
        debug!("Pool worker {} stopped", self.id);
    }

    pub fn get_stats(&self) -> WorkerStats {
        WorkerStats {
            id: self.id,
            is_running: self.is_running(),
            processed_count: self.processed_count(),
            error_count: self.error_count(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Relaxed)
    }

    pub fn processed_count(&self) -> usize {
        self.processed_count.load(Ordering::Relaxed)
    }

    pub fn error_count(&self) -> usize {
        self.error_count.load(Ordering::Relaxed)
    }
}

impl Clone for PoolWorker {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            is_running: self.is_running.clone(),
            processed_count: self.processed_count.clone(),
            error_count: self.error_count.clone(),
        }
    }
}

/// Run a job, returning false if it panicked.
async fn run_guarded(job: Job) -> bool {
    AssertUnwindSafe(job).catch_unwind().await.is_ok()
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerStats {
    pub id: usize,
    pub is_running: bool,
    pub processed_count: usize,
    pub error_count: usize,
}

/// Result slot for a submitted job.
pub struct TaskHandle<T> {
    receiver: oneshot::Receiver<T>,
}

impl<T> TaskHandle<T> {
    /// Wait for the job's value.
    ///
    /// Fails when the job panicked or was dropped by a closed pool.
    pub async fn join(self) -> Result<T, HarvestError> {
        self.receiver.await.map_err(|_| {
            HarvestError::TaskDropped("job panicked or was discarded by the pool".to_string())
        })
    }
}

/// Fixed set of long-lived workers fed from a bounded queue.
///
/// When the queue is full the submitting task runs the job itself before
/// `submit` returns, which throttles producers to the pool's pace.
pub struct WorkerPool {
    workers: Vec<PoolWorker>,
    sender: mpsc::Sender<Job>,
    queue_capacity: usize,
    caller_runs: AtomicUsize,
    metrics: Arc<Metrics>,
}

impl WorkerPool {
    /// Spawn `worker_count` workers. Must be called from within a Tokio runtime.
    pub fn new(worker_count: usize, queue_capacity: usize, metrics: Arc<Metrics>) -> Self {
        let worker_count = worker_count.max(1);
        let queue_capacity = queue_capacity.max(1);
        let (sender, receiver) = mpsc::channel(queue_capacity);

        let workers: Vec<PoolWorker> = (0..worker_count).map(PoolWorker::new).collect();
        let shared_receiver = Arc::new(Mutex::new(receiver));

        for worker in &workers {
            let worker_clone = worker.clone();
            let rx = shared_receiver.clone();

            tokio::spawn(async move {
                worker_clone.run_with_shared_receiver(rx).await;
            });
        }

        info!(
            "Worker pool started with {} workers and queue capacity {}",
            worker_count, queue_capacity
        );

        Self {
            workers,
            sender,
            queue_capacity,
            caller_runs: AtomicUsize::new(0),
            metrics,
        }
    }

    pub async fn submit<F, T>(&self, task: F) -> TaskHandle<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: Job = Box::pin(async move {
            let _ = tx.send(task.await);
        });

        match self.sender.try_send(job) {
            Ok(()) => {
                self.metrics.set_queue_depth(self.queued_jobs());
            }
            Err(TrySendError::Full(job)) => {
                self.caller_runs.fetch_add(1, Ordering::Relaxed);
                self.metrics.record_caller_run();
                debug!("Queue full ({} jobs), running job on the caller", self.queue_capacity);
                if !run_guarded(job).await {
                    warn!("Job run by the caller panicked");
                }
            }
            Err(TrySendError::Closed(_)) => {
                warn!("Worker pool closed, discarding job");
            }
        }

        TaskHandle { receiver: rx }
    }

    pub fn queued_jobs(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }

    /// Jobs that ran on the submitting task because the queue was full.
    pub fn caller_runs(&self) -> usize {
        self.caller_runs.load(Ordering::Relaxed)
    }

    pub fn get_worker_stats(&self) -> Vec<WorkerStats> {
        self.workers.iter().map(|w| w.get_stats()).collect()
    }

    pub fn total_processed(&self) -> usize {
        self.workers.iter().map(|w| w.processed_count()).sum()
    }

    pub fn total_errors(&self) -> usize {
        self.workers.iter().map(|w| w.error_count()).sum()
    }

    pub fn active_workers(&self) -> usize {
        self.workers.iter().filter(|w| w.is_running()).count()
    }

    pub fn get_stats(&self) -> PoolStats {
        PoolStats {
            worker_stats: self.get_worker_stats(),
            total_processed: self.total_processed(),
            total_errors: self.total_errors(),
            active_workers: self.active_workers(),
            queued_jobs: self.queued_jobs(),
            caller_runs: self.caller_runs(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStats {
    pub worker_stats: Vec<WorkerStats>,
    pub total_processed: usize,
    pub total_errors: usize,
    pub active_workers: usize,
    pub queued_jobs: usize,
    pub caller_runs: usize,
}

/// Completion counter shared between a batch run and whoever reports on it.
pub struct ProgressTracker {
    total: usize,
    completed: AtomicUsize,
    errors: AtomicUsize,
    start_time: std::time::Instant,
}

impl ProgressTracker {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            completed: AtomicUsize::new(0),
            errors: AtomicUsize::new(0),
            start_time: std::time::Instant::now(),
        }
    }

    pub fn record_completion(&self, success: bool) {
        self.completed.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn get_progress(&self) -> ProgressInfo {
        let completed = self.completed.load(Ordering::Relaxed);
        let errors = self.errors.load(Ordering::Relaxed);
        let elapsed = self.start_time.elapsed();
        let rate = if elapsed.as_secs_f64() > 0.0 {
            completed as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };

        ProgressInfo {
            total: self.total,
            completed,
            errors,
            success: completed - errors,
            elapsed,
            rate,
            eta: (completed > 0 && rate > 0.0).then(|| {
                let remaining = self.total.saturating_sub(completed);
                Duration::from_secs_f64(remaining as f64 / rate)
            }),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.completed.load(Ordering::Relaxed) >= self.total
    }
}

#[derive(Debug, Clone)]
pub struct ProgressInfo {
    pub total: usize,
    pub completed: usize,
    pub errors: usize,
    pub success: usize,
    pub elapsed: Duration,
    pub rate: f64,
    pub eta: Option<Duration>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn pool(workers: usize, capacity: usize) -> WorkerPool {
        WorkerPool::new(workers, capacity, Arc::new(Metrics::noop()))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_submitted_jobs_complete() {
        let pool = pool(3, 10);
        let mut handles = Vec::new();
        for i in 0..20u64 {
            handles.push(pool.submit(async move { i * 2 }).await);
        }

        let mut total = 0;
        for handle in handles {
            total += handle.join().await.unwrap();
        }

        assert_eq!(total, (0..20u64).map(|i| i * 2).sum::<u64>());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_full_queue_runs_on_caller() {
        let pool = pool(1, 1);
        let mut handles = Vec::new();
        for i in 0..10usize {
            let handle = pool
                .submit(async move {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    i
                })
                .await;
            handles.push(handle);
        }

        for (i, handle) in handles.into_iter().enumerate() {
            assert_eq!(handle.join().await.unwrap(), i);
        }
        assert!(pool.caller_runs() > 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_panicking_job_does_not_kill_worker() {
        let pool = pool(1, 4);

        let failed = pool
            .submit(async {
                panic!("boom");
            })
            .await;
        assert!(matches!(
            failed.join().await,
            Err(HarvestError::TaskDropped(_))
        ));

        let ok = pool.submit(async { "still alive" }).await;
        assert_eq!(ok.join().await.unwrap(), "still alive");
        assert_eq!(pool.total_errors(), 1);
        assert_eq!(pool.active_workers(), 1);
    }

    #[test]
    fn test_progress_tracker() {
        let tracker = ProgressTracker::new(4);
        tracker.record_completion(true);
        tracker.record_completion(false);

        let progress = tracker.get_progress();
        assert_eq!(progress.completed, 2);
        assert_eq!(progress.errors, 1);
        assert_eq!(progress.success, 1);
        assert!(!tracker.is_complete());

        tracker.record_completion(true);
        tracker.record_completion(true);
        assert!(tracker.is_complete());
    }
}
