//! Bounded worker pool with producer backpressure
//!
//! Manages a lazily grown set of long-lived worker loops that pull batches
//! off one shared queue. Capacity is enforced with semaphore permits: a
//! submitted batch carries its permit until the worker running it has
//! reported results, so `submit` blocks whenever the pool is saturated and
//! wakes exactly when a worker goes idle.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument};

use super::load::LoadState;
use super::runner::{BatchRunner, FailureCallback, RunnerConfig, SuccessCallback};
use crate::batch::Batch;
use crate::executor::BatchExecutor;
use crate::progress::Progress;

/// Worker pool configuration
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Maximum number of concurrent workers
    pub max_workers: usize,

    /// Fixed delay a worker applies before the first record of a retried
    /// batch
    pub retry_delay: Duration,

    /// How many times a worker reruns a whole batch whose run failed
    /// before escalating (0 = report failure immediately)
    pub run_retries: u32,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            max_workers: 8,
            retry_delay: Duration::from_secs(5),
            run_retries: 0,
        }
    }
}

impl WorkerPoolConfig {
    /// Create a configuration with the default knobs
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of workers
    pub fn with_max_workers(mut self, max: usize) -> Self {
        self.max_workers = max.max(1);
        self
    }

    /// Set the fixed delay applied to retried batches
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Set the per-run rerun count for failed batch runs
    pub fn with_run_retries(mut self, retries: u32) -> Self {
        self.run_retries = retries;
        self
    }
}

/// Worker pool errors
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// The pool is draining; no new batches are accepted
    #[error("worker pool is draining")]
    Draining,
}

/// A batch travels with the permit that admitted it; dropping the permit
/// is what moves its worker back to idle and wakes blocked submitters.
type WorkItem = (Batch, OwnedSemaphorePermit);

/// Bounded pool of reusable workers executing batches.
///
/// Workers are created lazily, one per submission, until the pool reaches
/// `max_workers`. The pool never grows past the cap and never shrinks until
/// shutdown.
pub struct WorkerPool<E: BatchExecutor> {
    config: WorkerPoolConfig,
    factory: Arc<dyn Fn() -> E + Send + Sync>,
    progress: Progress,
    on_success: SuccessCallback,
    on_failure: FailureCallback,
    load: Arc<LoadState>,
    permits: Arc<Semaphore>,
    queue_tx: parking_lot::Mutex<Option<UnboundedSender<WorkItem>>>,
    queue_rx: Arc<tokio::sync::Mutex<UnboundedReceiver<WorkItem>>>,
    workers: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl<E: BatchExecutor> WorkerPool<E> {
    /// Create a pool.
    ///
    /// `factory` builds one executor per worker. `on_success` receives a
    /// [`BatchReport`](super::BatchReport) for every executed batch, clean
    /// or not; `on_failure` only fires for whole-run failures.
    pub fn new(
        config: WorkerPoolConfig,
        factory: impl Fn() -> E + Send + Sync + 'static,
        progress: Progress,
        on_success: SuccessCallback,
        on_failure: FailureCallback,
    ) -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let load = Arc::new(LoadState::new(config.max_workers));
        let permits = Arc::new(Semaphore::new(load.max_workers()));

        Self {
            config,
            factory: Arc::new(factory),
            progress,
            on_success,
            on_failure,
            load,
            permits,
            queue_tx: parking_lot::Mutex::new(Some(queue_tx)),
            queue_rx: Arc::new(tokio::sync::Mutex::new(queue_rx)),
            workers: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// Submit one batch, blocking while the pool is at capacity.
    ///
    /// Returns [`PoolError::Draining`] once draining has begun; callers
    /// are expected to stop submitting at that point.
    #[instrument(skip(self, batch), fields(records = batch.len(), retry_index = batch.retry_index()))]
    pub async fn submit(&self, batch: Batch) -> Result<(), PoolError> {
        if self.load.is_draining() {
            return Err(PoolError::Draining);
        }

        // Blocks here when every worker slot is taken; a finishing worker
        // releases its permit and wakes us.
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| PoolError::Draining)?;

        self.spawn_worker_if_needed();

        let queue_tx = self.queue_tx.lock();
        let queue_tx = queue_tx.as_ref().ok_or(PoolError::Draining)?;
        queue_tx
            .send((batch, permit))
            .map_err(|_| PoolError::Draining)?;
        Ok(())
    }

    /// Batches admitted but not yet classified, queued or running.
    ///
    /// Measured as outstanding admission permits: a permit is taken before
    /// a batch enters the queue and released only after its callbacks have
    /// run, so a submitted batch is never invisible between `submit` and
    /// worker pickup. This is the orchestrator's termination signal.
    pub fn running_count(&self) -> usize {
        self.load
            .max_workers()
            .saturating_sub(self.permits.available_permits())
    }

    /// Number of workers created so far (diagnostic)
    pub fn spawned_count(&self) -> usize {
        self.load.spawned()
    }

    /// Whether draining has begun
    pub fn is_draining(&self) -> bool {
        self.load.is_draining()
    }

    /// Stop accepting new batches and let workers finish queued work.
    ///
    /// Workers run their teardown hook and exit once the queue empties.
    pub fn begin_draining(&self) {
        info!(
            spawned = self.load.spawned(),
            busy = self.load.busy(),
            "worker pool draining"
        );
        self.load.begin_draining();
        // Dropping the sender closes the queue; idle workers wake and exit.
        self.queue_tx.lock().take();
    }

    /// Wait for every worker loop to exit. Call after `begin_draining`.
    pub async fn join(&self) {
        let handles: Vec<JoinHandle<()>> = {
            let mut workers = self.workers.lock();
            workers.drain(..).collect()
        };
        for handle in handles {
            // A panicked or aborted worker is already gone; nothing to do.
            let _ = handle.await;
        }
        debug!("all workers joined");
    }

    /// Interrupt every worker unconditionally, idle or busy.
    ///
    /// Does not wait for in-flight batches; safe to call when no worker
    /// was ever created.
    pub fn shutdown(&self) {
        self.load.begin_draining();
        self.queue_tx.lock().take();
        let workers = self.workers.lock();
        for handle in workers.iter() {
            handle.abort();
        }
        info!(interrupted = workers.len(), "worker pool shut down");
    }

    /// Grow the pool by one worker when all existing workers are busy and
    /// the cap allows it. The check and the growth happen under one lock
    /// so concurrent submitters cannot overshoot the cap.
    fn spawn_worker_if_needed(&self) {
        let mut workers = self.workers.lock();
        let spawned = workers.len();
        if spawned >= self.load.max_workers() {
            return;
        }

        let worker_id = spawned;
        self.load.worker_spawned();
        debug!(worker_id, "spawning worker");

        let executor = (self.factory)();
        let runner = BatchRunner::new(
            worker_id,
            executor,
            RunnerConfig {
                retry_delay: self.config.retry_delay,
                run_retries: self.config.run_retries,
            },
            self.progress.clone(),
            Arc::clone(&self.on_success),
            Arc::clone(&self.on_failure),
        );

        let handle = tokio::spawn(worker_loop(
            worker_id,
            runner,
            Arc::clone(&self.queue_rx),
            Arc::clone(&self.load),
        ));
        workers.push(handle);
    }
}

/// One worker: pull batches off the shared queue until it closes.
///
/// The batch's admission permit is dropped only *after* its results have
/// been reported, so rework enqueued by a finishing worker is always
/// visible before the in-flight count drops. The orchestrator's
/// queue-then-in-flight termination check relies on this ordering.
async fn worker_loop<E: BatchExecutor>(
    worker_id: usize,
    mut runner: BatchRunner<E>,
    queue_rx: Arc<tokio::sync::Mutex<UnboundedReceiver<WorkItem>>>,
    load: Arc<LoadState>,
) {
    debug!(worker_id, "worker started");
    loop {
        let item = {
            let mut rx = queue_rx.lock().await;
            rx.recv().await
        };
        let Some((batch, permit)) = item else {
            break;
        };

        load.batch_started();
        debug!(
            worker_id,
            records = batch.len(),
            retry_index = batch.retry_index(),
            "batch assigned"
        );

        runner.run(batch).await;

        load.batch_finished();
        drop(permit);
    }
    runner.finish().await;
    debug!(worker_id, "worker exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::TaskError;
    use crate::record::Record;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn records(n: usize) -> Vec<Record> {
        (0..n)
            .map(|i| {
                let mut r = Record::new();
                r.set("id", i as u64);
                r
            })
            .collect()
    }

    #[derive(Default)]
    struct Gauge {
        processed: AtomicUsize,
        concurrent: AtomicUsize,
        max_concurrent: AtomicUsize,
        setups: AtomicUsize,
        teardowns: AtomicUsize,
    }

    struct GaugeExecutor {
        gauge: Arc<Gauge>,
        work_delay: Duration,
    }

    #[async_trait]
    impl BatchExecutor for GaugeExecutor {
        async fn setup(&mut self) -> anyhow::Result<()> {
            self.gauge.setups.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn process(
            &mut self,
            _record: &mut Record,
            _progress: &Progress,
        ) -> Result<(), TaskError> {
            let now = self.gauge.concurrent.fetch_add(1, Ordering::SeqCst) + 1;
            self.gauge.max_concurrent.fetch_max(now, Ordering::SeqCst);
            if !self.work_delay.is_zero() {
                tokio::time::sleep(self.work_delay).await;
            }
            self.gauge.processed.fetch_add(1, Ordering::SeqCst);
            self.gauge.concurrent.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }

        async fn teardown(&mut self) {
            self.gauge.teardowns.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn noop_callbacks() -> (SuccessCallback, FailureCallback) {
        (Arc::new(|_report| {}), Arc::new(|_batch, _error| {}))
    }

    fn pool_with(
        gauge: Arc<Gauge>,
        config: WorkerPoolConfig,
        work_delay: Duration,
    ) -> WorkerPool<GaugeExecutor> {
        let (on_success, on_failure) = noop_callbacks();
        WorkerPool::new(
            config,
            move || GaugeExecutor {
                gauge: Arc::clone(&gauge),
                work_delay,
            },
            Progress::new(),
            on_success,
            on_failure,
        )
    }

    #[test]
    fn test_config_builder() {
        let config = WorkerPoolConfig::new()
            .with_max_workers(4)
            .with_retry_delay(Duration::from_millis(250))
            .with_run_retries(2);

        assert_eq!(config.max_workers, 4);
        assert_eq!(config.retry_delay, Duration::from_millis(250));
        assert_eq!(config.run_retries, 2);
    }

    #[test]
    fn test_max_workers_clamped_to_one() {
        let config = WorkerPoolConfig::new().with_max_workers(0);
        assert_eq!(config.max_workers, 1);
    }

    #[tokio::test]
    async fn test_all_submitted_batches_execute() {
        let gauge = Arc::new(Gauge::default());
        let config = WorkerPoolConfig::new()
            .with_max_workers(3)
            .with_retry_delay(Duration::ZERO);
        let pool = pool_with(Arc::clone(&gauge), config, Duration::ZERO);

        for _ in 0..5 {
            pool.submit(Batch::new(records(10), 0)).await.unwrap();
        }
        pool.begin_draining();
        pool.join().await;

        assert_eq!(gauge.processed.load(Ordering::SeqCst), 50);
        assert_eq!(pool.running_count(), 0);
    }

    #[tokio::test]
    async fn test_pool_never_exceeds_max_workers() {
        let gauge = Arc::new(Gauge::default());
        let config = WorkerPoolConfig::new()
            .with_max_workers(3)
            .with_retry_delay(Duration::ZERO);
        let pool = pool_with(Arc::clone(&gauge), config, Duration::from_millis(10));

        for _ in 0..12 {
            pool.submit(Batch::new(records(2), 0)).await.unwrap();
            assert!(pool.spawned_count() <= 3);
        }
        pool.begin_draining();
        pool.join().await;

        assert!(gauge.max_concurrent.load(Ordering::SeqCst) <= 3);
        assert_eq!(gauge.processed.load(Ordering::SeqCst), 24);
    }

    #[tokio::test]
    async fn test_workers_grow_lazily() {
        let gauge = Arc::new(Gauge::default());
        let config = WorkerPoolConfig::new()
            .with_max_workers(8)
            .with_retry_delay(Duration::ZERO);
        let pool = pool_with(Arc::clone(&gauge), config, Duration::ZERO);

        pool.submit(Batch::new(records(1), 0)).await.unwrap();
        let after_first = pool.spawned_count();
        assert_eq!(after_first, 1);

        pool.begin_draining();
        pool.join().await;
        // A single quick batch never justifies an eighth worker.
        assert!(pool.spawned_count() <= 2);
    }

    #[tokio::test]
    async fn test_running_count_covers_queued_batches() {
        let gauge = Arc::new(Gauge::default());
        let config = WorkerPoolConfig::new()
            .with_max_workers(2)
            .with_retry_delay(Duration::ZERO);
        let pool = pool_with(Arc::clone(&gauge), config, Duration::from_millis(20));

        pool.submit(Batch::new(records(1), 0)).await.unwrap();
        // The worker may not have picked the batch up yet, but it is
        // already admitted and must count as in flight.
        assert_eq!(pool.running_count(), 1);

        pool.begin_draining();
        pool.join().await;
        assert_eq!(pool.running_count(), 0);
        assert_eq!(gauge.processed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_submit_after_draining_is_rejected() {
        let gauge = Arc::new(Gauge::default());
        let pool = pool_with(
            Arc::clone(&gauge),
            WorkerPoolConfig::new().with_max_workers(2),
            Duration::ZERO,
        );

        pool.begin_draining();
        let result = pool.submit(Batch::new(records(1), 0)).await;
        assert!(matches!(result, Err(PoolError::Draining)));
    }

    #[tokio::test]
    async fn test_shutdown_without_workers_is_safe() {
        let gauge = Arc::new(Gauge::default());
        let pool = pool_with(
            Arc::clone(&gauge),
            WorkerPoolConfig::new().with_max_workers(2),
            Duration::ZERO,
        );
        pool.shutdown();
        assert!(pool.is_draining());
    }

    #[tokio::test]
    async fn test_setup_and_teardown_once_per_worker() {
        let gauge = Arc::new(Gauge::default());
        let config = WorkerPoolConfig::new()
            .with_max_workers(1)
            .with_retry_delay(Duration::ZERO);
        let pool = pool_with(Arc::clone(&gauge), config, Duration::ZERO);

        for _ in 0..4 {
            pool.submit(Batch::new(records(3), 0)).await.unwrap();
        }
        pool.begin_draining();
        pool.join().await;

        assert_eq!(gauge.setups.load(Ordering::SeqCst), 1);
        assert_eq!(gauge.teardowns.load(Ordering::SeqCst), 1);
    }
}
