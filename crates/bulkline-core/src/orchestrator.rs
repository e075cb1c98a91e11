//! Pipeline orchestration: chunking, rework, and the final report
//!
//! The [`Orchestrator`] drives the whole pipeline. It chunks the record
//! source into fixed-size batches, submits them to the worker pool, and
//! then loops over a rework queue fed by the failure-classification
//! callback until no work remains anywhere: source exhausted, rework queue
//! empty, and nothing in flight, checked in that order.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::batch::{Batch, FailedRecord, FailureKind};
use crate::executor::BatchExecutor;
use crate::progress::Progress;
use crate::source::{RecordSource, SourceError};
use crate::worker::{
    BatchReport, FailureCallback, PoolError, SuccessCallback, WorkerPool, WorkerPoolConfig,
};

/// Decides whether a failed record can never be repaired.
///
/// Applied to every failure during classification; matching records go to
/// the permanent irreparable list and are never retried.
pub type IrreparablePredicate = Arc<dyn Fn(&FailedRecord) -> bool + Send + Sync>;

/// Orchestrator configuration
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Records per batch
    pub chunk_size: usize,

    /// Maximum concurrent workers
    pub max_workers: usize,

    /// Retry ceiling for recoverable failures; `None` or `Some(0)` disables
    /// rework entirely
    pub max_retries: Option<u32>,

    /// Fixed delay a worker applies before the first record of a retried
    /// batch
    pub retry_delay: Duration,

    /// How many times a worker reruns a whole failed batch run (0 = never)
    pub run_retries: u32,

    /// Sleep between drain-loop polls while workers are still busy
    pub poll_interval: Duration,

    /// How often the drain loop emits a status line
    pub status_interval: Duration,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            chunk_size: 100,
            max_workers: 8,
            max_retries: Some(5),
            retry_delay: Duration::from_secs(5),
            run_retries: 0,
            poll_interval: Duration::from_secs(1),
            status_interval: Duration::from_secs(60),
        }
    }
}

impl RunConfig {
    /// Create a configuration with the default knobs
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of records per batch
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size.max(1);
        self
    }

    /// Set the maximum number of workers
    pub fn with_max_workers(mut self, max: usize) -> Self {
        self.max_workers = max.max(1);
        self
    }

    /// Set the retry ceiling (`None` disables rework)
    pub fn with_max_retries(mut self, max: Option<u32>) -> Self {
        self.max_retries = max;
        self
    }

    /// Set the fixed delay for retried batches
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Set the per-run rerun count for failed batch runs
    pub fn with_run_retries(mut self, retries: u32) -> Self {
        self.run_retries = retries;
        self
    }

    /// Set the drain-loop poll interval
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the status line interval
    pub fn with_status_interval(mut self, interval: Duration) -> Self {
        self.status_interval = interval;
        self
    }
}

/// Orchestrator errors
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    /// The record source failed mid-stream
    #[error(transparent)]
    Source(#[from] SourceError),

    /// The pool rejected a submission
    #[error(transparent)]
    Pool(#[from] PoolError),

    /// User-supplied classification logic panicked; wrapped and re-thrown
    #[error("failure classification panicked: {0}")]
    Classification(String),
}

/// End-of-run summary.
///
/// Every record that entered the pipeline is accounted for in exactly one
/// of: the augmented count, the irreparable list, or the exhausted list.
#[derive(Debug, Serialize)]
pub struct RunReport {
    /// Records pulled from the source
    pub total_records: u64,
    /// Records augmented successfully
    pub augmented: u64,
    /// Records with permanent failures, never retried
    pub irreparable: Vec<FailedRecord>,
    /// Records whose recoverable failures outlived the retry budget
    pub exhausted: Vec<FailedRecord>,
    /// When the run started
    pub started_at: DateTime<Utc>,
    /// When the run finished
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    /// Number of records that ended in a failure bucket
    pub fn error_count(&self) -> usize {
        self.irreparable.len() + self.exhausted.len()
    }

    /// Whether every record was augmented
    pub fn is_clean(&self) -> bool {
        self.error_count() == 0
    }
}

/// Shared state between the drain loop and the classification callback,
/// which runs on worker threads.
#[derive(Default)]
struct RunState {
    rework: Mutex<VecDeque<Batch>>,
    augmented: AtomicU64,
    irreparable: Mutex<Vec<FailedRecord>>,
    exhausted: Mutex<Vec<FailedRecord>>,
    fatal: Mutex<Option<String>>,
}

impl RunState {
    fn rework_len(&self) -> usize {
        self.rework.lock().len()
    }
}

/// Drives a record source through the worker pool until no work remains.
pub struct Orchestrator<S, E>
where
    S: RecordSource,
    E: BatchExecutor,
{
    source: S,
    factory: Arc<dyn Fn() -> E + Send + Sync>,
    config: RunConfig,
    is_irreparable: IrreparablePredicate,
    progress: Progress,
}

impl<S, E> Orchestrator<S, E>
where
    S: RecordSource,
    E: BatchExecutor,
{
    /// Create an orchestrator.
    ///
    /// `factory` builds one executor per worker. By default a failure is
    /// irreparable when its task classified it so; override the predicate
    /// with [`with_irreparable_predicate`](Self::with_irreparable_predicate)
    /// to classify on message content instead.
    pub fn new(source: S, factory: impl Fn() -> E + Send + Sync + 'static, config: RunConfig) -> Self {
        Self {
            source,
            factory: Arc::new(factory),
            config,
            is_irreparable: Arc::new(|failure| failure.kind == FailureKind::Irreparable),
            progress: Progress::new(),
        }
    }

    /// Replace the irreparable-failure predicate
    pub fn with_irreparable_predicate(
        mut self,
        predicate: impl Fn(&FailedRecord) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.is_irreparable = Arc::new(predicate);
        self
    }

    /// Share an externally owned progress tracker
    pub fn with_progress(mut self, progress: Progress) -> Self {
        self.progress = progress;
        self
    }

    /// Run the pipeline to completion.
    ///
    /// Chunks the source into batches, drains the rework queue, and
    /// returns the final report once everything has settled. The only
    /// aborting failure besides source and pool errors is a panic inside
    /// the user-supplied classification predicate.
    pub async fn run(mut self) -> Result<RunReport, RunError> {
        let started_at = Utc::now();
        if let Some(total) = self.source.total_hint() {
            self.progress.set_total(total);
        }

        let state = Arc::new(RunState::default());
        let pool = self.build_pool(&state);

        info!(
            chunk_size = self.config.chunk_size,
            max_workers = self.config.max_workers,
            max_retries = ?self.config.max_retries,
            "starting bulk run"
        );

        let total_records = self.submit_chunks(&pool).await?;
        self.drain(&pool, &state).await?;

        pool.begin_draining();
        pool.join().await;

        if let Some(message) = state.fatal.lock().take() {
            return Err(RunError::Classification(message));
        }

        self.progress.complete();

        let report = RunReport {
            total_records,
            augmented: state.augmented.load(Ordering::Relaxed),
            irreparable: std::mem::take(&mut *state.irreparable.lock()),
            exhausted: std::mem::take(&mut *state.exhausted.lock()),
            started_at,
            finished_at: Utc::now(),
        };
        log_summary(&report);
        Ok(report)
    }

    /// Build the pool with the classification callbacks wired in.
    fn build_pool(&self, state: &Arc<RunState>) -> WorkerPool<E> {
        let on_success: SuccessCallback = {
            let state = Arc::clone(state);
            let predicate = Arc::clone(&self.is_irreparable);
            let max_retries = self.config.max_retries;
            Arc::new(move |report| classify_report(&state, &predicate, max_retries, report))
        };

        let on_failure: FailureCallback = {
            let state = Arc::clone(state);
            Arc::new(move |batch, error| quarantine_batch(&state, batch, &error))
        };

        let pool_config = WorkerPoolConfig::new()
            .with_max_workers(self.config.max_workers)
            .with_retry_delay(self.config.retry_delay)
            .with_run_retries(self.config.run_retries);

        let factory = Arc::clone(&self.factory);
        WorkerPool::new(
            pool_config,
            move || factory(),
            self.progress.clone(),
            on_success,
            on_failure,
        )
    }

    /// Chunking phase: pull records and submit fixed-size windows.
    async fn submit_chunks(&mut self, pool: &WorkerPool<E>) -> Result<u64, RunError> {
        let mut total = 0u64;
        let mut chunk = Vec::with_capacity(self.config.chunk_size);

        while self.source.has_next() {
            let record = self.source.next_record()?;
            total += 1;
            chunk.push(record);
            if chunk.len() == self.config.chunk_size {
                let full = std::mem::replace(&mut chunk, Vec::with_capacity(self.config.chunk_size));
                debug!(records = full.len(), "submitting batch");
                pool.submit(Batch::new(full, 0)).await?;
            }
        }
        if !chunk.is_empty() {
            debug!(records = chunk.len(), "submitting final partial batch");
            pool.submit(Batch::new(chunk, 0)).await?;
        }

        debug!(total, "source exhausted");
        Ok(total)
    }

    /// Drain phase: resubmit rework until the queue is empty and nothing is
    /// in flight. The rework queue is always checked *before* the in-flight
    /// count; a batch counts as in flight from submission until its
    /// classification has run, so neither freshly queued work nor rework
    /// can slip in between the two checks.
    async fn drain(&self, pool: &WorkerPool<E>, state: &Arc<RunState>) -> Result<(), RunError> {
        let mut next_status = tokio::time::Instant::now() + self.config.status_interval;

        loop {
            if state.fatal.lock().is_some() {
                error!("classification failure detected, interrupting workers");
                pool.shutdown();
                return Ok(()); // run() surfaces the stored message
            }

            if tokio::time::Instant::now() >= next_status {
                info!(
                    rework_queued = state.rework_len(),
                    in_flight = pool.running_count(),
                    percent = format!("{:.1}", self.progress.percentage()),
                    "bulk run in progress"
                );
                next_status = tokio::time::Instant::now() + self.config.status_interval;
            }

            let rework = state.rework.lock().pop_front();
            match rework {
                Some(batch) => {
                    info!(
                        records = batch.len(),
                        retry_index = batch.retry_index(),
                        "resubmitting rework batch"
                    );
                    pool.submit(batch).await?;
                }
                None => {
                    if pool.running_count() == 0 {
                        debug!("no rework and nothing in flight, run settled");
                        return Ok(());
                    }
                    tokio::time::sleep(self.config.poll_interval).await;
                }
            }
        }
    }
}

/// Classify one batch report: count the clean records, quarantine the
/// irreparable ones, and either reschedule or exhaust the recoverable ones.
fn classify_report(
    state: &RunState,
    is_irreparable: &IrreparablePredicate,
    max_retries: Option<u32>,
    report: BatchReport,
) {
    state
        .augmented
        .fetch_add(report.augmented as u64, Ordering::Relaxed);

    if report.failures.is_empty() {
        return;
    }

    let retry_index = report.retry_index;
    let mut recoverable = Vec::new();
    for failure in report.failures {
        match catch_unwind(AssertUnwindSafe(|| is_irreparable(&failure))) {
            Ok(true) => {
                debug!(record = %failure.record.describe(), "irreparable failure quarantined");
                state.irreparable.lock().push(failure);
            }
            Ok(false) => recoverable.push(failure),
            Err(panic) => {
                *state.fatal.lock() = Some(panic_message(panic));
                return;
            }
        }
    }

    if recoverable.is_empty() {
        return;
    }

    let max_retries = match max_retries {
        Some(max) if max > 0 => max,
        _ => {
            warn!(
                count = recoverable.len(),
                "recoverable failures but no retry budget configured, recording as exhausted"
            );
            state.exhausted.lock().extend(recoverable);
            return;
        }
    };

    // A batch already at the ceiling is never resubmitted.
    if retry_index >= max_retries {
        warn!(
            count = recoverable.len(),
            retry_index,
            max_retries,
            "all retries failed, recording records as exhausted"
        );
        state.exhausted.lock().extend(recoverable);
        return;
    }

    debug!(
        count = recoverable.len(),
        retry_index = retry_index + 1,
        "scheduling rework batch"
    );
    let records = recoverable.into_iter().map(|f| f.record).collect();
    state
        .rework
        .lock()
        .push_back(Batch::new(records, retry_index + 1));
}

/// A whole batch run failed: keep the run alive but account for every
/// record so none silently disappears.
fn quarantine_batch(state: &RunState, batch: Batch, error: &anyhow::Error) {
    error!(
        records = batch.len(),
        retry_index = batch.retry_index(),
        %error,
        "batch run failed, quarantining its records"
    );
    let message = format!("batch run failed: {error}");
    let mut irreparable = state.irreparable.lock();
    for record in batch.into_records() {
        irreparable.push(FailedRecord::new(record, message.clone(), FailureKind::Aborted));
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn log_summary(report: &RunReport) {
    info!(
        total = report.total_records,
        augmented = report.augmented,
        errors = report.error_count(),
        "bulk run finished"
    );
    for failed in &report.irreparable {
        info!(
            record = %failed.record.describe(),
            error = %failed.message,
            "irreparable record"
        );
    }
    for failed in &report.exhausted {
        info!(
            record = %failed.record.describe(),
            error = %failed.message,
            "retries exhausted for record"
        );
    }
    if report.error_count() > 0 {
        warn!(errors = report.error_count(), "bulk run degraded");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Record;

    fn record(id: u64) -> Record {
        let mut r = Record::new();
        r.set("id", id);
        r
    }

    fn failed(id: u64, kind: FailureKind) -> FailedRecord {
        FailedRecord::new(record(id), format!("record {id} failed"), kind)
    }

    fn report(retry_index: u32, augmented: usize, failures: Vec<FailedRecord>) -> BatchReport {
        BatchReport {
            worker_id: 0,
            retry_index,
            batch_size: augmented + failures.len(),
            augmented,
            failures,
        }
    }

    fn kind_predicate() -> IrreparablePredicate {
        Arc::new(|f: &FailedRecord| f.kind == FailureKind::Irreparable)
    }

    #[test]
    fn test_config_builder() {
        let config = RunConfig::new()
            .with_chunk_size(50)
            .with_max_workers(4)
            .with_max_retries(Some(2))
            .with_retry_delay(Duration::from_millis(10));

        assert_eq!(config.chunk_size, 50);
        assert_eq!(config.max_workers, 4);
        assert_eq!(config.max_retries, Some(2));
        assert_eq!(config.retry_delay, Duration::from_millis(10));
    }

    #[test]
    fn test_clean_report_only_counts() {
        let state = RunState::default();
        classify_report(&state, &kind_predicate(), Some(3), report(0, 10, vec![]));

        assert_eq!(state.augmented.load(Ordering::Relaxed), 10);
        assert_eq!(state.rework_len(), 0);
        assert!(state.irreparable.lock().is_empty());
    }

    #[test]
    fn test_irreparable_never_enters_rework() {
        let state = RunState::default();
        classify_report(
            &state,
            &kind_predicate(),
            Some(3),
            report(0, 1, vec![failed(1, FailureKind::Irreparable)]),
        );

        assert_eq!(state.irreparable.lock().len(), 1);
        assert_eq!(state.rework_len(), 0);
        assert!(state.exhausted.lock().is_empty());
    }

    #[test]
    fn test_recoverable_is_rescheduled_with_bumped_index() {
        let state = RunState::default();
        classify_report(
            &state,
            &kind_predicate(),
            Some(3),
            report(1, 0, vec![failed(1, FailureKind::Recoverable)]),
        );

        let rework = state.rework.lock();
        assert_eq!(rework.len(), 1);
        assert_eq!(rework[0].retry_index(), 2);
        assert_eq!(rework[0].len(), 1);
    }

    #[test]
    fn test_at_ceiling_goes_to_exhausted() {
        let state = RunState::default();
        classify_report(
            &state,
            &kind_predicate(),
            Some(2),
            report(2, 0, vec![failed(1, FailureKind::Recoverable)]),
        );

        assert_eq!(state.exhausted.lock().len(), 1);
        assert_eq!(state.rework_len(), 0);
    }

    #[test]
    fn test_no_retry_budget_exhausts_immediately() {
        for budget in [None, Some(0)] {
            let state = RunState::default();
            classify_report(
                &state,
                &kind_predicate(),
                budget,
                report(0, 0, vec![failed(1, FailureKind::Recoverable)]),
            );
            assert_eq!(state.exhausted.lock().len(), 1);
            assert_eq!(state.rework_len(), 0);
        }
    }

    #[test]
    fn test_mixed_failures_are_partitioned() {
        let state = RunState::default();
        classify_report(
            &state,
            &kind_predicate(),
            Some(3),
            report(
                0,
                5,
                vec![
                    failed(1, FailureKind::Irreparable),
                    failed(2, FailureKind::Recoverable),
                    failed(3, FailureKind::Recoverable),
                ],
            ),
        );

        assert_eq!(state.augmented.load(Ordering::Relaxed), 5);
        assert_eq!(state.irreparable.lock().len(), 1);
        let rework = state.rework.lock();
        assert_eq!(rework[0].len(), 2);
        assert_eq!(rework[0].retry_index(), 1);
    }

    #[test]
    fn test_predicate_panic_is_captured_as_fatal() {
        let state = RunState::default();
        let panicking: IrreparablePredicate = Arc::new(|_| panic!("bad predicate"));
        classify_report(
            &state,
            &panicking,
            Some(3),
            report(0, 0, vec![failed(1, FailureKind::Recoverable)]),
        );

        assert_eq!(state.fatal.lock().as_deref(), Some("bad predicate"));
        assert_eq!(state.rework_len(), 0);
    }

    #[test]
    fn test_quarantine_batch_accounts_for_every_record() {
        let state = RunState::default();
        let batch = Batch::new(vec![record(1), record(2)], 1);
        quarantine_batch(&state, batch, &anyhow::anyhow!("connection lost"));

        let irreparable = state.irreparable.lock();
        assert_eq!(irreparable.len(), 2);
        assert!(irreparable.iter().all(|f| f.kind == FailureKind::Aborted));
        assert!(irreparable[0].message.contains("connection lost"));
    }

    #[test]
    fn test_report_error_count() {
        let report = RunReport {
            total_records: 10,
            augmented: 7,
            irreparable: vec![failed(1, FailureKind::Irreparable)],
            exhausted: vec![failed(2, FailureKind::Recoverable), failed(3, FailureKind::Recoverable)],
            started_at: Utc::now(),
            finished_at: Utc::now(),
        };
        assert_eq!(report.error_count(), 3);
        assert!(!report.is_clean());
    }
}
