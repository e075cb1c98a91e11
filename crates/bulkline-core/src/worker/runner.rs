//! Per-batch execution on a single worker
//!
//! A [`BatchRunner`] wraps one worker's [`BatchExecutor`] and drives a batch
//! through it: optional startup delay for retried batches, one `process`
//! call per record with partial-failure semantics, then the batch-level
//! `flush`. Exactly one of the pool's two callbacks fires per batch: the
//! success callback with an aggregated [`BatchReport`] (even when some
//! records failed), or the failure callback when the run itself failed.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, warn};

use crate::batch::{Batch, FailedRecord};
use crate::executor::BatchExecutor;
use crate::progress::Progress;

/// Aggregated result of one batch run.
///
/// Carries everything the orchestrator needs to classify the outcome
/// without reaching back into the worker.
#[derive(Debug)]
pub struct BatchReport {
    /// Pool-local id of the worker that ran the batch
    pub worker_id: usize,
    /// Retry index of the batch that was run
    pub retry_index: u32,
    /// Number of records in the batch
    pub batch_size: usize,
    /// Records that processed cleanly
    pub augmented: usize,
    /// Records that failed, in batch order
    pub failures: Vec<FailedRecord>,
}

impl BatchReport {
    /// Whether every record in the batch processed cleanly
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Invoked after every executed batch, clean or not
pub type SuccessCallback = Arc<dyn Fn(BatchReport) + Send + Sync>;

/// Invoked when a whole batch run failed (setup or flush error), with the
/// batch handed back so its records can be accounted for
pub type FailureCallback = Arc<dyn Fn(Batch, anyhow::Error) + Send + Sync>;

/// Knobs for batch execution on a worker.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Fixed delay applied before the first record of a retried batch
    pub retry_delay: Duration,
    /// How many times to rerun a whole batch whose run failed (0 = never)
    pub run_retries: u32,
}

pub(crate) struct BatchRunner<E: BatchExecutor> {
    worker_id: usize,
    executor: E,
    config: RunnerConfig,
    progress: Progress,
    on_success: SuccessCallback,
    on_failure: FailureCallback,
    initialized: bool,
}

impl<E: BatchExecutor> BatchRunner<E> {
    pub(crate) fn new(
        worker_id: usize,
        executor: E,
        config: RunnerConfig,
        progress: Progress,
        on_success: SuccessCallback,
        on_failure: FailureCallback,
    ) -> Self {
        Self {
            worker_id,
            executor,
            config,
            progress,
            on_success,
            on_failure,
            initialized: false,
        }
    }

    /// Run one batch to completion and report through exactly one callback.
    pub(crate) async fn run(&mut self, batch: Batch) {
        if !self.initialized {
            if let Err(error) = self.executor.setup().await {
                error!(
                    worker_id = self.worker_id,
                    %error,
                    "executor setup failed, reporting batch as failed"
                );
                (self.on_failure)(batch, error);
                return;
            }
            self.initialized = true;
        }

        let max_attempts = self.config.run_retries.saturating_add(1);
        let mut attempt = 1u32;
        loop {
            match self.run_once(&batch).await {
                Ok(report) => {
                    (self.on_success)(report);
                    return;
                }
                Err(error) if attempt < max_attempts => {
                    warn!(
                        worker_id = self.worker_id,
                        attempt,
                        max_attempts,
                        %error,
                        "batch run failed, rerunning"
                    );
                    attempt += 1;
                }
                Err(error) => {
                    error!(
                        worker_id = self.worker_id,
                        attempts = attempt,
                        %error,
                        "batch run failed permanently"
                    );
                    (self.on_failure)(batch, error);
                    return;
                }
            }
        }
    }

    /// One attempt at the batch: delay, per-record loop, flush.
    async fn run_once(&mut self, batch: &Batch) -> anyhow::Result<BatchReport> {
        // Retried batches wait a fixed delay before the first record so a
        // struggling collaborator has time to recover. Not a backoff.
        if batch.is_retry() && !self.config.retry_delay.is_zero() {
            debug!(
                worker_id = self.worker_id,
                retry_index = batch.retry_index(),
                delay_ms = self.config.retry_delay.as_millis() as u64,
                "delaying retried batch"
            );
            tokio::time::sleep(self.config.retry_delay).await;
        }

        let mut augmented = 0usize;
        let mut failures = Vec::new();

        for record in batch.records() {
            let mut record = record.clone();
            match self.executor.process(&mut record, &self.progress).await {
                Ok(()) => {
                    augmented += 1;
                }
                Err(error) => {
                    // One bad record never blocks its batch siblings.
                    failures.push(FailedRecord::from_task_error(record, error));
                }
            }
        }

        self.executor.flush(augmented).await?;

        // Progress moves only for attempts that stuck. Rerun attempts after
        // a flush failure would otherwise count the same records again.
        self.progress.increment(augmented as u64);

        Ok(BatchReport {
            worker_id: self.worker_id,
            retry_index: batch.retry_index(),
            batch_size: batch.len(),
            augmented,
            failures,
        })
    }

    /// Teardown hook, called once when the worker loop exits.
    pub(crate) async fn finish(&mut self) {
        if self.initialized {
            self.executor.teardown().await;
        }
    }
}
