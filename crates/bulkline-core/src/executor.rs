//! Per-record augmentation contract
//!
//! A [`BatchExecutor`] is the pluggable capability the pipeline drives: it
//! augments one record at a time and may perform batch-level updates after
//! every record in a batch has been attempted. Each worker owns its own
//! executor instance, built by the factory handed to the pool, so executors
//! may hold per-worker resources (connections, buffers) without locking.

use async_trait::async_trait;

use crate::progress::Progress;
use crate::record::Record;

/// Errors a per-record task can produce.
///
/// The split decides the record's fate: recoverable failures are eligible
/// for rework up to the retry ceiling; irreparable ones are quarantined
/// immediately and never retried.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TaskError {
    /// Transient failure, worth retrying
    #[error("recoverable failure: {0}")]
    Recoverable(String),

    /// Permanent failure, retrying cannot help
    #[error("irreparable failure: {0}")]
    Irreparable(String),
}

impl TaskError {
    /// Whether this error can never be fixed by retrying
    pub fn is_irreparable(&self) -> bool {
        matches!(self, TaskError::Irreparable(_))
    }
}

/// Augments records one at a time on behalf of a single worker.
///
/// Lifecycle, per worker:
///
/// 1. `setup`: once, before the first batch
/// 2. `process`: once per record, in batch order
/// 3. `flush`: once per batch, after all records were attempted
/// 4. `teardown`: once, before the worker is discarded
///
/// A `process` error marks only that record as failed; its batch siblings
/// still run. A `setup` or `flush` error fails the whole batch run and is
/// surfaced through the pool's failure callback.
#[async_trait]
pub trait BatchExecutor: Send + 'static {
    /// One-time setup before the first batch. Never runs twice.
    async fn setup(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Augment a single record.
    ///
    /// Implementations may report fine-grained completion through
    /// `progress`; the pipeline itself increments it once per successful
    /// record, so most executors can ignore the handle.
    async fn process(&mut self, record: &mut Record, progress: &Progress)
        -> Result<(), TaskError>;

    /// Batch-level updates after all records in a batch were attempted.
    ///
    /// `augmented` is the number of records that processed cleanly in this
    /// batch. An error here fails the whole batch run.
    async fn flush(&mut self, augmented: usize) -> anyhow::Result<()> {
        let _ = augmented;
        Ok(())
    }

    /// One-time teardown before the worker exits. Never runs twice.
    async fn teardown(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_error_classification() {
        assert!(!TaskError::Recoverable("timeout".into()).is_irreparable());
        assert!(TaskError::Irreparable("corrupt row".into()).is_irreparable());
    }

    #[test]
    fn test_task_error_display_carries_message() {
        let err = TaskError::Recoverable("service unavailable".into());
        assert_eq!(err.to_string(), "recoverable failure: service unavailable");
    }
}
