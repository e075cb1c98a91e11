//! Batches and per-record failure data
//!
//! A [`Batch`] is the unit of work handed to the worker pool: an ordered
//! group of records plus the retry index of its lineage. Batches are
//! immutable once constructed; a failed batch produces a *new* batch
//! containing only the failed records.

use serde::{Deserialize, Serialize};

use crate::executor::TaskError;
use crate::record::Record;

/// An ordered group of records submitted to the pool as one unit of work.
#[derive(Debug, Clone)]
pub struct Batch {
    records: Vec<Record>,
    retry_index: u32,
}

impl Batch {
    /// Create a batch.
    ///
    /// `retry_index` is 0 for an original submission and is incremented by
    /// one each time the failed remainder of a batch is rescheduled.
    pub fn new(records: Vec<Record>, retry_index: u32) -> Self {
        Self {
            records,
            retry_index,
        }
    }

    /// Records in submission order
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    /// Consume the batch, yielding its records
    pub fn into_records(self) -> Vec<Record> {
        self.records
    }

    /// Number of records in the batch
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check whether the batch holds no records
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// How many times this lineage has been rescheduled
    pub fn retry_index(&self) -> u32 {
        self.retry_index
    }

    /// True for any resubmission of previously failed records
    pub fn is_retry(&self) -> bool {
        self.retry_index > 0
    }
}

/// Why a record ended up in a failure bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Transient failure, eligible for rework
    Recoverable,
    /// Permanent failure, never retried
    Irreparable,
    /// The whole batch run failed before this record could be resolved
    Aborted,
}

/// A record that failed processing, with the error that sank it.
///
/// Created by a worker when the per-record task fails; consumed by the
/// orchestrator's classification step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedRecord {
    /// The record as it was when the failure happened
    pub record: Record,
    /// Human-readable error message
    pub message: String,
    /// Failure classification from the task that produced it
    pub kind: FailureKind,
}

impl FailedRecord {
    /// Create a failed record
    pub fn new(record: Record, message: impl Into<String>, kind: FailureKind) -> Self {
        Self {
            record,
            message: message.into(),
            kind,
        }
    }

    /// Build a failed record from a task error
    pub fn from_task_error(record: Record, error: TaskError) -> Self {
        let kind = match error {
            TaskError::Recoverable(_) => FailureKind::Recoverable,
            TaskError::Irreparable(_) => FailureKind::Irreparable,
        };
        Self::new(record, error.to_string(), kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: u64) -> Record {
        let mut r = Record::new();
        r.set("id", id);
        r
    }

    #[test]
    fn test_batch_retry_index() {
        let original = Batch::new(vec![record(1), record(2)], 0);
        assert_eq!(original.len(), 2);
        assert!(!original.is_retry());

        let rework = Batch::new(vec![record(2)], original.retry_index() + 1);
        assert_eq!(rework.retry_index(), 1);
        assert!(rework.is_retry());
    }

    #[test]
    fn test_failed_record_from_task_error() {
        let failed = FailedRecord::from_task_error(
            record(3),
            TaskError::Recoverable("service unavailable".into()),
        );
        assert_eq!(failed.kind, FailureKind::Recoverable);
        assert!(failed.message.contains("service unavailable"));

        let failed = FailedRecord::from_task_error(record(4), TaskError::Irreparable("bad".into()));
        assert_eq!(failed.kind, FailureKind::Irreparable);
    }
}
