//! Record sources feeding the pipeline
//!
//! The pipeline pulls records lazily through the [`RecordSource`] trait,
//! mirroring cursor-style result sets: `has_next` / `next_record` until
//! exhaustion.

use crate::record::Record;

/// Record source errors
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// `next_record` was called after the source ran out
    #[error("record source is exhausted")]
    Exhausted,

    /// Any other failure while producing a record
    #[error("record source failed: {0}")]
    Other(#[from] anyhow::Error),
}

/// A lazy, cursor-style sequence of records.
pub trait RecordSource: Send {
    /// Total record count, when the source knows it up front.
    ///
    /// Used to size progress reporting; `None` leaves the percentage at 0.
    fn total_hint(&self) -> Option<u64> {
        None
    }

    /// Whether another record is available
    fn has_next(&self) -> bool;

    /// Produce the next record.
    ///
    /// Fails with [`SourceError::Exhausted`] when called past the end.
    fn next_record(&mut self) -> Result<Record, SourceError>;
}

/// Adapter exposing any record iterator as a [`RecordSource`].
///
/// Keeps a one-record lookahead so `has_next` answers without consuming.
pub struct IterSource<I: Iterator<Item = Record>> {
    iter: I,
    lookahead: Option<Record>,
    total: Option<u64>,
}

impl<I: Iterator<Item = Record>> IterSource<I> {
    /// Wrap an iterator, optionally declaring its total length
    pub fn new(mut iter: I, total: Option<u64>) -> Self {
        let lookahead = iter.next();
        Self {
            iter,
            lookahead,
            total,
        }
    }
}

impl IterSource<std::vec::IntoIter<Record>> {
    /// Source over an in-memory record list
    pub fn from_vec(records: Vec<Record>) -> Self {
        let total = records.len() as u64;
        Self::new(records.into_iter(), Some(total))
    }
}

impl<I: Iterator<Item = Record> + Send> RecordSource for IterSource<I> {
    fn total_hint(&self) -> Option<u64> {
        self.total
    }

    fn has_next(&self) -> bool {
        self.lookahead.is_some()
    }

    fn next_record(&mut self) -> Result<Record, SourceError> {
        let current = self.lookahead.take().ok_or(SourceError::Exhausted)?;
        self.lookahead = self.iter.next();
        Ok(current)
    }
}
