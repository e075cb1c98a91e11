//! Opaque mutable records flowing through the pipeline
//!
//! A [`Record`] is an ordered column-to-value mapping. The pipeline never
//! interprets the values; they only matter to the [`BatchExecutor`] that
//! augments them.
//!
//! [`BatchExecutor`]: crate::executor::BatchExecutor

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An ordered mapping of column names to values.
///
/// Columns keep their insertion order, and setting an existing column
/// replaces its value in place. A record is owned by exactly one
/// [`Batch`](crate::batch::Batch) at a time; it is never shared across
/// concurrently running batches.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    columns: Vec<(String, Value)>,
}

impl Record {
    /// Create an empty record
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the value of a column, if present
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    /// Set a column, replacing any existing value for it
    pub fn set(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        let column = column.into();
        let value = value.into();
        match self.columns.iter_mut().find(|(name, _)| *name == column) {
            Some((_, existing)) => *existing = value,
            None => self.columns.push((column, value)),
        }
    }

    /// Column names in insertion order
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(name, _)| name.as_str())
    }

    /// Number of columns
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Check whether the record has no columns
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Render a short `col=value` listing for diagnostics
    pub fn describe(&self) -> String {
        let mut out = String::new();
        for (name, value) in &self.columns {
            if !out.is_empty() {
                out.push_str(", ");
            }
            out.push_str(name);
            out.push('=');
            out.push_str(&value.to_string());
        }
        out
    }
}

impl FromIterator<(String, Value)> for Record {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        let mut record = Record::new();
        for (name, value) in iter {
            record.set(name, value);
        }
        record
    }
}
