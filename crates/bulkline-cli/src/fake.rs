//! Synthetic record source for demo runs

use bulkline_core::{Record, RecordSource, SourceError};
use rand::Rng;

const NAMES: &[&str] = &["Fred", "Jane", "Richard Nixon", "Miss America", "John Doe"];

const VERBS: &[&str] = &["loves", "hates", "sees", "knows", "looks for", "finds"];

const FRUITS: &[&str] = &[
    "Apple",
    "Mango",
    "Peach",
    "Banana",
    "Orange",
    "Grapes",
    "Watermelon",
    "Tomato",
];

/// Generates `total` random sentence-shaped rows.
///
/// One specific combination is poisoned: `Fred hates Apple` rows can never
/// be augmented, exercising the irreparable path end to end.
pub struct FakeSource {
    current: u64,
    total: u64,
}

impl FakeSource {
    pub fn new(total: u64) -> Self {
        Self { current: 0, total }
    }
}

impl RecordSource for FakeSource {
    fn total_hint(&self) -> Option<u64> {
        Some(self.total)
    }

    fn has_next(&self) -> bool {
        self.current < self.total
    }

    fn next_record(&mut self) -> Result<Record, SourceError> {
        if !self.has_next() {
            return Err(SourceError::Exhausted);
        }
        let mut rng = rand::thread_rng();
        let mut record = Record::new();
        record.set("id", self.current);
        record.set("name", NAMES[rng.gen_range(0..NAMES.len())]);
        record.set("verb", VERBS[rng.gen_range(0..VERBS.len())]);
        record.set("fruit", FRUITS[rng.gen_range(0..FRUITS.len())]);
        self.current += 1;
        Ok(record)
    }
}

/// Whether a row carries the poisoned combination
pub fn is_poisoned(record: &Record) -> bool {
    matches!(record.get("name").and_then(|v| v.as_str()), Some("Fred"))
        && matches!(record.get("verb").and_then(|v| v.as_str()), Some("hates"))
        && matches!(record.get("fruit").and_then(|v| v.as_str()), Some("Apple"))
}
