//! Demo augmentation: add a hash column to every record

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use async_trait::async_trait;
use bulkline_core::{BatchExecutor, Progress, Record, TaskError};
use rand::Rng;
use tracing::debug;

/// Hashes every column value into a new `hash` column.
///
/// Poisoned rows fail irreparably; an `error_rate` fraction of the rest
/// fails recoverably, simulating a flaky downstream service.
pub struct HashColumnExecutor {
    error_rate: f64,
}

impl HashColumnExecutor {
    pub fn new(error_rate: f64) -> Self {
        Self {
            error_rate: error_rate.clamp(0.0, 1.0),
        }
    }
}

#[async_trait]
impl BatchExecutor for HashColumnExecutor {
    async fn process(
        &mut self,
        record: &mut Record,
        _progress: &Progress,
    ) -> Result<(), TaskError> {
        if crate::fake::is_poisoned(record) {
            return Err(TaskError::Irreparable(format!(
                "[irreparable] row cannot be hashed: {}",
                record.describe()
            )));
        }
        if self.error_rate > 0.0 && rand::thread_rng().gen_bool(self.error_rate) {
            return Err(TaskError::Recoverable(
                "hashing service is temporarily unavailable".into(),
            ));
        }

        let mut hasher = DefaultHasher::new();
        let names: Vec<String> = record.column_names().map(str::to_string).collect();
        for name in names {
            if let Some(value) = record.get(&name) {
                value.to_string().hash(&mut hasher);
            }
        }
        record.set("hash", hasher.finish());
        Ok(())
    }

    async fn flush(&mut self, augmented: usize) -> anyhow::Result<()> {
        if augmented > 0 {
            debug!(records = augmented, "applied batch changes");
        }
        Ok(())
    }
}
