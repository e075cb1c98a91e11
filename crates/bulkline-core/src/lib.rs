//! # Bulkline
//!
//! An in-process pipeline that processes a streamed collection of records
//! in fixed-size batches on a bounded pool of reusable workers.
//!
//! ## Features
//!
//! - **Bounded worker pool**: lazily grown up to a cap, with producer
//!   backpressure: submitters block while the pool is saturated
//! - **Partial-failure batches**: one bad record never blocks its siblings
//! - **Automatic rework**: recoverable failures are rebatched and retried
//!   after a fixed delay, up to a configurable ceiling
//! - **Permanent quarantine**: irreparable records are recorded once and
//!   never retried
//! - **Structured reporting**: every record ends in exactly one bucket
//!   (augmented, irreparable, or retries-exhausted)
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Orchestrator                           │
//! │  (chunks the source, feeds the rework queue, classifies     │
//! │   failures, terminates when no work remains anywhere)       │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        WorkerPool                            │
//! │  (bounded, permit-based backpressure, shared batch queue)   │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      BatchExecutor                           │
//! │  (user capability: augments one record at a time, plus      │
//! │   batch-level flush and per-worker setup/teardown)          │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use bulkline_core::prelude::*;
//!
//! let source = IterSource::from_vec(load_records());
//! let config = RunConfig::new()
//!     .with_chunk_size(100)
//!     .with_max_workers(8)
//!     .with_max_retries(Some(5));
//!
//! let report = Orchestrator::new(source, || MyExecutor::connect(), config)
//!     .run()
//!     .await?;
//!
//! println!("augmented {} of {}", report.augmented, report.total_records);
//! ```

pub mod batch;
pub mod executor;
pub mod orchestrator;
pub mod progress;
pub mod record;
pub mod source;
pub mod worker;

/// Prelude for common imports
pub mod prelude {
    pub use crate::batch::{Batch, FailedRecord, FailureKind};
    pub use crate::executor::{BatchExecutor, TaskError};
    pub use crate::orchestrator::{Orchestrator, RunConfig, RunError, RunReport};
    pub use crate::progress::Progress;
    pub use crate::record::Record;
    pub use crate::source::{IterSource, RecordSource, SourceError};
    pub use crate::worker::{BatchReport, PoolError, WorkerPool, WorkerPoolConfig};
}

// Re-export key types at crate root
pub use batch::{Batch, FailedRecord, FailureKind};
pub use executor::{BatchExecutor, TaskError};
pub use orchestrator::{IrreparablePredicate, Orchestrator, RunConfig, RunError, RunReport};
pub use progress::Progress;
pub use record::Record;
pub use source::{IterSource, RecordSource, SourceError};
pub use worker::{BatchReport, PoolError, WorkerPool, WorkerPoolConfig};
