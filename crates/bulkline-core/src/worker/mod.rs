//! Bounded worker pool for batch execution
//!
//! This module provides:
//! - [`WorkerPool`] - Lazily grown pool of long-lived workers on one shared queue
//! - [`WorkerPoolConfig`] - Capacity, retry delay, and per-run rerun knobs
//! - [`BatchReport`] - Aggregated per-batch result handed to the success callback
//! - [`LoadState`] - Lock-free busy/spawned/draining accounting
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       WorkerPool                             │
//! │                                                              │
//! │  submit(batch) ──► Semaphore permit (blocks at capacity)     │
//! │         │                                                    │
//! │         ▼                                                    │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │                 shared batch queue                   │    │
//! │  └──────┬───────────────┬──────────────────┬───────────┘    │
//! │         ▼               ▼                  ▼                 │
//! │   [Worker 0]       [Worker 1]    ...  [Worker N-1]           │
//! │   BatchRunner      BatchRunner        BatchRunner            │
//! │   (setup once, per-record loop, flush, teardown once)        │
//! │         │                                                    │
//! │         ▼                                                    │
//! │   success callback (BatchReport) / failure callback          │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! A batch's admission permit is released only after its callbacks have
//! run, which is what makes the orchestrator's "rework queue empty, then
//! nothing in flight" termination check sound.

mod load;
mod pool;
mod runner;

pub use load::LoadState;
pub use pool::{PoolError, WorkerPool, WorkerPoolConfig};
pub use runner::{BatchReport, FailureCallback, RunnerConfig, SuccessCallback};
