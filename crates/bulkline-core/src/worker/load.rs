//! Load accounting for the worker pool
//!
//! Tracks how many workers exist and how many are busy. Uses atomic
//! operations for thread-safe access without locks.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Shared load state for a worker pool.
///
/// Invariant: `busy() <= spawned() <= max_workers()` at every observable
/// instant. A worker counts as busy from the moment it takes a batch off
/// the queue until after it has reported the batch's results.
pub struct LoadState {
    max_workers: usize,
    spawned: AtomicUsize,
    busy: AtomicUsize,
    draining: AtomicBool,
}

impl LoadState {
    /// Create load state for a pool capped at `max_workers`
    pub fn new(max_workers: usize) -> Self {
        Self {
            max_workers: max_workers.max(1),
            spawned: AtomicUsize::new(0),
            busy: AtomicUsize::new(0),
            draining: AtomicBool::new(false),
        }
    }

    /// Configured maximum number of workers
    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Workers created so far (pool size only grows, up to the cap)
    pub fn spawned(&self) -> usize {
        self.spawned.load(Ordering::Relaxed)
    }

    /// Workers currently running a batch
    pub fn busy(&self) -> usize {
        self.busy.load(Ordering::Relaxed)
    }

    /// Workers waiting for a batch
    pub fn idle(&self) -> usize {
        self.spawned().saturating_sub(self.busy())
    }

    /// Capacity left before the pool saturates
    pub fn available_slots(&self) -> usize {
        self.max_workers.saturating_sub(self.busy())
    }

    /// Whether the pool has stopped accepting new work
    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Relaxed)
    }

    pub(crate) fn begin_draining(&self) {
        self.draining.store(true, Ordering::Relaxed);
    }

    pub(crate) fn worker_spawned(&self) {
        self.spawned.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn batch_started(&self) {
        self.busy.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn batch_finished(&self) {
        self.busy.fetch_sub(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        let load = LoadState::new(8);
        assert_eq!(load.max_workers(), 8);
        assert_eq!(load.spawned(), 0);
        assert_eq!(load.busy(), 0);
        assert_eq!(load.idle(), 0);
        assert_eq!(load.available_slots(), 8);
        assert!(!load.is_draining());
    }

    #[test]
    fn test_zero_cap_is_clamped_to_one() {
        let load = LoadState::new(0);
        assert_eq!(load.max_workers(), 1);
    }

    #[test]
    fn test_busy_accounting() {
        let load = LoadState::new(4);
        load.worker_spawned();
        load.worker_spawned();

        load.batch_started();
        assert_eq!(load.busy(), 1);
        assert_eq!(load.idle(), 1);
        assert_eq!(load.available_slots(), 3);

        load.batch_finished();
        assert_eq!(load.busy(), 0);
        assert_eq!(load.idle(), 2);
    }

    #[test]
    fn test_draining_flag() {
        let load = LoadState::new(2);
        load.begin_draining();
        assert!(load.is_draining());
    }
}
