//! Hierarchy-free progress tracking
//!
//! A [`Progress`] handle is shared between the orchestrator (which sizes it
//! and completes it) and the workers (which increment it per augmented
//! record). Purely observational: no pipeline logic depends on it.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

/// Callback invoked after every increment and on completion
pub type ProgressListener = Arc<dyn Fn(&Progress) + Send + Sync>;

#[derive(Default)]
struct ProgressInner {
    done: AtomicU64,
    total: AtomicU64,
    completed: AtomicBool,
    listeners: RwLock<Vec<ProgressListener>>,
}

/// Shared progress tracker.
///
/// Cloning is cheap and all clones observe the same state.
#[derive(Clone, Default)]
pub struct Progress {
    inner: Arc<ProgressInner>,
}

impl Progress {
    /// Create a tracker with no known total
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a tracker with a known amount of total work
    pub fn with_total(total: u64) -> Self {
        let progress = Self::new();
        progress.set_total(total);
        progress
    }

    /// Set (or correct) the total amount of work
    pub fn set_total(&self, total: u64) {
        self.inner.total.store(total, Ordering::Relaxed);
    }

    /// Record `n` units of completed work and notify listeners
    pub fn increment(&self, n: u64) {
        self.inner.done.fetch_add(n, Ordering::Relaxed);
        self.notify();
    }

    /// Units of work completed so far
    pub fn done(&self) -> u64 {
        self.inner.done.load(Ordering::Relaxed)
    }

    /// Total units of work, 0 when unknown
    pub fn total(&self) -> u64 {
        self.inner.total.load(Ordering::Relaxed)
    }

    /// Completion percentage, 0.0 when the total is unknown
    pub fn percentage(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        (self.done() as f64 / total as f64) * 100.0
    }

    /// Mark the work as finished and notify listeners one last time
    pub fn complete(&self) {
        self.inner.completed.store(true, Ordering::Relaxed);
        self.notify();
    }

    /// Whether `complete` has been called
    pub fn is_complete(&self) -> bool {
        self.inner.completed.load(Ordering::Relaxed)
    }

    /// Register a listener invoked on every increment and on completion
    pub fn add_listener<F>(&self, listener: F)
    where
        F: Fn(&Progress) + Send + Sync + 'static,
    {
        self.inner.listeners.write().push(Arc::new(listener));
    }

    fn notify(&self) {
        let listeners = self.inner.listeners.read();
        for listener in listeners.iter() {
            listener(self);
        }
    }
}
