//! Cooperative cancellation of a running model

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

type StopTask = Arc<dyn Fn() + Send + Sync>;

/// Stop token for one run
///
/// Runners register callbacks that interrupt their work. `stop` runs every
/// callback synchronously on the calling thread, in registration order.
/// A runner that registers nothing cannot be interrupted. Clones share the
/// same callbacks.
#[derive(Clone, Default)]
pub struct StopRun {
    tasks: Arc<Mutex<Vec<StopTask>>>,
    stopped: Arc<AtomicBool>,
}

impl StopRun {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a callback to run when the run is stopped
    pub fn register_stop_task<F>(&self, task: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(task));
    }

    /// Runs every registered callback
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        // snapshot so callbacks may register or reset without deadlocking
        let tasks: Vec<StopTask> = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for task in tasks {
            task();
        }
    }

    /// Whether `stop` has been called since the last reset
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Clears all callbacks so the token can be reused for another run
    pub fn reset(&self) {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.stopped.store(false, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for StopRun {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        f.debug_struct("StopRun")
            .field("tasks", &count)
            .field("stopped", &self.is_stopped())
            .finish()
    }
}
