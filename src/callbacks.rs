//! Observer registration shared by the monitors and managers
//!
//! Callbacks are snapshotted under the lock and invoked after it is
//! released, so a callback may freely call back into the component that
//! notified it. A panicking callback is logged and does not prevent the
//! remaining callbacks from running.

use parking_lot::Mutex;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// Shared callback handle
pub type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Thread-safe list of callbacks taking `&T`
pub struct CallbackList<T> {
    name: &'static str,
    callbacks: Mutex<Vec<Callback<T>>>,
}

impl<T> CallbackList<T> {
    /// Create an empty list. `name` only shows up in logs.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            callbacks: Mutex::new(Vec::new()),
        }
    }

    /// Register a callback
    pub fn register<F>(&self, callback: F)
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.callbacks.lock().push(Arc::new(callback));
    }

    /// Number of registered callbacks
    pub fn len(&self) -> usize {
        self.callbacks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Invoke every callback with `value`. Returns how many panicked.
    pub fn notify(&self, value: &T) -> usize {
        let snapshot: Vec<Callback<T>> = self.callbacks.lock().clone();

        let mut failures = 0;
        for callback in snapshot {
            let result = panic::catch_unwind(AssertUnwindSafe(|| callback(value)));
            if result.is_err() {
                failures += 1;
                tracing::error!("{} callback panicked", self.name);
            }
        }
        failures
    }
}
