//! Periodic background loops with channel-signalled shutdown
//!
//! Each monitor owns one [`BackgroundTask`]. The shutdown receiver's
//! `recv_timeout` doubles as the tick sleep, so `stop` wakes the loop
//! immediately instead of waiting out the interval.

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::error::SchedulerError;

/// A named thread running `tick` every `interval` until stopped
pub struct BackgroundTask {
    name: String,
    shutdown_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl BackgroundTask {
    /// Spawn the loop. `tick` runs once immediately, then every `interval`.
    pub fn spawn<F>(name: &str, interval: Duration, mut tick: F) -> Result<Self, SchedulerError>
    where
        F: FnMut() + Send + 'static,
    {
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
        let thread_name = name.to_string();

        let handle = thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                tracing::debug!("{} loop started", thread_name);
                loop {
                    tick();
                    match shutdown_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => continue,
                        // Explicit signal or sender dropped
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                tracing::debug!("{} loop stopped", thread_name);
            })
            .map_err(|e| SchedulerError::Spawn(e.to_string()))?;

        Ok(Self {
            name: name.to_string(),
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    /// Signal the loop and wait for it to exit
    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.try_send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("{} thread panicked", self.name);
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }
}

impl Drop for BackgroundTask {
    fn drop(&mut self) {
        self.stop();
    }
}
