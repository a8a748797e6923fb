//! System resource sampling
//!
//! [`ResourceMonitor`] polls a [`ResourceProbe`] on a background thread and
//! keeps the latest [`SystemResources`] snapshot. The pipeline writes its own
//! load figures (threads, queue size, latency) into the same snapshot.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use sysinfo::System;

use crate::background::BackgroundTask;
use crate::callbacks::CallbackList;
use crate::constants::RESOURCE_CHANGE_THRESHOLD;
use crate::error::SchedulerError;

/// Usage above which a resource counts as constrained
pub const DEFAULT_CONSTRAINT_THRESHOLD: f32 = 0.8;

/// Snapshot of machine and pipeline load
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SystemResources {
    /// 0.0 - 1.0
    pub cpu_usage: f32,
    /// 0.0 - 1.0
    pub memory_usage: f32,
    /// 0.0 - 1.0
    pub gpu_usage: f32,
    pub active_threads: usize,
    pub queued_jobs: usize,
    pub average_latency_ms: f32,
    pub resource_constrained: bool,
}

/// One CPU/memory/GPU reading
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ResourceSample {
    pub cpu_usage: f32,
    pub memory_usage: f32,
    pub gpu_usage: f32,
}

/// Source of resource readings
pub trait ResourceProbe: Send {
    fn sample(&mut self) -> ResourceSample;
}

/// Reads global CPU and memory usage from the operating system
pub struct SysinfoProbe {
    system: System,
}

impl SysinfoProbe {
    pub fn new() -> Self {
        let mut system = System::new();
        // CPU usage is a delta between refreshes, prime the first one
        system.refresh_cpu_usage();
        Self { system }
    }
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceProbe for SysinfoProbe {
    fn sample(&mut self) -> ResourceSample {
        self.system.refresh_cpu_usage();
        self.system.refresh_memory();

        let cpu_usage = (self.system.global_cpu_usage() / 100.0).clamp(0.0, 1.0);
        let total = self.system.total_memory();
        let memory_usage = if total > 0 {
            (self.system.used_memory() as f64 / total as f64) as f32
        } else {
            0.0
        };

        ResourceSample {
            cpu_usage,
            memory_usage,
            // No portable GPU query
            gpu_usage: 0.0,
        }
    }
}

/// Probe returning whatever was last `set`. Clones share the same reading.
#[derive(Clone, Default)]
pub struct ManualResourceProbe {
    sample: Arc<Mutex<ResourceSample>>,
}

impl ManualResourceProbe {
    pub fn new(cpu_usage: f32, memory_usage: f32) -> Self {
        let probe = Self::default();
        probe.set(cpu_usage, memory_usage);
        probe
    }

    pub fn set(&self, cpu_usage: f32, memory_usage: f32) {
        let mut sample = self.sample.lock();
        sample.cpu_usage = cpu_usage;
        sample.memory_usage = memory_usage;
    }
}

impl ResourceProbe for ManualResourceProbe {
    fn sample(&mut self) -> ResourceSample {
        *self.sample.lock()
    }
}

struct MonitorShared {
    current: Mutex<SystemResources>,
    probe: Mutex<Box<dyn ResourceProbe>>,
    callbacks: CallbackList<SystemResources>,
}

impl MonitorShared {
    fn tick(&self) {
        let sample = self.probe.lock().sample();

        let (snapshot, changed) = {
            let mut current = self.current.lock();
            let changed = (sample.cpu_usage - current.cpu_usage).abs() > RESOURCE_CHANGE_THRESHOLD
                || (sample.memory_usage - current.memory_usage).abs() > RESOURCE_CHANGE_THRESHOLD;

            current.cpu_usage = sample.cpu_usage;
            current.memory_usage = sample.memory_usage;
            current.gpu_usage = sample.gpu_usage;
            current.resource_constrained = sample.cpu_usage > DEFAULT_CONSTRAINT_THRESHOLD
                || sample.memory_usage > DEFAULT_CONSTRAINT_THRESHOLD;
            (current.clone(), changed)
        };

        if changed {
            tracing::debug!(
                "Resources changed: cpu {:.2} mem {:.2}",
                snapshot.cpu_usage,
                snapshot.memory_usage
            );
            self.callbacks.notify(&snapshot);
        }
    }
}

/// Periodically samples system resources
pub struct ResourceMonitor {
    shared: Arc<MonitorShared>,
    task: Mutex<Option<BackgroundTask>>,
    interval: Duration,
}

impl ResourceMonitor {
    pub fn new(update_interval_ms: u64, probe: Box<dyn ResourceProbe>) -> Self {
        Self {
            shared: Arc::new(MonitorShared {
                current: Mutex::new(SystemResources::default()),
                probe: Mutex::new(probe),
                callbacks: CallbackList::new("resource"),
            }),
            task: Mutex::new(None),
            interval: Duration::from_millis(update_interval_ms),
        }
    }

    /// Monitor backed by [`SysinfoProbe`]
    pub fn with_system_probe(update_interval_ms: u64) -> Self {
        Self::new(update_interval_ms, Box::new(SysinfoProbe::new()))
    }

    /// Start the sampling loop. Does nothing if already running.
    pub fn start_monitoring(&self) -> Result<(), SchedulerError> {
        let mut task = self.task.lock();
        if task.is_some() {
            return Ok(());
        }

        let shared = self.shared.clone();
        *task = Some(BackgroundTask::spawn(
            "resource-monitor",
            self.interval,
            move || shared.tick(),
        )?);
        tracing::info!("Resource monitoring started ({:?} interval)", self.interval);
        Ok(())
    }

    pub fn stop_monitoring(&self) {
        let task = self.task.lock().take();
        if let Some(mut task) = task {
            task.stop();
            tracing::info!("Resource monitoring stopped");
        }
    }

    pub fn is_monitoring(&self) -> bool {
        self.task.lock().is_some()
    }

    /// Take one sample on the calling thread
    pub fn sample_now(&self) {
        self.shared.tick();
    }

    pub fn get_current_resources(&self) -> SystemResources {
        self.shared.current.lock().clone()
    }

    pub fn is_resource_constrained(&self, cpu_threshold: f32, memory_threshold: f32) -> bool {
        let current = self.shared.current.lock();
        current.cpu_usage > cpu_threshold || current.memory_usage > memory_threshold
    }

    /// Headroom of the scarcer of CPU and memory, 0.0 - 1.0
    pub fn get_available_capacity(&self) -> f32 {
        let current = self.shared.current.lock();
        (1.0 - current.cpu_usage).min(1.0 - current.memory_usage)
    }

    /// Called after a sample moves CPU or memory by more than 0.1
    pub fn register_resource_callback<F>(&self, callback: F)
    where
        F: Fn(&SystemResources) + Send + Sync + 'static,
    {
        self.shared.callbacks.register(callback);
    }

    pub fn update_active_thread_count(&self, count: usize) {
        self.shared.current.lock().active_threads = count;
    }

    pub fn update_queue_size(&self, size: usize) {
        self.shared.current.lock().queued_jobs = size;
    }

    pub fn update_average_latency(&self, latency_ms: f32) {
        self.shared.current.lock().average_latency_ms = latency_ms;
    }
}

impl Drop for ResourceMonitor {
    fn drop(&mut self) {
        self.stop_monitoring();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn test_sample_now_sets_constraint() {
        let probe = ManualResourceProbe::new(0.9, 0.3);
        let monitor = ResourceMonitor::new(1000, Box::new(probe.clone()));
        monitor.update_queue_size(7);
        monitor.sample_now();

        let resources = monitor.get_current_resources();
        assert!(resources.resource_constrained);
        assert_eq!(resources.queued_jobs, 7);
        assert!(monitor.is_resource_constrained(0.8, 0.8));
        assert!(!monitor.is_resource_constrained(0.95, 0.8));

        probe.set(0.2, 0.4);
        monitor.sample_now();
        assert!(!monitor.get_current_resources().resource_constrained);
        assert!((monitor.get_available_capacity() - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_callbacks_fire_on_large_change_only() {
        let probe = ManualResourceProbe::new(0.5, 0.5);
        let monitor = ResourceMonitor::new(1000, Box::new(probe.clone()));
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        monitor.register_resource_callback(move |_| {
            h.fetch_add(1, Ordering::Relaxed);
        });

        // 0.0 -> 0.5 is a large change
        monitor.sample_now();
        assert_eq!(hits.load(Ordering::Relaxed), 1);

        probe.set(0.55, 0.5);
        monitor.sample_now();
        assert_eq!(hits.load(Ordering::Relaxed), 1);

        probe.set(0.75, 0.5);
        monitor.sample_now();
        assert_eq!(hits.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_background_loop() {
        let probe = ManualResourceProbe::new(0.85, 0.1);
        let monitor = ResourceMonitor::new(5, Box::new(probe));
        monitor.start_monitoring().unwrap();
        assert!(monitor.is_monitoring());

        thread::sleep(Duration::from_millis(30));
        assert!(monitor.get_current_resources().resource_constrained);

        monitor.stop_monitoring();
        assert!(!monitor.is_monitoring());
    }

    #[test]
    fn test_sysinfo_probe_in_range() {
        let mut probe = SysinfoProbe::new();
        let sample = probe.sample();
        assert!((0.0..=1.0).contains(&sample.cpu_usage));
        assert!((0.0..=1.0).contains(&sample.memory_usage));
        assert_eq!(sample.gpu_usage, 0.0);
    }
}
