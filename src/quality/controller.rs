//! Periodic quality control loop

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::manager::QualityDegradationManager;
use crate::background::BackgroundTask;
use crate::error::SchedulerError;
use crate::network::{NetworkMetrics, NetworkMonitor, NetworkQuality};

#[derive(Debug, Clone, Copy)]
struct Thresholds {
    cpu: f32,
    memory: f32,
    latency_ms: f32,
}

#[derive(Debug, Clone, Copy, Default)]
struct ResourceReading {
    cpu: f32,
    memory: f32,
    latency_ms: f32,
}

struct ControllerShared {
    manager: Arc<QualityDegradationManager>,
    monitor: Option<Arc<NetworkMonitor>>,
    thresholds: Mutex<Thresholds>,
    resources: Mutex<ResourceReading>,
    network_based_control: AtomicBool,
    resource_based_control: AtomicBool,
    total_control_cycles: AtomicU64,
    network_adjustments: AtomicU64,
    resource_adjustments: AtomicU64,
}

impl ControllerShared {
    fn network_needs_adjustment(quality: NetworkQuality, metrics: &NetworkMetrics) -> bool {
        quality.is_degraded() || metrics.latency_ms > 200.0 || metrics.packet_loss_rate > 2.0
    }

    fn control(&self) -> bool {
        let mut adjusted = false;

        if self.network_based_control.load(Ordering::Relaxed) {
            if let Some(monitor) = &self.monitor {
                let quality = monitor.get_network_quality();
                let metrics = monitor.get_current_metrics();
                if Self::network_needs_adjustment(quality, &metrics)
                    && self.manager.apply_network_based_degradation(quality, &metrics)
                {
                    self.network_adjustments.fetch_add(1, Ordering::Relaxed);
                    adjusted = true;
                }
            }
        }

        if !adjusted && self.resource_based_control.load(Ordering::Relaxed) {
            let reading = *self.resources.lock();
            let thresholds = *self.thresholds.lock();
            let over = reading.cpu > thresholds.cpu
                || reading.memory > thresholds.memory
                || reading.latency_ms > thresholds.latency_ms;

            if over
                && self.manager.apply_resource_based_degradation(
                    reading.cpu,
                    reading.memory,
                    reading.latency_ms,
                )
            {
                self.resource_adjustments.fetch_add(1, Ordering::Relaxed);
                adjusted = true;
            }
        }

        if adjusted {
            tracing::debug!("Adaptive quality control made an adjustment");
        }
        adjusted
    }
}

/// Drives a [`QualityDegradationManager`] from network and resource readings
pub struct AdaptiveQualityController {
    shared: Arc<ControllerShared>,
    task: Mutex<Option<BackgroundTask>>,
    update_interval_ms: Mutex<u64>,
}

impl AdaptiveQualityController {
    pub fn new(
        manager: Arc<QualityDegradationManager>,
        monitor: Option<Arc<NetworkMonitor>>,
    ) -> Self {
        Self {
            shared: Arc::new(ControllerShared {
                manager,
                monitor,
                thresholds: Mutex::new(Thresholds {
                    cpu: 0.8,
                    memory: 0.8,
                    latency_ms: 200.0,
                }),
                resources: Mutex::new(ResourceReading::default()),
                network_based_control: AtomicBool::new(true),
                resource_based_control: AtomicBool::new(true),
                total_control_cycles: AtomicU64::new(0),
                network_adjustments: AtomicU64::new(0),
                resource_adjustments: AtomicU64::new(0),
            }),
            task: Mutex::new(None),
            update_interval_ms: Mutex::new(2000),
        }
    }

    /// Start the control loop. A no-op if it is already running.
    pub fn start_auto_control(&self, update_interval_ms: u64) -> Result<(), SchedulerError> {
        let mut task = self.task.lock();
        if task.is_some() {
            tracing::warn!("Adaptive quality control already active");
            return Ok(());
        }

        *self.update_interval_ms.lock() = update_interval_ms;
        let shared = self.shared.clone();
        *task = Some(BackgroundTask::spawn(
            "quality-controller",
            Duration::from_millis(update_interval_ms),
            move || {
                shared.control();
                shared.total_control_cycles.fetch_add(1, Ordering::Relaxed);
            },
        )?);

        tracing::info!(
            "Adaptive quality control started with {}ms interval",
            update_interval_ms
        );
        Ok(())
    }

    pub fn stop_auto_control(&self) {
        if let Some(mut task) = self.task.lock().take() {
            task.stop();
            tracing::info!("Adaptive quality control stopped");
        }
    }

    pub fn is_active(&self) -> bool {
        self.task.lock().is_some()
    }

    /// Run a single control cycle. Returns whether anything changed.
    pub fn perform_quality_control(&self) -> bool {
        self.shared.control()
    }

    pub fn update_system_resources(&self, cpu_usage: f32, memory_usage: f32, processing_latency_ms: f32) {
        *self.shared.resources.lock() = ResourceReading {
            cpu: cpu_usage,
            memory: memory_usage,
            latency_ms: processing_latency_ms,
        };
    }

    pub fn set_control_thresholds(&self, cpu_threshold: f32, memory_threshold: f32, latency_threshold_ms: f32) {
        *self.shared.thresholds.lock() = Thresholds {
            cpu: cpu_threshold,
            memory: memory_threshold,
            latency_ms: latency_threshold_ms,
        };
        tracing::info!(
            "Quality control thresholds updated: CPU={}, Memory={}, Latency={}ms",
            cpu_threshold,
            memory_threshold,
            latency_threshold_ms
        );
    }

    pub fn set_network_based_control(&self, enabled: bool) {
        self.shared
            .network_based_control
            .store(enabled, Ordering::Relaxed);
    }

    pub fn set_resource_based_control(&self, enabled: bool) {
        self.shared
            .resource_based_control
            .store(enabled, Ordering::Relaxed);
    }

    pub fn get_control_stats(&self) -> BTreeMap<String, f64> {
        let shared = &self.shared;
        let reading = *shared.resources.lock();
        let thresholds = *shared.thresholds.lock();
        let flag = |b: bool| if b { 1.0 } else { 0.0 };

        let mut stats = BTreeMap::new();
        stats.insert(
            "total_control_cycles".to_string(),
            shared.total_control_cycles.load(Ordering::Relaxed) as f64,
        );
        stats.insert(
            "network_adjustments".to_string(),
            shared.network_adjustments.load(Ordering::Relaxed) as f64,
        );
        stats.insert(
            "resource_adjustments".to_string(),
            shared.resource_adjustments.load(Ordering::Relaxed) as f64,
        );
        stats.insert("current_cpu_usage".to_string(), reading.cpu as f64);
        stats.insert("current_memory_usage".to_string(), reading.memory as f64);
        stats.insert(
            "current_processing_latency".to_string(),
            reading.latency_ms as f64,
        );
        stats.insert("cpu_threshold".to_string(), thresholds.cpu as f64);
        stats.insert("memory_threshold".to_string(), thresholds.memory as f64);
        stats.insert("latency_threshold".to_string(), thresholds.latency_ms as f64);
        stats.insert(
            "network_based_control".to_string(),
            flag(shared.network_based_control.load(Ordering::Relaxed)),
        );
        stats.insert(
            "resource_based_control".to_string(),
            flag(shared.resource_based_control.load(Ordering::Relaxed)),
        );
        stats.insert("control_active".to_string(), flag(self.is_active()));
        stats.insert(
            "update_interval_ms".to_string(),
            *self.update_interval_ms.lock() as f64,
        );
        stats
    }
}

impl Drop for AdaptiveQualityController {
    fn drop(&mut self) {
        self.stop_auto_control();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::ManualNetworkProbe;
    use crate::quality::AudioQualityLevel;
    use std::thread;

    fn controller_with_monitor() -> (Arc<NetworkMonitor>, Arc<QualityDegradationManager>, AdaptiveQualityController) {
        let monitor = Arc::new(NetworkMonitor::new(
            1000,
            60,
            Box::new(ManualNetworkProbe::new(10.0)),
        ));
        let manager = Arc::new(QualityDegradationManager::new());
        let controller = AdaptiveQualityController::new(manager.clone(), Some(monitor.clone()));
        (monitor, manager, controller)
    }

    #[test]
    fn test_network_adjustment_first() {
        let (monitor, manager, controller) = controller_with_monitor();
        monitor.update_metrics(NetworkMetrics::new(600.0, 80.0, 10.0));
        controller.update_system_resources(0.95, 0.9, 300.0);

        assert!(controller.perform_quality_control());
        let stats = controller.get_control_stats();
        assert_eq!(stats["network_adjustments"], 1.0);
        assert_eq!(stats["resource_adjustments"], 0.0);
        assert_eq!(
            manager.get_current_quality_params().level,
            AudioQualityLevel::UltraLow
        );
    }

    #[test]
    fn test_resource_adjustment_when_network_is_fine() {
        let (_monitor, manager, controller) = controller_with_monitor();
        controller.update_system_resources(0.95, 0.5, 100.0);

        assert!(controller.perform_quality_control());
        assert_eq!(controller.get_control_stats()["resource_adjustments"], 1.0);
        assert_eq!(manager.get_current_quality_params().sample_rate, 8000);
    }

    #[test]
    fn test_below_thresholds_does_nothing() {
        let (_monitor, _manager, controller) = controller_with_monitor();
        controller.update_system_resources(0.5, 0.5, 100.0);
        assert!(!controller.perform_quality_control());

        controller.set_resource_based_control(false);
        controller.update_system_resources(0.95, 0.95, 900.0);
        assert!(!controller.perform_quality_control());
    }

    #[test]
    fn test_without_monitor() {
        let manager = Arc::new(QualityDegradationManager::new());
        let controller = AdaptiveQualityController::new(manager, None);
        controller.set_control_thresholds(0.5, 0.5, 100.0);
        controller.update_system_resources(0.7, 0.1, 10.0);
        assert!(controller.perform_quality_control());
        assert_eq!(controller.get_control_stats()["cpu_threshold"], 0.5);
    }

    #[test]
    fn test_auto_control_loop() {
        let (_monitor, _manager, controller) = controller_with_monitor();
        controller.start_auto_control(5).unwrap();
        controller.start_auto_control(5).unwrap();
        thread::sleep(Duration::from_millis(40));
        assert!(controller.is_active());

        controller.stop_auto_control();
        let stats = controller.get_control_stats();
        assert!(stats["total_control_cycles"] >= 1.0);
        assert_eq!(stats["control_active"], 0.0);
        assert_eq!(stats["update_interval_ms"], 5.0);
    }
}
