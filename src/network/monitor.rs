//! Periodic network condition monitoring
//!
//! A background loop asks a [`NetworkProbe`] for latency, derives jitter from
//! the recent history and classifies the result into a [`NetworkQuality`]
//! tier. Subscribers are notified only when the tier changes.

use parking_lot::Mutex;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::collections::{BTreeMap, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::metrics::{NetworkMetrics, NetworkQuality};
use crate::background::BackgroundTask;
use crate::callbacks::CallbackList;
use crate::config::NetworkConfig;
use crate::error::{NetworkError, SchedulerError};

/// Latency reported when the probe fails
const PROBE_FAILURE_LATENCY_MS: f32 = 1000.0;

/// Source of round-trip latency estimates
pub trait NetworkProbe: Send {
    fn measure_latency_ms(&mut self) -> Result<f32, NetworkError>;
}

/// Times a UDP `connect` to a fixed endpoint
///
/// A UDP connect sends nothing, so this only measures local routing and
/// socket setup. It is a cheap liveness signal, not a real RTT.
pub struct UdpConnectProbe {
    endpoint: SocketAddr,
}

impl UdpConnectProbe {
    pub fn new(endpoint: SocketAddr) -> Self {
        Self { endpoint }
    }

    pub fn from_config(config: &NetworkConfig) -> Result<Self, NetworkError> {
        let endpoint = config
            .probe_endpoint
            .parse()
            .map_err(|e| NetworkError::ProbeFailed(format!("{}: {}", config.probe_endpoint, e)))?;
        Ok(Self::new(endpoint))
    }
}

impl Default for UdpConnectProbe {
    fn default() -> Self {
        Self::new(SocketAddr::from(([127, 0, 0, 1], 12345)))
    }
}

impl NetworkProbe for UdpConnectProbe {
    fn measure_latency_ms(&mut self) -> Result<f32, NetworkError> {
        let start = Instant::now();
        let socket = Socket::new(Domain::for_address(self.endpoint), Type::DGRAM, Some(Protocol::UDP))?;
        socket.connect(&SockAddr::from(self.endpoint))?;
        Ok(start.elapsed().as_secs_f32() * 1000.0)
    }
}

/// Probe returning a scripted latency. Clones share the same value.
#[derive(Clone, Default)]
pub struct ManualNetworkProbe {
    latency_ms: Arc<Mutex<f32>>,
}

impl ManualNetworkProbe {
    pub fn new(latency_ms: f32) -> Self {
        Self {
            latency_ms: Arc::new(Mutex::new(latency_ms)),
        }
    }

    pub fn set(&self, latency_ms: f32) {
        *self.latency_ms.lock() = latency_ms;
    }
}

impl NetworkProbe for ManualNetworkProbe {
    fn measure_latency_ms(&mut self) -> Result<f32, NetworkError> {
        Ok(*self.latency_ms.lock())
    }
}

/// Payload delivered to condition callbacks
#[derive(Debug, Clone)]
pub struct NetworkConditionChange {
    pub metrics: NetworkMetrics,
    pub quality: NetworkQuality,
    pub previous: NetworkQuality,
}

struct MonitorState {
    current: NetworkMetrics,
    quality: NetworkQuality,
    history: VecDeque<NetworkMetrics>,
}

struct MonitorShared {
    state: Mutex<MonitorState>,
    probe: Mutex<Box<dyn NetworkProbe>>,
    history_size: usize,
    callbacks: CallbackList<NetworkConditionChange>,
    total_measurements: AtomicU64,
    quality_changes: AtomicU64,
}

/// Mean absolute difference between consecutive latencies
fn jitter(latencies: &[f32]) -> f32 {
    if latencies.len() < 2 {
        return 0.0;
    }
    let total: f32 = latencies.windows(2).map(|w| (w[1] - w[0]).abs()).sum();
    total / (latencies.len() - 1) as f32
}

impl MonitorShared {
    fn measure(&self) -> NetworkMetrics {
        let latency_ms = match self.probe.lock().measure_latency_ms() {
            Ok(latency) => latency,
            Err(e) => {
                tracing::warn!("Network probe failed: {}", e);
                PROBE_FAILURE_LATENCY_MS
            }
        };

        let jitter_ms = {
            let state = self.state.lock();
            let latencies: Vec<f32> = state
                .history
                .iter()
                .map(|m| m.latency_ms)
                .chain(std::iter::once(latency_ms))
                .collect();
            jitter(&latencies)
        };

        let bandwidth_kbps = 1000.0;
        NetworkMetrics {
            latency_ms,
            jitter_ms,
            // Loss is pushed in from transport feedback via `update_metrics`
            packet_loss_rate: 0.0,
            bandwidth_kbps,
            throughput_kbps: bandwidth_kbps * 0.8,
            timestamp: Instant::now(),
        }
    }

    fn update(&self, metrics: NetworkMetrics) {
        let quality = NetworkQuality::from_metrics(&metrics);

        let change = {
            let mut state = self.state.lock();
            state.current = metrics.clone();
            state.history.push_back(metrics.clone());
            while state.history.len() > self.history_size {
                state.history.pop_front();
            }

            let previous = state.quality;
            state.quality = quality;
            (previous != quality).then_some(NetworkConditionChange {
                metrics,
                quality,
                previous,
            })
        };

        self.total_measurements.fetch_add(1, Ordering::Relaxed);

        if let Some(change) = change {
            self.quality_changes.fetch_add(1, Ordering::Relaxed);
            tracing::info!(
                "Network quality changed: {:?} -> {:?} (latency {:.1}ms, jitter {:.1}ms, loss {:.2}%)",
                change.previous,
                change.quality,
                change.metrics.latency_ms,
                change.metrics.jitter_ms,
                change.metrics.packet_loss_rate
            );
            self.callbacks.notify(&change);
        }
    }
}

/// Tracks latency, jitter and loss over time
pub struct NetworkMonitor {
    shared: Arc<MonitorShared>,
    task: Mutex<Option<BackgroundTask>>,
    interval: Duration,
}

impl NetworkMonitor {
    pub fn new(monitoring_interval_ms: u64, history_size: usize, probe: Box<dyn NetworkProbe>) -> Self {
        Self {
            shared: Arc::new(MonitorShared {
                state: Mutex::new(MonitorState {
                    current: NetworkMetrics::default(),
                    quality: NetworkQuality::Good,
                    history: VecDeque::with_capacity(history_size),
                }),
                probe: Mutex::new(probe),
                history_size: history_size.max(1),
                callbacks: CallbackList::new("network condition"),
                total_measurements: AtomicU64::new(0),
                quality_changes: AtomicU64::new(0),
            }),
            task: Mutex::new(None),
            interval: Duration::from_millis(monitoring_interval_ms),
        }
    }

    /// Monitor probing the configured UDP endpoint
    pub fn from_config(config: &NetworkConfig) -> Result<Self, NetworkError> {
        let probe = UdpConnectProbe::from_config(config)?;
        Ok(Self::new(
            config.monitoring_interval_ms,
            config.history_size,
            Box::new(probe),
        ))
    }

    pub fn start_monitoring(&self) -> Result<(), SchedulerError> {
        let mut task = self.task.lock();
        if task.is_some() {
            return Ok(());
        }

        let shared = self.shared.clone();
        *task = Some(BackgroundTask::spawn(
            "network-monitor",
            self.interval,
            move || {
                let metrics = shared.measure();
                shared.update(metrics);
            },
        )?);
        tracing::info!("Network monitoring started ({:?} interval)", self.interval);
        Ok(())
    }

    pub fn stop_monitoring(&self) {
        let task = self.task.lock().take();
        if let Some(mut task) = task {
            task.stop();
            tracing::info!("Network monitoring stopped");
        }
    }

    pub fn is_monitoring(&self) -> bool {
        self.task.lock().is_some()
    }

    /// Probe once and return the metrics without recording them
    pub fn measure_network_conditions(&self) -> NetworkMetrics {
        self.shared.measure()
    }

    /// Record a measurement. Transports with real loss figures call this directly.
    pub fn update_metrics(&self, metrics: NetworkMetrics) {
        self.shared.update(metrics);
    }

    pub fn classify(&self, metrics: &NetworkMetrics) -> NetworkQuality {
        NetworkQuality::from_metrics(metrics)
    }

    pub fn get_current_metrics(&self) -> NetworkMetrics {
        self.shared.state.lock().current.clone()
    }

    pub fn get_network_quality(&self) -> NetworkQuality {
        self.shared.state.lock().quality
    }

    /// Average of the measurements taken in the last `duration_ms`
    pub fn get_average_metrics(&self, duration_ms: u64) -> NetworkMetrics {
        let state = self.shared.state.lock();
        if state.history.is_empty() {
            return NetworkMetrics::default();
        }

        let now = Instant::now();
        let window = Duration::from_millis(duration_ms);
        let recent: Vec<&NetworkMetrics> = state
            .history
            .iter()
            .filter(|m| now.saturating_duration_since(m.timestamp) <= window)
            .collect();
        if recent.is_empty() {
            return state.current.clone();
        }

        let n = recent.len() as f32;
        let mean = |f: fn(&NetworkMetrics) -> f32| recent.iter().map(|m| f(m)).sum::<f32>() / n;
        NetworkMetrics {
            latency_ms: mean(|m| m.latency_ms),
            jitter_ms: mean(|m| m.jitter_ms),
            packet_loss_rate: mean(|m| m.packet_loss_rate),
            bandwidth_kbps: mean(|m| m.bandwidth_kbps),
            throughput_kbps: mean(|m| m.throughput_kbps),
            timestamp: now,
        }
    }

    /// Latency coefficient of variation is at most `threshold`
    pub fn is_network_stable(&self, threshold: f32) -> bool {
        let state = self.shared.state.lock();
        if state.history.len() < 5 {
            return false;
        }

        let n = state.history.len() as f32;
        let mean = state.history.iter().map(|m| m.latency_ms).sum::<f32>() / n;
        let variance = state
            .history
            .iter()
            .map(|m| (m.latency_ms - mean).powi(2))
            .sum::<f32>()
            / n;
        let cv = if mean > 0.0 { variance.sqrt() / mean } else { 1.0 };
        cv <= threshold
    }

    pub fn history_len(&self) -> usize {
        self.shared.state.lock().history.len()
    }

    /// Called with the new metrics and tier whenever the tier changes
    pub fn register_condition_callback<F>(&self, callback: F)
    where
        F: Fn(&NetworkConditionChange) + Send + Sync + 'static,
    {
        self.shared.callbacks.register(callback);
    }

    pub fn get_monitoring_stats(&self) -> BTreeMap<String, f64> {
        let (current, quality, history_len) = {
            let state = self.shared.state.lock();
            (state.current.clone(), state.quality, state.history.len())
        };

        let mut stats = BTreeMap::new();
        stats.insert(
            "total_measurements".to_string(),
            self.shared.total_measurements.load(Ordering::Relaxed) as f64,
        );
        stats.insert(
            "quality_changes".to_string(),
            self.shared.quality_changes.load(Ordering::Relaxed) as f64,
        );
        stats.insert("current_latency_ms".to_string(), current.latency_ms as f64);
        stats.insert("current_jitter_ms".to_string(), current.jitter_ms as f64);
        stats.insert(
            "current_packet_loss_rate".to_string(),
            current.packet_loss_rate as f64,
        );
        stats.insert(
            "current_bandwidth_kbps".to_string(),
            current.bandwidth_kbps as f64,
        );
        stats.insert("current_quality".to_string(), quality.as_index() as f64);
        stats.insert("history_size".to_string(), history_len as f64);
        stats.insert(
            "is_stable".to_string(),
            if self.is_network_stable(0.2) { 1.0 } else { 0.0 },
        );
        stats
    }
}

impl Drop for NetworkMonitor {
    fn drop(&mut self) {
        self.stop_monitoring();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    fn monitor() -> NetworkMonitor {
        NetworkMonitor::new(1000, 60, Box::new(ManualNetworkProbe::new(10.0)))
    }

    #[test]
    fn test_jitter() {
        assert_eq!(jitter(&[]), 0.0);
        assert_eq!(jitter(&[10.0]), 0.0);
        assert_eq!(jitter(&[10.0, 20.0, 10.0]), 10.0);
    }

    #[test]
    fn test_initial_tier_is_good() {
        assert_eq!(monitor().get_network_quality(), NetworkQuality::Good);
    }

    #[test]
    fn test_callbacks_only_on_tier_change() {
        let monitor = monitor();
        let changes = Arc::new(AtomicUsize::new(0));
        let c = changes.clone();
        monitor.register_condition_callback(move |change| {
            assert_ne!(change.previous, change.quality);
            c.fetch_add(1, Ordering::Relaxed);
        });

        monitor.update_metrics(NetworkMetrics::new(80.0, 5.0, 0.0)); // Good
        assert_eq!(changes.load(Ordering::Relaxed), 0);

        monitor.update_metrics(NetworkMetrics::new(300.0, 30.0, 3.0)); // Poor
        monitor.update_metrics(NetworkMetrics::new(310.0, 30.0, 3.0)); // Poor
        assert_eq!(changes.load(Ordering::Relaxed), 1);
        assert_eq!(monitor.get_network_quality(), NetworkQuality::Poor);

        let stats = monitor.get_monitoring_stats();
        assert_eq!(stats["total_measurements"], 3.0);
        assert_eq!(stats["quality_changes"], 1.0);
        assert_eq!(stats["current_quality"], 3.0);
    }

    #[test]
    fn test_history_is_bounded() {
        let monitor = NetworkMonitor::new(1000, 3, Box::new(ManualNetworkProbe::new(10.0)));
        for _ in 0..10 {
            monitor.update_metrics(NetworkMetrics::new(10.0, 1.0, 0.0));
        }
        assert_eq!(monitor.history_len(), 3);
    }

    #[test]
    fn test_stability() {
        let monitor = monitor();
        for _ in 0..4 {
            monitor.update_metrics(NetworkMetrics::new(40.0, 1.0, 0.0));
        }
        assert!(!monitor.is_network_stable(0.2));

        monitor.update_metrics(NetworkMetrics::new(40.0, 1.0, 0.0));
        assert!(monitor.is_network_stable(0.2));

        for latency in [5.0, 200.0, 5.0, 200.0] {
            monitor.update_metrics(NetworkMetrics::new(latency, 1.0, 0.0));
        }
        assert!(!monitor.is_network_stable(0.2));
    }

    #[test]
    fn test_average_metrics() {
        let monitor = monitor();
        assert_eq!(monitor.get_average_metrics(5000).latency_ms, 0.0);

        monitor.update_metrics(NetworkMetrics::new(10.0, 2.0, 0.0));
        monitor.update_metrics(NetworkMetrics::new(30.0, 4.0, 1.0));
        let avg = monitor.get_average_metrics(5000);
        assert_eq!(avg.latency_ms, 20.0);
        assert_eq!(avg.jitter_ms, 3.0);
        assert_eq!(avg.packet_loss_rate, 0.5);
    }

    #[test]
    fn test_measure_uses_history_for_jitter() {
        let probe = ManualNetworkProbe::new(30.0);
        let monitor = NetworkMonitor::new(1000, 60, Box::new(probe));
        monitor.update_metrics(NetworkMetrics::new(10.0, 0.0, 0.0));

        let measured = monitor.measure_network_conditions();
        assert_eq!(measured.latency_ms, 30.0);
        assert_eq!(measured.jitter_ms, 20.0);
        assert_eq!(measured.bandwidth_kbps, 1000.0);
        assert_eq!(measured.throughput_kbps, 800.0);
    }

    #[test]
    fn test_background_loop_records() {
        let monitor = NetworkMonitor::new(5, 60, Box::new(ManualNetworkProbe::new(10.0)));
        monitor.start_monitoring().unwrap();
        thread::sleep(Duration::from_millis(40));
        monitor.stop_monitoring();

        assert!(monitor.get_monitoring_stats()["total_measurements"] >= 2.0);
        assert_eq!(monitor.get_network_quality(), NetworkQuality::Excellent);
    }

    #[test]
    fn test_udp_probe_loopback() {
        let mut probe = UdpConnectProbe::default();
        let latency = probe.measure_latency_ms().unwrap();
        assert!(latency >= 0.0);
    }
}
