//! Streaming parameters derived from network conditions

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use super::metrics::{NetworkMetrics, NetworkQuality};
use super::monitor::{NetworkConditionChange, NetworkMonitor};
use crate::constants::{ADAPTATION_HISTORY_SIZE, DEFAULT_HYSTERESIS_THRESHOLD};

/// Buffering, chunking and retry settings for the current network tier
#[derive(Debug, Clone, PartialEq)]
pub struct AdaptiveStreamingParams {
    pub buffer_size_ms: u32,
    pub chunk_size_ms: u32,
    pub max_retries: u32,
    /// 0.0 - 1.0
    pub quality_factor: f32,
    pub enable_compression: bool,
    pub timeout_ms: u32,
}

impl Default for AdaptiveStreamingParams {
    fn default() -> Self {
        Self {
            buffer_size_ms: 100,
            chunk_size_ms: 50,
            max_retries: 3,
            quality_factor: 1.0,
            enable_compression: true,
            timeout_ms: 5000,
        }
    }
}

impl AdaptiveStreamingParams {
    /// Base parameters for a tier
    pub fn for_quality(quality: NetworkQuality) -> Self {
        let (buffer_size_ms, chunk_size_ms, max_retries, quality_factor, enable_compression, timeout_ms) =
            match quality {
                NetworkQuality::Excellent => (50, 25, 2, 1.0, false, 2000),
                NetworkQuality::Good => (100, 50, 3, 0.9, true, 3000),
                NetworkQuality::Fair => (200, 75, 4, 0.7, true, 5000),
                NetworkQuality::Poor => (300, 100, 5, 0.5, true, 8000),
                NetworkQuality::VeryPoor => (500, 150, 8, 0.3, true, 15000),
            };
        Self {
            buffer_size_ms,
            chunk_size_ms,
            max_retries,
            quality_factor,
            enable_compression,
            timeout_ms,
        }
    }

    /// Tier parameters fine-tuned for jitter and loss
    pub fn optimal(metrics: &NetworkMetrics, quality: NetworkQuality) -> Self {
        let mut params = Self::for_quality(quality);
        if metrics.jitter_ms > 50.0 {
            params.buffer_size_ms = (params.buffer_size_ms as f32 * 1.5).round() as u32;
        }
        if metrics.packet_loss_rate > 2.0 {
            params.max_retries = (params.max_retries + 2).min(10);
            params.chunk_size_ms = (params.chunk_size_ms as f32 * 1.3).round() as u32;
        }
        params
    }

    /// Whether `candidate` differs enough from `self` to be worth adopting
    pub fn differs_significantly(&self, candidate: &Self, threshold: f32) -> bool {
        fn relative(old: u32, new: u32) -> f32 {
            if old == 0 {
                return if new == 0 { 0.0 } else { f32::INFINITY };
            }
            (new as f32 - old as f32).abs() / old as f32
        }

        relative(self.buffer_size_ms, candidate.buffer_size_ms) > threshold
            || relative(self.chunk_size_ms, candidate.chunk_size_ms) > threshold
            || (candidate.quality_factor - self.quality_factor).abs() > threshold
            || candidate.max_retries != self.max_retries
            || candidate.enable_compression != self.enable_compression
            || relative(self.timeout_ms, candidate.timeout_ms) > threshold
    }
}

/// One adopted parameter set
#[derive(Debug, Clone)]
pub struct AdaptationRecord {
    pub at: DateTime<Utc>,
    pub params: AdaptiveStreamingParams,
}

struct AdapterState {
    params: AdaptiveStreamingParams,
    history: VecDeque<AdaptationRecord>,
}

impl AdapterState {
    fn record(&mut self) {
        self.history.push_back(AdaptationRecord {
            at: Utc::now(),
            params: self.params.clone(),
        });
        while self.history.len() > ADAPTATION_HISTORY_SIZE {
            self.history.pop_front();
        }
    }
}

/// Adapts streaming parameters to [`NetworkMonitor`] tier changes
pub struct NetworkAwareStreamingAdapter {
    state: Mutex<AdapterState>,
    monitor: Mutex<Option<Arc<NetworkMonitor>>>,
    hysteresis_threshold: f32,
    adaptive_mode: AtomicBool,
    total_adaptations: AtomicU64,
    quality_degradations: AtomicU64,
    quality_improvements: AtomicU64,
}

impl NetworkAwareStreamingAdapter {
    pub fn new(hysteresis_threshold: f32) -> Self {
        Self {
            state: Mutex::new(AdapterState {
                params: AdaptiveStreamingParams::default(),
                history: VecDeque::new(),
            }),
            monitor: Mutex::new(None),
            hysteresis_threshold,
            adaptive_mode: AtomicBool::new(true),
            total_adaptations: AtomicU64::new(0),
            quality_degradations: AtomicU64::new(0),
            quality_improvements: AtomicU64::new(0),
        }
    }

    /// Subscribe to tier changes of `monitor`
    pub fn attach(self: &Arc<Self>, monitor: &Arc<NetworkMonitor>) {
        *self.monitor.lock() = Some(monitor.clone());

        let weak: Weak<Self> = Arc::downgrade(self);
        monitor.register_condition_callback(move |change: &NetworkConditionChange| {
            if let Some(adapter) = weak.upgrade() {
                adapter.on_network_condition_change(&change.metrics, change.quality);
            }
        });
        tracing::info!("Network-aware streaming adapter attached");
    }

    fn monitor(&self) -> Option<Arc<NetworkMonitor>> {
        self.monitor.lock().clone()
    }

    /// Adopt the tier's parameters if they pass the hysteresis gate
    pub fn on_network_condition_change(&self, metrics: &NetworkMetrics, quality: NetworkQuality) -> bool {
        if !self.adaptive_mode.load(Ordering::Relaxed) {
            return false;
        }

        let candidate = AdaptiveStreamingParams::optimal(metrics, quality);
        let mut state = self.state.lock();
        if !state
            .params
            .differs_significantly(&candidate, self.hysteresis_threshold)
        {
            return false;
        }

        state.params = candidate;
        state.record();
        self.total_adaptations.fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            "Adapted streaming parameters for {:?}: buffer {}ms, chunk {}ms, retries {}",
            quality,
            state.params.buffer_size_ms,
            state.params.chunk_size_ms,
            state.params.max_retries
        );
        true
    }

    pub fn get_adaptive_params(&self) -> AdaptiveStreamingParams {
        self.state.lock().params.clone()
    }

    /// Nudge parameters from delivery feedback
    pub fn update_from_feedback(&self, success_rate: f32, average_latency_ms: f32) {
        if !self.adaptive_mode.load(Ordering::Relaxed) {
            return;
        }

        let mut state = self.state.lock();
        let params = &mut state.params;
        if success_rate < 0.9 {
            params.buffer_size_ms = ((params.buffer_size_ms as f32 * 1.2).round() as u32).min(500);
            params.quality_factor = (params.quality_factor * 0.9).max(0.3);
            params.max_retries = (params.max_retries + 1).min(10);
            self.quality_degradations.fetch_add(1, Ordering::Relaxed);
        } else if success_rate > 0.98 && average_latency_ms < 100.0 {
            params.buffer_size_ms = ((params.buffer_size_ms as f32 * 0.9).round() as u32).max(50);
            params.quality_factor = (params.quality_factor * 1.05).min(1.0);
            self.quality_improvements.fetch_add(1, Ordering::Relaxed);
        }

        self.total_adaptations.fetch_add(1, Ordering::Relaxed);
        state.record();
    }

    pub fn should_degrade_quality(&self) -> bool {
        self.monitor()
            .map(|m| m.get_network_quality().is_degraded())
            .unwrap_or(false)
    }

    pub fn can_improve_quality(&self) -> bool {
        match self.monitor() {
            Some(m) => match m.get_network_quality() {
                NetworkQuality::Excellent => true,
                NetworkQuality::Good => m.is_network_stable(0.2),
                _ => false,
            },
            None => false,
        }
    }

    pub fn get_recommended_buffer_size(&self, base_buffer_ms: u32) -> u32 {
        let Some(monitor) = self.monitor() else {
            return base_buffer_ms;
        };
        let mut multiplier = monitor.get_network_quality().buffer_multiplier();
        if monitor.get_current_metrics().jitter_ms > 20.0 {
            multiplier *= 1.5;
        }
        (base_buffer_ms as f32 * multiplier).round() as u32
    }

    pub fn get_recommended_chunk_size(&self, base_chunk_ms: u32) -> u32 {
        let Some(monitor) = self.monitor() else {
            return base_chunk_ms;
        };
        (base_chunk_ms as f32 * monitor.get_network_quality().chunk_multiplier()).round() as u32
    }

    pub fn set_adaptive_mode(&self, enabled: bool) {
        self.adaptive_mode.store(enabled, Ordering::Relaxed);
        tracing::info!(
            "Network-aware streaming adaptation {}",
            if enabled { "enabled" } else { "disabled" }
        );
    }

    pub fn adaptation_history(&self) -> Vec<AdaptationRecord> {
        self.state.lock().history.iter().cloned().collect()
    }

    pub fn get_adaptation_stats(&self) -> BTreeMap<String, f64> {
        let state = self.state.lock();
        let mut stats = BTreeMap::new();
        stats.insert(
            "total_adaptations".to_string(),
            self.total_adaptations.load(Ordering::Relaxed) as f64,
        );
        stats.insert(
            "quality_degradations".to_string(),
            self.quality_degradations.load(Ordering::Relaxed) as f64,
        );
        stats.insert(
            "quality_improvements".to_string(),
            self.quality_improvements.load(Ordering::Relaxed) as f64,
        );
        stats.insert(
            "current_buffer_size_ms".to_string(),
            state.params.buffer_size_ms as f64,
        );
        stats.insert(
            "current_chunk_size_ms".to_string(),
            state.params.chunk_size_ms as f64,
        );
        stats.insert(
            "current_quality_factor".to_string(),
            state.params.quality_factor as f64,
        );
        stats.insert(
            "current_max_retries".to_string(),
            state.params.max_retries as f64,
        );
        stats.insert(
            "adaptive_mode_enabled".to_string(),
            if self.adaptive_mode.load(Ordering::Relaxed) { 1.0 } else { 0.0 },
        );
        stats.insert(
            "adaptation_history_size".to_string(),
            state.history.len() as f64,
        );
        stats
    }
}

impl Default for NetworkAwareStreamingAdapter {
    fn default() -> Self {
        Self::new(DEFAULT_HYSTERESIS_THRESHOLD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::ManualNetworkProbe;

    fn attached() -> (Arc<NetworkMonitor>, Arc<NetworkAwareStreamingAdapter>) {
        let monitor = Arc::new(NetworkMonitor::new(
            1000,
            60,
            Box::new(ManualNetworkProbe::new(10.0)),
        ));
        let adapter = Arc::new(NetworkAwareStreamingAdapter::default());
        adapter.attach(&monitor);
        (monitor, adapter)
    }

    #[test]
    fn test_tier_table_with_fine_tuning() {
        let metrics = NetworkMetrics::new(300.0, 60.0, 3.0);
        let params = AdaptiveStreamingParams::optimal(&metrics, NetworkQuality::Poor);
        assert_eq!(params.buffer_size_ms, 450);
        assert_eq!(params.chunk_size_ms, 130);
        assert_eq!(params.max_retries, 7);
        assert_eq!(params.timeout_ms, 8000);
    }

    #[test]
    fn test_adapts_on_tier_change() {
        let (monitor, adapter) = attached();
        monitor.update_metrics(NetworkMetrics::new(300.0, 30.0, 3.0));

        let params = adapter.get_adaptive_params();
        assert_eq!(params.buffer_size_ms, 300);
        assert_eq!(params.max_retries, 7);
        assert_eq!(adapter.get_adaptation_stats()["total_adaptations"], 1.0);
        assert_eq!(adapter.adaptation_history().len(), 1);
        assert!(adapter.should_degrade_quality());
    }

    #[test]
    fn test_hysteresis_rejects_small_change() {
        let adapter = NetworkAwareStreamingAdapter::default();
        let current = adapter.get_adaptive_params();
        let mut candidate = current.clone();
        candidate.buffer_size_ms = 105;
        candidate.quality_factor = 0.95;
        assert!(!current.differs_significantly(&candidate, 0.1));

        candidate.max_retries = 4;
        assert!(current.differs_significantly(&candidate, 0.1));
    }

    #[test]
    fn test_adaptive_mode_off_ignores_changes() {
        let (monitor, adapter) = attached();
        adapter.set_adaptive_mode(false);
        monitor.update_metrics(NetworkMetrics::new(600.0, 80.0, 10.0));
        assert_eq!(adapter.get_adaptive_params(), AdaptiveStreamingParams::default());
    }

    #[test]
    fn test_feedback() {
        let adapter = NetworkAwareStreamingAdapter::default();
        adapter.update_from_feedback(0.5, 300.0);
        let params = adapter.get_adaptive_params();
        assert_eq!(params.buffer_size_ms, 120);
        assert!((params.quality_factor - 0.9).abs() < 1e-6);
        assert_eq!(params.max_retries, 4);

        adapter.update_from_feedback(0.99, 50.0);
        let stats = adapter.get_adaptation_stats();
        assert_eq!(stats["quality_degradations"], 1.0);
        assert_eq!(stats["quality_improvements"], 1.0);
        assert_eq!(stats["total_adaptations"], 2.0);
        assert_eq!(stats["current_buffer_size_ms"], 108.0);
    }

    #[test]
    fn test_recommended_sizes() {
        let (monitor, adapter) = attached();
        assert_eq!(adapter.get_recommended_buffer_size(100), 100);

        monitor.update_metrics(NetworkMetrics::new(150.0, 25.0, 1.0));
        // Poor tier (jitter >= 20) with the jitter boost
        assert_eq!(adapter.get_recommended_buffer_size(100), 300);
        assert_eq!(adapter.get_recommended_chunk_size(100), 150);
    }

    #[test]
    fn test_can_improve_quality() {
        let (monitor, adapter) = attached();
        assert!(!adapter.can_improve_quality());
        monitor.update_metrics(NetworkMetrics::new(10.0, 1.0, 0.0));
        assert!(adapter.can_improve_quality());
    }
}
