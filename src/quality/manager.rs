//! Quality degradation driven by network tier and host load
//!
//! Every candidate parameter set passes through a significance gate before
//! it replaces the current one, so small fluctuations in the inputs do not
//! cause the output quality to flap.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use super::params::{AudioQualityLevel, AudioQualityParams};
use crate::callbacks::CallbackList;
use crate::constants::{DEFAULT_HYSTERESIS_THRESHOLD, QUALITY_HISTORY_SIZE};
use crate::network::{NetworkConditionChange, NetworkMetrics, NetworkMonitor, NetworkQuality};

/// Payload delivered to quality change callbacks
#[derive(Debug, Clone)]
pub struct QualityChange {
    pub previous: AudioQualityParams,
    pub current: AudioQualityParams,
}

/// One applied parameter set
#[derive(Debug, Clone)]
pub struct QualityRecord {
    pub at: DateTime<Utc>,
    pub params: AudioQualityParams,
}

#[derive(Debug, Clone, Copy)]
enum ChangeSource {
    Network,
    Resource,
}

struct ManagerState {
    current: AudioQualityParams,
    target: AudioQualityLevel,
    aggressiveness: f32,
    history: VecDeque<QualityRecord>,
}

impl ManagerState {
    fn record(&mut self) {
        self.history.push_back(QualityRecord {
            at: Utc::now(),
            params: self.current.clone(),
        });
        while self.history.len() > QUALITY_HISTORY_SIZE {
            self.history.pop_front();
        }
    }

    /// Replace the current params and return the change to announce
    fn swap(&mut self, params: AudioQualityParams) -> QualityChange {
        let previous = std::mem::replace(&mut self.current, params);
        self.record();
        QualityChange {
            previous,
            current: self.current.clone(),
        }
    }
}

/// Picks audio quality parameters from network and resource conditions
pub struct QualityDegradationManager {
    state: Mutex<ManagerState>,
    monitor: Mutex<Option<Arc<NetworkMonitor>>>,
    callbacks: CallbackList<QualityChange>,
    hysteresis_threshold: f32,
    auto_adjustment: AtomicBool,
    total_quality_changes: AtomicU64,
    quality_degradations: AtomicU64,
    quality_improvements: AtomicU64,
    network_based_changes: AtomicU64,
    resource_based_changes: AtomicU64,
}

impl QualityDegradationManager {
    pub fn new() -> Self {
        Self::with_hysteresis_threshold(DEFAULT_HYSTERESIS_THRESHOLD)
    }

    /// Manager whose automatic changes must differ by more than `threshold`
    pub fn with_hysteresis_threshold(threshold: f32) -> Self {
        Self {
            state: Mutex::new(ManagerState {
                current: AudioQualityParams::default(),
                target: AudioQualityLevel::Medium,
                aggressiveness: 0.5,
                history: VecDeque::new(),
            }),
            monitor: Mutex::new(None),
            callbacks: CallbackList::new("quality change"),
            hysteresis_threshold: threshold,
            auto_adjustment: AtomicBool::new(true),
            total_quality_changes: AtomicU64::new(0),
            quality_degradations: AtomicU64::new(0),
            quality_improvements: AtomicU64::new(0),
            network_based_changes: AtomicU64::new(0),
            resource_based_changes: AtomicU64::new(0),
        }
    }

    /// Follow tier changes of `monitor` while auto-adjustment is on
    pub fn attach_network_monitor(self: &Arc<Self>, monitor: &Arc<NetworkMonitor>) {
        *self.monitor.lock() = Some(monitor.clone());

        let weak: Weak<Self> = Arc::downgrade(self);
        monitor.register_condition_callback(move |change: &NetworkConditionChange| {
            if let Some(manager) = weak.upgrade() {
                if manager.is_auto_adjustment_enabled() {
                    manager.apply_network_based_degradation(change.quality, &change.metrics);
                }
            }
        });
        tracing::info!("Quality degradation manager attached to network monitor");
    }

    pub fn get_current_quality_params(&self) -> AudioQualityParams {
        self.state.lock().current.clone()
    }

    pub fn register_quality_change_callback<F>(&self, callback: F)
    where
        F: Fn(&QualityChange) + Send + Sync + 'static,
    {
        self.callbacks.register(callback);
    }

    /// Jump straight to the parameters of `level`, bypassing the gate
    pub fn set_target_quality_level(&self, level: AudioQualityLevel) {
        let change = {
            let mut state = self.state.lock();
            state.target = level;
            state.swap(level.params())
        };
        tracing::info!("Target quality level set to {}", level);
        self.callbacks.notify(&change);
    }

    pub fn target_quality_level(&self) -> AudioQualityLevel {
        self.state.lock().target
    }

    pub fn apply_network_based_degradation(
        &self,
        quality: NetworkQuality,
        metrics: &NetworkMetrics,
    ) -> bool {
        self.apply(
            AudioQualityParams::for_network(quality, metrics),
            ChangeSource::Network,
        )
    }

    pub fn apply_resource_based_degradation(
        &self,
        cpu_usage: f32,
        memory_usage: f32,
        processing_latency_ms: f32,
    ) -> bool {
        self.apply(
            AudioQualityParams::for_resources(cpu_usage, memory_usage, processing_latency_ms),
            ChangeSource::Resource,
        )
    }

    fn apply(&self, candidate: AudioQualityParams, source: ChangeSource) -> bool {
        if !self.is_auto_adjustment_enabled() {
            return false;
        }

        let change = {
            let mut state = self.state.lock();
            if !state
                .current
                .differs_significantly(&candidate, self.hysteresis_threshold)
            {
                return false;
            }
            state.swap(candidate)
        };

        match source {
            ChangeSource::Network => self.network_based_changes.fetch_add(1, Ordering::Relaxed),
            ChangeSource::Resource => self.resource_based_changes.fetch_add(1, Ordering::Relaxed),
        };
        self.total_quality_changes.fetch_add(1, Ordering::Relaxed);

        let before = change.previous.effective_level();
        let after = change.current.effective_level();
        if after < before {
            self.quality_degradations.fetch_add(1, Ordering::Relaxed);
        } else if after > before {
            self.quality_improvements.fetch_add(1, Ordering::Relaxed);
        }

        tracing::info!(
            "Applied {:?}-based quality change: {} -> {} ({} Hz, {} bit, {} ch)",
            source,
            before,
            after,
            change.current.sample_rate,
            change.current.bit_depth,
            change.current.channels
        );
        self.callbacks.notify(&change);
        true
    }

    /// Conservative combination of the network and resource recommendations
    pub fn get_recommended_params(
        &self,
        quality: NetworkQuality,
        cpu_usage: f32,
        memory_usage: f32,
    ) -> AudioQualityParams {
        let network = AudioQualityParams::for_network(quality, &NetworkMetrics::default());
        let resources = AudioQualityParams::for_resources(cpu_usage, memory_usage, 100.0);
        network.most_conservative(&resources)
    }

    pub fn can_improve_quality(&self) -> bool {
        let state = self.state.lock();
        state.current.effective_level() < state.target
    }

    pub fn should_degrade_quality(&self) -> bool {
        self.monitor
            .lock()
            .as_ref()
            .map(|monitor| monitor.get_network_quality().is_degraded())
            .unwrap_or(false)
    }

    pub fn set_auto_adjustment(&self, enabled: bool) {
        self.auto_adjustment.store(enabled, Ordering::Relaxed);
        tracing::info!(
            "Quality auto-adjustment {}",
            if enabled { "enabled" } else { "disabled" }
        );
    }

    pub fn is_auto_adjustment_enabled(&self) -> bool {
        self.auto_adjustment.load(Ordering::Relaxed)
    }

    pub fn set_adjustment_aggressiveness(&self, aggressiveness: f32) {
        let aggressiveness = aggressiveness.clamp(0.0, 1.0);
        self.state.lock().aggressiveness = aggressiveness;
        tracing::info!("Quality adjustment aggressiveness set to {}", aggressiveness);
    }

    pub fn reset_to_default(&self) {
        let change = self.state.lock().swap(AudioQualityParams::default());
        tracing::info!("Quality parameters reset to default");
        self.callbacks.notify(&change);
    }

    pub fn quality_history(&self) -> Vec<QualityRecord> {
        self.state.lock().history.iter().cloned().collect()
    }

    pub fn get_degradation_stats(&self) -> BTreeMap<String, f64> {
        let state = self.state.lock();
        let counter = |c: &AtomicU64| c.load(Ordering::Relaxed) as f64;

        let mut stats = BTreeMap::new();
        stats.insert(
            "total_quality_changes".to_string(),
            counter(&self.total_quality_changes),
        );
        stats.insert(
            "quality_degradations".to_string(),
            counter(&self.quality_degradations),
        );
        stats.insert(
            "quality_improvements".to_string(),
            counter(&self.quality_improvements),
        );
        stats.insert(
            "network_based_changes".to_string(),
            counter(&self.network_based_changes),
        );
        stats.insert(
            "resource_based_changes".to_string(),
            counter(&self.resource_based_changes),
        );
        stats.insert(
            "current_sample_rate".to_string(),
            state.current.sample_rate as f64,
        );
        stats.insert(
            "current_bit_depth".to_string(),
            state.current.bit_depth as f64,
        );
        stats.insert("current_channels".to_string(), state.current.channels as f64);
        stats.insert(
            "current_compression_ratio".to_string(),
            state.current.compression_ratio as f64,
        );
        stats.insert(
            "current_quality_level".to_string(),
            state.current.level.as_index() as f64,
        );
        stats.insert(
            "target_quality_level".to_string(),
            state.target.as_index() as f64,
        );
        stats.insert(
            "auto_adjustment_enabled".to_string(),
            if self.is_auto_adjustment_enabled() { 1.0 } else { 0.0 },
        );
        stats.insert(
            "adjustment_aggressiveness".to_string(),
            state.aggressiveness as f64,
        );
        stats.insert(
            "quality_history_size".to_string(),
            state.history.len() as f64,
        );
        stats
    }
}

impl Default for QualityDegradationManager {
    fn default() -> Self {
        Self::new()
    }
}
