//! Orchestrator wiring chunking, recovery, network adaptation, quality
//! control and the job pipeline into one streaming path
//!
//! Components are built by [`AdvancedStreamingOptimizer::initialize`] from an
//! [`AdvancedStreamingConfig`]; disabled sections are simply absent. Every
//! cross-component callback holds a `Weak` reference back to the
//! orchestrator, so dropping it tears everything down.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use super::chunk::AudioChunk;
use super::optimizer::StreamingOptimizer;
use super::ultra_low_latency::UltraLowLatencyProcessor;
use crate::callbacks::CallbackList;
use crate::config::AdvancedStreamingConfig;
use crate::constants::{DEFAULT_CHANNELS, DEFAULT_SAMPLE_RATE, FIRST_PACKET_ID};
use crate::error::{Error, Result, SchedulerError, StreamError};
use crate::network::{
    AdaptiveStreamingParams, NetworkAwareStreamingAdapter, NetworkConditionChange, NetworkMonitor,
    NetworkProbe, UdpConnectProbe,
};
use crate::quality::{
    AdaptiveQualityController, AudioQualityLevel, QualityChange, QualityDegradationManager,
};
use crate::recovery::{IntelligentChunkReorderer, PacketRecoverySystem};
use crate::scheduler::{
    JobError, JobId, LoadBalancedPipeline, ProcessingJobType, ProcessingPriority, ResourceProbe,
    SysinfoProbe,
};

/// Latency coefficient of variation below which the network counts as stable
const NETWORK_STABILITY_THRESHOLD: f32 = 0.2;

/// Snapshot of end-to-end streaming health
#[derive(Debug, Clone)]
pub struct StreamingPerformanceMetrics {
    pub end_to_end_latency_ms: f32,
    pub network_latency_ms: f32,
    pub processing_latency_ms: f32,
    pub queue_latency_ms: f32,
    /// Percent, 0 - 100
    pub packet_loss_rate: f32,
    pub cpu_usage: f32,
    pub memory_usage: f32,
    pub active_streams: usize,
    pub queued_jobs: usize,
    pub current_quality: AudioQualityLevel,
    pub ultra_low_latency_active: bool,
    pub timestamp: Instant,
}

impl Default for StreamingPerformanceMetrics {
    fn default() -> Self {
        Self {
            end_to_end_latency_ms: 0.0,
            network_latency_ms: 0.0,
            processing_latency_ms: 0.0,
            queue_latency_ms: 0.0,
            packet_loss_rate: 0.0,
            cpu_usage: 0.0,
            memory_usage: 0.0,
            active_streams: 0,
            queued_jobs: 0,
            current_quality: AudioQualityLevel::Medium,
            ultra_low_latency_active: false,
            timestamp: Instant::now(),
        }
    }
}

/// Runtime knob for [`AdvancedStreamingOptimizer::perform_manual_adjustment`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManualAdjustment {
    /// Value is milliseconds
    TargetLatency,
    /// Value > 0.5 enables
    UltraLowLatency,
    /// Value is the level index, 0 = UltraLow ... 4 = UltraHigh
    QualityLevel,
    /// Value > 0.5 enables
    AdaptiveChunking,
}

impl FromStr for ManualAdjustment {
    type Err = StreamError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "target_latency" => Ok(ManualAdjustment::TargetLatency),
            "ultra_low_latency" => Ok(ManualAdjustment::UltraLowLatency),
            "quality_level" => Ok(ManualAdjustment::QualityLevel),
            "adaptive_chunking" => Ok(ManualAdjustment::AdaptiveChunking),
            other => {
                tracing::warn!("Unknown adjustment type: {}", other);
                Err(StreamError::UnknownAdjustment(other.to_string()))
            }
        }
    }
}

/// Per-stream counters
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamCounters {
    pub buffers_processed: u64,
    pub chunks_emitted: u64,
    pub samples_emitted: u64,
    pub last_processing_ms: f32,
}

/// Probe overrides for [`AdvancedStreamingOptimizer::initialize_with_probes`]
#[derive(Default)]
pub struct ComponentProbes {
    pub network: Option<Box<dyn NetworkProbe>>,
    pub resources: Option<Box<dyn ResourceProbe>>,
}

/// Which reorderer receives incoming chunks
enum IncomingPath {
    Predictive,
    Recovery,
    Passthrough,
}

struct Components {
    optimizer: StreamingOptimizer,
    monitor: Option<Arc<NetworkMonitor>>,
    adapter: Option<Arc<NetworkAwareStreamingAdapter>>,
    recovery: Option<Arc<PacketRecoverySystem>>,
    reorderer: IntelligentChunkReorderer,
    incoming: IncomingPath,
    quality: Option<Arc<QualityDegradationManager>>,
    controller: Option<AdaptiveQualityController>,
    control_interval_ms: u64,
    pipeline: Option<LoadBalancedPipeline>,
    ull: UltraLowLatencyProcessor,
}

impl Components {
    fn stop(&self) {
        if let Some(pipeline) = &self.pipeline {
            pipeline.stop();
        }
        if let Some(controller) = &self.controller {
            controller.stop_auto_control();
        }
        if let Some(monitor) = &self.monitor {
            monitor.stop_monitoring();
        }
    }
}

struct Inner {
    components: Mutex<Option<Arc<Components>>>,
    lifecycle: Mutex<()>,
    running: AtomicBool,
    ultra_low_latency: AtomicBool,
    target_latency_ms: AtomicU32,
    total_streams_processed: AtomicU64,
    total_jobs_submitted: AtomicU64,
    ultra_low_latency_activations: AtomicU64,
    metrics: Mutex<StreamingPerformanceMetrics>,
    metrics_callbacks: CallbackList<StreamingPerformanceMetrics>,
    streams: DashMap<u32, StreamCounters>,
}

impl Inner {
    fn components(&self) -> Option<Arc<Components>> {
        self.components.lock().clone()
    }

    fn update_performance_metrics(&self) {
        let Some(components) = self.components() else {
            return;
        };

        let snapshot = {
            let mut metrics = self.metrics.lock();
            metrics.timestamp = Instant::now();

            if let Some(monitor) = &components.monitor {
                let network = monitor.get_current_metrics();
                metrics.network_latency_ms = network.latency_ms;
                metrics.packet_loss_rate = network.packet_loss_rate;
            }

            if let Some(pipeline) = &components.pipeline {
                let processing = pipeline.get_processing_stats();
                metrics.processing_latency_ms = processing.average_processing_time_ms as f32;
                metrics.queue_latency_ms = processing.average_queue_time_ms as f32;
                metrics.queued_jobs = pipeline.queued_jobs();

                let resources = pipeline.get_current_resources();
                metrics.cpu_usage = resources.cpu_usage;
                metrics.memory_usage = resources.memory_usage;
            }

            if let Some(quality) = &components.quality {
                metrics.current_quality = quality.get_current_quality_params().level;
            }

            metrics.active_streams = self.streams.len();
            metrics.end_to_end_latency_ms =
                metrics.network_latency_ms + metrics.processing_latency_ms + metrics.queue_latency_ms;
            metrics.ultra_low_latency_active = self.ultra_low_latency.load(Ordering::Relaxed);
            metrics.clone()
        };

        self.metrics_callbacks.notify(&snapshot);
    }

    fn on_network_condition_change(&self, change: &NetworkConditionChange) {
        tracing::debug!(
            "Network condition changed: {:?}, latency {:.1}ms",
            change.quality,
            change.metrics.latency_ms
        );
        if let Some(recovery) = self.components().and_then(|c| c.recovery.clone()) {
            recovery.update_recovery_params(
                change.metrics.packet_loss_rate / 100.0,
                change.metrics.latency_ms,
                change.metrics.jitter_ms,
            );
        }
        self.update_performance_metrics();
    }

    fn on_quality_change(&self, change: &QualityChange) {
        tracing::debug!(
            "Quality changed from {} to {}",
            change.previous.level,
            change.current.level
        );
        self.update_performance_metrics();
    }
}

/// Single entry point for optimized, adaptive audio streaming
pub struct AdvancedStreamingOptimizer {
    inner: Arc<Inner>,
}

impl AdvancedStreamingOptimizer {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                components: Mutex::new(None),
                lifecycle: Mutex::new(()),
                running: AtomicBool::new(false),
                ultra_low_latency: AtomicBool::new(false),
                target_latency_ms: AtomicU32::new(200),
                total_streams_processed: AtomicU64::new(0),
                total_jobs_submitted: AtomicU64::new(0),
                ultra_low_latency_activations: AtomicU64::new(0),
                metrics: Mutex::new(StreamingPerformanceMetrics::default()),
                metrics_callbacks: CallbackList::new("metrics"),
                streams: DashMap::new(),
            }),
        }
    }

    /// Build every enabled component with the system probes
    pub fn initialize(&self, config: &AdvancedStreamingConfig) -> Result<()> {
        self.initialize_with_probes(config, ComponentProbes::default())
    }

    /// Build every enabled component, using `probes` where given
    pub fn initialize_with_probes(
        &self,
        config: &AdvancedStreamingConfig,
        probes: ComponentProbes,
    ) -> Result<()> {
        let _lifecycle = self.inner.lifecycle.lock();
        if self.inner.running.load(Ordering::Relaxed) {
            return Err(Error::Config(
                "cannot reinitialize a running optimizer".into(),
            ));
        }
        if let Err(e) = config.validate() {
            tracing::error!("Advanced streaming optimizer initialization failed: {}", e);
            return Err(e);
        }

        let target = config.streaming.target_latency_ms;
        let optimizer = StreamingOptimizer::new(DEFAULT_SAMPLE_RATE, DEFAULT_CHANNELS, target);

        let (monitor, adapter) = if config.network.enabled {
            let probe: Box<dyn NetworkProbe> = match probes.network {
                Some(probe) => probe,
                None => Box::new(UdpConnectProbe::from_config(&config.network).map_err(|e| {
                    tracing::error!("Failed to initialize network monitor: {}", e);
                    e
                })?),
            };
            let monitor = Arc::new(NetworkMonitor::new(
                config.network.monitoring_interval_ms,
                config.network.history_size,
                probe,
            ));
            let adapter = Arc::new(NetworkAwareStreamingAdapter::new(config.hysteresis_threshold));
            adapter.attach(&monitor);
            (Some(monitor), Some(adapter))
        } else {
            (None, None)
        };

        let recovery = config
            .recovery
            .enabled
            .then(|| Arc::new(PacketRecoverySystem::new(&config.recovery)));

        let (quality, controller) = if config.quality.enabled {
            let manager = Arc::new(QualityDegradationManager::with_hysteresis_threshold(
                config.hysteresis_threshold,
            ));
            if let Some(monitor) = &monitor {
                manager.attach_network_monitor(monitor);
            }
            let controller = AdaptiveQualityController::new(manager.clone(), monitor.clone());
            controller.set_control_thresholds(
                config.quality.cpu_threshold,
                config.quality.memory_threshold,
                config.quality.latency_threshold_ms,
            );

            let weak: Weak<Inner> = Arc::downgrade(&self.inner);
            manager.register_quality_change_callback(move |change: &QualityChange| {
                if let Some(inner) = weak.upgrade() {
                    inner.on_quality_change(change);
                }
            });
            (Some(manager), Some(controller))
        } else {
            (None, None)
        };

        let pipeline = config.pipeline.enabled.then(|| {
            let probe: Box<dyn ResourceProbe> = match probes.resources {
                Some(probe) => probe,
                None => Box::new(SysinfoProbe::new()),
            };
            let pipeline = LoadBalancedPipeline::from_config_with_probe(&config.pipeline, probe);
            pipeline.set_resource_thresholds(
                config.quality.cpu_threshold,
                config.quality.memory_threshold,
            );
            pipeline
        });

        if let Some(monitor) = &monitor {
            let weak: Weak<Inner> = Arc::downgrade(&self.inner);
            monitor.register_condition_callback(move |change: &NetworkConditionChange| {
                if let Some(inner) = weak.upgrade() {
                    inner.on_network_condition_change(change);
                }
            });
        }

        let incoming = if config.streaming.enable_ultra_low_latency {
            IncomingPath::Predictive
        } else if recovery.is_some() {
            IncomingPath::Recovery
        } else {
            IncomingPath::Passthrough
        };

        let reorderer = IntelligentChunkReorderer::default();
        if recovery.is_some() {
            reorderer.set_expected_sequence(FIRST_PACKET_ID);
        }

        let components = Components {
            optimizer,
            monitor,
            adapter,
            recovery,
            reorderer,
            incoming,
            quality,
            controller,
            control_interval_ms: config.quality.control_interval_ms,
            pipeline,
            ull: UltraLowLatencyProcessor::new(target),
        };

        *self.inner.components.lock() = Some(Arc::new(components));
        self.inner.target_latency_ms.store(target, Ordering::Relaxed);
        self.inner
            .ultra_low_latency
            .store(config.streaming.enable_ultra_low_latency, Ordering::Relaxed);

        tracing::info!(
            "Advanced streaming optimizer initialized (target {}ms, ultra-low-latency {})",
            target,
            config.streaming.enable_ultra_low_latency
        );
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.components().is_some()
    }

    /// Start monitor, controller and pipeline, in that order
    pub fn start(&self) -> Result<()> {
        let _lifecycle = self.inner.lifecycle.lock();
        let Some(components) = self.inner.components() else {
            tracing::error!("Cannot start: optimizer not initialized");
            return Err(StreamError::NotInitialized.into());
        };
        if self.inner.running.load(Ordering::Relaxed) {
            tracing::warn!("Advanced streaming optimizer already running");
            return Ok(());
        }

        if let Err(e) = Self::start_components(&components) {
            tracing::error!("Advanced streaming optimizer start failed: {}", e);
            components.stop();
            return Err(e.into());
        }

        self.inner.running.store(true, Ordering::Relaxed);
        tracing::info!("Advanced streaming optimizer started");
        Ok(())
    }

    fn start_components(components: &Components) -> std::result::Result<(), SchedulerError> {
        if let Some(monitor) = &components.monitor {
            monitor.start_monitoring()?;
        }
        if let Some(controller) = &components.controller {
            controller.start_auto_control(components.control_interval_ms)?;
        }
        if let Some(pipeline) = &components.pipeline {
            pipeline.start()?;
        }
        Ok(())
    }

    /// Stop pipeline, controller and monitor, in that order
    pub fn stop(&self) {
        let _lifecycle = self.inner.lifecycle.lock();
        if !self.inner.running.swap(false, Ordering::Relaxed) {
            return;
        }
        if let Some(components) = self.inner.components() {
            components.stop();
        }
        tracing::info!("Advanced streaming optimizer stopped");
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Relaxed)
    }

    /// Chunk, reshape and register one buffer of a stream
    ///
    /// Every input sample ends up in exactly one returned chunk, or stays
    /// buffered in the streaming optimizer until the next call. Chunks are
    /// registered with packet recovery last, so a retransmission carries
    /// the same data as the original send.
    pub fn process_stream_with_optimizations(
        &self,
        samples: &[f32],
        stream_id: u32,
    ) -> Result<Vec<AudioChunk>> {
        if !self.is_running() {
            tracing::error!("Cannot process stream: optimizer not running");
            return Err(StreamError::NotRunning.into());
        }
        let components = self
            .inner
            .components()
            .ok_or(StreamError::NotInitialized)?;
        let start = Instant::now();

        let mut chunks = components.optimizer.process_stream(samples)?;

        if let Some(adapter) = &components.adapter {
            let params = adapter.get_adaptive_params();
            let max_samples = DEFAULT_SAMPLE_RATE as usize * params.chunk_size_ms as usize / 1000;
            chunks = split_oversized(chunks, max_samples);
        }

        if self.is_ultra_low_latency_active() {
            self.optimize_for_ultra_low_latency();
            for chunk in chunks.iter_mut() {
                components.ull.process_chunk(chunk);
            }
        }

        if let Some(recovery) = &components.recovery {
            for chunk in chunks.iter_mut() {
                let packet_id = recovery.process_outgoing_chunk(chunk);
                if packet_id != 0 {
                    chunk.sequence_number = packet_id;
                }
            }
        }

        self.inner.update_performance_metrics();

        let elapsed_ms = start.elapsed().as_secs_f32() * 1000.0;
        if elapsed_ms > self.inner.target_latency_ms.load(Ordering::Relaxed) as f32 {
            self.adjust_optimization_parameters();
        }

        self.inner.total_streams_processed.fetch_add(1, Ordering::Relaxed);
        {
            let mut counters = self.inner.streams.entry(stream_id).or_default();
            counters.buffers_processed += 1;
            counters.chunks_emitted += chunks.len() as u64;
            counters.samples_emitted += chunks.iter().map(|c| c.len() as u64).sum::<u64>();
            counters.last_processing_ms = elapsed_ms;
        }

        tracing::debug!(
            "Stream {}: {} samples -> {} chunks in {:.3}ms",
            stream_id,
            samples.len(),
            chunks.len(),
            elapsed_ms
        );
        Ok(chunks)
    }

    /// Reorder a chunk received from the transport
    ///
    /// With ultra-low latency configured, chunks go through the predictive
    /// reorderer. Otherwise they use the recovery system's reorder buffer.
    pub fn process_incoming_chunk(&self, chunk: AudioChunk) -> Vec<AudioChunk> {
        let Some(components) = self.inner.components() else {
            return vec![chunk];
        };
        match components.incoming {
            IncomingPath::Predictive => components.reorderer.add_chunk_intelligent(chunk),
            IncomingPath::Recovery => match &components.recovery {
                Some(recovery) => recovery.process_incoming_chunk(chunk),
                None => vec![chunk],
            },
            IncomingPath::Passthrough => vec![chunk],
        }
    }

    /// Release everything held by the incoming reorderer, gaps included
    pub fn flush_incoming(&self) -> Vec<AudioChunk> {
        let Some(components) = self.inner.components() else {
            return Vec::new();
        };
        let flushed = match components.incoming {
            IncomingPath::Predictive => components.reorderer.flush(),
            IncomingPath::Recovery => components
                .recovery
                .as_ref()
                .map(|recovery| recovery.flush())
                .unwrap_or_default(),
            IncomingPath::Passthrough => Vec::new(),
        };
        if !flushed.is_empty() {
            tracing::debug!("Flushed {} buffered incoming chunks", flushed.len());
        }
        flushed
    }

    /// Sequence numbers the predictive reorderer expects to be lost
    pub fn predict_missing_chunks(&self) -> Vec<u32> {
        match self.inner.components() {
            Some(components) if matches!(components.incoming, IncomingPath::Predictive) => {
                components.reorderer.predict_missing_chunks()
            }
            _ => Vec::new(),
        }
    }

    /// Forward a transport acknowledgement to packet recovery
    pub fn acknowledge_packet(&self, packet_id: u32) {
        if let Some(recovery) = self.inner.components().and_then(|c| c.recovery.clone()) {
            recovery.acknowledge_packet(packet_id);
        }
    }

    /// Chunks due for retransmission
    pub fn get_retransmission_queue(&self) -> Vec<AudioChunk> {
        self.inner
            .components()
            .and_then(|c| c.recovery.clone())
            .map(|recovery| recovery.get_retransmission_queue())
            .unwrap_or_default()
    }

    /// Escalate after a missed latency target
    ///
    /// Outside ultra-low-latency mode this switches it on. Inside it, quality
    /// is forced down as if the host were saturated.
    pub fn adjust_optimization_parameters(&self) {
        if self.is_ultra_low_latency_active() {
            if let Some(quality) = self.inner.components().and_then(|c| c.quality.clone()) {
                let target = self.inner.target_latency_ms.load(Ordering::Relaxed) as f32;
                quality.apply_resource_based_degradation(0.9, 0.9, target * 2.0);
            }
        } else {
            self.set_ultra_low_latency_mode(true);
        }
        tracing::info!("Adjusted optimization parameters due to latency target miss");
    }

    pub fn optimize_for_ultra_low_latency(&self) {
        let Some(components) = self.inner.components() else {
            return;
        };
        components.optimizer.set_adaptive_chunking(true);
        components.optimizer.set_chunk_overlap(0);
        if let Some(pipeline) = &components.pipeline {
            pipeline.set_job_type_priority(ProcessingJobType::RealTimeStream, ProcessingPriority::Critical);
        }
        if let Some(quality) = &components.quality {
            quality.set_adjustment_aggressiveness(1.0);
        }
        components.ull.set_aggressive_optimizations(true);
        tracing::debug!("Applied ultra-low latency optimizations");
    }

    fn pipeline_submit<F>(&self, submit: F) -> Result<JobId>
    where
        F: FnOnce(&LoadBalancedPipeline) -> std::result::Result<JobId, SchedulerError>,
    {
        let components = self.inner.components();
        let Some(pipeline) = components.as_ref().and_then(|c| c.pipeline.as_ref()) else {
            tracing::error!("Cannot submit job: processing pipeline not available");
            return Err(SchedulerError::PipelineUnavailable.into());
        };
        let job_id = submit(pipeline)?;
        self.inner.total_jobs_submitted.fetch_add(1, Ordering::Relaxed);
        Ok(job_id)
    }

    pub fn submit_real_time_job<F>(&self, task: F) -> Result<JobId>
    where
        F: FnOnce() -> std::result::Result<(), JobError> + Send + 'static,
    {
        self.pipeline_submit(|pipeline| pipeline.submit_real_time_job(task, "Real-time streaming job"))
    }

    pub fn submit_batch_job<F>(&self, task: F) -> Result<JobId>
    where
        F: FnOnce() -> std::result::Result<(), JobError> + Send + 'static,
    {
        self.pipeline_submit(|pipeline| pipeline.submit_batch_job(task, "Batch processing job"))
    }

    pub fn cancel_job(&self, job_id: JobId) -> bool {
        self.inner
            .components()
            .and_then(|c| c.pipeline.as_ref().map(|p| p.cancel_job(job_id)))
            .unwrap_or(false)
    }

    pub fn get_performance_metrics(&self) -> StreamingPerformanceMetrics {
        self.inner.metrics.lock().clone()
    }

    pub fn update_performance_metrics(&self) {
        self.inner.update_performance_metrics();
    }

    pub fn is_ultra_low_latency_active(&self) -> bool {
        self.inner.ultra_low_latency.load(Ordering::Relaxed)
    }

    pub fn set_ultra_low_latency_mode(&self, enabled: bool) {
        let was_enabled = self.inner.ultra_low_latency.swap(enabled, Ordering::Relaxed);
        if enabled && !was_enabled {
            self.inner
                .ultra_low_latency_activations
                .fetch_add(1, Ordering::Relaxed);
            self.optimize_for_ultra_low_latency();
            tracing::info!("Ultra-low latency mode enabled");
        } else if !enabled && was_enabled {
            tracing::info!("Ultra-low latency mode disabled");
        }
    }

    pub fn set_target_latency(&self, latency_ms: u32) {
        self.inner
            .target_latency_ms
            .store(latency_ms, Ordering::Relaxed);
        if let Some(components) = self.inner.components() {
            components
                .optimizer
                .reconfigure(DEFAULT_SAMPLE_RATE, DEFAULT_CHANNELS, latency_ms);
            components.ull.set_target_latency_ms(latency_ms);
        }
        tracing::info!("Target latency set to {}ms", latency_ms);
    }

    pub fn target_latency_ms(&self) -> u32 {
        self.inner.target_latency_ms.load(Ordering::Relaxed)
    }

    pub fn get_current_streaming_params(&self) -> AdaptiveStreamingParams {
        self.inner
            .components()
            .and_then(|c| c.adapter.as_ref().map(|a| a.get_adaptive_params()))
            .unwrap_or_default()
    }

    /// Called with a copy of the metrics after every update
    pub fn register_metrics_callback<F>(&self, callback: F)
    where
        F: Fn(&StreamingPerformanceMetrics) + Send + Sync + 'static,
    {
        self.inner.metrics_callbacks.register(callback);
    }

    pub fn perform_manual_adjustment(&self, adjustment: ManualAdjustment, value: f32) -> Result<()> {
        match adjustment {
            ManualAdjustment::TargetLatency => self.set_target_latency(value.max(1.0) as u32),
            ManualAdjustment::UltraLowLatency => self.set_ultra_low_latency_mode(value > 0.5),
            ManualAdjustment::QualityLevel => {
                let level = AudioQualityLevel::try_from(value as i32)?;
                match self.inner.components().and_then(|c| c.quality.clone()) {
                    Some(quality) => quality.set_target_quality_level(level),
                    None => tracing::warn!("Quality degradation disabled, ignoring {}", level),
                }
            }
            ManualAdjustment::AdaptiveChunking => {
                if let Some(components) = self.inner.components() {
                    components.optimizer.set_adaptive_chunking(value > 0.5);
                }
            }
        }
        Ok(())
    }

    /// Parse `name` as a [`ManualAdjustment`] and apply it
    pub fn perform_named_adjustment(&self, name: &str, value: f32) -> Result<()> {
        let adjustment: ManualAdjustment = name.parse()?;
        self.perform_manual_adjustment(adjustment, value)
    }

    /// Counters for one stream id
    pub fn stream_counters(&self, stream_id: u32) -> Option<StreamCounters> {
        self.inner.streams.get(&stream_id).map(|c| c.clone())
    }

    /// Forget a finished stream
    pub fn end_stream(&self, stream_id: u32) -> bool {
        self.inner.streams.remove(&stream_id).is_some()
    }

    pub fn is_healthy(&self) -> bool {
        let Some(components) = self.inner.components() else {
            return false;
        };
        if !self.is_running() {
            return false;
        }

        let network_ok = components
            .monitor
            .as_ref()
            .map_or(true, |m| m.is_network_stable(NETWORK_STABILITY_THRESHOLD));
        let pipeline_ok = components
            .pipeline
            .as_ref()
            .map_or(true, |p| p.is_healthy());

        let metrics = self.get_performance_metrics();
        let target = self.inner.target_latency_ms.load(Ordering::Relaxed) as f32;
        let latency_ok = metrics.end_to_end_latency_ms <= target * 1.5;
        let resources_ok = metrics.cpu_usage < 0.9 && metrics.memory_usage < 0.9;

        network_ok && pipeline_ok && latency_ok && resources_ok
    }

    /// Orchestrator counters plus every component's stats under a prefix
    pub fn get_optimization_stats(&self) -> BTreeMap<String, f64> {
        let inner = &self.inner;
        let components = inner.components();
        let flag = |b: bool| if b { 1.0 } else { 0.0 };

        let mut stats = BTreeMap::new();
        stats.insert(
            "total_streams_processed".to_string(),
            inner.total_streams_processed.load(Ordering::Relaxed) as f64,
        );
        stats.insert(
            "total_jobs_submitted".to_string(),
            inner.total_jobs_submitted.load(Ordering::Relaxed) as f64,
        );
        stats.insert(
            "ultra_low_latency_activations".to_string(),
            inner.ultra_low_latency_activations.load(Ordering::Relaxed) as f64,
        );
        stats.insert(
            "target_latency_ms".to_string(),
            inner.target_latency_ms.load(Ordering::Relaxed) as f64,
        );
        stats.insert(
            "ultra_low_latency_active".to_string(),
            flag(self.is_ultra_low_latency_active()),
        );
        stats.insert("initialized".to_string(), flag(components.is_some()));
        stats.insert("running".to_string(), flag(self.is_running()));
        stats.insert("active_streams".to_string(), inner.streams.len() as f64);

        let Some(components) = components else {
            return stats;
        };

        let mut merge = |prefix: &str, component: BTreeMap<String, f64>| {
            stats.extend(
                component
                    .into_iter()
                    .map(|(key, value)| (format!("{}.{}", prefix, key), value)),
            );
        };

        merge("streaming", components.optimizer.get_streaming_stats());
        if let Some(monitor) = &components.monitor {
            merge("network", monitor.get_monitoring_stats());
        }
        if let Some(adapter) = &components.adapter {
            merge("adapter", adapter.get_adaptation_stats());
        }
        if let Some(recovery) = &components.recovery {
            merge("recovery", recovery.get_recovery_stats());
        }
        if matches!(components.incoming, IncomingPath::Predictive) {
            merge("reorderer", components.reorderer.get_reordering_stats());
        }
        if let Some(quality) = &components.quality {
            merge("quality", quality.get_degradation_stats());
        }
        if let Some(controller) = &components.controller {
            merge("control", controller.get_control_stats());
        }
        if let Some(pipeline) = &components.pipeline {
            merge("pipeline", pipeline.get_pipeline_stats());
        }

        let ull = &components.ull;
        let mut ull_stats = BTreeMap::new();
        ull_stats.insert("current_latency_ms".to_string(), ull.get_current_latency() as f64);
        ull_stats.insert("target_latency_ms".to_string(), ull.target_latency_ms() as f64);
        ull_stats.insert(
            "optimal_chunk_samples".to_string(),
            ull.optimal_chunk_samples() as f64,
        );
        ull_stats.insert("aggressive".to_string(), flag(ull.is_aggressive()));
        ull_stats.insert("latency_target_met".to_string(), flag(ull.is_latency_target_met()));
        merge("ull", ull_stats);

        stats
    }
}

impl Default for AdvancedStreamingOptimizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for AdvancedStreamingOptimizer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Split chunks longer than `max_samples`, renumbering within the call
fn split_oversized(chunks: Vec<AudioChunk>, max_samples: usize) -> Vec<AudioChunk> {
    let max_samples = max_samples.max(1);
    if chunks.iter().all(|chunk| chunk.len() <= max_samples) {
        return chunks;
    }

    let mut out = Vec::with_capacity(chunks.len() * 2);
    for chunk in chunks {
        for piece in chunk.data.chunks(max_samples) {
            let mut split = AudioChunk::new(piece.to_vec(), out.len() as u32);
            split.timestamp = chunk.timestamp;
            out.push(split);
        }
    }
    if let Some(last) = out.last_mut() {
        last.is_last = true;
    }
    out
}
