//! Streaming configuration
//!
//! Plain serde structs with documented defaults. Missing fields in a TOML
//! file fall back to the defaults, so a partial file is valid.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::constants::{
    DEFAULT_HYSTERESIS_THRESHOLD, DEFAULT_MAX_QUEUE_SIZE, DEFAULT_WORKER_THREADS,
    NETWORK_HISTORY_SIZE,
};
use crate::error::{Error, Result};
use crate::scheduler::StarvationPolicy;

/// Top-level configuration for [`AdvancedStreamingOptimizer`](crate::streaming::AdvancedStreamingOptimizer)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvancedStreamingConfig {
    /// Minimum relative change before a new parameter set is adopted
    pub hysteresis_threshold: f32,
    pub network: NetworkConfig,
    pub recovery: RecoveryConfig,
    pub quality: QualityConfig,
    pub pipeline: PipelineConfig,
    pub streaming: StreamingConfig,
}

impl Default for AdvancedStreamingConfig {
    fn default() -> Self {
        Self {
            hysteresis_threshold: DEFAULT_HYSTERESIS_THRESHOLD,
            network: NetworkConfig::default(),
            recovery: RecoveryConfig::default(),
            quality: QualityConfig::default(),
            pipeline: PipelineConfig::default(),
            streaming: StreamingConfig::default(),
        }
    }
}

/// Network monitoring settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub enabled: bool,
    pub monitoring_interval_ms: u64,
    pub history_size: usize,
    /// Endpoint the latency probe connects to
    pub probe_endpoint: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            monitoring_interval_ms: 1000,
            history_size: NETWORK_HISTORY_SIZE,
            probe_endpoint: "127.0.0.1:12345".to_string(),
        }
    }
}

/// Packet recovery settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    pub enabled: bool,
    pub packet_timeout_ms: u64,
    pub max_retries: u32,
    pub reorder_buffer_size: usize,
    pub reorder_timeout_ms: u64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            packet_timeout_ms: 1000,
            max_retries: 3,
            reorder_buffer_size: 50,
            reorder_timeout_ms: 500,
        }
    }
}

/// Quality degradation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    pub enabled: bool,
    pub cpu_threshold: f32,
    pub memory_threshold: f32,
    pub latency_threshold_ms: f32,
    pub control_interval_ms: u64,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cpu_threshold: 0.8,
            memory_threshold: 0.8,
            latency_threshold_ms: 200.0,
            control_interval_ms: 2000,
        }
    }
}

/// Load-balanced pipeline settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub enabled: bool,
    pub num_worker_threads: usize,
    pub max_queue_size: usize,
    pub resource_interval_ms: u64,
    pub starvation_policy: StarvationPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            num_worker_threads: DEFAULT_WORKER_THREADS,
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
            resource_interval_ms: 1000,
            starvation_policy: StarvationPolicy::Strict,
        }
    }
}

/// Chunking and latency settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    pub target_latency_ms: u32,
    pub enable_ultra_low_latency: bool,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            target_latency_ms: 200,
            enable_ultra_low_latency: true,
        }
    }
}

impl AdvancedStreamingConfig {
    /// Read and validate a TOML config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: Self = toml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from the platform config directory, or defaults if absent
    pub fn load_or_default() -> Result<Self> {
        match Self::default_path() {
            Some(path) if path.exists() => {
                tracing::info!("Loading config from {}", path.display());
                Self::load(path)
            }
            _ => Ok(Self::default()),
        }
    }

    /// Write configuration as TOML
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    /// `<config dir>/adaptive-audio-streamer/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "adaptive-audio-streamer")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Reject values the components cannot run with
    pub fn validate(&self) -> Result<()> {
        fn unit_range(name: &str, value: f32) -> Result<()> {
            if value > 0.0 && value <= 1.0 {
                Ok(())
            } else {
                Err(Error::Config(format!("{} must be in (0, 1], got {}", name, value)))
            }
        }

        if self.network.enabled && self.network.monitoring_interval_ms == 0 {
            return Err(Error::Config("network.monitoring_interval_ms must be > 0".into()));
        }
        if self.network.history_size == 0 {
            return Err(Error::Config("network.history_size must be > 0".into()));
        }
        if self.recovery.reorder_buffer_size == 0 {
            return Err(Error::Config("recovery.reorder_buffer_size must be > 0".into()));
        }
        if self.pipeline.enabled {
            if self.pipeline.num_worker_threads == 0 {
                return Err(Error::Config("pipeline.num_worker_threads must be > 0".into()));
            }
            if self.pipeline.max_queue_size == 0 {
                return Err(Error::Config("pipeline.max_queue_size must be > 0".into()));
            }
            if self.pipeline.resource_interval_ms == 0 {
                return Err(Error::Config("pipeline.resource_interval_ms must be > 0".into()));
            }
        }
        if self.quality.enabled && self.quality.control_interval_ms == 0 {
            return Err(Error::Config("quality.control_interval_ms must be > 0".into()));
        }
        unit_range("quality.cpu_threshold", self.quality.cpu_threshold)?;
        unit_range("quality.memory_threshold", self.quality.memory_threshold)?;
        unit_range("hysteresis_threshold", self.hysteresis_threshold)?;
        if self.streaming.target_latency_ms == 0 {
            return Err(Error::Config("streaming.target_latency_ms must be > 0".into()));
        }
        Ok(())
    }
}
