//! Audio quality levels and the parameter tables behind them

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::QualityError;
use crate::network::{NetworkMetrics, NetworkQuality};

/// Quality level, lowest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AudioQualityLevel {
    UltraLow,  // 8kHz, 8-bit, mono
    Low,       // 16kHz, 16-bit, mono
    Medium,    // 22kHz, 16-bit, mono
    High,      // 44kHz, 16-bit, stereo
    UltraHigh, // 48kHz, 24-bit, stereo
}

impl AudioQualityLevel {
    pub const ALL: [AudioQualityLevel; 5] = [
        AudioQualityLevel::UltraLow,
        AudioQualityLevel::Low,
        AudioQualityLevel::Medium,
        AudioQualityLevel::High,
        AudioQualityLevel::UltraHigh,
    ];

    /// 0 = UltraLow ... 4 = UltraHigh
    pub fn as_index(self) -> i32 {
        self as i32
    }

    /// Default parameters for this level
    pub fn params(self) -> AudioQualityParams {
        let (sample_rate, bit_depth, channels, compression_ratio, enhancement, noise_reduction) =
            match self {
                AudioQualityLevel::UltraHigh => (48000, 24, 2, 1.0, true, true),
                AudioQualityLevel::High => (44100, 16, 2, 1.2, true, true),
                AudioQualityLevel::Medium => (22050, 16, 1, 1.5, true, false),
                AudioQualityLevel::Low => (16000, 16, 1, 2.0, false, false),
                AudioQualityLevel::UltraLow => (8000, 8, 1, 3.0, false, false),
            };
        AudioQualityParams {
            sample_rate,
            bit_depth,
            channels,
            compression_ratio,
            enable_enhancement: enhancement,
            enable_noise_reduction: noise_reduction,
            buffer_size_ms: 100,
            level: self,
        }
    }
}

impl TryFrom<i32> for AudioQualityLevel {
    type Error = QualityError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        usize::try_from(value)
            .ok()
            .and_then(|i| Self::ALL.get(i).copied())
            .ok_or(QualityError::UnknownLevel(value))
    }
}

impl fmt::Display for AudioQualityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AudioQualityLevel::UltraLow => "ultra-low",
            AudioQualityLevel::Low => "low",
            AudioQualityLevel::Medium => "medium",
            AudioQualityLevel::High => "high",
            AudioQualityLevel::UltraHigh => "ultra-high",
        };
        f.write_str(name)
    }
}

/// Encoding and processing parameters for one quality setting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioQualityParams {
    pub sample_rate: u32,
    pub bit_depth: u16,
    pub channels: u16,
    pub compression_ratio: f32,
    pub enable_enhancement: bool,
    pub enable_noise_reduction: bool,
    pub buffer_size_ms: u32,
    pub level: AudioQualityLevel,
}

impl Default for AudioQualityParams {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            bit_depth: 16,
            channels: 1,
            compression_ratio: 1.0,
            enable_enhancement: true,
            enable_noise_reduction: true,
            buffer_size_ms: 100,
            level: AudioQualityLevel::Medium,
        }
    }
}

impl AudioQualityParams {
    /// Best parameters a network tier can carry, tuned by the measured metrics
    pub fn for_network(quality: NetworkQuality, metrics: &NetworkMetrics) -> Self {
        let mut params = match quality {
            NetworkQuality::Excellent => AudioQualityLevel::UltraHigh.params(),
            NetworkQuality::Good => AudioQualityLevel::High.params(),
            NetworkQuality::Fair => AudioQualityLevel::Medium.params(),
            NetworkQuality::Poor => AudioQualityLevel::Low.params(),
            NetworkQuality::VeryPoor => AudioQualityLevel::UltraLow.params(),
        };
        params.buffer_size_ms = match quality {
            NetworkQuality::Excellent => 50,
            NetworkQuality::Good => 75,
            NetworkQuality::Fair => 100,
            NetworkQuality::Poor => 150,
            NetworkQuality::VeryPoor => 200,
        };

        if metrics.latency_ms > 200.0 {
            params.buffer_size_ms = ((params.buffer_size_ms as f32 * 1.5).round() as u32).min(300);
        }
        if metrics.jitter_ms > 50.0 {
            params.compression_ratio *= 1.2;
        }
        if metrics.packet_loss_rate > 2.0 {
            params.compression_ratio *= 1.5;
            params.enable_enhancement = false;
        }
        params
    }

    /// Best parameters the host can afford at the given load
    pub fn for_resources(cpu_usage: f32, memory_usage: f32, processing_latency_ms: f32) -> Self {
        let level = if cpu_usage > 0.9 {
            AudioQualityLevel::UltraLow
        } else if cpu_usage > 0.8 {
            AudioQualityLevel::Low
        } else if cpu_usage > 0.6 {
            AudioQualityLevel::Medium
        } else if cpu_usage > 0.4 {
            AudioQualityLevel::High
        } else {
            AudioQualityLevel::UltraHigh
        };

        let table = level.params();
        let mut params = AudioQualityParams {
            sample_rate: table.sample_rate,
            bit_depth: table.bit_depth,
            channels: table.channels,
            enable_enhancement: table.enable_enhancement,
            enable_noise_reduction: table.enable_noise_reduction,
            level,
            ..AudioQualityParams::default()
        };

        if memory_usage > 0.8 {
            params.buffer_size_ms = ((params.buffer_size_ms as f32 * 0.7).round() as u32).max(50);
            params.compression_ratio *= 1.3;
        }
        if processing_latency_ms > 200.0 {
            params.buffer_size_ms = ((params.buffer_size_ms as f32 * 0.8).round() as u32).max(50);
        }
        if processing_latency_ms > 500.0 {
            params.enable_enhancement = false;
            params.enable_noise_reduction = false;
        }
        params
    }

    /// The lower-quality choice of each field
    pub fn most_conservative(&self, other: &Self) -> Self {
        Self {
            sample_rate: self.sample_rate.min(other.sample_rate),
            bit_depth: self.bit_depth.min(other.bit_depth),
            channels: self.channels.min(other.channels),
            compression_ratio: self.compression_ratio.max(other.compression_ratio),
            enable_enhancement: self.enable_enhancement && other.enable_enhancement,
            enable_noise_reduction: self.enable_noise_reduction && other.enable_noise_reduction,
            buffer_size_ms: self.buffer_size_ms.max(other.buffer_size_ms),
            level: self.level.min(other.level),
        }
    }

    /// Level these parameters actually deliver, regardless of `self.level`
    pub fn effective_level(&self) -> AudioQualityLevel {
        if self.sample_rate >= 44100
            && self.bit_depth >= 16
            && self.enable_enhancement
            && self.enable_noise_reduction
        {
            if self.sample_rate >= 48000 && self.bit_depth >= 24 {
                AudioQualityLevel::UltraHigh
            } else {
                AudioQualityLevel::High
            }
        } else if self.sample_rate >= 22050 && self.bit_depth >= 16 {
            AudioQualityLevel::Medium
        } else if self.sample_rate >= 16000 {
            AudioQualityLevel::Low
        } else {
            AudioQualityLevel::UltraLow
        }
    }

    /// Whether `candidate` differs enough from `self` to be worth switching to
    pub fn differs_significantly(&self, candidate: &Self, threshold: f32) -> bool {
        let sr_delta = (candidate.sample_rate as f32 - self.sample_rate as f32).abs();
        let buf_delta = (candidate.buffer_size_ms as f32 - self.buffer_size_ms as f32).abs();

        sr_delta > self.sample_rate as f32 * threshold
            || candidate.bit_depth != self.bit_depth
            || candidate.channels != self.channels
            || (candidate.compression_ratio - self.compression_ratio).abs() > threshold
            || candidate.enable_enhancement != self.enable_enhancement
            || candidate.enable_noise_reduction != self.enable_noise_reduction
            || buf_delta > self.buffer_size_ms as f32 * threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_ordering() {
        assert!(AudioQualityLevel::UltraLow < AudioQualityLevel::UltraHigh);
        assert_eq!(
            AudioQualityLevel::High.min(AudioQualityLevel::Low),
            AudioQualityLevel::Low
        );
        assert_eq!(AudioQualityLevel::UltraHigh.as_index(), 4);
    }

    #[test]
    fn test_level_from_int() {
        assert_eq!(AudioQualityLevel::try_from(2), Ok(AudioQualityLevel::Medium));
        assert_eq!(
            AudioQualityLevel::try_from(7),
            Err(QualityError::UnknownLevel(7))
        );
        assert!(AudioQualityLevel::try_from(-1).is_err());
    }

    #[test]
    fn test_table_levels_are_consistent() {
        for level in AudioQualityLevel::ALL {
            assert_eq!(level.params().effective_level(), level);
        }
    }

    #[test]
    fn test_network_fine_tuning() {
        let metrics = NetworkMetrics::new(300.0, 60.0, 3.0);
        let params = AudioQualityParams::for_network(NetworkQuality::VeryPoor, &metrics);
        assert_eq!(params.buffer_size_ms, 300);
        assert!((params.compression_ratio - 3.0 * 1.2 * 1.5).abs() < 1e-4);
        assert!(!params.enable_enhancement);
        assert_eq!(params.level, AudioQualityLevel::UltraLow);
    }

    #[test]
    fn test_resource_bands() {
        let params = AudioQualityParams::for_resources(0.95, 0.9, 600.0);
        assert_eq!(params.level, AudioQualityLevel::UltraLow);
        assert_eq!(params.sample_rate, 8000);
        assert_eq!(params.buffer_size_ms, 56);
        assert!((params.compression_ratio - 1.3).abs() < 1e-6);

        let params = AudioQualityParams::for_resources(0.2, 0.2, 50.0);
        assert_eq!(params.level, AudioQualityLevel::UltraHigh);
        assert_eq!(params.buffer_size_ms, 100);
    }

    #[test]
    fn test_significance_gate() {
        let current = AudioQualityParams::default();
        let mut candidate = current.clone();
        candidate.buffer_size_ms = 105;
        assert!(!current.differs_significantly(&candidate, 0.1));
        candidate.channels = 2;
        assert!(current.differs_significantly(&candidate, 0.1));
    }
}
