//! Network measurements and quality tiers

use serde::{Deserialize, Serialize};
use std::time::Instant;

/// One network measurement
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkMetrics {
    pub latency_ms: f32,
    pub jitter_ms: f32,
    /// Percent, 0 - 100
    pub packet_loss_rate: f32,
    pub bandwidth_kbps: f32,
    pub throughput_kbps: f32,
    pub timestamp: Instant,
}

impl Default for NetworkMetrics {
    fn default() -> Self {
        Self {
            latency_ms: 0.0,
            jitter_ms: 0.0,
            packet_loss_rate: 0.0,
            bandwidth_kbps: 0.0,
            throughput_kbps: 0.0,
            timestamp: Instant::now(),
        }
    }
}

impl NetworkMetrics {
    pub fn new(latency_ms: f32, jitter_ms: f32, packet_loss_rate: f32) -> Self {
        Self {
            latency_ms,
            jitter_ms,
            packet_loss_rate,
            ..Self::default()
        }
    }
}

/// Network condition tier, best first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NetworkQuality {
    Excellent, // < 50ms, < 5ms jitter, < 0.1% loss
    Good,      // < 100ms, < 10ms jitter, < 0.5% loss
    Fair,      // < 200ms, < 20ms jitter, < 2% loss
    Poor,      // < 500ms, < 50ms jitter, < 5% loss
    VeryPoor,
}

impl NetworkQuality {
    /// Classify a measurement. Every bound of a tier must hold.
    pub fn from_metrics(metrics: &NetworkMetrics) -> Self {
        let (lat, jit, loss) = (
            metrics.latency_ms,
            metrics.jitter_ms,
            metrics.packet_loss_rate,
        );
        match (lat, jit, loss) {
            (l, j, p) if l < 50.0 && j < 5.0 && p < 0.1 => NetworkQuality::Excellent,
            (l, j, p) if l < 100.0 && j < 10.0 && p < 0.5 => NetworkQuality::Good,
            (l, j, p) if l < 200.0 && j < 20.0 && p < 2.0 => NetworkQuality::Fair,
            (l, j, p) if l < 500.0 && j < 50.0 && p < 5.0 => NetworkQuality::Poor,
            _ => NetworkQuality::VeryPoor,
        }
    }

    /// 0 = Excellent ... 4 = VeryPoor
    pub fn as_index(&self) -> u8 {
        *self as u8
    }

    /// Quality should be reduced on this tier
    pub fn is_degraded(&self) -> bool {
        matches!(self, NetworkQuality::Poor | NetworkQuality::VeryPoor)
    }

    /// Scale applied to the base jitter buffer on this tier
    pub fn buffer_multiplier(&self) -> f32 {
        match self {
            NetworkQuality::Excellent => 0.8,
            NetworkQuality::Good => 1.0,
            NetworkQuality::Fair => 1.5,
            NetworkQuality::Poor => 2.0,
            NetworkQuality::VeryPoor => 3.0,
        }
    }

    /// Scale applied to the base chunk length on this tier
    pub fn chunk_multiplier(&self) -> f32 {
        match self {
            NetworkQuality::Excellent => 0.8,
            NetworkQuality::Good => 1.0,
            NetworkQuality::Fair => 1.2,
            NetworkQuality::Poor => 1.5,
            NetworkQuality::VeryPoor => 2.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_classification_boundaries() {
        let excellent = NetworkMetrics::new(49.0, 4.0, 0.05);
        assert_eq!(NetworkQuality::from_metrics(&excellent), NetworkQuality::Excellent);

        let good = NetworkMetrics::new(50.0, 4.0, 0.05);
        assert_eq!(NetworkQuality::from_metrics(&good), NetworkQuality::Good);

        // Jitter alone pushes the tier down
        let fair = NetworkMetrics::new(10.0, 15.0, 0.0);
        assert_eq!(NetworkQuality::from_metrics(&fair), NetworkQuality::Fair);

        let very_poor = NetworkMetrics::new(10.0, 1.0, 5.0);
        assert_eq!(NetworkQuality::from_metrics(&very_poor), NetworkQuality::VeryPoor);
    }

    #[test]
    fn test_index_and_degraded() {
        assert_eq!(NetworkQuality::Excellent.as_index(), 0);
        assert_eq!(NetworkQuality::VeryPoor.as_index(), 4);
        assert!(NetworkQuality::Poor.is_degraded());
        assert!(!NetworkQuality::Fair.is_degraded());
    }

    proptest! {
        #[test]
        fn prop_worse_metrics_never_improve_tier(
            lat in 0.0f32..600.0,
            jit in 0.0f32..60.0,
            loss in 0.0f32..6.0,
            d_lat in 0.0f32..100.0,
            d_jit in 0.0f32..20.0,
            d_loss in 0.0f32..2.0,
        ) {
            let base = NetworkQuality::from_metrics(&NetworkMetrics::new(lat, jit, loss));
            let worse = NetworkQuality::from_metrics(
                &NetworkMetrics::new(lat + d_lat, jit + d_jit, loss + d_loss),
            );
            prop_assert!(worse >= base);
        }
    }
}
