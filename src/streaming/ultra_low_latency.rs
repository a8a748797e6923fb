//! Send-time stamping and latency tracking for the ultra-low-latency mode
//!
//! The processor never changes how many samples a chunk carries. Chunk size
//! is decided upstream by the streaming optimizer and the network adapter;
//! this only reports the size it would prefer.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Instant;

use super::chunk::AudioChunk;
use crate::constants::DEFAULT_SAMPLE_RATE;

/// Smallest preferred chunk when aggressive optimizations are on
pub const MIN_VIABLE_CHUNK_SAMPLES: usize = 256;

pub struct UltraLowLatencyProcessor {
    target_latency_ms: AtomicU32,
    aggressive: AtomicBool,
    current_latency_ms: Mutex<f32>,
}

impl UltraLowLatencyProcessor {
    pub fn new(target_latency_ms: u32) -> Self {
        tracing::info!(
            "Ultra-low-latency processor initialized with {}ms target",
            target_latency_ms
        );
        Self {
            target_latency_ms: AtomicU32::new(target_latency_ms),
            aggressive: AtomicBool::new(false),
            current_latency_ms: Mutex::new(0.0),
        }
    }

    /// Stamp `chunk` for sending and report whether processing met the target
    pub fn process_chunk(&self, chunk: &mut AudioChunk) -> bool {
        let start = Instant::now();
        chunk.timestamp = Instant::now();

        let elapsed_ms = start.elapsed().as_secs_f32() * 1000.0;
        *self.current_latency_ms.lock() = elapsed_ms;
        elapsed_ms <= self.target_latency_ms() as f32
    }

    /// Preferred chunk length: a quarter of the target at 16 kHz, capped
    /// at [`MIN_VIABLE_CHUNK_SAMPLES`] when aggressive
    pub fn optimal_chunk_samples(&self) -> usize {
        let quarter = (DEFAULT_SAMPLE_RATE as usize * self.target_latency_ms() as usize) / 1000 / 4;
        if self.is_aggressive() {
            quarter.min(MIN_VIABLE_CHUNK_SAMPLES)
        } else {
            quarter
        }
    }

    pub fn is_latency_target_met(&self) -> bool {
        *self.current_latency_ms.lock() <= self.target_latency_ms() as f32
    }

    pub fn get_current_latency(&self) -> f32 {
        *self.current_latency_ms.lock()
    }

    pub fn set_aggressive_optimizations(&self, enabled: bool) {
        self.aggressive.store(enabled, Ordering::Relaxed);
        tracing::info!(
            "Aggressive optimizations {}",
            if enabled { "enabled" } else { "disabled" }
        );
    }

    pub fn is_aggressive(&self) -> bool {
        self.aggressive.load(Ordering::Relaxed)
    }

    pub fn set_target_latency_ms(&self, latency_ms: u32) {
        self.target_latency_ms.store(latency_ms, Ordering::Relaxed);
    }

    pub fn target_latency_ms(&self) -> u32 {
        self.target_latency_ms.load(Ordering::Relaxed)
    }
}

impl Default for UltraLowLatencyProcessor {
    fn default() -> Self {
        Self::new(200)
    }
}
