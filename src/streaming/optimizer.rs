//! Latency-driven chunking of raw sample buffers
//!
//! Input is split into chunks sized for the target latency. A remainder too
//! short to be a useful chunk is carried over and prepended to the next
//! call, so no sample is ever dropped.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::f32::consts::PI;
use std::time::Instant;

use super::chunk::AudioChunk;
use crate::constants::EMA_ALPHA;
use crate::error::StreamError;

/// Noise gate threshold used by [`StreamingOptimizer::preprocess_audio`]
const NOISE_GATE_THRESHOLD: f32 = 0.001;

/// Clip level used by [`StreamingOptimizer::preprocess_audio`]
const MAX_AMPLITUDE: f32 = 0.95;

struct ChunkSizing {
    sample_rate: u32,
    channels: u16,
    target_latency_ms: u32,
    min_chunk_size: usize,
    max_chunk_size: usize,
    current_chunk_size: usize,
}

impl ChunkSizing {
    fn new(sample_rate: u32, channels: u16, target_latency_ms: u32) -> Self {
        let samples_per_sec = sample_rate as f64 * channels as f64;
        let min_chunk_size = ((samples_per_sec * 0.010) as usize).max(1);
        let max_chunk_size = ((samples_per_sec * 0.100) as usize).max(min_chunk_size);
        let current_chunk_size = ((samples_per_sec * target_latency_ms as f64 / 1000.0) as usize)
            .clamp(min_chunk_size, max_chunk_size);

        Self {
            sample_rate,
            channels,
            target_latency_ms,
            min_chunk_size,
            max_chunk_size,
            current_chunk_size,
        }
    }

    fn samples_per_ms(&self) -> usize {
        self.sample_rate as usize * self.channels as usize / 1000
    }

    fn adjusted(&self, observed_latency_ms: f32, target_latency_ms: f32) -> usize {
        if observed_latency_ms <= 0.0 || target_latency_ms <= 0.0 {
            return self.current_chunk_size;
        }
        // Move 10% of the way towards the size that would hit the target
        let factor = 0.1 * (target_latency_ms / observed_latency_ms - 1.0) + 1.0;
        let size = (self.current_chunk_size as f32 * factor).max(0.0) as usize;
        size.clamp(self.min_chunk_size, self.max_chunk_size)
    }
}

struct OptimizerState {
    sizing: ChunkSizing,
    adaptive_chunking: bool,
    chunk_overlap: usize,
    carry_over: Vec<f32>,
    total_chunks_processed: u64,
    total_samples_processed: u64,
    average_latency_ms: f64,
    average_throughput: f64,
    last_update: Instant,
}

/// Splits audio into latency-sized chunks
pub struct StreamingOptimizer {
    state: Mutex<OptimizerState>,
}

impl StreamingOptimizer {
    pub fn new(sample_rate: u32, channels: u16, target_latency_ms: u32) -> Self {
        let sizing = ChunkSizing::new(sample_rate, channels, target_latency_ms);
        tracing::info!(
            "Streaming optimizer initialized: {}Hz, {} channels, {}ms target latency, chunk {} samples",
            sample_rate,
            channels,
            target_latency_ms,
            sizing.current_chunk_size
        );
        Self {
            state: Mutex::new(OptimizerState {
                sizing,
                adaptive_chunking: true,
                chunk_overlap: 0,
                carry_over: Vec::new(),
                total_chunks_processed: 0,
                total_samples_processed: 0,
                average_latency_ms: 0.0,
                average_throughput: 0.0,
                last_update: Instant::now(),
            }),
        }
    }

    /// Recompute chunk sizes for a new format or latency target
    pub fn reconfigure(&self, sample_rate: u32, channels: u16, target_latency_ms: u32) {
        let sizing = ChunkSizing::new(sample_rate, channels, target_latency_ms);
        tracing::info!(
            "Streaming optimizer reconfigured: {}Hz, {} channels, {}ms target, chunk {} samples",
            sample_rate,
            channels,
            target_latency_ms,
            sizing.current_chunk_size
        );
        self.state.lock().sizing = sizing;
    }

    /// Split `samples` (plus any carried-over remainder) into chunks
    pub fn process_stream(&self, samples: &[f32]) -> Result<Vec<AudioChunk>, StreamError> {
        validate(samples)?;
        let start = Instant::now();
        let mut state = self.state.lock();

        let mut working = std::mem::take(&mut state.carry_over);
        working.extend_from_slice(samples);

        let target = state.sizing.target_latency_ms as f32;
        let mut chunks: Vec<AudioChunk> = Vec::new();
        let mut processed = 0;
        let mut sequence = 0u32;

        while processed < working.len() {
            let remaining = working.len() - processed;
            let size = state.sizing.current_chunk_size.min(remaining);

            if size < state.sizing.min_chunk_size && !chunks.is_empty() {
                state.carry_over = working[processed..].to_vec();
                break;
            }

            let mut chunk = AudioChunk::new(working[processed..processed + size].to_vec(), sequence);
            if state.chunk_overlap > 0 {
                apply_hann_window(&mut chunk.data);
            }
            chunks.push(chunk);
            sequence += 1;
            processed += size;

            if state.adaptive_chunking && chunks.len() > 1 {
                let observed = start.elapsed().as_secs_f32() * 1000.0 / chunks.len() as f32;
                let new_size = state.sizing.adjusted(observed, target);
                if new_size != state.sizing.current_chunk_size {
                    tracing::debug!(
                        "Adjusted chunk size from {} to {} (latency {:.3}ms)",
                        state.sizing.current_chunk_size,
                        new_size,
                        observed
                    );
                    state.sizing.current_chunk_size = new_size;
                }
            }
        }

        if let Some(last) = chunks.last_mut() {
            last.is_last = true;
        }

        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
        state.total_chunks_processed += chunks.len() as u64;
        state.total_samples_processed += processed as u64;
        state.average_latency_ms =
            EMA_ALPHA * elapsed_ms + (1.0 - EMA_ALPHA) * state.average_latency_ms;
        if elapsed_ms > 0.0 {
            let throughput = processed as f64 / (elapsed_ms / 1000.0);
            state.average_throughput =
                EMA_ALPHA * throughput + (1.0 - EMA_ALPHA) * state.average_throughput;
        }
        state.last_update = Instant::now();

        Ok(chunks)
    }

    /// Chunk size that moves observed latency towards the target, clamped
    pub fn optimize_chunk_size(&self, observed_latency_ms: f32, target_latency_ms: f32) -> usize {
        self.state
            .lock()
            .sizing
            .adjusted(observed_latency_ms, target_latency_ms)
    }

    /// Chunk size for a given latency, clamped
    pub fn calculate_optimal_chunk_size(&self, latency_ms: f32) -> usize {
        let state = self.state.lock();
        let sizing = &state.sizing;
        if latency_ms <= 0.0 {
            return sizing.current_chunk_size;
        }
        let size = (sizing.samples_per_ms() as f32 * latency_ms) as usize;
        size.clamp(sizing.min_chunk_size, sizing.max_chunk_size)
    }

    pub fn set_adaptive_chunking(&self, enabled: bool) {
        self.state.lock().adaptive_chunking = enabled;
        tracing::info!(
            "Adaptive chunking {}",
            if enabled { "enabled" } else { "disabled" }
        );
    }

    pub fn set_chunk_overlap(&self, overlap_samples: usize) {
        self.state.lock().chunk_overlap = overlap_samples;
        tracing::info!("Chunk overlap set to {} samples", overlap_samples);
    }

    /// DC removal, noise gate and clipping, in place
    pub fn preprocess_audio(&self, samples: &mut [f32]) -> Result<(), StreamError> {
        if samples.is_empty() {
            return Err(StreamError::EmptyInput);
        }

        let dc_offset = samples.iter().sum::<f32>() / samples.len() as f32;
        for sample in samples.iter_mut() {
            *sample -= dc_offset;
            if sample.abs() < NOISE_GATE_THRESHOLD {
                *sample *= 0.1;
            }
            *sample = sample.clamp(-MAX_AMPLITUDE, MAX_AMPLITUDE);
        }
        Ok(())
    }

    /// Twice the target latency in samples, at least 1024
    pub fn get_recommended_buffer_size(&self) -> usize {
        let state = self.state.lock();
        let sizing = &state.sizing;
        (sizing.samples_per_ms() * sizing.target_latency_ms as usize * 2).max(1024)
    }

    pub fn current_chunk_size(&self) -> usize {
        self.state.lock().sizing.current_chunk_size
    }

    pub fn min_chunk_size(&self) -> usize {
        self.state.lock().sizing.min_chunk_size
    }

    pub fn max_chunk_size(&self) -> usize {
        self.state.lock().sizing.max_chunk_size
    }

    /// Samples waiting to be prepended to the next call
    pub fn pending_samples(&self) -> usize {
        self.state.lock().carry_over.len()
    }

    pub fn get_streaming_stats(&self) -> BTreeMap<String, f64> {
        let state = self.state.lock();
        let mut stats = BTreeMap::new();
        stats.insert(
            "total_chunks_processed".to_string(),
            state.total_chunks_processed as f64,
        );
        stats.insert(
            "total_samples_processed".to_string(),
            state.total_samples_processed as f64,
        );
        stats.insert("average_latency_ms".to_string(), state.average_latency_ms);
        stats.insert(
            "average_throughput_samples_per_sec".to_string(),
            state.average_throughput,
        );
        stats.insert(
            "current_chunk_size".to_string(),
            state.sizing.current_chunk_size as f64,
        );
        stats.insert(
            "adaptive_chunking_enabled".to_string(),
            if state.adaptive_chunking { 1.0 } else { 0.0 },
        );
        stats.insert(
            "chunk_overlap_samples".to_string(),
            state.chunk_overlap as f64,
        );
        stats.insert("pending_samples".to_string(), state.carry_over.len() as f64);
        stats
    }

    pub fn reset_stats(&self) {
        let mut state = self.state.lock();
        state.total_chunks_processed = 0;
        state.total_samples_processed = 0;
        state.average_latency_ms = 0.0;
        state.average_throughput = 0.0;
        state.last_update = Instant::now();
        tracing::info!("Streaming optimizer statistics reset");
    }
}

impl Default for StreamingOptimizer {
    fn default() -> Self {
        Self::new(16000, 1, 50)
    }
}

fn validate(samples: &[f32]) -> Result<(), StreamError> {
    if samples.is_empty() {
        tracing::warn!("Empty audio data provided to streaming optimizer");
        return Err(StreamError::EmptyInput);
    }
    if let Some((index, &value)) = samples.iter().enumerate().find(|(_, s)| !s.is_finite()) {
        tracing::error!("Invalid audio sample at index {}", index);
        return Err(StreamError::InvalidSample { index, value });
    }
    Ok(())
}

fn apply_hann_window(data: &mut [f32]) {
    let n = data.len();
    if n < 2 {
        return;
    }
    let denom = (n - 1) as f32;
    for (i, sample) in data.iter_mut().enumerate() {
        *sample *= 0.5 * (1.0 - (2.0 * PI * i as f32 / denom).cos());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_chunk_sizes() {
        let optimizer = StreamingOptimizer::new(16000, 1, 50);
        assert_eq!(optimizer.min_chunk_size(), 160);
        assert_eq!(optimizer.max_chunk_size(), 1600);
        assert_eq!(optimizer.current_chunk_size(), 800);

        optimizer.reconfigure(16000, 1, 500);
        assert_eq!(optimizer.current_chunk_size(), 1600);
    }

    #[test]
    fn test_rejects_bad_input() {
        let optimizer = StreamingOptimizer::default();
        assert_eq!(optimizer.process_stream(&[]), Err(StreamError::EmptyInput));
        assert!(matches!(
            optimizer.process_stream(&[0.0, f32::INFINITY]),
            Err(StreamError::InvalidSample { index: 1, .. })
        ));
    }

    #[test]
    fn test_short_remainder_is_carried_over() {
        let optimizer = StreamingOptimizer::default();
        optimizer.set_adaptive_chunking(false);

        let chunks = optimizer.process_stream(&vec![0.1; 900]).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].len(), 800);
        assert!(chunks[0].is_last);
        assert_eq!(optimizer.pending_samples(), 100);

        let chunks = optimizer.process_stream(&vec![0.1; 700]).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].len(), 800);
        assert_eq!(chunks[0].sequence_number, 0);
        assert_eq!(optimizer.pending_samples(), 0);
    }

    #[test]
    fn test_tiny_input_still_emits() {
        let optimizer = StreamingOptimizer::default();
        let chunks = optimizer.process_stream(&[0.2; 10]).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].len(), 10);
        assert_eq!(optimizer.pending_samples(), 0);
    }

    #[test]
    fn test_window_applied_with_overlap() {
        let optimizer = StreamingOptimizer::default();
        optimizer.set_chunk_overlap(64);
        let chunks = optimizer.process_stream(&vec![1.0; 800]).unwrap();
        let data = &chunks[0].data;
        assert!(data[0].abs() < 1e-6);
        assert!(data[data.len() - 1].abs() < 1e-6);
        assert!(data[400] > 0.99);
    }

    #[test]
    fn test_preprocess() {
        let optimizer = StreamingOptimizer::default();
        let mut samples = vec![2.0, 0.5, 0.5, 0.5];
        optimizer.preprocess_audio(&mut samples).unwrap();
        // Mean 0.875 removed, then clipped
        assert_eq!(samples[0], 0.95);
        assert!((samples[1] + 0.375).abs() < 1e-6);
        assert!(optimizer.preprocess_audio(&mut []).is_err());
    }

    #[test]
    fn test_recommendations() {
        let optimizer = StreamingOptimizer::new(16000, 1, 50);
        assert_eq!(optimizer.get_recommended_buffer_size(), 1600);
        assert_eq!(optimizer.calculate_optimal_chunk_size(20.0), 320);
        assert_eq!(optimizer.calculate_optimal_chunk_size(1.0), 160);
        assert_eq!(optimizer.optimize_chunk_size(0.0, 50.0), 800);
        assert_eq!(optimizer.optimize_chunk_size(100.0, 50.0), 760);

        let small = StreamingOptimizer::new(8000, 1, 10);
        assert_eq!(small.get_recommended_buffer_size(), 1024);
    }

    #[test]
    fn test_stats() {
        let optimizer = StreamingOptimizer::default();
        optimizer.set_adaptive_chunking(false);
        optimizer.process_stream(&vec![0.0; 1600]).unwrap();

        let stats = optimizer.get_streaming_stats();
        assert_eq!(stats["total_chunks_processed"], 2.0);
        assert_eq!(stats["total_samples_processed"], 1600.0);
        assert_eq!(stats["adaptive_chunking_enabled"], 0.0);

        optimizer.reset_stats();
        assert_eq!(optimizer.get_streaming_stats()["total_samples_processed"], 0.0);
    }

    proptest! {
        #[test]
        fn prop_samples_are_conserved(
            lengths in prop::collection::vec(1usize..3000, 1..8),
            adaptive in any::<bool>(),
        ) {
            let optimizer = StreamingOptimizer::default();
            optimizer.set_adaptive_chunking(adaptive);

            let mut fed = 0usize;
            let mut emitted = 0usize;
            for len in lengths {
                fed += len;
                let chunks = optimizer.process_stream(&vec![0.25; len]).unwrap();
                prop_assert!(!chunks.is_empty());
                prop_assert!(chunks.last().map(|c| c.is_last).unwrap_or(false));
                emitted += chunks.iter().map(|c| c.len()).sum::<usize>();
            }
            prop_assert_eq!(emitted + optimizer.pending_samples(), fed);
        }
    }
}
