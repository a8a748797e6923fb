//! Sequence-numbered audio chunks

use std::time::{Duration, Instant};

/// Timestamped slice of mono or interleaved audio
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    /// Samples (f32)
    pub data: Vec<f32>,
    /// Creation or last prioritization time
    pub timestamp: Instant,
    /// Chunk index within a stream, or packet id once sent
    pub sequence_number: u32,
    /// Final chunk of a `process_stream` call
    pub is_last: bool,
}

impl AudioChunk {
    pub fn new(data: Vec<f32>, sequence_number: u32) -> Self {
        Self {
            data,
            timestamp: Instant::now(),
            sequence_number,
            is_last: false,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Playback length at the given format
    pub fn duration_ms(&self, sample_rate: u32, channels: u16) -> f32 {
        let frames = self.data.len() as f32 / channels.max(1) as f32;
        frames * 1000.0 / sample_rate as f32
    }

    /// Time since the chunk was stamped
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.timestamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration() {
        let chunk = AudioChunk::new(vec![0.0; 1600], 0);
        assert_eq!(chunk.duration_ms(16000, 1), 100.0);
        assert_eq!(chunk.duration_ms(16000, 2), 50.0);
        assert!(!chunk.is_last);
    }
}
