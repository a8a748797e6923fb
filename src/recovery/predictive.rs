//! Reordering with gap prediction from recent sequence history

use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use crate::streaming::AudioChunk;

struct ReordererState {
    chunks: HashMap<u32, AudioChunk>,
    history: VecDeque<u32>,
    predicted: HashSet<u32>,
    expected_sequence: u32,
    total_chunks_processed: u64,
    chunks_reordered: u64,
    chunks_dropped: u64,
    gaps_skipped: u64,
    predictions_made: u64,
    predictions_correct: u64,
}

impl ReordererState {
    fn is_stale(&self, sequence: u32) -> bool {
        (sequence.wrapping_sub(self.expected_sequence) as i32) < 0
    }

    fn drain_contiguous(&mut self, ordered: &mut Vec<AudioChunk>) {
        loop {
            let expected = self.expected_sequence;
            let Some(next) = self.chunks.remove(&expected) else {
                break;
            };
            ordered.push(next);
            self.expected_sequence = expected.wrapping_add(1);
        }
    }

    /// Give up on the missing head of line and resume at the lowest buffered sequence
    fn skip_to_lowest(&mut self) {
        let expected = self.expected_sequence;
        if let Some(&lowest) = self
            .chunks
            .keys()
            .min_by_key(|&&seq| seq.wrapping_sub(expected))
        {
            self.gaps_skipped += lowest.wrapping_sub(expected) as u64;
            self.expected_sequence = lowest;
        }
    }

    fn gap_expected_at(&self, sequence: u32) -> bool {
        if self.history.len() < 3 {
            return false;
        }
        let last = self.history[self.history.len() - 1];
        let second_last = self.history[self.history.len() - 2];
        if sequence <= last {
            return false;
        }
        let usual_step = last.wrapping_sub(second_last);
        sequence - last > usual_step.saturating_mul(2)
    }
}

/// Reorder buffer that also guesses which upcoming sequence numbers will be missing
pub struct IntelligentChunkReorderer {
    state: Mutex<ReordererState>,
    max_buffer_size: usize,
    prediction_window: usize,
}

impl IntelligentChunkReorderer {
    pub fn new(max_buffer_size: usize, prediction_window: usize) -> Self {
        tracing::debug!(
            "Intelligent reorderer: buffer={}, prediction window={}",
            max_buffer_size,
            prediction_window
        );
        Self {
            state: Mutex::new(ReordererState {
                chunks: HashMap::new(),
                history: VecDeque::with_capacity(prediction_window * 2),
                predicted: HashSet::new(),
                expected_sequence: 0,
                total_chunks_processed: 0,
                chunks_reordered: 0,
                chunks_dropped: 0,
                gaps_skipped: 0,
                predictions_made: 0,
                predictions_correct: 0,
            }),
            max_buffer_size: max_buffer_size.max(1),
            prediction_window,
        }
    }

    /// Insert a chunk and return the contiguous run now available.
    ///
    /// Chunks behind the expected sequence are dropped. When the buffer
    /// overflows, the missing head of line is skipped instead of holding
    /// everything behind it.
    pub fn add_chunk_intelligent(&self, chunk: AudioChunk) -> Vec<AudioChunk> {
        let mut state = self.state.lock();
        state.total_chunks_processed += 1;

        let seq = chunk.sequence_number;
        if state.is_stale(seq) {
            state.chunks_dropped += 1;
            return Vec::new();
        }
        if state.predicted.remove(&seq) {
            state.predictions_correct += 1;
        }
        state.chunks.insert(seq, chunk);

        state.history.push_back(seq);
        while state.history.len() > self.prediction_window * 2 {
            state.history.pop_front();
        }

        if seq != state.expected_sequence {
            state.chunks_reordered += 1;
        }

        let mut ordered = Vec::new();
        state.drain_contiguous(&mut ordered);
        if state.chunks.len() > self.max_buffer_size {
            tracing::debug!(
                "Reorderer full at {} chunks, skipping missing seq {}",
                state.chunks.len(),
                state.expected_sequence
            );
            state.skip_to_lowest();
            state.drain_contiguous(&mut ordered);
        }

        let expected = state.expected_sequence;
        state
            .predicted
            .retain(|&seq| (seq.wrapping_sub(expected) as i32) >= 0);
        ordered
    }

    /// Sequence numbers in the next window that are likely lost
    pub fn predict_missing_chunks(&self) -> Vec<u32> {
        let mut state = self.state.lock();
        if state.history.len() < self.prediction_window {
            return Vec::new();
        }

        let start = state.expected_sequence;
        let missing: Vec<u32> = (0..self.prediction_window as u32)
            .map(|offset| start.wrapping_add(offset))
            .filter(|seq| !state.chunks.contains_key(seq) && state.gap_expected_at(*seq))
            .collect();

        for seq in &missing {
            if state.predicted.insert(*seq) {
                state.predictions_made += 1;
            }
        }
        missing
    }

    /// Drain everything in sequence order and resume after the last one
    pub fn flush(&self) -> Vec<AudioChunk> {
        let mut state = self.state.lock();
        let expected = state.expected_sequence;
        let mut chunks: Vec<AudioChunk> = state.chunks.drain().map(|(_, chunk)| chunk).collect();
        chunks.sort_by_key(|chunk| chunk.sequence_number.wrapping_sub(expected));

        if let Some(last) = chunks.last() {
            let skipped = last.sequence_number.wrapping_sub(expected) as u64 + 1 - chunks.len() as u64;
            state.gaps_skipped += skipped;
            state.expected_sequence = last.sequence_number.wrapping_add(1);
        }
        state.predicted.clear();
        chunks
    }

    /// Start ordering from `sequence` instead of 0
    pub fn set_expected_sequence(&self, sequence: u32) {
        self.state.lock().expected_sequence = sequence;
    }

    pub fn expected_sequence(&self) -> u32 {
        self.state.lock().expected_sequence
    }

    pub fn get_reordering_stats(&self) -> BTreeMap<String, f64> {
        let state = self.state.lock();
        let processed = state.total_chunks_processed as f64;

        let efficiency = if state.total_chunks_processed == 0 {
            1.0
        } else {
            (state.total_chunks_processed - state.chunks_reordered) as f64 / processed
        };
        let accuracy = if state.predictions_made > 0 {
            state.predictions_correct as f64 / state.predictions_made as f64
        } else {
            0.0
        };

        let mut stats = BTreeMap::new();
        stats.insert("total_chunks_processed".to_string(), processed);
        stats.insert("chunks_reordered".to_string(), state.chunks_reordered as f64);
        stats.insert("chunks_dropped".to_string(), state.chunks_dropped as f64);
        stats.insert("gaps_skipped".to_string(), state.gaps_skipped as f64);
        stats.insert("predictions_made".to_string(), state.predictions_made as f64);
        stats.insert(
            "predictions_correct".to_string(),
            state.predictions_correct as f64,
        );
        stats.insert("prediction_accuracy".to_string(), accuracy);
        stats.insert("current_buffer_size".to_string(), state.chunks.len() as f64);
        stats.insert(
            "expected_sequence".to_string(),
            state.expected_sequence as f64,
        );
        stats.insert("reordering_efficiency".to_string(), efficiency);
        stats
    }
}

impl Default for IntelligentChunkReorderer {
    fn default() -> Self {
        Self::new(100, 10)
    }
}
