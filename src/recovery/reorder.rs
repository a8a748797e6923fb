//! Reorder buffer for audio chunks
//!
//! Chunks are held by sequence number and released only as a contiguous run
//! starting at the expected sequence. When the head of the line is missing
//! and buffered chunks have waited longer than the reorder timeout, or the
//! sender gave up on the missing packet, the gap is skipped and counted.

use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::{Duration, Instant};

use crate::streaming::AudioChunk;

struct ReorderState {
    chunks: HashMap<u32, AudioChunk>,
    /// Sequences the sender abandoned
    lost: HashSet<u32>,
    expected_sequence: u32,
    max_buffer_size: usize,
    reorder_timeout: Duration,
    total_chunks_received: u64,
    total_chunks_reordered: u64,
    total_chunks_dropped: u64,
    total_sequence_gaps: u64,
}

impl ReorderState {
    fn evict_oldest(&mut self) {
        let oldest = self
            .chunks
            .iter()
            .min_by_key(|(_, chunk)| chunk.timestamp)
            .map(|(&seq, _)| seq);
        if let Some(seq) = oldest {
            self.chunks.remove(&seq);
            self.total_chunks_dropped += 1;
        }
    }

    /// Behind the expected sequence, with wraparound
    fn is_stale(&self, sequence: u32) -> bool {
        (sequence.wrapping_sub(self.expected_sequence) as i32) < 0
    }

    /// Move past a missing head of line. Returns false while still waiting.
    fn skip_gap(&mut self, now: Instant) -> bool {
        let expected = self.expected_sequence;
        if self.chunks.contains_key(&expected) {
            return false;
        }

        if self.lost.remove(&expected) {
            self.expected_sequence = expected.wrapping_add(1);
            self.total_sequence_gaps += 1;
            return true;
        }

        let timeout = self.reorder_timeout;
        if !self.chunks.values().any(|chunk| chunk.age(now) > timeout) {
            return false;
        }
        let Some(&lowest) = self
            .chunks
            .keys()
            .min_by_key(|&&seq| seq.wrapping_sub(expected))
        else {
            return false;
        };

        let skipped = lowest.wrapping_sub(expected);
        tracing::debug!(
            "Reorder timeout: skipping {} missing chunks from seq {}",
            skipped,
            expected
        );
        self.expected_sequence = lowest;
        self.total_sequence_gaps += skipped as u64;
        self.prune_lost();
        true
    }

    fn prune_lost(&mut self) {
        let next = self.expected_sequence;
        self.lost.retain(|&seq| (seq.wrapping_sub(next) as i32) >= 0);
    }

    fn pop_expected(&mut self) -> Option<AudioChunk> {
        let chunk = self.chunks.remove(&self.expected_sequence)?;
        self.expected_sequence = self.expected_sequence.wrapping_add(1);
        Some(chunk)
    }

    fn next_ordered(&mut self, now: Instant) -> Option<AudioChunk> {
        loop {
            if let Some(chunk) = self.pop_expected() {
                return Some(chunk);
            }
            if !self.skip_gap(now) {
                return None;
            }
        }
    }
}

/// Holds out-of-order chunks until the gap before them is filled
pub struct AudioChunkReorderBuffer {
    state: Mutex<ReorderState>,
}

impl AudioChunkReorderBuffer {
    pub fn new(max_buffer_size: usize, reorder_timeout_ms: u64) -> Self {
        Self {
            state: Mutex::new(ReorderState {
                chunks: HashMap::with_capacity(max_buffer_size),
                lost: HashSet::new(),
                expected_sequence: 0,
                max_buffer_size: max_buffer_size.max(1),
                reorder_timeout: Duration::from_millis(reorder_timeout_ms),
                total_chunks_received: 0,
                total_chunks_reordered: 0,
                total_chunks_dropped: 0,
                total_sequence_gaps: 0,
            }),
        }
    }

    /// Insert a chunk, evicting the oldest one if the buffer is full.
    /// Chunks behind the expected sequence are dropped.
    pub fn add_chunk(&self, chunk: AudioChunk) {
        let mut state = self.state.lock();
        state.total_chunks_received += 1;

        let seq = chunk.sequence_number;
        if state.is_stale(seq) {
            state.total_chunks_dropped += 1;
            tracing::trace!("Dropping stale chunk {}", seq);
            return;
        }

        if state.chunks.len() >= state.max_buffer_size
            && !state.chunks.contains_key(&chunk.sequence_number)
        {
            state.evict_oldest();
        }

        if seq != state.expected_sequence {
            state.total_chunks_reordered += 1;
        }
        state.lost.remove(&seq);
        state.chunks.insert(seq, chunk);
    }

    /// Next chunk in order, skipping a gap that has timed out or was given up
    pub fn get_next_ordered_chunk(&self) -> Option<AudioChunk> {
        self.state.lock().next_ordered(Instant::now())
    }

    /// Up to `max_chunks` chunks from the expected sequence
    pub fn get_ordered_chunks(&self, max_chunks: usize) -> Vec<AudioChunk> {
        let now = Instant::now();
        let mut state = self.state.lock();
        let mut chunks = Vec::with_capacity(max_chunks.min(state.chunks.len()));
        while chunks.len() < max_chunks {
            match state.next_ordered(now) {
                Some(chunk) => chunks.push(chunk),
                None => break,
            }
        }
        chunks
    }

    /// Record that the sender gave up on `sequence`; ordered output will not wait for it
    pub fn mark_lost(&self, sequence: u32) {
        let mut state = self.state.lock();
        if state.is_stale(sequence) || state.chunks.contains_key(&sequence) {
            return;
        }
        state.lost.insert(sequence);
    }

    /// Drain everything in sequence order, skipping over gaps
    pub fn flush_buffered_chunks(&self) -> Vec<AudioChunk> {
        let mut state = self.state.lock();
        let expected = state.expected_sequence;
        let mut chunks: Vec<AudioChunk> = state.chunks.drain().map(|(_, chunk)| chunk).collect();
        chunks.sort_by_key(|chunk| chunk.sequence_number.wrapping_sub(expected));

        if let Some(last) = chunks.last() {
            state.expected_sequence = last.sequence_number.wrapping_add(1);
        }
        state.prune_lost();
        chunks
    }

    /// Sequence numbers missing between the lowest and highest buffered chunk
    pub fn detect_sequence_gaps(&self) -> Vec<u32> {
        let mut state = self.state.lock();
        let (Some(&min), Some(&max)) = (state.chunks.keys().min(), state.chunks.keys().max())
        else {
            return Vec::new();
        };

        let missing: Vec<u32> = (min..=max)
            .filter(|seq| !state.chunks.contains_key(seq))
            .collect();
        state.total_sequence_gaps += missing.len() as u64;
        missing
    }

    pub fn get_reorder_stats(&self) -> BTreeMap<String, f64> {
        let state = self.state.lock();
        let received = state.total_chunks_received as f64;

        let mut stats = BTreeMap::new();
        stats.insert("total_chunks_received".to_string(), received);
        stats.insert(
            "total_chunks_reordered".to_string(),
            state.total_chunks_reordered as f64,
        );
        stats.insert(
            "total_chunks_dropped".to_string(),
            state.total_chunks_dropped as f64,
        );
        stats.insert(
            "total_sequence_gaps".to_string(),
            state.total_sequence_gaps as f64,
        );
        stats.insert("current_buffer_size".to_string(), state.chunks.len() as f64);
        stats.insert(
            "expected_sequence_number".to_string(),
            state.expected_sequence as f64,
        );
        stats.insert("max_buffer_size".to_string(), state.max_buffer_size as f64);
        stats.insert(
            "reorder_timeout_ms".to_string(),
            state.reorder_timeout.as_millis() as f64,
        );
        if state.total_chunks_received > 0 {
            stats.insert(
                "reorder_rate".to_string(),
                state.total_chunks_reordered as f64 / received,
            );
            stats.insert(
                "drop_rate".to_string(),
                state.total_chunks_dropped as f64 / received,
            );
        }
        stats
    }

    /// Drop buffered chunks and expect sequence 0 again
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.chunks.clear();
        state.lost.clear();
        state.expected_sequence = 0;
    }

    pub fn set_expected_sequence(&self, sequence: u32) {
        self.state.lock().expected_sequence = sequence;
    }

    pub fn expected_sequence(&self) -> u32 {
        self.state.lock().expected_sequence
    }

    pub fn len(&self) -> usize {
        self.state.lock().chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for AudioChunkReorderBuffer {
    fn default() -> Self {
        Self::new(50, 500)
    }
}
