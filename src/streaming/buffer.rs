//! Bounded chunk FIFO for audio handed between threads
//!
//! Backed by a lock-free [`ArrayQueue`]. When full, the oldest chunk is
//! dropped to make room so producers never block.

use crossbeam::queue::ArrayQueue;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use super::chunk::AudioChunk;

/// Drop-oldest FIFO of audio chunks
pub struct StreamingAudioBuffer {
    queue: ArrayQueue<AudioChunk>,
    /// Chunk taken off the queue by `peek_next_chunk` and not yet consumed
    peeked: Mutex<Option<AudioChunk>>,
    next_sequence: AtomicU32,
    overflow_count: AtomicUsize,
}

impl StreamingAudioBuffer {
    /// Create a buffer holding at most `max_chunks` chunks
    pub fn new(max_chunks: usize) -> Self {
        Self {
            queue: ArrayQueue::new(max_chunks.max(1)),
            peeked: Mutex::new(None),
            next_sequence: AtomicU32::new(0),
            overflow_count: AtomicUsize::new(0),
        }
    }

    /// Queue a chunk. Sequence number 0 is replaced with the next local one.
    pub fn add_chunk(&self, mut chunk: AudioChunk) {
        if chunk.sequence_number == 0 {
            chunk.sequence_number = self.next_sequence.fetch_add(1, Ordering::Relaxed);
        }

        if self.queue.force_push(chunk).is_some() {
            self.overflow_count.fetch_add(1, Ordering::Relaxed);
            tracing::warn!("Audio buffer overflow, dropping oldest chunk");
        }
    }

    pub fn get_next_chunk(&self) -> Option<AudioChunk> {
        let mut peeked = self.peeked.lock();
        peeked.take().or_else(|| self.queue.pop())
    }

    /// Up to `max_chunks` chunks, oldest first
    pub fn get_chunks(&self, max_chunks: usize) -> Vec<AudioChunk> {
        let mut peeked = self.peeked.lock();
        let mut chunks = Vec::with_capacity(max_chunks.min(self.queue.len() + 1));
        if max_chunks == 0 {
            return chunks;
        }
        if let Some(chunk) = peeked.take() {
            chunks.push(chunk);
        }
        while chunks.len() < max_chunks {
            match self.queue.pop() {
                Some(chunk) => chunks.push(chunk),
                None => break,
            }
        }
        chunks
    }

    /// Copy of the chunk `get_next_chunk` would return
    pub fn peek_next_chunk(&self) -> Option<AudioChunk> {
        let mut peeked = self.peeked.lock();
        if peeked.is_none() {
            *peeked = self.queue.pop();
        }
        peeked.clone()
    }

    pub fn len(&self) -> usize {
        let peeked = usize::from(self.peeked.lock().is_some());
        self.queue.len() + peeked
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    pub fn clear(&self) {
        let mut peeked = self.peeked.lock();
        *peeked = None;
        while self.queue.pop().is_some() {}
    }

    /// Fill level in percent
    pub fn utilization(&self) -> f32 {
        self.len() as f32 / self.capacity() as f32 * 100.0
    }

    /// Get overflow count
    pub fn overflow_count(&self) -> usize {
        self.overflow_count.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(seq: u32) -> AudioChunk {
        AudioChunk::new(vec![seq as f32; 4], seq)
    }

    #[test]
    fn test_fifo_order() {
        let buffer = StreamingAudioBuffer::new(4);
        buffer.add_chunk(chunk(5));
        buffer.add_chunk(chunk(6));
        assert_eq!(buffer.len(), 2);

        assert_eq!(buffer.get_next_chunk().unwrap().sequence_number, 5);
        assert_eq!(buffer.get_next_chunk().unwrap().sequence_number, 6);
        assert!(buffer.get_next_chunk().is_none());
    }

    #[test]
    fn test_overflow_drops_oldest() {
        let buffer = StreamingAudioBuffer::new(2);
        for seq in 1..=3 {
            buffer.add_chunk(chunk(seq));
        }
        assert_eq!(buffer.overflow_count(), 1);
        let seqs: Vec<u32> = buffer
            .get_chunks(10)
            .iter()
            .map(|c| c.sequence_number)
            .collect();
        assert_eq!(seqs, vec![2, 3]);
    }

    #[test]
    fn test_zero_sequence_is_numbered() {
        let buffer = StreamingAudioBuffer::new(4);
        buffer.add_chunk(chunk(0));
        buffer.add_chunk(chunk(0));
        buffer.add_chunk(chunk(0));
        let seqs: Vec<u32> = buffer
            .get_chunks(3)
            .iter()
            .map(|c| c.sequence_number)
            .collect();
        assert_eq!(seqs, vec![0, 1, 2]);
    }

    #[test]
    fn test_peek_does_not_consume() {
        let buffer = StreamingAudioBuffer::new(4);
        buffer.add_chunk(chunk(7));
        buffer.add_chunk(chunk(8));

        assert_eq!(buffer.peek_next_chunk().unwrap().sequence_number, 7);
        assert_eq!(buffer.peek_next_chunk().unwrap().sequence_number, 7);
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.utilization(), 50.0);

        assert_eq!(buffer.get_next_chunk().unwrap().sequence_number, 7);
        buffer.clear();
        assert!(buffer.is_empty());
    }
}
