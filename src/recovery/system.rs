//! Packet recovery: loss detection, retransmission and reordering
//!
//! The outgoing path assigns packet ids and retains a copy of every sent
//! chunk until it is acknowledged, abandoned or too old. The incoming path
//! runs chunks through the reorder buffer, which stops waiting for a packet
//! once it is abandoned.

use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use super::detector::PacketLossDetector;
use super::reorder::AudioChunkReorderBuffer;
use crate::config::RecoveryConfig;
use crate::constants::{FIRST_PACKET_ID, ORDERED_BATCH_SIZE, SENT_CHUNK_RETENTION_SECS};
use crate::streaming::AudioChunk;

struct SentChunk {
    chunk: AudioChunk,
    sent_at: Instant,
    retransmitted: bool,
}

/// Combines a [`PacketLossDetector`] and an [`AudioChunkReorderBuffer`]
pub struct PacketRecoverySystem {
    detector: PacketLossDetector,
    reorder: AudioChunkReorderBuffer,
    sent_chunks: Mutex<HashMap<u32, SentChunk>>,
    enabled: AtomicBool,
    aggressiveness: Mutex<f32>,
    next_packet_id: AtomicU32,
    total_chunks_processed: AtomicU64,
    total_retransmissions: AtomicU64,
    total_recovered_chunks: AtomicU64,
}

impl PacketRecoverySystem {
    pub fn new(config: &RecoveryConfig) -> Self {
        tracing::info!(
            "Packet recovery initialized: {}ms timeout, {} retries, reorder buffer {} / {}ms",
            config.packet_timeout_ms,
            config.max_retries,
            config.reorder_buffer_size,
            config.reorder_timeout_ms
        );
        let reorder =
            AudioChunkReorderBuffer::new(config.reorder_buffer_size, config.reorder_timeout_ms);
        reorder.set_expected_sequence(FIRST_PACKET_ID);

        Self {
            detector: PacketLossDetector::new(config.packet_timeout_ms, config.max_retries),
            reorder,
            sent_chunks: Mutex::new(HashMap::new()),
            enabled: AtomicBool::new(true),
            aggressiveness: Mutex::new(0.5),
            next_packet_id: AtomicU32::new(FIRST_PACKET_ID),
            total_chunks_processed: AtomicU64::new(0),
            total_retransmissions: AtomicU64::new(0),
            total_recovered_chunks: AtomicU64::new(0),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Register a chunk about to be sent. Returns its packet id, or 0 when disabled.
    pub fn process_outgoing_chunk(&self, chunk: &AudioChunk) -> u32 {
        if !self.is_enabled() {
            return 0;
        }

        let packet_id = self.next_packet_id.fetch_add(1, Ordering::Relaxed);
        let mut retained = chunk.clone();
        retained.sequence_number = packet_id;

        self.sent_chunks.lock().insert(
            packet_id,
            SentChunk {
                chunk: retained,
                sent_at: Instant::now(),
                retransmitted: false,
            },
        );
        self.detector
            .register_sent_packet(packet_id, chunk.data.len() * std::mem::size_of::<f32>());
        self.total_chunks_processed.fetch_add(1, Ordering::Relaxed);
        packet_id
    }

    /// Feed a received chunk and return whatever is now in order
    pub fn process_incoming_chunk(&self, chunk: AudioChunk) -> Vec<AudioChunk> {
        if !self.is_enabled() {
            return vec![chunk];
        }

        self.reorder.add_chunk(chunk);
        self.total_chunks_processed.fetch_add(1, Ordering::Relaxed);
        self.reorder.get_ordered_chunks(ORDERED_BATCH_SIZE)
    }

    pub fn acknowledge_packet(&self, packet_id: u32) {
        if !self.is_enabled() {
            return;
        }

        self.detector.acknowledge_packet(packet_id);
        if let Some(sent) = self.sent_chunks.lock().remove(&packet_id) {
            if sent.retransmitted {
                self.total_recovered_chunks.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Chunks that timed out and still have retries left. Packets out of
    /// retries are abandoned and forwarded to the reorder buffer as gaps.
    pub fn get_retransmission_queue(&self) -> Vec<AudioChunk> {
        if !self.is_enabled() {
            return Vec::new();
        }

        let lost = self.detector.detect_lost_packets();
        let mut sent_chunks = self.sent_chunks.lock();
        let mut retransmit = Vec::new();

        for packet_id in lost {
            if !sent_chunks.contains_key(&packet_id) {
                continue;
            }
            if self.detector.mark_for_retransmission(packet_id) {
                if let Some(sent) = sent_chunks.get_mut(&packet_id) {
                    sent.retransmitted = true;
                    retransmit.push(sent.chunk.clone());
                }
                self.total_retransmissions.fetch_add(1, Ordering::Relaxed);
            } else {
                sent_chunks.remove(&packet_id);
                self.reorder.mark_lost(packet_id);
            }
        }

        let retention = Duration::from_secs(SENT_CHUNK_RETENTION_SECS);
        let now = Instant::now();
        sent_chunks.retain(|_, sent| now.saturating_duration_since(sent.sent_at) <= retention);

        if !retransmit.is_empty() {
            tracing::debug!("Retransmitting {} chunks", retransmit.len());
        }
        retransmit
    }

    /// Retune timeout and retries for current network conditions
    ///
    /// `loss_rate` is a fraction (0.0 - 1.0), not a percentage.
    pub fn update_recovery_params(&self, loss_rate: f32, latency_ms: f32, jitter_ms: f32) {
        if !self.is_enabled() {
            return;
        }

        let timeout_ms = (latency_ms * 2.0 + jitter_ms * 3.0).clamp(500.0, 5000.0) as u64;
        let max_retries = if loss_rate > 0.05 {
            5
        } else if loss_rate > 0.02 {
            4
        } else {
            3
        };

        self.detector.set_packet_timeout(timeout_ms);
        self.detector.set_max_retries(max_retries);
        tracing::debug!(
            "Adapted recovery parameters: timeout={}ms, max_retries={}",
            timeout_ms,
            max_retries
        );
    }

    pub fn set_recovery_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
        tracing::info!(
            "Packet recovery {}",
            if enabled { "enabled" } else { "disabled" }
        );
    }

    pub fn set_recovery_aggressiveness(&self, level: f32) {
        let level = level.clamp(0.0, 1.0);
        *self.aggressiveness.lock() = level;
        tracing::info!("Recovery aggressiveness set to {}", level);
    }

    /// Drain the reorder buffer regardless of gaps
    pub fn flush(&self) -> Vec<AudioChunk> {
        self.reorder.flush_buffered_chunks()
    }

    pub fn loss_detector(&self) -> &PacketLossDetector {
        &self.detector
    }

    pub fn reorder_buffer(&self) -> &AudioChunkReorderBuffer {
        &self.reorder
    }

    pub fn get_recovery_stats(&self) -> BTreeMap<String, f64> {
        let loss = self.detector.get_packet_loss_stats();
        let reorder = self.reorder.get_reorder_stats();

        let mut stats = BTreeMap::new();
        stats.insert("total_packets_sent".to_string(), loss.total_packets_sent as f64);
        stats.insert("total_packets_lost".to_string(), loss.total_packets_lost as f64);
        stats.insert(
            "total_packets_recovered".to_string(),
            loss.total_packets_recovered as f64,
        );
        stats.insert("current_loss_rate".to_string(), loss.current_loss_rate as f64);
        stats.insert("average_loss_rate".to_string(), loss.average_loss_rate as f64);

        for key in ["total_chunks_reordered", "total_chunks_dropped", "reorder_rate"] {
            stats.insert(key.to_string(), reorder.get(key).copied().unwrap_or(0.0));
        }

        stats.insert(
            "total_chunks_processed".to_string(),
            self.total_chunks_processed.load(Ordering::Relaxed) as f64,
        );
        stats.insert(
            "total_retransmissions".to_string(),
            self.total_retransmissions.load(Ordering::Relaxed) as f64,
        );
        stats.insert(
            "total_recovered_chunks".to_string(),
            self.total_recovered_chunks.load(Ordering::Relaxed) as f64,
        );
        stats.insert(
            "recovery_enabled".to_string(),
            if self.is_enabled() { 1.0 } else { 0.0 },
        );
        stats.insert(
            "recovery_aggressiveness".to_string(),
            *self.aggressiveness.lock() as f64,
        );

        let effectiveness = if loss.total_packets_lost > 0 {
            loss.total_packets_recovered as f64 / loss.total_packets_lost as f64
        } else {
            1.0
        };
        stats.insert("recovery_effectiveness".to_string(), effectiveness);
        stats
    }
}

impl Default for PacketRecoverySystem {
    fn default() -> Self {
        Self::new(&RecoveryConfig::default())
    }
}
