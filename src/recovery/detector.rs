//! Timeout-based packet loss detection
//!
//! A packet lives in one of two sets: `pending` while waiting for an
//! acknowledgement, and `awaiting` once it has timed out and is waiting for
//! a retransmission decision. Moving between the sets is what guarantees a
//! timed-out packet is reported lost exactly once per attempt.

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use crate::constants::LOSS_RATE_WINDOW;

/// Sent packet bookkeeping
#[derive(Debug, Clone, PartialEq)]
pub struct PacketInfo {
    pub sequence_number: u32,
    pub timestamp: Instant,
    pub data_size: usize,
    pub acknowledged: bool,
    pub retry_count: u32,
}

impl PacketInfo {
    pub fn new(sequence_number: u32, data_size: usize) -> Self {
        Self {
            sequence_number,
            timestamp: Instant::now(),
            data_size,
            acknowledged: false,
            retry_count: 0,
        }
    }
}

/// Loss counters and rates
#[derive(Debug, Clone)]
pub struct PacketLossStats {
    pub total_packets_sent: u64,
    pub total_packets_lost: u64,
    pub total_retransmissions: u64,
    pub total_packets_recovered: u64,
    /// lost / sent, 0.0 - 1.0
    pub current_loss_rate: f32,
    /// Mean of the last 50 loss rates
    pub average_loss_rate: f32,
    pub last_update: Instant,
}

impl Default for PacketLossStats {
    fn default() -> Self {
        Self {
            total_packets_sent: 0,
            total_packets_lost: 0,
            total_retransmissions: 0,
            total_packets_recovered: 0,
            current_loss_rate: 0.0,
            average_loss_rate: 0.0,
            last_update: Instant::now(),
        }
    }
}

struct DetectorState {
    pending: HashMap<u32, PacketInfo>,
    awaiting: HashMap<u32, PacketInfo>,
    stats: PacketLossStats,
    recent_loss_rates: VecDeque<f32>,
    timeout: Duration,
    max_retries: u32,
}

impl DetectorState {
    fn update_loss_rate(&mut self) {
        if self.stats.total_packets_sent == 0 {
            self.stats.current_loss_rate = 0.0;
            return;
        }

        self.stats.current_loss_rate =
            self.stats.total_packets_lost as f32 / self.stats.total_packets_sent as f32;
        self.recent_loss_rates.push_back(self.stats.current_loss_rate);
        while self.recent_loss_rates.len() > LOSS_RATE_WINDOW {
            self.recent_loss_rates.pop_front();
        }
        self.stats.average_loss_rate =
            self.recent_loss_rates.iter().sum::<f32>() / self.recent_loss_rates.len() as f32;
        self.stats.last_update = Instant::now();
    }
}

/// Tracks sent packets and reports the ones not acknowledged in time
pub struct PacketLossDetector {
    state: Mutex<DetectorState>,
}

impl PacketLossDetector {
    pub fn new(timeout_ms: u64, max_retries: u32) -> Self {
        tracing::debug!(
            "Packet loss detector: {}ms timeout, {} max retries",
            timeout_ms,
            max_retries
        );
        Self {
            state: Mutex::new(DetectorState {
                pending: HashMap::new(),
                awaiting: HashMap::new(),
                stats: PacketLossStats::default(),
                recent_loss_rates: VecDeque::with_capacity(LOSS_RATE_WINDOW),
                timeout: Duration::from_millis(timeout_ms),
                max_retries,
            }),
        }
    }

    pub fn register_sent_packet(&self, sequence_number: u32, data_size: usize) {
        let mut state = self.state.lock();
        state
            .pending
            .insert(sequence_number, PacketInfo::new(sequence_number, data_size));
        state.stats.total_packets_sent += 1;
    }

    /// Returns whether the packet was still tracked
    pub fn acknowledge_packet(&self, sequence_number: u32) -> bool {
        let mut state = self.state.lock();
        let packet = match state.pending.remove(&sequence_number) {
            Some(packet) => packet,
            None => match state.awaiting.remove(&sequence_number) {
                Some(packet) => packet,
                None => return false,
            },
        };

        if packet.retry_count > 0 {
            state.stats.total_packets_recovered += 1;
        }
        true
    }

    /// Move timed-out packets to the retransmission set and return their numbers
    pub fn detect_lost_packets(&self) -> Vec<u32> {
        let mut state = self.state.lock();
        let now = Instant::now();
        let timeout = state.timeout;

        let mut lost: Vec<u32> = state
            .pending
            .iter()
            .filter(|(_, p)| now.saturating_duration_since(p.timestamp) > timeout)
            .map(|(&seq, _)| seq)
            .collect();
        lost.sort_unstable();

        for seq in &lost {
            if let Some(packet) = state.pending.remove(seq) {
                state.awaiting.insert(*seq, packet);
            }
        }

        if !lost.is_empty() {
            state.stats.total_packets_lost += lost.len() as u64;
            state.update_loss_rate();
            tracing::debug!("Detected {} lost packets", lost.len());
        }
        lost
    }

    /// Schedule a lost packet for another attempt. `false` means it was abandoned.
    pub fn mark_for_retransmission(&self, sequence_number: u32) -> bool {
        let mut state = self.state.lock();
        let Some(mut packet) = state.awaiting.remove(&sequence_number) else {
            return false;
        };

        if packet.retry_count < state.max_retries {
            packet.retry_count += 1;
            packet.timestamp = Instant::now();
            state.pending.insert(sequence_number, packet);
            state.stats.total_retransmissions += 1;
            true
        } else {
            tracing::debug!(
                "Packet {} abandoned after {} retries",
                sequence_number,
                packet.retry_count
            );
            false
        }
    }

    pub fn get_packet_loss_stats(&self) -> PacketLossStats {
        self.state.lock().stats.clone()
    }

    /// Forget all packets and counters
    pub fn reset_stats(&self) {
        let mut state = self.state.lock();
        state.stats = PacketLossStats::default();
        state.recent_loss_rates.clear();
        state.pending.clear();
        state.awaiting.clear();
        tracing::info!("Packet loss detector statistics reset");
    }

    pub fn set_packet_timeout(&self, timeout_ms: u64) {
        self.state.lock().timeout = Duration::from_millis(timeout_ms);
        tracing::debug!("Packet timeout set to {}ms", timeout_ms);
    }

    pub fn packet_timeout(&self) -> Duration {
        self.state.lock().timeout
    }

    pub fn set_max_retries(&self, max_retries: u32) {
        self.state.lock().max_retries = max_retries;
        tracing::debug!("Max retries set to {}", max_retries);
    }

    pub fn max_retries(&self) -> u32 {
        self.state.lock().max_retries
    }

    pub fn is_loss_rate_acceptable(&self, threshold: f32) -> bool {
        self.state.lock().stats.current_loss_rate <= threshold
    }

    /// Packets sent and not yet acknowledged or timed out
    pub fn pending_count(&self) -> usize {
        self.state.lock().pending.len()
    }
}

impl Default for PacketLossDetector {
    fn default() -> Self {
        Self::new(1000, 3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_acknowledged_packets_are_not_lost() {
        let detector = PacketLossDetector::new(10, 3);
        detector.register_sent_packet(1, 100);
        detector.register_sent_packet(2, 100);
        assert!(detector.acknowledge_packet(1));

        thread::sleep(Duration::from_millis(20));
        assert_eq!(detector.detect_lost_packets(), vec![2]);

        let stats = detector.get_packet_loss_stats();
        assert_eq!(stats.total_packets_sent, 2);
        assert_eq!(stats.total_packets_lost, 1);
        assert_eq!(stats.current_loss_rate, 0.5);
    }

    #[test]
    fn test_loss_counted_exactly_once() {
        let detector = PacketLossDetector::new(5, 3);
        detector.register_sent_packet(7, 10);
        thread::sleep(Duration::from_millis(15));

        assert_eq!(detector.detect_lost_packets(), vec![7]);
        thread::sleep(Duration::from_millis(15));
        assert!(detector.detect_lost_packets().is_empty());
        assert_eq!(detector.get_packet_loss_stats().total_packets_lost, 1);
        assert_eq!(detector.pending_count(), 0);
    }

    #[test]
    fn test_retransmission_is_bounded() {
        let detector = PacketLossDetector::new(1, 2);
        detector.register_sent_packet(3, 10);

        for _ in 0..2 {
            thread::sleep(Duration::from_millis(5));
            assert_eq!(detector.detect_lost_packets(), vec![3]);
            assert!(detector.mark_for_retransmission(3));
        }

        thread::sleep(Duration::from_millis(5));
        assert_eq!(detector.detect_lost_packets(), vec![3]);
        assert!(!detector.mark_for_retransmission(3));
        assert!(!detector.mark_for_retransmission(3));

        // Late ack of an abandoned packet changes nothing
        assert!(!detector.acknowledge_packet(3));
        let stats = detector.get_packet_loss_stats();
        assert_eq!(stats.total_retransmissions, 2);
        assert_eq!(stats.total_packets_recovered, 0);
    }

    #[test]
    fn test_ack_after_retransmission_counts_recovery() {
        let detector = PacketLossDetector::new(1, 3);
        detector.register_sent_packet(9, 10);
        thread::sleep(Duration::from_millis(5));
        detector.detect_lost_packets();
        assert!(detector.mark_for_retransmission(9));

        assert!(detector.acknowledge_packet(9));
        assert_eq!(detector.get_packet_loss_stats().total_packets_recovered, 1);
    }

    #[test]
    fn test_unknown_packet() {
        let detector = PacketLossDetector::default();
        assert!(!detector.mark_for_retransmission(42));
        assert!(!detector.acknowledge_packet(42));
        assert!(detector.is_loss_rate_acceptable(0.05));
    }

    #[test]
    fn test_reset() {
        let detector = PacketLossDetector::new(1, 3);
        detector.register_sent_packet(1, 10);
        thread::sleep(Duration::from_millis(5));
        detector.detect_lost_packets();
        assert!(!detector.is_loss_rate_acceptable(0.05));

        detector.reset_stats();
        assert_eq!(detector.get_packet_loss_stats().total_packets_sent, 0);
        assert!(detector.is_loss_rate_acceptable(0.05));
    }
}
