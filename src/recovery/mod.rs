//! Packet loss detection, retransmission and chunk reordering

pub mod detector;
pub mod predictive;
pub mod reorder;
pub mod system;

pub use detector::{PacketInfo, PacketLossDetector, PacketLossStats};
pub use predictive::IntelligentChunkReorderer;
pub use reorder::AudioChunkReorderBuffer;
pub use system::PacketRecoverySystem;
