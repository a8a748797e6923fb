//! Chunking, buffering and the streaming orchestrator
//!
//! - `chunk`: the unit of audio passed between components
//! - `optimizer`: latency-driven chunking
//! - `buffer`: bounded drop-oldest chunk FIFO
//! - `ultra_low_latency`: send-time stamping and latency tracking
//! - `advanced`: orchestrator tying every subsystem together

pub mod advanced;
pub mod buffer;
pub mod chunk;
pub mod optimizer;
pub mod ultra_low_latency;

pub use advanced::{
    AdvancedStreamingOptimizer, ComponentProbes, ManualAdjustment, StreamCounters,
    StreamingPerformanceMetrics,
};
pub use buffer::StreamingAudioBuffer;
pub use chunk::AudioChunk;
pub use optimizer::StreamingOptimizer;
pub use ultra_low_latency::{UltraLowLatencyProcessor, MIN_VIABLE_CHUNK_SAMPLES};
