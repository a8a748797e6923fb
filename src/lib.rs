//! # Adaptive Audio Streamer
//!
//! Real-time audio streaming core: chunking, prioritized scheduling under
//! load, packet loss recovery and closed-loop quality adaptation.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │              AdvancedStreamingOptimizer (streaming::advanced)           │
//! │                                                                         │
//! │   raw f32 ──► StreamingOptimizer ──► PacketRecoverySystem ──► resize    │
//! │               (adaptive chunks)      (packet ids, retained     │        │
//! │                                       copies, reordering)      ▼        │
//! │                                                     UltraLowLatency     │
//! │                                                     Processor (opt.)    │
//! │                                                                │        │
//! │                                                                ▼        │
//! │                                                          Vec<AudioChunk>│
//! └───────┬──────────────────────┬───────────────────────┬──────────────────┘
//!         │                      │                       │
//!         ▼                      ▼                       ▼
//! ┌───────────────┐   ┌─────────────────────┐   ┌─────────────────────────┐
//! │NetworkMonitor │──►│ NetworkAware        │   │ LoadBalancedPipeline    │
//! │ (thread)      │   │ StreamingAdapter    │   │  ┌──────────────────┐   │
//! │ latency/jitter│   └─────────────────────┘   │  │PriorityJobQueue  │   │
//! │ tier changes ─┼──►┌─────────────────────┐   │  │ CRIT>HIGH>NORM.. │   │
//! └───────────────┘   │QualityDegradation   │   │  └────────┬─────────┘   │
//!                     │Manager              │   │           ▼             │
//!                     └─────────▲───────────┘   │   worker threads (N)    │
//!                               │               │           ▲             │
//!                     ┌─────────┴───────────┐   │  ┌────────┴─────────┐   │
//!                     │AdaptiveQuality      │   │  │ResourceMonitor   │   │
//!                     │Controller (thread)  │   │  │ (thread)         │   │
//!                     └─────────────────────┘   │  └──────────────────┘   │
//!                                               └─────────────────────────┘
//! ```

pub mod background;
pub mod callbacks;
pub mod config;
pub mod error;
pub mod network;
pub mod quality;
pub mod recovery;
pub mod scheduler;
pub mod streaming;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    /// Sample rate the orchestrator chunks at
    pub const DEFAULT_SAMPLE_RATE: u32 = 16000;

    /// Channel count the orchestrator chunks at
    pub const DEFAULT_CHANNELS: u16 = 1;

    /// Smoothing factor for every exponential moving average
    pub const EMA_ALPHA: f64 = 0.1;

    /// Relative difference a new parameter set must exceed before adoption
    pub const DEFAULT_HYSTERESIS_THRESHOLD: f32 = 0.1;

    /// Change in CPU or memory usage that fires resource callbacks
    pub const RESOURCE_CHANGE_THRESHOLD: f32 = 0.1;

    /// Default bound on queued jobs across all priorities
    pub const DEFAULT_MAX_QUEUE_SIZE: usize = 1000;

    /// Default worker thread count
    pub const DEFAULT_WORKER_THREADS: usize = 4;

    /// Bounded history lengths
    pub const NETWORK_HISTORY_SIZE: usize = 60;
    pub const ADAPTATION_HISTORY_SIZE: usize = 100;
    pub const QUALITY_HISTORY_SIZE: usize = 100;
    pub const PROCESSING_TIME_WINDOW: usize = 100;
    pub const LOSS_RATE_WINDOW: usize = 50;

    /// First packet id assigned by packet recovery; 0 means "no id"
    pub const FIRST_PACKET_ID: u32 = 1;

    /// Ordered chunks handed out per incoming chunk
    pub const ORDERED_BATCH_SIZE: usize = 10;

    /// Retained copies of sent chunks older than this are discarded
    pub const SENT_CHUNK_RETENTION_SECS: u64 = 30;
}
