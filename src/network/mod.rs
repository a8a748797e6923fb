//! Network condition monitoring and streaming adaptation

pub mod adapter;
pub mod metrics;
pub mod monitor;

pub use adapter::{AdaptationRecord, AdaptiveStreamingParams, NetworkAwareStreamingAdapter};
pub use metrics::{NetworkMetrics, NetworkQuality};
pub use monitor::{
    ManualNetworkProbe, NetworkConditionChange, NetworkMonitor, NetworkProbe, UdpConnectProbe,
};
