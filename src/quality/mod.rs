//! Audio quality levels and closed-loop degradation control

pub mod controller;
pub mod manager;
pub mod params;

pub use controller::AdaptiveQualityController;
pub use manager::{QualityChange, QualityDegradationManager, QualityRecord};
pub use params::{AudioQualityLevel, AudioQualityParams};
