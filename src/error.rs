//! Error types for the streaming core

use thiserror::Error;

/// Main error type for the crate
#[derive(Error, Debug)]
pub enum Error {
    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Stream error: {0}")]
    Stream(#[from] StreamError),

    #[error("Quality error: {0}")]
    Quality(#[from] QualityError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("Config serialize error: {0}")]
    TomlSer(#[from] toml::ser::Error),
}

/// Job scheduling errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("Job queue full ({0} jobs)")]
    QueueFull(usize),

    #[error("Processing pipeline is not active")]
    PipelineInactive,

    #[error("Processing pipeline is not available")]
    PipelineUnavailable,

    #[error("Failed to spawn thread: {0}")]
    Spawn(String),
}

/// Network measurement errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Probe failed: {0}")]
    ProbeFailed(String),

    #[error("Socket error: {0}")]
    Socket(#[from] std::io::Error),
}

/// Streaming errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StreamError {
    #[error("Empty audio buffer")]
    EmptyInput,

    #[error("Invalid sample at index {index}: {value}")]
    InvalidSample { index: usize, value: f32 },

    #[error("Optimizer is not initialized")]
    NotInitialized,

    #[error("Optimizer is not running")]
    NotRunning,

    #[error("Unknown adjustment type: {0}")]
    UnknownAdjustment(String),
}

/// Quality control errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QualityError {
    #[error("Unknown quality level: {0}")]
    UnknownLevel(i32),
}

/// Result type alias for the crate
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::from(SchedulerError::QueueFull(1000));
        assert_eq!(err.to_string(), "Scheduler error: Job queue full (1000 jobs)");

        let err = Error::from(StreamError::InvalidSample { index: 3, value: f32::NAN });
        assert!(err.to_string().contains("index 3"));
    }

    #[test]
    fn test_config_error_display() {
        let err = Error::Config("num_worker_threads must be > 0".into());
        assert_eq!(
            err.to_string(),
            "Configuration error: num_worker_threads must be > 0"
        );
    }
}
