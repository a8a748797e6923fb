//! Processing jobs and their priorities

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Scheduling priority, most urgent first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ProcessingPriority {
    /// Live audio with a hard deadline
    Critical,
    /// Interactive requests with low latency requirements
    High,
    Normal,
    /// Batch work that can be delayed
    Low,
    /// Runs only when resources are available
    Background,
}

impl ProcessingPriority {
    /// All priorities in dequeue order
    pub const ALL: [ProcessingPriority; 5] = [
        ProcessingPriority::Critical,
        ProcessingPriority::High,
        ProcessingPriority::Normal,
        ProcessingPriority::Low,
        ProcessingPriority::Background,
    ];

    pub(crate) fn index(self) -> usize {
        self as usize
    }

    /// Stats key prefix
    pub fn name(self) -> &'static str {
        match self {
            ProcessingPriority::Critical => "critical",
            ProcessingPriority::High => "high",
            ProcessingPriority::Normal => "normal",
            ProcessingPriority::Low => "low",
            ProcessingPriority::Background => "background",
        }
    }

    /// Whether this priority is skipped while resources are constrained
    pub fn is_deferrable(self) -> bool {
        matches!(self, ProcessingPriority::Low | ProcessingPriority::Background)
    }
}

/// Kind of work a job performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProcessingJobType {
    RealTimeStream,
    InteractiveRequest,
    BatchTranscription,
    BackgroundTask,
    SystemTask,
}

/// Job identifier. Issued ids start at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(pub u64);

impl JobId {
    /// Placeholder for jobs that have not been submitted yet
    pub const UNASSIGNED: JobId = JobId(0);

    pub fn is_assigned(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Failure reported by a job task
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct JobError(pub String);

impl From<&str> for JobError {
    fn from(msg: &str) -> Self {
        JobError(msg.to_string())
    }
}

impl From<String> for JobError {
    fn from(msg: String) -> Self {
        JobError(msg)
    }
}

/// Work executed by a pipeline worker
pub type JobTask = Box<dyn FnOnce() -> Result<(), JobError> + Send + 'static>;

/// A unit of deferred work
pub struct ProcessingJob {
    pub job_id: JobId,
    pub job_type: ProcessingJobType,
    /// `None` means the pipeline picks the priority mapped to `job_type`
    pub priority: Option<ProcessingPriority>,
    pub submission_time: Instant,
    pub deadline: Instant,
    pub description: String,
    pub estimated_processing_time_ms: u32,
    /// 1 (light) to 10 (heavy)
    pub resource_requirement: u8,
    pub(crate) task: JobTask,
}

impl ProcessingJob {
    pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(30);

    /// Create a job with a 30 s deadline, 100 ms estimate and medium weight
    pub fn new<F>(job_type: ProcessingJobType, task: F) -> Self
    where
        F: FnOnce() -> Result<(), JobError> + Send + 'static,
    {
        let now = Instant::now();
        Self {
            job_id: JobId::UNASSIGNED,
            job_type,
            priority: None,
            submission_time: now,
            deadline: now + Self::DEFAULT_DEADLINE,
            description: String::new(),
            estimated_processing_time_ms: 100,
            resource_requirement: 5,
            task: Box::new(task),
        }
    }

    pub fn with_priority(mut self, priority: ProcessingPriority) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Deadline relative to the submission time
    pub fn with_deadline(mut self, after: Duration) -> Self {
        self.deadline = self.submission_time + after;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_estimate_ms(mut self, estimate_ms: u32) -> Self {
        self.estimated_processing_time_ms = estimate_ms;
        self
    }

    pub fn with_resource_requirement(mut self, requirement: u8) -> Self {
        self.resource_requirement = requirement.clamp(1, 10);
        self
    }

    /// Priority used for queueing, falling back to `Normal`
    pub fn effective_priority(&self) -> ProcessingPriority {
        self.priority.unwrap_or(ProcessingPriority::Normal)
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now > self.deadline
    }
}

impl fmt::Debug for ProcessingJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessingJob")
            .field("job_id", &self.job_id)
            .field("job_type", &self.job_type)
            .field("priority", &self.priority)
            .field("description", &self.description)
            .field("estimated_processing_time_ms", &self.estimated_processing_time_ms)
            .field("resource_requirement", &self.resource_requirement)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_order() {
        assert!(ProcessingPriority::Critical < ProcessingPriority::High);
        assert!(ProcessingPriority::Low < ProcessingPriority::Background);
        assert_eq!(ProcessingPriority::ALL[0], ProcessingPriority::Critical);
        assert!(ProcessingPriority::Background.is_deferrable());
        assert!(!ProcessingPriority::Normal.is_deferrable());
    }

    #[test]
    fn test_job_builder() {
        let job = ProcessingJob::new(ProcessingJobType::SystemTask, || Ok(()))
            .with_priority(ProcessingPriority::High)
            .with_deadline(Duration::from_millis(200))
            .with_resource_requirement(42);

        assert_eq!(job.job_id, JobId::UNASSIGNED);
        assert_eq!(job.effective_priority(), ProcessingPriority::High);
        assert_eq!(job.resource_requirement, 10);
        assert!(!job.is_expired(job.submission_time));
        assert!(job.is_expired(job.submission_time + Duration::from_millis(201)));
    }
}
