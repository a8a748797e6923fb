//! Prioritized job scheduling under load
//!
//! - `job`: job description and priorities
//! - `queue`: bounded multi-tier priority queue
//! - `resources`: CPU/memory sampling
//! - `pipeline`: worker pool with resource-aware admission

pub mod job;
pub mod pipeline;
pub mod queue;
pub mod resources;

pub use job::{JobError, JobId, JobTask, ProcessingJob, ProcessingJobType, ProcessingPriority};
pub use pipeline::{LoadBalancedPipeline, ProcessingStats};
pub use queue::{PriorityJobQueue, StarvationPolicy};
pub use resources::{
    ManualResourceProbe, ResourceMonitor, ResourceProbe, ResourceSample, SysinfoProbe,
    SystemResources,
};
