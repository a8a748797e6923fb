//! Load-balanced processing pipeline
//!
//! N worker threads drain a [`PriorityJobQueue`]. Before running a job a
//! worker checks its deadline and, for deferrable priorities, whether the
//! [`ResourceMonitor`] reports the machine as constrained.

use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::job::{JobError, JobId, ProcessingJob, ProcessingJobType, ProcessingPriority};
use super::queue::PriorityJobQueue;
use super::resources::{ResourceMonitor, ResourceProbe, SysinfoProbe, SystemResources};
use crate::config::PipelineConfig;
use crate::constants::{EMA_ALPHA, PROCESSING_TIME_WINDOW};
use crate::error::SchedulerError;

/// Aggregate job statistics
#[derive(Debug, Clone)]
pub struct ProcessingStats {
    pub total_jobs_processed: u64,
    pub total_jobs_completed: u64,
    pub total_jobs_failed: u64,
    pub total_jobs_dropped: u64,
    pub total_jobs_skipped: u64,
    pub average_processing_time_ms: f64,
    pub average_queue_time_ms: f64,
    pub throughput_jobs_per_second: f64,
    pub last_update: Instant,
}

impl Default for ProcessingStats {
    fn default() -> Self {
        Self {
            total_jobs_processed: 0,
            total_jobs_completed: 0,
            total_jobs_failed: 0,
            total_jobs_dropped: 0,
            total_jobs_skipped: 0,
            average_processing_time_ms: 0.0,
            average_queue_time_ms: 0.0,
            throughput_jobs_per_second: 0.0,
            last_update: Instant::now(),
        }
    }
}

#[derive(Default)]
struct StatsState {
    stats: ProcessingStats,
    recent_processing_times: VecDeque<f64>,
}

/// Why a dequeued job was not run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Run,
    Expired,
    Deferred,
}

fn default_priorities() -> HashMap<ProcessingJobType, ProcessingPriority> {
    HashMap::from([
        (ProcessingJobType::RealTimeStream, ProcessingPriority::Critical),
        (ProcessingJobType::InteractiveRequest, ProcessingPriority::High),
        (ProcessingJobType::BatchTranscription, ProcessingPriority::Low),
        (ProcessingJobType::BackgroundTask, ProcessingPriority::Background),
        (ProcessingJobType::SystemTask, ProcessingPriority::Normal),
    ])
}

struct PipelineShared {
    queue: PriorityJobQueue,
    monitor: ResourceMonitor,
    num_workers: usize,
    active: AtomicBool,
    next_job_id: AtomicU64,
    total_jobs_rejected: AtomicU64,
    job_type_priorities: RwLock<HashMap<ProcessingJobType, ProcessingPriority>>,
    graceful_degradation: Arc<AtomicBool>,
    thresholds: Mutex<(f32, f32)>,
    stats: Mutex<StatsState>,
}

impl PipelineShared {
    fn priority_for(&self, job_type: ProcessingJobType) -> ProcessingPriority {
        self.job_type_priorities
            .read()
            .get(&job_type)
            .copied()
            .unwrap_or(ProcessingPriority::Normal)
    }

    fn admission(&self, job: &ProcessingJob) -> Admission {
        if job.is_expired(Instant::now()) {
            return Admission::Expired;
        }
        let priority = job.effective_priority();
        if priority == ProcessingPriority::Critical {
            return Admission::Run;
        }
        let (cpu, mem) = *self.thresholds.lock();
        if priority.is_deferrable() && self.monitor.is_resource_constrained(cpu, mem) {
            return Admission::Deferred;
        }
        Admission::Run
    }

    fn worker_loop(&self, worker_id: usize) {
        tracing::info!("Worker thread {} started", worker_id);

        while let Some(job) = self.queue.get_next_job() {
            match self.admission(&job) {
                Admission::Run => self.run_job(worker_id, job),
                Admission::Expired => {
                    self.stats.lock().stats.total_jobs_dropped += 1;
                    tracing::warn!("Worker {} dropped expired job {}", worker_id, job.job_id);
                }
                Admission::Deferred => {
                    self.stats.lock().stats.total_jobs_skipped += 1;
                    tracing::debug!(
                        "Worker {} skipped job {} due to resource constraints",
                        worker_id,
                        job.job_id
                    );
                }
            }

            self.monitor.update_active_thread_count(self.num_workers);
            self.monitor.update_queue_size(self.queue.len());
        }

        tracing::info!("Worker thread {} stopped", worker_id);
    }

    fn run_job(&self, worker_id: usize, job: ProcessingJob) {
        let started = Instant::now();
        let queue_time_ms = started.duration_since(job.submission_time).as_secs_f64() * 1000.0;
        let job_id = job.job_id;

        let outcome = panic::catch_unwind(AssertUnwindSafe(job.task));
        let processing_time_ms = started.elapsed().as_secs_f64() * 1000.0;

        let succeeded = match outcome {
            Ok(Ok(())) => true,
            Ok(Err(JobError(msg))) => {
                tracing::error!("Job {} failed: {}", job_id, msg);
                false
            }
            Err(_) => {
                tracing::error!("Job {} panicked", job_id);
                false
            }
        };

        let average_latency = {
            let mut state = self.stats.lock();
            let StatsState {
                stats,
                recent_processing_times,
            } = &mut *state;

            if succeeded {
                stats.total_jobs_completed += 1;
            } else {
                stats.total_jobs_failed += 1;
            }
            stats.total_jobs_processed += 1;
            stats.average_processing_time_ms = EMA_ALPHA * processing_time_ms
                + (1.0 - EMA_ALPHA) * stats.average_processing_time_ms;
            stats.average_queue_time_ms =
                EMA_ALPHA * queue_time_ms + (1.0 - EMA_ALPHA) * stats.average_queue_time_ms;

            recent_processing_times.push_back(processing_time_ms);
            if recent_processing_times.len() > PROCESSING_TIME_WINDOW {
                recent_processing_times.pop_front();
            }
            let mean = recent_processing_times.iter().sum::<f64>()
                / recent_processing_times.len() as f64;
            stats.throughput_jobs_per_second = if mean > 0.0 { 1000.0 / mean } else { 0.0 };
            stats.last_update = Instant::now();
            stats.average_processing_time_ms
        };

        self.monitor.update_average_latency(average_latency as f32);
        tracing::debug!(
            "Worker {} completed job {} in {:.2}ms",
            worker_id,
            job_id,
            processing_time_ms
        );
    }
}

/// Worker pool over a priority queue with resource-aware admission
pub struct LoadBalancedPipeline {
    inner: Arc<PipelineShared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl LoadBalancedPipeline {
    pub fn new(num_workers: usize, max_queue_size: usize, probe: Box<dyn ResourceProbe>) -> Self {
        let monitor = ResourceMonitor::new(1000, probe);
        Self::with_monitor(num_workers, max_queue_size, monitor)
    }

    fn with_monitor(num_workers: usize, max_queue_size: usize, monitor: ResourceMonitor) -> Self {
        let graceful_degradation = Arc::new(AtomicBool::new(true));

        let degrade = graceful_degradation.clone();
        monitor.register_resource_callback(move |resources: &SystemResources| {
            if resources.resource_constrained && degrade.load(Ordering::Relaxed) {
                tracing::info!(
                    "Performing graceful degradation (cpu {:.2}, mem {:.2})",
                    resources.cpu_usage,
                    resources.memory_usage
                );
            }
        });

        tracing::info!(
            "Processing pipeline created with {} worker threads",
            num_workers
        );

        Self {
            inner: Arc::new(PipelineShared {
                queue: PriorityJobQueue::new(max_queue_size),
                monitor,
                num_workers,
                active: AtomicBool::new(false),
                next_job_id: AtomicU64::new(1),
                total_jobs_rejected: AtomicU64::new(0),
                job_type_priorities: RwLock::new(default_priorities()),
                graceful_degradation,
                thresholds: Mutex::new((0.8, 0.8)),
                stats: Mutex::new(StatsState::default()),
            }),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Build from config with the system probe
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::from_config_with_probe(config, Box::new(SysinfoProbe::new()))
    }

    pub fn from_config_with_probe(config: &PipelineConfig, probe: Box<dyn ResourceProbe>) -> Self {
        let monitor = ResourceMonitor::new(config.resource_interval_ms, probe);
        Self::with_monitor(config.num_worker_threads, config.max_queue_size, monitor)
    }

    /// Small queue, low thresholds, batch work pushed to the background tier
    pub fn realtime(num_workers: usize) -> Self {
        let pipeline = Self::new(num_workers, 500, Box::new(SysinfoProbe::new()));
        pipeline.set_job_type_priority(ProcessingJobType::RealTimeStream, ProcessingPriority::Critical);
        pipeline.set_job_type_priority(ProcessingJobType::InteractiveRequest, ProcessingPriority::High);
        pipeline.set_job_type_priority(
            ProcessingJobType::BatchTranscription,
            ProcessingPriority::Background,
        );
        pipeline.set_resource_thresholds(0.7, 0.7);
        pipeline.set_graceful_degradation(true);
        pipeline
    }

    /// Large queue, high thresholds, batch work promoted
    pub fn batch(num_workers: usize) -> Self {
        let pipeline = Self::new(num_workers, 2000, Box::new(SysinfoProbe::new()));
        pipeline.set_job_type_priority(ProcessingJobType::BatchTranscription, ProcessingPriority::High);
        pipeline.set_job_type_priority(ProcessingJobType::BackgroundTask, ProcessingPriority::Normal);
        pipeline.set_job_type_priority(ProcessingJobType::RealTimeStream, ProcessingPriority::Critical);
        pipeline.set_resource_thresholds(0.9, 0.9);
        pipeline.set_graceful_degradation(true);
        pipeline
    }

    /// Default priorities and thresholds
    pub fn hybrid(num_workers: usize) -> Self {
        let pipeline = Self::new(num_workers, 1000, Box::new(SysinfoProbe::new()));
        pipeline.set_resource_thresholds(0.8, 0.8);
        pipeline.set_graceful_degradation(true);
        pipeline
    }

    /// Start the resource monitor and the worker threads
    pub fn start(&self) -> Result<(), SchedulerError> {
        let mut workers = self.workers.lock();
        if self.inner.active.load(Ordering::Relaxed) {
            tracing::warn!("Processing pipeline already active");
            return Ok(());
        }

        self.inner.queue.reopen();
        self.inner.monitor.sample_now();
        self.inner.monitor.start_monitoring()?;

        for worker_id in 0..self.inner.num_workers {
            let inner = self.inner.clone();
            let spawned = thread::Builder::new()
                .name(format!("pipeline-worker-{}", worker_id))
                .spawn(move || inner.worker_loop(worker_id));

            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    tracing::error!("Failed to spawn worker {}: {}", worker_id, e);
                    self.inner.queue.close();
                    for handle in workers.drain(..) {
                        let _ = handle.join();
                    }
                    self.inner.monitor.stop_monitoring();
                    return Err(SchedulerError::Spawn(e.to_string()));
                }
            }
        }

        self.inner.monitor.update_active_thread_count(self.inner.num_workers);
        self.inner.active.store(true, Ordering::Relaxed);
        tracing::info!(
            "Processing pipeline started with {} workers",
            self.inner.num_workers
        );
        Ok(())
    }

    /// Close the queue, join the workers, then stop the monitor
    pub fn stop(&self) {
        let mut workers = self.workers.lock();
        if !self.inner.active.swap(false, Ordering::Relaxed) {
            return;
        }

        self.inner.queue.close();
        for handle in workers.drain(..) {
            if handle.join().is_err() {
                tracing::error!("Pipeline worker panicked");
            }
        }
        self.inner.monitor.stop_monitoring();
        tracing::info!("Processing pipeline stopped");
    }

    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::Relaxed)
    }

    /// Queue a job, assigning an id and resolving its priority
    pub fn submit_job(&self, mut job: ProcessingJob) -> Result<JobId, SchedulerError> {
        if !self.is_active() {
            self.inner.total_jobs_rejected.fetch_add(1, Ordering::Relaxed);
            tracing::error!("Cannot submit job: pipeline not active");
            return Err(SchedulerError::PipelineInactive);
        }

        if !job.job_id.is_assigned() {
            job.job_id = JobId(self.inner.next_job_id.fetch_add(1, Ordering::Relaxed));
        }
        if job.priority.is_none() {
            job.priority = Some(self.inner.priority_for(job.job_type));
        }

        let job_id = job.job_id;
        match self.inner.queue.submit_job(job) {
            Ok(()) => {
                self.inner.monitor.update_queue_size(self.inner.queue.len());
                tracing::debug!("Job {} submitted", job_id);
                Ok(job_id)
            }
            Err(e) => {
                self.inner.total_jobs_rejected.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("Failed to submit job {}: {}", job_id, e);
                Err(e)
            }
        }
    }

    /// 200 ms deadline, heavy, real-time priority
    pub fn submit_real_time_job<F>(&self, task: F, description: &str) -> Result<JobId, SchedulerError>
    where
        F: FnOnce() -> Result<(), JobError> + Send + 'static,
    {
        let job = ProcessingJob::new(ProcessingJobType::RealTimeStream, task)
            .with_deadline(Duration::from_millis(200))
            .with_estimate_ms(50)
            .with_resource_requirement(8)
            .with_description(description);
        self.submit_job(job)
    }

    /// 5 minute deadline, light, batch priority
    pub fn submit_batch_job<F>(&self, task: F, description: &str) -> Result<JobId, SchedulerError>
    where
        F: FnOnce() -> Result<(), JobError> + Send + 'static,
    {
        let job = ProcessingJob::new(ProcessingJobType::BatchTranscription, task)
            .with_deadline(Duration::from_secs(300))
            .with_estimate_ms(1000)
            .with_resource_requirement(3)
            .with_description(description);
        self.submit_job(job)
    }

    pub fn cancel_job(&self, job_id: JobId) -> bool {
        self.inner.queue.cancel_job(job_id)
    }

    pub fn set_job_type_priority(&self, job_type: ProcessingJobType, priority: ProcessingPriority) {
        self.inner.job_type_priorities.write().insert(job_type, priority);
        tracing::info!("Job type {:?} priority set to {:?}", job_type, priority);
    }

    pub fn job_type_priority(&self, job_type: ProcessingJobType) -> ProcessingPriority {
        self.inner.priority_for(job_type)
    }

    pub fn set_graceful_degradation(&self, enabled: bool) {
        self.inner.graceful_degradation.store(enabled, Ordering::Relaxed);
        tracing::info!(
            "Graceful degradation {}",
            if enabled { "enabled" } else { "disabled" }
        );
    }

    pub fn set_resource_thresholds(&self, cpu_threshold: f32, memory_threshold: f32) {
        *self.inner.thresholds.lock() = (cpu_threshold, memory_threshold);
        tracing::info!(
            "Resource thresholds set: CPU={}, Memory={}",
            cpu_threshold,
            memory_threshold
        );
    }

    pub fn get_processing_stats(&self) -> ProcessingStats {
        self.inner.stats.lock().stats.clone()
    }

    pub fn get_current_resources(&self) -> SystemResources {
        self.inner.monitor.get_current_resources()
    }

    pub fn resource_monitor(&self) -> &ResourceMonitor {
        &self.inner.monitor
    }

    pub fn queued_jobs(&self) -> usize {
        self.inner.queue.len()
    }

    pub fn total_jobs_rejected(&self) -> u64 {
        self.inner.total_jobs_rejected.load(Ordering::Relaxed)
    }

    /// Not constrained, shallow queue, low latency
    pub fn is_healthy(&self) -> bool {
        let resources = self.inner.monitor.get_current_resources();
        !resources.resource_constrained
            && resources.queued_jobs < 100
            && resources.average_latency_ms < 1000.0
    }

    /// Flattened queue, processing, resource and config figures
    pub fn get_pipeline_stats(&self) -> BTreeMap<String, f64> {
        let mut stats: BTreeMap<String, f64> = self
            .inner
            .queue
            .queue_stats()
            .into_iter()
            .map(|(key, value)| (format!("queue.{}", key), value))
            .collect();

        let processing = self.get_processing_stats();
        let resources = self.get_current_resources();
        let (cpu_threshold, memory_threshold) = *self.inner.thresholds.lock();
        let flag = |b: bool| if b { 1.0 } else { 0.0 };

        let entries = [
            ("processing.total_jobs_processed", processing.total_jobs_processed as f64),
            ("processing.total_jobs_completed", processing.total_jobs_completed as f64),
            ("processing.total_jobs_failed", processing.total_jobs_failed as f64),
            ("processing.total_jobs_dropped", processing.total_jobs_dropped as f64),
            ("processing.total_jobs_skipped", processing.total_jobs_skipped as f64),
            ("processing.total_jobs_rejected", self.total_jobs_rejected() as f64),
            ("processing.average_processing_time", processing.average_processing_time_ms),
            ("processing.average_queue_time", processing.average_queue_time_ms),
            ("processing.throughput", processing.throughput_jobs_per_second),
            ("resources.cpu_usage", resources.cpu_usage as f64),
            ("resources.memory_usage", resources.memory_usage as f64),
            ("resources.active_threads", resources.active_threads as f64),
            ("resources.average_latency", resources.average_latency_ms as f64),
            ("resources.resource_constrained", flag(resources.resource_constrained)),
            ("config.num_worker_threads", self.inner.num_workers as f64),
            (
                "config.graceful_degradation",
                flag(self.inner.graceful_degradation.load(Ordering::Relaxed)),
            ),
            ("config.cpu_threshold", cpu_threshold as f64),
            ("config.memory_threshold", memory_threshold as f64),
            ("config.pipeline_active", flag(self.is_active())),
        ];
        stats.extend(entries.into_iter().map(|(k, v)| (k.to_string(), v)));
        stats
    }
}

impl Drop for LoadBalancedPipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::ManualResourceProbe;
    use std::sync::atomic::AtomicUsize;

    fn pipeline_with(probe: ManualResourceProbe, workers: usize) -> LoadBalancedPipeline {
        LoadBalancedPipeline::new(workers, 100, Box::new(probe))
    }

    fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_submit_requires_active() {
        let pipeline = pipeline_with(ManualResourceProbe::new(0.1, 0.1), 1);
        let err = pipeline.submit_real_time_job(|| Ok(()), "rt").unwrap_err();
        assert_eq!(err, SchedulerError::PipelineInactive);
        assert_eq!(pipeline.total_jobs_rejected(), 1);
    }

    #[test]
    fn test_jobs_complete_and_fail() {
        let pipeline = pipeline_with(ManualResourceProbe::new(0.1, 0.1), 2);
        pipeline.start().unwrap();

        let ran = Arc::new(AtomicUsize::new(0));
        let r = ran.clone();
        let first = pipeline
            .submit_real_time_job(
                move || {
                    r.fetch_add(1, Ordering::Relaxed);
                    Ok(())
                },
                "ok",
            )
            .unwrap();
        let second = pipeline
            .submit_job(ProcessingJob::new(ProcessingJobType::SystemTask, || {
                Err(JobError::from("bad input"))
            }))
            .unwrap();
        pipeline
            .submit_job(ProcessingJob::new(ProcessingJobType::SystemTask, || {
                panic!("task blew up")
            }))
            .unwrap();

        assert_eq!(first, JobId(1));
        assert_eq!(second, JobId(2));
        assert!(wait_for(|| pipeline.get_processing_stats().total_jobs_processed == 3));

        let stats = pipeline.get_processing_stats();
        assert_eq!(stats.total_jobs_completed, 1);
        assert_eq!(stats.total_jobs_failed, 2);
        assert_eq!(ran.load(Ordering::Relaxed), 1);

        pipeline.stop();
        assert!(!pipeline.is_active());
    }

    #[test]
    fn test_priority_resolved_from_job_type() {
        let pipeline = pipeline_with(ManualResourceProbe::new(0.1, 0.1), 1);
        assert_eq!(
            pipeline.job_type_priority(ProcessingJobType::BatchTranscription),
            ProcessingPriority::Low
        );
        pipeline.set_job_type_priority(ProcessingJobType::BatchTranscription, ProcessingPriority::High);
        assert_eq!(
            pipeline.job_type_priority(ProcessingJobType::BatchTranscription),
            ProcessingPriority::High
        );
    }

    #[test]
    fn test_expired_job_is_dropped() {
        let pipeline = pipeline_with(ManualResourceProbe::new(0.1, 0.1), 1);
        pipeline.start().unwrap();

        let ran = Arc::new(AtomicBool::new(false));
        let r = ran.clone();
        let mut job = ProcessingJob::new(ProcessingJobType::RealTimeStream, move || {
            r.store(true, Ordering::Relaxed);
            Ok(())
        });
        job.deadline = job.submission_time;
        thread::sleep(Duration::from_millis(2));
        pipeline.submit_job(job).unwrap();

        assert!(wait_for(|| pipeline.get_processing_stats().total_jobs_dropped == 1));
        assert!(!ran.load(Ordering::Relaxed));
        assert_eq!(pipeline.get_processing_stats().total_jobs_processed, 0);
    }

    #[test]
    fn test_low_priority_skipped_when_constrained() {
        let probe = ManualResourceProbe::new(0.95, 0.2);
        let pipeline = pipeline_with(probe, 1);
        pipeline.start().unwrap();

        let batch_ran = Arc::new(AtomicBool::new(false));
        let b = batch_ran.clone();
        pipeline
            .submit_batch_job(
                move || {
                    b.store(true, Ordering::Relaxed);
                    Ok(())
                },
                "batch",
            )
            .unwrap();
        pipeline.submit_real_time_job(|| Ok(()), "rt").unwrap();

        assert!(wait_for(|| {
            let stats = pipeline.get_processing_stats();
            stats.total_jobs_skipped == 1 && stats.total_jobs_completed == 1
        }));
        assert!(!batch_ran.load(Ordering::Relaxed));
        assert!(!pipeline.is_healthy());
    }

    #[test]
    fn test_queue_full_is_rejected() {
        let pipeline = LoadBalancedPipeline::new(1, 1, Box::new(ManualResourceProbe::new(0.1, 0.1)));
        pipeline.start().unwrap();

        // Park the single worker so the queue fills up
        let (release_tx, release_rx) = crossbeam_channel::bounded::<()>(0);
        pipeline
            .submit_job(
                ProcessingJob::new(ProcessingJobType::SystemTask, move || {
                    let _ = release_rx.recv();
                    Ok(())
                })
                .with_priority(ProcessingPriority::Critical),
            )
            .unwrap();
        assert!(wait_for(|| pipeline.queued_jobs() == 0));

        pipeline.submit_job(ProcessingJob::new(ProcessingJobType::SystemTask, || Ok(()))).unwrap();
        let err = pipeline
            .submit_job(ProcessingJob::new(ProcessingJobType::SystemTask, || Ok(())))
            .unwrap_err();
        assert_eq!(err, SchedulerError::QueueFull(1));
        assert_eq!(pipeline.total_jobs_rejected(), 1);

        release_tx.send(()).unwrap();
        pipeline.stop();
    }

    #[test]
    fn test_restart_after_stop() {
        let pipeline = pipeline_with(ManualResourceProbe::new(0.1, 0.1), 1);
        pipeline.start().unwrap();
        pipeline.stop();
        pipeline.start().unwrap();

        pipeline.submit_real_time_job(|| Ok(()), "again").unwrap();
        assert!(wait_for(|| pipeline.get_processing_stats().total_jobs_completed == 1));
    }

    #[test]
    fn test_pipeline_stats_keys() {
        let pipeline = pipeline_with(ManualResourceProbe::new(0.1, 0.1), 3);
        let stats = pipeline.get_pipeline_stats();
        assert_eq!(stats["config.num_worker_threads"], 3.0);
        assert_eq!(stats["config.pipeline_active"], 0.0);
        assert_eq!(stats["queue.max_queue_size"], 100.0);
        assert!(stats.contains_key("processing.throughput"));
        assert!(stats.contains_key("resources.resource_constrained"));
    }
}
