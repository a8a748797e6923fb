//! Bounded priority job queue
//!
//! One FIFO per priority tier behind a single mutex. Workers block on a
//! condvar until a job arrives or the queue is closed.

use parking_lot::{Condvar, Mutex};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use super::job::{JobId, ProcessingJob, ProcessingPriority};
use crate::constants::DEFAULT_MAX_QUEUE_SIZE;
use crate::error::SchedulerError;

/// How workers choose between tiers
///
/// `Strict` always serves the most urgent non-empty tier, so a steady stream
/// of critical work can starve background jobs indefinitely. Deadlines are
/// the only bound on how long a starved job waits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StarvationPolicy {
    #[default]
    Strict,
}

struct QueueState {
    tiers: [VecDeque<ProcessingJob>; 5],
    max_queue_size: usize,
    closed: bool,
}

impl QueueState {
    fn len(&self) -> usize {
        self.tiers.iter().map(VecDeque::len).sum()
    }

    fn pop_highest(&mut self, min_priority: ProcessingPriority) -> Option<ProcessingJob> {
        self.tiers[..=min_priority.index()]
            .iter_mut()
            .find_map(VecDeque::pop_front)
    }

    /// Remove every job past its deadline. Returns how many were removed.
    fn evict_expired(&mut self, now: Instant) -> usize {
        let mut evicted = 0;
        for tier in &mut self.tiers {
            let before = tier.len();
            tier.retain(|job| !job.is_expired(now));
            evicted += before - tier.len();
        }
        evicted
    }
}

/// Thread-safe priority queue of [`ProcessingJob`]s
pub struct PriorityJobQueue {
    state: Mutex<QueueState>,
    available: Condvar,
    policy: StarvationPolicy,
    total_jobs_submitted: AtomicU64,
    total_jobs_retrieved: AtomicU64,
    total_jobs_cancelled: AtomicU64,
    total_jobs_expired: AtomicU64,
}

impl PriorityJobQueue {
    pub fn new(max_queue_size: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                tiers: Default::default(),
                max_queue_size,
                closed: false,
            }),
            available: Condvar::new(),
            policy: StarvationPolicy::Strict,
            total_jobs_submitted: AtomicU64::new(0),
            total_jobs_retrieved: AtomicU64::new(0),
            total_jobs_cancelled: AtomicU64::new(0),
            total_jobs_expired: AtomicU64::new(0),
        }
    }

    /// Enqueue a job, evicting expired jobs first if the queue is full
    pub fn submit_job(&self, job: ProcessingJob) -> Result<(), SchedulerError> {
        let mut state = self.state.lock();

        if state.len() >= state.max_queue_size {
            let evicted = state.evict_expired(Instant::now());
            if evicted > 0 {
                self.total_jobs_expired
                    .fetch_add(evicted as u64, Ordering::Relaxed);
                tracing::debug!("Evicted {} expired jobs", evicted);
            }
            if state.len() >= state.max_queue_size {
                tracing::warn!(
                    "Job queue full ({} jobs), rejecting job {}",
                    state.max_queue_size,
                    job.job_id
                );
                return Err(SchedulerError::QueueFull(state.max_queue_size));
            }
        }

        let priority = job.effective_priority();
        tracing::debug!("Queued job {} at {:?}", job.job_id, priority);
        state.tiers[priority.index()].push_back(job);
        self.total_jobs_submitted.fetch_add(1, Ordering::Relaxed);
        drop(state);

        self.available.notify_one();
        Ok(())
    }

    /// Block until a job is available. Returns `None` once the queue is closed.
    pub fn get_next_job(&self) -> Option<ProcessingJob> {
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return None;
            }
            if let Some(job) = state.pop_highest(ProcessingPriority::Background) {
                self.total_jobs_retrieved.fetch_add(1, Ordering::Relaxed);
                return Some(job);
            }
            self.available.wait(&mut state);
        }
    }

    /// Like [`get_next_job`](Self::get_next_job) but gives up after `timeout`
    pub fn get_next_job_timeout(&self, timeout: Duration) -> Option<ProcessingJob> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return None;
            }
            if let Some(job) = state.pop_highest(ProcessingPriority::Background) {
                self.total_jobs_retrieved.fetch_add(1, Ordering::Relaxed);
                return Some(job);
            }
            if self.available.wait_until(&mut state, deadline).timed_out() {
                return None;
            }
        }
    }

    /// Non-blocking pop limited to tiers at least as urgent as `min_priority`
    pub fn try_next_job_with_priority(
        &self,
        min_priority: ProcessingPriority,
    ) -> Option<ProcessingJob> {
        let mut state = self.state.lock();
        let job = state.pop_highest(min_priority)?;
        self.total_jobs_retrieved.fetch_add(1, Ordering::Relaxed);
        Some(job)
    }

    /// Remove a queued job. Jobs already handed to a worker cannot be cancelled.
    pub fn cancel_job(&self, job_id: JobId) -> bool {
        let mut state = self.state.lock();
        for tier in &mut state.tiers {
            if let Some(pos) = tier.iter().position(|job| job.job_id == job_id) {
                tier.remove(pos);
                self.total_jobs_cancelled.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("Cancelled job {}", job_id);
                return true;
            }
        }
        false
    }

    /// Wake every waiter; subsequent `get_next_job` calls return `None`
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.available.notify_all();
    }

    /// Accept waiters again after [`close`](Self::close)
    pub fn reopen(&self) {
        self.state.lock().closed = false;
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Drop every queued job
    pub fn clear(&self) {
        let mut state = self.state.lock();
        for tier in &mut state.tiers {
            tier.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn job_count_by_priority(&self, priority: ProcessingPriority) -> usize {
        self.state.lock().tiers[priority.index()].len()
    }

    pub fn set_max_queue_size(&self, max_queue_size: usize) {
        self.state.lock().max_queue_size = max_queue_size;
    }

    pub fn max_queue_size(&self) -> usize {
        self.state.lock().max_queue_size
    }

    pub fn starvation_policy(&self) -> StarvationPolicy {
        self.policy
    }

    /// Counters and per-tier sizes
    pub fn queue_stats(&self) -> BTreeMap<String, f64> {
        let (tier_sizes, size, max) = {
            let state = self.state.lock();
            let sizes: Vec<usize> = state.tiers.iter().map(VecDeque::len).collect();
            (sizes, state.len(), state.max_queue_size)
        };

        let mut stats = BTreeMap::new();
        stats.insert(
            "total_jobs_submitted".to_string(),
            self.total_jobs_submitted.load(Ordering::Relaxed) as f64,
        );
        stats.insert(
            "total_jobs_retrieved".to_string(),
            self.total_jobs_retrieved.load(Ordering::Relaxed) as f64,
        );
        stats.insert(
            "total_jobs_cancelled".to_string(),
            self.total_jobs_cancelled.load(Ordering::Relaxed) as f64,
        );
        stats.insert(
            "total_jobs_expired".to_string(),
            self.total_jobs_expired.load(Ordering::Relaxed) as f64,
        );
        stats.insert("current_queue_size".to_string(), size as f64);
        stats.insert("max_queue_size".to_string(), max as f64);
        let utilization = if max > 0 { size as f64 / max as f64 } else { 0.0 };
        stats.insert("queue_utilization".to_string(), utilization);

        for priority in ProcessingPriority::ALL {
            stats.insert(
                format!("{}_jobs", priority.name()),
                tier_sizes[priority.index()] as f64,
            );
        }
        stats
    }
}

impl Default for PriorityJobQueue {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_QUEUE_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::ProcessingJobType;
    use std::sync::Arc;
    use std::thread;

    fn job(id: u64, priority: ProcessingPriority) -> ProcessingJob {
        let mut job = ProcessingJob::new(ProcessingJobType::SystemTask, || Ok(()))
            .with_priority(priority);
        job.job_id = JobId(id);
        job
    }

    #[test]
    fn test_strict_priority_order() {
        let queue = PriorityJobQueue::new(10);
        queue.submit_job(job(1, ProcessingPriority::Low)).unwrap();
        queue.submit_job(job(2, ProcessingPriority::Critical)).unwrap();
        queue.submit_job(job(3, ProcessingPriority::Normal)).unwrap();

        let order: Vec<u64> = (0..3)
            .map(|_| queue.get_next_job().unwrap().job_id.0)
            .collect();
        assert_eq!(order, vec![2, 3, 1]);
    }

    #[test]
    fn test_fifo_within_tier() {
        let queue = PriorityJobQueue::new(10);
        for id in 1..=3 {
            queue.submit_job(job(id, ProcessingPriority::High)).unwrap();
        }
        assert_eq!(queue.get_next_job().unwrap().job_id, JobId(1));
        assert_eq!(queue.get_next_job().unwrap().job_id, JobId(2));
    }

    #[test]
    fn test_capacity() {
        let queue = PriorityJobQueue::new(2);
        queue.submit_job(job(1, ProcessingPriority::Normal)).unwrap();
        queue.submit_job(job(2, ProcessingPriority::Normal)).unwrap();

        let err = queue.submit_job(job(3, ProcessingPriority::Critical)).unwrap_err();
        assert_eq!(err, SchedulerError::QueueFull(2));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_full_queue_evicts_expired() {
        let queue = PriorityJobQueue::new(1);
        let mut stale = job(1, ProcessingPriority::Low);
        stale.deadline = stale.submission_time;
        queue.submit_job(stale).unwrap();

        thread::sleep(Duration::from_millis(2));
        queue.submit_job(job(2, ProcessingPriority::Low)).unwrap();

        assert_eq!(queue.len(), 1);
        assert_eq!(queue.queue_stats()["total_jobs_expired"], 1.0);
    }

    #[test]
    fn test_cancel() {
        let queue = PriorityJobQueue::new(10);
        queue.submit_job(job(7, ProcessingPriority::Background)).unwrap();
        assert!(queue.cancel_job(JobId(7)));
        assert!(!queue.cancel_job(JobId(7)));
        assert!(queue.is_empty());
        assert_eq!(queue.queue_stats()["total_jobs_cancelled"], 1.0);
    }

    #[test]
    fn test_try_next_respects_min_priority() {
        let queue = PriorityJobQueue::new(10);
        queue.submit_job(job(1, ProcessingPriority::Low)).unwrap();

        assert!(queue
            .try_next_job_with_priority(ProcessingPriority::Normal)
            .is_none());
        assert!(queue
            .try_next_job_with_priority(ProcessingPriority::Low)
            .is_some());
    }

    #[test]
    fn test_close_unblocks_waiter() {
        let queue = Arc::new(PriorityJobQueue::new(10));
        let waiter = {
            let queue = queue.clone();
            thread::spawn(move || queue.get_next_job())
        };

        thread::sleep(Duration::from_millis(20));
        queue.close();
        assert!(waiter.join().unwrap().is_none());

        queue.reopen();
        queue.submit_job(job(1, ProcessingPriority::Normal)).unwrap();
        assert!(queue.get_next_job().is_some());
    }

    #[test]
    fn test_timeout_returns_none_when_empty() {
        let queue = PriorityJobQueue::new(10);
        let start = Instant::now();
        assert!(queue.get_next_job_timeout(Duration::from_millis(20)).is_none());
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_queue_stats_keys() {
        let queue = PriorityJobQueue::new(4);
        queue.submit_job(job(1, ProcessingPriority::Critical)).unwrap();
        queue.submit_job(job(2, ProcessingPriority::Background)).unwrap();

        let stats = queue.queue_stats();
        assert_eq!(stats["critical_jobs"], 1.0);
        assert_eq!(stats["background_jobs"], 1.0);
        assert_eq!(stats["current_queue_size"], 2.0);
        assert_eq!(stats["queue_utilization"], 0.5);
        assert_eq!(queue.starvation_policy(), StarvationPolicy::Strict);
    }
}
