use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::{timeout_at, Instant};

use crate::models::job::Job;

/// Shared FIFO of listings waiting for a worker.
///
/// The lock is only held for a push or pop, never across an await.
#[derive(Debug, Default)]
pub struct JobQueue {
    jobs: Mutex<VecDeque<Job>>,
    available: Notify,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the queue, preserving input order.
    pub fn seed(jobs: impl IntoIterator<Item = Job>) -> Self {
        let queue = Self::new();
        let depth = {
            let mut pending = queue.jobs.lock();
            pending.extend(jobs);
            pending.len()
        };
        metrics::gauge!("job_queue_depth").set(depth as f64);
        queue
    }

    /// Enqueue a job (also used to hand an unfinished job back).
    pub fn push(&self, job: Job) {
        self.jobs.lock().push_back(job);
        metrics::gauge!("job_queue_depth").increment(1.0);
        self.available.notify_one();
    }

    /// Next job, or `None` once the queue stayed empty for `wait`.
    pub async fn pop_timeout(&self, wait: Duration) -> Option<Job> {
        let deadline = Instant::now() + wait;
        loop {
            let notified = self.available.notified();
            if let Some(job) = self.try_pop() {
                return Some(job);
            }
            if timeout_at(deadline, notified).await.is_err() {
                return self.try_pop();
            }
        }
    }

    pub fn try_pop(&self) -> Option<Job> {
        let job = self.jobs.lock().pop_front();
        if job.is_some() {
            metrics::gauge!("job_queue_depth").decrement(1.0);
        }
        job
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.lock().is_empty()
    }

    pub fn ids(&self) -> Vec<String> {
        self.jobs.lock().iter().map(|j| j.id.clone()).collect()
    }
}
