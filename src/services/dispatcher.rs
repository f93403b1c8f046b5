use serde::Serialize;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};

use super::annotate::Annotator;
use super::checkpoint::{merge_in_input_order, CheckpointWriter};
use super::classifier::Classifier;
use super::credentials::KeySupply;
use super::images::ImageFetcher;
use super::progress::{drain_status, ProgressBoard};
use super::queue::JobQueue;
use super::rate_limiter::RateLimiter;
use super::session::{CallSession, KeyUsageStats, StatusReporter};
use super::worker::{Worker, WorkerExit, WorkerReport};
use crate::config::{DispatchPolicy, PhoenixPolicy, RetryPolicy};
use crate::models::job::{Job, ListingResult, ListingStatus};

/// Retry, recovery and pool settings for one run.
#[derive(Debug, Clone, Default)]
pub struct RunPolicies {
    pub retry: RetryPolicy,
    pub phoenix: PhoenixPolicy,
    pub dispatch: DispatchPolicy,
}

/// Written next to the output file at the end of a run.
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub total_listings: usize,
    pub completed: usize,
    pub system_errors: usize,
    pub requeued: usize,
    pub not_processed: usize,
    pub total_cost_cents: f64,
    pub usage: KeyUsageStats,
    pub workers: Vec<WorkerReport>,
}

impl SessionReport {
    fn new(rows: &[ListingResult], usage: KeyUsageStats, workers: Vec<WorkerReport>) -> Self {
        let count = |status: ListingStatus| rows.iter().filter(|r| r.status == status).count();
        let cost: f64 = rows.iter().map(|r| r.cost_cents).sum();
        Self {
            total_listings: rows.len(),
            completed: rows.iter().filter(|r| r.status.is_terminal()).count(),
            system_errors: count(ListingStatus::SystemError),
            requeued: count(ListingStatus::Requeued),
            not_processed: count(ListingStatus::NotProcessed),
            total_cost_cents: (cost * 10_000.0).round() / 10_000.0,
            usage,
            workers,
        }
    }
}

#[derive(Debug)]
pub struct RunSummary {
    /// One row per input listing, in input order.
    pub rows: Vec<ListingResult>,
    pub report: SessionReport,
    pub output: Option<PathBuf>,
}

/// Owns the worker pool for one batch: seeds the queue, starts the workers,
/// collects their results and checkpoints them.
pub struct Dispatcher<C, F> {
    classifier: Arc<C>,
    images: Arc<F>,
    limiter: RateLimiter,
    supply: Arc<KeySupply>,
    annotator: Arc<Annotator>,
    policies: RunPolicies,
    writer: CheckpointWriter,
    board: Arc<ProgressBoard>,
}

impl<C, F> Dispatcher<C, F>
where
    C: Classifier + 'static,
    F: ImageFetcher + 'static,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        classifier: Arc<C>,
        images: Arc<F>,
        limiter: RateLimiter,
        supply: Arc<KeySupply>,
        annotator: Arc<Annotator>,
        policies: RunPolicies,
        writer: CheckpointWriter,
        board: Arc<ProgressBoard>,
    ) -> Self {
        Self {
            classifier,
            images,
            limiter,
            supply,
            annotator,
            policies,
            writer,
            board,
        }
    }

    pub fn board(&self) -> Arc<ProgressBoard> {
        Arc::clone(&self.board)
    }

    pub async fn run(&self, jobs: Vec<Job>) -> RunSummary {
        let dispatch = &self.policies.dispatch;
        let queue = Arc::new(JobQueue::seed(jobs.iter().cloned()));
        tracing::info!(listings = jobs.len(), workers = dispatch.workers, "Starting batch");

        let (status_tx, status_rx) = mpsc::unbounded_channel();
        let (result_tx, mut result_rx) = mpsc::unbounded_channel();
        let drain = tokio::spawn(drain_status(status_rx, Arc::clone(&self.board)));

        let mut handles = Vec::with_capacity(dispatch.workers);
        for worker_id in 1..=dispatch.workers {
            if worker_id > 1 && !dispatch.stagger.is_zero() {
                sleep(dispatch.stagger).await;
            }
            let session = CallSession::new(
                Arc::clone(&self.classifier),
                self.limiter.clone(),
                Arc::clone(&self.supply),
                self.policies.retry.clone(),
                self.policies.phoenix.clone(),
                StatusReporter::new(worker_id, status_tx.clone()),
            );
            let worker = Worker::new(
                Arc::clone(&queue),
                result_tx.clone(),
                session,
                Arc::clone(&self.annotator),
                Arc::clone(&self.images),
                dispatch.pop_timeout,
            );
            handles.push(tokio::spawn(worker.run()));
        }
        // Only workers hold senders now, so the result channel closes
        // exactly when the last worker is gone.
        drop(status_tx);
        drop(result_tx);

        let mut results: Vec<ListingResult> = Vec::new();
        let mut finished: HashSet<String> = HashSet::new();
        let mut ticker = interval_at(
            Instant::now() + dispatch.checkpoint_interval,
            dispatch.checkpoint_interval,
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                received = result_rx.recv() => match received {
                    Some(result) => {
                        if result.status.is_terminal() {
                            finished.insert(result.job_id.clone());
                            self.board.set_completed(finished.len());
                        }
                        results.push(result);
                    }
                    None => break,
                },
                _ = ticker.tick() => {
                    self.log_progress();
                    self.checkpoint(&jobs, &results).await;
                }
            }
        }

        // The channel only closes once every worker has returned, so these
        // joins complete without waiting.
        let reports = join_workers(handles).await;
        if let Err(e) = drain.await {
            tracing::error!(error = %e, "Status drain failed");
        }

        let left = queue.len();
        if left > 0 {
            tracing::warn!(left, "Listings left in the queue with no live worker");
        }

        let output = self.checkpoint(&jobs, &results).await;
        let rows = merge_in_input_order(&jobs, &results);

        let mut usage = KeyUsageStats::default();
        for report in &reports {
            usage.merge(&report.stats);
        }
        let report = SessionReport::new(&rows, usage, reports);
        match self.writer.save_report(&report).await {
            Ok(path) => tracing::info!(path = %path.display(), "Saved session report"),
            Err(e) => tracing::error!(error = %e, "Failed to save session report"),
        }

        self.log_progress();
        tracing::info!(
            completed = report.completed,
            system_errors = report.system_errors,
            not_processed = report.not_processed,
            cost_cents = report.total_cost_cents,
            "Batch finished"
        );

        RunSummary { rows, report, output }
    }

    /// Snapshot everything collected so far. Failures are logged only.
    async fn checkpoint(&self, jobs: &[Job], results: &[ListingResult]) -> Option<PathBuf> {
        if results.is_empty() {
            return None;
        }
        match self.writer.save(jobs, results).await {
            Ok(path) => Some(path),
            Err(e) => {
                tracing::error!(error = %e, "Checkpoint failed");
                None
            }
        }
    }

    fn log_progress(&self) {
        let snapshot = self.board.snapshot();
        tracing::info!(
            completed = snapshot.completed,
            total = snapshot.total,
            percentage = snapshot.percentage,
            eta_seconds = snapshot.eta_seconds,
            workers_alive = snapshot.workers_alive,
            keys_retired = snapshot.keys_retired,
            "Progress"
        );
    }
}

async fn join_workers(handles: Vec<tokio::task::JoinHandle<WorkerReport>>) -> Vec<WorkerReport> {
    let mut reports = Vec::with_capacity(handles.len());
    for handle in handles {
        match handle.await {
            Ok(report) => {
                if report.exit == WorkerExit::Fatal {
                    tracing::warn!(worker_id = report.worker_id, "Worker stopped early");
                }
                reports.push(report);
            }
            Err(e) => tracing::error!(error = %e, "Worker task failed"),
        }
    }
    reports
}
