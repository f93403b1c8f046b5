use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::Instant;

use super::annotate::Annotator;
use super::classifier::Classifier;
use super::images::ImageFetcher;
use super::queue::JobQueue;
use super::session::{CallSession, KeyUsageStats, SessionError};
use crate::models::job::{ListingResult, ListingStatus};
use crate::models::status::WorkerState;

/// Why a worker loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerExit {
    /// Queue drained.
    Finished,
    /// No key could be obtained; the in-flight job was handed back.
    Fatal,
}

/// What a worker hands back to the dispatcher when it stops.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerReport {
    pub worker_id: usize,
    pub exit: WorkerExit,
    pub processed: usize,
    pub stats: KeyUsageStats,
}

/// One long-lived consumer of the job queue. Jobs are processed strictly
/// one at a time.
pub struct Worker<C, F> {
    queue: Arc<JobQueue>,
    results: UnboundedSender<ListingResult>,
    session: CallSession<C>,
    annotator: Arc<Annotator>,
    images: Arc<F>,
    pop_timeout: Duration,
}

impl<C, F> Worker<C, F>
where
    C: Classifier,
    F: ImageFetcher,
{
    pub fn new(
        queue: Arc<JobQueue>,
        results: UnboundedSender<ListingResult>,
        session: CallSession<C>,
        annotator: Arc<Annotator>,
        images: Arc<F>,
        pop_timeout: Duration,
    ) -> Self {
        Self {
            queue,
            results,
            session,
            annotator,
            images,
            pop_timeout,
        }
    }

    /// Drain the queue until it stays empty for `pop_timeout`, or until the
    /// key supply is gone for good.
    pub async fn run(mut self) -> WorkerReport {
        let worker_id = self.session.status().worker_id();
        tracing::info!(worker_id, "Worker started");
        self.session.status().publish(WorkerState::Waiting);

        loop {
            let Some(job) = self.queue.pop_timeout(self.pop_timeout).await else {
                self.session.status_mut().set_job(None);
                self.session.status().publish(WorkerState::Finished);
                tracing::info!(worker_id, processed = self.session.status().progress(), "Queue drained, worker finished");
                return self.report(WorkerExit::Finished);
            };

            self.session.status_mut().set_job(Some(job.id.clone()));
            self.session.status().publish(WorkerState::Processing);
            tracing::info!(worker_id, job_id = %job.id, "Processing listing");

            let start = Instant::now();
            match self
                .annotator
                .annotate(&job, &mut self.session, &*self.images)
                .await
            {
                Ok(result) => {
                    metrics::counter!("listings_completed_total").increment(1);
                    metrics::histogram!("listing_processing_seconds")
                        .record(start.elapsed().as_secs_f64());
                    tracing::info!(
                        worker_id,
                        job_id = %job.id,
                        status = %result.status,
                        top = result.top_category().unwrap_or(""),
                        cost_cents = result.cost_cents,
                        "Listing annotated"
                    );
                    let _ = self.results.send(result);
                }
                Err(SessionError::NoCredentials(e)) => {
                    tracing::error!(worker_id, job_id = %job.id, error = %e, "No keys left, re-queueing listing and stopping");
                    // The marker goes out before the job is visible again, so
                    // any fresh result for it arrives later and wins.
                    let _ = self
                        .results
                        .send(ListingResult::for_job(&job, ListingStatus::Requeued));
                    self.queue.push(job);
                    self.session.status().publish(WorkerState::Error);
                    return self.report(WorkerExit::Fatal);
                }
                Err(SessionError::Fatal(e)) => {
                    metrics::counter!("listings_failed_total").increment(1);
                    tracing::error!(worker_id, job_id = %job.id, error = %e, "Listing failed");
                    let _ = self
                        .results
                        .send(ListingResult::system_error(&job, &e.to_string()));
                }
            }

            self.session.status_mut().advance();
            self.session.status().publish(WorkerState::Waiting);
        }
    }

    fn report(self, exit: WorkerExit) -> WorkerReport {
        let worker_id = self.session.status().worker_id();
        let processed = self.session.status().progress();
        WorkerReport {
            worker_id,
            exit,
            processed,
            stats: self.session.into_stats(),
        }
    }
}
