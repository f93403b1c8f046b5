use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::sleep;

use super::classifier::{CallError, Classification, ClassifyRequest, Classifier, TransientKind};
use super::credentials::KeySupply;
use super::phoenix::{Phoenix, PhoenixExhausted};
use super::rate_limiter::{Acquired, RateLimiter};
use crate::config::{PhoenixPolicy, RetryPolicy};
use crate::models::credential::Credential;
use crate::models::status::{StatusEvent, WorkerState, WorkerStatus};

/// Terminal failure of one guarded call.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The worker can no longer obtain any key; it must requeue and exit.
    #[error(transparent)]
    NoCredentials(#[from] PhoenixExhausted),

    /// Not retryable; surfaces as a job-level system error.
    #[error(transparent)]
    Fatal(CallError),
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct KeyUsage {
    pub success: u64,
    pub quota_failure: u64,
    pub invalid: u64,
}

/// Per-worker record of how each key and the token budget were used.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct KeyUsageStats {
    pub per_key: BTreeMap<usize, KeyUsage>,
    pub api_calls: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl KeyUsageStats {
    fn key(&mut self, index: usize) -> &mut KeyUsage {
        self.per_key.entry(index).or_default()
    }

    pub fn merge(&mut self, other: &KeyUsageStats) {
        for (index, usage) in &other.per_key {
            let mine = self.key(*index);
            mine.success += usage.success;
            mine.quota_failure += usage.quota_failure;
            mine.invalid += usage.invalid;
        }
        self.api_calls += other.api_calls;
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}

/// Publishes a worker's own state onto the shared status channel.
/// Sends never block; a closed channel is ignored.
#[derive(Debug, Clone)]
pub struct StatusReporter {
    worker_id: usize,
    tx: UnboundedSender<StatusEvent>,
    job_id: Option<String>,
    progress: usize,
}

impl StatusReporter {
    pub fn new(worker_id: usize, tx: UnboundedSender<StatusEvent>) -> Self {
        Self {
            worker_id,
            tx,
            job_id: None,
            progress: 0,
        }
    }

    pub fn worker_id(&self) -> usize {
        self.worker_id
    }

    pub fn progress(&self) -> usize {
        self.progress
    }

    pub fn set_job(&mut self, job_id: Option<String>) {
        self.job_id = job_id;
    }

    pub fn advance(&mut self) {
        self.progress += 1;
    }

    pub fn publish(&self, state: WorkerState) {
        self.event(StatusEvent::Worker(WorkerStatus {
            worker_id: self.worker_id,
            state,
            current_job_id: self.job_id.clone(),
            progress: self.progress,
        }));
    }

    pub fn event(&self, event: StatusEvent) {
        let _ = self.tx.send(event);
    }
}

/// Everything a worker needs to make rate-limited, retried calls: the key
/// it currently holds, its own Phoenix counter and usage statistics.
pub struct CallSession<C> {
    classifier: Arc<C>,
    limiter: RateLimiter,
    supply: Arc<KeySupply>,
    retry: RetryPolicy,
    phoenix: Phoenix,
    held: Option<Credential>,
    stats: KeyUsageStats,
    status: StatusReporter,
}

impl<C: Classifier> CallSession<C> {
    pub fn new(
        classifier: Arc<C>,
        limiter: RateLimiter,
        supply: Arc<KeySupply>,
        retry: RetryPolicy,
        phoenix: PhoenixPolicy,
        status: StatusReporter,
    ) -> Self {
        Self {
            classifier,
            limiter,
            supply,
            retry,
            phoenix: Phoenix::new(phoenix),
            held: None,
            stats: KeyUsageStats::default(),
            status,
        }
    }

    pub fn held_key(&self) -> Option<&Credential> {
        self.held.as_ref()
    }

    pub fn stats(&self) -> &KeyUsageStats {
        &self.stats
    }

    pub fn into_stats(self) -> KeyUsageStats {
        self.stats
    }

    pub fn status(&self) -> &StatusReporter {
        &self.status
    }

    pub fn status_mut(&mut self) -> &mut StatusReporter {
        &mut self.status
    }

    pub fn phoenix(&self) -> &Phoenix {
        &self.phoenix
    }

    /// Run one call through the rate limiter with classified retries.
    ///
    /// Saturation waits do not consume attempts. Strikes are counted per key:
    /// transient failures back off on a key until it has `max_attempts`
    /// strikes, then it is retired. An invalid key is retired at once.
    pub async fn call(
        &mut self,
        request: ClassifyRequest<'_>,
    ) -> Result<Classification, SessionError> {
        let worker_id = self.status.worker_id();
        let mut strikes: BTreeMap<usize, u32> = BTreeMap::new();

        loop {
            let held = match self.held.take() {
                Some(key) => key,
                None => self.next_key().await?,
            };

            let key = match self.limiter.acquire(Some(held.index)) {
                Acquired::Saturated(wait) => {
                    tracing::info!(worker_id, wait_ms = wait.as_millis() as u64, "All keys busy, waiting");
                    self.held = Some(held);
                    self.status.publish(WorkerState::Cooling);
                    sleep(wait).await;
                    continue;
                }
                Acquired::Ready(index) if index != held.index => {
                    let Some(swapped) = self.supply.by_index(index).cloned() else {
                        // The reservation went to a key this worker cannot use
                        tracing::error!(worker_id, key = index, "Limiter granted a key missing from the supply");
                        self.held = Some(held);
                        return Err(SessionError::Fatal(CallError::Fatal(format!(
                            "Rate limiter granted unknown key #{index}"
                        ))));
                    };
                    tracing::info!(worker_id, from = held.index, to = index, "Swapped key");
                    swapped
                }
                Acquired::Ready(_) => held,
            };
            self.held = Some(key.clone());

            match self.classifier.classify(request, &key).await {
                Ok(classification) => {
                    self.record_success(key.index, &classification);
                    return Ok(classification);
                }
                Err(CallError::InvalidCredential(reason)) => {
                    tracing::warn!(worker_id, key = key.index, %reason, "Key invalid, retiring it");
                    self.stats.key(key.index).invalid += 1;
                    strikes.remove(&key.index);
                    self.retire_held().await?;
                }
                Err(CallError::Transient(kind)) => {
                    if kind == TransientKind::RateLimited {
                        self.status.event(StatusEvent::RateLimited);
                    }
                    let attempt = {
                        let count = strikes.entry(key.index).or_default();
                        *count += 1;
                        *count
                    };
                    if attempt >= self.retry.max_attempts {
                        tracing::warn!(worker_id, key = key.index, attempt, ?kind, "Key failed a usage cycle, retiring it");
                        self.stats.key(key.index).quota_failure += 1;
                        strikes.remove(&key.index);
                        self.retire_held().await?;
                        continue;
                    }

                    let backoff = if attempt == 1 {
                        self.retry.first_backoff
                    } else {
                        self.retry.second_backoff
                    };
                    tracing::warn!(
                        worker_id,
                        key = key.index,
                        attempt,
                        ?kind,
                        backoff_secs = backoff.as_secs(),
                        "Transient failure, backing off"
                    );
                    if attempt > 1 {
                        self.status.publish(WorkerState::Cooling);
                    }
                    sleep(backoff).await;
                }
                Err(fatal @ CallError::Fatal(_)) => {
                    tracing::error!(worker_id, key = key.index, error = %fatal, "Unexpected provider error");
                    return Err(SessionError::Fatal(fatal));
                }
            }
        }
    }

    fn record_success(&mut self, index: usize, classification: &Classification) {
        self.stats.key(index).success += 1;
        self.stats.api_calls += 1;
        self.stats.input_tokens += classification.input_tokens;
        self.stats.output_tokens += classification.output_tokens;
    }

    /// Drop the held key for good and pull a replacement.
    async fn retire_held(&mut self) -> Result<(), SessionError> {
        self.held = None;
        metrics::counter!("credentials_retired_total").increment(1);
        self.status.event(StatusEvent::KeyRetired);
        let replacement = self.next_key().await?;
        self.held = Some(replacement);
        Ok(())
    }

    /// Fresh key from the shared pile, or Phoenix recovery if it is empty.
    async fn next_key(&mut self) -> Result<Credential, SessionError> {
        let worker_id = self.status.worker_id();
        if let Some(key) = self.supply.take() {
            tracing::info!(worker_id, key = key.index, "Took key from supply");
            return Ok(key);
        }
        self.status.publish(WorkerState::Cooling);
        let key = self.phoenix.resurrect(worker_id, self.supply.all()).await?;
        Ok(key)
    }
}
