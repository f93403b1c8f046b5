//! Scripted stand-ins for the model and image download.

#![allow(dead_code)]

use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::time::Instant;

use listing_annotator::config::{PhoenixPolicy, RetryPolicy};
use listing_annotator::models::credential::Credential;
use listing_annotator::models::status::StatusEvent;
use listing_annotator::services::classifier::{
    CallError, Classification, ClassifyRequest, Classifier, TransientKind,
};
use listing_annotator::services::credentials::KeySupply;
use listing_annotator::services::images::ImageFetcher;
use listing_annotator::services::ledger::KeyLedger;
use listing_annotator::services::rate_limiter::RateLimiter;
use listing_annotator::services::session::{CallSession, StatusReporter};

/// One observed call: which key it went out on and when.
#[derive(Debug, Clone)]
pub struct CallRecord {
    pub key: usize,
    pub kind: &'static str,
    pub at: Instant,
}

/// Fake model. Outcomes come from the script first, then from the fixed
/// per-key rules, then the default reply.
pub struct ScriptedClassifier {
    script: Mutex<VecDeque<Result<Classification, CallError>>>,
    reply: String,
    invalid_keys: HashSet<usize>,
    failing_keys: HashSet<usize>,
    fatal_marker: Option<String>,
    panic_marker: Option<String>,
    latency: Duration,
    calls: Mutex<Vec<CallRecord>>,
}

impl ScriptedClassifier {
    pub fn answering(reply: &str) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            reply: reply.to_string(),
            invalid_keys: HashSet::new(),
            failing_keys: HashSet::new(),
            fatal_marker: None,
            panic_marker: None,
            latency: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_script(self, outcomes: Vec<Result<Classification, CallError>>) -> Self {
        *self.script.lock() = outcomes.into();
        self
    }

    /// Keys the provider rejects outright.
    pub fn with_invalid_keys(mut self, keys: &[usize]) -> Self {
        self.invalid_keys = keys.iter().copied().collect();
        self
    }

    /// Keys that always answer with a rate-limit error.
    pub fn with_failing_keys(mut self, keys: &[usize]) -> Self {
        self.failing_keys = keys.iter().copied().collect();
        self
    }

    /// Primary calls whose breadcrumb contains `marker` fail fatally.
    pub fn with_fatal_marker(mut self, marker: &str) -> Self {
        self.fatal_marker = Some(marker.to_string());
        self
    }

    /// Primary calls whose breadcrumb contains `marker` panic the caller.
    pub fn with_panic_marker(mut self, marker: &str) -> Self {
        self.panic_marker = Some(marker.to_string());
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn calls(&self) -> Vec<CallRecord> {
        self.calls.lock().clone()
    }

    fn outcome(&self, request: ClassifyRequest<'_>, key: &Credential) -> Result<Classification, CallError> {
        if let Some(scripted) = self.script.lock().pop_front() {
            return scripted;
        }
        if self.invalid_keys.contains(&key.index) {
            return Err(CallError::InvalidCredential("API key not valid".to_string()));
        }
        if self.failing_keys.contains(&key.index) {
            return Err(CallError::Transient(TransientKind::RateLimited));
        }
        if let (Some(marker), ClassifyRequest::Primary { breadcrumb, .. }) = (&self.fatal_marker, request) {
            if breadcrumb.contains(marker.as_str()) {
                return Err(CallError::Fatal("HTTP 400: malformed request".to_string()));
            }
        }
        Ok(reply(&self.reply))
    }
}

impl Classifier for ScriptedClassifier {
    async fn classify(
        &self,
        request: ClassifyRequest<'_>,
        key: &Credential,
    ) -> Result<Classification, CallError> {
        self.calls.lock().push(CallRecord {
            key: key.index,
            kind: request.kind(),
            at: Instant::now(),
        });
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if let (Some(marker), ClassifyRequest::Primary { breadcrumb, .. }) = (&self.panic_marker, request) {
            assert!(!breadcrumb.contains(marker.as_str()), "classifier blew up on {breadcrumb}");
        }
        self.outcome(request, key)
    }
}

pub fn reply(text: &str) -> Classification {
    Classification {
        text: text.to_string(),
        input_tokens: 1_000,
        output_tokens: 100,
    }
}

pub fn rate_limited() -> Result<Classification, CallError> {
    Err(CallError::Transient(TransientKind::RateLimited))
}

/// Hands back one small fake JPEG per URL, up to the limit.
pub struct StaticImages;

impl ImageFetcher for StaticImages {
    async fn fetch(&self, urls: &[String], limit: usize) -> Vec<Vec<u8>> {
        urls.iter()
            .take(limit)
            .map(|_| vec![0xFF, 0xD8, 0xFF, 0xE0])
            .collect()
    }
}

pub fn credentials(count: usize) -> Vec<Credential> {
    (1..=count)
        .map(|i| Credential::new(i, format!("AIzaSyTEST{i:04}ABCDEFGH")))
        .collect()
}

/// Supply plus a limiter over the same key indices.
pub fn key_pool(count: usize, rpm: u32) -> (Arc<KeySupply>, RateLimiter) {
    let supply = Arc::new(KeySupply::new(credentials(count)));
    let ledger = Arc::new(KeyLedger::new(supply.indices(), rpm, Instant::now()));
    (supply, RateLimiter::new(ledger))
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        first_backoff: Duration::from_millis(10),
        second_backoff: Duration::from_millis(20),
        max_attempts: 3,
    }
}

pub fn no_recovery() -> PhoenixPolicy {
    PhoenixPolicy { cooldowns: Vec::new() }
}

pub struct SessionHarness<C> {
    pub session: CallSession<C>,
    pub supply: Arc<KeySupply>,
    pub events: UnboundedReceiver<StatusEvent>,
}

pub fn session<C: Classifier>(
    classifier: Arc<C>,
    keys: usize,
    rpm: u32,
    retry: RetryPolicy,
    phoenix: PhoenixPolicy,
) -> SessionHarness<C> {
    let (supply, limiter) = key_pool(keys, rpm);
    let (tx, events) = mpsc::unbounded_channel();
    let session = CallSession::new(
        classifier,
        limiter,
        Arc::clone(&supply),
        retry,
        phoenix,
        StatusReporter::new(1, tx),
    );
    SessionHarness {
        session,
        supply,
        events,
    }
}

/// Everything currently buffered on a status channel.
pub fn drain_events(events: &mut UnboundedReceiver<StatusEvent>) -> Vec<StatusEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}
