use garde::Validate;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::models::credential::Credential;

#[derive(Debug, Deserialize, Validate)]
pub struct AppConfig {
    /// Progress/metrics server bind address (e.g., "0.0.0.0:3000").
    #[serde(default = "default_bind_addr")]
    #[garde(length(min = 1))]
    pub bind_addr: String,

    /// Gemini API keys, comma separated. Order defines the key index.
    #[garde(length(min = 1))]
    pub gemini_api_keys: String,

    #[serde(default = "default_gemini_model")]
    #[garde(length(min = 1))]
    pub gemini_model: String,

    /// Base URL of the generative-language API
    #[serde(default = "default_gemini_endpoint")]
    #[garde(length(min = 1))]
    pub gemini_endpoint: String,

    /// Requests per minute allowed per key
    #[serde(default = "default_rate_limit_rpm")]
    #[garde(range(min = 1))]
    pub rate_limit_rpm: u32,

    #[serde(default = "default_workers")]
    #[garde(range(min = 1, max = 64))]
    pub workers: usize,

    /// Scraped listings (JSON array or JSON lines). Only the runner needs it.
    #[serde(default)]
    #[garde(skip)]
    pub input_file: Option<PathBuf>,

    #[serde(default = "default_output_dir")]
    #[garde(skip)]
    pub output_dir: PathBuf,

    #[serde(default = "default_checkpoint_interval_secs")]
    #[garde(range(min = 1))]
    pub checkpoint_interval_secs: u64,

    #[serde(default = "default_job_pop_timeout_ms")]
    #[garde(range(min = 1))]
    pub job_pop_timeout_ms: u64,

    #[serde(default = "default_worker_stagger_ms")]
    #[garde(skip)]
    pub worker_stagger_ms: u64,

    /// Backoff after the first transient failure on a key
    #[serde(default = "default_retry_first_backoff_secs")]
    #[garde(skip)]
    pub retry_first_backoff_secs: u64,

    /// Backoff after the second transient failure on a key
    #[serde(default = "default_retry_second_backoff_secs")]
    #[garde(skip)]
    pub retry_second_backoff_secs: u64,

    #[serde(default = "default_phoenix_first_cooldown_secs")]
    #[garde(skip)]
    pub phoenix_first_cooldown_secs: u64,

    #[serde(default = "default_phoenix_second_cooldown_secs")]
    #[garde(skip)]
    pub phoenix_second_cooldown_secs: u64,

    /// Timeout for a single Gemini request
    #[serde(default = "default_request_timeout_secs")]
    #[garde(range(min = 1))]
    pub request_timeout_secs: u64,

    /// Send two images per listing instead of one
    #[serde(default = "default_true")]
    #[garde(skip)]
    pub high_accuracy: bool,

    #[serde(default = "default_high_confidence_threshold")]
    #[garde(range(min = 0.0, max = 100.0))]
    pub high_confidence_threshold: f64,

    /// Categories whose top-1 prediction triggers a verification call
    #[serde(default = "default_verify_categories")]
    #[garde(skip)]
    pub verify_categories: String,

    /// Skip listings already annotated by earlier runs
    #[serde(default = "default_true")]
    #[garde(skip)]
    pub resume: bool,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_gemini_model() -> String {
    "gemini-2.5-flash".to_string()
}

fn default_gemini_endpoint() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}

fn default_rate_limit_rpm() -> u32 {
    13
}

fn default_workers() -> usize {
    10
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}

fn default_checkpoint_interval_secs() -> u64 {
    60
}

fn default_job_pop_timeout_ms() -> u64 {
    2000
}

fn default_worker_stagger_ms() -> u64 {
    500
}

fn default_retry_first_backoff_secs() -> u64 {
    5
}

fn default_retry_second_backoff_secs() -> u64 {
    15
}

fn default_phoenix_first_cooldown_secs() -> u64 {
    120
}

fn default_phoenix_second_cooldown_secs() -> u64 {
    300
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

fn default_high_confidence_threshold() -> f64 {
    95.0
}

fn default_verify_categories() -> String {
    [
        "Box Truck - Straight Truck",
        "Cutaway-Cube Van",
        "Stepvan",
        "Cabover Truck - COE",
        "Cab-Chassis",
        "Pickup Truck",
    ]
    .join(",")
}

/// Backoff schedule for transient classification failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub first_backoff: Duration,
    pub second_backoff: Duration,
    /// Attempts on one key before it is retired.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            first_backoff: Duration::from_secs(default_retry_first_backoff_secs()),
            second_backoff: Duration::from_secs(default_retry_second_backoff_secs()),
            max_attempts: 3,
        }
    }
}

/// Cool-down schedule used when the key supply runs dry.
#[derive(Debug, Clone)]
pub struct PhoenixPolicy {
    pub cooldowns: Vec<Duration>,
}

impl Default for PhoenixPolicy {
    fn default() -> Self {
        Self {
            cooldowns: vec![
                Duration::from_secs(default_phoenix_first_cooldown_secs()),
                Duration::from_secs(default_phoenix_second_cooldown_secs()),
            ],
        }
    }
}

#[derive(Debug, Clone)]
pub struct DispatchPolicy {
    pub workers: usize,
    pub pop_timeout: Duration,
    pub stagger: Duration,
    pub checkpoint_interval: Duration,
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            pop_timeout: Duration::from_millis(default_job_pop_timeout_ms()),
            stagger: Duration::from_millis(default_worker_stagger_ms()),
            checkpoint_interval: Duration::from_secs(default_checkpoint_interval_secs()),
        }
    }
}

/// Knobs for the per-listing annotation pipeline.
#[derive(Debug, Clone)]
pub struct AnnotationPolicy {
    pub model: String,
    pub high_accuracy: bool,
    pub high_confidence_threshold: f64,
    pub verify_categories: Vec<String>,
}

impl Default for AnnotationPolicy {
    fn default() -> Self {
        Self {
            model: default_gemini_model(),
            high_accuracy: true,
            high_confidence_threshold: default_high_confidence_threshold(),
            verify_categories: split_list(&default_verify_categories()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Environment error: {0}")]
    Env(#[from] envy::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(#[from] garde::Report),

    #[error("Second retry backoff ({second}s) is shorter than the first ({first}s)")]
    BackoffOrder { first: u64, second: u64 },
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let config: Self = envy::from_env()?;
        config.check()?;
        Ok(config)
    }

    /// Field validation plus the cross-field backoff ordering rule.
    pub fn check(&self) -> Result<(), ConfigError> {
        self.validate()?;
        if self.retry_second_backoff_secs < self.retry_first_backoff_secs {
            return Err(ConfigError::BackoffOrder {
                first: self.retry_first_backoff_secs,
                second: self.retry_second_backoff_secs,
            });
        }
        Ok(())
    }

    /// Key list with stable 1-based indices.
    pub fn credentials(&self) -> Vec<Credential> {
        split_list(&self.gemini_api_keys)
            .into_iter()
            .enumerate()
            .map(|(i, secret)| Credential::new(i + 1, secret))
            .collect()
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            first_backoff: Duration::from_secs(self.retry_first_backoff_secs),
            second_backoff: Duration::from_secs(self.retry_second_backoff_secs),
            max_attempts: 3,
        }
    }

    pub fn phoenix_policy(&self) -> PhoenixPolicy {
        PhoenixPolicy {
            cooldowns: vec![
                Duration::from_secs(self.phoenix_first_cooldown_secs),
                Duration::from_secs(self.phoenix_second_cooldown_secs),
            ],
        }
    }

    pub fn dispatch_policy(&self) -> DispatchPolicy {
        DispatchPolicy {
            workers: self.workers,
            pop_timeout: Duration::from_millis(self.job_pop_timeout_ms),
            stagger: Duration::from_millis(self.worker_stagger_ms),
            checkpoint_interval: Duration::from_secs(self.checkpoint_interval_secs),
        }
    }

    pub fn annotation_policy(&self) -> AnnotationPolicy {
        AnnotationPolicy {
            model: self.gemini_model.clone(),
            high_accuracy: self.high_accuracy,
            high_confidence_threshold: self.high_confidence_threshold,
            verify_categories: split_list(&self.verify_categories),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
