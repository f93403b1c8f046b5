use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// One scraped listing waiting for annotation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub id: String,
    #[serde(default)]
    pub breadcrumbs: Vec<String>,
    #[serde(default)]
    pub image_urls: Vec<String>,
}

impl Job {
    /// Spreadsheet exports turn numeric ids into `12345.0`; undo that.
    pub fn normalize_id(raw: &str) -> String {
        let trimmed = raw.trim();
        trimmed.strip_suffix(".0").unwrap_or(trimmed).to_string()
    }

    pub fn breadcrumb_text(&self) -> String {
        self.breadcrumbs
            .iter()
            .map(|b| b.trim())
            .filter(|b| !b.is_empty())
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn is_inactive(&self) -> bool {
        self.breadcrumbs
            .iter()
            .any(|b| b.to_lowercase().contains("inactive"))
    }
}

/// Final disposition of a listing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
pub enum ListingStatus {
    /// Annotated categories agree with the breadcrumb.
    #[serde(rename = "No change")]
    #[strum(serialize = "No change")]
    NoChange,

    #[serde(rename = "Require Update")]
    #[strum(serialize = "Require Update")]
    RequireUpdate,

    #[serde(rename = "Image not clear")]
    #[strum(serialize = "Image not clear")]
    ImageNotClear,

    #[serde(rename = "Inactive ad")]
    #[strum(serialize = "Inactive ad")]
    Inactive,

    #[serde(rename = "No Images Present")]
    #[strum(serialize = "No Images Present")]
    NoImages,

    #[serde(rename = "AI Error")]
    #[strum(serialize = "AI Error")]
    AiError,

    #[serde(rename = "System Error")]
    #[strum(serialize = "System Error")]
    SystemError,

    #[serde(rename = "Re-queued (credentials exhausted)")]
    #[strum(serialize = "Re-queued (credentials exhausted)")]
    Requeued,

    #[serde(rename = "Not Processed")]
    #[strum(serialize = "Not Processed")]
    NotProcessed,
}

impl ListingStatus {
    /// Whether a later run should leave this listing alone.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Requeued | Self::NotProcessed)
    }
}

/// One ranked category guess.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Candidate {
    pub category: String,
    pub score: f64,
}

impl Candidate {
    pub fn new(category: impl Into<String>, score: f64) -> Self {
        Self {
            category: category.into(),
            score,
        }
    }
}

/// Annotation outcome for one listing, also the row shape of every output file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ListingResult {
    pub job_id: String,
    #[serde(default)]
    pub breadcrumbs: Vec<String>,
    #[serde(default)]
    pub annotations: Vec<Candidate>,
    #[serde(default)]
    pub image_count: usize,
    #[serde(default)]
    pub image_urls: Vec<String>,
    pub status: ListingStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub cost_cents: f64,
}

impl ListingResult {
    /// A result carrying only the job's own fields and a status.
    pub fn for_job(job: &Job, status: ListingStatus) -> Self {
        Self {
            job_id: job.id.clone(),
            breadcrumbs: job.breadcrumbs.clone(),
            annotations: Vec::new(),
            image_count: job.image_urls.len(),
            image_urls: job.image_urls.clone(),
            status,
            error: None,
            cost_cents: 0.0,
        }
    }

    pub fn system_error(job: &Job, message: &str) -> Self {
        let mut result = Self::for_job(job, ListingStatus::SystemError);
        result.error = Some(message.chars().take(120).collect());
        result
    }

    pub fn top_category(&self) -> Option<&str> {
        self.annotations.first().map(|c| c.category.as_str())
    }
}
