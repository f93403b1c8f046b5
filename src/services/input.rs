use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;

use crate::models::job::Job;

#[derive(Debug, thiserror::Error)]
pub enum InputError {
    #[error("Failed to read input: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed input on line {line}: {source}")]
    Parse {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("Input contains no listings")]
    Empty,
}

/// Scraper output row. Spreadsheet round-trips leave numeric ids behind, so
/// the id is accepted as either a string or a number.
#[derive(Deserialize)]
struct RawJob {
    id: serde_json::Value,
    #[serde(default)]
    breadcrumbs: Vec<String>,
    #[serde(default)]
    image_urls: Vec<String>,
}

impl RawJob {
    fn into_job(self) -> Option<Job> {
        let raw_id = match self.id {
            serde_json::Value::String(s) => s,
            serde_json::Value::Number(n) => n.to_string(),
            _ => return None,
        };
        let id = Job::normalize_id(&raw_id);
        if id.is_empty() {
            return None;
        }
        Some(Job {
            id,
            breadcrumbs: self.breadcrumbs,
            image_urls: self.image_urls,
        })
    }
}

pub async fn load_jobs(path: &Path) -> Result<Vec<Job>, InputError> {
    let raw = tokio::fs::read_to_string(path).await?;
    parse_jobs(&raw)
}

/// Parse a JSON array or JSON lines. Rows without a usable id are skipped
/// and a repeated id keeps its first occurrence.
pub fn parse_jobs(raw: &str) -> Result<Vec<Job>, InputError> {
    let rows: Vec<RawJob> = if raw.trim_start().starts_with('[') {
        serde_json::from_str(raw).map_err(|source| InputError::Parse { line: source.line(), source })?
    } else {
        raw.lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(i, line)| {
                serde_json::from_str(line).map_err(|source| InputError::Parse { line: i + 1, source })
            })
            .collect::<Result<_, _>>()?
    };

    let mut seen = HashSet::new();
    let jobs: Vec<Job> = rows
        .into_iter()
        .filter_map(RawJob::into_job)
        .filter(|job| seen.insert(job.id.clone()))
        .collect();

    if jobs.is_empty() {
        return Err(InputError::Empty);
    }
    Ok(jobs)
}

/// Drop jobs a previous run already finished.
pub fn skip_completed(jobs: Vec<Job>, done: &HashSet<String>) -> Vec<Job> {
    jobs.into_iter().filter(|job| !done.contains(&job.id)).collect()
}
