use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use crate::models::job::{Job, ListingResult, ListingStatus};

#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

const OUTPUT_PREFIX: &str = "output_annotated_";
const MERGED_PREFIX: &str = "output_merged_";

/// One row per input job, in input order. The last result per id wins;
/// ids without any result get a `Not Processed` placeholder.
pub fn merge_in_input_order(jobs: &[Job], results: &[ListingResult]) -> Vec<ListingResult> {
    let mut latest: HashMap<&str, &ListingResult> = HashMap::with_capacity(results.len());
    for result in results {
        latest.insert(result.job_id.as_str(), result);
    }

    let mut seen = HashSet::with_capacity(jobs.len());
    jobs.iter()
        .filter(|job| seen.insert(job.id.as_str()))
        .map(|job| match latest.get(job.id.as_str()) {
            Some(result) => (*result).clone(),
            None => ListingResult::for_job(job, ListingStatus::NotProcessed),
        })
        .collect()
}

/// Writes run snapshots into the output directory, atomically replacing
/// the previous one.
#[derive(Debug, Clone)]
pub struct CheckpointWriter {
    dir: PathBuf,
    run_ts: String,
}

impl CheckpointWriter {
    pub fn new(dir: impl Into<PathBuf>, run_ts: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            run_ts: run_ts.into(),
        }
    }

    pub fn output_path(&self) -> PathBuf {
        self.dir.join(format!("{OUTPUT_PREFIX}{}.json", self.run_ts))
    }

    pub fn merged_path(&self) -> PathBuf {
        self.dir.join(format!("{MERGED_PREFIX}{}.json", self.run_ts))
    }

    pub fn report_path(&self) -> PathBuf {
        self.dir.join(format!("session_report_{}.json", self.run_ts))
    }

    /// Merge `results` against the full input order and persist the rows.
    pub async fn save(
        &self,
        jobs: &[Job],
        results: &[ListingResult],
    ) -> Result<PathBuf, CheckpointError> {
        let rows = merge_in_input_order(jobs, results);
        let path = self.output_path();
        write_json_atomic(&path, &rows).await?;
        tracing::info!(
            path = %path.display(),
            rows = rows.len(),
            results = results.len(),
            "Saved checkpoint"
        );
        Ok(path)
    }

    /// Fold every run's output file under the directory into one table over
    /// `jobs` and persist it next to them.
    pub async fn save_merged(&self, jobs: &[Job]) -> Result<PathBuf, CheckpointError> {
        let rows = merge_outputs(&self.dir, jobs).await;
        let path = self.merged_path();
        write_json_atomic(&path, &rows).await?;
        tracing::info!(
            path = %path.display(),
            rows = rows.len(),
            done = rows.iter().filter(|r| r.status.is_terminal()).count(),
            "Saved merged output"
        );
        Ok(path)
    }

    pub async fn save_report<T: Serialize>(&self, report: &T) -> Result<PathBuf, CheckpointError> {
        let path = self.report_path();
        write_json_atomic(&path, report).await?;
        Ok(path)
    }
}

async fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), CheckpointError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let payload = serde_json::to_vec_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, payload).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

/// Rows of every `output_annotated_*.json` under `dir`, oldest run first.
/// Run timestamps sort lexicographically, so file name order is run order.
/// Unreadable files are skipped.
async fn read_outputs(dir: &Path) -> Vec<Vec<ListingResult>> {
    let mut files = Vec::new();
    let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
        return Vec::new();
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with(OUTPUT_PREFIX) && name.ends_with(".json") {
            files.push((name, entry.path()));
        }
    }
    files.sort();

    let mut outputs = Vec::with_capacity(files.len());
    for (name, path) in files {
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(file = %name, error = %e, "Skipping unreadable output file");
                continue;
            }
        };
        match serde_json::from_slice::<Vec<ListingResult>>(&bytes) {
            Ok(rows) => outputs.push(rows),
            Err(e) => tracing::warn!(file = %name, error = %e, "Skipping unreadable output file"),
        }
    }
    outputs
}

/// Ids with a terminal status in any earlier output file under `dir`.
pub async fn completed_ids(dir: &Path) -> HashSet<String> {
    read_outputs(dir)
        .await
        .into_iter()
        .flatten()
        .filter(|r| r.status.is_terminal())
        .map(|r| r.job_id)
        .collect()
}

/// One row per input job built from every run's output under `dir`.
///
/// Newer runs win per id, except that a placeholder (`Not Processed` or
/// `Requeued`) never hides a terminal row from an earlier run.
pub async fn merge_outputs(dir: &Path, jobs: &[Job]) -> Vec<ListingResult> {
    let mut best: HashMap<String, ListingResult> = HashMap::new();
    for row in read_outputs(dir).await.into_iter().flatten() {
        match best.get(&row.job_id) {
            Some(kept) if kept.status.is_terminal() && !row.status.is_terminal() => {}
            _ => {
                best.insert(row.job_id.clone(), row);
            }
        }
    }
    let rows: Vec<ListingResult> = best.into_values().collect();
    merge_in_input_order(jobs, &rows)
}
