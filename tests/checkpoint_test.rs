mod fixtures;

use fixtures::batch;
use tokio_test::assert_ok;
use listing_annotator::models::job::{ListingResult, ListingStatus};
use listing_annotator::services::checkpoint::{completed_ids, CheckpointWriter};
use listing_annotator::services::input::{load_jobs, skip_completed};

#[tokio::test]
async fn test_half_finished_batch_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let jobs = batch(100);
    // Results arrive out of order: every other listing, newest first
    let results: Vec<ListingResult> = jobs
        .iter()
        .step_by(2)
        .rev()
        .map(|job| ListingResult::for_job(job, ListingStatus::NoChange))
        .collect();
    assert_eq!(results.len(), 50);

    let writer = CheckpointWriter::new(dir.path(), "mid-run");
    let path = assert_ok!(writer.save(&jobs, &results).await);

    let rows: Vec<ListingResult> = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
    assert_eq!(rows.len(), 100);
    for (row, job) in rows.iter().zip(&jobs) {
        assert_eq!(row.job_id, job.id);
    }
    let placeholders = rows.iter().filter(|r| r.status == ListingStatus::NotProcessed).count();
    assert_eq!(placeholders, 50);
    assert_eq!(rows[0].status, ListingStatus::NoChange);
    assert_eq!(rows[1].status, ListingStatus::NotProcessed);
    // No temp file left behind
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
}

#[tokio::test]
async fn test_resume_skips_listings_finished_earlier() {
    let dir = tempfile::tempdir().unwrap();
    let jobs = batch(4);
    let earlier = vec![
        ListingResult::for_job(&jobs[0], ListingStatus::RequireUpdate),
        ListingResult::for_job(&jobs[1], ListingStatus::Requeued),
        ListingResult::system_error(&jobs[2], "HTTP 400"),
    ];
    CheckpointWriter::new(dir.path(), "run-1")
        .save(&jobs, &earlier)
        .await
        .unwrap();

    let input = dir.path().join("listings.json");
    std::fs::write(&input, serde_json::to_vec(&jobs).unwrap()).unwrap();

    let loaded = load_jobs(&input).await.unwrap();
    let done = completed_ids(dir.path()).await;
    let left: Vec<String> = skip_completed(loaded, &done).into_iter().map(|j| j.id).collect();

    assert_eq!(left, vec![jobs[1].id.clone(), jobs[3].id.clone()]);
}
