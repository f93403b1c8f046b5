use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tokio::time::Instant;
use tracing_subscriber::EnvFilter;

use listing_annotator::{
    app_state::AppState,
    config::AppConfig,
    routes,
    services::{
        annotate::Annotator,
        checkpoint::{completed_ids, CheckpointWriter},
        credentials::KeySupply,
        dispatcher::{Dispatcher, RunPolicies},
        gemini::GeminiClient,
        images::HttpImageFetcher,
        input::{load_jobs, skip_completed},
        ledger::KeyLedger,
        progress::ProgressBoard,
        rate_limiter::RateLimiter,
    },
};

fn describe_metrics() {
    metrics::describe_counter!("credential_swaps_total", "Calls moved to a different key with free capacity");
    metrics::describe_counter!("credential_saturation_waits_total", "Times every key was at its RPM limit");
    metrics::describe_counter!("credentials_retired_total", "Keys dropped as invalid or exhausted");
    metrics::describe_counter!("phoenix_cycles_total", "Cool-down cycles entered with an empty key supply");
    metrics::describe_counter!("classification_calls_total", "Outbound model calls by kind");
    metrics::describe_counter!("listings_completed_total", "Listings annotated");
    metrics::describe_counter!("listings_failed_total", "Listings that ended in a system error");
    metrics::describe_histogram!("listing_processing_seconds", "Wall time to annotate one listing");
    metrics::describe_gauge!("job_queue_depth", "Listings waiting in the job queue");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let config = AppConfig::from_env()?;
    tracing::info!(model = %config.gemini_model, workers = config.workers, "Initializing listing-annotator");

    let prometheus = Arc::new(PrometheusBuilder::new().install_recorder()?);
    describe_metrics();

    let input = config
        .input_file
        .clone()
        .ok_or("INPUT_FILE must point at the scraped listings")?;
    let all_jobs = load_jobs(&input).await?;
    let run_ts = chrono::Local::now().format("%Y-%m-%d_%H-%M-%S").to_string();
    let writer = CheckpointWriter::new(&config.output_dir, run_ts);

    let mut jobs = all_jobs.clone();
    if config.resume {
        let done = completed_ids(&config.output_dir).await;
        jobs = skip_completed(jobs, &done);
        tracing::info!(loaded = all_jobs.len(), skipped = all_jobs.len() - jobs.len(), "Applied resume filter");
    }
    if jobs.is_empty() {
        tracing::info!("Every listing is already annotated, nothing to do");
        writer.save_merged(&all_jobs).await?;
        return Ok(());
    }

    let keys = config.credentials();
    if keys.is_empty() {
        return Err("GEMINI_API_KEYS contains no keys".into());
    }
    tracing::info!(keys = keys.len(), rpm = config.rate_limit_rpm, "Loaded API keys");
    let supply = Arc::new(KeySupply::new(keys));
    let ledger = Arc::new(KeyLedger::new(supply.indices(), config.rate_limit_rpm, Instant::now()));
    let limiter = RateLimiter::new(ledger);

    let classifier = Arc::new(GeminiClient::new(
        &config.gemini_endpoint,
        &config.gemini_model,
        config.request_timeout(),
    )?);
    let images = Arc::new(HttpImageFetcher::new(config.request_timeout())?);

    let board = Arc::new(ProgressBoard::new(jobs.len()));
    let app = routes::router(AppState::new(Arc::clone(&board)), prometheus);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("Progress server listening on {}", config.bind_addr);
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "Progress server stopped");
        }
    });

    let dispatcher = Dispatcher::new(
        classifier,
        images,
        limiter,
        supply,
        Arc::new(Annotator::new(config.annotation_policy())),
        RunPolicies {
            retry: config.retry_policy(),
            phoenix: config.phoenix_policy(),
            dispatch: config.dispatch_policy(),
        },
        writer.clone(),
        board,
    );

    let summary = dispatcher.run(jobs).await;
    match &summary.output {
        Some(path) => tracing::info!(path = %path.display(), rows = summary.rows.len(), "Results written"),
        None => tracing::warn!("No results were written"),
    }
    // Earlier runs' rows only live in their own files while resuming
    writer.save_merged(&all_jobs).await?;
    Ok(())
}
