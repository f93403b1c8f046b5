use std::time::Duration;
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

use listing_annotator::{
    config::AppConfig,
    services::gemini::{GeminiClient, KeyHealth},
};

/// Spacing between probes so the check itself does not trip rate limits.
const PROBE_SPACING: Duration = Duration::from_millis(200);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let config = AppConfig::from_env()?;
    let client = GeminiClient::new(
        &config.gemini_endpoint,
        &config.gemini_model,
        config.request_timeout(),
    )?;

    let keys = config.credentials();
    tracing::info!(keys = keys.len(), model = client.model(), "Checking API keys");

    let mut active = 0;
    for (i, key) in keys.iter().enumerate() {
        if i > 0 {
            sleep(PROBE_SPACING).await;
        }
        let health = client.probe(key).await;
        if health == KeyHealth::Active {
            active += 1;
        }
        tracing::info!(key = key.index, masked = %key.masked, status = %health, "Key checked");
        println!("{key}: {health}");
    }

    tracing::info!(active, total = keys.len(), "Key check finished");
    Ok(())
}
