use listing_annotator::config::AppConfig;
use listing_annotator::services::gemini::{GeminiClient, KeyHealth};

/// Probes the first configured key against the real API.
///
/// Needs GEMINI_API_KEYS in the environment or a .env file.
#[tokio::test]
#[ignore] // Run with: cargo test --test live_gemini_test -- --ignored
async fn test_live_probe_first_key() {
    let config = AppConfig::from_env().expect("Failed to load config");
    let client = GeminiClient::new(
        &config.gemini_endpoint,
        &config.gemini_model,
        config.request_timeout(),
    )
    .expect("Failed to build client");

    let keys = config.credentials();
    let key = keys.first().expect("No keys configured");
    let health = client.probe(key).await;

    assert_ne!(health, KeyHealth::Unknown, "probe of {key} failed unexpectedly");
}
