use base64::Engine;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;

use super::classifier::{CallError, Classification, ClassifyRequest, Classifier, TransientKind};
use crate::models::credential::Credential;

/// Client for the Gemini `generateContent` endpoint.
pub struct GeminiClient {
    http: Client,
    endpoint: String,
    model: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<ResponseCandidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Deserialize)]
struct ResponseCandidate {
    content: Option<ResponseContent>,
}

#[derive(Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: u64,
}

/// `{"error": {...}}` envelope returned on non-2xx responses.
#[derive(Debug, Deserialize, Serialize, Default)]
pub struct ApiErrorEnvelope {
    pub error: ApiError,
}

#[derive(Debug, Deserialize, Serialize, Default)]
pub struct ApiError {
    #[serde(default)]
    pub code: u16,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub details: Vec<ApiErrorDetail>,
}

#[derive(Debug, Deserialize, Serialize, Default)]
pub struct ApiErrorDetail {
    #[serde(default)]
    pub reason: Option<String>,
}

impl ApiError {
    fn has_reason(&self, reason: &str) -> bool {
        self.details
            .iter()
            .any(|d| d.reason.as_deref() == Some(reason))
    }
}

impl GeminiClient {
    pub fn new(endpoint: &str, model: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model: model.to_string(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn generate(
        &self,
        request: ClassifyRequest<'_>,
        key: &Credential,
    ) -> Result<Classification, CallError> {
        let url = format!("{}/models/{}:generateContent", self.endpoint, self.model);
        let body = json!({ "contents": [{ "parts": build_parts(request) }] });

        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", key.secret())
            .json(&body)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let envelope: ApiErrorEnvelope = response.json().await.unwrap_or_default();
            return Err(classify_http_error(status, &envelope.error));
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| CallError::Fatal(format!("Malformed response: {e}")))?;

        let text = parsed
            .candidates
            .into_iter()
            .filter_map(|c| c.content)
            .flat_map(|c| c.parts)
            .filter_map(|p| p.text)
            .collect::<Vec<_>>()
            .join("\n");
        let usage = parsed.usage_metadata.unwrap_or_default();

        Ok(Classification {
            text,
            input_tokens: usage.prompt_token_count,
            output_tokens: usage.candidates_token_count,
        })
    }
}

/// Health of one key as seen by a single probe call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
pub enum KeyHealth {
    Active,
    #[strum(serialize = "Quota Exhausted")]
    QuotaExhausted,
    #[strum(serialize = "Invalid Key")]
    Invalid,
    #[strum(serialize = "Unknown Error")]
    Unknown,
}

impl KeyHealth {
    pub fn from_outcome(outcome: &Result<Classification, CallError>) -> Self {
        match outcome {
            Ok(_) => Self::Active,
            Err(CallError::InvalidCredential(_)) => Self::Invalid,
            Err(CallError::Transient(TransientKind::RateLimited)) => Self::QuotaExhausted,
            Err(_) => Self::Unknown,
        }
    }
}

impl GeminiClient {
    /// One tiny text call on `key`, bypassing the rate limiter.
    pub async fn probe(&self, key: &Credential) -> KeyHealth {
        let outcome = self.generate(ClassifyRequest::Probe, key).await;
        if let Err(e) = &outcome {
            tracing::debug!(key = key.index, error = %e, "Probe failed");
        }
        KeyHealth::from_outcome(&outcome)
    }
}

impl Classifier for GeminiClient {
    async fn classify(
        &self,
        request: ClassifyRequest<'_>,
        key: &Credential,
    ) -> Result<Classification, CallError> {
        metrics::counter!("classification_calls_total", "kind" => request.kind()).increment(1);
        self.generate(request, key).await
    }
}

fn map_transport_error(e: reqwest::Error) -> CallError {
    if e.is_timeout() {
        CallError::Transient(TransientKind::Timeout)
    } else if e.is_connect() {
        CallError::Transient(TransientKind::Connection)
    } else {
        CallError::Fatal(e.to_string())
    }
}

/// Map an HTTP failure onto the retry taxonomy using the provider's
/// structured `status` and `reason` codes.
pub fn classify_http_error(status: StatusCode, error: &ApiError) -> CallError {
    if error.has_reason("API_KEY_INVALID")
        || matches!(error.status.as_str(), "UNAUTHENTICATED" | "PERMISSION_DENIED")
        || matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN)
    {
        return CallError::InvalidCredential(error.message.clone());
    }
    if status == StatusCode::TOO_MANY_REQUESTS || error.status == "RESOURCE_EXHAUSTED" {
        return CallError::Transient(TransientKind::RateLimited);
    }
    if status == StatusCode::GATEWAY_TIMEOUT || error.status == "DEADLINE_EXCEEDED" {
        return CallError::Transient(TransientKind::Timeout);
    }
    if status.is_server_error() {
        return CallError::Transient(TransientKind::Upstream(status.as_u16()));
    }
    CallError::Fatal(format!("HTTP {}: {}", status.as_u16(), error.message))
}

fn inline_image(bytes: &[u8]) -> serde_json::Value {
    json!({
        "inline_data": {
            "mime_type": "image/jpeg",
            "data": base64::engine::general_purpose::STANDARD.encode(bytes),
        }
    })
}

fn build_parts(request: ClassifyRequest<'_>) -> Vec<serde_json::Value> {
    match request {
        ClassifyRequest::Primary { breadcrumb, images } => {
            let prompt = format!(
                concat!(
                    "You are an expert commercial vehicle classifier. ",
                    "Identify the body type of the vehicle in the ad image(s).\n",
                    "Context breadcrumb: \"{}\"\n",
                    "Reply with up to three lines, most likely first, formatted as ",
                    "`1. Category Name (NN%)`. ",
                    "Reply `Image Not Clear (100%)` only if no vehicle is visible at all."
                ),
                breadcrumb
            );
            let mut parts = vec![json!({ "text": prompt })];
            parts.extend(images.iter().map(|img| inline_image(img)));
            parts
        }
        ClassifyRequest::Refine { options, image } => {
            let prompt = format!(
                "Choose the single category that best describes the truck body from: [{}]. \
                 Output ONLY the category name.",
                options.join(", ")
            );
            vec![json!({ "text": prompt }), inline_image(image)]
        }
        ClassifyRequest::Verify { category, image } => {
            let prompt = format!(
                "This vehicle was classified as '{category}'. Does it have dual rear wheels \
                 (two tires on each side of the rear axle)? Answer `YES - NN%` or `NO - NN%`."
            );
            vec![json!({ "text": prompt }), inline_image(image)]
        }
        ClassifyRequest::Probe => vec![json!({ "text": "test" })],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api_error(status: &str, reason: Option<&str>) -> ApiError {
        ApiError {
            code: 400,
            message: "boom".to_string(),
            status: status.to_string(),
            details: reason
                .map(|r| vec![ApiErrorDetail { reason: Some(r.to_string()) }])
                .unwrap_or_default(),
        }
    }

    #[test]
    fn test_invalid_key_by_reason() {
        let err = classify_http_error(
            StatusCode::BAD_REQUEST,
            &api_error("INVALID_ARGUMENT", Some("API_KEY_INVALID")),
        );
        assert!(matches!(err, CallError::InvalidCredential(_)));
    }

    #[test]
    fn test_forbidden_is_invalid_key() {
        let err = classify_http_error(StatusCode::FORBIDDEN, &ApiError::default());
        assert!(matches!(err, CallError::InvalidCredential(_)));
    }

    #[test]
    fn test_quota_is_rate_limited() {
        let err = classify_http_error(
            StatusCode::TOO_MANY_REQUESTS,
            &api_error("RESOURCE_EXHAUSTED", None),
        );
        assert_eq!(err, CallError::Transient(TransientKind::RateLimited));
    }

    #[test]
    fn test_server_errors_are_transient() {
        let err = classify_http_error(StatusCode::SERVICE_UNAVAILABLE, &ApiError::default());
        assert_eq!(err, CallError::Transient(TransientKind::Upstream(503)));
        let err = classify_http_error(StatusCode::GATEWAY_TIMEOUT, &ApiError::default());
        assert_eq!(err, CallError::Transient(TransientKind::Timeout));
    }

    #[test]
    fn test_other_client_errors_are_fatal() {
        let err = classify_http_error(
            StatusCode::BAD_REQUEST,
            &api_error("INVALID_ARGUMENT", None),
        );
        assert!(matches!(err, CallError::Fatal(msg) if msg.contains("400")));
    }

    #[test]
    fn test_primary_parts_include_every_image() {
        let images = vec![vec![1u8, 2, 3], vec![4u8]];
        let parts = build_parts(ClassifyRequest::Primary {
            breadcrumb: "Trucks, Box Truck",
            images: &images,
        });
        assert_eq!(parts.len(), 3);
        assert!(parts[0]["text"].as_str().unwrap().contains("Trucks, Box Truck"));
        assert_eq!(parts[1]["inline_data"]["data"], "AQID");
    }

    #[test]
    fn test_probe_outcome_labels() {
        let quota = Err(CallError::Transient(TransientKind::RateLimited));
        assert_eq!(KeyHealth::from_outcome(&quota).to_string(), "Quota Exhausted");
        let invalid = Err(CallError::InvalidCredential("bad".to_string()));
        assert_eq!(KeyHealth::from_outcome(&invalid), KeyHealth::Invalid);
        let upstream = Err(CallError::Transient(TransientKind::Upstream(500)));
        assert_eq!(KeyHealth::from_outcome(&upstream), KeyHealth::Unknown);
        assert_eq!(KeyHealth::from_outcome(&Ok(Classification::default())), KeyHealth::Active);
    }

    #[test]
    fn test_error_envelope_parses() {
        let raw = r#"{"error":{"code":400,"message":"API key not valid.","status":"INVALID_ARGUMENT",
            "details":[{"@type":"type.googleapis.com/google.rpc.ErrorInfo","reason":"API_KEY_INVALID"}]}}"#;
        let envelope: ApiErrorEnvelope = serde_json::from_str(raw).unwrap();
        assert!(envelope.error.has_reason("API_KEY_INVALID"));
    }
}
