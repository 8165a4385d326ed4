//! Google Cloud Vision `DOCUMENT_TEXT_DETECTION`: one synchronous request.
//!
//! The response either carries `fullTextAnnotation.text` or an embedded
//! `error` status, which is surfaced as [`OcrError::Service`].
//!
//! The HTTP exchange sits behind [`AnnotateApi`]; [`GoogleVisionClient`]
//! decides what each status means.

use super::{parse_retry_after, submit_with_backoff, OcrClient, RetryPolicy, Submission};
use crate::cancel::CancelToken;
use crate::error::{OcrError, TranscribeError};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::debug;

const BACKEND: &str = "google-vision";
pub const DEFAULT_ENDPOINT: &str = "https://vision.googleapis.com/v1/images:annotate";

/// Endpoint and API key for Cloud Vision.
#[derive(Clone)]
pub struct GoogleVisionConfig {
    pub endpoint: String,
    pub api_key: String,
}

impl fmt::Debug for GoogleVisionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GoogleVisionConfig")
            .field("endpoint", &self.endpoint)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

impl GoogleVisionConfig {
    /// Read `GOOGLE_VISION_API_KEY` and optional `GOOGLE_VISION_ENDPOINT`.
    pub fn from_env() -> Result<Self, TranscribeError> {
        let api_key = std::env::var("GOOGLE_VISION_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| TranscribeError::OcrNotConfigured {
                backend: BACKEND.to_string(),
                hint: "Set GOOGLE_VISION_API_KEY.".to_string(),
            })?;
        let endpoint = std::env::var("GOOGLE_VISION_ENDPOINT")
            .ok()
            .filter(|e| !e.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());
        Ok(Self {
            endpoint,
            api_key: api_key.trim().to_string(),
        })
    }
}

/// Status, `Retry-After` and body of one `images:annotate` exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotateReply {
    pub status: StatusCode,
    pub retry_after: Option<Duration>,
    pub body: String,
}

/// The single HTTP call of the Vision API.
#[async_trait]
pub trait AnnotateApi: Send + Sync {
    async fn annotate(&self, request: &serde_json::Value) -> Result<AnnotateReply, OcrError>;
}

/// [`AnnotateApi`] over HTTP with a pooled `reqwest::Client`.
pub struct GoogleVisionApi {
    http: reqwest::Client,
    config: GoogleVisionConfig,
}

impl GoogleVisionApi {
    pub fn new(http: reqwest::Client, config: GoogleVisionConfig) -> Self {
        Self { http, config }
    }
}

#[async_trait]
impl AnnotateApi for GoogleVisionApi {
    async fn annotate(&self, request: &serde_json::Value) -> Result<AnnotateReply, OcrError> {
        let response = self
            .http
            .post(&self.config.endpoint)
            .query(&[("key", &self.config.api_key)])
            .json(request)
            .send()
            .await
            .map_err(http_error)?;

        let status = response.status();
        let retry_after = parse_retry_after(response.headers());
        let body = response.text().await.map_err(http_error)?;
        Ok(AnnotateReply {
            status,
            retry_after,
            body,
        })
    }
}

/// Synchronous OCR client.
pub struct GoogleVisionClient<A: AnnotateApi = GoogleVisionApi> {
    api: A,
    policy: RetryPolicy,
}

impl<A: AnnotateApi> GoogleVisionClient<A> {
    pub fn new(api: A, policy: RetryPolicy) -> Self {
        Self { api, policy }
    }
}

#[async_trait]
impl<A: AnnotateApi> OcrClient for GoogleVisionClient<A> {
    fn backend(&self) -> &str {
        BACKEND
    }

    async fn extract_text(&self, image: &[u8], cancel: &CancelToken) -> Result<String, OcrError> {
        let request = annotate_request(image);
        let request = &request;
        let text = submit_with_backoff(BACKEND, &self.policy, Instant::now(), cancel, move || async move {
            self.api.annotate(request).await.and_then(classify_reply)
        })
        .await?;
        debug!("{}: {} chars", BACKEND, text.len());
        Ok(text)
    }
}

/// 429 is retryable, any other non-2xx is an HTTP error, 2xx is parsed.
fn classify_reply(reply: AnnotateReply) -> Result<Submission<String>, OcrError> {
    if reply.status == StatusCode::TOO_MANY_REQUESTS {
        return Ok(Submission::RateLimited {
            retry_after: reply.retry_after,
        });
    }
    if !reply.status.is_success() {
        return Err(OcrError::Http {
            backend: BACKEND.to_string(),
            detail: format!(
                "HTTP {}: {}",
                reply.status,
                reply.body.trim().chars().take(200).collect::<String>()
            ),
        });
    }
    parse_annotate_response(&reply.body).map(Submission::Accepted)
}

fn http_error(e: reqwest::Error) -> OcrError {
    OcrError::Http {
        backend: BACKEND.to_string(),
        detail: e.without_url().to_string(),
    }
}

fn annotate_request(image: &[u8]) -> serde_json::Value {
    json!({
        "requests": [{
            "image": { "content": STANDARD.encode(image) },
            "features": [{ "type": "DOCUMENT_TEXT_DETECTION" }]
        }]
    })
}

// ── Response payloads ────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct AnnotateResponse {
    #[serde(default)]
    responses: Vec<AnnotateImageResponse>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnnotateImageResponse {
    full_text_annotation: Option<TextAnnotation>,
    error: Option<RpcStatus>,
}

#[derive(Debug, Deserialize)]
struct TextAnnotation {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct RpcStatus {
    #[serde(default)]
    message: String,
}

/// Extract the document text, mapping an embedded error to `OcrError::Service`.
///
/// A page with no detected text yields an empty string.
pub fn parse_annotate_response(body: &str) -> Result<String, OcrError> {
    let parsed: AnnotateResponse =
        serde_json::from_str(body).map_err(|e| OcrError::MalformedResponse(e.to_string()))?;
    let first = parsed
        .responses
        .into_iter()
        .next()
        .ok_or_else(|| OcrError::MalformedResponse("empty responses array".into()))?;

    if let Some(err) = first.error {
        if !err.message.is_empty() {
            return Err(OcrError::Service {
                backend: BACKEND.to_string(),
                message: err.message,
            });
        }
    }
    Ok(first
        .full_text_annotation
        .map(|a| a.text.trim_end().to_string())
        .unwrap_or_default())
}
