//! Azure AI Vision Read API: submit, then poll the operation.
//!
//! ```text
//! POST {endpoint}/vision/v3.2/read/analyze   → 202 + Operation-Location
//!                                            → 429 (wait, resubmit)
//! GET  {Operation-Location}                  → {"status": "running" | "succeeded" | "failed", …}
//! ```
//!
//! The HTTP exchange sits behind [`ReadApi`] so the submit/poll state machine
//! in [`AzureReadClient`] can be driven by a scripted fake in tests.

use super::{parse_retry_after, submit_with_backoff, OcrClient, RetryPolicy, Submission};
use crate::cancel::CancelToken;
use crate::error::{OcrError, TranscribeError};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use std::fmt;
use std::time::Instant;
use tracing::{debug, info};

const BACKEND: &str = "azure-read";
const ANALYZE_PATH: &str = "vision/v3.2/read/analyze";
const KEY_HEADER: &str = "Ocp-Apim-Subscription-Key";

/// Status of a read operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadStatus {
    /// `notStarted` or `running`.
    Running,
    /// Line texts in the order the service returned them.
    Succeeded(Vec<String>),
    Failed(String),
}

/// The two HTTP calls of the Read API.
#[async_trait]
pub trait ReadApi: Send + Sync {
    /// Start an analysis; `Accepted` carries the operation URL.
    async fn submit(&self, image: &[u8]) -> Result<Submission<String>, OcrError>;

    /// Fetch the current status of an operation.
    async fn poll(&self, operation: &str) -> Result<ReadStatus, OcrError>;
}

/// Endpoint and key for the Read API.
#[derive(Clone)]
pub struct AzureReadConfig {
    pub endpoint: String,
    pub key: String,
}

impl fmt::Debug for AzureReadConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AzureReadConfig")
            .field("endpoint", &self.endpoint)
            .field("key", &"<redacted>")
            .finish()
    }
}

impl AzureReadConfig {
    /// Read `AZURE_VISION_ENDPOINT` and `AZURE_VISION_KEY`.
    pub fn from_env() -> Result<Self, TranscribeError> {
        let endpoint = non_empty_env("AZURE_VISION_ENDPOINT")?;
        let key = non_empty_env("AZURE_VISION_KEY")?;
        Ok(Self { endpoint, key })
    }

    fn analyze_url(&self) -> String {
        format!("{}/{}", self.endpoint.trim_end_matches('/'), ANALYZE_PATH)
    }
}

fn non_empty_env(var: &str) -> Result<String, TranscribeError> {
    match std::env::var(var) {
        Ok(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => Err(TranscribeError::OcrNotConfigured {
            backend: BACKEND.to_string(),
            hint: format!("Set {var} (AZURE_VISION_ENDPOINT and AZURE_VISION_KEY are both required)."),
        }),
    }
}

/// [`ReadApi`] over HTTP with a pooled `reqwest::Client`.
pub struct AzureReadApi {
    http: reqwest::Client,
    config: AzureReadConfig,
}

impl AzureReadApi {
    pub fn new(http: reqwest::Client, config: AzureReadConfig) -> Self {
        Self { http, config }
    }
}

#[async_trait]
impl ReadApi for AzureReadApi {
    async fn submit(&self, image: &[u8]) -> Result<Submission<String>, OcrError> {
        let response = self
            .http
            .post(self.config.analyze_url())
            .header(KEY_HEADER, &self.config.key)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(image.to_vec())
            .send()
            .await
            .map_err(http_error)?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Ok(Submission::RateLimited {
                retry_after: parse_retry_after(response.headers()),
            });
        }
        if status != StatusCode::ACCEPTED {
            let body = response.text().await.unwrap_or_default();
            return Err(OcrError::Http {
                backend: BACKEND.to_string(),
                detail: format!("HTTP {status}: {}", error_message(&body)),
            });
        }

        let operation = response
            .headers()
            .get("Operation-Location")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                OcrError::MalformedResponse("202 without Operation-Location header".into())
            })?;
        Ok(Submission::Accepted(operation.to_string()))
    }

    async fn poll(&self, operation: &str) -> Result<ReadStatus, OcrError> {
        let response = self
            .http
            .get(operation)
            .header(KEY_HEADER, &self.config.key)
            .send()
            .await
            .map_err(http_error)?;

        let status = response.status();
        // A throttled status request just means "ask again later".
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Ok(ReadStatus::Running);
        }
        let body = response.text().await.map_err(http_error)?;
        if !status.is_success() {
            return Err(OcrError::Http {
                backend: BACKEND.to_string(),
                detail: format!("HTTP {status}: {}", error_message(&body)),
            });
        }
        parse_read_operation(&body)
    }
}

fn http_error(e: reqwest::Error) -> OcrError {
    OcrError::Http {
        backend: BACKEND.to_string(),
        detail: e.without_url().to_string(),
    }
}

// ── Response payloads ────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReadOperation {
    status: String,
    analyze_result: Option<AnalyzeResult>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeResult {
    #[serde(default)]
    read_results: Vec<ReadPage>,
}

#[derive(Debug, Deserialize)]
struct ReadPage {
    #[serde(default)]
    lines: Vec<ReadLine>,
}

#[derive(Debug, Deserialize)]
struct ReadLine {
    text: String,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

/// Parse a `GET` operation body into a [`ReadStatus`].
pub fn parse_read_operation(body: &str) -> Result<ReadStatus, OcrError> {
    let op: ReadOperation =
        serde_json::from_str(body).map_err(|e| OcrError::MalformedResponse(e.to_string()))?;

    match op.status.to_ascii_lowercase().as_str() {
        "notstarted" | "running" => Ok(ReadStatus::Running),
        "succeeded" => {
            let lines = op
                .analyze_result
                .map(|r| {
                    r.read_results
                        .into_iter()
                        .flat_map(|page| page.lines.into_iter().map(|l| l.text))
                        .collect()
                })
                .unwrap_or_default();
            Ok(ReadStatus::Succeeded(lines))
        }
        "failed" => Ok(ReadStatus::Failed(error_message(body))),
        other => Err(OcrError::MalformedResponse(format!(
            "unknown operation status '{other}'"
        ))),
    }
}

/// Pull `error.message` out of a service error body, else return the body.
fn error_message(body: &str) -> String {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(env) if !env.error.message.is_empty() => {
            if env.error.code.is_empty() {
                env.error.message
            } else {
                format!("{} ({})", env.error.message, env.error.code)
            }
        }
        _ => body.trim().chars().take(200).collect(),
    }
}

/// Submit-and-poll OCR client.
pub struct AzureReadClient<A: ReadApi = AzureReadApi> {
    api: A,
    policy: RetryPolicy,
}

impl<A: ReadApi> AzureReadClient<A> {
    pub fn new(api: A, policy: RetryPolicy) -> Self {
        Self { api, policy }
    }
}

#[async_trait]
impl<A: ReadApi> OcrClient for AzureReadClient<A> {
    fn backend(&self) -> &str {
        BACKEND
    }

    async fn extract_text(&self, image: &[u8], cancel: &CancelToken) -> Result<String, OcrError> {
        let started = Instant::now();

        let operation = submit_with_backoff(BACKEND, &self.policy, started, cancel, move || {
            self.api.submit(image)
        })
        .await?;
        debug!("{}: analysis accepted", BACKEND);

        let mut polls = 0u32;
        loop {
            if polls >= self.policy.max_polls {
                return Err(OcrError::PollLimitExceeded { polls });
            }
            self.policy
                .pause(started, self.policy.poll_interval, cancel)
                .await?;
            polls += 1;

            match self.api.poll(&operation).await? {
                ReadStatus::Running => {
                    debug!("{}: poll {} → running", BACKEND, polls);
                }
                ReadStatus::Succeeded(lines) => {
                    info!(
                        "{}: succeeded after {} polls, {} lines",
                        BACKEND,
                        polls,
                        lines.len()
                    );
                    return Ok(lines.join("\n"));
                }
                ReadStatus::Failed(detail) => {
                    return Err(OcrError::AnalysisFailed { detail });
                }
            }
        }
    }
}
