//! OCR clients: extract raw text from an image via a remote service.
//!
//! Two backend shapes share the [`OcrClient`] contract:
//!
//! * [`google::GoogleVisionClient`] — one synchronous request; the response
//!   carries the text or an embedded error.
//! * [`azure::AzureReadClient`] — submit the image, receive an operation
//!   handle, then poll until the analysis succeeds or fails.
//!
//! Both honour an explicit [`RetryPolicy`]: a `429` answer waits and resubmits
//! the identical request, a bounded number of times, and the asynchronous
//! poll loop is capped by a poll count and an overall deadline.

pub mod azure;
pub mod google;

use crate::cancel::CancelToken;
use crate::config::{OcrBackendKind, TranscribeConfig};
use crate::error::{OcrError, TranscribeError};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

pub use azure::{AzureReadApi, AzureReadClient, AzureReadConfig, ReadApi, ReadStatus};
pub use google::{
    AnnotateApi, AnnotateReply, GoogleVisionApi, GoogleVisionClient, GoogleVisionConfig,
};

/// Extract text from one image.
#[async_trait]
pub trait OcrClient: Send + Sync {
    /// Short backend name for logs and error messages.
    fn backend(&self) -> &str;

    /// Run OCR on `image` and return its lines joined by `\n`.
    async fn extract_text(&self, image: &[u8], cancel: &CancelToken) -> Result<String, OcrError>;
}

/// Bounds for rate-limit retries and status polling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Wait after a `429` before resubmitting. Default: 10 s.
    pub rate_limit_backoff: Duration,
    /// Resubmissions allowed after `429` answers. Default: 6.
    pub max_rate_limit_retries: u32,
    /// Wait before each status poll. Default: 1 s.
    pub poll_interval: Duration,
    /// Status requests allowed per operation. Default: 120.
    pub max_polls: u32,
    /// Ceiling on the whole extraction, submissions and polls included. Default: 300 s.
    pub deadline: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            rate_limit_backoff: Duration::from_secs(10),
            max_rate_limit_retries: 6,
            poll_interval: Duration::from_secs(1),
            max_polls: 120,
            deadline: Some(Duration::from_secs(300)),
        }
    }
}

impl RetryPolicy {
    /// Fail with `DeadlineExceeded` if waiting `wait` more would cross the deadline.
    pub(crate) fn check_deadline(&self, started: Instant, wait: Duration) -> Result<(), OcrError> {
        match self.deadline {
            Some(deadline) if started.elapsed() + wait > deadline => {
                Err(OcrError::DeadlineExceeded {
                    secs: deadline.as_secs(),
                })
            }
            _ => Ok(()),
        }
    }

    /// Wait `wait`, honouring the deadline and the cancel token.
    pub(crate) async fn pause(
        &self,
        started: Instant,
        wait: Duration,
        cancel: &CancelToken,
    ) -> Result<(), OcrError> {
        self.check_deadline(started, wait)?;
        if cancel.sleep(wait).await {
            Ok(())
        } else {
            Err(OcrError::Cancelled)
        }
    }
}

/// Answer to a submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission<T> {
    Accepted(T),
    /// HTTP 429. `retry_after` comes from the `Retry-After` header when present.
    RateLimited { retry_after: Option<Duration> },
}

/// Submit until accepted, waiting after every `429`.
///
/// The server's `Retry-After` is honoured when it is longer than the fixed
/// backoff. Returns `RateLimitExhausted` once `max_rate_limit_retries`
/// resubmissions have all been rate-limited.
pub(crate) async fn submit_with_backoff<T, F, Fut>(
    backend: &str,
    policy: &RetryPolicy,
    started: Instant,
    cancel: &CancelToken,
    mut submit: F,
) -> Result<T, OcrError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Submission<T>, OcrError>>,
{
    let mut attempts = 0u32;
    loop {
        if cancel.is_cancelled() {
            return Err(OcrError::Cancelled);
        }
        attempts += 1;
        match submit().await? {
            Submission::Accepted(value) => return Ok(value),
            Submission::RateLimited { retry_after } => {
                if attempts > policy.max_rate_limit_retries {
                    return Err(OcrError::RateLimitExhausted { attempts });
                }
                let wait = retry_after
                    .map(|d| d.max(policy.rate_limit_backoff))
                    .unwrap_or(policy.rate_limit_backoff);
                warn!(
                    "{}: rate limited (attempt {}/{}), retrying in {:?}",
                    backend,
                    attempts,
                    policy.max_rate_limit_retries + 1,
                    wait
                );
                policy.pause(started, wait, cancel).await?;
            }
        }
    }
}

/// Parse a `Retry-After` header given in seconds.
pub(crate) fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Build the OCR client selected by `config.ocr_backend` from environment credentials.
pub fn ocr_client_from_env(config: &TranscribeConfig) -> Result<Arc<dyn OcrClient>, TranscribeError> {
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.api_timeout_secs))
        .build()
        .map_err(|e| TranscribeError::Internal(format!("HTTP client: {e}")))?;

    match config.ocr_backend {
        OcrBackendKind::Azure => {
            let cfg = AzureReadConfig::from_env()?;
            let api = AzureReadApi::new(http, cfg);
            Ok(Arc::new(AzureReadClient::new(api, config.retry_policy.clone())))
        }
        OcrBackendKind::Google => {
            let cfg = GoogleVisionConfig::from_env()?;
            let api = GoogleVisionApi::new(http, cfg);
            Ok(Arc::new(GoogleVisionClient::new(api, config.retry_policy.clone())))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            rate_limit_backoff: Duration::from_millis(1),
            max_rate_limit_retries: 2,
            poll_interval: Duration::from_millis(1),
            max_polls: 5,
            deadline: None,
        }
    }

    #[tokio::test]
    async fn accepted_first_try_submits_once() {
        let calls = AtomicU32::new(0);
        let out = submit_with_backoff("test", &fast_policy(), Instant::now(), &CancelToken::new(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(Submission::Accepted(7)) }
        })
        .await
        .unwrap();
        assert_eq!(out, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn rate_limit_retries_are_bounded() {
        let calls = AtomicU32::new(0);
        let err = submit_with_backoff::<(), _, _>(
            "test",
            &fast_policy(),
            Instant::now(),
            &CancelToken::new(),
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(Submission::RateLimited { retry_after: None }) }
            },
        )
        .await
        .unwrap_err();
        // one submission + two retries
        assert!(matches!(err, OcrError::RateLimitExhausted { attempts: 3 }));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn deadline_stops_backoff() {
        let policy = RetryPolicy {
            rate_limit_backoff: Duration::from_secs(30),
            deadline: Some(Duration::from_secs(5)),
            ..fast_policy()
        };
        let err = submit_with_backoff::<(), _, _>(
            "test",
            &policy,
            Instant::now(),
            &CancelToken::new(),
            || async { Ok(Submission::RateLimited { retry_after: None }) },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, OcrError::DeadlineExceeded { secs: 5 }));
    }

    #[tokio::test]
    async fn cancelled_token_stops_before_submitting() {
        let token = CancelToken::new();
        token.cancel();
        let err = submit_with_backoff::<(), _, _>("test", &fast_policy(), Instant::now(), &token, || async {
            Ok(Submission::Accepted(()))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, OcrError::Cancelled));
    }

    #[test]
    fn retry_after_header_parsing() {
        let mut headers = reqwest::header::HeaderMap::new();
        assert_eq!(parse_retry_after(&headers), None);
        headers.insert(reqwest::header::RETRY_AFTER, "12".parse().unwrap());
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(12)));
        headers.insert(reqwest::header::RETRY_AFTER, "soon".parse().unwrap());
        assert_eq!(parse_retry_after(&headers), None);
    }
}
