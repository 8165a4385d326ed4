//! Vision/text LLM calls: transcribe, review an OCR draft, proofread, clean up.
//!
//! All prompt wording lives in [`crate::prompts`]; this module only decides
//! which prompt goes with which stage, whether the image is attached, and
//! how failures are retried.
//!
//! ## Retry Strategy
//!
//! Transient provider errors (429 / 5xx / timeouts) are retried with
//! exponential backoff: `llm_retry_backoff_ms * 2^(attempt-1)`. With the
//! defaults (1000 ms, 2 retries) the waits are 1 s then 2 s.

use crate::cancel::CancelToken;
use crate::config::TranscribeConfig;
use crate::error::LlmError;
use crate::pipeline::postprocess::clean_transcription;
use crate::prompts::{
    cleanup_prompt, review_prompt, self_review_prompt, TRANSCRIBE_PROMPT,
};
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// One model call: a single user turn, optionally with the page image.
#[derive(Clone)]
pub struct VisionRequest {
    pub prompt: String,
    pub image: Option<ImageData>,
    pub max_tokens: usize,
    pub temperature: f32,
}

/// Model answer plus token accounting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelReply {
    pub text: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// A chat model that accepts a prompt and an optional image.
///
/// A single call, no retries. [`VisionReviewer`] adds those.
#[async_trait]
pub trait VisionModel: Send + Sync {
    async fn complete(&self, request: &VisionRequest) -> Result<ModelReply, LlmError>;
}

/// [`VisionModel`] backed by an `edgequake_llm` provider.
pub struct LlmVisionModel {
    provider: Arc<dyn LLMProvider>,
}

impl LlmVisionModel {
    pub fn new(provider: Arc<dyn LLMProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl VisionModel for LlmVisionModel {
    async fn complete(&self, request: &VisionRequest) -> Result<ModelReply, LlmError> {
        let message = match &request.image {
            Some(image) => {
                ChatMessage::user_with_images(request.prompt.as_str(), vec![image.clone()])
            }
            None => ChatMessage::user(request.prompt.as_str()),
        };
        let messages = vec![message];
        let options = CompletionOptions {
            temperature: Some(request.temperature),
            max_tokens: Some(request.max_tokens),
            ..Default::default()
        };

        let response = self
            .provider
            .chat(&messages, Some(&options))
            .await
            .map_err(|e| LlmError::Provider(e.to_string()))?;

        Ok(ModelReply {
            text: response.content,
            input_tokens: response.prompt_tokens as u64,
            output_tokens: response.completion_tokens as u64,
        })
    }
}

/// Generation and retry knobs for the LLM stages.
#[derive(Debug, Clone)]
pub struct ReviewSettings {
    pub max_tokens: usize,
    pub temperature: f32,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    pub timeout: Duration,
    /// Replaces [`TRANSCRIBE_PROMPT`] when set.
    pub transcribe_prompt: Option<String>,
}

impl Default for ReviewSettings {
    fn default() -> Self {
        Self::from(&TranscribeConfig::default())
    }
}

impl From<&TranscribeConfig> for ReviewSettings {
    fn from(config: &TranscribeConfig) -> Self {
        Self {
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            max_retries: config.llm_max_retries,
            retry_backoff_ms: config.llm_retry_backoff_ms,
            timeout: Duration::from_secs(config.api_timeout_secs),
            transcribe_prompt: config.transcribe_prompt.clone(),
        }
    }
}

/// Runs each LLM stage against a [`VisionModel`].
#[derive(Clone)]
pub struct VisionReviewer {
    model: Arc<dyn VisionModel>,
    settings: ReviewSettings,
}

impl VisionReviewer {
    pub fn new(model: Arc<dyn VisionModel>, settings: ReviewSettings) -> Self {
        Self { model, settings }
    }

    /// Request for a fresh vision transcription of `image`.
    pub fn transcribe_request(&self, image: ImageData) -> VisionRequest {
        let prompt = self
            .settings
            .transcribe_prompt
            .clone()
            .unwrap_or_else(|| TRANSCRIBE_PROMPT.to_string());
        self.request(prompt, Some(image))
    }

    /// Request for a vision review of `draft` against `image`.
    ///
    /// An empty draft falls back to a plain transcription request.
    pub fn review_request(&self, image: ImageData, draft: &str) -> VisionRequest {
        if draft.trim().is_empty() {
            return self.transcribe_request(image);
        }
        self.request(review_prompt(draft), Some(image))
    }

    /// Text-only proofreading request for a prior transcription.
    pub fn self_review_request(&self, transcription: &str) -> VisionRequest {
        self.request(self_review_prompt(transcription), None)
    }

    /// Text-only cleanup request for raw OCR text.
    pub fn cleanup_request(&self, ocr_text: &str) -> VisionRequest {
        self.request(cleanup_prompt(ocr_text), None)
    }

    fn request(&self, prompt: String, image: Option<ImageData>) -> VisionRequest {
        VisionRequest {
            prompt,
            image,
            max_tokens: self.settings.max_tokens,
            temperature: self.settings.temperature,
        }
    }

    pub async fn transcribe(
        &self,
        name: &str,
        image: ImageData,
        cancel: &CancelToken,
    ) -> Result<ModelReply, LlmError> {
        self.run(name, &self.transcribe_request(image), cancel).await
    }

    pub async fn review(
        &self,
        name: &str,
        image: ImageData,
        draft: &str,
        cancel: &CancelToken,
    ) -> Result<ModelReply, LlmError> {
        self.run(name, &self.review_request(image, draft), cancel)
            .await
    }

    pub async fn self_review(
        &self,
        name: &str,
        transcription: &str,
        cancel: &CancelToken,
    ) -> Result<ModelReply, LlmError> {
        self.run(name, &self.self_review_request(transcription), cancel)
            .await
    }

    pub async fn cleanup(
        &self,
        name: &str,
        ocr_text: &str,
        cancel: &CancelToken,
    ) -> Result<ModelReply, LlmError> {
        self.run(name, &self.cleanup_request(ocr_text), cancel).await
    }

    /// Call the model with retries, a per-call timeout and output cleanup.
    async fn run(
        &self,
        name: &str,
        request: &VisionRequest,
        cancel: &CancelToken,
    ) -> Result<ModelReply, LlmError> {
        let max_retries = self.settings.max_retries;
        let mut last_err: Option<LlmError> = None;

        for attempt in 0..=max_retries {
            if attempt > 0 {
                let backoff = retry_backoff(self.settings.retry_backoff_ms, attempt);
                warn!(
                    "{}: LLM retry {}/{} after {:?}",
                    name, attempt, max_retries, backoff
                );
                if !cancel.sleep(backoff).await {
                    return Err(LlmError::Cancelled);
                }
            }
            if cancel.is_cancelled() {
                return Err(LlmError::Cancelled);
            }

            let outcome = match tokio::time::timeout(
                self.settings.timeout,
                self.model.complete(request),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(LlmError::Timeout {
                    secs: self.settings.timeout.as_secs(),
                }),
            };

            match outcome {
                Ok(reply) => {
                    let text = clean_transcription(&reply.text);
                    if text.is_empty() {
                        warn!("{}: attempt {} returned no text", name, attempt + 1);
                        last_err = Some(LlmError::EmptyResponse);
                        continue;
                    }
                    debug!(
                        "{}: {} input tokens, {} output tokens",
                        name, reply.input_tokens, reply.output_tokens
                    );
                    return Ok(ModelReply { text, ..reply });
                }
                Err(LlmError::Cancelled) => return Err(LlmError::Cancelled),
                Err(e) => {
                    warn!("{}: attempt {} failed: {}", name, attempt + 1, e);
                    last_err = Some(e);
                }
            }
        }

        match last_err {
            Some(LlmError::EmptyResponse) => Err(LlmError::EmptyResponse),
            other => Err(LlmError::Api {
                retries: max_retries,
                detail: other
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "Unknown error".to_string()),
            }),
        }
    }
}

/// `base_ms * 2^(attempt-1)`, saturating for large retry counts.
fn retry_backoff(base_ms: u64, attempt: u32) -> Duration {
    let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
    Duration::from_millis(base_ms.saturating_mul(factor))
}
