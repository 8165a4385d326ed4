//! Configuration types for journal transcription.
//!
//! All pipeline behaviour is controlled through [`TranscribeConfig`], built
//! via its [`TranscribeConfigBuilder`]. One struct holds every knob so a
//! config can be shared across workers and printed for logging.

use crate::error::TranscribeError;
use crate::pipeline::ocr::RetryPolicy;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Default vision model when none is configured.
pub const DEFAULT_MODEL: &str = "gpt-4o";

/// Configuration for a transcription batch.
///
/// Built via [`TranscribeConfig::builder()`] or using
/// [`TranscribeConfig::default()`].
///
/// # Example
/// ```rust
/// use journal_transcribe::{PipelineMode, TranscribeConfig};
///
/// let config = TranscribeConfig::builder()
///     .mode(PipelineMode::OcrPlusVisionReview)
///     .size_budget_bytes(4_000_000)
///     .model("gpt-4o")
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct TranscribeConfig {
    /// Which stages run for each image. Default: [`PipelineMode::OcrPlusVisionReview`].
    pub mode: PipelineMode,

    /// OCR backend used by OCR-based modes. Default: [`OcrBackendKind::Azure`].
    pub ocr_backend: OcrBackendKind,

    /// Re-encode each image as JPEG within `size_budget_bytes`. Default: true.
    ///
    /// When false the original bytes are sent unchanged.
    pub compress: bool,

    /// Target size of the compressed JPEG in bytes. Default: 4 000 000.
    ///
    /// The Azure Read API rejects uploads above 4 MB; vision LLM endpoints
    /// accept more, but smaller uploads are faster and cheaper.
    pub size_budget_bytes: usize,

    /// First JPEG quality tried. Range 1–100. Default: 85.
    pub initial_quality: u8,

    /// Lowest JPEG quality the compressor will go to. Default: 10.
    pub quality_floor: u8,

    /// Quality decrement per compression attempt. Default: 5.
    pub quality_step: u8,

    /// LLM model identifier, e.g. "gpt-4o". If None, uses [`DEFAULT_MODEL`].
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature. Default: 0.0.
    ///
    /// Transcription must be faithful to the page, not creative.
    pub temperature: f32,

    /// Generation token cap per LLM call. Default: 2000.
    pub max_tokens: usize,

    /// Retries per LLM call on failure. Default: 2.
    pub llm_max_retries: u32,

    /// Initial LLM retry delay in milliseconds, doubled per attempt. Default: 1000.
    pub llm_retry_backoff_ms: u64,

    /// Rate-limit and polling bounds for asynchronous OCR.
    pub retry_policy: RetryPolicy,

    /// Images processed at once. Default: 1 (strictly sequential).
    ///
    /// Values above 1 run images on a bounded pool; output order is still
    /// the upload order.
    pub concurrency: usize,

    /// What to do when one image fails. Default: [`FailurePolicy::Continue`].
    pub failure_policy: FailurePolicy,

    /// Custom vision transcription prompt. If None, uses the built-in default.
    pub transcribe_prompt: Option<String>,

    /// Per-LLM-call timeout in seconds. Default: 120.
    pub api_timeout_secs: u64,

    /// Receives per-image progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for TranscribeConfig {
    fn default() -> Self {
        Self {
            mode: PipelineMode::default(),
            ocr_backend: OcrBackendKind::default(),
            compress: true,
            size_budget_bytes: 4_000_000,
            initial_quality: 85,
            quality_floor: 10,
            quality_step: 5,
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.0,
            max_tokens: 2000,
            llm_max_retries: 2,
            llm_retry_backoff_ms: 1000,
            retry_policy: RetryPolicy::default(),
            concurrency: 1,
            failure_policy: FailurePolicy::default(),
            transcribe_prompt: None,
            api_timeout_secs: 120,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for TranscribeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TranscribeConfig")
            .field("mode", &self.mode)
            .field("ocr_backend", &self.ocr_backend)
            .field("compress", &self.compress)
            .field("size_budget_bytes", &self.size_budget_bytes)
            .field("initial_quality", &self.initial_quality)
            .field("quality_floor", &self.quality_floor)
            .field("quality_step", &self.quality_step)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("llm_max_retries", &self.llm_max_retries)
            .field("retry_policy", &self.retry_policy)
            .field("concurrency", &self.concurrency)
            .field("failure_policy", &self.failure_policy)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<callback>"),
            )
            .finish()
    }
}

impl TranscribeConfig {
    /// Create a new builder for `TranscribeConfig`.
    pub fn builder() -> TranscribeConfigBuilder {
        TranscribeConfigBuilder {
            config: Self::default(),
        }
    }

    /// Model name to request, falling back to [`DEFAULT_MODEL`].
    pub fn model_or_default(&self) -> &str {
        self.model.as_deref().unwrap_or(DEFAULT_MODEL)
    }
}

/// Builder for [`TranscribeConfig`].
pub struct TranscribeConfigBuilder {
    config: TranscribeConfig,
}

impl fmt::Debug for TranscribeConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TranscribeConfigBuilder")
            .field("config", &self.config)
            .finish()
    }
}

impl TranscribeConfigBuilder {
    pub fn mode(mut self, mode: PipelineMode) -> Self {
        self.config.mode = mode;
        self
    }

    pub fn ocr_backend(mut self, backend: OcrBackendKind) -> Self {
        self.config.ocr_backend = backend;
        self
    }

    pub fn compress(mut self, v: bool) -> Self {
        self.config.compress = v;
        self
    }

    pub fn size_budget_bytes(mut self, bytes: usize) -> Self {
        self.config.size_budget_bytes = bytes;
        self
    }

    pub fn initial_quality(mut self, q: u8) -> Self {
        self.config.initial_quality = q;
        self
    }

    pub fn quality_floor(mut self, q: u8) -> Self {
        self.config.quality_floor = q;
        self
    }

    pub fn quality_step(mut self, step: u8) -> Self {
        self.config.quality_step = step;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn llm_max_retries(mut self, n: u32) -> Self {
        self.config.llm_max_retries = n;
        self
    }

    pub fn llm_retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.llm_retry_backoff_ms = ms;
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.config.retry_policy = policy;
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.config.failure_policy = policy;
        self
    }

    pub fn transcribe_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.transcribe_prompt = Some(prompt.into());
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs.max(1);
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<TranscribeConfig, TranscribeError> {
        let c = &self.config;
        if c.initial_quality == 0 || c.initial_quality > 100 {
            return Err(TranscribeError::InvalidConfig(format!(
                "initial JPEG quality must be 1–100, got {}",
                c.initial_quality
            )));
        }
        if c.quality_floor == 0 || c.quality_floor > c.initial_quality {
            return Err(TranscribeError::InvalidConfig(format!(
                "quality floor must be 1–{}, got {}",
                c.initial_quality, c.quality_floor
            )));
        }
        if c.quality_step == 0 {
            return Err(TranscribeError::InvalidConfig(
                "quality step must be ≥ 1".into(),
            ));
        }
        if c.size_budget_bytes == 0 {
            return Err(TranscribeError::InvalidConfig(
                "size budget must be ≥ 1 byte".into(),
            ));
        }
        if c.concurrency == 0 {
            return Err(TranscribeError::InvalidConfig(
                "Concurrency must be ≥ 1".into(),
            ));
        }
        if c.max_tokens == 0 {
            return Err(TranscribeError::InvalidConfig(
                "max_tokens must be ≥ 1".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Which stages run for each image and how their outputs combine.
///
/// | Mode | OCR | LLM |
/// |------|-----|-----|
/// | `DirectTranscribe` | – | vision transcription |
/// | `DirectTranscribePlusSelfReview` | – | vision transcription, then text-only proofread |
/// | `OcrPlusVisionReview` | ✓ | vision review with the OCR draft |
/// | `OcrOnly` | ✓ | – |
/// | `OcrPlusTextCleanup` | ✓ | text-only spelling/punctuation cleanup |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineMode {
    DirectTranscribe,
    DirectTranscribePlusSelfReview,
    #[default]
    OcrPlusVisionReview,
    OcrOnly,
    OcrPlusTextCleanup,
}

impl PipelineMode {
    /// True when the mode runs an OCR backend.
    pub fn uses_ocr(self) -> bool {
        matches!(
            self,
            PipelineMode::OcrPlusVisionReview
                | PipelineMode::OcrOnly
                | PipelineMode::OcrPlusTextCleanup
        )
    }

    /// True when the mode calls an LLM at all.
    pub fn uses_llm(self) -> bool {
        !matches!(self, PipelineMode::OcrOnly)
    }
}

impl fmt::Display for PipelineMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PipelineMode::DirectTranscribe => "direct_transcribe",
            PipelineMode::DirectTranscribePlusSelfReview => "direct_transcribe_plus_self_review",
            PipelineMode::OcrPlusVisionReview => "ocr_plus_vision_review",
            PipelineMode::OcrOnly => "ocr_only",
            PipelineMode::OcrPlusTextCleanup => "ocr_plus_text_cleanup",
        };
        f.write_str(s)
    }
}

/// Remote OCR service used by OCR-based pipeline modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OcrBackendKind {
    /// Azure AI Vision Read API (submit, then poll the operation).
    #[default]
    Azure,
    /// Google Cloud Vision `DOCUMENT_TEXT_DETECTION` (single synchronous call).
    Google,
}

/// Batch behaviour when an image fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FailurePolicy {
    /// Record a failure marker for the image and carry on. (default)
    #[default]
    Continue,
    /// Stop the batch at the first failed image.
    Abort,
}
