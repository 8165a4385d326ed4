//! Eager (whole-batch) transcription entry points and the [`Pipeline`] itself.
//!
//! A [`Pipeline`] is built once per batch. Construction resolves the OCR
//! client and the vision model the configured [`PipelineMode`] needs, so a
//! missing credential fails before any image is touched. Each image then
//! walks `Pending → Compressed → OcrDone → Reviewed → Appended`, or ends in
//! `Failed` with a marker section in the combined document.
//!
//! Use [`crate::stream::transcribe_stream`] instead to receive results as
//! each image finishes.

use crate::cancel::CancelToken;
use crate::config::{FailurePolicy, PipelineMode, TranscribeConfig};
use crate::error::{ItemError, TranscribeError};
use crate::output::{ImageResult, ItemStage, TranscriptionOutput, TranscriptionStats};
use crate::pipeline::compress::{compress, CompressionSettings};
use crate::pipeline::encode::encode_image;
use crate::pipeline::input::{load_batch, ImageAsset};
use crate::pipeline::ocr::{ocr_client_from_env, OcrClient};
use crate::pipeline::review::{LlmVisionModel, ModelReply, ReviewSettings, VisionReviewer};
use crate::progress::{ProgressCallback, TranscriptionProgressCallback};
use edgequake_llm::{LLMProvider, ProviderFactory};
use futures::stream::{self, StreamExt};
use std::borrow::Cow;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Stage strategies selected from the pipeline mode at construction.
#[derive(Clone)]
enum Stages {
    Direct {
        reviewer: VisionReviewer,
    },
    DirectSelfReview {
        reviewer: VisionReviewer,
    },
    OcrReview {
        ocr: Arc<dyn OcrClient>,
        reviewer: VisionReviewer,
    },
    OcrOnly {
        ocr: Arc<dyn OcrClient>,
    },
    OcrCleanup {
        ocr: Arc<dyn OcrClient>,
        reviewer: VisionReviewer,
    },
}

/// One configured batch processor.
///
/// # Example
/// ```rust,no_run
/// use journal_transcribe::{ImageAsset, Pipeline, TranscribeConfig};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = TranscribeConfig::default();
/// let pipeline = Pipeline::from_config(&config)?;
/// let page = ImageAsset::from_path("page1.jpg").await?;
/// let output = pipeline.run(vec![page]).await?;
/// print!("{}", output.document);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Pipeline {
    mode: PipelineMode,
    stages: Stages,
    compression: Option<CompressionSettings>,
    concurrency: usize,
    failure_policy: FailurePolicy,
    progress: Option<ProgressCallback>,
    cancel: CancelToken,
}

impl Pipeline {
    /// Resolve the OCR client and LLM provider from `config` and the environment.
    ///
    /// Only the components the mode uses are resolved.
    pub fn from_config(config: &TranscribeConfig) -> Result<Self, TranscribeError> {
        let ocr = if config.mode.uses_ocr() {
            Some(ocr_client_from_env(config)?)
        } else {
            None
        };
        let reviewer = if config.mode.uses_llm() {
            let provider = resolve_provider(config)?;
            debug!(
                "LLM provider resolved (requested provider={:?}, model={})",
                config.provider_name,
                config.model_or_default()
            );
            Some(VisionReviewer::new(
                Arc::new(LlmVisionModel::new(provider)),
                ReviewSettings::from(config),
            ))
        } else {
            None
        };
        Self::with_components(config, ocr, reviewer)
    }

    /// Build a pipeline from already-constructed components.
    ///
    /// Components the mode does not use are ignored; a missing one it does
    /// use is a configuration error.
    pub fn with_components(
        config: &TranscribeConfig,
        ocr: Option<Arc<dyn OcrClient>>,
        reviewer: Option<VisionReviewer>,
    ) -> Result<Self, TranscribeError> {
        let stages = match config.mode {
            PipelineMode::DirectTranscribe => Stages::Direct {
                reviewer: require_reviewer(reviewer, config)?,
            },
            PipelineMode::DirectTranscribePlusSelfReview => Stages::DirectSelfReview {
                reviewer: require_reviewer(reviewer, config)?,
            },
            PipelineMode::OcrPlusVisionReview => Stages::OcrReview {
                ocr: require_ocr(ocr, config)?,
                reviewer: require_reviewer(reviewer, config)?,
            },
            PipelineMode::OcrOnly => Stages::OcrOnly {
                ocr: require_ocr(ocr, config)?,
            },
            PipelineMode::OcrPlusTextCleanup => Stages::OcrCleanup {
                ocr: require_ocr(ocr, config)?,
                reviewer: require_reviewer(reviewer, config)?,
            },
        };

        Ok(Self {
            mode: config.mode,
            stages,
            compression: config.compress.then(|| CompressionSettings::from(config)),
            concurrency: config.concurrency.max(1),
            failure_policy: config.failure_policy,
            progress: config.progress_callback.clone(),
            cancel: CancelToken::new(),
        })
    }

    /// Share `token` with this pipeline so the caller can cancel the batch.
    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    /// The token that cancels this pipeline's work.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn mode(&self) -> PipelineMode {
        self.mode
    }

    pub(crate) fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Transcribe `images` and assemble the combined document in upload order.
    ///
    /// Per-image failures are recorded in the output, not returned, unless
    /// the failure policy is [`FailurePolicy::Abort`].
    pub async fn run(&self, images: Vec<ImageAsset>) -> Result<TranscriptionOutput, TranscribeError> {
        if images.is_empty() {
            return Err(TranscribeError::EmptyBatch);
        }
        let start = Instant::now();
        let total = images.len();
        info!(
            "Transcribing {} images (mode={}, concurrency={})",
            total, self.mode, self.concurrency
        );
        self.notify(|cb| cb.on_batch_start(total));

        let completed = AtomicUsize::new(0);
        let items = if self.concurrency <= 1 {
            self.run_sequential(&images, &completed).await?
        } else {
            self.run_concurrent(&images, &completed).await?
        };

        let output = TranscriptionOutput::from_results(items, start.elapsed().as_millis() as u64);
        info!(
            "Transcription complete: {}/{} images, {} in / {} out tokens, {}ms",
            output.stats.succeeded,
            total,
            output.stats.total_input_tokens,
            output.stats.total_output_tokens,
            output.stats.total_duration_ms
        );
        self.notify(|cb| cb.on_batch_complete(total, output.stats.succeeded));
        Ok(output)
    }

    async fn run_sequential(
        &self,
        images: &[ImageAsset],
        completed: &AtomicUsize,
    ) -> Result<Vec<ImageResult>, TranscribeError> {
        let total = images.len();
        let mut results = Vec::with_capacity(total);
        for (i, asset) in images.iter().enumerate() {
            let result = self.process_image(i + 1, total, asset, completed).await;
            if let Some(err) = self.stop_reason(&result) {
                return Err(err);
            }
            results.push(result);
        }
        Ok(results)
    }

    /// Bounded pool; results land in a slot array indexed by upload position.
    async fn run_concurrent(
        &self,
        images: &[ImageAsset],
        completed: &AtomicUsize,
    ) -> Result<Vec<ImageResult>, TranscribeError> {
        let total = images.len();
        let mut slots: Vec<Option<ImageResult>> = vec![None; total];

        let mut finished = stream::iter(images.iter().enumerate().map(|(i, asset)| async move {
            (i, self.process_image(i + 1, total, asset, completed).await)
        }))
        .buffer_unordered(self.concurrency);

        while let Some((i, result)) = finished.next().await {
            if let Some(err) = self.stop_reason(&result) {
                // Dropping the stream drops every in-flight image.
                return Err(err);
            }
            slots[i] = Some(result);
        }

        slots
            .into_iter()
            .enumerate()
            .map(|(i, slot)| {
                slot.ok_or_else(|| TranscribeError::Internal(format!("no result for image {}", i + 1)))
            })
            .collect()
    }

    /// Error that ends the batch after `result`, if any.
    fn stop_reason(&self, result: &ImageResult) -> Option<TranscribeError> {
        match &result.error {
            Some(ItemError::Cancelled { .. }) => Some(TranscribeError::Cancelled),
            Some(err) if self.failure_policy == FailurePolicy::Abort => {
                Some(TranscribeError::Aborted {
                    name: result.name.clone(),
                    detail: err.reason(),
                })
            }
            _ => None,
        }
    }

    /// Run one image through every stage. Never fails; errors go in the result.
    pub(crate) async fn process_image(
        &self,
        index: usize,
        total: usize,
        asset: &ImageAsset,
        completed: &AtomicUsize,
    ) -> ImageResult {
        let start = Instant::now();
        let name = asset.name();
        let mut result = ImageResult::pending(index, name);
        debug!("[{}/{}] {}: start", index, total, name);
        self.notify(|cb| cb.on_item_start(index, total, name));

        match self.run_stages(asset, &mut result).await {
            Ok(text) => {
                result.text = text;
                self.reach(&mut result, ItemStage::Appended);
            }
            Err(err) => {
                warn!("[{}/{}] {}", index, total, err);
                result.error = Some(err);
                self.reach(&mut result, ItemStage::Failed);
            }
        }
        result.duration_ms = start.elapsed().as_millis() as u64;

        match &result.error {
            None => {
                info!(
                    "[{}/{}] {}: {} chars in {}ms",
                    index,
                    total,
                    name,
                    result.text.len(),
                    result.duration_ms
                );
                self.notify(|cb| cb.on_item_complete(index, total, name, result.text.len()));
            }
            Some(err) => {
                let reason = err.reason();
                self.notify(|cb| cb.on_item_error(index, total, name, &reason));
            }
        }
        let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
        self.notify(|cb| cb.on_progress(done, total));
        result
    }

    async fn run_stages(
        &self,
        asset: &ImageAsset,
        result: &mut ImageResult,
    ) -> Result<String, ItemError> {
        let name = asset.name();
        self.checkpoint(name)?;

        // ── Compress ─────────────────────────────────────────────────────
        let (upload, mime): (Cow<'_, [u8]>, &str) = match self.compression {
            Some(settings) => {
                let owned = asset.clone();
                let compressed =
                    tokio::task::spawn_blocking(move || compress(owned.bytes(), &settings))
                        .await
                        .map_err(|e| ItemError::Compression {
                            name: name.to_string(),
                            detail: format!("compression task failed: {e}"),
                        })?
                        .map_err(|e| ItemError::compression(name, e))?;
                if !compressed.within(settings.size_budget_bytes) {
                    warn!(
                        "{}: {} bytes at quality floor {}, over budget {}",
                        name,
                        compressed.bytes.len(),
                        compressed.quality,
                        settings.size_budget_bytes
                    );
                }
                debug!(
                    "{}: {}x{} JPEG q={} {} bytes after {} attempts",
                    name,
                    compressed.width,
                    compressed.height,
                    compressed.quality,
                    compressed.bytes.len(),
                    compressed.attempts
                );
                result.jpeg_quality = Some(compressed.quality);
                result.upload_bytes = compressed.bytes.len();
                self.reach(result, ItemStage::Compressed);
                (Cow::Owned(compressed.bytes), "image/jpeg")
            }
            None => {
                result.upload_bytes = asset.bytes().len();
                (Cow::Borrowed(asset.bytes()), asset.format().mime_type())
            }
        };

        // ── OCR / LLM per mode ───────────────────────────────────────────
        match &self.stages {
            Stages::Direct { reviewer } => {
                self.checkpoint(name)?;
                let reply = reviewer
                    .transcribe(name, encode_image(&upload, mime), &self.cancel)
                    .await
                    .map_err(|e| ItemError::llm(name, e))?;
                Ok(self.reviewed(result, reply))
            }
            Stages::DirectSelfReview { reviewer } => {
                self.checkpoint(name)?;
                let first = reviewer
                    .transcribe(name, encode_image(&upload, mime), &self.cancel)
                    .await
                    .map_err(|e| ItemError::llm(name, e))?;
                add_tokens(result, &first);
                self.checkpoint(name)?;
                let reply = reviewer
                    .self_review(name, &first.text, &self.cancel)
                    .await
                    .map_err(|e| ItemError::llm(name, e))?;
                Ok(self.reviewed(result, reply))
            }
            Stages::OcrReview { ocr, reviewer } => {
                let draft = self.ocr_stage(ocr.as_ref(), name, &upload, result).await?;
                self.checkpoint(name)?;
                let reply = reviewer
                    .review(name, encode_image(&upload, mime), &draft, &self.cancel)
                    .await
                    .map_err(|e| ItemError::llm(name, e))?;
                Ok(self.reviewed(result, reply))
            }
            Stages::OcrOnly { ocr } => self.ocr_stage(ocr.as_ref(), name, &upload, result).await,
            Stages::OcrCleanup { ocr, reviewer } => {
                let draft = self.ocr_stage(ocr.as_ref(), name, &upload, result).await?;
                if draft.trim().is_empty() {
                    debug!("{}: no OCR text, skipping cleanup", name);
                    return Ok(draft);
                }
                self.checkpoint(name)?;
                let reply = reviewer
                    .cleanup(name, &draft, &self.cancel)
                    .await
                    .map_err(|e| ItemError::llm(name, e))?;
                Ok(self.reviewed(result, reply))
            }
        }
    }

    async fn ocr_stage(
        &self,
        ocr: &dyn OcrClient,
        name: &str,
        image: &[u8],
        result: &mut ImageResult,
    ) -> Result<String, ItemError> {
        self.checkpoint(name)?;
        let text = ocr
            .extract_text(image, &self.cancel)
            .await
            .map_err(|e| ItemError::ocr(name, e))?;
        debug!("{}: {} returned {} chars", name, ocr.backend(), text.len());
        result.ocr_text = Some(text.clone());
        self.reach(result, ItemStage::OcrDone);
        Ok(text)
    }

    fn reviewed(&self, result: &mut ImageResult, reply: ModelReply) -> String {
        add_tokens(result, &reply);
        self.reach(result, ItemStage::Reviewed);
        reply.text
    }

    fn checkpoint(&self, name: &str) -> Result<(), ItemError> {
        if self.cancel.is_cancelled() {
            return Err(ItemError::Cancelled {
                name: name.to_string(),
            });
        }
        Ok(())
    }

    fn reach(&self, result: &mut ImageResult, stage: ItemStage) {
        result.stage = stage;
        self.notify(|cb| cb.on_item_stage(result.index, &result.name, stage));
    }

    pub(crate) fn notify(&self, event: impl FnOnce(&dyn TranscriptionProgressCallback)) {
        if let Some(cb) = &self.progress {
            event(cb.as_ref());
        }
    }
}

fn add_tokens(result: &mut ImageResult, reply: &ModelReply) {
    result.input_tokens += reply.input_tokens;
    result.output_tokens += reply.output_tokens;
}

fn require_ocr(
    ocr: Option<Arc<dyn OcrClient>>,
    config: &TranscribeConfig,
) -> Result<Arc<dyn OcrClient>, TranscribeError> {
    ocr.ok_or_else(|| TranscribeError::OcrNotConfigured {
        backend: format!("{:?}", config.ocr_backend).to_lowercase(),
        hint: format!("Mode '{}' needs an OCR client.", config.mode),
    })
}

fn require_reviewer(
    reviewer: Option<VisionReviewer>,
    config: &TranscribeConfig,
) -> Result<VisionReviewer, TranscribeError> {
    reviewer.ok_or_else(|| TranscribeError::ProviderNotConfigured {
        provider: config
            .provider_name
            .clone()
            .unwrap_or_else(|| "auto".to_string()),
        hint: format!("Mode '{}' needs a vision model.", config.mode),
    })
}

// ── Entry points ─────────────────────────────────────────────────────────

/// Transcribe in-memory images in upload order.
///
/// This is the primary entry point for the library.
///
/// # Returns
/// `Ok(TranscriptionOutput)` even if some images failed; check
/// `output.stats.failed` or call [`TranscriptionOutput::into_result`].
///
/// # Errors
/// Returns `Err(TranscribeError)` only for fatal errors:
/// - empty batch
/// - missing OCR or LLM credentials for the configured mode
/// - first failure under [`FailurePolicy::Abort`]
pub async fn transcribe(
    images: Vec<ImageAsset>,
    config: &TranscribeConfig,
) -> Result<TranscriptionOutput, TranscribeError> {
    if images.is_empty() {
        return Err(TranscribeError::EmptyBatch);
    }
    Pipeline::from_config(config)?.run(images).await
}

/// Read JPEG/PNG files from disk and transcribe them in the given order.
pub async fn transcribe_files(
    paths: &[PathBuf],
    config: &TranscribeConfig,
) -> Result<TranscriptionOutput, TranscribeError> {
    let images = load_batch(paths).await?;
    transcribe(images, config).await
}

/// Transcribe files and write the combined document to `output_path`.
///
/// The file is written to a temporary sibling and renamed into place, so a
/// reader never sees a partial document.
pub async fn transcribe_to_file(
    paths: &[PathBuf],
    output_path: impl AsRef<Path>,
    config: &TranscribeConfig,
) -> Result<TranscriptionStats, TranscribeError> {
    let output = transcribe_files(paths, config).await?;
    let path = output_path.as_ref().to_path_buf();
    let document = output.document;
    let written = path.clone();
    tokio::task::spawn_blocking(move || write_document(&written, &document))
        .await
        .map_err(|e| TranscribeError::Internal(format!("write task failed: {e}")))??;
    info!("Wrote {}", path.display());
    Ok(output.stats)
}

/// Synchronous wrapper around [`transcribe`].
///
/// Creates a temporary tokio runtime internally.
pub fn transcribe_sync(
    images: Vec<ImageAsset>,
    config: &TranscribeConfig,
) -> Result<TranscriptionOutput, TranscribeError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| TranscribeError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(transcribe(images, config))
}

/// Write `contents` to `path` atomically: temp file in the same directory, then rename.
///
/// Missing parent directories are created.
pub fn write_document(path: &Path, contents: &str) -> Result<(), TranscribeError> {
    let write_err = |source: std::io::Error| TranscribeError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&parent).map_err(write_err)?;
    let mut tmp = tempfile::NamedTempFile::new_in(&parent).map_err(write_err)?;
    tmp.write_all(contents.as_bytes()).map_err(write_err)?;
    tmp.persist(path).map_err(|e| write_err(e.error))?;
    Ok(())
}

// ── Provider resolution ──────────────────────────────────────────────────

fn create_vision_provider(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, TranscribeError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        TranscribeError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the LLM provider, from most-specific to least-specific.
///
/// 1. **Pre-built provider** (`config.provider`), used as-is.
/// 2. **Named provider + model** (`config.provider_name`); the factory reads
///    the matching API key from the environment.
/// 3. **Environment pair** `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`.
/// 4. **OpenAI** when `OPENAI_API_KEY` is set.
/// 5. **Full auto-detection** via `ProviderFactory::from_env`.
pub(crate) fn resolve_provider(
    config: &TranscribeConfig,
) -> Result<Arc<dyn LLMProvider>, TranscribeError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        return create_vision_provider(name, config.model_or_default());
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_vision_provider(&prov, &model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            return create_vision_provider("openai", config.model_or_default());
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| TranscribeError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or configure a provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}
