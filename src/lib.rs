//! # journal-transcribe
//!
//! Transcribe photographed handwritten journal pages into one text document,
//! combining an OCR service with a vision-capable LLM.
//!
//! ## Why combine OCR and a vision model?
//!
//! OCR engines read handwriting letter by letter and misread sloppy words;
//! vision LLMs read whole lines in context but occasionally paraphrase. This
//! crate hands the model both the page image and the OCR draft and asks for
//! an exact transcription, so each source corrects the other's mistakes.
//!
//! ## Pipeline Overview
//!
//! ```text
//! images (JPEG/PNG, upload order)
//!  │
//!  ├─ 1. Compress  re-encode as JPEG within a byte budget (spawn_blocking)
//!  ├─ 2. OCR       Google Vision (one call) or Azure Read (submit + poll)
//!  ├─ 3. Review    vision LLM corrects the OCR draft against the image
//!  ├─ 4. Polish    strip fences, CRLF, invisible characters
//!  └─ 5. Output    "# {name}\n\n{text}\n\n---\n\n" per image, in order
//! ```
//!
//! Which stages run is selected by [`PipelineMode`]:
//! `DirectTranscribe`, `DirectTranscribePlusSelfReview`,
//! `OcrPlusVisionReview` (default), `OcrOnly`, `OcrPlusTextCleanup`.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use journal_transcribe::{transcribe_files, TranscribeConfig};
//! use std::path::PathBuf;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // OPENAI_API_KEY, AZURE_VISION_ENDPOINT and AZURE_VISION_KEY from the environment
//!     let config = TranscribeConfig::default();
//!     let pages = vec![PathBuf::from("page1.jpg"), PathBuf::from("page2.png")];
//!     let output = transcribe_files(&pages, &config).await?;
//!     print!("{}", output.document);
//!     for (name, reason) in output.failures() {
//!         eprintln!("{name}: {reason}");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `journal2txt` binary (clap + anyhow + tracing-subscriber + indicatif + dotenvy) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! journal-transcribe = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod cancel;
pub mod config;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod stream;
pub mod transcribe;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use cancel::CancelToken;
pub use config::{
    FailurePolicy, OcrBackendKind, PipelineMode, TranscribeConfig, TranscribeConfigBuilder,
};
pub use error::{CompressionError, ItemError, LlmError, OcrError, TranscribeError};
pub use output::{
    CombinedDocument, ImageResult, ItemStage, TranscriptionOutput, TranscriptionStats,
};
pub use pipeline::compress::{compress, CompressedImage, CompressionSettings};
pub use pipeline::input::{load_batch, ImageAsset, SourceFormat};
pub use pipeline::ocr::{OcrClient, RetryPolicy};
pub use pipeline::review::{VisionModel, VisionReviewer};
pub use progress::{NoopProgressCallback, ProgressCallback, TranscriptionProgressCallback};
pub use stream::{transcribe_stream, ImageStream};
pub use transcribe::{
    transcribe, transcribe_files, transcribe_sync, transcribe_to_file, write_document, Pipeline,
};
