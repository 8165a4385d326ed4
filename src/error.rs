//! Error types for the journal-transcribe library.
//!
//! Three layers of error reflect three distinct failure scopes:
//!
//! * [`TranscribeError`] — **Fatal**: the batch cannot proceed at all
//!   (missing file, unsupported format, no provider configured). Returned as
//!   `Err(TranscribeError)` from the top-level `transcribe*` functions.
//!
//! * [`CompressionError`], [`OcrError`], [`LlmError`] — **Stage** errors raised
//!   by one pipeline component for one image.
//!
//! * [`ItemError`] — **Non-fatal**: a single image failed at some stage but the
//!   rest of the batch is fine. Stored inside [`crate::output::ImageResult`]
//!   and rendered as a failure marker in the combined document.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the journal-transcribe library.
///
/// Image-level failures use [`ItemError`] and are stored in
/// [`crate::output::ImageResult`] rather than propagated here.
#[derive(Debug, Error)]
pub enum TranscribeError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("Image file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The file is readable but neither JPEG nor PNG.
    #[error("Unsupported image format for '{name}': only JPEG and PNG are accepted")]
    UnsupportedFormat { name: String },

    /// The batch contained no images.
    #[error("No images to transcribe")]
    EmptyBatch,

    // ── Service configuration ─────────────────────────────────────────────
    /// The configured LLM provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// The selected OCR backend has no endpoint or credential.
    #[error("OCR backend '{backend}' is not configured.\n{hint}")]
    OcrNotConfigured { backend: String, hint: String },

    // ── Batch outcome errors ──────────────────────────────────────────────
    /// The batch stopped at the first failed image (`FailurePolicy::Abort`).
    #[error("Batch aborted at '{name}': {detail}")]
    Aborted { name: String, detail: String },

    /// Every image failed; the document holds only failure markers.
    #[error("All {total} images failed.\nFirst error: {first_error}")]
    AllImagesFailed { total: usize, first_error: String },

    /// Some images succeeded but at least one failed.
    ///
    /// Returned by [`crate::output::TranscriptionOutput::into_result`] when
    /// the caller wants to treat any image failure as an error.
    #[error("{failed}/{total} images failed during transcription")]
    PartialFailure {
        success: usize,
        failed: usize,
        total: usize,
    },

    /// The batch was cancelled through its [`crate::cancel::CancelToken`].
    #[error("Transcription cancelled")]
    Cancelled,

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the output text file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// The image could not be decoded or re-encoded.
#[derive(Debug, Error)]
pub enum CompressionError {
    #[error("cannot decode image: {0}")]
    Decode(String),

    #[error("JPEG encoding failed at quality {quality}: {detail}")]
    Encode { quality: u8, detail: String },
}

/// Failure raised by an OCR backend for one image.
#[derive(Debug, Error)]
pub enum OcrError {
    /// The service answered but reported an error in its payload.
    #[error("{backend} reported an error: {message}")]
    Service { backend: String, message: String },

    /// Transport failure or unexpected HTTP status.
    #[error("{backend} request failed: {detail}")]
    Http { backend: String, detail: String },

    /// Every submission was answered with 429.
    #[error("still rate-limited after {attempts} submissions")]
    RateLimitExhausted { attempts: u32 },

    /// The operation never left the running state within the poll budget.
    #[error("analysis still running after {polls} polls")]
    PollLimitExceeded { polls: u32 },

    /// The retry policy's overall deadline elapsed.
    #[error("OCR deadline of {secs}s exceeded")]
    DeadlineExceeded { secs: u64 },

    /// The asynchronous analysis finished with status `failed`.
    #[error("analysis failed: {detail}")]
    AnalysisFailed { detail: String },

    /// The response body did not have the expected shape.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("cancelled")]
    Cancelled,
}

/// Failure raised by the vision/text LLM for one image.
#[derive(Debug, Error)]
pub enum LlmError {
    /// Transport or API-level failure, after all retries.
    #[error("LLM call failed after {retries} retries: {detail}")]
    Api { retries: u32, detail: String },

    /// A single provider call failed; retried by the reviewer.
    #[error("provider error: {0}")]
    Provider(String),

    /// The call exceeded the per-call timeout.
    #[error("LLM call timed out after {secs}s")]
    Timeout { secs: u64 },

    /// The model answered with nothing usable.
    #[error("LLM returned an empty transcription")]
    EmptyResponse,

    #[error("cancelled")]
    Cancelled,
}

/// A non-fatal error for a single image.
///
/// Stored alongside [`crate::output::ImageResult`] when an image fails.
/// The batch continues unless `FailurePolicy::Abort` is configured.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum ItemError {
    /// Image decoding or JPEG re-encoding failed.
    #[error("{name}: compression failed: {detail}")]
    Compression { name: String, detail: String },

    /// OCR extraction failed or exhausted its retry policy.
    #[error("{name}: OCR failed: {detail}")]
    Ocr { name: String, detail: String },

    /// The LLM review/transcription step failed.
    #[error("{name}: LLM failed: {detail}")]
    Llm { name: String, detail: String },

    /// Cancelled before the image finished.
    #[error("{name}: cancelled")]
    Cancelled { name: String },
}

impl ItemError {
    /// Short one-line reason used in the failure marker of the combined document.
    ///
    /// Whitespace runs in the detail (e.g. newlines from an HTML error page)
    /// collapse to single spaces.
    pub fn reason(&self) -> String {
        let (kind, detail) = match self {
            ItemError::Compression { detail, .. } => ("compression error", detail),
            ItemError::Ocr { detail, .. } => ("OCR error", detail),
            ItemError::Llm { detail, .. } => ("LLM error", detail),
            ItemError::Cancelled { .. } => return "cancelled".to_string(),
        };
        let detail: Vec<&str> = detail.split_whitespace().collect();
        format!("{kind}: {}", detail.join(" "))
    }

    pub fn name(&self) -> &str {
        match self {
            ItemError::Compression { name, .. }
            | ItemError::Ocr { name, .. }
            | ItemError::Llm { name, .. }
            | ItemError::Cancelled { name } => name,
        }
    }

    pub(crate) fn compression(name: &str, err: CompressionError) -> Self {
        ItemError::Compression {
            name: name.to_string(),
            detail: err.to_string(),
        }
    }

    pub(crate) fn ocr(name: &str, err: OcrError) -> Self {
        match err {
            OcrError::Cancelled => ItemError::Cancelled {
                name: name.to_string(),
            },
            other => ItemError::Ocr {
                name: name.to_string(),
                detail: other.to_string(),
            },
        }
    }

    pub(crate) fn llm(name: &str, err: LlmError) -> Self {
        match err {
            LlmError::Cancelled => ItemError::Cancelled {
                name: name.to_string(),
            },
            other => ItemError::Llm {
                name: name.to_string(),
                detail: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_failure_display() {
        let e = TranscribeError::PartialFailure {
            success: 9,
            failed: 1,
            total: 10,
        };
        let msg = e.to_string();
        assert!(msg.contains("1/10"), "got: {msg}");
    }

    #[test]
    fn ocr_error_maps_to_item_error() {
        let e = ItemError::ocr(
            "page2.png",
            OcrError::AnalysisFailed {
                detail: "bad image".into(),
            },
        );
        assert_eq!(e.name(), "page2.png");
        assert!(e.reason().starts_with("OCR error"));
        assert!(e.reason().contains("bad image"));
    }

    #[test]
    fn multiline_detail_becomes_one_line_reason() {
        let e = ItemError::Ocr {
            name: "page1.jpg".into(),
            detail: "HTTP 502: <html>\r\n  <body>\n\tBad Gateway\n</body>".into(),
        };
        assert_eq!(
            e.reason(),
            "OCR error: HTTP 502: <html> <body> Bad Gateway </body>"
        );
    }

    #[test]
    fn cancelled_stage_errors_become_cancelled_items() {
        assert!(matches!(
            ItemError::ocr("a.jpg", OcrError::Cancelled),
            ItemError::Cancelled { .. }
        ));
        assert!(matches!(
            ItemError::llm("a.jpg", LlmError::Cancelled),
            ItemError::Cancelled { .. }
        ));
    }

    #[test]
    fn rate_limit_exhausted_display() {
        let e = OcrError::RateLimitExhausted { attempts: 7 };
        assert!(e.to_string().contains("7 submissions"));
    }

    #[test]
    fn llm_api_error_display() {
        let e = LlmError::Api {
            retries: 2,
            detail: "invalid key".into(),
        };
        assert!(e.to_string().contains("2 retries"));
        assert!(e.to_string().contains("invalid key"));
    }
}
