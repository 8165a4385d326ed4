//! Result types: per-image outcomes, the combined document, batch stats.

use crate::error::{ItemError, TranscribeError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Pipeline stage an image has reached.
///
/// `Pending → Compressed → OcrDone → Reviewed → Appended`, with `Failed`
/// reachable from any non-terminal stage. Modes that skip a stage simply
/// never report it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStage {
    Pending,
    Compressed,
    OcrDone,
    Reviewed,
    Appended,
    Failed,
}

impl fmt::Display for ItemStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ItemStage::Pending => "pending",
            ItemStage::Compressed => "compressed",
            ItemStage::OcrDone => "ocr",
            ItemStage::Reviewed => "reviewed",
            ItemStage::Appended => "appended",
            ItemStage::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Outcome of one image's pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageResult {
    /// 1-indexed upload position.
    pub index: usize,
    /// File name used as the section heading.
    pub name: String,
    /// Last stage reached (`Appended` on success, `Failed` otherwise).
    pub stage: ItemStage,
    /// Raw OCR text, when an OCR stage ran and succeeded.
    pub ocr_text: Option<String>,
    /// Final text for this image (empty on failure).
    pub text: String,
    /// JPEG quality the compressor settled on, if compression ran.
    pub jpeg_quality: Option<u8>,
    /// Size in bytes of the image actually sent to the services.
    pub upload_bytes: usize,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub duration_ms: u64,
    pub error: Option<ItemError>,
}

impl ImageResult {
    pub(crate) fn pending(index: usize, name: &str) -> Self {
        Self {
            index,
            name: name.to_string(),
            stage: ItemStage::Pending,
            ocr_text: None,
            text: String::new(),
            jpeg_quality: None,
            upload_bytes: 0,
            input_tokens: 0,
            output_tokens: 0,
            duration_ms: 0,
            error: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Text prefix of a failed image's section body.
pub const FAILURE_MARKER: &str = "[transcription failed";

/// Render one document section.
pub fn render_section(name: &str, body: &str) -> String {
    format!("# {name}\n\n{body}\n\n---\n\n")
}

/// Append-only document with one labelled section per image, in upload order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CombinedDocument {
    text: String,
    sections: usize,
}

impl CombinedDocument {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the section for `result`: its text, or a failure marker.
    pub fn append(&mut self, result: &ImageResult) {
        let section = match &result.error {
            None => render_section(&result.name, &result.text),
            Some(err) => render_section(
                &result.name,
                &format!("{FAILURE_MARKER}: {}]", err.reason()),
            ),
        };
        self.text.push_str(&section);
        self.sections += 1;
    }

    pub fn section_count(&self) -> usize {
        self.sections
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn into_string(self) -> String {
        self.text
    }
}

/// Batch-level counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TranscriptionStats {
    pub total_images: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_duration_ms: u64,
}

/// Everything produced by one batch run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionOutput {
    /// The combined text document, ready for display or download.
    pub document: String,
    /// Per-image results in upload order.
    pub items: Vec<ImageResult>,
    pub stats: TranscriptionStats,
}

impl TranscriptionOutput {
    /// Assemble document and stats from ordered results.
    pub(crate) fn from_results(items: Vec<ImageResult>, total_duration_ms: u64) -> Self {
        let mut document = CombinedDocument::new();
        for item in &items {
            document.append(item);
        }
        let succeeded = items.iter().filter(|i| i.is_success()).count();
        let stats = TranscriptionStats {
            total_images: items.len(),
            succeeded,
            failed: items.len() - succeeded,
            total_input_tokens: items.iter().map(|i| i.input_tokens).sum(),
            total_output_tokens: items.iter().map(|i| i.output_tokens).sum(),
            total_duration_ms,
        };
        Self {
            document: document.into_string(),
            items,
            stats,
        }
    }

    /// `(name, reason)` for every failed image, in upload order.
    pub fn failures(&self) -> Vec<(&str, String)> {
        self.items
            .iter()
            .filter_map(|i| i.error.as_ref().map(|e| (i.name.as_str(), e.reason())))
            .collect()
    }

    /// Treat any failed image as an error.
    pub fn into_result(self) -> Result<Self, TranscribeError> {
        let total = self.stats.total_images;
        let failed = self.stats.failed;
        if failed == 0 {
            return Ok(self);
        }
        if failed == total {
            let first_error = self
                .items
                .iter()
                .find_map(|i| i.error.as_ref())
                .map(|e| e.to_string())
                .unwrap_or_else(|| "Unknown error".to_string());
            return Err(TranscribeError::AllImagesFailed { total, first_error });
        }
        Err(TranscribeError::PartialFailure {
            success: self.stats.succeeded,
            failed,
            total,
        })
    }
}
