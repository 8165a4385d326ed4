//! Image encoding: raw JPEG/PNG bytes → base64 `ImageData` for the vision LLM.
//!
//! VLM APIs accept images as base64 data-URIs embedded in the JSON request
//! body. The bytes are already JPEG (compressed) or the original upload, so
//! this step only base64-encodes and tags the MIME type.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use tracing::debug;

/// Wrap image bytes as base64 `ImageData` with the given MIME type.
///
/// `detail: "high"` lets GPT-4-class models tile the full page; small
/// handwriting is lost at the single-tile `low` setting.
pub fn encode_image(bytes: &[u8], mime_type: &str) -> ImageData {
    let b64 = STANDARD.encode(bytes);
    debug!("Encoded image → {} bytes base64 ({})", b64.len(), mime_type);
    ImageData::new(b64, mime_type).with_detail("high")
}
