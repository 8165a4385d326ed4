//! Instruction prompts for the LLM stages of the pipeline.
//!
//! Every prompt lives here so a wording change touches one place and unit
//! tests can inspect prompts without calling a model.
//!
//! Callers can override the vision transcription prompt via
//! [`crate::config::TranscribeConfig::transcribe_prompt`].

/// Vision prompt used when no OCR draft exists.
pub const TRANSCRIBE_PROMPT: &str = "You are a transcription expert. Carefully review this handwritten image and transcribe the text exactly as it appears. Do not invent words. Keep original spelling and punctuation, even if incorrect. If you cannot read a word, write [illegible].

Output only the transcription with no explanation or additional commentary.";

/// Vision prompt used when an OCR draft is available.
///
/// The draft is appended by [`review_prompt`].
pub const REVIEW_PROMPT: &str = "You are a transcription expert. Below is a draft transcription of the attached handwritten journal page produced by an OCR engine. Compare it carefully against the image and correct any misread words so the text matches exactly what is written on the page.

Rules:
- Transcribe only what is visible in the image. Never invent words or add content.
- Keep the original spelling and punctuation, even if incorrect.
- Use the OCR draft only as a reference to resolve ambiguous handwriting; do not trust it blindly.
- If a word is truly unreadable, write [illegible].
- Output only the transcription with no explanation or additional commentary.";

/// Text-only proofreading pass over a vision transcription.
pub const SELF_REVIEW_PROMPT: &str = "You are reviewing the following handwritten transcription for accuracy. Correct any obvious mistakes. Do not invent words. Keep it as close to the original handwriting as possible.";

/// Text-only cleanup pass over raw OCR output.
pub const CLEANUP_PROMPT: &str = "You are cleaning up raw OCR output from a handwritten journal page. Fix only obvious character-recognition errors in spelling and punctuation. Do not rephrase, reorder, summarise, or add any words. Preserve line breaks.";

const DRAFT_OPEN: &str = "OCR draft:\n\"\"\"\n";
const DRAFT_CLOSE: &str = "\n\"\"\"";

/// Build the vision review prompt with the OCR draft embedded verbatim.
pub fn review_prompt(ocr_draft: &str) -> String {
    format!("{REVIEW_PROMPT}\n\n{DRAFT_OPEN}{ocr_draft}{DRAFT_CLOSE}")
}

/// Build the text-only self-review prompt for a prior transcription.
pub fn self_review_prompt(transcription: &str) -> String {
    format!(
        "{SELF_REVIEW_PROMPT}\n\nOriginal transcription:\n{transcription}\n\nOutput only the corrected transcription. Do not explain your changes."
    )
}

/// Build the text-only cleanup prompt for raw OCR text.
pub fn cleanup_prompt(ocr_text: &str) -> String {
    format!(
        "{CLEANUP_PROMPT}\n\nOCR text:\n{ocr_text}\n\nOutput only the cleaned text. Do not explain your changes."
    )
}
