//! Pipeline stages for journal page transcription.
//!
//! Each submodule implements exactly one step, so each is testable on its
//! own and the orchestrator in [`crate::transcribe`] only sequences them.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ compress ──▶ ocr ──▶ encode ──▶ review ──▶ postprocess
//! (files)   (JPEG ≤ B)  (text)  (base64)   (LLM)      (cleanup)
//! ```
//!
//! 1. [`input`]    — read uploads and sniff JPEG/PNG
//! 2. [`compress`] — re-encode as JPEG within the byte budget; CPU-bound,
//!    runs in `spawn_blocking`
//! 3. [`ocr`]      — Google (one call) or Azure (submit then poll) with a
//!    bounded retry policy
//! 4. [`encode`]   — base64-wrap the upload for the multimodal request body
//! 5. [`review`]   — vision or text-only LLM pass with retry/backoff
//! 6. [`postprocess`] — deterministic cleanup of model output

pub mod compress;
pub mod encode;
pub mod input;
pub mod ocr;
pub mod postprocess;
pub mod review;
