//! Progress-callback trait for per-image transcription events.
//!
//! Inject an [`Arc<dyn TranscriptionProgressCallback>`] via
//! [`crate::config::TranscribeConfigBuilder::progress_callback`] to receive
//! events as the pipeline processes each image. Callers forward them to a
//! progress bar, a log, or a UI channel.
//!
//! # Example
//!
//! ```rust
//! use journal_transcribe::{TranscriptionProgressCallback, TranscribeConfig};
//! use std::sync::Arc;
//!
//! struct Printer;
//!
//! impl TranscriptionProgressCallback for Printer {
//!     fn on_progress(&self, completed: usize, total: usize) {
//!         eprintln!("{completed}/{total}");
//!     }
//! }
//!
//! let config = TranscribeConfig::builder()
//!     .progress_callback(Arc::new(Printer))
//!     .build()
//!     .unwrap();
//! ```

use crate::output::ItemStage;
use std::sync::Arc;

/// Called by the pipeline as it processes each image.
///
/// Implementations must be `Send + Sync`: with `concurrency > 1` events for
/// different images arrive from different tasks. All methods have default
/// no-op implementations so callers only override what they care about.
pub trait TranscriptionProgressCallback: Send + Sync {
    /// Called once before any image is processed.
    fn on_batch_start(&self, total_images: usize) {
        let _ = total_images;
    }

    /// Called when an image enters the pipeline.
    ///
    /// # Arguments
    /// * `index` — 1-indexed upload position
    /// * `name`  — the image's file name
    fn on_item_start(&self, index: usize, total: usize, name: &str) {
        let _ = (index, total, name);
    }

    /// Called each time an image reaches a new pipeline stage.
    fn on_item_stage(&self, index: usize, name: &str, stage: ItemStage) {
        let _ = (index, name, stage);
    }

    /// Called when an image's text has been appended to the document.
    fn on_item_complete(&self, index: usize, total: usize, name: &str, text_len: usize) {
        let _ = (index, total, name, text_len);
    }

    /// Called when an image fails; the batch carries on unless aborting.
    fn on_item_error(&self, index: usize, total: usize, name: &str, error: &str) {
        let _ = (index, total, name, error);
    }

    /// Called after every finished image, successful or not.
    ///
    /// `completed` counts finished images, so `completed / total` is the
    /// fraction to show in a progress indicator.
    fn on_progress(&self, completed: usize, total: usize) {
        let _ = (completed, total);
    }

    /// Called once after all images have been attempted.
    fn on_batch_complete(&self, total_images: usize, success_count: usize) {
        let _ = (total_images, success_count);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl TranscriptionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::TranscribeConfig`].
pub type ProgressCallback = Arc<dyn TranscriptionProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct TrackingCallback {
        starts: AtomicUsize,
        completes: AtomicUsize,
        errors: AtomicUsize,
        progress: Mutex<Vec<(usize, usize)>>,
        stages: Mutex<Vec<ItemStage>>,
    }

    impl TranscriptionProgressCallback for TrackingCallback {
        fn on_item_start(&self, _index: usize, _total: usize, _name: &str) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }

        fn on_item_stage(&self, _index: usize, _name: &str, stage: ItemStage) {
            self.stages.lock().unwrap().push(stage);
        }

        fn on_item_complete(&self, _index: usize, _total: usize, _name: &str, _len: usize) {
            self.completes.fetch_add(1, Ordering::SeqCst);
        }

        fn on_item_error(&self, _index: usize, _total: usize, _name: &str, _error: &str) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }

        fn on_progress(&self, completed: usize, total: usize) {
            self.progress.lock().unwrap().push((completed, total));
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_batch_start(2);
        cb.on_item_start(1, 2, "a.jpg");
        cb.on_item_stage(1, "a.jpg", ItemStage::Compressed);
        cb.on_item_complete(1, 2, "a.jpg", 10);
        cb.on_item_error(2, 2, "b.jpg", "boom");
        cb.on_progress(2, 2);
        cb.on_batch_complete(2, 1);
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = TrackingCallback::default();

        tracker.on_item_start(1, 2, "a.jpg");
        tracker.on_item_stage(1, "a.jpg", ItemStage::OcrDone);
        tracker.on_item_complete(1, 2, "a.jpg", 42);
        tracker.on_progress(1, 2);
        tracker.on_item_start(2, 2, "b.jpg");
        tracker.on_item_error(2, 2, "b.jpg", "OCR timeout");
        tracker.on_progress(2, 2);

        assert_eq!(tracker.starts.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.completes.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.errors.load(Ordering::SeqCst), 1);
        assert_eq!(*tracker.progress.lock().unwrap(), vec![(1, 2), (2, 2)]);
        assert_eq!(*tracker.stages.lock().unwrap(), vec![ItemStage::OcrDone]);
    }

    #[test]
    fn arc_dyn_callback_works() {
        let cb: ProgressCallback = Arc::new(NoopProgressCallback);
        cb.on_batch_start(10);
        cb.on_progress(1, 10);
    }
}
