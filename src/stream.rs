//! Streaming transcription API: emit image results as they complete.
//!
//! Unlike the eager [`crate::transcribe::transcribe`], which returns only
//! after every image finishes, [`transcribe_stream`] yields each
//! [`ImageResult`] as soon as its pipeline run ends. With `concurrency > 1`
//! results may arrive out of upload order; sort by `index` if order matters,
//! or render with [`crate::output::CombinedDocument`] after collecting.
//!
//! Failed images are yielded like any other, with `error` set. The failure
//! policy does not apply here: the caller decides when to stop polling.

use crate::config::TranscribeConfig;
use crate::error::TranscribeError;
use crate::output::ImageResult;
use crate::pipeline::input::ImageAsset;
use crate::transcribe::Pipeline;
use futures::future;
use futures::stream::{self, StreamExt};
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_stream::Stream;
use tracing::info;

/// A boxed stream of per-image results.
pub type ImageStream = Pin<Box<dyn Stream<Item = ImageResult> + Send>>;

/// Transcribe `images`, streaming results in completion order.
///
/// # Returns
/// - `Ok(ImageStream)`: one `ImageResult` per image
/// - `Err(TranscribeError)`: fatal error (empty batch, missing credentials)
///
/// # Example
/// ```rust,no_run
/// use journal_transcribe::{transcribe_stream, ImageAsset, TranscribeConfig};
/// use futures::StreamExt;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let pages = vec![ImageAsset::from_path("page1.jpg").await?];
/// let mut results = transcribe_stream(pages, &TranscribeConfig::default())?;
/// while let Some(item) = results.next().await {
///     match &item.error {
///         None => println!("{}: {} chars", item.name, item.text.len()),
///         Some(e) => eprintln!("{}: {}", item.name, e.reason()),
///     }
/// }
/// # Ok(())
/// # }
/// ```
pub fn transcribe_stream(
    images: Vec<ImageAsset>,
    config: &TranscribeConfig,
) -> Result<ImageStream, TranscribeError> {
    if images.is_empty() {
        return Err(TranscribeError::EmptyBatch);
    }
    let pipeline = Pipeline::from_config(config)?;
    Ok(pipeline.into_stream(images))
}

impl Pipeline {
    /// Consume the pipeline and stream one result per image.
    ///
    /// Emits `on_batch_start` immediately, per-image progress events as
    /// results are produced, and `on_batch_complete` once the last result has
    /// been yielded. A stream dropped early never reports batch completion.
    pub fn into_stream(self, images: Vec<ImageAsset>) -> ImageStream {
        let total = images.len();
        let concurrency = self.concurrency();
        info!(
            "Streaming transcription of {} images (mode={}, concurrency={})",
            total,
            self.mode(),
            concurrency
        );
        self.notify(|cb| cb.on_batch_start(total));

        let pipeline = Arc::new(self);
        let finisher = Arc::clone(&pipeline);
        let completed = Arc::new(AtomicUsize::new(0));
        let succeeded = Arc::new(AtomicUsize::new(0));
        let tally = Arc::clone(&succeeded);

        let results = stream::iter(images.into_iter().enumerate())
            .map(move |(i, asset)| {
                let pipeline = Arc::clone(&pipeline);
                let completed = Arc::clone(&completed);
                let succeeded = Arc::clone(&succeeded);
                async move {
                    let result = pipeline
                        .process_image(i + 1, total, &asset, &completed)
                        .await;
                    if result.is_success() {
                        succeeded.fetch_add(1, Ordering::SeqCst);
                    }
                    result
                }
            })
            .buffer_unordered(concurrency)
            .map(Some);

        let done = stream::once(async move {
            let success = tally.load(Ordering::SeqCst);
            finisher.notify(|cb| cb.on_batch_complete(total, success));
            None
        });

        Box::pin(results.chain(done).filter_map(future::ready))
    }
}
