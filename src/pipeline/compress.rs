//! Size-bounded JPEG re-compression.
//!
//! Decodes the upload once, flattens it to 3-channel RGB, and re-encodes at
//! decreasing JPEG quality until the output fits the byte budget or the
//! quality floor is reached. Every attempt encodes from the decoded pixels,
//! never from a previous lossy attempt.

use crate::error::CompressionError;
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use tracing::debug;

/// Knobs for [`compress`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressionSettings {
    pub size_budget_bytes: usize,
    pub initial_quality: u8,
    pub quality_floor: u8,
    pub quality_step: u8,
}

impl Default for CompressionSettings {
    fn default() -> Self {
        Self {
            size_budget_bytes: 4_000_000,
            initial_quality: 85,
            quality_floor: 10,
            quality_step: 5,
        }
    }
}

impl From<&crate::config::TranscribeConfig> for CompressionSettings {
    fn from(c: &crate::config::TranscribeConfig) -> Self {
        Self {
            size_budget_bytes: c.size_budget_bytes,
            initial_quality: c.initial_quality,
            quality_floor: c.quality_floor,
            quality_step: c.quality_step,
        }
    }
}

/// JPEG output of [`compress`].
#[derive(Debug, Clone)]
pub struct CompressedImage {
    pub bytes: Vec<u8>,
    /// Quality of the returned encoding.
    pub quality: u8,
    pub width: u32,
    pub height: u32,
    /// Number of encodes performed.
    pub attempts: u32,
}

impl CompressedImage {
    /// False when the floor was reached and the output is still too large.
    pub fn within(&self, size_budget_bytes: usize) -> bool {
        self.bytes.len() <= size_budget_bytes
    }
}

/// Re-encode `image_bytes` as JPEG no larger than the budget, best effort.
///
/// Output may exceed `size_budget_bytes` only when `quality == quality_floor`.
pub fn compress(
    image_bytes: &[u8],
    settings: &CompressionSettings,
) -> Result<CompressedImage, CompressionError> {
    let decoded =
        image::load_from_memory(image_bytes).map_err(|e| CompressionError::Decode(e.to_string()))?;
    let rgb = decoded.to_rgb8();
    let floor = settings.quality_floor.clamp(1, 100);
    let step = settings.quality_step.max(1);

    let mut quality = settings.initial_quality.clamp(floor, 100);
    let mut attempts = 0u32;
    loop {
        let bytes = encode_jpeg(&rgb, quality)?;
        attempts += 1;
        debug!(
            "JPEG q={} → {} bytes (budget {})",
            quality,
            bytes.len(),
            settings.size_budget_bytes
        );

        if bytes.len() <= settings.size_budget_bytes || quality <= floor {
            return Ok(CompressedImage {
                bytes,
                quality,
                width: rgb.width(),
                height: rgb.height(),
                attempts,
            });
        }
        quality = quality.saturating_sub(step).max(floor);
    }
}

fn encode_jpeg(rgb: &RgbImage, quality: u8) -> Result<Vec<u8>, CompressionError> {
    let mut buf = Vec::new();
    rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut buf, quality))
        .map_err(|e| CompressionError::Encode {
            quality,
            detail: e.to_string(),
        })?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageFormat, Rgb, Rgba, RgbaImage};
    use std::io::Cursor;

    fn png_bytes(img: DynamicImage) -> Vec<u8> {
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        buf
    }

    fn solid_png(w: u32, h: u32) -> Vec<u8> {
        png_bytes(DynamicImage::ImageRgba8(RgbaImage::from_pixel(
            w,
            h,
            Rgba([240, 235, 220, 255]),
        )))
    }

    /// Deterministic pseudo-random noise: compresses badly at any quality.
    fn noisy_png(w: u32, h: u32) -> Vec<u8> {
        let mut state: u32 = 0x1234_5678;
        let img = RgbImage::from_fn(w, h, |_, _| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            let b = state.to_le_bytes();
            Rgb([b[0], b[1], b[2]])
        });
        png_bytes(DynamicImage::ImageRgb8(img))
    }

    #[test]
    fn solid_image_fits_budget_on_first_try() {
        let settings = CompressionSettings {
            size_budget_bytes: 50_000,
            ..Default::default()
        };
        let out = compress(&solid_png(200, 200), &settings).unwrap();
        assert!(out.within(settings.size_budget_bytes));
        assert_eq!(out.quality, 85);
        assert_eq!(out.attempts, 1);
    }

    #[test]
    fn noisy_image_bottoms_out_at_floor() {
        let settings = CompressionSettings {
            size_budget_bytes: 500,
            ..Default::default()
        };
        let out = compress(&noisy_png(256, 256), &settings).unwrap();
        // 85, 80, …, 10 → 16 encodes
        assert!(!out.within(settings.size_budget_bytes));
        assert_eq!(out.quality, settings.quality_floor);
        assert_eq!(out.attempts, 16);
    }

    #[test]
    fn output_is_budget_or_floor() {
        let png = noisy_png(128, 128);
        for budget in [1_000usize, 10_000, 30_000, 1_000_000] {
            let settings = CompressionSettings {
                size_budget_bytes: budget,
                ..Default::default()
            };
            let out = compress(&png, &settings).unwrap();
            assert!(
                out.bytes.len() <= budget || out.quality == settings.quality_floor,
                "budget {budget}: {} bytes at q{}",
                out.bytes.len(),
                out.quality
            );
        }
    }

    #[test]
    fn output_is_jpeg_with_same_dimensions() {
        let out = compress(&noisy_png(97, 61), &CompressionSettings::default()).unwrap();
        assert_eq!(
            image::guess_format(&out.bytes).unwrap(),
            ImageFormat::Jpeg
        );
        let back = image::load_from_memory(&out.bytes).unwrap();
        assert_eq!((back.width(), back.height()), (97, 61));
        assert_eq!((out.width, out.height), (97, 61));
    }

    #[test]
    fn alpha_channel_is_stripped() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(8, 8, Rgba([10, 20, 30, 0])));
        let out = compress(&png_bytes(img), &CompressionSettings::default()).unwrap();
        let back = image::load_from_memory(&out.bytes).unwrap();
        assert_eq!(back.color().channel_count(), 3);
    }

    #[test]
    fn step_not_dividing_range_still_reaches_floor() {
        let settings = CompressionSettings {
            size_budget_bytes: 1,
            initial_quality: 85,
            quality_floor: 12,
            quality_step: 20,
        };
        let out = compress(&solid_png(32, 32), &settings).unwrap();
        // 85, 65, 45, 25, 12
        assert_eq!(out.quality, 12);
        assert_eq!(out.attempts, 5);
    }

    #[test]
    fn floor_above_100_is_clamped() {
        let settings = CompressionSettings {
            size_budget_bytes: 1,
            initial_quality: 85,
            quality_floor: 150,
            quality_step: 5,
        };
        let out = compress(&solid_png(16, 16), &settings).unwrap();
        assert_eq!(out.quality, 100);
        assert_eq!(out.attempts, 1);
    }

    #[test]
    fn corrupt_input_is_a_decode_error() {
        let err = compress(b"\x89PNG\r\n\x1a\nnot really", &CompressionSettings::default())
            .unwrap_err();
        assert!(matches!(err, CompressionError::Decode(_)));
    }

    #[test]
    fn input_is_not_mutated() {
        let png = solid_png(16, 16);
        let copy = png.clone();
        compress(&png, &CompressionSettings::default()).unwrap();
        assert_eq!(png, copy);
    }
}
