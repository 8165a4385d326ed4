//! Batch input: turn uploaded files or in-memory bytes into [`ImageAsset`]s.
//!
//! Only JPEG and PNG are accepted. The format is sniffed from the magic
//! bytes, not the extension, so a mislabelled `.jpg` that is really a PNG
//! still goes through and a renamed PDF is rejected up front.

use crate::error::TranscribeError;
use image::ImageFormat;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Source encoding of an uploaded image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceFormat {
    Jpeg,
    Png,
}

impl SourceFormat {
    pub fn mime_type(self) -> &'static str {
        match self {
            SourceFormat::Jpeg => "image/jpeg",
            SourceFormat::Png => "image/png",
        }
    }

    /// Sniff the format from magic bytes.
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        match image::guess_format(bytes).ok()? {
            ImageFormat::Jpeg => Some(SourceFormat::Jpeg),
            ImageFormat::Png => Some(SourceFormat::Png),
            _ => None,
        }
    }
}

/// One uploaded image. Immutable once read.
#[derive(Debug, Clone)]
pub struct ImageAsset {
    name: String,
    format: SourceFormat,
    bytes: Arc<[u8]>,
}

impl ImageAsset {
    /// Build an asset from in-memory bytes, rejecting anything but JPEG/PNG.
    pub fn from_bytes(
        name: impl Into<String>,
        bytes: impl Into<Vec<u8>>,
    ) -> Result<Self, TranscribeError> {
        let name = name.into();
        let bytes = bytes.into();
        let format = SourceFormat::sniff(&bytes)
            .ok_or_else(|| TranscribeError::UnsupportedFormat { name: name.clone() })?;
        Ok(Self {
            name,
            format,
            bytes: bytes.into(),
        })
    }

    /// Read a file from disk; the file name becomes the section heading.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, TranscribeError> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => TranscribeError::FileNotFound {
                path: path.to_path_buf(),
            },
            std::io::ErrorKind::PermissionDenied => TranscribeError::PermissionDenied {
                path: path.to_path_buf(),
            },
            _ => TranscribeError::Internal(format!("reading {}: {e}", path.display())),
        })?;
        let asset = Self::from_bytes(display_name(path), bytes)?;
        debug!(
            "Loaded {} ({:?}, {} bytes)",
            asset.name,
            asset.format,
            asset.bytes.len()
        );
        Ok(asset)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn format(&self) -> SourceFormat {
        self.format
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// Load a batch of files in the given order.
pub async fn load_batch(paths: &[PathBuf]) -> Result<Vec<ImageAsset>, TranscribeError> {
    if paths.is_empty() {
        return Err(TranscribeError::EmptyBatch);
    }
    let mut assets = Vec::with_capacity(paths.len());
    for path in paths {
        assets.push(ImageAsset::from_path(path).await?);
    }
    Ok(assets)
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";
    const JPEG_MAGIC: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F'];

    #[test]
    fn sniffs_png_and_jpeg() {
        assert_eq!(SourceFormat::sniff(PNG_MAGIC), Some(SourceFormat::Png));
        assert_eq!(SourceFormat::sniff(JPEG_MAGIC), Some(SourceFormat::Jpeg));
        assert_eq!(SourceFormat::sniff(b"%PDF-1.7"), None);
    }

    #[test]
    fn rejects_unsupported_bytes() {
        let err = ImageAsset::from_bytes("notes.pdf", b"%PDF-1.7".to_vec()).unwrap_err();
        assert!(matches!(err, TranscribeError::UnsupportedFormat { name } if name == "notes.pdf"));
    }

    #[test]
    fn mime_types() {
        assert_eq!(SourceFormat::Jpeg.mime_type(), "image/jpeg");
        assert_eq!(SourceFormat::Png.mime_type(), "image/png");
    }

    #[tokio::test]
    async fn from_path_uses_file_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("page1.png");
        std::fs::File::create(&path)
            .unwrap()
            .write_all(PNG_MAGIC)
            .unwrap();
        let asset = ImageAsset::from_path(&path).await.unwrap();
        assert_eq!(asset.name(), "page1.png");
        assert_eq!(asset.format(), SourceFormat::Png);
    }

    #[tokio::test]
    async fn missing_file_is_file_not_found() {
        let err = ImageAsset::from_path("/definitely/not/here.jpg")
            .await
            .unwrap_err();
        assert!(matches!(err, TranscribeError::FileNotFound { .. }));
    }

    #[tokio::test]
    async fn empty_batch_is_rejected() {
        assert!(matches!(
            load_batch(&[]).await,
            Err(TranscribeError::EmptyBatch)
        ));
    }
}
