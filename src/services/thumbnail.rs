use image::{DynamicImage, ImageFormat};
use std::io::Cursor;

use crate::models::derivative::DerivativeKind;
use crate::models::event::UploadEvent;

/// Bytes of a derived artifact plus its content type.
#[derive(Debug, Clone)]
pub struct Derived {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

/// CPU-bound transformation from an original upload to one derivative kind.
pub trait DerivativeGenerator: Send + Sync {
    fn kind(&self) -> DerivativeKind;

    /// Whether uploads of this content type get a derivative at all.
    fn supports(&self, content_type: &str) -> bool;

    /// Deterministic key, so reprocessing overwrites instead of duplicating.
    fn artifact_key(&self, event: &UploadEvent) -> String;

    fn generate(&self, original: &[u8]) -> Result<Derived, GenerateError>;
}

/// Fits images inside `width x height`, preserving aspect ratio, as JPEG.
#[derive(Debug, Clone, Copy)]
pub struct ThumbnailGenerator {
    width: u32,
    height: u32,
}

impl ThumbnailGenerator {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
        }
    }
}

impl DerivativeGenerator for ThumbnailGenerator {
    fn kind(&self) -> DerivativeKind {
        DerivativeKind::Thumbnail
    }

    fn supports(&self, content_type: &str) -> bool {
        let essence = content_type.split(';').next().unwrap_or_default().trim();
        matches!(
            ImageFormat::from_mime_type(essence),
            Some(ImageFormat::Jpeg | ImageFormat::Png | ImageFormat::WebP)
        )
    }

    fn artifact_key(&self, event: &UploadEvent) -> String {
        format!("thumbnails/{}.jpg", event.record_id)
    }

    fn generate(&self, original: &[u8]) -> Result<Derived, GenerateError> {
        let image = image::load_from_memory(original).map_err(|e| GenerateError::Decode(e.to_string()))?;
        let thumbnail = DynamicImage::ImageRgb8(image.thumbnail(self.width, self.height).to_rgb8());

        let mut out = Cursor::new(Vec::new());
        thumbnail
            .write_to(&mut out, ImageFormat::Jpeg)
            .map_err(|e| GenerateError::Encode(e.to_string()))?;

        Ok(Derived {
            bytes: out.into_inner(),
            content_type: "image/jpeg".to_string(),
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GenerateError {
    #[error("could not decode original: {0}")]
    Decode(String),

    #[error("could not encode derivative: {0}")]
    Encode(String),
}
