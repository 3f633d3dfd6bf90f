//! Screenshot payload compressor.
//!
//! One pass: decode the data URL, shrink so the longest side is at most
//! [`MAX_DIMENSION`] pixels, re-encode as JPEG at [`JPEG_QUALITY`]. Dropping
//! the payload when even that does not fit is the caller's decision.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use bugtrail_core::BugtrailError;
use bugtrail_core::session::DataUrl;
use image::DynamicImage;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use thiserror::Error;

pub const MAX_DIMENSION: u32 = 1200;
pub const JPEG_QUALITY: u8 = 70;
const OUTPUT_MIME: &str = "image/jpeg";

#[derive(Debug, Error)]
pub enum CompressError {
    #[error("screenshot is not a base64 data URL")]
    NotADataUrl,

    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("image processing failed: {0}")]
    Image(#[from] image::ImageError),
}

impl From<CompressError> for BugtrailError {
    fn from(err: CompressError) -> Self {
        BugtrailError::decode(err.to_string())
    }
}

/// Result of one compression pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressedImage {
    pub data_url: String,
    pub width: u32,
    pub height: u32,
    /// Length of the input data URL
    pub original_len: usize,
    /// Length of the output data URL
    pub compressed_len: usize,
}

/// Stateless JPEG recompressor. CPU-bound; run it off the async executor.
#[derive(Debug, Clone, Copy)]
pub struct PayloadCompressor {
    max_dimension: u32,
    quality: u8,
}

impl Default for PayloadCompressor {
    fn default() -> Self {
        Self {
            max_dimension: MAX_DIMENSION,
            quality: JPEG_QUALITY,
        }
    }
}

impl PayloadCompressor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn compress(&self, data_url: &str) -> Result<CompressedImage, CompressError> {
        let parsed = DataUrl::parse(data_url).ok_or(CompressError::NotADataUrl)?;
        let bytes = STANDARD.decode(parsed.base64_payload.trim())?;

        let mut img = image::load_from_memory(&bytes)?;
        if img.width().max(img.height()) > self.max_dimension {
            // Fits within the box, keeping the aspect ratio
            img = img.resize(self.max_dimension, self.max_dimension, FilterType::Triangle);
        }

        // JPEG carries no alpha channel
        let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
        let mut jpeg = Vec::new();
        rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut jpeg, self.quality))?;

        let out = DataUrl::format(OUTPUT_MIME, &STANDARD.encode(&jpeg));
        tracing::debug!(
            "[PayloadCompressor] {}x{} screenshot: {} -> {} bytes",
            rgb.width(),
            rgb.height(),
            data_url.len(),
            out.len()
        );

        Ok(CompressedImage {
            width: rgb.width(),
            height: rgb.height(),
            original_len: data_url.len(),
            compressed_len: out.len(),
            data_url: out,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgba, RgbaImage};
    use std::io::Cursor;

    fn png_data_url(width: u32, height: u32) -> String {
        let img = RgbaImage::from_fn(width, height, |x, y| {
            Rgba([(x % 256) as u8, (y % 256) as u8, ((x ^ y) % 256) as u8, 255])
        });
        let mut bytes = Vec::new();
        DynamicImage::ImageRgba8(img)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        DataUrl::format("image/png", &STANDARD.encode(&bytes))
    }

    #[test]
    fn test_large_image_is_resized_proportionally() {
        let result = PayloadCompressor::new()
            .compress(&png_data_url(2400, 1200))
            .unwrap();

        assert_eq!((result.width, result.height), (1200, 600));
        assert!(result.data_url.starts_with("data:image/jpeg;base64,"));
        assert_eq!(result.compressed_len, result.data_url.len());
    }

    #[test]
    fn test_small_image_keeps_dimensions() {
        let result = PayloadCompressor::new().compress(&png_data_url(300, 200)).unwrap();
        assert_eq!((result.width, result.height), (300, 200));
    }

    #[test]
    fn test_rejects_non_data_urls() {
        let compressor = PayloadCompressor::new();
        assert!(matches!(
            compressor.compress("https://cdn.example.com/shot.png"),
            Err(CompressError::NotADataUrl)
        ));
        assert!(matches!(
            compressor.compress("data:image/png;base64,@@@"),
            Err(CompressError::Base64(_))
        ));
        assert!(matches!(
            compressor.compress(&DataUrl::format("image/png", &STANDARD.encode(b"not an image"))),
            Err(CompressError::Image(_))
        ));
    }
}
