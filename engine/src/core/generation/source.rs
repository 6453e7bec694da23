//! Source image preparation.
//!
//! The source photo is decoded and re-encoded once per task; every style
//! request reuses the same payload.

use std::io::Cursor;
use std::path::Path;

use base64::Engine as _;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageReader};
use tracing::debug;

use crate::core::{CoreError, CoreResult, Size2D};

/// Longest edge sent to the provider
pub const MAX_SOURCE_DIMENSION: u32 = 2048;

/// JPEG quality of the provider payload
const SOURCE_JPEG_QUALITY: u8 = 85;

/// Source image ready to inline into a provider request
#[derive(Clone)]
pub struct EncodedSource {
    /// `data:image/jpeg;base64,...`
    pub data_url: String,
    pub size: Size2D,
}

impl std::fmt::Debug for EncodedSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncodedSource")
            .field("size", &self.size)
            .field("data_url_len", &self.data_url.len())
            .finish()
    }
}

/// Decode, shrink to fit 2048x2048, convert to RGB and JPEG-encode.
///
/// Any failure is [`CoreError::SourceImageInvalid`].
pub async fn encode_source_image(path: &Path) -> CoreResult<EncodedSource> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || encode_blocking(&path))
        .await
        .map_err(|e| CoreError::Internal(format!("source encoding task failed: {e}")))?
}

fn encode_blocking(path: &Path) -> CoreResult<EncodedSource> {
    let invalid = |detail: String| CoreError::SourceImageInvalid(format!("{}: {detail}", path.display()));

    let decoded = ImageReader::open(path)
        .map_err(|e| invalid(e.to_string()))?
        .with_guessed_format()
        .map_err(|e| invalid(e.to_string()))?
        .decode()
        .map_err(|e| invalid(e.to_string()))?;

    let resized = if decoded.width() > MAX_SOURCE_DIMENSION || decoded.height() > MAX_SOURCE_DIMENSION {
        decoded.resize(MAX_SOURCE_DIMENSION, MAX_SOURCE_DIMENSION, FilterType::Lanczos3)
    } else {
        decoded
    };
    let rgb = DynamicImage::ImageRgb8(resized.to_rgb8());

    let mut buf = Cursor::new(Vec::new());
    rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut buf, SOURCE_JPEG_QUALITY))
        .map_err(|e| invalid(e.to_string()))?;
    let bytes = buf.into_inner();

    debug!(
        width = rgb.width(),
        height = rgb.height(),
        bytes = bytes.len(),
        "Encoded source image"
    );

    Ok(EncodedSource {
        data_url: format!(
            "data:image/jpeg;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(&bytes)
        ),
        size: Size2D::new(rgb.width(), rgb.height()),
    })
}
