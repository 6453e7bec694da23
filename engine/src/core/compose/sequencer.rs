//! Frame Sequencer
//!
//! Expands the original and generated images into the ordered list of frame
//! files the encoder consumes.
//!
//! - Base sequence: the original (when included) followed by the generated
//!   images in caller order. Missing or undecodable sources are skipped.
//! - An empty base sequence falls back to the original alone.
//! - The base sequence is repeated `image_multiplier` times.
//! - Every frame is letterboxed onto a black `width x height` canvas and
//!   written as `frame_NNNN.jpg`.

use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageReader, Rgb, RgbImage};
use serde::Serialize;
use tracing::{error, info, warn};

use super::VideoConfig;
use crate::core::tasks::EventSink;
use crate::core::{CoreError, CoreResult, Size2D};

/// JPEG quality of written frames
pub const FRAME_JPEG_QUALITY: u8 = 95;

/// Pause between writing a frame and checking it on disk
const FRAME_SETTLE_DELAY: Duration = Duration::from_millis(50);

/// One frame of the output sequence
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameSpec {
    pub source_path: PathBuf,
    pub cycle_index: usize,
    pub position_in_cycle: usize,
    pub output_path: PathBuf,
}

/// `frame_0000.jpg`, `frame_0001.jpg`, ...
pub fn frame_file_name(index: usize) -> String {
    format!("frame_{index:04}.jpg")
}

/// Writes the full frame sequence into `frames_dir`.
///
/// Fails with [`CoreError::NoUsableFrames`] when neither the inputs nor the
/// original can be used, and with [`CoreError::FrameWriteFailure`] as soon as
/// any frame cannot be written.
pub async fn build_sequence(
    original: &Path,
    generated: &[PathBuf],
    config: &VideoConfig,
    frames_dir: &Path,
    sink: &EventSink,
) -> CoreResult<Vec<FrameSpec>> {
    let size = config.size();

    let mut candidates = Vec::with_capacity(generated.len() + 1);
    if config.include_original {
        candidates.push(original.to_path_buf());
    }
    candidates.extend(generated.iter().cloned());

    let mut base: Vec<(PathBuf, Arc<Vec<u8>>)> = Vec::with_capacity(candidates.len());
    for path in candidates {
        match render_canvas(&path, size).await {
            Ok(jpeg) => base.push((path, Arc::new(jpeg))),
            Err(reason) => warn!("Skipping frame source {}: {}", path.display(), reason),
        }
    }

    if base.is_empty() {
        warn!(
            original = %original.display(),
            "No usable frame sources, falling back to the original image"
        );
        match render_canvas(original, size).await {
            Ok(jpeg) => base.push((original.to_path_buf(), Arc::new(jpeg))),
            Err(reason) => {
                error!("Original image unusable as fallback frame: {}", reason);
                return Err(CoreError::NoUsableFrames);
            }
        }
    }

    tokio::fs::create_dir_all(frames_dir)
        .await
        .map_err(|e| CoreError::FrameWriteFailure(format!("{}: {e}", frames_dir.display())))?;

    let cycles = config.image_multiplier.max(1) as usize;
    let total = base.len() * cycles;
    let mut frames = Vec::with_capacity(total);

    for cycle_index in 0..cycles {
        for (position_in_cycle, (source, jpeg)) in base.iter().enumerate() {
            let output_path = frames_dir.join(frame_file_name(frames.len()));
            write_frame(&output_path, Arc::clone(jpeg)).await?;
            frames.push(FrameSpec {
                source_path: source.clone(),
                cycle_index,
                position_in_cycle,
                output_path,
            });
            sink.progress(
                frames.len() as f64 / total as f64 * 100.0,
                &format!("Prepared frame {}/{}", frames.len(), total),
            );
        }
    }

    info!(
        frames = frames.len(),
        base = base.len(),
        cycles,
        size = %size,
        "Frame sequence ready"
    );
    Ok(frames)
}

/// Decodes `path` and returns the letterboxed canvas as JPEG bytes
async fn render_canvas(path: &Path, size: Size2D) -> Result<Vec<u8>, String> {
    if !path.is_file() {
        return Err("file not found".to_string());
    }
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let decoded = ImageReader::open(&path)
            .map_err(|e| e.to_string())?
            .with_guessed_format()
            .map_err(|e| e.to_string())?
            .decode()
            .map_err(|e| e.to_string())?;
        let canvas = letterbox(&decoded, size);

        let mut buf = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(canvas)
            .write_with_encoder(JpegEncoder::new_with_quality(&mut buf, FRAME_JPEG_QUALITY))
            .map_err(|e| e.to_string())?;
        Ok(buf.into_inner())
    })
    .await
    .map_err(|e| format!("render task failed: {e}"))?
}

/// Scales `image` to fit inside `size` and centers it on black
pub(crate) fn letterbox(image: &DynamicImage, size: Size2D) -> RgbImage {
    let source = Size2D::new(image.width(), image.height());
    let fitted = source.fit_within(size);
    let scaled = image
        .resize_exact(fitted.width, fitted.height, FilterType::Lanczos3)
        .to_rgb8();

    let mut canvas = RgbImage::from_pixel(size.width, size.height, Rgb([0, 0, 0]));
    let x = (size.width - fitted.width) / 2;
    let y = (size.height - fitted.height) / 2;
    imageops::overlay(&mut canvas, &scaled, i64::from(x), i64::from(y));
    canvas
}

async fn write_frame(path: &Path, jpeg: Arc<Vec<u8>>) -> CoreResult<()> {
    let target = path.to_path_buf();
    tokio::task::spawn_blocking(move || -> std::io::Result<()> {
        let mut file = std::fs::File::create(&target)?;
        file.write_all(&jpeg)?;
        file.sync_all()
    })
    .await
    .map_err(|e| CoreError::FrameWriteFailure(format!("{}: {e}", path.display())))?
    .map_err(|e| CoreError::FrameWriteFailure(format!("{}: {e}", path.display())))?;

    tokio::time::sleep(FRAME_SETTLE_DELAY).await;

    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.len() > 0 => Ok(()),
        Ok(_) => Err(CoreError::FrameWriteFailure(format!(
            "{} is empty after writing",
            path.display()
        ))),
        Err(e) => Err(CoreError::FrameWriteFailure(format!(
            "{} missing after writing: {e}",
            path.display()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_image(dir: &Path, name: &str, width: u32, height: u32, color: [u8; 3]) -> PathBuf {
        let path = dir.join(name);
        RgbImage::from_pixel(width, height, Rgb(color))
            .save(&path)
            .unwrap();
        path
    }

    fn small_config() -> VideoConfig {
        VideoConfig {
            width: 64,
            height: 48,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_cycles_start_with_original() {
        let dir = TempDir::new().unwrap();
        let original = write_image(dir.path(), "original.png", 40, 30, [255, 255, 255]);
        let generated: Vec<PathBuf> = (0..3)
            .map(|i| write_image(dir.path(), &format!("style_{i}.png"), 30, 40, [200, 0, 0]))
            .collect();
        let config = VideoConfig {
            image_multiplier: 2,
            ..small_config()
        };
        let frames_dir = dir.path().join("frames");

        let frames = build_sequence(
            &original,
            &generated,
            &config,
            &frames_dir,
            &EventSink::disconnected(),
        )
        .await
        .unwrap();

        assert_eq!(frames.len(), 8);
        assert_eq!(frames[0].source_path, original);
        assert_eq!(frames[4].source_path, original);
        assert_eq!(frames[1].source_path, generated[0]);
        assert_eq!(frames[7].source_path, generated[2]);
        assert_eq!(frames[5].cycle_index, 1);
        assert_eq!(frames[5].position_in_cycle, 1);
        for (index, frame) in frames.iter().enumerate() {
            assert_eq!(frame.output_path, frames_dir.join(frame_file_name(index)));
            let written = image::open(&frame.output_path).unwrap();
            assert_eq!((written.width(), written.height()), (64, 48));
        }
    }

    #[tokio::test]
    async fn test_unusable_generated_images_are_skipped() {
        let dir = TempDir::new().unwrap();
        let original = write_image(dir.path(), "original.png", 40, 30, [255, 255, 255]);
        let good = write_image(dir.path(), "good.png", 40, 30, [0, 0, 255]);
        let broken = dir.path().join("broken.png");
        std::fs::write(&broken, b"not an image").unwrap();
        let missing = dir.path().join("missing.png");

        let config = VideoConfig {
            include_original: false,
            ..small_config()
        };
        let frames = build_sequence(
            &original,
            &[missing, broken, good.clone()],
            &config,
            &dir.path().join("frames"),
            &EventSink::disconnected(),
        )
        .await
        .unwrap();

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].source_path, good);
    }

    #[tokio::test]
    async fn test_empty_sequence_falls_back_to_original() {
        let dir = TempDir::new().unwrap();
        let original = write_image(dir.path(), "original.png", 40, 30, [255, 255, 255]);
        let config = VideoConfig {
            include_original: false,
            image_multiplier: 3,
            ..small_config()
        };
        let frames = build_sequence(
            &original,
            &[dir.path().join("gone.png")],
            &config,
            &dir.path().join("frames"),
            &EventSink::disconnected(),
        )
        .await
        .unwrap();

        assert_eq!(frames.len(), 3);
        assert!(frames.iter().all(|f| f.source_path == original));
    }

    #[tokio::test]
    async fn test_no_usable_frames() {
        let dir = TempDir::new().unwrap();
        let result = build_sequence(
            &dir.path().join("original.png"),
            &[dir.path().join("gone.png")],
            &small_config(),
            &dir.path().join("frames"),
            &EventSink::disconnected(),
        )
        .await;
        assert!(matches!(result, Err(CoreError::NoUsableFrames)));
    }

    #[tokio::test]
    async fn test_progress_reported_per_frame() {
        let dir = TempDir::new().unwrap();
        let original = write_image(dir.path(), "original.png", 40, 30, [255, 255, 255]);
        let (sink, mut rx) = crate::core::tasks::event_channel(64);
        build_sequence(
            &original,
            &[],
            &VideoConfig {
                image_multiplier: 2,
                ..small_config()
            },
            &dir.path().join("frames"),
            &sink.window(10.0, 40.0),
        )
        .await
        .unwrap();
        assert_eq!(sink.current().await, 40.0);
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn test_letterbox_centers_wide_image() {
        let wide = DynamicImage::ImageRgb8(RgbImage::from_pixel(100, 50, Rgb([255, 0, 0])));
        let canvas = letterbox(&wide, Size2D::new(64, 64));
        assert_eq!(canvas.dimensions(), (64, 64));
        // 100x50 fits as 64x32, padded by 16 rows above and below
        assert_eq!(canvas.get_pixel(32, 2), &Rgb([0, 0, 0]));
        assert_eq!(canvas.get_pixel(32, 61), &Rgb([0, 0, 0]));
        let center = canvas.get_pixel(32, 32);
        assert!(center[0] > 200 && center[1] < 50);
    }

    #[test]
    fn test_letterbox_tall_image_pads_sides() {
        let tall = DynamicImage::ImageRgb8(RgbImage::from_pixel(30, 60, Rgb([0, 255, 0])));
        let canvas = letterbox(&tall, Size2D::new(80, 40));
        assert_eq!(canvas.get_pixel(2, 20), &Rgb([0, 0, 0]));
        assert_eq!(canvas.get_pixel(77, 20), &Rgb([0, 0, 0]));
        assert!(canvas.get_pixel(40, 20)[1] > 200);
    }
}
