//! Captured frames and their upload encoding.
//!
//! - `Frame`: packed RGB24 pixels with validated dimensions.
//! - `encode_jpeg`: the only encoding path to the uploader.
//! - `upload_file_name`: `<prefix><epoch seconds>.<micros>.jpg`.

use anyhow::{anyhow, Context, Result};
use image::codecs::jpeg::JpegEncoder;
use std::time::{Duration, Instant};

/// Default JPEG quality for uploads.
pub const DEFAULT_JPEG_QUALITY: u8 = 70;

/// Default upload file name prefix.
pub const DEFAULT_NAME_PREFIX: &str = "cat_";

/// A single RGB24 camera frame.
pub struct Frame {
    pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Monotonic capture instant.
    pub captured_at: Instant,
}

impl Frame {
    /// Wrap packed RGB24 pixels. The buffer must hold exactly `width * height * 3` bytes.
    pub fn new(pixels: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(anyhow!(
                "frame dimensions must be non-zero ({}x{})",
                width,
                height
            ));
        }
        let expected = rgb_len(width, height)?;
        if pixels.len() != expected {
            return Err(anyhow!(
                "RGB frame length mismatch: expected {}, got {}",
                expected,
                pixels.len()
            ));
        }
        Ok(Self {
            pixels,
            width,
            height,
            captured_at: Instant::now(),
        })
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn len_bytes(&self) -> usize {
        self.pixels.len()
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.pixels.len())
            .finish()
    }
}

pub(crate) fn rgb_len(width: u32, height: u32) -> Result<usize> {
    width
        .checked_mul(height)
        .and_then(|v| v.checked_mul(3))
        .map(|v| v as usize)
        .ok_or_else(|| anyhow!("RGB frame dimensions overflow"))
}

/// Encode a frame as baseline JPEG at the given quality (1-100).
pub fn encode_jpeg(frame: &Frame, quality: u8) -> Result<Vec<u8>> {
    if !(1..=100).contains(&quality) {
        return Err(anyhow!(
            "jpeg quality must be within 1..=100 (got {})",
            quality
        ));
    }
    let mut out = Vec::with_capacity(frame.len_bytes() / 8);
    let mut encoder = JpegEncoder::new_with_quality(&mut out, quality);
    encoder
        .encode(
            frame.pixels(),
            frame.width,
            frame.height,
            image::ExtendedColorType::Rgb8,
        )
        .context("encode jpeg")?;
    Ok(out)
}

/// Build the upload file name for a frame captured at `at` (offset from the UNIX epoch).
pub fn upload_file_name(prefix: &str, at: Duration) -> String {
    format!("{}{}.{:06}.jpg", prefix, at.as_secs(), at.subsec_micros())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::GenericImageView;

    fn gradient(width: u32, height: u32) -> Frame {
        let mut pixels = Vec::with_capacity((width * height * 3) as usize);
        for y in 0..height {
            for x in 0..width {
                pixels.push((x % 256) as u8);
                pixels.push((y % 256) as u8);
                pixels.push(((x + y) % 256) as u8);
            }
        }
        Frame::new(pixels, width, height).expect("frame")
    }

    #[test]
    fn frame_rejects_wrong_length() {
        assert!(Frame::new(vec![0u8; 10], 2, 2).is_err());
        assert!(Frame::new(Vec::new(), 0, 0).is_err());
        assert!(Frame::new(vec![0u8; 12], 2, 2).is_ok());
    }

    #[test]
    fn jpeg_has_markers_and_dimensions() -> Result<()> {
        let frame = gradient(640, 480);
        let jpeg = encode_jpeg(&frame, DEFAULT_JPEG_QUALITY)?;

        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        assert_eq!(&jpeg[jpeg.len() - 2..], &[0xFF, 0xD9]);
        assert!(jpeg.len() < frame.len_bytes());

        let decoded = image::load_from_memory(&jpeg)?;
        assert_eq!(decoded.dimensions(), (640, 480));
        Ok(())
    }

    #[test]
    fn lower_quality_yields_smaller_output() -> Result<()> {
        let frame = gradient(320, 240);
        let low = encode_jpeg(&frame, 10)?;
        let high = encode_jpeg(&frame, 95)?;
        assert!(low.len() < high.len());
        Ok(())
    }

    #[test]
    fn jpeg_quality_out_of_range_is_rejected() {
        let frame = gradient(8, 8);
        assert!(encode_jpeg(&frame, 0).is_err());
        assert!(encode_jpeg(&frame, 101).is_err());
    }

    #[test]
    fn file_name_has_prefix_fraction_and_suffix() {
        let at = Duration::from_micros(1_697_712_345_123_456);
        assert_eq!(
            upload_file_name(DEFAULT_NAME_PREFIX, at),
            "cat_1697712345.123456.jpg"
        );
        assert_eq!(
            upload_file_name("dog_", Duration::from_secs(5)),
            "dog_5.000000.jpg"
        );
    }
}
