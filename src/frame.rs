//! In-memory frames.
//!
//! - `Frame`: packed RGB24 pixels plus dimensions and the 1-based position of
//!   the frame within its source.
//!
//! Sources (`ingest`) produce frames; detectors, the sighting pipeline and the
//! motion classifier consume them. Frames never touch disk.

use anyhow::{anyhow, bail, Context, Result};
use image::{imageops, GrayImage, RgbImage};

use crate::detect::BoundingBox;

/// One decoded RGB frame.
#[derive(Clone, Debug)]
pub struct Frame {
    image: RgbImage,
    /// Position within the producing source, starting at 1.
    pub index: u64,
}

impl Frame {
    /// Wrap a packed RGB24 buffer.
    pub fn from_rgb(pixels: Vec<u8>, width: u32, height: u32, index: u64) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if pixels.len() != expected {
            return Err(anyhow!(
                "expected {} RGB bytes, received {}",
                expected,
                pixels.len()
            ));
        }
        let image = RgbImage::from_raw(width, height, pixels)
            .ok_or_else(|| anyhow!("RGB buffer does not match {}x{}", width, height))?;
        Ok(Self { image, index })
    }

    pub fn from_image(image: RgbImage, index: u64) -> Self {
        Self { image, index }
    }

    /// Decode an uploaded still image (JPEG or PNG).
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() {
            bail!("image upload is empty");
        }
        let decoded = image::load_from_memory(bytes).context("decode uploaded image")?;
        Ok(Self::from_image(decoded.to_rgb8(), 1))
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn pixels(&self) -> &[u8] {
        self.image.as_raw()
    }

    pub fn as_image(&self) -> &RgbImage {
        &self.image
    }

    /// Single-channel intensity copy used for motion scoring.
    pub fn to_luma(&self) -> GrayImage {
        imageops::grayscale(&self.image)
    }

    /// Cut the region bounded by `bbox` out of this frame.
    ///
    /// Box corners are truncated to whole pixels and clamped to the frame.
    /// Returns `None` for a zero-area region; callers skip those detections.
    pub fn crop(&self, bbox: &BoundingBox) -> Option<RgbImage> {
        let clamp = |v: f32, max: u32| -> u32 { (v as i64).clamp(0, max as i64) as u32 };
        let x1 = clamp(bbox.x1, self.width());
        let y1 = clamp(bbox.y1, self.height());
        let x2 = clamp(bbox.x2, self.width());
        let y2 = clamp(bbox.y2, self.height());
        if x2 <= x1 || y2 <= y1 {
            return None;
        }
        Some(imageops::crop_imm(&self.image, x1, y1, x2 - x1, y2 - y1).to_image())
    }
}
