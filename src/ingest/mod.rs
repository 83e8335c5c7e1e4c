//! Frame ingestion sources.
//!
//! - In-memory frame lists (uploads already decoded, tests)
//! - Local video files (`stub://` synthetic, or FFmpeg with `ingest-file-ffmpeg`)
//! - Live cameras (`stub://` synthetic, or V4L2 with `ingest-v4l2`)
//!
//! Sources decode in memory and hand frames to the caller one at a time.
//! `Ok(None)` marks the end of a finite source; errors mean the source could
//! not produce a frame.

pub mod camera;
pub mod file;
#[cfg(feature = "ingest-file-ffmpeg")]
pub(crate) mod file_ffmpeg;
pub mod memory;
#[cfg_attr(not(feature = "ingest-v4l2"), allow(dead_code))]
mod normalize;

use anyhow::Result;

use crate::frame::Frame;

pub use camera::{CameraConfig, CameraSource};
pub use file::{FileConfig, FileSource};
pub use memory::MemorySource;

pub trait FrameSource {
    /// Open the underlying device or file.
    fn connect(&mut self) -> Result<()> {
        Ok(())
    }

    /// Next frame, or `None` when a finite source is exhausted.
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    /// Human-readable source name for logs.
    fn describe(&self) -> String;
}

/// Synthetic RGB pattern shared by the `stub://` sources.
///
/// The pattern drifts by one level per frame and jumps every 50 frames,
/// which gives the motion classifier a non-trivial score.
pub(crate) fn synthetic_pixels(width: u32, height: u32, frame_count: u64) -> Vec<u8> {
    let scene = frame_count / 50;
    let pixel_count = (width as usize) * (height as usize) * 3;
    let mut pixels = vec![0u8; pixel_count];
    for (i, pixel) in pixels.iter_mut().enumerate() {
        *pixel = ((i as u64 / 3 + frame_count + scene * 37) % 256) as u8;
    }
    pixels
}
