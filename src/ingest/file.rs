//! Local video file source.
//!
//! `FileSource` reads a finite, fully available video file:
//! - `stub://<name>` paths produce a synthetic clip (tests, demos)
//! - other local paths are decoded with FFmpeg (`ingest-file-ffmpeg`)
//!
//! Remote URLs are refused; uploads are written to a local file first.

use std::path::Path;

use anyhow::{anyhow, Result};

use super::{synthetic_pixels, FrameSource};
#[cfg(feature = "ingest-file-ffmpeg")]
use super::file_ffmpeg::FfmpegFileSource;
use crate::frame::Frame;

const SYNTHETIC_WIDTH: u32 = 160;
const SYNTHETIC_HEIGHT: u32 = 120;

/// Configuration for a local file source.
#[derive(Clone, Debug)]
pub struct FileConfig {
    /// Local file path (e.g., "uploads/pen3.mp4") or `stub://name`.
    pub path: String,
    /// Clip length for `stub://` paths.
    pub synthetic_frames: u64,
}

impl FileConfig {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            path: String::new(),
            synthetic_frames: 120,
        }
    }
}

/// Local file frame source.
pub struct FileSource {
    backend: FileBackend,
}

enum FileBackend {
    Synthetic(SyntheticFileSource),
    #[cfg(feature = "ingest-file-ffmpeg")]
    Ffmpeg(FfmpegFileSource),
}

impl FileSource {
    pub fn new(config: FileConfig) -> Result<Self> {
        if !is_local_file_path(&config.path) {
            return Err(anyhow!(
                "video ingestion only supports local paths (no URL schemes): '{}'",
                config.path
            ));
        }
        if config.path.starts_with("stub://") {
            return Ok(Self {
                backend: FileBackend::Synthetic(SyntheticFileSource::new(config)),
            });
        }
        if !Path::new(&config.path).is_file() {
            return Err(anyhow!("video file '{}' not found", config.path));
        }
        #[cfg(feature = "ingest-file-ffmpeg")]
        {
            Ok(Self {
                backend: FileBackend::Ffmpeg(FfmpegFileSource::new(config)?),
            })
        }
        #[cfg(not(feature = "ingest-file-ffmpeg"))]
        {
            Err(anyhow!(
                "video decoding requires the ingest-file-ffmpeg feature"
            ))
        }
    }

    /// Get frame statistics.
    pub fn stats(&self) -> FileStats {
        match &self.backend {
            FileBackend::Synthetic(source) => source.stats(),
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.stats(),
        }
    }
}

impl FrameSource for FileSource {
    fn connect(&mut self) -> Result<()> {
        match &mut self.backend {
            FileBackend::Synthetic(source) => source.connect(),
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.connect(),
        }
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        match &mut self.backend {
            FileBackend::Synthetic(source) => source.next_frame(),
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.next_frame(),
        }
    }

    fn describe(&self) -> String {
        format!("file:{}", self.stats().path)
    }
}

/// Statistics for a file source.
#[derive(Clone, Debug)]
pub struct FileStats {
    pub frames_decoded: u64,
    pub path: String,
}

// ----------------------------------------------------------------------------
// Synthetic source (stub://) for tests
// ----------------------------------------------------------------------------

struct SyntheticFileSource {
    config: FileConfig,
    frame_count: u64,
}

impl SyntheticFileSource {
    fn new(config: FileConfig) -> Self {
        Self {
            config,
            frame_count: 0,
        }
    }

    fn connect(&mut self) -> Result<()> {
        log::info!("FileSource: opened {} (synthetic)", self.config.path);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.frame_count >= self.config.synthetic_frames {
            return Ok(None);
        }
        self.frame_count += 1;
        let pixels = synthetic_pixels(SYNTHETIC_WIDTH, SYNTHETIC_HEIGHT, self.frame_count);
        Frame::from_rgb(pixels, SYNTHETIC_WIDTH, SYNTHETIC_HEIGHT, self.frame_count).map(Some)
    }

    fn stats(&self) -> FileStats {
        FileStats {
            frames_decoded: self.frame_count,
            path: self.config.path.clone(),
        }
    }
}

fn is_local_file_path(path: &str) -> bool {
    if path.trim().is_empty() {
        return false;
    }
    if path.starts_with("stub://") {
        return true;
    }
    !path.contains("://")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthetic_clip_ends_after_configured_frames() -> Result<()> {
        let mut source = FileSource::new(FileConfig {
            path: "stub://pen".to_string(),
            synthetic_frames: 3,
        })?;
        source.connect()?;
        let mut indices = Vec::new();
        while let Some(frame) = source.next_frame()? {
            assert_eq!((frame.width(), frame.height()), (SYNTHETIC_WIDTH, SYNTHETIC_HEIGHT));
            indices.push(frame.index);
        }
        assert_eq!(indices, vec![1, 2, 3]);
        assert_eq!(source.stats().frames_decoded, 3);
        Ok(())
    }

    #[test]
    fn remote_and_missing_paths_are_rejected() {
        assert!(FileSource::new(FileConfig::new("rtsp://camera/stream")).is_err());
        assert!(FileSource::new(FileConfig::new("")).is_err());
        let err = FileSource::new(FileConfig::new("/definitely/not/here.mp4"))
            .err()
            .expect("missing file");
        assert!(err.to_string().contains("not found"));
    }
}
