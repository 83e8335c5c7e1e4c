//! Live camera source.
//!
//! `CameraSource` reads frames from a local camera:
//! - `stub://<name>` devices produce an endless synthetic feed
//! - device nodes (e.g., /dev/video0) use V4L2 (`ingest-v4l2`)
//!
//! Frames are converted to RGB24 in memory and never written to disk.

use anyhow::{anyhow, Result};
#[cfg(feature = "ingest-v4l2")]
use anyhow::Context;
#[cfg(feature = "ingest-v4l2")]
use ouroboros::self_referencing;

use super::{synthetic_pixels, FrameSource};
use crate::frame::Frame;

/// Configuration for a camera source.
#[derive(Clone, Debug)]
pub struct CameraConfig {
    /// Device path (e.g., "/dev/video0") or `stub://name`.
    pub device: String,
    /// Requested frame rate; 0 leaves the driver default.
    pub target_fps: u32,
    /// Preferred frame width.
    pub width: u32,
    /// Preferred frame height.
    pub height: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: "/dev/video0".to_string(),
            target_fps: 10,
            width: 640,
            height: 480,
        }
    }
}

pub struct CameraSource {
    backend: CameraBackend,
}

enum CameraBackend {
    Synthetic(SyntheticCamera),
    #[cfg(feature = "ingest-v4l2")]
    Device(DeviceCamera),
}

impl CameraSource {
    pub fn new(config: CameraConfig) -> Result<Self> {
        if config.width == 0 || config.height == 0 {
            return Err(anyhow!(
                "camera resolution must be non-zero (got {}x{})",
                config.width,
                config.height
            ));
        }
        if config.device.starts_with("stub://") {
            return Ok(Self {
                backend: CameraBackend::Synthetic(SyntheticCamera::new(config)),
            });
        }
        #[cfg(feature = "ingest-v4l2")]
        {
            Ok(Self {
                backend: CameraBackend::Device(DeviceCamera::new(config)),
            })
        }
        #[cfg(not(feature = "ingest-v4l2"))]
        {
            Err(anyhow!(
                "camera '{}' requires the ingest-v4l2 feature",
                config.device
            ))
        }
    }

    pub fn frames_captured(&self) -> u64 {
        match &self.backend {
            CameraBackend::Synthetic(source) => source.frame_count,
            #[cfg(feature = "ingest-v4l2")]
            CameraBackend::Device(source) => source.frame_count,
        }
    }

    fn device(&self) -> &str {
        match &self.backend {
            CameraBackend::Synthetic(source) => &source.config.device,
            #[cfg(feature = "ingest-v4l2")]
            CameraBackend::Device(source) => &source.config.device,
        }
    }
}

impl FrameSource for CameraSource {
    fn connect(&mut self) -> Result<()> {
        match &mut self.backend {
            CameraBackend::Synthetic(source) => {
                log::info!("CameraSource: connected to {} (synthetic)", source.config.device);
                Ok(())
            }
            #[cfg(feature = "ingest-v4l2")]
            CameraBackend::Device(source) => source.connect(),
        }
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        match &mut self.backend {
            CameraBackend::Synthetic(source) => source.next_frame().map(Some),
            #[cfg(feature = "ingest-v4l2")]
            CameraBackend::Device(source) => source.next_frame().map(Some),
        }
    }

    fn describe(&self) -> String {
        format!("camera:{}", self.device())
    }
}

struct SyntheticCamera {
    config: CameraConfig,
    frame_count: u64,
}

impl SyntheticCamera {
    fn new(config: CameraConfig) -> Self {
        Self {
            config,
            frame_count: 0,
        }
    }

    fn next_frame(&mut self) -> Result<Frame> {
        self.frame_count += 1;
        let pixels = synthetic_pixels(self.config.width, self.config.height, self.frame_count);
        Frame::from_rgb(pixels, self.config.width, self.config.height, self.frame_count)
    }
}

// ----------------------------------------------------------------------------
// V4L2 device
// ----------------------------------------------------------------------------

#[cfg(feature = "ingest-v4l2")]
struct DeviceCamera {
    config: CameraConfig,
    state: Option<DeviceState>,
    format: super::normalize::PixelFormat,
    frame_count: u64,
    active_width: u32,
    active_height: u32,
}

#[cfg(feature = "ingest-v4l2")]
#[self_referencing]
struct DeviceState {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

#[cfg(feature = "ingest-v4l2")]
impl DeviceCamera {
    fn new(config: CameraConfig) -> Self {
        Self {
            active_width: config.width,
            active_height: config.height,
            config,
            state: None,
            format: super::normalize::PixelFormat::Rgb24,
            frame_count: 0,
        }
    }

    fn connect(&mut self) -> Result<()> {
        use super::normalize::PixelFormat;
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let device = v4l::Device::with_path(&self.config.device)
            .with_context(|| format!("open camera {}", self.config.device))?;
        let mut format = device.format().context("read v4l2 format")?;
        format.width = self.config.width;
        format.height = self.config.height;
        format.fourcc = v4l::FourCC::new(b"RGB3");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!(
                    "CameraSource: failed to set format on {}: {}",
                    self.config.device,
                    err
                );
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };
        self.format = PixelFormat::from_fourcc(&format.fourcc.repr).ok_or_else(|| {
            anyhow!(
                "camera {} delivers unsupported pixel format {}",
                self.config.device,
                format.fourcc
            )
        })?;

        if self.config.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(self.config.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!(
                    "CameraSource: failed to set fps on {}: {}",
                    self.config.device,
                    err
                );
            }
        }

        self.active_width = format.width;
        self.active_height = format.height;

        let state = DeviceStateBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()?;
        self.state = Some(state);

        log::info!(
            "CameraSource: connected to {} ({}x{} {:?})",
            self.config.device,
            self.active_width,
            self.active_height,
            self.format
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame> {
        use v4l::io::traits::CaptureStream;

        let state = self.state.as_mut().context("camera not connected")?;
        let buf = state
            .with_mut(|fields| fields.stream.next().map(|(buf, _meta)| buf.to_vec()))
            .context("capture camera frame")?;
        let pixels = super::normalize::normalize_to_rgb(
            &buf,
            self.active_width,
            self.active_height,
            self.format,
        )?;
        self.frame_count += 1;
        Frame::from_rgb(pixels, self.active_width, self.active_height, self.frame_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stub_config() -> CameraConfig {
        CameraConfig {
            device: "stub://barn".to_string(),
            target_fps: 10,
            width: 64,
            height: 48,
        }
    }

    #[test]
    fn stub_camera_produces_sized_frames() -> Result<()> {
        let mut source = CameraSource::new(stub_config())?;
        source.connect()?;
        for expected in 1..=3u64 {
            let frame = source.next_frame()?.expect("camera feeds never end");
            assert_eq!((frame.width(), frame.height()), (64, 48));
            assert_eq!(frame.index, expected);
        }
        assert_eq!(source.frames_captured(), 3);
        assert_eq!(source.describe(), "camera:stub://barn");
        Ok(())
    }

    #[test]
    fn consecutive_stub_frames_differ() -> Result<()> {
        let mut source = CameraSource::new(stub_config())?;
        let a = source.next_frame()?.expect("frame");
        let b = source.next_frame()?.expect("frame");
        assert_ne!(a.pixels(), b.pixels());
        Ok(())
    }

    #[test]
    fn zero_resolution_is_rejected() {
        let config = CameraConfig {
            width: 0,
            ..stub_config()
        };
        assert!(CameraSource::new(config).is_err());
    }
}
