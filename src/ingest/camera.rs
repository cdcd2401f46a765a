//! Camera frame source.
//!
//! `CameraSource` captures fixed-size RGB frames from a local V4L2 device
//! (e.g. `/dev/video0`, feature `capture-v4l2`) or, for `stub://` devices,
//! generates a deterministic synthetic scene.

#[cfg(feature = "capture-v4l2")]
use anyhow::Context;
use anyhow::Result;
#[cfg(feature = "capture-v4l2")]
use ouroboros::self_referencing;
use std::time::{Duration, Instant};

use super::FrameSource;
use crate::frame::Frame;

/// Configuration for a camera source.
#[derive(Clone, Debug)]
pub struct CameraConfig {
    /// Device path (e.g., "/dev/video0"), or "stub://<name>" for synthetic frames.
    pub device: String,
    /// Requested frame width.
    pub width: u32,
    /// Requested frame height.
    pub height: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: "/dev/video0".to_string(),
            width: 640,
            height: 480,
        }
    }
}

/// Camera frame source.
pub struct CameraSource {
    backend: CameraBackend,
}

enum CameraBackend {
    Synthetic(SyntheticCamera),
    #[cfg(feature = "capture-v4l2")]
    Device(DeviceCamera),
}

impl CameraSource {
    pub fn new(config: CameraConfig) -> Result<Self> {
        if config.device.starts_with("stub://") {
            Ok(Self {
                backend: CameraBackend::Synthetic(SyntheticCamera::new(config)),
            })
        } else {
            #[cfg(feature = "capture-v4l2")]
            {
                Ok(Self {
                    backend: CameraBackend::Device(DeviceCamera::new(config)),
                })
            }
            #[cfg(not(feature = "capture-v4l2"))]
            {
                anyhow::bail!(
                    "camera device '{}' requires the capture-v4l2 feature (use stub:// for synthetic frames)",
                    config.device
                )
            }
        }
    }

    /// Get frame statistics.
    pub fn stats(&self) -> CameraStats {
        match &self.backend {
            CameraBackend::Synthetic(source) => source.stats(),
            #[cfg(feature = "capture-v4l2")]
            CameraBackend::Device(source) => source.stats(),
        }
    }
}

impl FrameSource for CameraSource {
    fn connect(&mut self) -> Result<()> {
        match &mut self.backend {
            CameraBackend::Synthetic(source) => source.connect(),
            #[cfg(feature = "capture-v4l2")]
            CameraBackend::Device(source) => source.connect(),
        }
    }

    fn next_frame(&mut self) -> Result<Frame> {
        match &mut self.backend {
            CameraBackend::Synthetic(source) => source.next_frame(),
            #[cfg(feature = "capture-v4l2")]
            CameraBackend::Device(source) => source.next_frame(),
        }
    }

    fn release(&mut self) {
        match &mut self.backend {
            CameraBackend::Synthetic(source) => source.release(),
            #[cfg(feature = "capture-v4l2")]
            CameraBackend::Device(source) => source.release(),
        }
    }

    fn is_healthy(&self) -> bool {
        match &self.backend {
            CameraBackend::Synthetic(source) => source.connected,
            #[cfg(feature = "capture-v4l2")]
            CameraBackend::Device(source) => source.is_healthy(),
        }
    }

    fn describe(&self) -> String {
        self.stats().device
    }
}

/// Statistics for a camera source.
#[derive(Clone, Debug)]
pub struct CameraStats {
    pub frames_captured: u64,
    pub device: String,
    pub last_frame_age: Option<Duration>,
}

// ----------------------------------------------------------------------------
// Synthetic source (stub://)
// ----------------------------------------------------------------------------

struct SyntheticCamera {
    config: CameraConfig,
    connected: bool,
    frame_count: u64,
    last_frame_at: Option<Instant>,
    /// Shifts the pattern every 50 frames so consecutive uploads differ.
    scene_state: u8,
}

impl SyntheticCamera {
    fn new(config: CameraConfig) -> Self {
        Self {
            config,
            connected: false,
            frame_count: 0,
            last_frame_at: None,
            scene_state: 0,
        }
    }

    fn connect(&mut self) -> Result<()> {
        self.connected = true;
        log::info!(
            "CameraSource: connected to {} (synthetic)",
            self.config.device
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame> {
        if !self.connected {
            anyhow::bail!("camera {} not connected", self.config.device);
        }
        self.frame_count += 1;
        if self.frame_count % 50 == 0 {
            self.scene_state = self.scene_state.wrapping_add(1);
        }

        let width = self.config.width as usize;
        let pixel_count = width * self.config.height as usize;
        let mut pixels = Vec::with_capacity(pixel_count * 3);
        for i in 0..pixel_count {
            let (x, y) = (i % width, i / width);
            let shift = self.scene_state as usize * 16;
            pixels.push(((x + shift) % 256) as u8);
            pixels.push(((y + shift) % 256) as u8);
            pixels.push(((x ^ y) % 256) as u8);
        }

        self.last_frame_at = Some(Instant::now());
        Frame::new(pixels, self.config.width, self.config.height)
    }

    fn release(&mut self) {
        self.connected = false;
    }

    fn stats(&self) -> CameraStats {
        CameraStats {
            frames_captured: self.frame_count,
            device: self.config.device.clone(),
            last_frame_age: self.last_frame_at.map(|at| at.elapsed()),
        }
    }
}

// ----------------------------------------------------------------------------
// V4L2 device source
// ----------------------------------------------------------------------------

#[cfg(feature = "capture-v4l2")]
struct DeviceCamera {
    config: CameraConfig,
    state: Option<DeviceState>,
    pixel_format: super::normalize::PixelFormat,
    frame_count: u64,
    last_frame_at: Option<Instant>,
    last_error: Option<String>,
    active_width: u32,
    active_height: u32,
}

#[cfg(feature = "capture-v4l2")]
#[self_referencing]
struct DeviceState {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

#[cfg(feature = "capture-v4l2")]
impl DeviceCamera {
    fn new(config: CameraConfig) -> Self {
        Self {
            active_width: config.width,
            active_height: config.height,
            config,
            state: None,
            pixel_format: super::normalize::PixelFormat::Rgb24,
            frame_count: 0,
            last_frame_at: None,
            last_error: None,
        }
    }

    fn connect(&mut self) -> Result<()> {
        use super::normalize::PixelFormat;
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let mut device = v4l::Device::with_path(&self.config.device)
            .with_context(|| format!("open v4l2 device {}", self.config.device))?;
        let mut format = device.format().context("read v4l2 format")?;
        format.width = self.config.width;
        format.height = self.config.height;
        format.fourcc = v4l::FourCC::new(b"RGB3");

        let mut format = device
            .set_format(&format)
            .with_context(|| format!("set v4l2 format on {}", self.config.device))?;
        if format.fourcc != v4l::FourCC::new(b"RGB3") {
            log::warn!(
                "CameraSource: {} does not offer RGB3, falling back to YUYV",
                self.config.device
            );
            format.fourcc = v4l::FourCC::new(b"YUYV");
            format = device
                .set_format(&format)
                .with_context(|| format!("set YUYV format on {}", self.config.device))?;
        }
        self.pixel_format = if format.fourcc == v4l::FourCC::new(b"RGB3") {
            PixelFormat::Rgb24
        } else if format.fourcc == v4l::FourCC::new(b"YUYV") {
            PixelFormat::Yuyv
        } else {
            anyhow::bail!(
                "v4l2 device {} negotiated unsupported pixel format {}",
                self.config.device,
                format.fourcc
            );
        };

        if format.width != self.config.width || format.height != self.config.height {
            log::warn!(
                "CameraSource: {} negotiated {}x{} instead of {}x{}",
                self.config.device,
                format.width,
                format.height,
                self.config.width,
                self.config.height
            );
        }
        self.active_width = format.width;
        self.active_height = format.height;
        self.last_error = None;

        let state = DeviceStateTryBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()
        .map_err(|err| {
            self.last_error = Some(err.to_string());
            err
        })?;
        self.state = Some(state);

        log::info!(
            "CameraSource: connected to {} ({}x{} {:?})",
            self.config.device,
            self.active_width,
            self.active_height,
            self.pixel_format
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame> {
        use v4l::io::traits::CaptureStream;

        let (width, height, format) = (self.active_width, self.active_height, self.pixel_format);
        let state = self.state.as_mut().context("v4l2 device not connected")?;
        let converted = state.with_mut(|fields| -> Result<Vec<u8>> {
            let (buf, meta) = fields.stream.next().context("capture v4l2 frame")?;
            let used = (meta.bytesused as usize).min(buf.len());
            let used = if used == 0 { buf.len() } else { used };
            super::normalize::to_rgb24(&buf[..used], width, height, format)
        });
        let pixels = converted.map_err(|err| {
            self.last_error = Some(err.to_string());
            err
        })?;

        self.frame_count += 1;
        self.last_frame_at = Some(Instant::now());
        self.last_error = None;
        Frame::new(pixels, width, height)
    }

    fn release(&mut self) {
        // Dropping the stream unmaps the buffers before the device fd closes.
        self.state = None;
    }

    fn is_healthy(&self) -> bool {
        if self.last_error.is_some() || self.state.is_none() {
            return false;
        }
        let Some(last_frame_at) = self.last_frame_at else {
            return true;
        };
        // Frames are pulled on demand, so a quiet camera is healthy; only
        // a stalled capture counts against it.
        last_frame_at.elapsed() <= Duration::from_secs(60 * 60)
    }

    fn stats(&self) -> CameraStats {
        CameraStats {
            frames_captured: self.frame_count,
            device: self.config.device.clone(),
            last_frame_age: self.last_frame_at.map(|at| at.elapsed()),
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn stub_config() -> CameraConfig {
        CameraConfig {
            device: "stub://test".to_string(),
            width: 640,
            height: 480,
        }
    }

    #[test]
    fn synthetic_camera_produces_sized_frames() -> Result<()> {
        let mut source = CameraSource::new(stub_config())?;
        source.connect()?;

        let frame = source.next_frame()?;
        assert_eq!(frame.width, 640);
        assert_eq!(frame.height, 480);
        assert_eq!(frame.len_bytes(), 640 * 480 * 3);
        assert_eq!(source.stats().frames_captured, 1);
        assert!(source.is_healthy());
        Ok(())
    }

    #[test]
    fn synthetic_camera_refuses_capture_after_release() -> Result<()> {
        let mut source = CameraSource::new(stub_config())?;
        source.connect()?;
        source.release();
        assert!(source.next_frame().is_err());
        assert!(!source.is_healthy());
        // Releasing twice is harmless.
        source.release();
        Ok(())
    }

    #[test]
    fn synthetic_scene_changes_over_time() -> Result<()> {
        let mut source = CameraSource::new(CameraConfig {
            width: 16,
            height: 16,
            ..stub_config()
        })?;
        source.connect()?;
        let first = source.next_frame()?;
        let mut last = None;
        for _ in 0..60 {
            last = Some(source.next_frame()?);
        }
        let last = last.expect("frames");
        assert_ne!(first.pixels(), last.pixels());
        Ok(())
    }

    #[cfg(not(feature = "capture-v4l2"))]
    #[test]
    fn real_device_requires_feature() {
        let err = CameraSource::new(CameraConfig::default())
            .err()
            .expect("device path without feature must fail");
        assert!(err.to_string().contains("capture-v4l2"));
    }
}
