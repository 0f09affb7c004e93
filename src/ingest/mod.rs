//! Frame ingestion sources.
//!
//! This module provides the sources the capture loop pulls frames from:
//! - USB/V4L2 cameras (feature: camera-v4l2)
//! - Synthetic `stub://` scenes (testing, bench runs without a camera)
//!
//! All sources produce owned `Frame` instances in RGB24. Requested resolution and
//! frame rate are advisory; sources report whatever the device actually delivers.
//! A failed read is transient: the caller logs it, pauses, and asks again.

mod normalize;
pub mod synthetic;
#[cfg(feature = "camera-v4l2")]
pub mod v4l2;

use anyhow::Result;

use crate::frame::Frame;

pub use synthetic::{empty_scene, plate_scene, SyntheticCamera};
#[cfg(feature = "camera-v4l2")]
pub use v4l2::V4l2Camera;

/// Requested camera parameters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CameraConfig {
    /// Device path (e.g., "/dev/video0") or "stub://<name>".
    pub device: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: "/dev/video0".to_string(),
            width: 1280,
            height: 720,
            fps: 30,
        }
    }
}

/// Statistics for a frame source.
#[derive(Clone, Debug)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub device: String,
}

/// Anything the capture loop can pull frames from.
pub trait FrameSource {
    fn connect(&mut self) -> Result<()>;

    /// Capture the next frame. Errors are transient read failures.
    fn next_frame(&mut self) -> Result<Frame>;

    fn is_healthy(&self) -> bool;

    fn stats(&self) -> SourceStats;

    /// Release the device. Called once during shutdown.
    fn release(&mut self) {}
}

/// Camera selected from configuration.
///
/// Uses libv4l for real devices, with a synthetic fallback for `stub://` paths.
pub struct Camera {
    backend: CameraBackend,
}

enum CameraBackend {
    Synthetic(SyntheticCamera),
    #[cfg(feature = "camera-v4l2")]
    Device(V4l2Camera),
}

impl Camera {
    pub fn new(config: CameraConfig) -> Result<Self> {
        if config.device.starts_with("stub://") {
            Ok(Self {
                backend: CameraBackend::Synthetic(SyntheticCamera::new(config)),
            })
        } else {
            #[cfg(feature = "camera-v4l2")]
            {
                Ok(Self {
                    backend: CameraBackend::Device(V4l2Camera::new(config)?),
                })
            }
            #[cfg(not(feature = "camera-v4l2"))]
            {
                anyhow::bail!(
                    "camera {} requires the camera-v4l2 feature",
                    config.device
                )
            }
        }
    }

    fn source(&mut self) -> &mut dyn FrameSource {
        match &mut self.backend {
            CameraBackend::Synthetic(source) => source,
            #[cfg(feature = "camera-v4l2")]
            CameraBackend::Device(source) => source,
        }
    }

    fn source_ref(&self) -> &dyn FrameSource {
        match &self.backend {
            CameraBackend::Synthetic(source) => source,
            #[cfg(feature = "camera-v4l2")]
            CameraBackend::Device(source) => source,
        }
    }
}

impl FrameSource for Camera {
    fn connect(&mut self) -> Result<()> {
        self.source().connect()
    }

    fn next_frame(&mut self) -> Result<Frame> {
        self.source().next_frame()
    }

    fn is_healthy(&self) -> bool {
        self.source_ref().is_healthy()
    }

    fn stats(&self) -> SourceStats {
        self.source_ref().stats()
    }

    fn release(&mut self) {
        self.source().release()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_device_selects_synthetic_camera() -> Result<()> {
        let mut camera = Camera::new(CameraConfig {
            device: "stub://gate".to_string(),
            width: 320,
            height: 180,
            fps: 30,
        })?;
        camera.connect()?;
        let frame = camera.next_frame()?;
        assert_eq!((frame.width, frame.height), (320, 180));
        assert_eq!(camera.stats().frames_captured, 1);
        assert_eq!(camera.stats().device, "stub://gate");
        Ok(())
    }

    #[cfg(not(feature = "camera-v4l2"))]
    #[test]
    fn device_path_requires_v4l2_feature() {
        assert!(Camera::new(CameraConfig::default()).is_err());
    }
}
