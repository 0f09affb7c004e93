//! V4L2 camera (feature `camera-v4l2`).
//!
//! Asks the driver for RGB24 at the configured size and rate and takes whatever
//! it grants, as long as the granted layout is one `normalize` understands.

use anyhow::{anyhow, Context, Result};
use ouroboros::self_referencing;
use std::time::{Duration, Instant};

use super::normalize::{normalize_to_rgb, PixelFormat};
use super::{CameraConfig, FrameSource, SourceStats};
use crate::frame::Frame;

const MMAP_BUFFERS: u32 = 4;
const MIN_STALE_AFTER: Duration = Duration::from_secs(2);

pub struct V4l2Camera {
    config: CameraConfig,
    session: Option<Session>,
    granted: Granted,
    sequence: u64,
    health: CaptureHealth,
}

/// Open device plus the mmap stream borrowing it.
#[self_referencing]
struct Session {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

/// Format the driver actually delivers.
#[derive(Clone, Copy, Debug)]
struct Granted {
    width: u32,
    height: u32,
    layout: PixelFormat,
}

/// Healthy until a read fails or frames stop arriving for a few frame periods.
struct CaptureHealth {
    stale_after: Duration,
    last_frame: Option<Instant>,
    failing: bool,
}

impl CaptureHealth {
    fn new(fps: u32) -> Self {
        let stale_after = if fps == 0 {
            MIN_STALE_AFTER
        } else {
            (Duration::from_secs(6) / fps).max(MIN_STALE_AFTER)
        };
        Self {
            stale_after,
            last_frame: None,
            failing: false,
        }
    }

    fn frame_ok(&mut self) {
        self.last_frame = Some(Instant::now());
        self.failing = false;
    }

    fn healthy(&self) -> bool {
        !self.failing
            && self
                .last_frame
                .map_or(true, |at| at.elapsed() <= self.stale_after)
    }
}

impl V4l2Camera {
    pub fn new(config: CameraConfig) -> Result<Self> {
        Ok(Self {
            granted: Granted {
                width: config.width,
                height: config.height,
                layout: PixelFormat::Rgb24,
            },
            health: CaptureHealth::new(config.fps),
            config,
            session: None,
            sequence: 0,
        })
    }

    fn negotiate(&self, device: &v4l::Device) -> Result<Granted> {
        use v4l::video::Capture;

        let mut wanted = device.format().context("query v4l2 format")?;
        wanted.width = self.config.width;
        wanted.height = self.config.height;
        wanted.fourcc = v4l::FourCC::new(b"RGB3");

        let granted = match device.set_format(&wanted) {
            Ok(granted) => granted,
            Err(err) => {
                log::warn!(
                    "V4l2Camera: {} refused {}x{} RGB3 ({}); keeping driver format",
                    self.config.device,
                    self.config.width,
                    self.config.height,
                    err
                );
                device.format().context("query v4l2 format after refusal")?
            }
        };

        if self.config.fps > 0 {
            let rate = v4l::video::capture::Parameters::with_fps(self.config.fps);
            if let Err(err) = device.set_params(&rate) {
                log::warn!(
                    "V4l2Camera: {} ignored {} fps request: {}",
                    self.config.device,
                    self.config.fps,
                    err
                );
            }
        }

        let layout = PixelFormat::from_fourcc(&granted.fourcc.repr).ok_or_else(|| {
            anyhow!(
                "{} delivers {}, which is not RGB3, YUYV or NV12",
                self.config.device,
                granted.fourcc
            )
        })?;
        Ok(Granted {
            width: granted.width,
            height: granted.height,
            layout,
        })
    }
}

impl FrameSource for V4l2Camera {
    fn connect(&mut self) -> Result<()> {
        use v4l::buffer::Type;

        let device = v4l::Device::with_path(&self.config.device)
            .with_context(|| format!("open camera {}", self.config.device))?;
        self.granted = self.negotiate(&device)?;

        let session = SessionTryBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, MMAP_BUFFERS)
                    .context("map v4l2 capture buffers")
            },
        }
        .try_build()?;
        self.session = Some(session);
        self.health = CaptureHealth::new(self.config.fps);

        log::info!(
            "V4l2Camera: {} streaming {}x{} {:?}",
            self.config.device,
            self.granted.width,
            self.granted.height,
            self.granted.layout
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame> {
        use v4l::io::traits::CaptureStream;

        let granted = self.granted;
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| anyhow!("camera {} is not open", self.config.device))?;

        let captured = session.with_mut(|fields| {
            let (buf, meta) = fields.stream.next()?;
            // Some drivers leave bytesused at zero; fall back to the whole buffer.
            let used = match meta.bytesused as usize {
                0 => buf.len(),
                n => n.min(buf.len()),
            };
            Ok::<_, std::io::Error>(
                normalize_to_rgb(&buf[..used], granted.width, granted.height, granted.layout),
            )
        });
        let rgb = match captured {
            Ok(Ok(rgb)) => rgb,
            Ok(Err(err)) => {
                self.health.failing = true;
                return Err(err.context("normalize v4l2 frame"));
            }
            Err(err) => {
                self.health.failing = true;
                return Err(anyhow::Error::new(err).context("dequeue v4l2 buffer"));
            }
        };

        let sequence = self.sequence;
        self.sequence += 1;
        self.health.frame_ok();
        Frame::from_rgb(rgb, granted.width, granted.height, sequence)
    }

    fn is_healthy(&self) -> bool {
        self.health.healthy()
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.sequence,
            device: self.config.device.clone(),
        }
    }

    fn release(&mut self) {
        if let Some(session) = self.session.take() {
            drop(session);
            log::info!("V4l2Camera: closed {}", self.config.device);
        }
    }
}
