//! Synthetic camera for `stub://` devices.
//!
//! Renders a dark road scene; every fourth second a bright plate-shaped panel with
//! dark glyph bars "drives through". Frames are deterministic for a given size and
//! frame count, so tests can rely on them.

use anyhow::Result;
use std::time::{Duration, Instant};

use super::{CameraConfig, FrameSource, SourceStats};
use crate::frame::Frame;

const BACKGROUND: u8 = 40;
const PLATE_FILL: u8 = 235;
const GLYPH_FILL: u8 = 20;

/// Plate bounds for a `width` x `height` scene as `(x0, y0, x1, y1)`, exclusive end.
pub fn plate_bounds(width: u32, height: u32) -> (u32, u32, u32, u32) {
    (width * 3 / 10, height * 2 / 5, width * 7 / 10, height * 31 / 50)
}

/// Scene without a plate.
pub fn empty_scene(width: u32, height: u32, sequence: u64) -> Result<Frame> {
    let pixels = vec![BACKGROUND; (width as usize) * (height as usize) * 3];
    Frame::from_rgb(pixels, width, height, sequence)
}

/// Scene with one axis-aligned plate at [`plate_bounds`].
pub fn plate_scene(width: u32, height: u32, sequence: u64) -> Result<Frame> {
    let mut pixels = vec![BACKGROUND; (width as usize) * (height as usize) * 3];
    let (x0, y0, x1, y1) = plate_bounds(width, height);
    fill_rect(&mut pixels, width, (x0, y0, x1, y1), PLATE_FILL);

    // Glyph bars stay well inside the panel so their edges never touch its border.
    let plate_w = x1 - x0;
    let plate_h = y1 - y0;
    for step in [25u32, 45, 65] {
        let gx0 = x0 + plate_w * step / 100;
        let gx1 = gx0 + plate_w * 8 / 100;
        let gy0 = y0 + plate_h * 3 / 10;
        let gy1 = y0 + plate_h * 7 / 10;
        fill_rect(&mut pixels, width, (gx0, gy0, gx1, gy1), GLYPH_FILL);
    }

    Frame::from_rgb(pixels, width, height, sequence)
}

fn fill_rect(pixels: &mut [u8], width: u32, rect: (u32, u32, u32, u32), value: u8) {
    let (x0, y0, x1, y1) = rect;
    for y in y0..y1 {
        let row = (y * width) as usize * 3;
        pixels[row + x0 as usize * 3..row + x1 as usize * 3].fill(value);
    }
}

/// Synthetic camera paced to the configured frame rate.
pub struct SyntheticCamera {
    config: CameraConfig,
    frame_count: u64,
    last_frame_at: Option<Instant>,
}

impl SyntheticCamera {
    pub fn new(config: CameraConfig) -> Self {
        Self {
            config,
            frame_count: 0,
            last_frame_at: None,
        }
    }

    fn plate_visible(&self) -> bool {
        let fps = u64::from(self.config.fps.max(1));
        (self.frame_count / fps) % 4 == 1
    }

    fn pace(&mut self) {
        if self.config.fps == 0 {
            return;
        }
        let interval = Duration::from_secs(1) / self.config.fps;
        if let Some(last) = self.last_frame_at {
            let elapsed = last.elapsed();
            if elapsed < interval {
                std::thread::sleep(interval - elapsed);
            }
        }
        self.last_frame_at = Some(Instant::now());
    }
}

impl FrameSource for SyntheticCamera {
    /// Synthetic sources are always "connected".
    fn connect(&mut self) -> Result<()> {
        log::info!(
            "SyntheticCamera: connected to {} ({}x{} @ {} fps)",
            self.config.device,
            self.config.width,
            self.config.height,
            self.config.fps
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame> {
        self.pace();
        let sequence = self.frame_count;
        let frame = if self.plate_visible() {
            plate_scene(self.config.width, self.config.height, sequence)?
        } else {
            empty_scene(self.config.width, self.config.height, sequence)?
        };
        self.frame_count += 1;
        Ok(frame)
    }

    fn is_healthy(&self) -> bool {
        true
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            device: self.config.device.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plate_scene_paints_panel_and_glyphs() -> Result<()> {
        let frame = plate_scene(100, 50, 7)?;
        let img = frame.as_rgb_image().expect("view");
        let (x0, y0, x1, y1) = plate_bounds(100, 50);
        assert_eq!(img.get_pixel(0, 0).0, [BACKGROUND; 3]);
        assert_eq!(img.get_pixel(x0, y0).0, [PLATE_FILL; 3]);
        assert_eq!(img.get_pixel(x1 - 1, y1 - 1).0, [PLATE_FILL; 3]);
        assert_eq!(img.get_pixel(x1, y1).0, [BACKGROUND; 3]);
        assert_eq!(frame.sequence(), 7);
        Ok(())
    }

    #[test]
    fn synthetic_camera_alternates_empty_and_plate_passes() -> Result<()> {
        let mut camera = SyntheticCamera::new(CameraConfig {
            device: "stub://test".to_string(),
            width: 40,
            height: 20,
            fps: 0,
        });
        camera.connect()?;
        // fps 0 disables pacing and counts one frame per "second".
        let first = camera.next_frame()?;
        let second = camera.next_frame()?;
        let (x0, y0, _, _) = plate_bounds(40, 20);
        let px = |frame: &Frame| frame.as_rgb_image().map(|img| img.get_pixel(x0, y0).0);
        assert_eq!(px(&first), Some([BACKGROUND; 3]));
        assert_eq!(px(&second), Some([PLATE_FILL; 3]));
        assert_eq!(second.sequence(), 1);
        Ok(())
    }
}
