#![cfg_attr(not(feature = "camera-v4l2"), allow(dead_code))]

use anyhow::{anyhow, Result};

/// Pixel layouts cameras commonly hand out.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PixelFormat {
    Rgb24,
    /// Packed 4:2:2, `Y0 U Y1 V` per pixel pair. Default on most USB webcams.
    Yuyv,
    Nv12,
}

impl PixelFormat {
    pub(crate) fn from_fourcc(fourcc: &[u8; 4]) -> Option<Self> {
        match fourcc {
            b"RGB3" => Some(Self::Rgb24),
            b"YUYV" => Some(Self::Yuyv),
            b"NV12" => Some(Self::Nv12),
            _ => None,
        }
    }
}

pub(crate) fn normalize_to_rgb(
    pixels: &[u8],
    width: u32,
    height: u32,
    format: PixelFormat,
) -> Result<Vec<u8>> {
    let area = (width as usize)
        .checked_mul(height as usize)
        .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
    match format {
        PixelFormat::Rgb24 => {
            expect_len(pixels, area * 3, "RGB")?;
            Ok(pixels[..area * 3].to_vec())
        }
        PixelFormat::Yuyv => {
            if width % 2 != 0 {
                return Err(anyhow!("YUYV frame width must be even, got {}", width));
            }
            expect_len(pixels, area * 2, "YUYV")?;
            Ok(yuyv_to_rgb(&pixels[..area * 2]))
        }
        PixelFormat::Nv12 => {
            // Chroma is subsampled 2x2, so both dimensions must be even.
            if width % 2 != 0 || height % 2 != 0 {
                return Err(anyhow!(
                    "NV12 frame dimensions must be even, got {}x{}",
                    width,
                    height
                ));
            }
            expect_len(pixels, area + area / 2, "NV12")?;
            Ok(nv12_to_rgb(pixels, width as usize, height as usize))
        }
    }
}

/// Drivers may pad the mapped buffer past the image, so only a short buffer is an error.
fn expect_len(pixels: &[u8], expected: usize, label: &str) -> Result<()> {
    if pixels.len() < expected {
        return Err(anyhow!(
            "{} frame length mismatch: expected {}, got {}",
            label,
            expected,
            pixels.len()
        ));
    }
    Ok(())
}

fn yuyv_to_rgb(pixels: &[u8]) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(pixels.len() / 2 * 3);
    for quad in pixels.chunks_exact(4) {
        let (y0, u, y1, v) = (quad[0], quad[1], quad[2], quad[3]);
        rgb.extend_from_slice(&yuv_to_rgb(y0, u, v));
        rgb.extend_from_slice(&yuv_to_rgb(y1, u, v));
    }
    rgb
}

fn nv12_to_rgb(pixels: &[u8], w: usize, h: usize) -> Vec<u8> {
    let y_plane = w * h;
    let mut rgb = vec![0u8; y_plane * 3];
    for j in 0..h {
        for i in 0..w {
            let uv_index = y_plane + (j / 2) * w + (i / 2) * 2;
            let px = yuv_to_rgb(pixels[j * w + i], pixels[uv_index], pixels[uv_index + 1]);
            let offset = (j * w + i) * 3;
            rgb[offset..offset + 3].copy_from_slice(&px);
        }
    }
    rgb
}

fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let y = y as f32;
    let u = u as f32 - 128.0;
    let v = v as f32 - 128.0;
    [
        clamp_to_u8(y + 1.402_f32 * v),
        clamp_to_u8(y - 0.344_136_f32 * u - 0.714_136_f32 * v),
        clamp_to_u8(y + 1.772_f32 * u),
    ]
}

fn clamp_to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nv12_conversion_produces_gray() -> Result<()> {
        let nv12 = [vec![128u8; 4], vec![128u8; 2]].concat();
        let rgb = normalize_to_rgb(&nv12, 2, 2, PixelFormat::Nv12)?;
        assert_eq!(rgb, vec![128u8; 12]);
        Ok(())
    }

    #[test]
    fn yuyv_conversion_keeps_luma_per_pixel() -> Result<()> {
        let yuyv = [16u8, 128, 235, 128];
        let rgb = normalize_to_rgb(&yuyv, 2, 1, PixelFormat::Yuyv)?;
        assert_eq!(rgb, vec![16, 16, 16, 235, 235, 235]);
        Ok(())
    }

    #[test]
    fn short_buffers_are_rejected() {
        assert!(normalize_to_rgb(&[0u8; 5], 1, 2, PixelFormat::Rgb24).is_err());
        assert!(normalize_to_rgb(&[0u8; 8], 3, 1, PixelFormat::Yuyv).is_err());
        assert!(normalize_to_rgb(&[0u8; 4], 2, 2, PixelFormat::Nv12).is_err());
    }

    #[test]
    fn nv12_odd_dimensions_are_an_error_not_a_panic() {
        // 3x3 passes the `area + area / 2` length check but has no room for
        // the rounded-up chroma rows.
        let result = std::panic::catch_unwind(|| {
            normalize_to_rgb(&vec![128u8; 13], 3, 3, PixelFormat::Nv12).is_err()
        });
        assert_eq!(result.ok(), Some(true));
        assert!(normalize_to_rgb(&vec![128u8; 9], 3, 2, PixelFormat::Nv12).is_err());
        assert!(normalize_to_rgb(&vec![128u8; 9], 2, 3, PixelFormat::Nv12).is_err());
    }

    #[test]
    fn fourcc_lookup() {
        assert_eq!(PixelFormat::from_fourcc(b"YUYV"), Some(PixelFormat::Yuyv));
        assert_eq!(PixelFormat::from_fourcc(b"MJPG"), None);
    }
}
