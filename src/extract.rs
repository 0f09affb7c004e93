//! Plate candidate extraction.
//!
//! `PlateCandidateExtractor::extract` turns one frame into at most one binarized
//! plate region:
//!
//! 1. Downscale to a fixed working width (aspect preserved) to bound cost.
//! 2. Grayscale, then an edge-preserving bilateral filter.
//! 3. Canny edges, then contour tracing.
//! 4. Rank contours by enclosed area, largest first, and keep the top ten.
//! 5. Approximate each as a closed polygon (tolerance: 2% of its perimeter) and take
//!    the **first** one with exactly four vertices.
//! 6. Mask the filtered grayscale with that quadrilateral, binarize with Otsu's
//!    threshold, and open with a 3x3 square to remove speckle.
//!
//! Step 5 is a greedy heuristic, not optimal plate localization. Equal areas keep
//! their contour-trace order, so the result is reproducible for a given frame.
//!
//! A frame without a candidate is the common case and is not an error. Failures
//! inside the image primitives (including panics) are also reported as `None`.

use anyhow::{anyhow, Result};
use image::imageops::{self, FilterType};
use image::{GrayImage, Luma};
use imageproc::contours::find_contours;
use imageproc::contrast::{otsu_level, threshold};
use imageproc::distance_transform::Norm;
use imageproc::drawing::draw_polygon_mut;
use imageproc::edges::canny;
use imageproc::filter::bilateral_filter;
use imageproc::geometry::{approximate_polygon_dp, arc_length};
use imageproc::morphology::open;
use imageproc::point::Point;
use std::panic::{self, AssertUnwindSafe};

use crate::frame::Frame;

pub const DEFAULT_WORKING_WIDTH: u32 = 640;
pub const MAX_CANDIDATES: usize = 10;
pub const POLYGON_EPSILON_RATIO: f64 = 0.02;

const BILATERAL_WINDOW: u32 = 11;
const BILATERAL_SIGMA_COLOR: f32 = 17.0;
const BILATERAL_SIGMA_SPATIAL: f32 = 17.0;
const CANNY_LOW: f32 = 30.0;
const CANNY_HIGH: f32 = 200.0;

/// Four corners of an accepted candidate, in contour order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Quad(pub [Point<i32>; 4]);

impl Quad {
    fn from_polygon(points: &[Point<i32>]) -> Option<Self> {
        let corners: [Point<i32>; 4] = points.try_into().ok()?;
        for (i, a) in corners.iter().enumerate() {
            if corners[i + 1..].contains(a) {
                return None;
            }
        }
        Some(Self(corners))
    }

    fn scaled(&self, scale: f64) -> Self {
        Self(self.0.map(|p| {
            Point::new(
                (p.x as f64 * scale).round() as i32,
                (p.y as f64 * scale).round() as i32,
            )
        }))
    }

    /// Axis-aligned bounds as `(min_x, min_y, max_x, max_y)`.
    pub fn bounds(&self) -> (i32, i32, i32, i32) {
        let xs = self.0.map(|p| p.x);
        let ys = self.0.map(|p| p.y);
        (
            xs.iter().copied().min().unwrap_or_default(),
            ys.iter().copied().min().unwrap_or_default(),
            xs.iter().copied().max().unwrap_or_default(),
            ys.iter().copied().max().unwrap_or_default(),
        )
    }
}

/// Binarized candidate ready for recognition.
#[derive(Clone, Debug)]
pub struct PlateRegion {
    /// Working-resolution image: 255 inside the plate where ink is bright, 0 elsewhere.
    pub image: GrayImage,
    /// Candidate corners in the source frame's pixel coordinates.
    pub quad: Quad,
    /// Sequence number of the originating frame.
    pub frame_sequence: u64,
}

#[derive(Clone, Debug)]
pub struct PlateCandidateExtractor {
    working_width: u32,
    max_candidates: usize,
    epsilon_ratio: f64,
}

impl Default for PlateCandidateExtractor {
    fn default() -> Self {
        Self::new(DEFAULT_WORKING_WIDTH)
    }
}

impl PlateCandidateExtractor {
    pub fn new(working_width: u32) -> Self {
        Self {
            working_width: working_width.max(1),
            max_candidates: MAX_CANDIDATES,
            epsilon_ratio: POLYGON_EPSILON_RATIO,
        }
    }

    /// Extract at most one plate candidate from `frame`.
    pub fn extract(&self, frame: &Frame) -> Option<PlateRegion> {
        match panic::catch_unwind(AssertUnwindSafe(|| self.locate(frame))) {
            Ok(Ok(region)) => region,
            Ok(Err(err)) => {
                log::debug!("extract: frame {} skipped: {:#}", frame.sequence(), err);
                None
            }
            Err(_) => {
                log::debug!(
                    "extract: image primitive panicked on frame {}",
                    frame.sequence()
                );
                None
            }
        }
    }

    fn locate(&self, frame: &Frame) -> Result<Option<PlateRegion>> {
        let rgb = frame
            .as_rgb_image()
            .ok_or_else(|| anyhow!("frame buffer does not match its dimensions"))?;

        let (width, height) = working_size(frame.width, frame.height, self.working_width);
        let gray = if width == frame.width {
            imageops::grayscale(&rgb)
        } else {
            imageops::grayscale(&imageops::resize(&rgb, width, height, FilterType::Triangle))
        };

        let smoothed = bilateral_filter(
            &gray,
            BILATERAL_WINDOW,
            BILATERAL_SIGMA_COLOR,
            BILATERAL_SIGMA_SPATIAL,
        );
        let edges = canny(&smoothed, CANNY_LOW, CANNY_HIGH);

        let Some(quad) = self.first_quadrilateral(&edges) else {
            log::trace!("extract: no quadrilateral in frame {}", frame.sequence());
            return Ok(None);
        };

        let scale = frame.width as f64 / width as f64;
        Ok(Some(PlateRegion {
            image: binarize_region(&smoothed, &quad),
            quad: quad.scaled(scale),
            frame_sequence: frame.sequence(),
        }))
    }

    fn first_quadrilateral(&self, edges: &GrayImage) -> Option<Quad> {
        let mut ranked: Vec<(f64, Vec<Point<i32>>)> = find_contours::<i32>(edges)
            .into_iter()
            .map(|contour| (polygon_area(&contour.points), contour.points))
            .collect();
        // Stable: equal areas keep trace order.
        ranked.sort_by(|a, b| b.0.total_cmp(&a.0));

        ranked
            .iter()
            .take(self.max_candidates)
            .find_map(|(_, points)| {
                let epsilon = self.epsilon_ratio * arc_length(points, true);
                Quad::from_polygon(&approximate_closed_polygon(points, epsilon))
            })
    }
}

fn working_size(width: u32, height: u32, working_width: u32) -> (u32, u32) {
    let scaled = (height as u64 * working_width as u64 + width as u64 / 2) / width as u64;
    (working_width, scaled.clamp(1, u32::MAX as u64) as u32)
}

/// Shoelace area of a closed point sequence.
fn polygon_area(points: &[Point<i32>]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    let twice: i64 = points
        .iter()
        .zip(points.iter().cycle().skip(1))
        .map(|(a, b)| a.x as i64 * b.y as i64 - b.x as i64 * a.y as i64)
        .sum();
    twice.abs() as f64 / 2.0
}

/// Douglas-Peucker over a closed curve.
///
/// The curve is split at two mutually distant points (both lie on the hull), each
/// half is simplified as an open chain, and the halves are joined without repeating
/// their shared endpoints. A contour that starts mid-edge therefore does not gain a
/// spurious vertex at its start point.
fn approximate_closed_polygon(curve: &[Point<i32>], epsilon: f64) -> Vec<Point<i32>> {
    if curve.len() < 3 || epsilon.is_nan() || epsilon <= 0.0 {
        return curve.to_vec();
    }
    let a = farthest_from(curve, curve[0]);
    let b = farthest_from(curve, curve[a]);
    if a == b {
        return Vec::new();
    }
    let (start, end) = (a.min(b), a.max(b));

    let closing: Vec<Point<i32>> = curve[end..]
        .iter()
        .chain(curve[..=start].iter())
        .copied()
        .collect();

    let mut polygon = approximate_polygon_dp(&curve[start..=end], epsilon, false);
    polygon.pop();
    polygon.extend(approximate_polygon_dp(&closing, epsilon, false));
    polygon.pop();
    polygon
}

fn farthest_from(curve: &[Point<i32>], origin: Point<i32>) -> usize {
    let mut best = (0, -1i64);
    for (i, p) in curve.iter().enumerate() {
        let dx = (p.x - origin.x) as i64;
        let dy = (p.y - origin.y) as i64;
        let d = dx * dx + dy * dy;
        if d > best.1 {
            best = (i, d);
        }
    }
    best.0
}

fn binarize_region(gray: &GrayImage, quad: &Quad) -> GrayImage {
    let mut mask = GrayImage::new(gray.width(), gray.height());
    draw_polygon_mut(&mut mask, &quad.0, Luma([255u8]));

    let mut masked = gray.clone();
    for (px, m) in masked.pixels_mut().zip(mask.pixels()) {
        if m[0] == 0 {
            px[0] = 0;
        }
    }

    let level = otsu_level(&masked);
    let binary = threshold(&masked, level);
    open(&binary, Norm::LInf, 1)
}
