//! Pixel-space ROI geometry.
//!
//! The coordinate space of a point set is decided once for the whole set:
//! if every x and every y is `<= 1.0` the set is treated as normalized
//! fractions of the frame, otherwise as absolute pixels. A tiny absolute
//! polygon hugging the origin (all coordinates within one pixel) is therefore
//! read as normalized. This ambiguity is inherent to the payload format and
//! is kept for compatibility with existing dashboards.

use image::{GrayImage, Luma};

use super::{RoiPoint, MIN_POLYGON_POINTS};
use crate::error::{Error, Result};

pub const MASK_FOREGROUND: u8 = 255;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CoordinateSpace {
    Normalized,
    Absolute,
}

/// Decide the coordinate space of a point set from its maximum x and y.
pub fn coordinate_space(points: &[RoiPoint]) -> CoordinateSpace {
    let max_x = points.iter().map(|p| p.x).fold(f64::NEG_INFINITY, f64::max);
    let max_y = points.iter().map(|p| p.y).fold(f64::NEG_INFINITY, f64::max);
    if max_x <= 1.0 && max_y <= 1.0 {
        CoordinateSpace::Normalized
    } else {
        CoordinateSpace::Absolute
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PixelPoint {
    pub x: u32,
    pub y: u32,
}

/// Integer polygon clamped to a frame. Always holds at least three vertices.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PixelPolygon {
    points: Vec<PixelPoint>,
}

impl PixelPolygon {
    pub fn points(&self) -> &[PixelPoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    fn edges(&self) -> impl Iterator<Item = ((f64, f64), (f64, f64))> + '_ {
        let n = self.points.len();
        (0..n).map(move |i| {
            let a = self.points[i];
            let b = self.points[(i + 1) % n];
            ((a.x as f64, a.y as f64), (b.x as f64, b.y as f64))
        })
    }

    /// Inside-or-on-boundary test.
    pub fn contains(&self, x: f64, y: f64) -> bool {
        let mut inside = false;
        for ((x0, y0), (x1, y1)) in self.edges() {
            if on_segment((x0, y0), (x1, y1), (x, y)) {
                return true;
            }
            if (y0 > y) != (y1 > y) {
                let cross_x = x0 + (y - y0) * (x1 - x0) / (y1 - y0);
                if x < cross_x {
                    inside = !inside;
                }
            }
        }
        inside
    }
}

fn on_segment(a: (f64, f64), b: (f64, f64), p: (f64, f64)) -> bool {
    let cross = (b.0 - a.0) * (p.1 - a.1) - (b.1 - a.1) * (p.0 - a.0);
    if cross.abs() > 1e-9 {
        return false;
    }
    p.0 >= a.0.min(b.0) && p.0 <= a.0.max(b.0) && p.1 >= a.1.min(b.1) && p.1 <= a.1.max(b.1)
}

/// Convert source points to a clamped pixel polygon, explaining any rejection.
pub fn try_normalize_roi_points(points: &[RoiPoint], width: u32, height: u32) -> Result<PixelPolygon> {
    if points.len() < MIN_POLYGON_POINTS {
        return Err(Error::Geometry(format!(
            "polygon needs at least {} points, got {}",
            MIN_POLYGON_POINTS,
            points.len()
        )));
    }
    if width == 0 || height == 0 {
        return Err(Error::Geometry(format!("empty frame {}x{}", width, height)));
    }

    let (scale_x, scale_y) = match coordinate_space(points) {
        CoordinateSpace::Normalized => (width as f64, height as f64),
        CoordinateSpace::Absolute => (1.0, 1.0),
    };
    let pixels: Vec<PixelPoint> = points
        .iter()
        .map(|p| PixelPoint {
            x: to_pixel(p.x * scale_x, width),
            y: to_pixel(p.y * scale_y, height),
        })
        .collect();

    if pixels.len() < MIN_POLYGON_POINTS {
        return Err(Error::Geometry("polygon collapsed after clamping".to_string()));
    }
    Ok(PixelPolygon { points: pixels })
}

/// `(points, width, height) -> polygon | none`.
pub fn normalize_roi_points(points: &[RoiPoint], width: u32, height: u32) -> Option<PixelPolygon> {
    try_normalize_roi_points(points, width, height).ok()
}

/// Round half to even, then clamp into `[0, dimension - 1]`.
fn to_pixel(value: f64, dimension: u32) -> u32 {
    let max = dimension.saturating_sub(1) as f64;
    let rounded = value.round_ties_even();
    if rounded.is_nan() {
        return 0;
    }
    rounded.clamp(0.0, max) as u32
}

/// Single-channel mask the size of the frame: polygon interior and boundary
/// are `MASK_FOREGROUND`, everything else zero. `None` without a polygon.
pub fn build_roi_mask(width: u32, height: u32, polygon: Option<&PixelPolygon>) -> Option<GrayImage> {
    let polygon = polygon?;
    let mut mask = GrayImage::new(width, height);
    if width == 0 || height == 0 {
        return Some(mask);
    }

    let mut crossings: Vec<f64> = Vec::with_capacity(polygon.len());
    for row in 0..height {
        let y = row as f64;
        crossings.clear();
        for ((x0, y0), (x1, y1)) in polygon.edges() {
            if (y0 <= y && y1 > y) || (y1 <= y && y0 > y) {
                crossings.push(x0 + (y - y0) * (x1 - x0) / (y1 - y0));
            }
        }
        crossings.sort_by(|a, b| a.total_cmp(b));
        for span in crossings.chunks_exact(2) {
            let start = span[0].ceil().max(0.0) as u32;
            let end = (span[1].floor() as u32).min(width - 1);
            for x in start..=end {
                mask.put_pixel(x, row, Luma([MASK_FOREGROUND]));
            }
        }
    }

    let n = polygon.len();
    for i in 0..n {
        draw_line(&mut mask, polygon.points[i], polygon.points[(i + 1) % n]);
    }
    Some(mask)
}

fn draw_line(mask: &mut GrayImage, a: PixelPoint, b: PixelPoint) {
    let (mut x, mut y) = (a.x as i64, a.y as i64);
    let (x1, y1) = (b.x as i64, b.y as i64);
    let dx = (x1 - x).abs();
    let dy = -(y1 - y).abs();
    let sx = if x < x1 { 1 } else { -1 };
    let sy = if y < y1 { 1 } else { -1 };
    let mut err = dx + dy;
    loop {
        if x >= 0 && y >= 0 && (x as u32) < mask.width() && (y as u32) < mask.height() {
            mask.put_pixel(x as u32, y as u32, Luma([MASK_FOREGROUND]));
        }
        if x == x1 && y == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x += sx;
        }
        if e2 <= dx {
            err += dx;
            y += sy;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pts(raw: &[(f64, f64)]) -> Vec<RoiPoint> {
        raw.iter().copied().map(RoiPoint::from).collect()
    }

    fn pixel_pairs(poly: &PixelPolygon) -> Vec<(u32, u32)> {
        poly.points().iter().map(|p| (p.x, p.y)).collect()
    }

    #[test]
    fn fewer_than_three_points_is_none() {
        assert!(normalize_roi_points(&[], 640, 480).is_none());
        assert!(normalize_roi_points(&pts(&[(0.1, 0.1), (0.5, 0.5)]), 640, 480).is_none());
    }

    #[test]
    fn normalized_points_scale_to_frame() {
        let poly = normalize_roi_points(&pts(&[(0.0, 0.0), (0.5, 0.25), (1.0, 1.0)]), 640, 480).unwrap();
        assert_eq!(pixel_pairs(&poly), vec![(0, 0), (320, 120), (639, 479)]);
    }

    #[test]
    fn absolute_points_pass_through_with_clamping() {
        let poly = normalize_roi_points(&pts(&[(10.4, 10.6), (700.0, 10.0), (-5.0, 900.0)]), 640, 480).unwrap();
        assert_eq!(pixel_pairs(&poly), vec![(10, 11), (639, 10), (0, 479)]);
    }

    #[test]
    fn one_large_coordinate_makes_the_whole_set_absolute() {
        let poly = normalize_roi_points(&pts(&[(0.5, 0.5), (1.0, 0.5), (1.0, 2.0)]), 100, 100).unwrap();
        assert_eq!(pixel_pairs(&poly), vec![(0, 0), (1, 0), (1, 2)]);
    }

    #[test]
    fn rounding_is_half_to_even() {
        let poly = normalize_roi_points(&pts(&[(2.5, 3.5), (10.0, 2.0), (4.0, 8.0)]), 100, 100).unwrap();
        assert_eq!(poly.points()[0], PixelPoint { x: 2, y: 4 });
    }

    #[test]
    fn zero_sized_frame_is_a_geometry_error() {
        let err = try_normalize_roi_points(&pts(&[(0.1, 0.1), (0.2, 0.1), (0.2, 0.2)]), 0, 480).unwrap_err();
        assert!(matches!(err, Error::Geometry(_)));
    }

    #[test]
    fn mask_fills_polygon_interior_and_boundary() {
        let poly = normalize_roi_points(&pts(&[(10.0, 10.0), (20.0, 10.0), (20.0, 20.0), (10.0, 20.0)]), 32, 32).unwrap();
        let mask = build_roi_mask(32, 32, Some(&poly)).unwrap();
        assert_eq!(mask.dimensions(), (32, 32));
        assert_eq!(mask.get_pixel(15, 15).0[0], MASK_FOREGROUND);
        assert_eq!(mask.get_pixel(10, 10).0[0], MASK_FOREGROUND);
        assert_eq!(mask.get_pixel(20, 20).0[0], MASK_FOREGROUND);
        assert_eq!(mask.get_pixel(5, 5).0[0], 0);
        assert_eq!(mask.get_pixel(21, 15).0[0], 0);
        let filled = mask.pixels().filter(|p| p.0[0] == MASK_FOREGROUND).count();
        assert_eq!(filled, 11 * 11);
    }

    #[test]
    fn mask_without_polygon_is_none() {
        assert!(build_roi_mask(32, 32, None).is_none());
    }

    #[test]
    fn contains_counts_boundary_as_inside() {
        let poly = normalize_roi_points(&pts(&[(0.0, 0.0), (10.0, 0.0), (0.0, 10.0)]), 100, 100).unwrap();
        assert!(poly.contains(2.0, 2.0));
        assert!(poly.contains(5.0, 5.0));
        assert!(poly.contains(0.0, 7.0));
        assert!(!poly.contains(8.0, 8.0));
    }
}
