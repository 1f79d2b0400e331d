//! Region-of-interest core.
//!
//! - `payload`: polygon extraction from loosely-typed backend payloads
//! - `geometry`: pixel-space normalization, masks, point-in-polygon
//! - `coordinator`: the single versioned ROI state shared by all channels
//!
//! Points enter as `RoiPoint` (normalized or absolute, undecided) and only
//! become pixel coordinates inside the frame loop, once the frame size is known.

pub mod coordinator;
pub mod geometry;
mod literal;
pub mod payload;

pub use coordinator::{RoiSignature, RoiSnapshot, RoiStatus, RoiSyncCoordinator};
pub use geometry::{build_roi_mask, normalize_roi_points, CoordinateSpace, PixelPoint, PixelPolygon};
pub use payload::{ParsedRoi, RoiPayloadParser, ROI_CONFIG_KEY, ROI_POINTS_KEY};

/// Minimum number of vertices for a usable polygon.
pub const MIN_POLYGON_POINTS: usize = 3;

/// A polygon vertex in source coordinates.
///
/// Whether the pair is a 0..1 fraction or an absolute pixel position is not
/// known until the whole point set is inspected (see `geometry::coordinate_space`).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RoiPoint {
    pub x: f64,
    pub y: f64,
}

impl RoiPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

impl From<(f64, f64)> for RoiPoint {
    fn from((x, y): (f64, f64)) -> Self {
        Self { x, y }
    }
}

/// Flattens a polygon to the interleaved `x,y,x,y,...` form the dashboard widget stores.
pub fn flatten_points(points: &[RoiPoint]) -> Vec<f64> {
    points.iter().flat_map(|p| [p.x, p.y]).collect()
}
