//! Detection collaborator boundary and ROI post-filter.

mod backend;
mod backends;
mod result;

pub use backend::{DetectParams, DetectorBackend, DEFAULT_MIN_CONFIDENCE, PERSON_CLASS_ID};
pub use backends::StubBackend;
pub use result::Detection;

use crate::roi::PixelPolygon;

/// Keep detections whose box center lies inside or on the polygon.
/// Without a polygon every detection is kept.
pub fn filter_to_roi(detections: Vec<Detection>, polygon: Option<&PixelPolygon>) -> Vec<Detection> {
    let Some(polygon) = polygon else {
        return detections;
    };
    detections
        .into_iter()
        .filter(|d| {
            let (cx, cy) = d.center();
            polygon.contains(cx as f64, cy as f64)
        })
        .collect()
}
