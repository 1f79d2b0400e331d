use anyhow::Result;
use image::RgbImage;

use crate::detect::result::Detection;

/// COCO class id of "person", the default class filter.
pub const PERSON_CLASS_ID: u32 = 0;
pub const DEFAULT_MIN_CONFIDENCE: f32 = 0.35;

/// Per-call detection parameters.
#[derive(Clone, Debug, PartialEq)]
pub struct DetectParams {
    pub min_confidence: f32,
    /// Class ids to keep. Empty keeps every class.
    pub classes: Vec<u32>,
}

impl Default for DetectParams {
    fn default() -> Self {
        Self {
            min_confidence: DEFAULT_MIN_CONFIDENCE,
            classes: vec![PERSON_CLASS_ID],
        }
    }
}

impl DetectParams {
    pub fn accepts(&self, detection: &Detection) -> bool {
        detection.confidence >= self.min_confidence
            && (self.classes.is_empty() || self.classes.contains(&detection.class_id))
    }
}

/// Object detector collaborator.
///
/// The frame may already be ROI-masked; pixels outside the region are black.
/// Implementations must apply `params` before returning.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    fn detect(&mut self, image: &RgbImage, params: &DetectParams) -> Result<Vec<Detection>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
