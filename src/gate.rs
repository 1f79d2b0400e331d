//! Per-frame ROI gate between the coordinator and the detector.
//!
//! Pixel geometry is cached and rebuilt only when the coordinator version
//! moves, a force reset is observed, or the frame size changes.

use std::sync::Arc;

use image::GrayImage;

use crate::frame::CapturedFrame;
use crate::roi::{build_roi_mask, normalize_roi_points, PixelPolygon, RoiPoint, RoiSyncCoordinator};

/// Decision for one frame.
#[derive(Debug)]
pub enum Admission {
    /// ROI ready: run detection on this masked copy.
    Masked(CapturedFrame),
    /// No ROI but detection without ROI is allowed: use the raw frame.
    Unmasked,
    /// No ROI: skip detection for this frame.
    Suppressed,
}

impl Admission {
    pub fn allows_inference(&self) -> bool {
        !matches!(self, Self::Suppressed)
    }
}

pub struct FrameGate {
    coordinator: Arc<RoiSyncCoordinator>,
    detect_without_roi: bool,
    applied_version: Option<u64>,
    applied_size: Option<(u32, u32)>,
    polygon: Option<PixelPolygon>,
    mask: Option<GrayImage>,
    rebuilds: u64,
}

impl FrameGate {
    pub fn new(coordinator: Arc<RoiSyncCoordinator>, detect_without_roi: bool) -> Self {
        Self {
            coordinator,
            detect_without_roi,
            applied_version: None,
            applied_size: None,
            polygon: None,
            mask: None,
            rebuilds: 0,
        }
    }

    pub fn admit(&mut self, frame: &CapturedFrame) -> Admission {
        let snapshot = self.coordinator.snapshot();
        if snapshot.force_reset {
            self.polygon = None;
            self.mask = None;
            self.applied_version = None;
        }

        let size = frame.dimensions();
        if self.applied_version != Some(snapshot.version) || self.applied_size != Some(size) {
            self.rebuild(snapshot.points.as_deref(), size);
            self.applied_version = Some(snapshot.version);
            self.applied_size = Some(size);
        }

        match &self.mask {
            Some(mask) => match frame.masked(mask) {
                Ok(masked) => Admission::Masked(masked),
                Err(err) => {
                    log::debug!("roi mask not applied: {}", err);
                    Admission::Suppressed
                }
            },
            None if self.detect_without_roi => Admission::Unmasked,
            None => Admission::Suppressed,
        }
    }

    fn rebuild(&mut self, points: Option<&[RoiPoint]>, (width, height): (u32, u32)) {
        self.rebuilds += 1;
        let Some(points) = points.filter(|p| !p.is_empty()) else {
            self.polygon = None;
            self.mask = None;
            return;
        };
        self.polygon = normalize_roi_points(points, width, height);
        self.mask = build_roi_mask(width, height, self.polygon.as_ref());
        if self.polygon.is_none() {
            log::warn!("roi is not a usable polygon; detection paused");
        }
    }

    /// Pixel polygon for the current frame size, for overlay and filtering.
    pub fn polygon(&self) -> Option<&PixelPolygon> {
        self.polygon.as_ref()
    }

    pub fn is_ready(&self) -> bool {
        self.mask.is_some()
    }

    /// Times geometry has been rebuilt.
    pub fn rebuild_count(&self) -> u64 {
        self.rebuilds
    }
}
