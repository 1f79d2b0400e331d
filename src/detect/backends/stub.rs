use anyhow::Result;
use image::RgbImage;
use sha2::{Digest, Sha256};

use crate::detect::backend::{DetectParams, DetectorBackend, PERSON_CLASS_ID};
use crate::detect::result::Detection;

const GRID: u32 = 8;
const STUB_CONFIDENCE: f32 = 0.85;

/// Stub backend for running without a model. Hashes an 8x8 grid of cells
/// and reports the bounding box of cells that changed since the previous
/// frame as a single "person".
pub struct StubBackend {
    last_hashes: Option<Vec<[u8; 32]>>,
}

impl StubBackend {
    pub fn new() -> Self {
        Self { last_hashes: None }
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn cell_bounds(index: u32, cells: u32, extent: u32) -> (u32, u32) {
    (index * extent / cells, (index + 1) * extent / cells)
}

fn hash_cells(image: &RgbImage) -> Vec<[u8; 32]> {
    let (width, height) = image.dimensions();
    let mut hashes = Vec::with_capacity((GRID * GRID) as usize);
    for gy in 0..GRID {
        let (y0, y1) = cell_bounds(gy, GRID, height);
        for gx in 0..GRID {
            let (x0, x1) = cell_bounds(gx, GRID, width);
            let mut hasher = Sha256::new();
            for y in y0..y1 {
                for x in x0..x1 {
                    hasher.update(image.get_pixel(x, y).0);
                }
            }
            hashes.push(hasher.finalize().into());
        }
    }
    hashes
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, image: &RgbImage, params: &DetectParams) -> Result<Vec<Detection>> {
        let current = hash_cells(image);
        let previous = self.last_hashes.replace(current.clone());
        let Some(previous) = previous else {
            return Ok(Vec::new());
        };

        let (width, height) = image.dimensions();
        let mut bounds: Option<(u32, u32, u32, u32)> = None;
        for (i, (now, before)) in current.iter().zip(previous.iter()).enumerate() {
            if now == before {
                continue;
            }
            let (gx, gy) = (i as u32 % GRID, i as u32 / GRID);
            let (x0, x1) = cell_bounds(gx, GRID, width);
            let (y0, y1) = cell_bounds(gy, GRID, height);
            bounds = Some(match bounds {
                None => (x0, y0, x1, y1),
                Some((bx0, by0, bx1, by1)) => (bx0.min(x0), by0.min(y0), bx1.max(x1), by1.max(y1)),
            });
        }

        let detections = bounds
            .map(|(x0, y0, x1, y1)| Detection {
                x1: x0 as f32,
                y1: y0 as f32,
                x2: x1 as f32,
                y2: y1 as f32,
                confidence: STUB_CONFIDENCE,
                class_id: PERSON_CLASS_ID,
                label: "person".to_string(),
            })
            .into_iter()
            .filter(|d| params.accepts(d))
            .collect();
        Ok(detections)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn first_frame_is_baseline() {
        let mut backend = StubBackend::new();
        let image = RgbImage::new(64, 64);
        assert!(backend.detect(&image, &DetectParams::default()).unwrap().is_empty());
        assert!(backend.detect(&image, &DetectParams::default()).unwrap().is_empty());
    }

    #[test]
    fn changed_cells_become_one_box() {
        let mut backend = StubBackend::new();
        let mut image = RgbImage::new(64, 64);
        backend.detect(&image, &DetectParams::default()).unwrap();

        image.put_pixel(20, 20, Rgb([255, 0, 0]));
        image.put_pixel(40, 20, Rgb([255, 0, 0]));
        let detections = backend.detect(&image, &DetectParams::default()).unwrap();
        assert_eq!(detections.len(), 1);
        let d = &detections[0];
        assert_eq!((d.x1, d.y1, d.x2, d.y2), (16.0, 16.0, 48.0, 24.0));
        assert_eq!(d.class_id, PERSON_CLASS_ID);
    }

    #[test]
    fn params_filter_stub_output() {
        let mut backend = StubBackend::new();
        let mut image = RgbImage::new(16, 16);
        backend.detect(&image, &DetectParams::default()).unwrap();
        image.put_pixel(1, 1, Rgb([9, 9, 9]));
        let strict = DetectParams {
            min_confidence: 0.9,
            classes: vec![PERSON_CLASS_ID],
        };
        assert!(backend.detect(&image, &strict).unwrap().is_empty());
    }
}
