//! Captured frames.
//!
//! `CapturedFrame` is a packed RGB8 image as produced by a capture backend.
//! The ROI pipeline only needs its dimensions, a masked copy for inference,
//! and a JPEG encoding for telemetry.

use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::{GrayImage, RgbImage};

use crate::error::{Error, Result};

pub const JPEG_QUALITY: u8 = 80;

#[derive(Clone, Debug)]
pub struct CapturedFrame {
    image: RgbImage,
}

impl CapturedFrame {
    /// Wrap packed RGB8 bytes. Fails if the buffer length does not match.
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self> {
        let expected = width as usize * height as usize * 3;
        if pixels.len() != expected {
            return Err(Error::Capture(format!(
                "frame buffer is {} bytes, expected {} for {}x{} rgb",
                pixels.len(),
                expected,
                width,
                height
            )));
        }
        let image = RgbImage::from_raw(width, height, pixels)
            .ok_or_else(|| Error::Capture("frame buffer rejected".to_string()))?;
        Ok(Self { image })
    }

    pub fn from_image(image: RgbImage) -> Self {
        Self { image }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn pixels(&self) -> &[u8] {
        self.image.as_raw()
    }

    /// Copy with every pixel outside `mask` zeroed. The mask must match the
    /// frame dimensions.
    pub fn masked(&self, mask: &GrayImage) -> Result<CapturedFrame> {
        if mask.dimensions() != self.dimensions() {
            return Err(Error::Geometry(format!(
                "mask {:?} does not match frame {:?}",
                mask.dimensions(),
                self.dimensions()
            )));
        }
        let mut out = self.image.clone();
        for (pixel, keep) in out.pixels_mut().zip(mask.pixels()) {
            if keep.0[0] == 0 {
                pixel.0 = [0, 0, 0];
            }
        }
        Ok(CapturedFrame { image: out })
    }

    pub fn encode_jpeg(&self, quality: u8) -> Result<Vec<u8>> {
        let mut buf = Cursor::new(Vec::new());
        JpegEncoder::new_with_quality(&mut buf, quality).encode_image(&self.image)?;
        Ok(buf.into_inner())
    }
}
