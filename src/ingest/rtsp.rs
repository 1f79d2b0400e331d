//! RTSP / network video source.
//!
//! Real streams are decoded with GStreamer. `stub://` URLs produce
//! synthetic frames so the full pipeline can run without a camera.

#[cfg(feature = "rtsp-gstreamer")]
use gstreamer::prelude::*;
#[cfg(feature = "rtsp-gstreamer")]
use std::time::Duration;

use super::VideoSource;
use crate::error::{Error, Result};
use crate::frame::CapturedFrame;

#[derive(Clone, Debug)]
pub struct RtspConfig {
    /// `rtsp://...`, any GStreamer URI, or `stub://name` for synthetic frames.
    pub url: String,
    pub target_fps: u32,
    /// Frame width for synthetic frames.
    pub width: u32,
    /// Frame height for synthetic frames.
    pub height: u32,
}

impl Default for RtspConfig {
    fn default() -> Self {
        Self {
            url: "rtsp://localhost:554/stream".to_string(),
            target_fps: 10,
            width: 640,
            height: 480,
        }
    }
}

impl RtspConfig {
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }
}

pub struct RtspSource {
    backend: RtspBackend,
}

enum RtspBackend {
    Synthetic(SyntheticSource),
    #[cfg(feature = "rtsp-gstreamer")]
    Gstreamer(GstreamerSource),
}

impl RtspSource {
    pub fn new(config: RtspConfig) -> Result<Self> {
        if config.url.starts_with("stub://") {
            return Ok(Self {
                backend: RtspBackend::Synthetic(SyntheticSource::new(config)),
            });
        }
        #[cfg(feature = "rtsp-gstreamer")]
        {
            Ok(Self {
                backend: RtspBackend::Gstreamer(GstreamerSource::new(config)?),
            })
        }
        #[cfg(not(feature = "rtsp-gstreamer"))]
        {
            Err(Error::Capture(format!(
                "{} requires the rtsp-gstreamer feature",
                config.url
            )))
        }
    }

    pub fn stats(&self) -> RtspStats {
        match &self.backend {
            RtspBackend::Synthetic(source) => source.stats(),
            #[cfg(feature = "rtsp-gstreamer")]
            RtspBackend::Gstreamer(source) => source.stats(),
        }
    }
}

impl VideoSource for RtspSource {
    fn open(&mut self) -> Result<()> {
        match &mut self.backend {
            RtspBackend::Synthetic(source) => source.open(),
            #[cfg(feature = "rtsp-gstreamer")]
            RtspBackend::Gstreamer(source) => source.open(),
        }
    }

    fn set_min_buffering(&mut self) -> Result<()> {
        match &mut self.backend {
            RtspBackend::Synthetic(_) => Ok(()),
            #[cfg(feature = "rtsp-gstreamer")]
            RtspBackend::Gstreamer(source) => source.set_min_buffering(),
        }
    }

    fn read_frame(&mut self) -> Result<Option<CapturedFrame>> {
        match &mut self.backend {
            RtspBackend::Synthetic(source) => source.read_frame(),
            #[cfg(feature = "rtsp-gstreamer")]
            RtspBackend::Gstreamer(source) => source.read_frame(),
        }
    }

    fn release(&mut self) {
        match &mut self.backend {
            RtspBackend::Synthetic(source) => source.is_open = false,
            #[cfg(feature = "rtsp-gstreamer")]
            RtspBackend::Gstreamer(source) => source.release(),
        }
    }

    fn describe(&self) -> String {
        self.stats().url
    }
}

#[derive(Clone, Debug)]
pub struct RtspStats {
    pub frames_read: u64,
    pub url: String,
}

// stub:// frames

struct SyntheticSource {
    config: RtspConfig,
    frames: u64,
    phase: u8,
    is_open: bool,
}

impl SyntheticSource {
    fn new(config: RtspConfig) -> Self {
        Self {
            config,
            frames: 0,
            phase: 0,
            is_open: false,
        }
    }

    fn open(&mut self) -> Result<()> {
        if self.config.width == 0 || self.config.height == 0 {
            return Err(Error::Capture(format!(
                "synthetic source {} has empty frame size",
                self.config.url
            )));
        }
        self.is_open = true;
        log::info!("RtspSource: opened {} (synthetic)", self.config.url);
        Ok(())
    }

    fn read_frame(&mut self) -> Result<Option<CapturedFrame>> {
        if !self.is_open {
            return Ok(None);
        }
        self.frames += 1;
        let pixels = self.generate_pixels();
        CapturedFrame::new(self.config.width, self.config.height, pixels).map(Some)
    }

    /// Mostly static background; the scene shifts every 50 frames.
    fn generate_pixels(&mut self) -> Vec<u8> {
        let pixel_count = (self.config.width * self.config.height * 3) as usize;
        if self.frames % 50 == 0 {
            self.phase = self.phase.wrapping_add(1);
        }
        (0..pixel_count)
            .map(|i| ((i as u64 + self.phase as u64 * 37) % 256) as u8)
            .collect()
    }

    fn stats(&self) -> RtspStats {
        RtspStats {
            frames_read: self.frames,
            url: self.config.url.clone(),
        }
    }
}

// GStreamer decode

#[cfg(feature = "rtsp-gstreamer")]
struct GstreamerSource {
    config: RtspConfig,
    pipeline: Option<(gstreamer::Pipeline, gstreamer_app::AppSink)>,
    frames: u64,
}

#[cfg(feature = "rtsp-gstreamer")]
fn capture_err(context: &str, err: impl std::fmt::Display) -> Error {
    Error::Capture(format!("{}: {}", context, err))
}

#[cfg(feature = "rtsp-gstreamer")]
impl GstreamerSource {
    fn new(config: RtspConfig) -> Result<Self> {
        gstreamer::init().map_err(|e| capture_err("initialize gstreamer", e))?;
        Ok(Self {
            config,
            pipeline: None,
            frames: 0,
        })
    }

    fn pipeline_description(&self) -> String {
        let decode = if self.config.url.starts_with("rtsp://") || self.config.url.starts_with("rtsps://") {
            format!("rtspsrc location={} latency=0 ! decodebin", self.config.url)
        } else {
            format!("uridecodebin uri={}", self.config.url)
        };
        format!(
            "{} ! videoconvert ! video/x-raw,format=RGB ! appsink name=appsink sync=false",
            decode
        )
    }

    fn open(&mut self) -> Result<()> {
        self.release();
        let pipeline = gstreamer::parse::launch(&self.pipeline_description())
            .map_err(|e| capture_err("build pipeline", e))?
            .downcast::<gstreamer::Pipeline>()
            .map_err(|_| Error::Capture("pipeline is not a Pipeline".to_string()))?;
        let appsink = pipeline
            .by_name("appsink")
            .ok_or_else(|| Error::Capture("appsink element missing from pipeline".to_string()))?
            .downcast::<gstreamer_app::AppSink>()
            .map_err(|_| Error::Capture("appsink element has unexpected type".to_string()))?;
        let caps = gstreamer::Caps::builder("video/x-raw")
            .field("format", "RGB")
            .build();
        appsink.set_caps(Some(&caps));

        pipeline
            .set_state(gstreamer::State::Playing)
            .map_err(|e| capture_err("set pipeline to Playing", e))?;
        log::info!("RtspSource: opened {}", self.config.url);
        self.pipeline = Some((pipeline, appsink));
        Ok(())
    }

    fn set_min_buffering(&mut self) -> Result<()> {
        let (_, appsink) = self
            .pipeline
            .as_ref()
            .ok_or_else(|| Error::Capture("source not open".to_string()))?;
        appsink.set_max_buffers(1);
        appsink.set_drop(true);
        appsink.set_sync(false);
        Ok(())
    }

    fn read_frame(&mut self) -> Result<Option<CapturedFrame>> {
        let Some((pipeline, appsink)) = self.pipeline.as_ref() else {
            return Ok(None);
        };
        if let Some(reason) = bus_error(pipeline) {
            return Err(Error::Capture(reason));
        }
        let Some(sample) = appsink.try_pull_sample(gstreamer::ClockTime::from_mseconds(
            self.frame_timeout().as_millis() as u64,
        )) else {
            return Ok(None);
        };
        let (pixels, width, height) = sample_to_pixels(&sample)?;
        self.frames += 1;
        CapturedFrame::new(width, height, pixels).map(Some)
    }

    fn release(&mut self) {
        if let Some((pipeline, _)) = self.pipeline.take() {
            if let Err(err) = pipeline.set_state(gstreamer::State::Null) {
                log::debug!("RtspSource: stop pipeline: {}", err);
            }
        }
    }

    fn stats(&self) -> RtspStats {
        RtspStats {
            frames_read: self.frames,
            url: self.config.url.clone(),
        }
    }

    /// Four frame periods, never below half a second.
    fn frame_timeout(&self) -> Duration {
        let period_ms = 1000u64.checked_div(u64::from(self.config.target_fps)).unwrap_or(0);
        Duration::from_millis((period_ms * 4).max(500))
    }
}

#[cfg(feature = "rtsp-gstreamer")]
impl Drop for GstreamerSource {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(feature = "rtsp-gstreamer")]
fn bus_error(pipeline: &gstreamer::Pipeline) -> Option<String> {
    use gstreamer::MessageView;

    let bus = pipeline.bus()?;
    while let Some(message) = bus.timed_pop(gstreamer::ClockTime::ZERO) {
        match message.view() {
            MessageView::Error(err) => {
                return Some(format!(
                    "gstreamer error from {:?}: {}",
                    err.src().map(|s| s.path_string()),
                    err.error()
                ))
            }
            MessageView::Eos(..) => return Some("gstreamer reached EOS".to_string()),
            _ => {}
        }
    }
    None
}

#[cfg(feature = "rtsp-gstreamer")]
fn sample_to_pixels(sample: &gstreamer::Sample) -> Result<(Vec<u8>, u32, u32)> {
    let buffer = sample
        .buffer()
        .ok_or_else(|| Error::Capture("sample missing buffer".to_string()))?;
    let caps = sample
        .caps()
        .ok_or_else(|| Error::Capture("sample missing caps".to_string()))?;
    let info = gstreamer_video::VideoInfo::from_caps(caps)
        .map_err(|e| capture_err("parse caps as video info", e))?;

    let (width, height) = (info.width(), info.height());
    let packed_row = width as usize * 3;
    let stride = usize::try_from(info.stride()[0]).unwrap_or(packed_row).max(packed_row);

    let map = buffer
        .map_readable()
        .map_err(|e| capture_err("map buffer", e))?;

    // Rows may be padded to the stride; keep only the packed RGB bytes.
    let mut pixels = Vec::with_capacity(packed_row * height as usize);
    for row in map.as_slice().chunks(stride).take(height as usize) {
        let packed = row
            .get(..packed_row)
            .ok_or_else(|| Error::Capture("truncated frame row".to_string()))?;
        pixels.extend_from_slice(packed);
    }
    Ok((pixels, width, height))
}
