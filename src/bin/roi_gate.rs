//! roi_gate - ROI-gated detection over a resilient video source.
//!
//! Keeps the ROI polygon in sync from the device backend (MQTT push with
//! HTTP poll fallback), runs the detector only inside the ROI, and uploads
//! a throttled JPEG of the current frame as a client attribute.

use anyhow::{Context, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use roi_gate::config::RoiGateConfig;
use roi_gate::detect::{filter_to_roi, DetectParams, Detection, DetectorBackend, StubBackend};
use roi_gate::gate::{Admission, FrameGate};
use roi_gate::ingest::{CaptureSupervisor, RtspSource, VideoSource};
use roi_gate::runtime::{RoiRuntime, DEFAULT_SHUTDOWN_TIMEOUT};
use roi_gate::telemetry::TelemetryPusher;
use roi_gate::transport::{BackendHttp, DEFAULT_HTTP_TIMEOUT};
use roi_gate::ui::{Ui, UiMode};

const STATUS_LOG_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "ROI-gated object detection with backend-synced region of interest"
)]
struct Args {
    /// Config file (JSON, or TOML with a .toml extension).
    #[arg(long, env = "ROI_GATE_CONFIG")]
    config: Option<PathBuf>,

    /// Video source URL (rtsp://..., or stub://name for synthetic frames).
    #[arg(long, env = "ROI_GATE_SOURCE")]
    source: Option<String>,

    /// Device backend base URL, e.g. http://localhost:8080.
    #[arg(long, env = "ROI_GATE_BACKEND_URL")]
    backend_url: Option<String>,

    /// Device access token (MQTT username and HTTP path segment).
    #[arg(long, env = "ROI_GATE_ACCESS_TOKEN", hide_env_values = true)]
    access_token: Option<String>,

    /// Run detection on the full frame while no ROI is available.
    #[arg(long)]
    detect_without_roi: bool,

    /// Do not upload frames to the backend.
    #[arg(long)]
    no_telemetry: bool,

    /// Log every ROI update and dropped message.
    #[arg(long, short)]
    verbose: bool,

    /// Terminal output style.
    #[arg(long, value_enum, default_value_t = UiMode::Auto)]
    ui: UiMode,
}

impl Args {
    fn apply(&self, cfg: &mut RoiGateConfig) {
        if let Some(source) = &self.source {
            cfg.source.url = source.clone();
        }
        if let Some(url) = &self.backend_url {
            cfg.backend.url = url.clone();
        }
        if let Some(token) = &self.access_token {
            cfg.backend.access_token = token.clone();
        }
        if self.detect_without_roi {
            cfg.detection.detect_without_roi = true;
        }
        if self.no_telemetry {
            cfg.telemetry.enabled = false;
        }
        if self.verbose {
            cfg.verbose = true;
        }
    }
}

#[derive(Default)]
struct LoopStats {
    frames: u64,
    inferred: u64,
    suppressed: u64,
    detections: u64,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let default_filter = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter)).init();
    let ui = Ui::new(args.ui, std::io::stderr().is_terminal());

    let cfg = {
        let _stage = ui.stage("Load configuration");
        RoiGateConfig::load_with_overrides(args.config.as_deref(), |cfg| args.apply(cfg))?
    };

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = Arc::clone(&shutdown);
        ctrlc::set_handler(move || shutdown.store(true, Ordering::SeqCst))
            .context("install Ctrl-C handler")?;
    }

    let runtime = {
        let _stage = ui.stage("Sync ROI from backend");
        RoiRuntime::start(cfg.sync_settings())
    };

    let mut capture = CaptureSupervisor::new(RtspSource::new(cfg.rtsp_config())?, cfg.capture_policy());
    {
        let stage = ui.stage("Open video source");
        if let Err(err) = capture.open() {
            stage.fail("unavailable");
            runtime.shutdown(DEFAULT_SHUTDOWN_TIMEOUT);
            return Err(err).context("video source unavailable");
        }
    }

    let mut telemetry = if cfg.telemetry.enabled {
        let http = BackendHttp::new(&cfg.backend.url, &cfg.backend.access_token, DEFAULT_HTTP_TIMEOUT);
        Some(TelemetryPusher::spawn(http, cfg.telemetry_settings()).context("start telemetry uploader")?)
    } else {
        None
    };

    let mut detector: Box<dyn DetectorBackend> = Box::new(StubBackend::new());
    {
        let _stage = ui.stage("Warm up detector");
        detector.warm_up()?;
    }
    let params = cfg.detect_params();
    let coordinator = runtime.coordinator();
    let mut gate = FrameGate::new(Arc::clone(&coordinator), cfg.detection.detect_without_roi);
    let mut status = ui.status_line();

    log::info!(
        "roi_gate running: source={} backend={} detector={}",
        capture.source().describe(),
        cfg.backend.url,
        detector.name()
    );

    let mut stats = LoopStats::default();
    let mut window_start = Instant::now();
    let mut window_frames = 0u64;

    while !shutdown.load(Ordering::SeqCst) {
        let Some(frame) = capture.next_frame() else {
            continue;
        };
        stats.frames += 1;
        window_frames += 1;
        let now = Instant::now();

        if let Some(pusher) = telemetry.as_mut() {
            pusher.offer(&frame, now);
        }

        let admission = gate.admit(&frame);
        status.set_roi_ready(coordinator.status(), gate.is_ready());
        let detections = match admission {
            Admission::Masked(masked) => run_detector(detector.as_mut(), masked.image(), &params),
            Admission::Unmasked => run_detector(detector.as_mut(), frame.image(), &params),
            Admission::Suppressed => None,
        };
        match detections {
            Some(found) => {
                stats.inferred += 1;
                let kept = filter_to_roi(found, gate.polygon());
                stats.detections += kept.len() as u64;
                for d in &kept {
                    log::debug!(
                        "{} {:.2} at ({:.0},{:.0})-({:.0},{:.0})",
                        d.label,
                        d.confidence,
                        d.x1,
                        d.y1,
                        d.x2,
                        d.y2
                    );
                }
            }
            None => stats.suppressed += 1,
        }

        let elapsed = now.duration_since(window_start);
        if elapsed >= STATUS_LOG_INTERVAL {
            let fps = window_frames as f64 / elapsed.as_secs_f64();
            let roi_status = coordinator.status();
            let capture_stats = capture.stats();
            log::info!(
                "roi={} mqtt={:?} fps={:.1} frames={} inferred={} suppressed={} detections={} read_failures={} reopens={}",
                roi_status,
                runtime.push_state(),
                fps,
                stats.frames,
                stats.inferred,
                stats.suppressed,
                stats.detections,
                capture_stats.read_failures,
                capture_stats.reopens
            );
            status.update(
                roi_status,
                gate.is_ready(),
                &format!("{:.1} fps, {} detections", fps, stats.detections),
            );
            window_start = now;
            window_frames = 0;
        }
    }

    log::info!("shutdown signal received, stopping...");
    status.finish();
    if !runtime.shutdown(DEFAULT_SHUTDOWN_TIMEOUT) {
        log::warn!("roi sync workers did not stop in time");
    }
    if let Some(pusher) = telemetry {
        pusher.stop(DEFAULT_SHUTDOWN_TIMEOUT);
    }
    capture.release();
    Ok(())
}

/// Detector failures are logged and the frame counts as having no detections.
fn run_detector(
    detector: &mut dyn DetectorBackend,
    image: &image::RgbImage,
    params: &DetectParams,
) -> Option<Vec<Detection>> {
    match detector.detect(image, params) {
        Ok(found) => Some(found),
        Err(err) => {
            log::warn!("detector {} failed: {:#}", detector.name(), err);
            Some(Vec::new())
        }
    }
}
