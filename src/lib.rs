//! ROI Gate
//!
//! Runs live video through an object detector while a user-editable region
//! of interest (ROI) polygon is kept in sync from a device-management backend.
//!
//! # Architecture
//!
//! Two independent, unreliable channels feed one versioned ROI state:
//!
//! 1. **Push**: an MQTT session subscribed to attribute changes, with
//!    correlated request/response resyncs (`transport::PushChannel`).
//! 2. **Poll**: a periodic HTTP fetch that converges even when MQTT never
//!    connects (`transport::PollFallbackChannel`).
//!
//! Both parse through `roi::RoiPayloadParser` and write to
//! `roi::RoiSyncCoordinator`. The frame loop reads snapshots through
//! `gate::FrameGate`, which caches pixel geometry per version and decides
//! whether each frame may reach the detector. `ingest::CaptureSupervisor`
//! keeps the video source open across transient failures and
//! `telemetry::TelemetryPusher` uploads throttled JPEG frames.
//!
//! # Module Structure
//!
//! - `roi`: payload parsing, geometry, the coordinator
//! - `transport`: MQTT push, HTTP poll, TLS endpoint selection
//! - `ingest`: video sources and capture supervision
//! - `gate`: per-frame ROI admission
//! - `detect`: detector collaborator boundary and ROI post-filter
//! - `telemetry`: frame upload
//! - `runtime`: the sync context shared by the channels and the frame loop
//! - `config`: file + environment configuration

pub mod config;
pub mod detect;
pub mod error;
pub mod frame;
pub mod gate;
pub mod ingest;
pub mod roi;
pub mod runtime;
pub mod task;
pub mod telemetry;
pub mod transport;
pub mod ui;

pub use config::RoiGateConfig;
pub use detect::{filter_to_roi, DetectParams, Detection, DetectorBackend, StubBackend};
pub use error::{Error, Result};
pub use frame::CapturedFrame;
pub use gate::{Admission, FrameGate};
pub use ingest::{CapturePolicy, CaptureSupervisor, RtspConfig, RtspSource, VideoSource};
pub use roi::{
    build_roi_mask, normalize_roi_points, ParsedRoi, PixelPolygon, RoiPayloadParser, RoiPoint,
    RoiStatus, RoiSyncCoordinator,
};
pub use runtime::{RoiRuntime, SyncSettings};
pub use task::{BackgroundTask, StopSignal};
pub use telemetry::{encode_frame_payload, FrameEncoding, TelemetryPusher};
