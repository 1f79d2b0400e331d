//! Video acquisition.
//!
//! - `VideoSource`: the capture primitive (open, read, release).
//! - `RtspSource`: network cameras via GStreamer (feature: rtsp-gstreamer),
//!   with a synthetic backend for `stub://` URLs.
//! - `CaptureSupervisor`: bounded open retries and reopen-on-failure policy
//!   around any `VideoSource`.

pub mod rtsp;
pub mod supervisor;

pub use rtsp::{RtspConfig, RtspSource, RtspStats};
pub use supervisor::{CapturePolicy, CaptureStats, CaptureSupervisor};

use crate::error::Result;
use crate::frame::CapturedFrame;

pub trait VideoSource: Send {
    /// Open (or reopen) the underlying handle.
    fn open(&mut self) -> Result<()>;

    /// Reduce internal buffering to the minimum the backend supports.
    fn set_min_buffering(&mut self) -> Result<()> {
        Ok(())
    }

    /// `Ok(None)` is an empty read (stall, timeout, dropped packet).
    fn read_frame(&mut self) -> Result<Option<CapturedFrame>>;

    /// Release the handle. Safe to call when not open.
    fn release(&mut self);

    /// Human-readable source name for logs.
    fn describe(&self) -> String;
}
