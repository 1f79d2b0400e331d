//! Throttled, best-effort frame upload to the backend as a client attribute.
//!
//! The frame loop only clones a frame when an upload is due and hands it to
//! a single worker thread. If the worker is still busy with the previous
//! upload the new frame is dropped; nothing is retried inline.

use std::fmt;
use std::str::FromStr;
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::time::{Duration, Instant};

use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::frame::{CapturedFrame, JPEG_QUALITY};
use crate::task::BackgroundTask;
use crate::transport::BackendHttp;

pub const DEFAULT_FRAME_ATTRIBUTE: &str = "frame_base64";
pub const DEFAULT_PUSH_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameEncoding {
    #[default]
    Hex,
    Base64,
}

impl FromStr for FrameEncoding {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hex" => Ok(Self::Hex),
            "base64" => Ok(Self::Base64),
            other => Err(Error::Config(format!("unsupported frame encoding: {}", other))),
        }
    }
}

impl fmt::Display for FrameEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hex => write!(f, "hex"),
            Self::Base64 => write!(f, "base64"),
        }
    }
}

/// JPEG-encode `frame` and render it as text in `encoding`.
pub fn encode_frame_payload(frame: &CapturedFrame, encoding: FrameEncoding, quality: u8) -> Result<String> {
    let jpeg = frame.encode_jpeg(quality)?;
    Ok(match encoding {
        FrameEncoding::Hex => hex::encode(jpeg),
        FrameEncoding::Base64 => base64::engine::general_purpose::STANDARD.encode(jpeg),
    })
}

pub trait TelemetryUploader: Send {
    fn upload(&self, attributes: &Value) -> Result<()>;
}

impl TelemetryUploader for BackendHttp {
    fn upload(&self, attributes: &Value) -> Result<()> {
        self.post_attributes(attributes)
    }
}

#[derive(Clone, Debug)]
pub struct TelemetrySettings {
    pub attribute_key: String,
    pub encoding: FrameEncoding,
    pub interval: Duration,
    pub jpeg_quality: u8,
    pub verbose: bool,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            attribute_key: DEFAULT_FRAME_ATTRIBUTE.to_string(),
            encoding: FrameEncoding::Hex,
            interval: DEFAULT_PUSH_INTERVAL,
            jpeg_quality: JPEG_QUALITY,
            verbose: false,
        }
    }
}

pub struct TelemetryPusher {
    frames: SyncSender<CapturedFrame>,
    worker: BackgroundTask,
    interval: Duration,
    last_offer: Option<Instant>,
    dropped: u64,
}

impl TelemetryPusher {
    pub fn spawn<U>(uploader: U, settings: TelemetrySettings) -> std::io::Result<Self>
    where
        U: TelemetryUploader + 'static,
    {
        let (frames, rx) = mpsc::sync_channel(1);
        let interval = settings.interval;
        let worker = BackgroundTask::spawn("telemetry", move || run_uploads(uploader, settings, rx))?;
        Ok(Self {
            frames,
            worker,
            interval,
            last_offer: None,
            dropped: 0,
        })
    }

    /// Hand `frame` to the uploader if an upload is due. Returns true when
    /// the frame was queued.
    pub fn offer(&mut self, frame: &CapturedFrame, now: Instant) -> bool {
        if let Some(last) = self.last_offer {
            if now.duration_since(last) < self.interval {
                return false;
            }
        }
        self.last_offer = Some(now);
        match self.frames.try_send(frame.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.dropped += 1;
                log::debug!("telemetry upload still in flight; frame skipped");
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    /// Frames skipped because the previous upload had not finished.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Close the queue and wait at most `timeout` for the worker.
    pub fn stop(self, timeout: Duration) -> bool {
        drop(self.frames);
        self.worker.join_timeout(timeout)
    }
}

fn run_uploads<U: TelemetryUploader>(uploader: U, settings: TelemetrySettings, frames: Receiver<CapturedFrame>) {
    for frame in frames {
        let value = match encode_frame_payload(&frame, settings.encoding, settings.jpeg_quality) {
            Ok(value) => value,
            Err(err) => {
                log::warn!("telemetry frame skipped: {}", err);
                continue;
            }
        };
        let mut attributes = Map::new();
        attributes.insert(settings.attribute_key.clone(), Value::String(value));
        match uploader.upload(&Value::Object(attributes)) {
            Ok(()) if settings.verbose => log::info!(
                "frame uploaded ({}, encoding={})",
                settings.attribute_key,
                settings.encoding
            ),
            Ok(()) => {}
            Err(err) => log::warn!("could not upload frame: {}", err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Recorder(Arc<Mutex<Vec<Value>>>);

    impl TelemetryUploader for Recorder {
        fn upload(&self, attributes: &Value) -> Result<()> {
            self.0.lock().unwrap().push(attributes.clone());
            Ok(())
        }
    }

    struct Failing;

    impl TelemetryUploader for Failing {
        fn upload(&self, _: &Value) -> Result<()> {
            Err(Error::Transport("connection refused".into()))
        }
    }

    fn frame() -> CapturedFrame {
        CapturedFrame::new(8, 8, vec![90; 8 * 8 * 3]).unwrap()
    }

    #[test]
    fn encoding_parses_case_insensitively() {
        assert_eq!("HEX".parse::<FrameEncoding>().unwrap(), FrameEncoding::Hex);
        assert_eq!("base64".parse::<FrameEncoding>().unwrap(), FrameEncoding::Base64);
        assert!("png".parse::<FrameEncoding>().is_err());
    }

    #[test]
    fn payload_is_jpeg_in_requested_text_form() {
        let hex = encode_frame_payload(&frame(), FrameEncoding::Hex, JPEG_QUALITY).unwrap();
        assert!(hex.starts_with("ffd8"));
        let b64 = encode_frame_payload(&frame(), FrameEncoding::Base64, JPEG_QUALITY).unwrap();
        assert!(b64.starts_with("/9j/"));
    }

    #[test]
    fn offers_are_throttled_to_interval() {
        let recorder = Recorder::default();
        let mut pusher = TelemetryPusher::spawn(recorder.clone(), TelemetrySettings::default()).unwrap();
        let start = Instant::now();
        assert!(pusher.offer(&frame(), start));
        assert!(!pusher.offer(&frame(), start + Duration::from_millis(400)));
        assert!(pusher.stop(Duration::from_secs(5)));

        let uploads = recorder.0.lock().unwrap();
        assert_eq!(uploads.len(), 1);
        let value = uploads[0][DEFAULT_FRAME_ATTRIBUTE].as_str().unwrap();
        assert!(value.starts_with("ffd8"));
    }

    #[test]
    fn upload_failures_are_contained() {
        let mut pusher = TelemetryPusher::spawn(Failing, TelemetrySettings::default()).unwrap();
        let start = Instant::now();
        pusher.offer(&frame(), start);
        pusher.offer(&frame(), start + Duration::from_secs(2));
        assert!(pusher.stop(Duration::from_secs(5)));
    }
}
