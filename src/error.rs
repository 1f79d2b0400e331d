//! Error taxonomy for the ROI pipeline.
//!
//! Every variant is contained at the component that produced it and turned
//! into a state transition (status flag, retry, skipped frame). Only
//! `Capture` from the initial open is allowed to reach `main`.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// MQTT connect/publish or HTTP request failure. Retried by backoff or next tick.
    #[error("transport error: {0}")]
    Transport(String),

    /// Malformed ROI payload. Degrades to "no ROI found".
    #[error("payload parse error: {0}")]
    Parse(String),

    /// Insufficient or invalid ROI points. Degrades to "ROI not ready".
    #[error("roi geometry error: {0}")]
    Geometry(String),

    /// Video source open/read failure.
    #[error("capture unavailable: {0}")]
    Capture(String),

    /// JPEG encode failure for telemetry.
    #[error("frame encoding error: {0}")]
    Encoding(String),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<ureq::Error> for Error {
    fn from(err: ureq::Error) -> Self {
        Error::Transport(err.to_string())
    }
}

impl From<rumqttc::ClientError> for Error {
    fn from(err: rumqttc::ClientError) -> Self {
        Error::Transport(err.to_string())
    }
}

impl From<image::ImageError> for Error {
    fn from(err: image::ImageError) -> Self {
        Error::Encoding(err.to_string())
    }
}
