use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::detect::{DetectParams, DEFAULT_MIN_CONFIDENCE, PERSON_CLASS_ID};
use crate::ingest::{CapturePolicy, RtspConfig};
use crate::roi::{RoiPayloadParser, ROI_CONFIG_KEY, ROI_POINTS_KEY};
use crate::runtime::SyncSettings;
use crate::telemetry::{FrameEncoding, TelemetrySettings, DEFAULT_FRAME_ATTRIBUTE};
use crate::transport::{
    parse_mqtt_endpoint, MqttEndpoint, PushSettings, TlsMaterials, DEFAULT_HTTP_TIMEOUT,
    DEFAULT_MQTT_PORT,
};

const DEFAULT_SOURCE_URL: &str = "stub://camera";
const DEFAULT_TARGET_FPS: u32 = 10;
const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const DEFAULT_BACKEND_URL: &str = "http://localhost:8080";
const DEFAULT_KEEP_ALIVE_SECS: u64 = 60;
const DEFAULT_RESYNC_SECS: f64 = 2.0;
const DEFAULT_POLL_SECS: f64 = 1.0;
const DEFAULT_TELEMETRY_SECS: f64 = 1.0;
const DEFAULT_JPEG_QUALITY: u8 = 80;

#[derive(Debug, Deserialize, Default)]
struct RoiGateConfigFile {
    source: Option<SourceConfigFile>,
    backend: Option<BackendConfigFile>,
    telemetry: Option<TelemetryConfigFile>,
    detection: Option<DetectionConfigFile>,
    verbose: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct SourceConfigFile {
    url: Option<String>,
    open_retries: Option<u32>,
    open_retry_wait_secs: Option<f64>,
    read_failure_threshold: Option<u32>,
    reopen_delay_secs: Option<f64>,
    read_retry_delay_secs: Option<f64>,
    target_fps: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct BackendConfigFile {
    url: Option<String>,
    access_token: Option<String>,
    mqtt_enabled: Option<bool>,
    mqtt_broker: Option<String>,
    mqtt_port: Option<u16>,
    mqtt_use_tls: Option<bool>,
    keep_alive_secs: Option<u64>,
    resync_secs: Option<f64>,
    poll_secs: Option<f64>,
    config_key: Option<String>,
    points_key: Option<String>,
    tls_ca_path: Option<PathBuf>,
    tls_client_cert_path: Option<PathBuf>,
    tls_client_key_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct TelemetryConfigFile {
    enabled: Option<bool>,
    attribute_key: Option<String>,
    encoding: Option<FrameEncoding>,
    interval_secs: Option<f64>,
    jpeg_quality: Option<u8>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectionConfigFile {
    min_confidence: Option<f32>,
    classes: Option<Vec<u32>>,
    detect_without_roi: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct RoiGateConfig {
    pub source: SourceSettings,
    pub backend: BackendSettings,
    pub telemetry: TelemetryConfig,
    pub detection: DetectionSettings,
    pub verbose: bool,
}

#[derive(Debug, Clone)]
pub struct SourceSettings {
    pub url: String,
    pub open_retries: u32,
    pub open_retry_wait: Duration,
    pub read_failure_threshold: u32,
    pub reopen_delay: Duration,
    pub read_retry_delay: Duration,
    pub target_fps: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone)]
pub struct BackendSettings {
    pub url: String,
    pub access_token: String,
    pub mqtt_enabled: bool,
    /// Explicit broker address; defaults to the backend host.
    pub mqtt_broker: Option<String>,
    pub mqtt_port: u16,
    pub mqtt_use_tls: bool,
    pub keep_alive: Duration,
    pub resync_interval: Duration,
    pub poll_interval: Duration,
    pub config_key: String,
    pub points_key: String,
    pub tls_ca_path: Option<PathBuf>,
    pub tls_client_cert_path: Option<PathBuf>,
    pub tls_client_key_path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub enabled: bool,
    pub attribute_key: String,
    pub encoding: FrameEncoding,
    pub interval: Duration,
    pub jpeg_quality: u8,
}

#[derive(Debug, Clone)]
pub struct DetectionSettings {
    pub min_confidence: f32,
    pub classes: Vec<u32>,
    pub detect_without_roi: bool,
}

impl RoiGateConfig {
    /// File named by `ROI_GATE_CONFIG` (if any), then env overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("ROI_GATE_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        Self::load_with_overrides(path, |_| {})
    }

    /// Like `load_from`, with command-line overrides applied after the
    /// environment and before validation.
    pub fn load_with_overrides<F>(path: Option<&Path>, overrides: F) -> Result<Self>
    where
        F: FnOnce(&mut Self),
    {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        overrides(&mut cfg);
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: RoiGateConfigFile) -> Result<Self> {
        let source = file.source.unwrap_or_default();
        let backend = file.backend.unwrap_or_default();
        let telemetry = file.telemetry.unwrap_or_default();
        let detection = file.detection.unwrap_or_default();

        let policy = CapturePolicy::default();
        Ok(Self {
            source: SourceSettings {
                url: source.url.unwrap_or_else(|| DEFAULT_SOURCE_URL.to_string()),
                open_retries: source.open_retries.unwrap_or(policy.open_attempts),
                open_retry_wait: secs_or(source.open_retry_wait_secs, policy.open_retry_delay)?,
                read_failure_threshold: source
                    .read_failure_threshold
                    .unwrap_or(policy.failure_threshold),
                reopen_delay: secs_or(source.reopen_delay_secs, policy.reopen_cooldown)?,
                read_retry_delay: secs_or(source.read_retry_delay_secs, policy.read_retry_delay)?,
                target_fps: source.target_fps.unwrap_or(DEFAULT_TARGET_FPS),
                width: source.width.unwrap_or(DEFAULT_WIDTH),
                height: source.height.unwrap_or(DEFAULT_HEIGHT),
            },
            backend: BackendSettings {
                url: backend.url.unwrap_or_else(|| DEFAULT_BACKEND_URL.to_string()),
                access_token: backend.access_token.unwrap_or_default(),
                mqtt_enabled: backend.mqtt_enabled.unwrap_or(true),
                mqtt_broker: backend.mqtt_broker,
                mqtt_port: backend.mqtt_port.unwrap_or(DEFAULT_MQTT_PORT),
                mqtt_use_tls: backend.mqtt_use_tls.unwrap_or(false),
                keep_alive: Duration::from_secs(
                    backend.keep_alive_secs.unwrap_or(DEFAULT_KEEP_ALIVE_SECS),
                ),
                resync_interval: secs_or(
                    backend.resync_secs,
                    Duration::from_secs_f64(DEFAULT_RESYNC_SECS),
                )?,
                poll_interval: secs_or(backend.poll_secs, Duration::from_secs_f64(DEFAULT_POLL_SECS))?,
                config_key: backend.config_key.unwrap_or_else(|| ROI_CONFIG_KEY.to_string()),
                points_key: backend.points_key.unwrap_or_else(|| ROI_POINTS_KEY.to_string()),
                tls_ca_path: backend.tls_ca_path,
                tls_client_cert_path: backend.tls_client_cert_path,
                tls_client_key_path: backend.tls_client_key_path,
            },
            telemetry: TelemetryConfig {
                enabled: telemetry.enabled.unwrap_or(true),
                attribute_key: telemetry
                    .attribute_key
                    .unwrap_or_else(|| DEFAULT_FRAME_ATTRIBUTE.to_string()),
                encoding: telemetry.encoding.unwrap_or_default(),
                interval: secs_or(
                    telemetry.interval_secs,
                    Duration::from_secs_f64(DEFAULT_TELEMETRY_SECS),
                )?,
                jpeg_quality: telemetry.jpeg_quality.unwrap_or(DEFAULT_JPEG_QUALITY),
            },
            detection: DetectionSettings {
                min_confidence: detection.min_confidence.unwrap_or(DEFAULT_MIN_CONFIDENCE),
                classes: detection.classes.unwrap_or_else(|| vec![PERSON_CLASS_ID]),
                detect_without_roi: detection.detect_without_roi.unwrap_or(false),
            },
            verbose: file.verbose.unwrap_or(false),
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(url) = env_non_empty("ROI_GATE_SOURCE") {
            self.source.url = url;
        }
        if let Some(url) = env_non_empty("ROI_GATE_BACKEND_URL") {
            self.backend.url = url;
        }
        if let Some(token) = env_non_empty("ROI_GATE_ACCESS_TOKEN") {
            self.backend.access_token = token;
        }
        if let Some(port) = env_non_empty("ROI_GATE_MQTT_PORT") {
            self.backend.mqtt_port = port
                .parse()
                .map_err(|_| anyhow!("ROI_GATE_MQTT_PORT must be a port number"))?;
        }
        if let Some(flag) = env_non_empty("ROI_GATE_DETECT_WITHOUT_ROI") {
            self.detection.detect_without_roi = parse_bool("ROI_GATE_DETECT_WITHOUT_ROI", &flag)?;
        }
        if let Some(flag) = env_non_empty("ROI_GATE_VERBOSE") {
            self.verbose = parse_bool("ROI_GATE_VERBOSE", &flag)?;
        }
        if let Some(encoding) = env_non_empty("ROI_GATE_FRAME_ENCODING") {
            self.telemetry.encoding = encoding.parse()?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.backend.access_token.trim().is_empty() {
            return Err(anyhow!(
                "backend access token is required (backend.access_token or ROI_GATE_ACCESS_TOKEN)"
            ));
        }
        url::Url::parse(&self.backend.url)
            .with_context(|| format!("invalid backend url '{}'", self.backend.url))?;
        if self.source.url.trim().is_empty() {
            return Err(anyhow!("source url must not be empty"));
        }
        if self.source.open_retries == 0 {
            return Err(anyhow!("source.open_retries must be at least 1"));
        }
        if self.source.read_failure_threshold == 0 {
            return Err(anyhow!("source.read_failure_threshold must be at least 1"));
        }
        for (name, interval) in [
            ("backend.resync_secs", self.backend.resync_interval),
            ("backend.poll_secs", self.backend.poll_interval),
            ("telemetry.interval_secs", self.telemetry.interval),
        ] {
            if interval.is_zero() {
                return Err(anyhow!("{} must be greater than zero", name));
            }
        }
        if !(0.0..=1.0).contains(&self.detection.min_confidence) {
            return Err(anyhow!("detection.min_confidence must be within [0, 1]"));
        }
        if self.telemetry.jpeg_quality == 0 || self.telemetry.jpeg_quality > 100 {
            return Err(anyhow!("telemetry.jpeg_quality must be within 1..=100"));
        }
        if self.backend.config_key.trim().is_empty() || self.backend.points_key.trim().is_empty() {
            return Err(anyhow!("roi attribute keys must not be empty"));
        }
        Ok(())
    }

    pub fn capture_policy(&self) -> CapturePolicy {
        CapturePolicy {
            open_attempts: self.source.open_retries,
            open_retry_delay: self.source.open_retry_wait,
            failure_threshold: self.source.read_failure_threshold,
            reopen_cooldown: self.source.reopen_delay,
            read_retry_delay: self.source.read_retry_delay,
            ..CapturePolicy::default()
        }
    }

    pub fn rtsp_config(&self) -> RtspConfig {
        RtspConfig {
            url: self.source.url.clone(),
            target_fps: self.source.target_fps,
            width: self.source.width,
            height: self.source.height,
        }
    }

    pub fn payload_parser(&self) -> RoiPayloadParser {
        RoiPayloadParser::new(&self.backend.config_key, &self.backend.points_key)
    }

    pub fn mqtt_endpoint(&self) -> Result<MqttEndpoint> {
        match &self.backend.mqtt_broker {
            Some(addr) => parse_mqtt_endpoint(addr, self.backend.mqtt_port, self.backend.mqtt_use_tls),
            None => MqttEndpoint::from_backend_url(
                &self.backend.url,
                self.backend.mqtt_port,
                self.backend.mqtt_use_tls,
            ),
        }
    }

    /// Push channel settings, or `None` when MQTT is disabled. Fails on an
    /// unusable broker address or unreadable TLS files.
    pub fn push_settings(&self) -> Result<Option<PushSettings>> {
        if !self.backend.mqtt_enabled {
            return Ok(None);
        }
        let tls = TlsMaterials::load(
            self.backend.tls_ca_path.as_ref(),
            self.backend.tls_client_cert_path.as_ref(),
            self.backend.tls_client_key_path.as_ref(),
        )?;
        let mut push = PushSettings::new(self.mqtt_endpoint()?, &self.backend.access_token);
        push.keep_alive = self.backend.keep_alive;
        push.resync_interval = self.backend.resync_interval;
        push.tls = tls;
        push.verbose = self.verbose;
        Ok(Some(push))
    }

    /// A push setup failure only disables the push channel; the poll
    /// channel still runs.
    pub fn sync_settings(&self) -> SyncSettings {
        let push = self.push_settings().unwrap_or_else(|err| {
            log::warn!("mqtt push channel disabled, relying on http poll: {:#}", err);
            None
        });
        SyncSettings {
            backend_url: self.backend.url.clone(),
            access_token: self.backend.access_token.clone(),
            parser: self.payload_parser(),
            push,
            poll_interval: self.backend.poll_interval,
            http_timeout: DEFAULT_HTTP_TIMEOUT,
            verbose: self.verbose,
        }
    }

    pub fn telemetry_settings(&self) -> TelemetrySettings {
        TelemetrySettings {
            attribute_key: self.telemetry.attribute_key.clone(),
            encoding: self.telemetry.encoding,
            interval: self.telemetry.interval,
            jpeg_quality: self.telemetry.jpeg_quality,
            verbose: self.verbose,
        }
    }

    pub fn detect_params(&self) -> DetectParams {
        DetectParams {
            min_confidence: self.detection.min_confidence,
            classes: self.detection.classes.clone(),
        }
    }
}

fn read_config_file(path: &Path) -> Result<RoiGateConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn secs_or(value: Option<f64>, default: Duration) -> Result<Duration> {
    match value {
        None => Ok(default),
        Some(secs) => Duration::try_from_secs_f64(secs)
            .map_err(|_| anyhow!("invalid duration {} (seconds must be finite and >= 0)", secs)),
    }
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(anyhow!("{} must be a boolean", key)),
    }
}
