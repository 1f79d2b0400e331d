//! Device HTTP API: shared-attribute fetch and client-attribute upload.
//!
//! The device access token is part of the URL path, so no auth header is
//! sent: `{backend}/api/v1/{token}/attributes`.

use std::time::Duration;

use serde_json::Value;

use crate::error::{Error, Result};
use crate::roi::{RoiPayloadParser, RoiPoint};

pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(5);

pub struct BackendHttp {
    agent: ureq::Agent,
    attributes_url: String,
}

impl BackendHttp {
    pub fn new(backend_url: &str, access_token: &str, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Self {
            agent,
            attributes_url: format!(
                "{}/api/v1/{}/attributes",
                backend_url.trim_end_matches('/'),
                access_token
            ),
        }
    }

    pub fn attributes_url(&self) -> &str {
        &self.attributes_url
    }

    /// GET the named shared attributes. An empty body reads as `{}`.
    pub fn fetch_shared_attributes(&self, keys: &str) -> Result<Value> {
        let response = self
            .agent
            .get(&self.attributes_url)
            .query("sharedKeys", keys)
            .call()?;
        let body = response
            .into_string()
            .map_err(|e| Error::Transport(format!("read attributes response: {}", e)))?;
        if body.trim().is_empty() {
            return Ok(Value::Object(Default::default()));
        }
        serde_json::from_str(&body).map_err(|e| Error::Parse(format!("attributes response: {}", e)))
    }

    /// POST a JSON object of client attributes. Non-2xx is an error.
    pub fn post_attributes(&self, attributes: &Value) -> Result<()> {
        self.agent
            .post(&self.attributes_url)
            .set("Content-Type", "application/json")
            .send_string(&attributes.to_string())?;
        Ok(())
    }
}

/// Request/response source of the current ROI, used by the poll channel.
pub trait RoiSource: Send {
    /// `Ok(None)` when the backend does not carry the ROI attribute.
    fn fetch_roi(&self) -> Result<Option<Vec<RoiPoint>>>;
}

pub struct HttpRoiSource {
    http: BackendHttp,
    parser: RoiPayloadParser,
}

impl HttpRoiSource {
    pub fn new(http: BackendHttp, parser: RoiPayloadParser) -> Self {
        Self { http, parser }
    }
}

impl RoiSource for HttpRoiSource {
    fn fetch_roi(&self) -> Result<Option<Vec<RoiPoint>>> {
        let payload = self.http.fetch_shared_attributes(self.parser.config_key())?;
        let parsed = self.parser.parse(&payload);
        Ok(if parsed.found_key { parsed.points } else { None })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attributes_url_embeds_token() {
        let http = BackendHttp::new("http://tb.local:8080/", "abc123", DEFAULT_HTTP_TIMEOUT);
        assert_eq!(http.attributes_url(), "http://tb.local:8080/api/v1/abc123/attributes");
    }

    #[test]
    fn unreachable_backend_is_a_transport_error() {
        let http = BackendHttp::new("http://127.0.0.1:1", "token", Duration::from_millis(200));
        let err = http.fetch_shared_attributes("statistic_config").unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
    }
}
