//! Where the push channel connects, and over which transport.
//!
//! The broker normally lives on the backend host. An explicit broker address
//! may be given as `host`, `host:port`, `[v6]:port`, or with an `mqtt://`,
//! `tcp://`, `mqtts://` or `ssl://` scheme. The TLS schemes force TLS on.

use anyhow::{anyhow, bail, Context, Result};
use rumqttc::Transport;
use std::path::{Path, PathBuf};
use url::Url;

/// Used when the backend URL has no host (e.g. `unix:` style URLs).
const FALLBACK_MQTT_HOST: &str = "localhost";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MqttEndpoint {
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
}

impl MqttEndpoint {
    /// Broker on the same host as the HTTP backend.
    pub fn from_backend_url(backend_url: &str, port: u16, use_tls: bool) -> Result<Self> {
        let url = Url::parse(backend_url).with_context(|| format!("invalid backend url '{}'", backend_url))?;
        let host = match url.host_str() {
            Some(host) => unbracket(host).to_string(),
            None => FALLBACK_MQTT_HOST.to_string(),
        };
        Ok(Self { host, port, use_tls })
    }
}

/// Parse an explicit broker address. `default_port` applies when the address
/// names only a host.
pub fn parse_mqtt_endpoint(addr: &str, default_port: u16, use_tls: bool) -> Result<MqttEndpoint> {
    let addr = addr.trim();
    let (force_tls, authority) = match addr.split_once("://") {
        None => (false, addr),
        Some(("mqtt" | "tcp", rest)) => (false, rest),
        Some(("mqtts" | "ssl", rest)) => (true, rest),
        Some((scheme, _)) => bail!("broker scheme '{}' is not supported", scheme),
    };
    let authority = authority.trim_end_matches('/');

    let (host, port) = if let Some(bracketed) = authority.strip_prefix('[') {
        let (host, tail) = bracketed
            .split_once(']')
            .ok_or_else(|| anyhow!("unterminated IPv6 literal in broker address '{}'", addr))?;
        match tail {
            "" => (host, None),
            _ => match tail.strip_prefix(':') {
                Some(port) => (host, Some(port)),
                None => bail!("unexpected '{}' after IPv6 literal in '{}'", tail, addr),
            },
        }
    } else {
        match authority.rsplit_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (authority, None),
        }
    };

    if host.is_empty() {
        bail!("broker address '{}' has no host", addr);
    }
    let port = match port {
        Some(port) => port
            .parse::<u16>()
            .with_context(|| format!("invalid broker port in '{}'", addr))?,
        None => default_port,
    };
    Ok(MqttEndpoint {
        host: host.to_string(),
        port,
        use_tls: use_tls || force_tls,
    })
}

fn unbracket(host: &str) -> &str {
    host.trim_start_matches('[').trim_end_matches(']')
}

/// PEM files for a TLS broker connection.
#[derive(Clone, Debug, Default)]
pub struct TlsMaterials {
    /// Trust anchor. Without it the platform's webpki roots are used.
    pub ca: Option<Vec<u8>>,
    /// Client certificate and private key for mutual TLS.
    pub client_auth: Option<(Vec<u8>, Vec<u8>)>,
}

impl TlsMaterials {
    pub fn load(
        ca_path: Option<&PathBuf>,
        client_cert_path: Option<&PathBuf>,
        client_key_path: Option<&PathBuf>,
    ) -> Result<Self> {
        let ca = ca_path.map(|path| read_pem(path, "CA certificate")).transpose()?;
        let client_auth = match (client_cert_path, client_key_path) {
            (None, None) => None,
            (Some(cert), Some(key)) => Some((
                read_pem(cert, "client certificate")?,
                read_pem(key, "client key")?,
            )),
            _ => bail!("tls client certificate and key must be configured together"),
        };
        Ok(Self { ca, client_auth })
    }

    pub fn is_configured(&self) -> bool {
        self.ca.is_some() || self.client_auth.is_some()
    }

    pub fn build_transport(&self, endpoint: &MqttEndpoint) -> Result<Transport> {
        match (endpoint.use_tls, &self.ca) {
            (false, _) if self.is_configured() => {
                bail!("tls files are configured but broker {} is plain mqtt", endpoint.host)
            }
            (false, _) => Ok(Transport::tcp()),
            (true, None) if self.client_auth.is_some() => {
                bail!("mutual tls needs a CA certificate as well")
            }
            (true, None) => Ok(Transport::tls_with_default_config()),
            (true, Some(ca)) => Ok(Transport::tls(ca.clone(), self.client_auth.clone(), None)),
        }
    }
}

fn read_pem(path: &Path, what: &str) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("cannot read tls {} {}", what, path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_url_host_becomes_broker() {
        let ep = MqttEndpoint::from_backend_url("https://tb.example.com:8080/api", 1883, true).unwrap();
        assert_eq!(
            ep,
            MqttEndpoint {
                host: "tb.example.com".into(),
                port: 1883,
                use_tls: true
            }
        );
        let v6 = MqttEndpoint::from_backend_url("http://[::1]:8080/", 1883, false).unwrap();
        assert_eq!(v6.host, "::1");
        assert!(MqttEndpoint::from_backend_url("not a url", 1883, false).is_err());
    }

    #[test]
    fn explicit_broker_addresses() {
        let plain = parse_mqtt_endpoint("10.0.0.2:1884", 1883, false).unwrap();
        assert_eq!((plain.host.as_str(), plain.port, plain.use_tls), ("10.0.0.2", 1884, false));

        let bare = parse_mqtt_endpoint("broker.local", 1883, false).unwrap();
        assert_eq!((bare.host.as_str(), bare.port), ("broker.local", 1883));

        let secure = parse_mqtt_endpoint("mqtts://broker.example.com:8883/", 1883, false).unwrap();
        assert_eq!(secure.port, 8883);
        assert!(secure.use_tls);

        let v6 = parse_mqtt_endpoint("tcp://[fe80::1]", 1883, false).unwrap();
        assert_eq!((v6.host.as_str(), v6.port), ("fe80::1", 1883));
    }

    #[test]
    fn malformed_broker_addresses_are_rejected() {
        assert!(parse_mqtt_endpoint("ws://host:80", 1883, false).is_err());
        assert!(parse_mqtt_endpoint("host:port", 1883, false).is_err());
        assert!(parse_mqtt_endpoint("[::1", 1883, false).is_err());
        assert!(parse_mqtt_endpoint(":1883", 1883, false).is_err());
    }

    #[test]
    fn client_cert_without_key_is_rejected() {
        let err = TlsMaterials::load(None, Some(&PathBuf::from("/nonexistent/cert.pem")), None).unwrap_err();
        assert!(err.to_string().contains("together"));
    }

    #[test]
    fn transport_follows_endpoint_and_materials() {
        let plain = parse_mqtt_endpoint("127.0.0.1:1883", 1883, false).unwrap();
        let secure = parse_mqtt_endpoint("mqtts://127.0.0.1:8883", 1883, false).unwrap();
        let with_ca = TlsMaterials {
            ca: Some(b"pem".to_vec()),
            client_auth: None,
        };
        let client_only = TlsMaterials {
            ca: None,
            client_auth: Some((b"cert".to_vec(), b"key".to_vec())),
        };

        assert!(TlsMaterials::default().build_transport(&plain).is_ok());
        assert!(with_ca.build_transport(&plain).is_err());
        assert!(TlsMaterials::default().build_transport(&secure).is_ok());
        assert!(client_only.build_transport(&secure).is_err());
    }
}
