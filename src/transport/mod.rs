//! ROI sync transports.
//!
//! The push channel keeps an MQTT session with the device API; the poll
//! channel fetches the same attribute over HTTP on a timer. Both feed the
//! shared `RoiSyncCoordinator` and neither depends on the other.

mod http;
mod mqtt;
mod poll;
mod tls;

pub use http::{BackendHttp, HttpRoiSource, RoiSource, DEFAULT_HTTP_TIMEOUT};
pub use mqtt::{
    PushChannel, PushCommand, PushSession, PushSettings, PushState, ReconnectBackoff,
    TransportEvent, ATTRIBUTES_TOPIC, ATTRIBUTE_RESPONSE_FILTER, DEFAULT_KEEP_ALIVE,
    DEFAULT_MQTT_PORT, DEFAULT_RESYNC_INTERVAL,
};
pub use poll::{PollFallbackChannel, DEFAULT_POLL_INTERVAL};
pub use tls::{parse_mqtt_endpoint, MqttEndpoint, TlsMaterials};
