//! Push channel: ROI attribute sync over the device MQTT API.
//!
//! Two threads cooperate. The transport thread owns the rumqttc
//! `Connection`, applies reconnect backoff and forwards `TransportEvent`s
//! over a channel. The session thread runs `PushSession`, a plain state
//! machine that turns those events into coordinator updates and outgoing
//! `PushCommand`s, and fires the periodic resync request.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rand::Rng;
use rumqttc::{Client, Connection, Event, Incoming, MqttOptions, QoS};
use serde_json::json;

use super::tls::{MqttEndpoint, TlsMaterials};
use crate::error::{Error, Result};
use crate::roi::{RoiPayloadParser, RoiSyncCoordinator};
use crate::task::{BackgroundTask, StopSignal};

pub const ATTRIBUTES_TOPIC: &str = "v1/devices/me/attributes";
pub const ATTRIBUTE_RESPONSE_FILTER: &str = "v1/devices/me/attributes/response/+";
const ATTRIBUTE_RESPONSE_PREFIX: &str = "v1/devices/me/attributes/response/";
const ATTRIBUTE_REQUEST_PREFIX: &str = "v1/devices/me/attributes/request/";

pub const DEFAULT_MQTT_PORT: u16 = 1883;
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(60);
pub const DEFAULT_RESYNC_INTERVAL: Duration = Duration::from_secs(2);

const RECONNECT_MIN_DELAY: Duration = Duration::from_secs(1);
const RECONNECT_MAX_DELAY: Duration = Duration::from_secs(10);
/// How often the session thread wakes to check resync and stop.
const SESSION_TICK: Duration = Duration::from_millis(200);
const CLIENT_CAPACITY: usize = 10;

/// Connection-level happenings, decoupled from rumqttc types.
#[derive(Clone, Debug, PartialEq)]
pub enum TransportEvent {
    Connecting,
    Connected,
    Disconnected(String),
    Message { topic: String, payload: Vec<u8> },
}

/// What the session wants the client to do next.
#[derive(Clone, Debug, PartialEq)]
pub enum PushCommand {
    Subscribe(String),
    Publish { topic: String, payload: Vec<u8> },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PushState {
    Disconnected,
    Connecting,
    Connected,
    AwaitingResponse { request_id: u64 },
}

impl PushState {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected | Self::AwaitingResponse { .. })
    }
}

/// Exponential reconnect delay with jitter, bounded to `[min, max]`.
#[derive(Clone, Debug)]
pub struct ReconnectBackoff {
    min: Duration,
    max: Duration,
    current: Duration,
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self::new(RECONNECT_MIN_DELAY, RECONNECT_MAX_DELAY)
    }
}

impl ReconnectBackoff {
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            min,
            max,
            current: min,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let base = self.current;
        self.current = (self.current * 2).min(self.max);
        let jitter_ms = base.as_millis() as u64 / 4;
        let jitter = if jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_ms)
        };
        (base + Duration::from_millis(jitter)).min(self.max)
    }

    pub fn reset(&mut self) {
        self.current = self.min;
    }
}

/// Request/response correlation and ROI forwarding, free of any I/O.
pub struct PushSession {
    parser: RoiPayloadParser,
    coordinator: Arc<RoiSyncCoordinator>,
    state: PushState,
    last_request_id: u64,
    last_request_at: Option<Instant>,
    resync_interval: Duration,
    verbose: bool,
}

impl PushSession {
    pub fn new(
        parser: RoiPayloadParser,
        coordinator: Arc<RoiSyncCoordinator>,
        resync_interval: Duration,
    ) -> Self {
        Self {
            parser,
            coordinator,
            state: PushState::Disconnected,
            last_request_id: 0,
            last_request_at: None,
            resync_interval,
            verbose: false,
        }
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn state(&self) -> PushState {
        self.state
    }

    pub fn last_request_id(&self) -> u64 {
        self.last_request_id
    }

    pub fn handle(&mut self, event: TransportEvent, now: Instant) -> Vec<PushCommand> {
        match event {
            TransportEvent::Connecting => {
                self.state = PushState::Connecting;
                Vec::new()
            }
            TransportEvent::Disconnected(reason) => {
                if self.state.is_connected() {
                    log::warn!("mqtt disconnected: {}", reason);
                } else {
                    log::debug!("mqtt connect failed: {}", reason);
                }
                self.state = PushState::Disconnected;
                Vec::new()
            }
            TransportEvent::Connected => {
                log::info!("mqtt connected; listening for roi changes");
                self.state = PushState::Connected;
                vec![
                    PushCommand::Subscribe(ATTRIBUTES_TOPIC.to_string()),
                    PushCommand::Subscribe(ATTRIBUTE_RESPONSE_FILTER.to_string()),
                    self.request_latest(now),
                ]
            }
            TransportEvent::Message { topic, payload } => self.on_message(&topic, &payload, now),
        }
    }

    /// Handle one event (`None` after an idle wait), then run the resync
    /// check so steady traffic cannot starve it.
    pub fn step(&mut self, event: Option<TransportEvent>, now: Instant) -> Vec<PushCommand> {
        let mut commands = match event {
            Some(event) => self.handle(event, now),
            None => Vec::new(),
        };
        commands.extend(self.tick(now));
        commands
    }

    /// Periodic resync while connected.
    pub fn tick(&mut self, now: Instant) -> Vec<PushCommand> {
        if !self.state.is_connected() {
            return Vec::new();
        }
        let due = self
            .last_request_at
            .map_or(true, |at| now.duration_since(at) >= self.resync_interval);
        if due {
            vec![self.request_latest(now)]
        } else {
            Vec::new()
        }
    }

    fn on_message(&mut self, topic: &str, payload: &[u8], now: Instant) -> Vec<PushCommand> {
        let response_id = match topic.strip_prefix(ATTRIBUTE_RESPONSE_PREFIX) {
            Some(suffix) => match suffix.parse::<u64>() {
                Ok(id) => Some(id),
                Err(_) => {
                    self.note_dropped(topic, "non-numeric response id");
                    return Vec::new();
                }
            },
            None if topic == ATTRIBUTES_TOPIC => None,
            None => {
                self.note_dropped(topic, "unexpected topic");
                return Vec::new();
            }
        };

        if let Some(id) = response_id {
            if self.state == (PushState::AwaitingResponse { request_id: id }) {
                self.state = PushState::Connected;
            }
        }

        let parsed = match self.parser.parse_bytes(payload) {
            Ok(parsed) => parsed,
            Err(err) => {
                self.note_dropped(topic, &err.to_string());
                return Vec::new();
            }
        };

        if parsed.found_key {
            self.coordinator.update(parsed.points);
            return Vec::new();
        }
        if response_id.is_none() {
            // A change notification without the ROI key: resync fully.
            return vec![self.request_latest(now)];
        }
        Vec::new()
    }

    fn request_latest(&mut self, now: Instant) -> PushCommand {
        self.last_request_id += 1;
        let request_id = self.last_request_id;
        self.last_request_at = Some(now);
        if self.state.is_connected() {
            self.state = PushState::AwaitingResponse { request_id };
        }
        let body = json!({
            "sharedKeys": self.parser.config_key(),
            "clientKeys": "",
        });
        PushCommand::Publish {
            topic: format!("{}{}", ATTRIBUTE_REQUEST_PREFIX, request_id),
            payload: body.to_string().into_bytes(),
        }
    }

    fn note_dropped(&self, topic: &str, reason: &str) {
        if self.verbose {
            log::info!("dropping mqtt message on {}: {}", topic, reason);
        }
    }
}

/// Connection parameters for `PushChannel::start`.
#[derive(Clone, Debug)]
pub struct PushSettings {
    pub endpoint: MqttEndpoint,
    pub access_token: String,
    pub keep_alive: Duration,
    pub resync_interval: Duration,
    pub tls: TlsMaterials,
    pub verbose: bool,
}

impl PushSettings {
    pub fn new(endpoint: MqttEndpoint, access_token: impl Into<String>) -> Self {
        Self {
            endpoint,
            access_token: access_token.into(),
            keep_alive: DEFAULT_KEEP_ALIVE,
            resync_interval: DEFAULT_RESYNC_INTERVAL,
            tls: TlsMaterials::default(),
            verbose: false,
        }
    }
}

/// Running push channel. Dropping it without `shutdown` leaves the
/// worker threads to exit on their own once the connection closes.
pub struct PushChannel {
    client: Client,
    stop: StopSignal,
    state: Arc<Mutex<PushState>>,
    transport: BackgroundTask,
    session: BackgroundTask,
}

impl PushChannel {
    pub fn start(
        settings: PushSettings,
        parser: RoiPayloadParser,
        coordinator: Arc<RoiSyncCoordinator>,
    ) -> Result<Self> {
        let client_id = format!("roi-gate-{:08x}", rand::random::<u32>());
        let mut options = MqttOptions::new(
            client_id,
            settings.endpoint.host.clone(),
            settings.endpoint.port,
        );
        options.set_keep_alive(settings.keep_alive);
        options.set_clean_session(true);
        options.set_credentials(settings.access_token.clone(), "");
        let transport = settings
            .tls
            .build_transport(&settings.endpoint)
            .map_err(|e| Error::Transport(format!("{:#}", e)))?;
        options.set_transport(transport);

        let (client, connection) = Client::new(options, CLIENT_CAPACITY);
        let (events_tx, events_rx) = mpsc::channel();
        let stop = StopSignal::new();
        let state = Arc::new(Mutex::new(PushState::Connecting));

        log::info!(
            "connecting to mqtt broker {}:{} (TLS: {})",
            settings.endpoint.host,
            settings.endpoint.port,
            settings.endpoint.use_tls
        );

        let transport = {
            let stop = stop.clone();
            BackgroundTask::spawn("mqtt-transport", move || {
                run_transport(connection, events_tx, stop)
            })
            .map_err(|e| Error::Transport(format!("spawn mqtt transport: {}", e)))?
        };

        let session = {
            let stop = stop.clone();
            let client = client.clone();
            let state = Arc::clone(&state);
            let session = PushSession::new(parser, coordinator, settings.resync_interval)
                .with_verbose(settings.verbose);
            BackgroundTask::spawn("mqtt-session", move || {
                run_session(session, client, events_rx, state, stop)
            })
            .map_err(|e| Error::Transport(format!("spawn mqtt session: {}", e)))?
        };

        Ok(Self {
            client,
            stop,
            state,
            transport,
            session,
        })
    }

    pub fn state(&self) -> PushState {
        *self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Stop both workers, waiting at most `timeout` for each.
    /// Returns true when both were joined.
    pub fn shutdown(self, timeout: Duration) -> bool {
        self.stop.stop();
        if let Err(err) = self.client.try_disconnect() {
            log::debug!("mqtt disconnect: {}", err);
        }
        let session_joined = self.session.join_timeout(timeout);
        let transport_joined = self.transport.join_timeout(timeout);
        session_joined && transport_joined
    }
}

fn run_transport(mut connection: Connection, events: Sender<TransportEvent>, stop: StopSignal) {
    let mut backoff = ReconnectBackoff::default();
    for notification in connection.iter() {
        if stop.is_stopped() {
            break;
        }
        let event = match notification {
            Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                backoff.reset();
                TransportEvent::Connected
            }
            Ok(Event::Incoming(Incoming::Publish(publish))) => TransportEvent::Message {
                topic: publish.topic,
                payload: publish.payload.to_vec(),
            },
            Ok(_) => continue,
            Err(err) => {
                if events.send(TransportEvent::Disconnected(err.to_string())).is_err() {
                    break;
                }
                let delay = backoff.next_delay();
                log::debug!("mqtt reconnecting in {:?}", delay);
                if stop.wait(delay) {
                    break;
                }
                TransportEvent::Connecting
            }
        };
        if events.send(event).is_err() {
            break;
        }
    }
}

fn run_session(
    mut session: PushSession,
    client: Client,
    events: Receiver<TransportEvent>,
    shared_state: Arc<Mutex<PushState>>,
    stop: StopSignal,
) {
    while !stop.is_stopped() {
        let event = match events.recv_timeout(SESSION_TICK) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => break,
        };
        let commands = session.step(event, Instant::now());
        for command in commands {
            if let Err(err) = execute(&client, command) {
                log::debug!("mqtt command failed: {}", err);
            }
        }
        *shared_state.lock().unwrap_or_else(|p| p.into_inner()) = session.state();
    }
    *shared_state.lock().unwrap_or_else(|p| p.into_inner()) = PushState::Disconnected;
}

fn execute(client: &Client, command: PushCommand) -> Result<()> {
    match command {
        PushCommand::Subscribe(topic) => client.try_subscribe(topic, QoS::AtLeastOnce)?,
        PushCommand::Publish { topic, payload } => {
            client.try_publish(topic, QoS::AtLeastOnce, false, payload)?
        }
    }
    Ok(())
}
