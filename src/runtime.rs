//! ROI sync context: the coordinator plus the two channels feeding it.
//!
//! Built once at startup and torn down explicitly. The frame loop only ever
//! touches `coordinator()`.

use std::sync::Arc;
use std::time::Duration;

use crate::roi::{RoiPayloadParser, RoiSyncCoordinator};
use crate::task::{BackgroundTask, StopSignal};
use crate::transport::{
    BackendHttp, HttpRoiSource, PollFallbackChannel, PushChannel, PushSettings, PushState,
    DEFAULT_HTTP_TIMEOUT, DEFAULT_POLL_INTERVAL,
};

pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Clone, Debug)]
pub struct SyncSettings {
    pub backend_url: String,
    pub access_token: String,
    pub parser: RoiPayloadParser,
    /// `None` runs on the poll channel alone.
    pub push: Option<PushSettings>,
    pub poll_interval: Duration,
    pub http_timeout: Duration,
    pub verbose: bool,
}

impl SyncSettings {
    pub fn new(backend_url: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            backend_url: backend_url.into(),
            access_token: access_token.into(),
            parser: RoiPayloadParser::default(),
            push: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            http_timeout: DEFAULT_HTTP_TIMEOUT,
            verbose: false,
        }
    }
}

pub struct RoiRuntime {
    coordinator: Arc<RoiSyncCoordinator>,
    push: Option<PushChannel>,
    poll: Option<BackgroundTask>,
    stop: StopSignal,
}

impl RoiRuntime {
    /// Bootstrap the ROI over HTTP, then start the push and poll channels.
    /// Neither channel failing to start is fatal; the other still converges.
    pub fn start(settings: SyncSettings) -> Self {
        let coordinator = Arc::new(RoiSyncCoordinator::new().with_verbose(settings.verbose));
        let stop = StopSignal::new();

        let http = BackendHttp::new(&settings.backend_url, &settings.access_token, settings.http_timeout);
        let mut poll = PollFallbackChannel::new(
            HttpRoiSource::new(http, settings.parser.clone()),
            Arc::clone(&coordinator),
        );
        match poll.bootstrap() {
            Ok(true) => {}
            Ok(false) => log::info!("no roi on backend yet; waiting for sync"),
            Err(err) => log::warn!("initial roi fetch failed: {}", err),
        }

        let push = settings.push.and_then(|push_settings| {
            match PushChannel::start(push_settings, settings.parser.clone(), Arc::clone(&coordinator)) {
                Ok(channel) => Some(channel),
                Err(err) => {
                    log::warn!("mqtt push channel unavailable, relying on http poll: {}", err);
                    None
                }
            }
        });

        let poll = match poll.spawn(settings.poll_interval, stop.clone()) {
            Ok(task) => Some(task),
            Err(err) => {
                log::warn!("could not start roi poll: {}", err);
                None
            }
        };

        Self {
            coordinator,
            push,
            poll,
            stop,
        }
    }

    pub fn coordinator(&self) -> Arc<RoiSyncCoordinator> {
        Arc::clone(&self.coordinator)
    }

    pub fn push_state(&self) -> PushState {
        self.push
            .as_ref()
            .map_or(PushState::Disconnected, PushChannel::state)
    }

    /// Stop both channels, waiting at most `timeout` for each worker.
    /// Returns true when every worker was joined.
    pub fn shutdown(self, timeout: Duration) -> bool {
        self.stop.stop();
        let poll_joined = self.poll.map_or(true, |task| task.join_timeout(timeout));
        let push_joined = self.push.map_or(true, |push| push.shutdown(timeout));
        poll_joined && push_joined
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roi::RoiStatus;
    use std::time::Instant;

    #[test]
    fn unreachable_backend_leaves_roi_in_init_and_shuts_down() {
        let mut settings = SyncSettings::new("http://127.0.0.1:1", "token");
        settings.http_timeout = Duration::from_millis(200);
        settings.poll_interval = Duration::from_secs(30);
        let runtime = RoiRuntime::start(settings);
        assert_eq!(runtime.coordinator().status(), RoiStatus::Init);
        assert_eq!(runtime.push_state(), PushState::Disconnected);

        let started = Instant::now();
        assert!(runtime.shutdown(Duration::from_secs(5)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
