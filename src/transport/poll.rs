//! Poll fallback: periodic ROI fetch that converges even without MQTT.

use std::sync::Arc;
use std::time::Duration;

use super::http::RoiSource;
use crate::error::Result;
use crate::roi::{RoiSignature, RoiSyncCoordinator};
use crate::task::{BackgroundTask, StopSignal};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

pub struct PollFallbackChannel<S: RoiSource> {
    source: S,
    coordinator: Arc<RoiSyncCoordinator>,
    last_signature: RoiSignature,
    updates: u64,
}

impl<S: RoiSource + 'static> PollFallbackChannel<S> {
    pub fn new(source: S, coordinator: Arc<RoiSyncCoordinator>) -> Self {
        Self {
            source,
            coordinator,
            last_signature: RoiSignature::default(),
            updates: 0,
        }
    }

    /// One-shot fetch before the loops start. Only a non-empty ROI seeds
    /// the coordinator; an absent or empty one leaves it in `init`.
    pub fn bootstrap(&mut self) -> Result<bool> {
        let points = match self.source.fetch_roi()? {
            Some(points) if !points.is_empty() => points,
            _ => return Ok(false),
        };
        log::info!("seeded roi from current attribute: {} points", points.len());
        self.last_signature = RoiSignature::of(Some(points.as_slice()));
        self.coordinator.update(Some(points));
        self.updates += 1;
        Ok(true)
    }

    /// Fetch once and forward only when the signature differs from the last
    /// one this channel forwarded. Errors are swallowed until the next tick.
    pub fn tick(&mut self) -> bool {
        let points = match self.source.fetch_roi() {
            Ok(points) => points,
            Err(err) => {
                log::debug!("roi poll failed: {}", err);
                return false;
            }
        };
        let signature = RoiSignature::of(points.as_deref());
        if signature == self.last_signature {
            return false;
        }
        self.last_signature = signature;
        self.coordinator.update(points);
        self.updates += 1;
        true
    }

    /// Number of updates this channel has forwarded.
    pub fn updates(&self) -> u64 {
        self.updates
    }

    /// Tick every `interval` on a worker thread until `stop` fires.
    pub fn spawn(mut self, interval: Duration, stop: StopSignal) -> std::io::Result<BackgroundTask> {
        BackgroundTask::spawn("roi-poll", move || loop {
            self.tick();
            if stop.wait(interval) {
                break;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::roi::{RoiPoint, RoiStatus};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct Scripted(Mutex<VecDeque<Result<Option<Vec<RoiPoint>>>>>);

    impl Scripted {
        fn new(replies: Vec<Result<Option<Vec<RoiPoint>>>>) -> Self {
            Self(Mutex::new(replies.into()))
        }
    }

    impl RoiSource for Scripted {
        fn fetch_roi(&self) -> Result<Option<Vec<RoiPoint>>> {
            self.0
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(Error::Transport("script exhausted".into())))
        }
    }

    fn square() -> Vec<RoiPoint> {
        vec![
            RoiPoint::new(0.1, 0.1),
            RoiPoint::new(0.9, 0.1),
            RoiPoint::new(0.9, 0.9),
            RoiPoint::new(0.1, 0.9),
        ]
    }

    #[test]
    fn identical_fetches_forward_once() {
        let coordinator = Arc::new(RoiSyncCoordinator::new());
        let source = Scripted::new(vec![Ok(Some(square())), Ok(Some(square())), Ok(Some(square()))]);
        let mut poll = PollFallbackChannel::new(source, Arc::clone(&coordinator));
        assert!(poll.tick());
        assert!(!poll.tick());
        assert!(!poll.tick());
        assert_eq!(coordinator.version(), 1);
    }

    #[test]
    fn errors_are_swallowed_and_absence_clears() {
        let coordinator = Arc::new(RoiSyncCoordinator::new());
        let source = Scripted::new(vec![
            Ok(Some(square())),
            Err(Error::Transport("timeout".into())),
            Ok(None),
        ]);
        let mut poll = PollFallbackChannel::new(source, Arc::clone(&coordinator));
        assert!(poll.tick());
        assert!(!poll.tick());
        assert_eq!(coordinator.status(), RoiStatus::Ready(4));
        assert!(poll.tick());
        assert_eq!(coordinator.status(), RoiStatus::Missing);
    }

    #[test]
    fn initial_absence_is_not_forwarded() {
        let coordinator = Arc::new(RoiSyncCoordinator::new());
        let mut poll = PollFallbackChannel::new(Scripted::new(vec![Ok(None)]), Arc::clone(&coordinator));
        assert!(!poll.tick());
        assert_eq!(coordinator.status(), RoiStatus::Init);
    }

    #[test]
    fn bootstrap_seeds_and_suppresses_duplicate_first_tick() {
        let coordinator = Arc::new(RoiSyncCoordinator::new());
        let source = Scripted::new(vec![Ok(Some(square())), Ok(Some(square()))]);
        let mut poll = PollFallbackChannel::new(source, Arc::clone(&coordinator));
        assert!(poll.bootstrap().unwrap());
        assert!(!poll.tick());
        assert_eq!(coordinator.version(), 1);
        assert_eq!(poll.updates(), 1);
    }

    #[test]
    fn bootstrap_ignores_empty_roi_and_surfaces_errors() {
        let coordinator = Arc::new(RoiSyncCoordinator::new());
        let source = Scripted::new(vec![Ok(Some(Vec::new())), Err(Error::Transport("down".into()))]);
        let mut poll = PollFallbackChannel::new(source, Arc::clone(&coordinator));
        assert!(!poll.bootstrap().unwrap());
        assert!(poll.bootstrap().is_err());
        assert_eq!(coordinator.status(), RoiStatus::Init);
    }

    #[test]
    fn spawned_loop_stops_promptly() {
        let coordinator = Arc::new(RoiSyncCoordinator::new());
        let poll = PollFallbackChannel::new(Scripted::new(vec![Ok(Some(square()))]), Arc::clone(&coordinator));
        let stop = StopSignal::new();
        let task = poll.spawn(Duration::from_secs(30), stop.clone()).unwrap();
        while coordinator.version() == 0 {
            std::thread::sleep(Duration::from_millis(5));
        }
        stop.stop();
        assert!(task.join_timeout(Duration::from_secs(5)));
    }
}
