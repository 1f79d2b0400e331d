//! Capture supervision: bounded open retries and reopen after repeated
//! read failures.

use std::time::Duration;

use super::VideoSource;
use crate::error::{Error, Result};
use crate::frame::CapturedFrame;

#[derive(Clone, Debug)]
pub struct CapturePolicy {
    pub open_attempts: u32,
    pub open_retry_delay: Duration,
    /// Consecutive failed reads that trigger a release and reopen.
    pub failure_threshold: u32,
    pub reopen_cooldown: Duration,
    /// Pause after an isolated failed read.
    pub read_retry_delay: Duration,
    /// Pause after a reopen that itself failed.
    pub reopen_failure_delay: Duration,
}

impl Default for CapturePolicy {
    fn default() -> Self {
        Self {
            open_attempts: 3,
            open_retry_delay: Duration::from_millis(500),
            failure_threshold: 6,
            reopen_cooldown: Duration::from_millis(400),
            read_retry_delay: Duration::from_millis(30),
            reopen_failure_delay: Duration::from_secs(1),
        }
    }
}

impl CapturePolicy {
    /// Same counts, no sleeping.
    pub fn immediate(self) -> Self {
        Self {
            open_retry_delay: Duration::ZERO,
            reopen_cooldown: Duration::ZERO,
            read_retry_delay: Duration::ZERO,
            reopen_failure_delay: Duration::ZERO,
            ..self
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CaptureStats {
    pub frames: u64,
    pub read_failures: u64,
    pub reopens: u64,
    pub failed_reopens: u64,
}

pub struct CaptureSupervisor<S: VideoSource> {
    source: S,
    policy: CapturePolicy,
    consecutive_failures: u32,
    stats: CaptureStats,
}

impl<S: VideoSource> CaptureSupervisor<S> {
    pub fn new(source: S, policy: CapturePolicy) -> Self {
        Self {
            source,
            policy,
            consecutive_failures: 0,
            stats: CaptureStats::default(),
        }
    }

    /// Open with up to `open_attempts` tries. Exhaustion is a
    /// `Capture` error for the caller to act on.
    pub fn open(&mut self) -> Result<()> {
        let attempts = self.policy.open_attempts.max(1);
        let mut last_error = None;
        for attempt in 1..=attempts {
            match self.source.open() {
                Ok(()) => {
                    if let Err(err) = self.source.set_min_buffering() {
                        log::debug!("{}: could not reduce buffering: {}", self.source.describe(), err);
                    }
                    return Ok(());
                }
                Err(err) => {
                    log::warn!(
                        "open {} failed (attempt {}/{}): {}",
                        self.source.describe(),
                        attempt,
                        attempts,
                        err
                    );
                    last_error = Some(err);
                }
            }
            if attempt < attempts {
                std::thread::sleep(self.policy.open_retry_delay);
            }
        }
        Err(Error::Capture(format!(
            "could not open {} after {} attempts: {}",
            self.source.describe(),
            attempts,
            last_error.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    /// Read one frame. Failures are absorbed here: short pause below the
    /// threshold, release/cooldown/reopen at it.
    pub fn next_frame(&mut self) -> Option<CapturedFrame> {
        match self.source.read_frame() {
            Ok(Some(frame)) => {
                self.consecutive_failures = 0;
                self.stats.frames += 1;
                return Some(frame);
            }
            Ok(None) => {}
            Err(err) => log::debug!("{}: read failed: {}", self.source.describe(), err),
        }
        self.on_read_failure();
        None
    }

    fn on_read_failure(&mut self) {
        self.consecutive_failures += 1;
        self.stats.read_failures += 1;
        if self.consecutive_failures < self.policy.failure_threshold {
            std::thread::sleep(self.policy.read_retry_delay);
            return;
        }

        log::warn!(
            "{} consecutive read failures on {}; reconnecting",
            self.consecutive_failures,
            self.source.describe()
        );
        self.source.release();
        std::thread::sleep(self.policy.reopen_cooldown);
        match self.open() {
            Ok(()) => {
                self.consecutive_failures = 0;
                self.stats.reopens += 1;
                log::info!("reconnected {}", self.source.describe());
            }
            Err(err) => {
                self.consecutive_failures = self.policy.failure_threshold;
                self.stats.failed_reopens += 1;
                log::warn!("reconnect failed: {}", err);
                std::thread::sleep(self.policy.reopen_failure_delay);
            }
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn stats(&self) -> &CaptureStats {
        &self.stats
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn release(&mut self) {
        self.source.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Source that fails its first `open_failures` opens and replays a
    /// script of reads (`true` = frame, `false` = empty read).
    struct ScriptedSource {
        open_failures: u32,
        opens: u32,
        releases: u32,
        reads: VecDeque<bool>,
    }

    impl ScriptedSource {
        fn new(open_failures: u32, reads: &[bool]) -> Self {
            Self {
                open_failures,
                opens: 0,
                releases: 0,
                reads: reads.iter().copied().collect(),
            }
        }
    }

    impl VideoSource for ScriptedSource {
        fn open(&mut self) -> Result<()> {
            self.opens += 1;
            if self.opens <= self.open_failures {
                return Err(Error::Capture("camera offline".into()));
            }
            Ok(())
        }

        fn read_frame(&mut self) -> Result<Option<CapturedFrame>> {
            match self.reads.pop_front() {
                Some(true) => CapturedFrame::new(2, 2, vec![0; 12]).map(Some),
                _ => Ok(None),
            }
        }

        fn release(&mut self) {
            self.releases += 1;
        }

        fn describe(&self) -> String {
            "scripted".to_string()
        }
    }

    fn supervisor(source: ScriptedSource) -> CaptureSupervisor<ScriptedSource> {
        CaptureSupervisor::new(source, CapturePolicy::default().immediate())
    }

    #[test]
    fn open_succeeds_when_source_recovers_within_attempts() {
        for k in 1..=3 {
            let mut sup = supervisor(ScriptedSource::new(k - 1, &[]));
            assert!(sup.open().is_ok(), "available on attempt {}", k);
            assert_eq!(sup.source().opens, k);
        }
    }

    #[test]
    fn open_fails_with_capture_error_after_attempts() {
        let mut sup = supervisor(ScriptedSource::new(3, &[]));
        let err = sup.open().unwrap_err();
        assert!(matches!(err, Error::Capture(_)));
        assert_eq!(sup.source().opens, 3);
    }

    #[test]
    fn isolated_failures_do_not_reopen() {
        let mut sup = supervisor(ScriptedSource::new(0, &[false, false, true, false, true]));
        sup.open().unwrap();
        let frames = (0..5).filter_map(|_| sup.next_frame()).count();
        assert_eq!(frames, 2);
        assert_eq!(sup.source().releases, 0);
        assert_eq!(sup.stats().reopens, 0);
        assert_eq!(sup.consecutive_failures(), 0);
    }

    #[test]
    fn threshold_failures_reopen_exactly_once() {
        let mut reads = vec![false; 6];
        reads.extend([true, true]);
        let mut sup = supervisor(ScriptedSource::new(0, &reads));
        sup.open().unwrap();
        for _ in 0..8 {
            sup.next_frame();
        }
        assert_eq!(sup.source().releases, 1);
        assert_eq!(sup.source().opens, 2);
        assert_eq!(sup.stats().reopens, 1);
        assert_eq!(sup.stats().frames, 2);
        assert_eq!(sup.consecutive_failures(), 0);
    }

    #[test]
    fn failed_reopen_holds_counter_at_threshold_and_retries_next_failure() {
        // Initial open ok, then every reopen attempt fails (3 tries each).
        let mut sup = supervisor(ScriptedSource::new(0, &[false; 7]));
        sup.open().unwrap();
        sup.source.open_failures = u32::MAX;
        for _ in 0..7 {
            sup.next_frame();
        }
        assert_eq!(sup.stats().failed_reopens, 2);
        assert_eq!(sup.source().releases, 2);
        assert_eq!(sup.consecutive_failures(), 6);
    }
}
