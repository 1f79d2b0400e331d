//! Background worker threads with cooperative, time-bounded shutdown.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

/// One-way stop flag that workers can sleep on.
#[derive(Clone, Default)]
pub struct StopSignal {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        let (flag, cvar) = &*self.inner;
        *flag.lock().unwrap_or_else(|p| p.into_inner()) = true;
        cvar.notify_all();
    }

    pub fn is_stopped(&self) -> bool {
        *self.inner.0.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Sleep for `timeout` unless stopped first. Returns true when stopped.
    pub fn wait(&self, timeout: Duration) -> bool {
        let (flag, cvar) = &*self.inner;
        let guard = flag.lock().unwrap_or_else(|p| p.into_inner());
        let (guard, _) = cvar
            .wait_timeout_while(guard, timeout, |stopped| !*stopped)
            .unwrap_or_else(|p| p.into_inner());
        *guard
    }
}

/// A named worker thread that reports completion over a channel, so the
/// owner can wait for it with a deadline instead of an unbounded `join`.
pub struct BackgroundTask {
    name: String,
    handle: JoinHandle<()>,
    done: Receiver<()>,
}

impl BackgroundTask {
    pub fn spawn<F>(name: &str, body: F) -> std::io::Result<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        let (done_tx, done) = mpsc::channel();
        let handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                body();
                let _ = done_tx.send(());
            })?;
        Ok(Self {
            name: name.to_string(),
            handle,
            done,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Join if the worker exits within `timeout`; otherwise detach it.
    /// Returns true when the worker was joined.
    pub fn join_timeout(self, timeout: Duration) -> bool {
        match self.done.recv_timeout(timeout) {
            // Disconnected means the body panicked before signalling.
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if self.handle.join().is_err() {
                    log::warn!("{} worker panicked", self.name);
                }
                true
            }
            Err(RecvTimeoutError::Timeout) => {
                log::warn!("{} worker did not stop within {:?}; detaching", self.name, timeout);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn wait_returns_early_when_stopped() {
        let stop = StopSignal::new();
        let remote = stop.clone();
        let task = BackgroundTask::spawn("waiter", move || {
            while !remote.wait(Duration::from_secs(30)) {}
        })
        .unwrap();

        let started = Instant::now();
        stop.stop();
        assert!(task.join_timeout(Duration::from_secs(5)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn wait_times_out_without_stop() {
        let stop = StopSignal::new();
        assert!(!stop.wait(Duration::from_millis(10)));
        assert!(!stop.is_stopped());
    }

    #[test]
    fn join_timeout_detaches_stuck_worker() {
        let stop = StopSignal::new();
        let remote = stop.clone();
        let task = BackgroundTask::spawn("stuck", move || {
            std::thread::sleep(Duration::from_millis(300));
            drop(remote);
        })
        .unwrap();
        assert!(!task.join_timeout(Duration::from_millis(10)));
    }
}
