//! Terminal presentation: startup stages and the live status line.
//!
//! Pretty mode draws indicatif spinners on stderr; plain mode (or a non-tty
//! stderr) prints one line per stage and leaves status to the log.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::{Duration, Instant};

use crate::roi::RoiStatus;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum UiMode {
    #[default]
    Auto,
    Plain,
    Pretty,
}

#[derive(Clone, Debug)]
pub struct Ui {
    pretty: bool,
}

impl Ui {
    pub fn new(mode: UiMode, stderr_is_tty: bool) -> Self {
        let pretty = stderr_is_tty && !matches!(mode, UiMode::Plain);
        Self { pretty }
    }

    pub fn is_pretty(&self) -> bool {
        self.pretty
    }

    pub fn stage(&self, name: &str) -> StageGuard {
        let spinner = if self.pretty {
            let spinner = spinner_with_template("{spinner} {msg}");
            spinner.set_message(format!("{name}…"));
            Some(spinner)
        } else {
            eprintln!("==> {}", name);
            None
        };
        StageGuard {
            name: name.to_string(),
            start: Instant::now(),
            spinner,
            failed: false,
        }
    }

    /// Live one-line status for the frame loop. In plain mode only ROI
    /// readiness transitions are reported, through the log.
    pub fn status_line(&self) -> StatusLine {
        StatusLine {
            bar: self
                .pretty
                .then(|| spinner_with_template("{spinner} {prefix:.bold} {msg}")),
            roi_ready: None,
        }
    }
}

fn spinner_with_template(template: &str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_draw_target(ProgressDrawTarget::stderr());
    spinner.enable_steady_tick(Duration::from_millis(120));
    let style = ProgressStyle::with_template(template).unwrap_or_else(|_| ProgressStyle::default_spinner());
    spinner.set_style(style);
    spinner
}

pub struct StageGuard {
    name: String,
    start: Instant,
    spinner: Option<ProgressBar>,
    failed: bool,
}

impl StageGuard {
    /// End the stage with a failure mark instead of a check.
    pub fn fail(mut self, reason: &str) {
        self.failed = true;
        let message = format!("✘ {} ({})", self.name, reason);
        match self.spinner.take() {
            Some(spinner) => spinner.abandon_with_message(message),
            None => eprintln!("{message}"),
        }
    }
}

impl Drop for StageGuard {
    fn drop(&mut self) {
        if self.failed {
            return;
        }
        let message = format!("✔ {} ({})", self.name, format_duration(self.start.elapsed()));
        match self.spinner.take() {
            Some(spinner) => spinner.finish_with_message(message),
            None => eprintln!("{message}"),
        }
    }
}

pub struct StatusLine {
    bar: Option<ProgressBar>,
    roi_ready: Option<bool>,
}

impl StatusLine {
    /// Record whether the gate has a usable ROI. Returns true when this
    /// differs from the last call.
    pub fn set_roi_ready(&mut self, roi: RoiStatus, ready: bool) -> bool {
        if self.roi_ready == Some(ready) {
            return false;
        }
        self.roi_ready = Some(ready);
        match &self.bar {
            Some(bar) => bar.set_prefix(roi_prefix(roi, ready)),
            None if ready => log::info!("ROI {}; detection running", roi),
            None => log::info!("waiting for ROI ({})", roi),
        }
        true
    }

    /// Periodic refresh of the pretty status line.
    pub fn update(&self, roi: RoiStatus, roi_ready: bool, detail: &str) {
        if let Some(bar) = &self.bar {
            bar.set_prefix(roi_prefix(roi, roi_ready));
            bar.set_message(detail.to_string());
        }
    }

    pub fn finish(self) {
        if let Some(bar) = self.bar {
            bar.finish_and_clear();
        }
    }
}

fn roi_prefix(roi: RoiStatus, ready: bool) -> String {
    if ready {
        format!("ROI {}", roi)
    } else {
        format!("waiting for ROI ({})", roi)
    }
}

fn format_duration(duration: Duration) -> String {
    if duration.as_secs() >= 1 {
        format!("{:.2}s", duration.as_secs_f64())
    } else {
        format!("{}ms", duration.as_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_mode_and_non_tty_are_not_pretty() {
        assert!(!Ui::new(UiMode::Plain, true).is_pretty());
        assert!(!Ui::new(UiMode::Pretty, false).is_pretty());
        assert!(Ui::new(UiMode::Auto, true).is_pretty());
    }

    #[test]
    fn roi_readiness_reported_on_transitions_only() {
        let mut status = Ui::new(UiMode::Plain, false).status_line();
        assert!(status.set_roi_ready(RoiStatus::Init, false));
        assert!(!status.set_roi_ready(RoiStatus::Init, false));
        assert!(status.set_roi_ready(RoiStatus::Ready(4), true));
        assert!(!status.set_roi_ready(RoiStatus::Ready(4), true));
        assert!(status.set_roi_ready(RoiStatus::Missing, false));
    }

    #[test]
    fn prefix_shows_waiting_until_ready() {
        assert_eq!(roi_prefix(RoiStatus::Init, false), "waiting for ROI (init)");
        assert_eq!(roi_prefix(RoiStatus::Ready(3), true), "ROI ready:3");
    }

    #[test]
    fn durations_format_by_magnitude() {
        assert_eq!(format_duration(Duration::from_millis(250)), "250ms");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.50s");
    }
}
