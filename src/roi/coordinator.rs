//! Canonical ROI state shared by the sync channels and the frame loop.
//!
//! Writers (push and poll channels) call `update`; the frame loop calls
//! `snapshot`. The mutex only guards plain-data copy/compare/increment; no
//! parsing or geometry work happens while it is held.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use super::{RoiPoint, MIN_POLYGON_POINTS};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoiStatus {
    /// No update has been applied yet.
    Init,
    /// A polygon with this many points is available.
    Ready(usize),
    /// The backend reported no (or an unusable) ROI.
    Missing,
}

impl fmt::Display for RoiStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Init => write!(f, "init"),
            Self::Ready(n) => write!(f, "ready:{}", n),
            Self::Missing => write!(f, "missing"),
        }
    }
}

/// Canonical coordinate tuple used to detect semantic change.
/// Empty means "no ROI".
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RoiSignature(Vec<(f64, f64)>);

impl RoiSignature {
    pub fn of(points: Option<&[RoiPoint]>) -> Self {
        Self(
            points
                .unwrap_or_default()
                .iter()
                .map(|p| (p.x, p.y))
                .collect(),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Point-in-time copy handed to the frame loop.
#[derive(Clone, Debug)]
pub struct RoiSnapshot {
    pub points: Option<Arc<[RoiPoint]>>,
    pub version: u64,
    /// True exactly once after a genuine change.
    pub force_reset: bool,
}

struct RoiState {
    points: Option<Arc<[RoiPoint]>>,
    version: u64,
    signature: RoiSignature,
    status: RoiStatus,
    force_reset: bool,
}

pub struct RoiSyncCoordinator {
    state: Mutex<RoiState>,
    verbose: bool,
}

impl Default for RoiSyncCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl RoiSyncCoordinator {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RoiState {
                points: None,
                version: 0,
                signature: RoiSignature::default(),
                status: RoiStatus::Init,
                force_reset: false,
            }),
            verbose: false,
        }
    }

    /// Log every update, not only genuine changes.
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    fn lock(&self) -> MutexGuard<'_, RoiState> {
        // State is plain data; a panicking writer cannot leave it half-updated.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Apply an update from either channel.
    ///
    /// The version always advances. `force_reset` is raised only when the
    /// signature or status differs from the previous update. Point sets with
    /// fewer than three vertices are treated as "no ROI".
    pub fn update(&self, points: Option<Vec<RoiPoint>>) {
        let points: Option<Arc<[RoiPoint]>> = points
            .filter(|p| p.len() >= MIN_POLYGON_POINTS)
            .map(Arc::from);
        let signature = RoiSignature::of(points.as_deref());
        let status = match &points {
            Some(p) => RoiStatus::Ready(p.len()),
            None => RoiStatus::Missing,
        };

        let (changed, version) = {
            let mut state = self.lock();
            state.version += 1;
            let changed = status != state.status || signature != state.signature;
            state.points = points;
            state.status = status;
            state.signature = signature;
            if changed {
                state.force_reset = true;
            }
            (changed, state.version)
        };

        if changed || self.verbose {
            match status {
                RoiStatus::Ready(n) => log::info!("roi updated: {} points (version {})", n, version),
                _ => log::info!("roi cleared or missing on backend (version {})", version),
            }
        }
    }

    /// Copy the current state, consuming a pending `force_reset`.
    pub fn snapshot(&self) -> RoiSnapshot {
        let mut state = self.lock();
        let force_reset = std::mem::take(&mut state.force_reset);
        RoiSnapshot {
            points: state.points.clone(),
            version: state.version,
            force_reset,
        }
    }

    pub fn status(&self) -> RoiStatus {
        self.lock().status
    }

    pub fn version(&self) -> u64 {
        self.lock().version
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triangle(offset: f64) -> Vec<RoiPoint> {
        vec![
            RoiPoint::new(offset, offset),
            RoiPoint::new(offset + 10.0, offset),
            RoiPoint::new(offset + 10.0, offset + 10.0),
        ]
    }

    #[test]
    fn starts_in_init() {
        let coord = RoiSyncCoordinator::new();
        assert_eq!(coord.status(), RoiStatus::Init);
        let snap = coord.snapshot();
        assert_eq!(snap.version, 0);
        assert!(snap.points.is_none());
        assert!(!snap.force_reset);
    }

    #[test]
    fn version_always_increments_and_reset_tracks_real_changes() {
        let coord = RoiSyncCoordinator::new();

        coord.update(Some(triangle(0.0)));
        let snap = coord.snapshot();
        assert_eq!(snap.version, 1);
        assert!(snap.force_reset);
        assert_eq!(coord.status(), RoiStatus::Ready(3));

        coord.update(Some(triangle(0.0)));
        let snap = coord.snapshot();
        assert_eq!(snap.version, 2);
        assert!(!snap.force_reset, "identical content must not force a reset");

        coord.update(Some(triangle(5.0)));
        assert!(coord.snapshot().force_reset);

        coord.update(None);
        let snap = coord.snapshot();
        assert_eq!(snap.version, 4);
        assert!(snap.force_reset);
        assert_eq!(coord.status(), RoiStatus::Missing);
    }

    #[test]
    fn force_reset_is_consumed_exactly_once() {
        let coord = RoiSyncCoordinator::new();
        coord.update(Some(triangle(1.0)));
        assert!(coord.snapshot().force_reset);
        assert!(!coord.snapshot().force_reset);
    }

    #[test]
    fn first_missing_update_is_a_status_change() {
        let coord = RoiSyncCoordinator::new();
        coord.update(None);
        assert!(coord.snapshot().force_reset);
        coord.update(None);
        assert!(!coord.snapshot().force_reset);
    }

    #[test]
    fn degenerate_point_sets_count_as_missing() {
        let coord = RoiSyncCoordinator::new();
        coord.update(Some(vec![RoiPoint::new(1.0, 1.0), RoiPoint::new(2.0, 2.0)]));
        assert_eq!(coord.status(), RoiStatus::Missing);
        assert!(coord.snapshot().points.is_none());
    }

    #[test]
    fn status_display() {
        assert_eq!(RoiStatus::Init.to_string(), "init");
        assert_eq!(RoiStatus::Ready(4).to_string(), "ready:4");
        assert_eq!(RoiStatus::Missing.to_string(), "missing");
    }
}
