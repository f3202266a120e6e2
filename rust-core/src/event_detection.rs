//! Gait Event Detection Module.
//!
//! Detects initial contact (heel strike) and terminal contact (toe off) from
//! heel and toe marker trajectories using:
//! - Zero-phase low-pass filtering of the vertical marker coordinate
//! - Central-difference vertical velocity
//! - Runs of descending heel / rising toe velocity with a magnitude threshold
//! - A height gate relative to the marker's lowest position in the trial
//! - A refractory interval between events of the same kind
//!
//! Treadmill and overground walking use separate parameter sets. On a belt the
//! foot is carried backwards during stance and events repeat at a steady
//! cadence; overground footfalls are discrete and a planted foot drifts slowly,
//! so the overground thresholds are stricter.
//!
//! Missing data never raises: a side whose heel (or toe) marker is absent or
//! entirely occluded simply yields no initial (or terminal) contacts.

use crate::error::{check_sample_rate, GaitError, Result};
use crate::kinematics::MarkerSet;
use crate::signal::{central_difference, FilterConfig, DEFAULT_GAP_DILATION};
use crate::types::{GaitEvents, MarkerTrajectory, PerSide, Side, SideEvents, TrialKind, AXIS_VERTICAL};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Thresholds for one walking condition.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DetectorParams {
    /// Smoothing applied to vertical marker coordinates before differentiation.
    pub filter: FilterConfig,
    /// Minimum downward heel speed (mm/s) that must precede an initial contact.
    pub descent_velocity_mm_s: f64,
    /// Minimum upward toe speed (mm/s) reached after a terminal contact.
    pub lift_velocity_mm_s: f64,
    /// Maximum marker height above its trial minimum (mm) at the event.
    pub contact_height_mm: f64,
    /// Minimum time between two events of the same kind (s).
    pub min_event_interval_s: f64,
}

impl DetectorParams {
    /// Parameters for treadmill walking.
    pub fn treadmill() -> Self {
        Self {
            filter: FilterConfig::order2(7.0),
            descent_velocity_mm_s: 100.0,
            lift_velocity_mm_s: 100.0,
            contact_height_mm: 60.0,
            min_event_interval_s: 0.35,
        }
    }

    /// Parameters for overground walking.
    pub fn overground() -> Self {
        Self {
            filter: FilterConfig::order2(6.0),
            descent_velocity_mm_s: 150.0,
            lift_velocity_mm_s: 150.0,
            contact_height_mm: 80.0,
            min_event_interval_s: 0.45,
        }
    }

    /// Parameters for a walking condition.
    pub fn for_kind(kind: TrialKind) -> Self {
        match kind {
            TrialKind::Treadmill => Self::treadmill(),
            TrialKind::Overground => Self::overground(),
        }
    }

    /// Reject thresholds that would make the detector meaningless.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("descent_velocity_mm_s", self.descent_velocity_mm_s),
            ("lift_velocity_mm_s", self.lift_velocity_mm_s),
            ("contact_height_mm", self.contact_height_mm),
            ("filter.cutoff_hz", self.filter.cutoff_hz),
        ];
        for (field, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(GaitError::invalid_config(
                    field,
                    format!("must be positive, got {value}"),
                ));
            }
        }
        if !(self.min_event_interval_s.is_finite() && self.min_event_interval_s >= 0.0) {
            return Err(GaitError::invalid_config(
                "min_event_interval_s",
                format!("must be non-negative, got {}", self.min_event_interval_s),
            ));
        }
        Ok(())
    }
}

/// Detector configuration: one parameter set per walking condition.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct EventDetectorConfig {
    pub treadmill: DetectorParams,
    pub overground: DetectorParams,
}

impl Default for EventDetectorConfig {
    fn default() -> Self {
        Self {
            treadmill: DetectorParams::treadmill(),
            overground: DetectorParams::overground(),
        }
    }
}

impl EventDetectorConfig {
    /// Parameter set for a walking condition.
    pub fn params(&self, kind: TrialKind) -> &DetectorParams {
        match kind {
            TrialKind::Treadmill => &self.treadmill,
            TrialKind::Overground => &self.overground,
        }
    }

    /// Validate both parameter sets.
    pub fn validate(&self) -> Result<()> {
        self.treadmill.validate()?;
        self.overground.validate()
    }
}

/// Marker-based initial/terminal contact detector.
#[derive(Debug, Clone)]
pub struct GaitEventDetector {
    params: DetectorParams,
}

impl GaitEventDetector {
    /// Create a detector with the given parameters.
    pub fn new(params: DetectorParams) -> Self {
        Self { params }
    }

    /// Create a detector for a walking condition with its default parameters.
    pub fn for_kind(kind: TrialKind) -> Self {
        Self::new(DetectorParams::for_kind(kind))
    }

    /// Active parameters.
    pub fn params(&self) -> &DetectorParams {
        &self.params
    }

    /// Detect events for both sides from `LHEE`/`LTOE` and `RHEE`/`RTOE`.
    pub fn detect(&self, markers: &MarkerSet, marker_rate_hz: f64) -> Result<GaitEvents> {
        let detect = |side: Side| -> Result<SideEvents> {
            let heel = markers.find_side(side, "HEE");
            let toe = markers.find_side(side, "TOE");
            let events = self.detect_side(heel, toe, marker_rate_hz)?;
            tracing::debug!(
                %side,
                initial_contacts = events.initial_contacts.len(),
                terminal_contacts = events.terminal_contacts.len(),
                "detected gait events"
            );
            Ok(events)
        };
        Ok(PerSide::new(detect(Side::Left)?, detect(Side::Right)?))
    }

    /// Detect events for one side. Absent markers yield empty sequences.
    pub fn detect_side(
        &self,
        heel: Option<&MarkerTrajectory>,
        toe: Option<&MarkerTrajectory>,
        marker_rate_hz: f64,
    ) -> Result<SideEvents> {
        let fs = check_sample_rate(marker_rate_hz)?;
        let min_gap = (self.params.min_event_interval_s * fs).round() as usize;

        let initial_contacts = match heel.filter(|t| !t.is_entirely_missing()) {
            Some(heel) => {
                let (height, velocity) = self.vertical_kinematics(heel, fs)?;
                let candidates = self.initial_contact_candidates(&height, &velocity);
                enforce_refractory(candidates, min_gap)
            }
            None => Vec::new(),
        };

        let terminal_contacts = match toe.filter(|t| !t.is_entirely_missing()) {
            Some(toe) => {
                let (height, velocity) = self.vertical_kinematics(toe, fs)?;
                let candidates = self.terminal_contact_candidates(&height, &velocity);
                enforce_refractory(candidates, min_gap)
            }
            None => Vec::new(),
        };

        Ok(SideEvents::new(initial_contacts, terminal_contacts))
    }

    // =========================================================================
    // PRIVATE METHODS
    // =========================================================================

    /// Filtered height above the trial minimum, and vertical velocity.
    fn vertical_kinematics(
        &self,
        marker: &MarkerTrajectory,
        fs: f64,
    ) -> Result<(Vec<f64>, Vec<f64>)> {
        let filter = self.params.filter.design(fs)?;
        let z = filter.filtfilt_omit_nan(&marker.axis(AXIS_VERTICAL), DEFAULT_GAP_DILATION);
        let floor = z
            .iter()
            .copied()
            .filter(|v| v.is_finite())
            .fold(f64::INFINITY, f64::min);
        let height = z.iter().map(|v| v - floor).collect();
        let velocity = central_difference(&z, fs);
        Ok((height, velocity))
    }

    /// The heel stops descending: first sample after a fast downward run.
    fn initial_contact_candidates(&self, height: &[f64], velocity: &[f64]) -> Vec<usize> {
        velocity_runs(velocity, |v| v < 0.0)
            .into_iter()
            .filter(|run| run.extreme <= -self.params.descent_velocity_mm_s)
            .map(|run| run.end)
            .filter(|&i| i < velocity.len() && velocity[i] >= 0.0)
            .filter(|&i| height[i] <= self.params.contact_height_mm)
            .collect()
    }

    /// The toe starts rising: first sample of a fast upward run that follows
    /// valid ground contact.
    fn terminal_contact_candidates(&self, height: &[f64], velocity: &[f64]) -> Vec<usize> {
        velocity_runs(velocity, |v| v > 0.0)
            .into_iter()
            .filter(|run| run.extreme >= self.params.lift_velocity_mm_s)
            .filter(|run| run.start > 0 && velocity[run.start - 1].is_finite())
            .map(|run| run.start)
            .filter(|&i| height[i] <= self.params.contact_height_mm)
            .collect()
    }
}

/// A maximal run of samples satisfying a predicate.
#[derive(Debug, Clone, Copy)]
struct VelocityRun {
    start: usize,
    /// One past the last sample of the run.
    end: usize,
    /// Largest magnitude value inside the run, with its sign.
    extreme: f64,
}

fn velocity_runs(velocity: &[f64], inside: impl Fn(f64) -> bool) -> Vec<VelocityRun> {
    let mut runs = Vec::new();
    let mut i = 0;
    while i < velocity.len() {
        if !inside(velocity[i]) {
            i += 1;
            continue;
        }
        let start = i;
        let mut extreme = velocity[i];
        while i < velocity.len() && inside(velocity[i]) {
            if velocity[i].abs() > extreme.abs() {
                extreme = velocity[i];
            }
            i += 1;
        }
        runs.push(VelocityRun {
            start,
            end: i,
            extreme,
        });
    }
    runs
}

/// Keep candidates at least `min_gap` samples after the previously kept one.
fn enforce_refractory(candidates: Vec<usize>, min_gap: usize) -> Vec<usize> {
    let mut kept: Vec<usize> = Vec::with_capacity(candidates.len());
    for c in candidates {
        match kept.last() {
            Some(&last) if c < last + min_gap.max(1) => {}
            _ => kept.push(c),
        }
    }
    kept
}

// ============================================================================
// TESTS
// ============================================================================
