//! Marker lookup and marker-derived kinematic signals.
//!
//! Marker data arrives as a name → trajectory mapping. Names are matched by
//! suffix so that session-prefixed labels (`subject:LHEE`) resolve to the
//! standard label (`LHEE`). Everything downstream works on resolved
//! trajectories; no other module looks markers up by string.
//!
//! The sacrum acceleration derived here is the motion-capture counterpart of
//! the lumbar IMU signal and feeds the braking/propulsion segmenter.

use std::collections::BTreeMap;

use crate::error::{check_sample_rate, Result};
use crate::signal::{backward_difference, FilterConfig, DEFAULT_GAP_DILATION};
use crate::types::{AnalogSignal, MarkerTrajectory, Side, AXIS_AP};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Marker trajectories of one trial keyed by label.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct MarkerSet {
    markers: BTreeMap<String, MarkerTrajectory>,
}

impl MarkerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a marker.
    pub fn insert(&mut self, label: impl Into<String>, trajectory: MarkerTrajectory) {
        self.markers.insert(label.into(), trajectory);
    }

    /// Builder-style [`insert`](Self::insert).
    #[must_use]
    pub fn with(mut self, label: impl Into<String>, trajectory: MarkerTrajectory) -> Self {
        self.insert(label, trajectory);
        self
    }

    /// Number of markers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.markers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }

    /// Longest trajectory length; the trial's frame count.
    #[must_use]
    pub fn frame_count(&self) -> usize {
        self.markers.values().map(MarkerTrajectory::len).max().unwrap_or(0)
    }

    /// Resolve a label: exact match first, otherwise the first label (in
    /// sorted order) ending with `label`.
    pub fn find(&self, label: &str) -> Option<&MarkerTrajectory> {
        self.markers.get(label).or_else(|| {
            self.markers
                .iter()
                .find(|(key, _)| key.ends_with(label))
                .map(|(_, traj)| traj)
        })
    }

    /// Resolve a side-specific label such as `HEE` → `LHEE` / `RHEE`.
    pub fn find_side(&self, side: Side, label: &str) -> Option<&MarkerTrajectory> {
        self.find(&format!("{}{}", side.marker_prefix(), label))
    }

    /// Like [`find_side`](Self::find_side), but an entirely occluded marker counts as absent.
    pub fn find_side_present(&self, side: Side, label: &str) -> Option<&MarkerTrajectory> {
        self.find_side(side, label)
            .filter(|traj| !traj.is_entirely_missing())
    }
}

/// Parameters for sacrum kinematics.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SacrumConfig {
    /// Marker smoothing before differentiation. Typical: 2nd order, 15 Hz.
    pub filter: FilterConfig,

    /// Samples masked either side of a marker gap after filtering.
    pub gap_dilation: usize,
}

impl Default for SacrumConfig {
    fn default() -> Self {
        Self {
            filter: FilterConfig::order2(15.0),
            gap_dilation: DEFAULT_GAP_DILATION,
        }
    }
}

/// Sacrum position as the midpoint of the filtered posterior iliac spine markers.
///
/// Returns `Ok(None)` when either `LPSI` or `RPSI` is absent or entirely
/// occluded. Frames where either raw marker is missing are missing.
pub fn sacrum_position(
    markers: &MarkerSet,
    marker_rate_hz: f64,
    config: &SacrumConfig,
) -> Result<Option<MarkerTrajectory>> {
    let fs = check_sample_rate(marker_rate_hz)?;
    let (Some(lpsi), Some(rpsi)) = (
        markers.find_side_present(Side::Left, "PSI"),
        markers.find_side_present(Side::Right, "PSI"),
    ) else {
        return Ok(None);
    };

    let filter = config.filter.design(fs)?;
    let smooth = |traj: &MarkerTrajectory| {
        let axes: Vec<Vec<f64>> = (0..3)
            .map(|k| filter.filtfilt_omit_nan(&traj.axis(k), config.gap_dilation))
            .collect();
        MarkerTrajectory::from_axes(&axes[0], &axes[1], &axes[2])
    };

    let mut sacrum = MarkerTrajectory::midpoint(&smooth(lpsi), &smooth(rpsi));
    for (i, p) in sacrum.positions.iter_mut().enumerate() {
        if lpsi.is_missing(i) || rpsi.is_missing(i) {
            *p = [f64::NAN; 3];
        }
    }
    Ok(Some(sacrum))
}

/// Anterior-posterior sacrum acceleration in m/s², at the marker rate.
///
/// Position is differentiated twice by backward differences, so the first
/// two samples are missing.
pub fn sacrum_ap_acceleration(
    markers: &MarkerSet,
    marker_rate_hz: f64,
    config: &SacrumConfig,
) -> Result<Option<AnalogSignal>> {
    let Some(sacrum) = sacrum_position(markers, marker_rate_hz, config)? else {
        return Ok(None);
    };

    let position_m: Vec<f64> = sacrum.axis(AXIS_AP).iter().map(|mm| mm / 1000.0).collect();
    let velocity = backward_difference(&position_m, marker_rate_hz);
    let acceleration = backward_difference(&velocity, marker_rate_hz);

    tracing::debug!(
        samples = acceleration.len(),
        "derived sacrum AP acceleration from pelvis markers"
    );
    Ok(Some(AnalogSignal::new(acceleration, marker_rate_hz)))
}

// ==== TESTS ====
