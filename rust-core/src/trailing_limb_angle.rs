//! Trailing limb angle (TLA).
//!
//! The angle between the lab vertical and the sagittal projection of the
//! vector joining a proximal landmark (pelvis, hip, trochanter) to a distal
//! one (toe, metatarsal head, ankle, foot centre). It is sampled at three
//! moments per stride:
//!
//! - aTLA: at each propulsion peak,
//! - tcTLA: at each terminal contact,
//! - maxTLA: the maximum between consecutive initial contacts.
//!
//! Frames where either landmark is missing give `NaN`, and a stride whose
//! whole window is missing gets no maximum rather than a spurious one.

use crate::kinematics::MarkerSet;
use crate::signal::nan_argmax;
use crate::types::{
    EventValue, MarkerTrajectory, PeakRecord, Side, SideEvents, AXIS_AP, AXIS_VERTICAL,
};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Proximal end of the limb vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum ProximalLandmark {
    /// Midpoint of the same side's ASI and PSI markers.
    #[default]
    PelvisCenter,
    /// `HJC` marker.
    HipJointCenter,
    /// `GrTroch` marker.
    GreaterTrochanter,
}

/// Distal end of the limb vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum DistalLandmark {
    #[default]
    Toe,
    SecondMetatarsal,
    FifthMetatarsal,
    Ankle,
    /// Midpoint of the `TOE` and `HEE` markers.
    FootCenter,
}

impl ProximalLandmark {
    fn resolve(self, markers: &MarkerSet, side: Side) -> Option<MarkerTrajectory> {
        match self {
            ProximalLandmark::PelvisCenter => Some(MarkerTrajectory::midpoint(
                markers.find_side_present(side, "ASI")?,
                markers.find_side_present(side, "PSI")?,
            )),
            ProximalLandmark::HipJointCenter => markers.find_side_present(side, "HJC").cloned(),
            ProximalLandmark::GreaterTrochanter => {
                markers.find_side_present(side, "GrTroch").cloned()
            }
        }
    }
}

impl DistalLandmark {
    fn resolve(self, markers: &MarkerSet, side: Side) -> Option<MarkerTrajectory> {
        let label = match self {
            DistalLandmark::Toe => "TOE",
            DistalLandmark::SecondMetatarsal => "MT2",
            DistalLandmark::FifthMetatarsal => "MT5",
            DistalLandmark::Ankle => "ANK",
            DistalLandmark::FootCenter => {
                return Some(MarkerTrajectory::midpoint(
                    markers.find_side_present(side, "TOE")?,
                    markers.find_side_present(side, "HEE")?,
                ))
            }
        };
        markers.find_side_present(side, label).cloned()
    }
}

/// Landmark choice for the limb vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct TlaConfig {
    pub proximal: ProximalLandmark,
    pub distal: DistalLandmark,
}

/// Maximum TLA over one stride window `[first, second)`.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MaxTlaRecord {
    pub first: usize,
    pub second: usize,
    /// `None` when the window holds no valid angle.
    pub peak: Option<PeakRecord>,
}

/// TLA samples of one side, in degrees.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SideTla {
    /// At each propulsion peak.
    pub at_propulsion_peak: Vec<EventValue>,
    /// At each terminal contact.
    pub at_terminal_contact: Vec<EventValue>,
    /// Per stride between consecutive initial contacts.
    pub max_per_stride: Vec<MaxTlaRecord>,
}

/// Trailing limb angle extractor.
#[derive(Debug, Clone, Default)]
pub struct TrailingLimbAngle {
    config: TlaConfig,
}

impl TrailingLimbAngle {
    pub fn new(config: TlaConfig) -> Self {
        Self { config }
    }

    /// Per-frame TLA in degrees, or `None` when a landmark is unavailable.
    pub fn series(&self, markers: &MarkerSet, side: Side) -> Option<Vec<f64>> {
        let proximal = self.config.proximal.resolve(markers, side)?;
        let distal = self.config.distal.resolve(markers, side)?;
        Some(limb_angle(&proximal, &distal))
    }

    /// aTLA, tcTLA and maxTLA for one side.
    ///
    /// `propulsion_peaks` must be indexed at the marker rate. Sides without
    /// landmarks yield an empty result.
    pub fn extract(
        &self,
        markers: &MarkerSet,
        side: Side,
        events: &SideEvents,
        propulsion_peaks: &[PeakRecord],
    ) -> SideTla {
        let Some(series) = self.series(markers, side) else {
            tracing::debug!(%side, "trailing limb angle landmarks unavailable");
            return SideTla::default();
        };
        extract_from_series(&series, events, propulsion_peaks)
    }
}

/// Angle to the vertical of `proximal − distal`, projected on the sagittal plane.
///
/// Positive when the distal landmark lies further along +AP than the proximal one.
pub fn limb_angle(proximal: &MarkerTrajectory, distal: &MarkerTrajectory) -> Vec<f64> {
    let len = proximal.len().min(distal.len());
    (0..len)
        .map(|i| match (proximal.get(i), distal.get(i)) {
            (Some(p), Some(d)) => {
                let ap = p[AXIS_AP] - d[AXIS_AP];
                let vertical = p[AXIS_VERTICAL] - d[AXIS_VERTICAL];
                (-ap).atan2(vertical).to_degrees()
            }
            _ => f64::NAN,
        })
        .collect()
}

/// Sample a TLA series at the gait events of one side.
pub fn extract_from_series(
    series: &[f64],
    events: &SideEvents,
    propulsion_peaks: &[PeakRecord],
) -> SideTla {
    let sample = |index: usize| {
        series.get(index).map(|&value| EventValue { index, value })
    };

    let max_per_stride = events
        .initial_contacts
        .windows(2)
        .map(|w| MaxTlaRecord {
            first: w[0],
            second: w[1],
            peak: nan_argmax(series, w[0], w[1]).map(|index| PeakRecord {
                index,
                value: series[index],
            }),
        })
        .collect();

    SideTla {
        at_propulsion_peak: propulsion_peaks.iter().filter_map(|p| sample(p.index)).collect(),
        at_terminal_contact: events.terminal_contacts.iter().filter_map(|&tc| sample(tc)).collect(),
        max_per_stride,
    }
}

// ==== TESTS ====
