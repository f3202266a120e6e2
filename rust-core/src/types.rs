//! Core data types for the gait engine.
//!
//! This module defines the time series, event and record types shared by the
//! detector, the feature calculators and the step-table assembler.
//!
//! Design principle: if a concept exists, it gets a type. Feature streams are
//! named fields on typed structs, never string-keyed dictionaries, and "no
//! index found" is `Option::None`, never a sentinel value.
//!
//! Axis convention for every 3D position: `x` mediolateral, `y`
//! anterior-posterior, `z` vertical. Positions are in millimetres.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A 3D marker position in millimetres.
pub type Vec3 = [f64; 3];

/// Index of the mediolateral axis.
pub const AXIS_ML: usize = 0;
/// Index of the anterior-posterior axis.
pub const AXIS_AP: usize = 1;
/// Index of the vertical axis.
pub const AXIS_VERTICAL: usize = 2;

/// Sampled 3D trajectory of one marker.
///
/// A sample is missing (occluded) when it is the zero vector or contains a
/// `NaN` component. Index 0 is the first recorded frame.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct MarkerTrajectory {
    /// Per-frame positions.
    pub positions: Vec<Vec3>,
}

impl MarkerTrajectory {
    /// Wrap a position series.
    pub fn new(positions: Vec<Vec3>) -> Self {
        Self { positions }
    }

    /// A trajectory of `len` missing samples.
    pub fn missing(len: usize) -> Self {
        Self {
            positions: vec![[f64::NAN; 3]; len],
        }
    }

    /// Number of frames.
    #[must_use]
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// True when the trajectory holds no frames.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// True when frame `i` is occluded or out of range.
    #[must_use]
    pub fn is_missing(&self, i: usize) -> bool {
        match self.positions.get(i) {
            Some(p) => position_is_missing(p),
            None => true,
        }
    }

    /// True when no frame holds a valid position.
    #[must_use]
    pub fn is_entirely_missing(&self) -> bool {
        self.positions.iter().all(position_is_missing)
    }

    /// Position at frame `i`, or `None` when missing.
    #[must_use]
    pub fn get(&self, i: usize) -> Option<Vec3> {
        self.positions
            .get(i)
            .copied()
            .filter(|p| !position_is_missing(p))
    }

    /// One coordinate axis as a scalar series, `NaN` wherever the frame is missing.
    pub fn axis(&self, axis: usize) -> Vec<f64> {
        self.positions
            .iter()
            .map(|p| if position_is_missing(p) { f64::NAN } else { p[axis] })
            .collect()
    }

    /// Build a trajectory from three per-axis series.
    pub fn from_axes(x: &[f64], y: &[f64], z: &[f64]) -> Self {
        let positions = x
            .iter()
            .zip(y)
            .zip(z)
            .map(|((&x, &y), &z)| [x, y, z])
            .collect();
        Self { positions }
    }

    /// Frame-wise midpoint of two trajectories; missing where either is missing.
    pub fn midpoint(a: &MarkerTrajectory, b: &MarkerTrajectory) -> Self {
        let len = a.len().min(b.len());
        let positions = (0..len)
            .map(|i| match (a.get(i), b.get(i)) {
                (Some(p), Some(q)) => [
                    (p[0] + q[0]) / 2.0,
                    (p[1] + q[1]) / 2.0,
                    (p[2] + q[2]) / 2.0,
                ],
                _ => [f64::NAN; 3],
            })
            .collect();
        Self { positions }
    }
}

/// A frame is missing when all three coordinates are exactly zero or when any
/// single coordinate is NaN. One NaN component invalidates the whole position.
fn position_is_missing(p: &Vec3) -> bool {
    p.iter().any(|c| c.is_nan()) || p.iter().all(|&c| c == 0.0)
}

/// A scalar channel at its own sample rate (force plate, IMU axis, derived acceleration).
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AnalogSignal {
    /// Samples; `NaN` marks missing data.
    pub samples: Vec<f64>,
    /// Sample rate in Hz.
    pub sample_rate_hz: f64,
}

impl AnalogSignal {
    /// Create a signal.
    pub fn new(samples: Vec<f64>, sample_rate_hz: f64) -> Self {
        Self {
            samples,
            sample_rate_hz,
        }
    }

    /// Number of samples.
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// True when there are no samples.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Body side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Side {
    Left,
    Right,
}

impl Side {
    /// Both sides, left first.
    pub const BOTH: [Side; 2] = [Side::Left, Side::Right];

    /// The contralateral side.
    #[must_use]
    pub fn opposite(self) -> Side {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }

    /// Marker label prefix (`L` / `R`).
    #[must_use]
    pub fn marker_prefix(self) -> &'static str {
        match self {
            Side::Left => "L",
            Side::Right => "R",
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Left => write!(f, "left"),
            Side::Right => write!(f, "right"),
        }
    }
}

/// A value held once per body side.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PerSide<T> {
    pub left: T,
    pub right: T,
}

impl<T> PerSide<T> {
    /// Create from both sides.
    pub fn new(left: T, right: T) -> Self {
        Self { left, right }
    }

    /// Build by evaluating `f` for each side.
    pub fn from_fn(mut f: impl FnMut(Side) -> T) -> Self {
        Self {
            left: f(Side::Left),
            right: f(Side::Right),
        }
    }

    /// Borrow one side.
    pub fn get(&self, side: Side) -> &T {
        match side {
            Side::Left => &self.left,
            Side::Right => &self.right,
        }
    }

    /// Transform both sides.
    pub fn map<U>(self, mut f: impl FnMut(Side, T) -> U) -> PerSide<U> {
        PerSide {
            left: f(Side::Left, self.left),
            right: f(Side::Right, self.right),
        }
    }
}

/// Walking condition, which selects the event-detector parameter set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum TrialKind {
    /// Continuous belt walking.
    #[default]
    Treadmill,
    /// Discrete footfalls on a walkway.
    Overground,
}

/// Initial and terminal contact indices for one side.
///
/// Both sequences are strictly increasing. Alternation between them is
/// expected but not guaranteed; detector noise can place two terminal
/// contacts between consecutive initial contacts or none at all.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SideEvents {
    /// Initial contact (heel strike) sample indices.
    pub initial_contacts: Vec<usize>,
    /// Terminal contact (toe off) sample indices.
    pub terminal_contacts: Vec<usize>,
}

impl SideEvents {
    /// Create from both sequences.
    pub fn new(initial_contacts: Vec<usize>, terminal_contacts: Vec<usize>) -> Self {
        Self {
            initial_contacts,
            terminal_contacts,
        }
    }

    /// True when no event of either kind was detected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.initial_contacts.is_empty() && self.terminal_contacts.is_empty()
    }

    /// The initial contact following IC number `i`, if any.
    #[must_use]
    pub fn next_initial_contact(&self, i: usize) -> Option<usize> {
        self.initial_contacts.get(i + 1).copied()
    }

    /// Earliest terminal contact with `IC[i] < TC < IC[i+1]` (unbounded for the last IC).
    #[must_use]
    pub fn stance_terminal_contact(&self, i: usize) -> Option<usize> {
        let start = *self.initial_contacts.get(i)?;
        let next = self.next_initial_contact(i);
        self.terminal_contacts
            .iter()
            .copied()
            .find(|&tc| tc > start && next.map_or(true, |n| tc < n))
    }

    /// One entry per initial contact: the stance it opens, when it has a qualifying TC.
    pub fn stance_phases(&self) -> Vec<Option<StancePhase>> {
        (0..self.initial_contacts.len())
            .map(|i| {
                self.stance_terminal_contact(i).map(|stop| StancePhase {
                    start: self.initial_contacts[i],
                    stop,
                })
            })
            .collect()
    }

    /// Both sequences are strictly increasing and below `frame_count`.
    #[must_use]
    pub fn is_well_formed(&self, frame_count: usize) -> bool {
        let ok = |seq: &[usize]| {
            seq.windows(2).all(|w| w[0] < w[1]) && seq.iter().all(|&i| i < frame_count)
        };
        ok(&self.initial_contacts) && ok(&self.terminal_contacts)
    }
}

/// Gait events for both sides of one trial.
pub type GaitEvents = PerSide<SideEvents>;

/// A stance phase `[start, stop)` from initial contact to terminal contact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct StancePhase {
    pub start: usize,
    pub stop: usize,
}

/// Braking or propulsion interval with its impulse.
///
/// `value` is `None` when the net area came out non-positive, which marks a
/// detection artifact rather than a genuine zero impulse.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ImpulseRecord {
    pub start: usize,
    pub stop: usize,
    pub value: Option<f64>,
}

/// Extremum of a signal within an interval.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PeakRecord {
    pub index: usize,
    /// In the units of the segmented signal, never divided by body mass.
    pub value: f64,
}

/// A scalar keyed by the event index it originates from.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EventValue {
    pub index: usize,
    pub value: f64,
}

/// A scalar keyed by a pair of event indices (e.g. consecutive initial contacts).
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct IntervalValue {
    pub first: usize,
    pub second: usize,
    pub value: f64,
}

/// Subject and trial descriptors copied onto every step row.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct TrialMetadata {
    /// Study group (e.g. healthy controls).
    pub group: String,
    /// Subject identifier.
    pub subject: String,
    /// Trial identifier.
    pub trial: String,
    pub gender: Option<String>,
    pub body_mass_kg: Option<f64>,
    pub height_cm: Option<f64>,
    /// Affected leg for patient groups (`left`, `right`, `none`).
    pub affected_leg: Option<String>,
}

// ==== TESTS ====

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_marker_encodings() {
        let traj = MarkerTrajectory::new(vec![
            [1.0, 2.0, 3.0],
            [0.0, 0.0, 0.0],
            [f64::NAN, f64::NAN, f64::NAN],
            [0.0, 5.0, 0.0],
            [1.0, f64::NAN, 3.0],
        ]);
        assert!(!traj.is_missing(0));
        assert!(traj.is_missing(1));
        assert!(traj.is_missing(2));
        assert!(!traj.is_missing(3), "a single zero coordinate is valid");
        assert!(traj.is_missing(4), "a single NaN coordinate is not");
        assert!(traj.is_missing(10));

        let z = traj.axis(AXIS_VERTICAL);
        assert_eq!(z[0], 3.0);
        assert!(z[1].is_nan());
        assert!(z[2].is_nan());
        assert!(z[4].is_nan(), "finite components of a missing frame are dropped");
    }

    #[test]
    fn test_entirely_missing() {
        assert!(MarkerTrajectory::missing(5).is_entirely_missing());
        let zeros = MarkerTrajectory::new(vec![[0.0; 3]; 4]);
        assert!(zeros.is_entirely_missing());
    }

    #[test]
    fn test_midpoint_propagates_gaps() {
        let a = MarkerTrajectory::new(vec![[0.0, 10.0, 20.0], [2.0, 2.0, 2.0]]);
        let b = MarkerTrajectory::new(vec![[10.0, 20.0, 30.0], [0.0, 0.0, 0.0]]);
        let mid = MarkerTrajectory::midpoint(&a, &b);
        assert_eq!(mid.get(0), Some([5.0, 15.0, 25.0]));
        assert_eq!(mid.get(1), None);
    }

    #[test]
    fn test_stance_terminal_contact_rule() {
        let events = SideEvents::new(vec![50, 150, 260], vec![90, 140, 310]);
        assert_eq!(events.stance_terminal_contact(0), Some(90));
        // 140 precedes IC 150 and 310 is beyond IC 260
        assert_eq!(events.stance_terminal_contact(1), None);
        // Last IC is unbounded
        assert_eq!(events.stance_terminal_contact(2), Some(310));

        let phases = events.stance_phases();
        assert_eq!(phases.len(), 3);
        assert_eq!(phases[0], Some(StancePhase { start: 50, stop: 90 }));
        assert_eq!(phases[1], None);
    }

    #[test]
    fn test_well_formed() {
        let events = SideEvents::new(vec![10, 20], vec![15, 25]);
        assert!(events.is_well_formed(30));
        assert!(!events.is_well_formed(25));
        let unsorted = SideEvents::new(vec![20, 10], vec![]);
        assert!(!unsorted.is_well_formed(30));
    }

    #[test]
    fn test_side_helpers() {
        assert_eq!(Side::Left.opposite(), Side::Right);
        assert_eq!(Side::Right.marker_prefix(), "R");
        assert_eq!(Side::Left.to_string(), "left");
        let per = PerSide::from_fn(|s| s.marker_prefix().to_string());
        assert_eq!(per.get(Side::Right), "R");
    }
}
