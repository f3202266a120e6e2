//! Spatiotemporal gait parameters from events and heel markers.
//!
//! Every output is keyed by the event index (or event pair) it originates
//! from, so the step-table assembler can join it back onto the right step.
//! Timing parameters need events only; distances additionally need both heel
//! markers at the relevant frames and are skipped where either is missing.
//!
//! A stride without a following initial contact has no swing time, cycle
//! duration, stride length or gait speed: those records are omitted, never
//! reported as zero.

use crate::error::{check_sample_rate, Result};
use crate::types::{
    EventValue, GaitEvents, IntervalValue, MarkerTrajectory, PerSide, SideEvents,
    TrialKind, AXIS_AP, AXIS_ML,
};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Spatiotemporal parameters of one side.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SideSpatiotemporals {
    /// `TC − IC` in seconds, keyed by IC.
    pub stance_time: Vec<EventValue>,
    /// `next IC − TC` in seconds, keyed by TC.
    pub swing_time: Vec<EventValue>,
    /// Consecutive initial contacts, seconds.
    pub cycle_duration_ic: Vec<IntervalValue>,
    /// Consecutive terminal contacts, seconds.
    pub cycle_duration_tc: Vec<IntervalValue>,
    /// AP heel distance to the contralateral heel at IC (mm), keyed by IC.
    pub step_length: Vec<EventValue>,
    /// ML heel distance to the contralateral heel at IC (mm), keyed by IC.
    pub step_width: Vec<EventValue>,
    /// Stride length (mm), keyed by consecutive ICs.
    pub stride_length: Vec<IntervalValue>,
    /// ML heel displacement over the stride (mm), keyed by consecutive ICs.
    pub stride_width: Vec<IntervalValue>,
    /// Stride length over cycle duration (m/s), keyed by consecutive ICs.
    pub gait_speed: Vec<IntervalValue>,
}

/// Spatiotemporal parameters for both sides.
pub type Spatiotemporals = PerSide<SideSpatiotemporals>;

/// Compute spatiotemporal parameters for both sides.
///
/// `heels` holds the heel trajectory of each side when available. On a
/// treadmill the lab-frame heel barely travels, so stride length is the sum of
/// the two step lengths making up the stride; overground it is the heel's AP
/// displacement between consecutive initial contacts.
pub fn compute_spatiotemporals(
    events: &GaitEvents,
    heels: PerSide<Option<&MarkerTrajectory>>,
    marker_rate_hz: f64,
    kind: TrialKind,
) -> Result<Spatiotemporals> {
    let fs = check_sample_rate(marker_rate_hz)?;

    // Step lengths first: treadmill strides are built from both sides' steps.
    let steps = PerSide::from_fn(|side| {
        step_metrics(
            events.get(side),
            *heels.get(side),
            *heels.get(side.opposite()),
        )
    });

    Ok(PerSide::from_fn(|side| {
        let own = events.get(side);
        let (step_length, step_width) = steps.get(side).clone();
        let heel = *heels.get(side);

        let cycle_duration_ic = consecutive(&own.initial_contacts, fs);
        let stride_length = match kind {
            TrialKind::Overground => heel
                .map(|h| heel_displacement(&own.initial_contacts, h, AXIS_AP))
                .unwrap_or_default(),
            TrialKind::Treadmill => summed_steps(
                &own.initial_contacts,
                &step_length,
                &events.get(side.opposite()).initial_contacts,
                &steps.get(side.opposite()).0,
            ),
        };
        let stride_width = heel
            .map(|h| heel_displacement(&own.initial_contacts, h, AXIS_ML))
            .unwrap_or_default();
        let gait_speed = stride_length
            .iter()
            .filter_map(|stride| {
                cycle_duration_ic
                    .iter()
                    .find(|c| c.first == stride.first && c.second == stride.second)
                    .map(|c| IntervalValue {
                        first: stride.first,
                        second: stride.second,
                        value: stride.value / 1000.0 / c.value,
                    })
            })
            .collect();

        SideSpatiotemporals {
            stance_time: stance_times(own, fs),
            swing_time: swing_times(own, fs),
            cycle_duration_ic,
            cycle_duration_tc: consecutive(&own.terminal_contacts, fs),
            step_length,
            step_width,
            stride_length,
            stride_width,
            gait_speed,
        }
    }))
}

fn stance_times(events: &SideEvents, fs: f64) -> Vec<EventValue> {
    (0..events.initial_contacts.len())
        .filter_map(|i| {
            let ic = events.initial_contacts[i];
            let tc = events.stance_terminal_contact(i)?;
            Some(EventValue {
                index: ic,
                value: (tc - ic) as f64 / fs,
            })
        })
        .collect()
}

fn swing_times(events: &SideEvents, fs: f64) -> Vec<EventValue> {
    (0..events.initial_contacts.len())
        .filter_map(|i| {
            let tc = events.stance_terminal_contact(i)?;
            let next = events.next_initial_contact(i)?;
            Some(EventValue {
                index: tc,
                value: (next - tc) as f64 / fs,
            })
        })
        .collect()
}

fn consecutive(indices: &[usize], fs: f64) -> Vec<IntervalValue> {
    indices
        .windows(2)
        .map(|w| IntervalValue {
            first: w[0],
            second: w[1],
            value: (w[1] - w[0]) as f64 / fs,
        })
        .collect()
}

/// Step length and width at every initial contact where both heels are visible.
fn step_metrics(
    events: &SideEvents,
    heel: Option<&MarkerTrajectory>,
    contralateral_heel: Option<&MarkerTrajectory>,
) -> (Vec<EventValue>, Vec<EventValue>) {
    let (Some(heel), Some(other)) = (heel, contralateral_heel) else {
        return (Vec::new(), Vec::new());
    };
    events
        .initial_contacts
        .iter()
        .filter_map(|&ic| {
            let (p, q) = (heel.get(ic)?, other.get(ic)?);
            Some((
                EventValue {
                    index: ic,
                    value: (p[AXIS_AP] - q[AXIS_AP]).abs(),
                },
                EventValue {
                    index: ic,
                    value: (p[AXIS_ML] - q[AXIS_ML]).abs(),
                },
            ))
        })
        .unzip()
}

/// Absolute heel displacement along `axis` between consecutive initial contacts.
fn heel_displacement(
    initial_contacts: &[usize],
    heel: &MarkerTrajectory,
    axis: usize,
) -> Vec<IntervalValue> {
    initial_contacts
        .windows(2)
        .filter_map(|w| {
            let (p, q) = (heel.get(w[0])?, heel.get(w[1])?);
            Some(IntervalValue {
                first: w[0],
                second: w[1],
                value: (q[axis] - p[axis]).abs(),
            })
        })
        .collect()
}

/// Own step at the stride's closing IC plus the contralateral step inside the stride.
fn summed_steps(
    initial_contacts: &[usize],
    step_length: &[EventValue],
    contralateral_contacts: &[usize],
    contralateral_step_length: &[EventValue],
) -> Vec<IntervalValue> {
    initial_contacts
        .windows(2)
        .filter_map(|w| {
            let own = step_length.iter().find(|s| s.index == w[1])?;
            let mid = contralateral_contacts
                .iter()
                .copied()
                .find(|&c| c > w[0] && c < w[1])?;
            let other = contralateral_step_length.iter().find(|s| s.index == mid)?;
            Some(IntervalValue {
                first: w[0],
                second: w[1],
                value: own.value + other.value,
            })
        })
        .collect()
}

// ==== TESTS ====

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const FS: f64 = 100.0;

    fn fixed_heel(n: usize, x: f64, y: f64) -> MarkerTrajectory {
        MarkerTrajectory::new(vec![[x, y, 40.0]; n])
    }

    fn walking_events() -> GaitEvents {
        PerSide::new(
            SideEvents::new(vec![100, 200, 300], vec![160, 260]),
            SideEvents::new(vec![150, 250], vec![110, 210, 310]),
        )
    }

    #[test]
    fn test_timing_parameters() {
        let events = walking_events();
        let st = compute_spatiotemporals(
            &events,
            PerSide::new(None, None),
            FS,
            TrialKind::Treadmill,
        )
        .unwrap();
        let left = &st.left;

        assert_eq!(left.stance_time.len(), 2, "IC 300 has no terminal contact");
        assert_eq!(left.stance_time[0].index, 100);
        assert_relative_eq!(left.stance_time[0].value, 0.6);

        assert_eq!(left.swing_time.len(), 2);
        assert_eq!(left.swing_time[1].index, 260);
        assert_relative_eq!(left.swing_time[1].value, 0.4);

        assert_eq!(left.cycle_duration_ic.len(), 2);
        assert_relative_eq!(left.cycle_duration_ic[0].value, 1.0);
        assert_eq!(left.cycle_duration_tc.len(), 1);
        assert_eq!(left.cycle_duration_tc[0].first, 160);

        // No heels: distances are absent rather than zero.
        assert!(left.step_length.is_empty());
        assert!(left.stride_length.is_empty());
        assert!(left.gait_speed.is_empty());
    }

    #[test]
    fn test_final_stride_has_no_swing() {
        let events = PerSide::new(
            SideEvents::new(vec![100, 200], vec![160, 260]),
            SideEvents::default(),
        );
        let st = compute_spatiotemporals(
            &events,
            PerSide::new(None, None),
            FS,
            TrialKind::Treadmill,
        )
        .unwrap();
        assert_eq!(st.left.stance_time.len(), 2);
        assert_eq!(st.left.swing_time.len(), 1);
        assert_eq!(st.left.swing_time[0].index, 160);
        assert!(st.left.swing_time.iter().all(|s| s.value > 0.0));
    }

    #[test]
    fn test_treadmill_stride_sums_steps() {
        let events = walking_events();
        let left_heel = fixed_heel(400, -100.0, 300.0);
        let right_heel = fixed_heel(400, 100.0, -300.0);
        let st = compute_spatiotemporals(
            &events,
            PerSide::new(Some(&left_heel), Some(&right_heel)),
            FS,
            TrialKind::Treadmill,
        )
        .unwrap();

        assert_eq!(st.left.step_length.len(), 3);
        assert_relative_eq!(st.left.step_length[0].value, 600.0);
        assert_relative_eq!(st.left.step_width[0].value, 200.0);

        assert_eq!(st.left.stride_length.len(), 2);
        assert_relative_eq!(st.left.stride_length[0].value, 1200.0);
        assert_relative_eq!(st.left.gait_speed[0].value, 1.2);
        // Stationary heel: no lateral drift over the stride.
        assert_relative_eq!(st.left.stride_width[0].value, 0.0);

        // Right side: one stride (150 → 250) with left IC 200 inside.
        assert_eq!(st.right.stride_length.len(), 1);
        assert_eq!(st.right.stride_length[0].first, 150);
    }

    #[test]
    fn test_overground_stride_uses_heel_travel() {
        let events = walking_events();
        let heel = MarkerTrajectory::new((0..400).map(|i| [0.0, 12.0 * i as f64, 40.0]).collect());
        let st = compute_spatiotemporals(
            &events,
            PerSide::new(Some(&heel), None),
            FS,
            TrialKind::Overground,
        )
        .unwrap();

        assert_eq!(st.left.stride_length.len(), 2);
        assert_relative_eq!(st.left.stride_length[1].value, 1200.0);
        assert_relative_eq!(st.left.gait_speed[1].value, 1.2);
        // Step length needs both heels.
        assert!(st.left.step_length.is_empty());
    }

    #[test]
    fn test_occluded_heel_skips_distance() {
        let events = walking_events();
        let mut left_heel = fixed_heel(400, -100.0, 300.0);
        left_heel.positions[200] = [0.0, 0.0, 0.0];
        let right_heel = fixed_heel(400, 100.0, -300.0);
        let st = compute_spatiotemporals(
            &events,
            PerSide::new(Some(&left_heel), Some(&right_heel)),
            FS,
            TrialKind::Treadmill,
        )
        .unwrap();
        let keys: Vec<usize> = st.left.step_length.iter().map(|s| s.index).collect();
        assert_eq!(keys, vec![100, 300]);
        // Stride 100 → 200 lost its closing step.
        assert_eq!(st.left.stride_length.len(), 1);
        assert_eq!(st.left.stride_length[0].first, 200);
    }
}
