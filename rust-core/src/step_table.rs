//! Step-by-step table assembly.
//!
//! Builds one row per `(IC, TC, next IC)` triple of a side and joins every
//! event-indexed feature stream onto it. Two join rules exist:
//!
//! - equality, for streams keyed by the row's own events (stance time on IC,
//!   stride metrics on the IC pair, ...);
//! - strict containment, for streams keyed by an index produced inside the
//!   step (impulse boundaries, peaks, contralateral contacts).
//!
//! When several records qualify the earliest in stream order wins and the
//! row is counted in [`JoinReport::ambiguous_joins`]. A row missing a bound
//! gets no value from streams that need that bound.

use crate::segmentation::SegmentationReport;
use crate::spatiotemporal::SideSpatiotemporals;
use crate::trailing_limb_angle::SideTla;
use crate::types::{
    EventValue, ImpulseRecord, IntervalValue, PeakRecord, Side, SideEvents, TrialMetadata,
};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Event triple defining one step row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct StepEvents {
    pub initial_contact: Option<usize>,
    pub terminal_contact: Option<usize>,
    pub next_initial_contact: Option<usize>,
}

impl StepEvents {
    fn new(
        initial_contact: Option<usize>,
        terminal_contact: Option<usize>,
        next_initial_contact: Option<usize>,
    ) -> Self {
        Self {
            initial_contact,
            terminal_contact,
            next_initial_contact,
        }
    }

    /// Both IC and TC are present.
    #[must_use]
    pub fn is_matched(&self) -> bool {
        self.initial_contact.is_some() && self.terminal_contact.is_some()
    }
}

/// Pair initial and terminal contacts into step rows.
///
/// Walks the initial contacts in order, giving each the first terminal
/// contact strictly before the next initial contact. A terminal contact at or
/// before the current initial contact is out of order and becomes its own row
/// without initial contacts, which also clears the preceding row's next IC.
/// Terminal contacts left over at the end become rows of their own.
pub fn match_steps(events: &SideEvents) -> Vec<StepEvents> {
    let ics = &events.initial_contacts;
    let tcs = &events.terminal_contacts;
    let mut rows = Vec::with_capacity(ics.len() + 1);
    let mut t = 0;

    for (i, &ic) in ics.iter().enumerate() {
        let next = ics.get(i + 1).copied();
        let mut matched = false;

        while let Some(&tc) = tcs.get(t) {
            if tc <= ic {
                rows.push(StepEvents::new(None, Some(tc), None));
                t += 1;
            } else if next.map_or(true, |n| tc < n) {
                rows.push(StepEvents::new(Some(ic), Some(tc), next));
                t += 1;
                matched = true;
                break;
            } else {
                break;
            }
        }

        if !matched {
            rows.push(StepEvents::new(Some(ic), None, next));
        }
    }
    rows.extend(
        tcs[t.min(tcs.len())..]
            .iter()
            .map(|&tc| StepEvents::new(None, Some(tc), None)),
    );

    for i in 1..rows.len() {
        if rows[i].initial_contact.is_none() {
            rows[i - 1].next_initial_contact = None;
        }
    }
    rows
}

/// Braking/propulsion columns from one signal source.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct KineticColumns {
    pub braking: Option<ImpulseRecord>,
    pub propulsion: Option<ImpulseRecord>,
    pub braking_peak: Option<PeakRecord>,
    pub propulsion_peak: Option<PeakRecord>,
}

/// One step of one side with every joined feature.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct StepRow {
    #[cfg_attr(feature = "serde", serde(flatten))]
    pub metadata: TrialMetadata,
    pub side: Side,
    #[cfg_attr(feature = "serde", serde(flatten))]
    pub events: StepEvents,

    pub stance_time_s: Option<f64>,
    pub swing_time_s: Option<f64>,
    pub cycle_duration_s: Option<f64>,
    /// Duration from this row's TC to the following TC.
    pub cycle_duration_tc_s: Option<f64>,
    pub stride_length_mm: Option<f64>,
    pub stride_width_mm: Option<f64>,
    pub gait_speed_m_s: Option<f64>,
    pub step_length_mm: Option<f64>,
    pub step_width_mm: Option<f64>,
    pub contralateral_step_length_mm: Option<f64>,
    pub contralateral_stride_length_mm: Option<f64>,

    /// Ground-reaction force.
    pub grf: KineticColumns,
    /// Sacrum acceleration from pelvis markers.
    pub sacrum: KineticColumns,
    /// Lumbar IMU acceleration.
    pub lumbar_imu: KineticColumns,

    /// TLA at the GRF propulsion peak of this step.
    pub atla_deg: Option<EventValue>,
    /// TLA at this step's terminal contact.
    pub tctla_deg: Option<EventValue>,
    /// Maximum TLA over the stride.
    pub max_tla_deg: Option<PeakRecord>,
}

/// Join accounting for one side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct JoinReport {
    pub rows: usize,
    /// Rows missing their IC or TC.
    pub unmatched_rows: usize,
    /// Joins where more than one record qualified.
    pub ambiguous_joins: usize,
}

/// Feature streams of one side, ready to be joined.
#[derive(Debug, Clone, Copy)]
pub struct SideStreams<'a> {
    pub spatiotemporal: &'a SideSpatiotemporals,
    pub contralateral: &'a SideSpatiotemporals,
    pub grf: Option<&'a SegmentationReport>,
    pub sacrum: Option<&'a SegmentationReport>,
    pub lumbar_imu: Option<&'a SegmentationReport>,
    pub tla: &'a SideTla,
}

/// Rows of one side plus their join accounting.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct StepTable {
    pub rows: Vec<StepRow>,
    pub report: JoinReport,
}

/// Build the step table of one side.
pub fn assemble(
    side: Side,
    metadata: &TrialMetadata,
    events: &SideEvents,
    streams: &SideStreams<'_>,
) -> StepTable {
    let mut joiner = Joiner::default();
    let steps = match_steps(events);
    let rows: Vec<StepRow> = steps
        .iter()
        .map(|step| joiner.row(side, metadata, *step, streams))
        .collect();

    let report = JoinReport {
        rows: rows.len(),
        unmatched_rows: steps.iter().filter(|s| !s.is_matched()).count(),
        ambiguous_joins: joiner.ambiguous,
    };
    if report.ambiguous_joins > 0 {
        tracing::debug!(%side, ambiguous = report.ambiguous_joins, "several records matched one step");
    }
    StepTable { rows, report }
}

#[derive(Debug, Default)]
struct Joiner {
    ambiguous: usize,
}

impl Joiner {
    fn row(
        &mut self,
        side: Side,
        metadata: &TrialMetadata,
        step: StepEvents,
        streams: &SideStreams<'_>,
    ) -> StepRow {
        let StepEvents {
            initial_contact: ic,
            terminal_contact: tc,
            next_initial_contact: next,
        } = step;
        let st = streams.spatiotemporal;

        let stance_time_s = tc.and(self.event_value(&st.stance_time, ic));
        let swing_time_s = next.and(self.event_value(&st.swing_time, tc));
        let step_length_mm = self.event_value(&st.step_length, next);
        let step_width_mm = self.event_value(&st.step_width, next);

        let cycle_duration_tc_s = self
            .first(&st.cycle_duration_tc, |r| tc == Some(r.first))
            .map(|r| r.value);

        let contralateral_step_length_mm = self
            .within(&streams.contralateral.step_length, |r| r.index, ic, tc)
            .map(|r| r.value);
        let contralateral_stride_length_mm = self
            .within(&streams.contralateral.stride_length, |r| r.first, ic, tc)
            .map(|r| r.value);

        let max_tla_deg = self
            .first(&streams.tla.max_per_stride, |r| {
                ic == Some(r.first) && next == Some(r.second)
            })
            .and_then(|r| r.peak);

        StepRow {
            metadata: metadata.clone(),
            side,
            events: step,
            stance_time_s,
            swing_time_s,
            cycle_duration_s: self.interval_value(&st.cycle_duration_ic, ic, next),
            cycle_duration_tc_s,
            stride_length_mm: self.interval_value(&st.stride_length, ic, next),
            stride_width_mm: self.interval_value(&st.stride_width, ic, next),
            gait_speed_m_s: self.interval_value(&st.gait_speed, ic, next),
            step_length_mm,
            step_width_mm,
            contralateral_step_length_mm,
            contralateral_stride_length_mm,
            grf: self.kinetics(streams.grf, ic, tc),
            sacrum: self.kinetics(streams.sacrum, ic, tc),
            lumbar_imu: self.kinetics(streams.lumbar_imu, ic, tc),
            atla_deg: self.within(&streams.tla.at_propulsion_peak, |r| r.index, ic, tc),
            tctla_deg: self.within(&streams.tla.at_terminal_contact, |r| r.index, ic, next),
            max_tla_deg,
        }
    }

    /// Braking records are keyed by their stop (the transition), propulsion
    /// records by their start, so both land on the stance they split.
    fn kinetics(
        &mut self,
        report: Option<&SegmentationReport>,
        ic: Option<usize>,
        tc: Option<usize>,
    ) -> KineticColumns {
        let Some(report) = report else {
            return KineticColumns::default();
        };
        KineticColumns {
            braking: self.within(&report.braking, |r| r.stop, ic, tc),
            propulsion: self.within(&report.propulsion, |r| r.start, ic, tc),
            braking_peak: self.within(&report.braking_peaks, |r| r.index, ic, tc),
            propulsion_peak: self.within(&report.propulsion_peaks, |r| r.index, ic, tc),
        }
    }

    fn event_value(&mut self, records: &[EventValue], key: Option<usize>) -> Option<f64> {
        let key = key?;
        self.first(records, |r| r.index == key).map(|r| r.value)
    }

    fn interval_value(
        &mut self,
        records: &[IntervalValue],
        first: Option<usize>,
        second: Option<usize>,
    ) -> Option<f64> {
        let (first, second) = (first?, second?);
        self.first(records, |r| r.first == first && r.second == second)
            .map(|r| r.value)
    }

    /// First record whose key lies strictly inside `(lo, hi)`.
    fn within<T: Copy>(
        &mut self,
        records: &[T],
        key: impl Fn(&T) -> usize,
        lo: Option<usize>,
        hi: Option<usize>,
    ) -> Option<T> {
        let (lo, hi) = (lo?, hi?);
        self.first(records, |r| {
            let k = key(r);
            k > lo && k < hi
        })
    }

    fn first<T: Copy>(&mut self, records: &[T], pred: impl Fn(&T) -> bool) -> Option<T> {
        let mut hits = records.iter().filter(|r| pred(r));
        let found = hits.next().copied();
        if found.is_some() && hits.next().is_some() {
            self.ambiguous += 1;
        }
        found
    }
}

// ==== TESTS ====

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trailing_limb_angle::MaxTlaRecord;

    fn triples(rows: &[StepEvents]) -> Vec<(Option<usize>, Option<usize>, Option<usize>)> {
        rows.iter()
            .map(|r| (r.initial_contact, r.terminal_contact, r.next_initial_contact))
            .collect()
    }

    #[test]
    fn test_match_out_of_order_terminal_contact() {
        let events = SideEvents::new(vec![50, 150, 260], vec![90, 140, 310]);
        assert_eq!(
            triples(&match_steps(&events)),
            vec![
                (Some(50), Some(90), None),
                (None, Some(140), None),
                (Some(150), None, Some(260)),
                (Some(260), Some(310), None),
            ]
        );
    }

    #[test]
    fn test_match_regular_walking() {
        let events = SideEvents::new(vec![100, 200, 300], vec![160, 260, 360]);
        assert_eq!(
            triples(&match_steps(&events)),
            vec![
                (Some(100), Some(160), Some(200)),
                (Some(200), Some(260), Some(300)),
                (Some(300), Some(360), None),
            ]
        );
    }

    #[test]
    fn test_match_leading_and_leftover_terminal_contacts() {
        let events = SideEvents::new(vec![100], vec![50, 150, 170]);
        assert_eq!(
            triples(&match_steps(&events)),
            vec![
                (None, Some(50), None),
                (Some(100), Some(150), None),
                (None, Some(170), None),
            ]
        );
    }

    #[test]
    fn test_match_without_terminal_contacts() {
        let events = SideEvents::new(vec![100, 200], Vec::new());
        assert_eq!(
            triples(&match_steps(&events)),
            vec![(Some(100), None, Some(200)), (Some(200), None, None)]
        );
        assert!(match_steps(&SideEvents::default()).is_empty());
    }

    fn spatiotemporal() -> SideSpatiotemporals {
        SideSpatiotemporals {
            stance_time: vec![
                EventValue { index: 100, value: 0.6 },
                EventValue { index: 200, value: 0.62 },
            ],
            swing_time: vec![EventValue { index: 160, value: 0.4 }],
            cycle_duration_ic: vec![IntervalValue { first: 100, second: 200, value: 1.0 }],
            cycle_duration_tc: vec![IntervalValue { first: 160, second: 260, value: 1.0 }],
            step_length: vec![
                EventValue { index: 100, value: 600.0 },
                EventValue { index: 200, value: 610.0 },
            ],
            stride_length: vec![IntervalValue { first: 100, second: 200, value: 1200.0 }],
            gait_speed: vec![IntervalValue { first: 100, second: 200, value: 1.2 }],
            ..Default::default()
        }
    }

    fn contralateral() -> SideSpatiotemporals {
        SideSpatiotemporals {
            step_length: vec![EventValue { index: 150, value: 590.0 }],
            stride_length: vec![IntervalValue { first: 150, second: 250, value: 1190.0 }],
            ..Default::default()
        }
    }

    fn grf() -> SegmentationReport {
        SegmentationReport {
            braking: vec![
                ImpulseRecord { start: 98, stop: 130, value: Some(0.02) },
                ImpulseRecord { start: 198, stop: 230, value: None },
            ],
            propulsion: vec![
                ImpulseRecord { start: 130, stop: 161, value: Some(0.03) },
                ImpulseRecord { start: 230, stop: 262, value: Some(0.025) },
            ],
            braking_peaks: vec![PeakRecord { index: 110, value: 120.0 }],
            propulsion_peaks: vec![
                PeakRecord { index: 145, value: -150.0 },
                PeakRecord { index: 150, value: -149.0 },
            ],
            accepted: 2,
            ..Default::default()
        }
    }

    #[test]
    fn test_assemble_joins() {
        let events = SideEvents::new(vec![100, 200], vec![160, 260]);
        let st = spatiotemporal();
        let contra = contralateral();
        let grf = grf();
        let tla = SideTla {
            at_propulsion_peak: vec![EventValue { index: 145, value: 21.0 }],
            at_terminal_contact: vec![
                EventValue { index: 160, value: 18.0 },
                EventValue { index: 260, value: 19.0 },
            ],
            max_per_stride: vec![MaxTlaRecord { first: 100, second: 200, peak: None }],
        };
        let streams = SideStreams {
            spatiotemporal: &st,
            contralateral: &contra,
            grf: Some(&grf),
            sacrum: None,
            lumbar_imu: None,
            tla: &tla,
        };
        let metadata = TrialMetadata {
            subject: "pp01".into(),
            trial: "walk01".into(),
            ..Default::default()
        };

        let table = assemble(Side::Left, &metadata, &events, &streams);
        assert_eq!(table.rows.len(), 2);
        let first = &table.rows[0];
        assert_eq!(first.metadata.subject, "pp01");
        assert_eq!(first.side, Side::Left);
        assert_eq!(first.stance_time_s, Some(0.6));
        assert_eq!(first.swing_time_s, Some(0.4));
        assert_eq!(first.cycle_duration_s, Some(1.0));
        assert_eq!(first.cycle_duration_tc_s, Some(1.0));
        assert_eq!(first.stride_length_mm, Some(1200.0));
        assert_eq!(first.gait_speed_m_s, Some(1.2));
        assert_eq!(first.stride_width_mm, None);
        // Step ending at the next IC.
        assert_eq!(first.step_length_mm, Some(610.0));
        assert_eq!(first.contralateral_step_length_mm, Some(590.0));
        assert_eq!(first.contralateral_stride_length_mm, Some(1190.0));

        assert_eq!(first.grf.braking.unwrap().stop, 130);
        assert_eq!(first.grf.propulsion.unwrap().value, Some(0.03));
        assert_eq!(first.grf.braking_peak.unwrap().index, 110);
        // Two propulsion peaks inside (100, 160): the earliest wins.
        assert_eq!(first.grf.propulsion_peak.unwrap().index, 145);
        assert_eq!(table.report.ambiguous_joins, 1);
        assert_eq!(first.sacrum, KineticColumns::default());

        assert_eq!(first.atla_deg.unwrap().value, 21.0);
        assert_eq!(first.tctla_deg.unwrap().value, 18.0);
        // Window exists but held no valid angle.
        assert_eq!(first.max_tla_deg, None);

        // Last row: no next IC, so nothing keyed on it.
        let last = &table.rows[1];
        assert_eq!(last.stance_time_s, Some(0.62));
        assert_eq!(last.swing_time_s, None);
        assert_eq!(last.cycle_duration_s, None);
        assert_eq!(last.step_length_mm, None);
        assert_eq!(last.tctla_deg, None);
        assert_eq!(last.grf.braking.unwrap().value, None);
        assert_eq!(last.grf.braking_peak, None);
        assert_eq!(table.report.unmatched_rows, 0);
    }

    #[test]
    fn test_unmatched_rows_get_no_values() {
        let events = SideEvents::new(vec![50, 150, 260], vec![90, 140, 310]);
        let st = SideSpatiotemporals {
            stance_time: vec![EventValue { index: 150, value: 9.9 }],
            ..Default::default()
        };
        let contra = SideSpatiotemporals::default();
        let grf = SegmentationReport {
            propulsion: vec![ImpulseRecord { start: 145, stop: 200, value: Some(1.0) }],
            ..Default::default()
        };
        let tla = SideTla::default();
        let streams = SideStreams {
            spatiotemporal: &st,
            contralateral: &contra,
            grf: Some(&grf),
            sacrum: None,
            lumbar_imu: None,
            tla: &tla,
        };

        let table = assemble(Side::Right, &TrialMetadata::default(), &events, &streams);
        assert_eq!(table.rows.len(), 4);
        assert_eq!(table.report.unmatched_rows, 2);
        for row in &table.rows {
            assert_eq!(row.stance_time_s, None, "stance time needs both IC and TC");
            assert_eq!(row.grf.propulsion, None);
        }
    }
}
