//! End-to-end tests of the gait pipeline on synthetic treadmill walking.
//!
//! The generator produces twelve 1 s gait cycles at 100 Hz. The left heel
//! lands at the start of each cycle and the toe leaves the ground 65 samples
//! later; the right foot runs half a cycle behind. Anterior-posterior force is
//! a single sine period over each stance: braking first, propulsion second.

#[cfg(test)]
mod integration_tests {
    use approx::assert_relative_eq;

    use crate::pipeline::*;
    use crate::step_table::{match_steps, StepEvents, StepRow};
    use crate::types::*;
    use crate::kinematics::MarkerSet;

    const FS: f64 = 100.0;
    const CYCLE: usize = 100;
    const CYCLES: usize = 12;
    const STANCE: f64 = 65.0;
    const FORCE_RATE: f64 = 1000.0;
    const BODY_MASS: f64 = 70.0;
    const RIGHT_OFFSET: usize = 50;

    /// Helper: sin² lift between `from` and `to` within a cycle
    fn bump(k: usize, from: usize, to: usize, amp: f64) -> f64 {
        if k >= from && k < to {
            let phase = std::f64::consts::PI * (k - from) as f64 / (to - from) as f64;
            amp * phase.sin().powi(2)
        } else {
            0.0
        }
    }

    /// Helper: heel and toe of one foot, `offset` samples into the cycle
    fn foot(offset: usize, ml: f64) -> (MarkerTrajectory, MarkerTrajectory) {
        let n = CYCLES * CYCLE;
        let heel = (0..n)
            .map(|i| {
                let k = (i + offset) % CYCLE;
                [ml, 200.0, 40.0 + bump(k, 60, 100, 80.0)]
            })
            .collect();
        let toe = (0..n)
            .map(|i| {
                let k = (i + offset) % CYCLE;
                [ml, 400.0, 20.0 + bump(k, 65, 95, 60.0)]
            })
            .collect();
        (MarkerTrajectory::new(heel), MarkerTrajectory::new(toe))
    }

    /// Helper: AP force of one foot at `rate` Hz, positive while braking
    fn stance_force(offset: usize, rate: f64, amplitude: f64) -> AnalogSignal {
        let n = (CYCLES as f64 * CYCLE as f64 * rate / FS) as usize;
        let samples = (0..n)
            .map(|j| {
                let k = (j as f64 * FS / rate + offset as f64) % CYCLE as f64;
                if k < STANCE {
                    amplitude * (2.0 * std::f64::consts::PI * k / STANCE).sin()
                } else {
                    0.0
                }
            })
            .collect();
        AnalogSignal::new(samples, rate)
    }

    fn still(p: [f64; 3]) -> MarkerTrajectory {
        MarkerTrajectory::new(vec![p; CYCLES * CYCLE])
    }

    fn markers() -> MarkerSet {
        let (lhee, ltoe) = foot(0, -80.0);
        let (rhee, rtoe) = foot(RIGHT_OFFSET, 80.0);
        MarkerSet::new()
            .with("LHEE", lhee)
            .with("LTOE", ltoe)
            .with("RHEE", rhee)
            .with("RTOE", rtoe)
            .with("LASI", still([-120.0, 350.0, 1000.0]))
            .with("RASI", still([120.0, 350.0, 1000.0]))
            .with("LPSI", still([-60.0, 150.0, 1000.0]))
            .with("RPSI", still([60.0, 150.0, 1000.0]))
    }

    fn treadmill_trial(name: &str) -> TrialInput {
        TrialInput {
            metadata: TrialMetadata {
                group: "control".into(),
                subject: "S01".into(),
                trial: name.into(),
                body_mass_kg: Some(BODY_MASS),
                ..Default::default()
            },
            kind: TrialKind::Treadmill,
            marker_rate_hz: FS,
            markers: markers(),
            grf_ap: Some(PerSide::new(
                stance_force(0, FORCE_RATE, 150.0),
                stance_force(RIGHT_OFFSET, FORCE_RATE, 150.0),
            )),
            sacrum_ap: None,
            imu: None,
        }
    }

    fn pipeline(startup_exclusion_s: f64) -> GaitPipeline {
        let mut config = PipelineConfig::default();
        config.segmenter.startup_exclusion_s = startup_exclusion_s;
        GaitPipeline::new(config)
    }

    fn strictly_within(index: usize, row: &StepRow) -> bool {
        match (row.events.initial_contact, row.events.terminal_contact) {
            (Some(ic), Some(tc)) => ic < index && index < tc,
            _ => false,
        }
    }

    fn assert_near(actual: &[usize], expected: &[usize], tol: usize) {
        assert_eq!(actual.len(), expected.len(), "got {:?}, expected {:?}", actual, expected);
        for (a, e) in actual.iter().zip(expected) {
            assert!(a.abs_diff(*e) <= tol, "event {} too far from {}", a, e);
        }
    }

    #[test]
    fn test_treadmill_events_are_detected() {
        let result = pipeline(0.5).process_trial(&treadmill_trial("events")).unwrap();
        let left = &result.events.left;
        let right = &result.events.right;

        let expected_ic: Vec<usize> = (1..CYCLES).map(|c| c * CYCLE).collect();
        let expected_tc: Vec<usize> = (0..CYCLES).map(|c| c * CYCLE + 65).collect();
        assert_near(&left.initial_contacts, &expected_ic, 6);
        assert_near(&left.terminal_contacts, &expected_tc, 6);

        let expected_ic: Vec<usize> = (0..CYCLES).map(|c| c * CYCLE + RIGHT_OFFSET).collect();
        assert_near(&right.initial_contacts, &expected_ic, 6);

        assert!(left.is_well_formed(CYCLES * CYCLE));
        assert!(right.is_well_formed(CYCLES * CYCLE));
    }

    #[test]
    fn test_grf_segmentation_per_stance() {
        let result = pipeline(0.5).process_trial(&treadmill_trial("grf")).unwrap();
        let grf = result.grf.unwrap();
        let left = &grf.left;

        assert_eq!(left.accepted, 11);
        assert_eq!(left.invalid_ordering, 0);
        assert_eq!(left.braking.len(), 11);
        assert_eq!(left.propulsion.len(), 11);

        for (braking, propulsion) in left.braking.iter().zip(&left.propulsion) {
            assert!(braking.start < braking.stop);
            assert_eq!(braking.stop, propulsion.start);
            assert!(propulsion.start < propulsion.stop);
            // 150 N · 0.65 s / π over 70 kg
            assert_relative_eq!(braking.value.unwrap(), 0.44, epsilon = 0.02);
            assert_relative_eq!(propulsion.value.unwrap(), 0.44, epsilon = 0.02);
        }
        for peak in &left.braking_peaks {
            assert_relative_eq!(peak.value, 150.0, epsilon = 1.0);
        }
        for peak in &left.propulsion_peaks {
            assert_relative_eq!(peak.value, -150.0, epsilon = 1.0);
        }

        // The right foot's last stance runs past the end of the recording.
        assert_eq!(grf.right.no_stop, 1);
        assert_eq!(grf.right.accepted, 11);
    }

    #[test]
    fn test_step_rows_join_by_containment() {
        let result = pipeline(0.5).process_trial(&treadmill_trial("rows")).unwrap();

        let left = &result.steps.left;
        assert_eq!(left.report.rows, 12);
        assert_eq!(left.report.unmatched_rows, 1);
        assert_eq!(left.rows[0].events.initial_contact, None);

        let mut with_grf = 0;
        for row in result.rows() {
            let grf = &row.grf;
            if let Some(braking) = grf.braking {
                assert!(strictly_within(braking.stop, row));
                with_grf += 1;
            }
            if let Some(propulsion) = grf.propulsion {
                assert!(strictly_within(propulsion.start, row));
            }
            for peak in [grf.braking_peak, grf.propulsion_peak].into_iter().flatten() {
                assert!(strictly_within(peak.index, row));
            }
            if let Some(stance) = row.stance_time_s {
                assert!(stance > 0.0);
            }
        }
        assert!(with_grf >= 20, "only {with_grf} rows carry GRF intervals");
    }

    #[test]
    fn test_trailing_limb_angle_at_propulsion_peak() {
        let result = pipeline(0.5).process_trial(&treadmill_trial("tla")).unwrap();

        let mut sampled = 0;
        for row in &result.steps.left.rows {
            if let (Some(atla), Some(peak)) = (row.atla_deg, row.grf.propulsion_peak) {
                assert_eq!(atla.index, peak.index);
                // Toe ahead of the pelvis along +AP.
                assert!(atla.value > 0.0);
                sampled += 1;
            }
            if let Some(tctla) = row.tctla_deg {
                assert_eq!(Some(tctla.index), row.events.terminal_contact);
            }
        }
        assert!(sampled >= 10);
        assert_eq!(result.tla.left.max_per_stride.len(), 10);
    }

    #[test]
    fn test_imu_stream_joins_at_marker_rate() {
        let imu_rate = 200.0;
        let scale = (imu_rate / FS) as usize;
        let events = SideEvents::new(
            (1..CYCLES).map(|c| c * CYCLE * scale).collect(),
            (0..CYCLES).map(|c| (c * CYCLE + 65) * scale).collect(),
        );
        let mut trial = treadmill_trial("imu");
        trial.imu = Some(ImuStream {
            lumbar_ap: stance_force(0, imu_rate, 2.0),
            events: PerSide::new(events, SideEvents::default()),
            event_rate_hz: imu_rate,
        });

        let result = pipeline(0.5).process_trial(&trial).unwrap();
        let imu = result.lumbar_imu.unwrap();
        assert_eq!(imu.left.accepted, 11);
        assert!(imu.right.braking.is_empty());

        let joined: Vec<_> = result
            .steps
            .left
            .rows
            .iter()
            .filter_map(|row| row.lumbar_imu.braking.map(|b| (b, row)))
            .collect();
        assert!(joined.len() >= 10);
        for (braking, row) in joined {
            assert!(strictly_within(braking.stop, row));
            assert!(braking.stop < CYCLES * CYCLE);
        }
    }

    #[test]
    fn test_startup_exclusion() {
        let result = pipeline(3.0).process_trial(&treadmill_trial("startup")).unwrap();
        let left = &result.grf.as_ref().unwrap().left;
        assert_eq!(left.startup_excluded, 4);
        assert_eq!(left.braking.len(), 9);
        assert!(left.braking.iter().all(|b| b.start >= 300));
        assert!(left.propulsion.iter().all(|p| p.start >= 300));

        // The default 10 s exclusion leaves only the last two stances.
        let result = GaitPipeline::default()
            .process_trial(&treadmill_trial("startup-default"))
            .unwrap();
        assert_eq!(result.grf.unwrap().left.braking.len(), 2);
    }

    #[test]
    fn test_processing_is_deterministic() {
        let trial = treadmill_trial("repeat");
        let first = pipeline(0.5).process_trial(&trial).unwrap();
        let second = pipeline(0.5).process_trial(&trial).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_batch_isolates_failing_trial() {
        let mut broken = treadmill_trial("broken");
        broken.marker_rate_hz = 0.0;
        let mut no_mass = treadmill_trial("no-mass");
        no_mass.metadata.body_mass_kg = None;
        let trials = vec![treadmill_trial("first"), broken, no_mass, treadmill_trial("last")];

        let report = pipeline(0.5).run_batch(&trials);
        assert_eq!(report.outcomes.len(), 4);
        assert_eq!(report.succeeded().count(), 2);

        let failed: Vec<&str> = report.failed().map(|(trial, _)| trial).collect();
        assert_eq!(failed, vec!["broken", "no-mass"]);
        assert_eq!(report.outcomes[3].trial, "last");
        assert!(report.outcomes[3].result.as_ref().unwrap().rows().count() > 20);
    }

    #[test]
    fn test_missing_side_yields_empty_rows() {
        let mut trial = treadmill_trial("one-sided");
        let (lhee, ltoe) = foot(0, -80.0);
        trial.markers = MarkerSet::new()
            .with("LHEE", lhee)
            .with("LTOE", ltoe)
            .with("RHEE", MarkerTrajectory::missing(CYCLES * CYCLE));

        let result = pipeline(0.5).process_trial(&trial).unwrap();
        assert!(result.events.right.is_empty());
        assert!(result.steps.right.rows.is_empty());
        assert_eq!(result.steps.left.rows.len(), 12);
        assert!(result.sacrum.is_none());
        assert!(result.tla.left.at_propulsion_peak.is_empty());
    }

    #[test]
    fn test_out_of_order_terminal_contact() {
        let events = SideEvents::new(vec![50, 150, 260], vec![90, 140, 310]);
        let steps = match_steps(&events);
        let expected = vec![
            StepEvents {
                initial_contact: Some(50),
                terminal_contact: Some(90),
                next_initial_contact: None,
            },
            StepEvents {
                initial_contact: None,
                terminal_contact: Some(140),
                next_initial_contact: None,
            },
            StepEvents {
                initial_contact: Some(150),
                terminal_contact: None,
                next_initial_contact: Some(260),
            },
            StepEvents {
                initial_contact: Some(260),
                terminal_contact: Some(310),
                next_initial_contact: None,
            },
        ];
        assert_eq!(steps, expected);
    }
}
