//! Trial-level orchestration.
//!
//! A [`GaitPipeline`] takes one [`TrialInput`] through every stage:
//! 1. **Event detection** from heel and toe markers
//! 2. **Spatiotemporal parameters** from the events and heel positions
//! 3. **Braking/propulsion segmentation** of every available AP signal
//!    (ground-reaction force, sacrum acceleration, lumbar IMU)
//! 4. **Trailing limb angle** sampled at the gait events
//! 5. **Step table assembly** joining all of the above per side
//!
//! Trials share nothing, so a batch is a plain map over its inputs. A trial
//! that fails is reported with its identifier and the batch moves on.

#[cfg(feature = "serde")]
use std::path::Path;

use crate::error::{check_sample_rate, GaitError, Result};
use crate::event_detection::{EventDetectorConfig, GaitEventDetector};
use crate::kinematics::{sacrum_ap_acceleration, MarkerSet, SacrumConfig};
use crate::segmentation::{Normalization, SegmentationReport, SegmenterConfig, StanceSegmenter};
use crate::spatiotemporal::{compute_spatiotemporals, Spatiotemporals};
use crate::step_table::{self, SideStreams, StepRow, StepTable};
use crate::trailing_limb_angle::{SideTla, TlaConfig, TrailingLimbAngle};
use crate::types::{AnalogSignal, GaitEvents, PerSide, Side, TrialKind, TrialMetadata};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Configuration for the complete gait pipeline.
///
/// Bundles the configuration of every stage so a single file can drive a
/// whole batch.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PipelineConfig {
    /// Event detector thresholds per walking condition.
    pub detector: EventDetectorConfig,

    /// Braking/propulsion segmentation, shared by every AP signal.
    pub segmenter: SegmenterConfig,

    /// Landmarks of the trailing limb angle.
    pub tla: TlaConfig,

    /// Smoothing of the pelvis markers for the sacrum signal.
    pub sacrum: SacrumConfig,
}

impl PipelineConfig {
    /// Check every stage's parameters.
    pub fn validate(&self) -> Result<()> {
        self.detector.validate()?;
        self.segmenter.validate()?;
        if !(self.sacrum.filter.cutoff_hz.is_finite() && self.sacrum.filter.cutoff_hz > 0.0) {
            return Err(GaitError::invalid_config(
                "sacrum.filter.cutoff_hz",
                format!("must be positive, got {}", self.sacrum.filter.cutoff_hz),
            ));
        }
        Ok(())
    }

    /// Load a configuration from a JSON file and validate it.
    ///
    /// Missing fields take their default values.
    #[cfg(feature = "serde")]
    pub fn from_json(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|source| GaitError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: PipelineConfig = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }
}

/// Lumbar IMU recording with its own gait events.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ImuStream {
    /// AP acceleration of the lumbar sensor.
    pub lumbar_ap: AnalogSignal,
    /// Events detected on the IMU recording, at `event_rate_hz`.
    pub events: GaitEvents,
    pub event_rate_hz: f64,
}

/// Everything recorded for one trial.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TrialInput {
    #[cfg_attr(feature = "serde", serde(default))]
    pub metadata: TrialMetadata,
    #[cfg_attr(feature = "serde", serde(default))]
    pub kind: TrialKind,
    pub marker_rate_hz: f64,
    #[cfg_attr(feature = "serde", serde(default))]
    pub markers: MarkerSet,
    /// AP ground-reaction force per side, in N.
    #[cfg_attr(feature = "serde", serde(default))]
    pub grf_ap: Option<PerSide<AnalogSignal>>,
    /// AP sacrum acceleration. Derived from `LPSI`/`RPSI` when absent.
    #[cfg_attr(feature = "serde", serde(default))]
    pub sacrum_ap: Option<AnalogSignal>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub imu: Option<ImuStream>,
}

/// Output of one trial. Every index is at the marker rate.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TrialResult {
    pub metadata: TrialMetadata,
    pub events: GaitEvents,
    pub spatiotemporal: Spatiotemporals,
    pub grf: Option<PerSide<SegmentationReport>>,
    pub sacrum: Option<PerSide<SegmentationReport>>,
    pub lumbar_imu: Option<PerSide<SegmentationReport>>,
    pub tla: PerSide<SideTla>,
    pub steps: PerSide<StepTable>,
}

impl TrialResult {
    /// Step rows of both sides, left first.
    pub fn rows(&self) -> impl Iterator<Item = &StepRow> {
        self.steps.left.rows.iter().chain(self.steps.right.rows.iter())
    }
}

/// Outcome of one trial within a batch.
#[derive(Debug)]
pub struct TrialOutcome {
    pub trial: String,
    pub result: Result<TrialResult>,
}

/// Per-trial outcomes of a batch, in input order.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub outcomes: Vec<TrialOutcome>,
}

impl BatchReport {
    /// Results of the trials that completed.
    pub fn succeeded(&self) -> impl Iterator<Item = &TrialResult> {
        self.outcomes.iter().filter_map(|o| o.result.as_ref().ok())
    }

    /// Trials that failed, with their error.
    pub fn failed(&self) -> impl Iterator<Item = (&str, &GaitError)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().err().map(|e| (o.trial.as_str(), e)))
    }
}

/// Gait processing pipeline.
#[derive(Debug, Clone, Default)]
pub struct GaitPipeline {
    config: PipelineConfig,
    segmenter: StanceSegmenter,
    tla: TrailingLimbAngle,
}

impl GaitPipeline {
    /// Creates a pipeline with the given configuration.
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            segmenter: StanceSegmenter::new(config.segmenter.clone()),
            tla: TrailingLimbAngle::new(config.tla),
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Process one trial.
    #[tracing::instrument(
        skip_all,
        fields(trial = %input.metadata.trial, subject = %input.metadata.subject)
    )]
    pub fn process_trial(&self, input: &TrialInput) -> Result<TrialResult> {
        self.config.validate()?;
        let fs = check_sample_rate(input.marker_rate_hz)?;

        let detector = GaitEventDetector::new(self.config.detector.params(input.kind).clone());
        let events = detector.detect(&input.markers, fs)?;

        let heels = PerSide::from_fn(|side| input.markers.find_side_present(side, "HEE"));
        let spatiotemporal = compute_spatiotemporals(&events, heels, fs, input.kind)?;

        let grf = match &input.grf_ap {
            Some(signals) => {
                let body_mass = input.metadata.body_mass_kg.ok_or_else(|| {
                    GaitError::invalid_config(
                        "body_mass_kg",
                        "required to normalize ground-reaction force",
                    )
                })?;
                Some(self.segment_sides(
                    &events,
                    PerSide::new(&signals.left, &signals.right),
                    fs,
                    Normalization::BodyMass(body_mass),
                )?)
            }
            None => None,
        };

        let sacrum_signal = match &input.sacrum_ap {
            Some(signal) => Some(signal.clone()),
            None => sacrum_ap_acceleration(&input.markers, fs, &self.config.sacrum)?,
        };
        let sacrum = match &sacrum_signal {
            Some(signal) => Some(self.segment_sides(
                &events,
                PerSide::new(signal, signal),
                fs,
                Normalization::Unit,
            )?),
            None => None,
        };

        let lumbar_imu = match &input.imu {
            Some(imu) => Some(self.segment_imu(imu, fs)?),
            None => None,
        };

        let peak_source = grf.as_ref().or(sacrum.as_ref());
        let tla = PerSide::from_fn(|side| {
            let peaks = peak_source
                .map(|reports| reports.get(side).propulsion_peaks.as_slice())
                .unwrap_or(&[]);
            self.tla.extract(&input.markers, side, events.get(side), peaks)
        });

        let steps = PerSide::from_fn(|side| {
            let streams = SideStreams {
                spatiotemporal: spatiotemporal.get(side),
                contralateral: spatiotemporal.get(side.opposite()),
                grf: grf.as_ref().map(|r| r.get(side)),
                sacrum: sacrum.as_ref().map(|r| r.get(side)),
                lumbar_imu: lumbar_imu.as_ref().map(|r| r.get(side)),
                tla: tla.get(side),
            };
            step_table::assemble(side, &input.metadata, events.get(side), &streams)
        });

        tracing::info!(
            left_contacts = events.left.initial_contacts.len(),
            right_contacts = events.right.initial_contacts.len(),
            rows = steps.left.rows.len() + steps.right.rows.len(),
            grf = grf.is_some(),
            sacrum = sacrum.is_some(),
            lumbar_imu = lumbar_imu.is_some(),
            "trial processed"
        );

        Ok(TrialResult {
            metadata: input.metadata.clone(),
            events,
            spatiotemporal,
            grf,
            sacrum,
            lumbar_imu,
            tla,
            steps,
        })
    }

    /// Process every trial, logging and collecting failures instead of stopping.
    pub fn run_batch(&self, inputs: &[TrialInput]) -> BatchReport {
        let run = |input: &TrialInput| {
            let trial = input.metadata.trial.clone();
            let result = self
                .process_trial(input)
                .map_err(|err| err.in_trial(trial.clone()));
            if let Err(err) = &result {
                tracing::warn!(
                    trial = %input.metadata.trial,
                    subject = %input.metadata.subject,
                    error = %err,
                    "skipping trial"
                );
            }
            TrialOutcome { trial, result }
        };

        #[cfg(feature = "parallel")]
        let outcomes: Vec<TrialOutcome> = {
            use rayon::prelude::*;
            inputs.par_iter().map(run).collect()
        };
        #[cfg(not(feature = "parallel"))]
        let outcomes: Vec<TrialOutcome> = inputs.iter().map(run).collect();

        let report = BatchReport { outcomes };
        tracing::info!(
            trials = inputs.len(),
            succeeded = report.succeeded().count(),
            failed = report.failed().count(),
            "batch complete"
        );
        report
    }

    // ===== PRIVATE METHODS =====

    fn segment_sides(
        &self,
        events: &GaitEvents,
        signals: PerSide<&AnalogSignal>,
        event_rate_hz: f64,
        normalization: Normalization,
    ) -> Result<PerSide<SegmentationReport>> {
        let segment = |side: Side| -> Result<SegmentationReport> {
            let report = self.segmenter.segment(
                events.get(side),
                signals.get(side),
                event_rate_hz,
                normalization,
            )?;
            tracing::debug!(
                %side,
                accepted = report.accepted,
                no_stop = report.no_stop,
                no_candidate = report.no_candidate,
                invalid_ordering = report.invalid_ordering,
                "segmented stances"
            );
            Ok(report)
        };
        Ok(PerSide::new(segment(Side::Left)?, segment(Side::Right)?))
    }

    /// Segment the IMU stream on its own events, then move its indices onto
    /// the marker rate so it joins like every other stream.
    fn segment_imu(&self, imu: &ImuStream, marker_rate_hz: f64) -> Result<PerSide<SegmentationReport>> {
        let event_fs = check_sample_rate(imu.event_rate_hz)?;
        let reports = self.segment_sides(
            &imu.events,
            PerSide::new(&imu.lumbar_ap, &imu.lumbar_ap),
            event_fs,
            Normalization::Unit,
        )?;
        let scale = marker_rate_hz / event_fs;
        Ok(reports.map(|_, report| rescale_report(report, scale)))
    }
}

/// Map every index of a report by `floor(index · scale)`.
fn rescale_report(mut report: SegmentationReport, scale: f64) -> SegmentationReport {
    let at = |index: usize| (index as f64 * scale).floor() as usize;
    for interval in report.braking.iter_mut().chain(report.propulsion.iter_mut()) {
        interval.start = at(interval.start);
        interval.stop = at(interval.stop);
    }
    for peak in report
        .braking_peaks
        .iter_mut()
        .chain(report.propulsion_peaks.iter_mut())
    {
        peak.index = at(peak.index);
    }
    report
}

/// Read a batch of trials from a JSON array.
#[cfg(feature = "serde")]
pub fn load_batch(path: &Path) -> Result<Vec<TrialInput>> {
    let contents = std::fs::read_to_string(path).map_err(|source| GaitError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(serde_json::from_str(&contents)?)
}

// ==== TESTS ====
