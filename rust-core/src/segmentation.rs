//! Braking/propulsion segmentation of stance phases.
//!
//! Splits every stance phase of one side into a braking interval followed by a
//! propulsion interval, using an anterior-posterior signal that is positive
//! while the body decelerates and negative while it is pushed forward. The
//! same code path serves ground-reaction force (N, normalized by body mass)
//! and sacrum or lumbar acceleration (m/s², unnormalized).
//!
//! Design: two zero-phase low-pass versions of the signal
//! - Coarse (5 Hz) locates the braking maximum and propulsion minimum and
//!   gives approximate boundaries.
//! - Precise (20 Hz) refines every boundary to an exact sign crossing.
//!
//! Per stance:
//! 1. Braking candidate: largest local maximum of the coarse signal.
//! 2. Propulsion candidate: smallest local minimum after it.
//! 3. Transition: first coarse sample below zero between the two, refined to
//!    the nearest precise positive→negative crossing.
//! 4. Braking start / propulsion stop: last coarse crossing of a small
//!    offset level, refined to the nearest precise negative→positive crossing.
//! 5. Accept only when `start_brake < transition < stop_propulsion`. A stance
//!    without a braking (propulsion) candidate collapses the braking
//!    (propulsion) interval onto its start (stop) and keeps the other one.
//!
//! Stances that do not qualify are skipped and counted in the
//! [`SegmentationReport`]; they never surface as errors.

use crate::error::{check_sample_rate, GaitError, Result};
use crate::signal::{
    falling_crossings, local_maxima, local_minima, nan_argmax, nan_argmin, nan_mean, nearest,
    rising_crossings, trapezoid, FilterConfig, DEFAULT_GAP_DILATION,
};
use crate::types::{AnalogSignal, ImpulseRecord, PeakRecord, SideEvents, StancePhase};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Configuration for braking/propulsion segmentation.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SegmenterConfig {
    /// Filter used to refine boundaries. Typical: 2nd order, 20 Hz.
    pub precise_filter: FilterConfig,

    /// Filter used to find peaks and approximate boundaries. Typical: 2nd order, 5 Hz.
    pub coarse_filter: FilterConfig,

    /// Samples masked either side of a signal gap after filtering.
    pub gap_dilation: usize,

    /// Samples skipped after stance start (braking) and before stance stop
    /// (propulsion) when searching peaks. Typical: 5.
    pub near_margin: usize,

    /// Samples skipped before stance stop (braking) and after stance start
    /// (propulsion) when searching peaks. Typical: 10.
    pub far_margin: usize,

    /// Half-width, in samples, of the window searched for precise crossings. Typical: 10.
    pub crossing_window: usize,

    /// Level separating braking from propulsion. Typical: 0.
    pub threshold: f64,

    /// Normalized level whose crossing marks approximate braking onset and
    /// propulsion end. Typical: 0.01.
    pub boundary_offset: f64,

    /// Intervals starting within this many seconds of the recording start are
    /// dropped as startup transients. Typical: 10 s.
    pub startup_exclusion_s: f64,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            precise_filter: FilterConfig::order2(20.0),
            coarse_filter: FilterConfig::order2(5.0),
            gap_dilation: DEFAULT_GAP_DILATION,
            near_margin: 5,
            far_margin: 10,
            crossing_window: 10,
            threshold: 0.0,
            boundary_offset: 0.01,
            startup_exclusion_s: 10.0,
        }
    }
}

impl SegmenterConfig {
    /// Check the parameters that do not depend on the sample rate.
    pub fn validate(&self) -> Result<()> {
        if self.crossing_window == 0 {
            return Err(GaitError::invalid_config(
                "crossing_window",
                "must be at least one sample",
            ));
        }
        if !self.boundary_offset.is_finite() || self.boundary_offset < 0.0 {
            return Err(GaitError::invalid_config(
                "boundary_offset",
                format!("must be finite and non-negative, got {}", self.boundary_offset),
            ));
        }
        if !self.threshold.is_finite() {
            return Err(GaitError::invalid_config("threshold", "must be finite"));
        }
        if !self.startup_exclusion_s.is_finite() || self.startup_exclusion_s < 0.0 {
            return Err(GaitError::invalid_config(
                "startup_exclusion_s",
                format!("must be non-negative, got {}", self.startup_exclusion_s),
            ));
        }
        Ok(())
    }
}

/// How impulses and boundary levels are scaled.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Normalization {
    /// Divide by body mass in kg (force signals).
    BodyMass(f64),
    /// No scaling (acceleration signals).
    Unit,
}

impl Normalization {
    /// Divisor applied to the signal.
    pub fn divisor(self) -> Result<f64> {
        match self {
            Normalization::Unit => Ok(1.0),
            Normalization::BodyMass(kg) if kg.is_finite() && kg > 0.0 => Ok(kg),
            Normalization::BodyMass(kg) => Err(GaitError::invalid_config(
                "body_mass_kg",
                format!("must be positive, got {kg}"),
            )),
        }
    }
}

/// Braking/propulsion output for one side, indexed in the event domain.
///
/// Interval and peak vectors are in stance order. Startup exclusion applies
/// per interval, so a stance can contribute propulsion without braking.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SegmentationReport {
    pub braking: Vec<ImpulseRecord>,
    pub propulsion: Vec<ImpulseRecord>,
    /// Maximum of the precise signal within each braking interval.
    pub braking_peaks: Vec<PeakRecord>,
    /// Minimum of the precise signal within each propulsion interval.
    pub propulsion_peaks: Vec<PeakRecord>,

    /// Stances that passed the ordering check.
    pub accepted: usize,
    /// Initial contacts without a terminal contact inside the recording.
    pub no_stop: usize,
    /// Stances without usable peaks or crossings.
    pub no_candidate: usize,
    /// Stances whose boundaries are out of order.
    pub invalid_ordering: usize,
    /// Intervals dropped by the startup exclusion.
    pub startup_excluded: usize,
}

/// Accepted boundaries of one stance, in signal samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StanceBoundaries {
    start_brake: usize,
    transition: usize,
    stop_propulsion: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StanceOutcome {
    Accepted(StanceBoundaries),
    NoCandidate,
    InvalidOrdering,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Braking,
    Propulsion,
}

/// Filtered views of one signal, shared by every stance.
struct FilteredSignal {
    precise: Vec<f64>,
    coarse: Vec<f64>,
    /// `coarse / bw − offset`
    braking_level: Vec<f64>,
    /// `coarse / bw + offset`
    propulsion_level: Vec<f64>,
    sample_rate_hz: f64,
    divisor: f64,
}

/// Scales indices between the event rate and the signal rate.
#[derive(Debug, Clone, Copy)]
struct RateBridge {
    signal_per_event: f64,
}

impl RateBridge {
    fn to_signal(self, index: usize) -> usize {
        (index as f64 * self.signal_per_event).round() as usize
    }

    fn to_events(self, index: usize) -> usize {
        (index as f64 / self.signal_per_event).floor() as usize
    }
}

/// Stance segmenter for braking/propulsion intervals.
#[derive(Debug, Clone, Default)]
pub struct StanceSegmenter {
    config: SegmenterConfig,
}

impl StanceSegmenter {
    /// Create a segmenter with the given configuration.
    pub fn new(config: SegmenterConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SegmenterConfig {
        &self.config
    }

    /// Segment every stance phase of one side.
    ///
    /// `events` are sample indices at `event_rate_hz`; they are scaled onto
    /// the signal's rate and every output index is mapped back. Impulses
    /// integrate at the signal's own rate.
    pub fn segment(
        &self,
        events: &SideEvents,
        signal: &AnalogSignal,
        event_rate_hz: f64,
        normalization: Normalization,
    ) -> Result<SegmentationReport> {
        self.config.validate()?;
        let event_fs = check_sample_rate(event_rate_hz)?;
        let filtered = self.prepare(signal, normalization)?;
        let bridge = RateBridge {
            signal_per_event: filtered.sample_rate_hz / event_fs,
        };

        let mut report = SegmentationReport::default();
        for phase in events.stance_phases() {
            let Some(phase) = phase else {
                report.no_stop += 1;
                continue;
            };
            let stance = StancePhase {
                start: bridge.to_signal(phase.start),
                stop: bridge.to_signal(phase.stop),
            };
            if stance.stop >= filtered.precise.len() {
                report.no_stop += 1;
                continue;
            }

            match self.segment_stance(&filtered, stance) {
                StanceOutcome::Accepted(bounds) => {
                    report.accepted += 1;
                    self.record(&filtered, bounds, bridge, &mut report);
                }
                StanceOutcome::NoCandidate => report.no_candidate += 1,
                StanceOutcome::InvalidOrdering => report.invalid_ordering += 1,
            }
        }

        tracing::debug!(
            accepted = report.accepted,
            no_stop = report.no_stop,
            no_candidate = report.no_candidate,
            invalid_ordering = report.invalid_ordering,
            startup_excluded = report.startup_excluded,
            "segmented stance phases"
        );
        Ok(report)
    }

    // ===== PRIVATE METHODS =====

    fn prepare(&self, signal: &AnalogSignal, normalization: Normalization) -> Result<FilteredSignal> {
        let fs = check_sample_rate(signal.sample_rate_hz)?;
        let divisor = normalization.divisor()?;
        let precise = self
            .config
            .precise_filter
            .design(fs)?
            .filtfilt_omit_nan(&signal.samples, self.config.gap_dilation);
        let coarse = self
            .config
            .coarse_filter
            .design(fs)?
            .filtfilt_omit_nan(&signal.samples, self.config.gap_dilation);

        let offset = self.config.boundary_offset;
        let braking_level = coarse.iter().map(|v| v / divisor - offset).collect();
        let propulsion_level = coarse.iter().map(|v| v / divisor + offset).collect();

        Ok(FilteredSignal {
            precise,
            coarse,
            braking_level,
            propulsion_level,
            sample_rate_hz: fs,
            divisor,
        })
    }

    fn segment_stance(&self, signal: &FilteredSignal, stance: StancePhase) -> StanceOutcome {
        let cfg = &self.config;
        let StancePhase { start, stop } = stance;
        let coarse = &signal.coarse;
        let precise = &signal.precise;
        let w = cfg.crossing_window;

        let braking_peak = pick(
            &local_maxima(coarse, start + cfg.near_margin, stop.saturating_sub(cfg.far_margin)),
            coarse,
            |candidate, best| candidate > best,
        )
        .filter(|&i| coarse[i] >= cfg.threshold);

        let after = braking_peak.unwrap_or(start);
        let minima: Vec<usize> =
            local_minima(coarse, start + cfg.far_margin, stop.saturating_sub(cfg.near_margin))
                .into_iter()
                .filter(|&i| i > after)
                .collect();
        let propulsion_peak = pick(&minima, coarse, |candidate, best| candidate < best)
            .filter(|&i| coarse[i] <= cfg.threshold);

        let transition = match (braking_peak, propulsion_peak) {
            (Some(bp), Some(pp)) => match self.transition_between(signal, stance, bp, pp) {
                Some(transition) => transition,
                None => return StanceOutcome::NoCandidate,
            },
            (None, Some(_)) => start,
            (Some(_), None) => stop,
            (None, None) => return StanceOutcome::NoCandidate,
        };

        let start_brake = match braking_peak {
            Some(bp) => {
                let lo = start.saturating_sub(w);
                let approx = rising_crossings(&signal.braking_level, lo, bp)
                    .last()
                    .copied()
                    .or_else(|| nan_argmin(&signal.braking_level, start, bp));
                let Some(approx) = approx else {
                    return StanceOutcome::NoCandidate;
                };
                nearest(&rising_crossings(precise, lo, bp), approx).unwrap_or(start)
            }
            None => start,
        };

        let stop_propulsion = match propulsion_peak {
            Some(pp) => {
                let approx = rising_crossings(&signal.propulsion_level, pp, stop + w)
                    .last()
                    .copied()
                    .or_else(|| nan_argmax(&signal.propulsion_level, pp, stop));
                let Some(approx) = approx else {
                    return StanceOutcome::NoCandidate;
                };
                nearest(&rising_crossings(precise, pp, stop + w), approx).unwrap_or(stop)
            }
            None => stop,
        };

        // A missing candidate collapses its interval onto the stance boundary;
        // only the remaining interval has to be non-empty.
        let ordered = match (braking_peak, propulsion_peak) {
            (None, Some(_)) => start_brake == transition && transition < stop_propulsion,
            (Some(_), None) => start_brake < transition && transition == stop_propulsion,
            _ => start_brake < transition && transition < stop_propulsion,
        };
        if ordered {
            StanceOutcome::Accepted(StanceBoundaries {
                start_brake,
                transition,
                stop_propulsion,
            })
        } else {
            StanceOutcome::InvalidOrdering
        }
    }

    /// Braking-to-propulsion transition of a stance with both peak candidates.
    ///
    /// `None` when no falling precise crossing lies near the coarse one. A
    /// crossing before the stance start is replaced by the stance edge that
    /// the stance mean points to, and kept as is when the mean is zero or
    /// undefined.
    fn transition_between(
        &self,
        signal: &FilteredSignal,
        stance: StancePhase,
        braking_peak: usize,
        propulsion_peak: usize,
    ) -> Option<usize> {
        let StancePhase { start, stop } = stance;
        let w = self.config.crossing_window;
        let precise = &signal.precise;
        let Some(approx) =
            (braking_peak..propulsion_peak).find(|&i| signal.coarse[i] < self.config.threshold)
        else {
            return Some(stop);
        };

        let crossings = falling_crossings(precise, approx.saturating_sub(w), approx + w);
        let refined = nearest(&crossings, approx)?;
        if refined >= start {
            return Some(refined);
        }
        Some(match nan_mean(precise, start, stop) {
            Some(mean) if mean < 0.0 => start,
            Some(mean) if mean > 0.0 => stop,
            _ => refined,
        })
    }

    fn record(
        &self,
        signal: &FilteredSignal,
        bounds: StanceBoundaries,
        bridge: RateBridge,
        report: &mut SegmentationReport,
    ) {
        let exclusion = self.config.startup_exclusion_s * signal.sample_rate_hz;
        let intervals = [
            (Direction::Braking, bounds.start_brake, bounds.transition),
            (Direction::Propulsion, bounds.transition, bounds.stop_propulsion),
        ];

        for (direction, start, stop) in intervals {
            if start >= stop {
                continue;
            }
            if start as f64 <= exclusion {
                report.startup_excluded += 1;
                continue;
            }
            let interval = ImpulseRecord {
                start: bridge.to_events(start),
                stop: bridge.to_events(stop),
                value: impulse(signal, start, stop, direction),
            };
            let peak = match direction {
                Direction::Braking => nan_argmax(&signal.precise, start, stop),
                Direction::Propulsion => nan_argmin(&signal.precise, start, stop),
            }
            .map(|i| PeakRecord {
                index: bridge.to_events(i),
                value: signal.precise[i],
            });

            match direction {
                Direction::Braking => {
                    report.braking.push(interval);
                    report.braking_peaks.extend(peak);
                }
                Direction::Propulsion => {
                    report.propulsion.push(interval);
                    report.propulsion_peaks.extend(peak);
                }
            }
        }
    }
}

/// Candidate whose signal value is best; the first one wins a tie.
fn pick(candidates: &[usize], x: &[f64], better: impl Fn(f64, f64) -> bool) -> Option<usize> {
    candidates.iter().copied().fold(None, |best, i| match best {
        Some(b) if !better(x[i], x[b]) => Some(b),
        _ => Some(i),
    })
}

/// Net area of the interval in the interval's own direction.
///
/// Positive and negative samples are integrated as separate subsequences.
/// A non-positive result means the interval is dominated by the opposite
/// direction and is reported as missing.
fn impulse(signal: &FilteredSignal, start: usize, stop: usize, direction: Direction) -> Option<f64> {
    let stop = stop.min(signal.precise.len());
    let window = signal.precise.get(start..stop)?;
    let area = |keep: fn(f64) -> bool| {
        let part: Vec<f64> = window.iter().copied().filter(|v| keep(*v)).collect();
        (trapezoid(&part) / signal.sample_rate_hz / signal.divisor).abs()
    };
    let forward = area(|v| v < 0.0);
    let backward = area(|v| v > 0.0);
    let value = match direction {
        Direction::Braking => backward - forward,
        Direction::Propulsion => forward - backward,
    };
    (value > 0.0).then_some(value)
}

// ==== TESTS ====
