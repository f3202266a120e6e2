//! Signal filtering and search primitives.
//!
//! This module provides the batch signal processing shared by every feature
//! extractor:
//! - Butterworth low-pass design (cascaded second-order sections)
//! - Zero-phase forward-backward filtering with odd-extension padding
//! - Gap-aware filtering: each contiguous run of valid samples is filtered on
//!   its own, gaps are re-inserted and then widened to hide filter ringing
//! - Finite differences, local extrema, sign crossings, trapezoid areas
//!
//! Design note: everything here works on whole recordings (`&[f64]`) and
//! treats `NaN` as "missing". Comparisons involving `NaN` are always false, so
//! a missing sample can never become a peak or a crossing.

use crate::error::{check_sample_rate, GaitError, Result};

/// Samples masked on each side of a gap after gap-aware filtering.
pub const DEFAULT_GAP_DILATION: usize = 10;

/// Low-pass filter parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FilterConfig {
    /// Butterworth order per pass. Must be even. Forward-backward
    /// filtering doubles the effective order.
    pub order: usize,

    /// Cut-off frequency in Hz. Must lie below the Nyquist frequency.
    pub cutoff_hz: f64,
}

impl FilterConfig {
    /// Second-order filter at the given cut-off.
    pub const fn order2(cutoff_hz: f64) -> Self {
        Self {
            order: 2,
            cutoff_hz,
        }
    }

    /// Design the filter for a sample rate.
    pub fn design(&self, sample_rate_hz: f64) -> Result<ButterworthLowpass> {
        ButterworthLowpass::new(self.order, self.cutoff_hz, sample_rate_hz)
    }
}

/// One second-order IIR section, transposed direct form II.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Biquad {
    b: [f64; 3],
    a: [f64; 2],
}

impl Biquad {
    /// Butterworth low-pass section via the bilinear transform with prewarping.
    fn lowpass(k: f64, q: f64) -> Self {
        let k2 = k * k;
        let norm = 1.0 / (1.0 + k / q + k2);
        let b0 = k2 * norm;
        Self {
            b: [b0, 2.0 * b0, b0],
            a: [2.0 * (k2 - 1.0) * norm, (1.0 - k / q + k2) * norm],
        }
    }

    /// Steady-state delay line for a unit step input.
    fn step_state(&self) -> [f64; 2] {
        let gain = (self.b[0] + self.b[1] + self.b[2]) / (1.0 + self.a[0] + self.a[1]);
        [gain - self.b[0], self.b[2] - self.a[1] * gain]
    }

    fn run(&self, x: &mut [f64], mut z: [f64; 2]) {
        for v in x.iter_mut() {
            let input = *v;
            let y = self.b[0] * input + z[0];
            z[0] = self.b[1] * input - self.a[0] * y + z[1];
            z[1] = self.b[2] * input - self.a[1] * y;
            *v = y;
        }
    }
}

/// Butterworth low-pass filter as a cascade of second-order sections.
#[derive(Debug, Clone, PartialEq)]
pub struct ButterworthLowpass {
    sections: Vec<Biquad>,
    order: usize,
}

impl ButterworthLowpass {
    /// Design an even-order low-pass at `cutoff_hz` for `sample_rate_hz`.
    pub fn new(order: usize, cutoff_hz: f64, sample_rate_hz: f64) -> Result<Self> {
        let fs = check_sample_rate(sample_rate_hz)?;
        if order == 0 || order % 2 != 0 {
            return Err(GaitError::invalid_config(
                "order",
                format!("Butterworth order must be a positive even number, got {order}"),
            ));
        }
        if !(cutoff_hz > 0.0 && cutoff_hz < fs / 2.0) {
            return Err(GaitError::invalid_config(
                "cutoff_hz",
                format!("cut-off {cutoff_hz} Hz must lie in (0, {}) Hz", fs / 2.0),
            ));
        }

        let k = (std::f64::consts::PI * cutoff_hz / fs).tan();
        let sections = (0..order / 2)
            .map(|i| {
                let theta = std::f64::consts::PI * (2 * i + 1) as f64 / (2 * order) as f64;
                Biquad::lowpass(k, 1.0 / (2.0 * theta.sin()))
            })
            .collect();

        Ok(Self { sections, order })
    }

    /// Odd-extension length used by [`filtfilt`](Self::filtfilt).
    #[must_use]
    pub fn pad_len(&self) -> usize {
        3 * (self.order + 1)
    }

    /// Zero-phase forward-backward filtering.
    ///
    /// The input is extended at both ends by an odd reflection of
    /// [`pad_len`](Self::pad_len) samples, and every section starts in the
    /// steady state of the first sample. Returns `None` when the input is not
    /// longer than the padding.
    pub fn filtfilt(&self, x: &[f64]) -> Option<Vec<f64>> {
        let n = x.len();
        let pad = self.pad_len();
        if n <= pad {
            return None;
        }

        let mut ext = Vec::with_capacity(n + 2 * pad);
        ext.extend((1..=pad).rev().map(|i| 2.0 * x[0] - x[i]));
        ext.extend_from_slice(x);
        ext.extend((0..pad).map(|i| 2.0 * x[n - 1] - x[n - 2 - i]));

        self.run_with_initial_state(&mut ext);
        ext.reverse();
        self.run_with_initial_state(&mut ext);
        ext.reverse();

        Some(ext[pad..pad + n].to_vec())
    }

    /// Zero-phase filtering that tolerates missing samples.
    ///
    /// Each maximal run of finite samples is filtered independently; runs too
    /// short to pad stay missing. Afterwards every originally missing sample
    /// masks `dilation` neighbours on each side.
    pub fn filtfilt_omit_nan(&self, x: &[f64], dilation: usize) -> Vec<f64> {
        let mut out = vec![f64::NAN; x.len()];
        for (lo, hi) in finite_runs(x) {
            if let Some(filtered) = self.filtfilt(&x[lo..hi]) {
                out[lo..hi].copy_from_slice(&filtered);
            }
        }
        dilate_gaps(x, &mut out, dilation);
        out
    }

    fn run_with_initial_state(&self, x: &mut [f64]) {
        let Some(&first) = x.first() else {
            return;
        };
        for section in &self.sections {
            let zi = section.step_state();
            // Butterworth low-pass sections have unit DC gain, so the
            // steady-state input of every section equals the first sample.
            section.run(x, [zi[0] * first, zi[1] * first]);
        }
    }
}

/// Half-open `[lo, hi)` ranges of consecutive finite samples.
pub fn finite_runs(x: &[f64]) -> Vec<(usize, usize)> {
    let mut runs = Vec::new();
    let mut start = None;
    for (i, v) in x.iter().enumerate() {
        match (v.is_finite(), start) {
            (true, None) => start = Some(i),
            (false, Some(s)) => {
                runs.push((s, i));
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        runs.push((s, x.len()));
    }
    runs
}

/// Mask `dilation` samples either side of every non-finite sample of `source` in `out`.
pub fn dilate_gaps(source: &[f64], out: &mut [f64], dilation: usize) {
    let n = out.len();
    for (i, _) in source.iter().enumerate().filter(|(_, v)| !v.is_finite()) {
        let lo = i.saturating_sub(dilation);
        let hi = (i + dilation + 1).min(n);
        for v in &mut out[lo..hi] {
            *v = f64::NAN;
        }
    }
}

/// Central-difference derivative `(x[i+1] - x[i-1]) * fs / 2`; the end samples are `NaN`.
pub fn central_difference(x: &[f64], sample_rate_hz: f64) -> Vec<f64> {
    let n = x.len();
    (0..n)
        .map(|i| {
            if i == 0 || i + 1 >= n {
                f64::NAN
            } else {
                (x[i + 1] - x[i - 1]) * sample_rate_hz / 2.0
            }
        })
        .collect()
}

/// Backward-difference derivative with a leading `NaN`, same length as the input.
pub fn backward_difference(x: &[f64], sample_rate_hz: f64) -> Vec<f64> {
    let mut out = Vec::with_capacity(x.len());
    if !x.is_empty() {
        out.push(f64::NAN);
    }
    out.extend(x.windows(2).map(|w| (w[1] - w[0]) * sample_rate_hz));
    out
}

/// Strict local maxima of `x` restricted to `[lo, hi)`, as global indices.
///
/// Flat-topped peaks report their middle sample. Samples at the window edges
/// are never peaks.
pub fn local_maxima(x: &[f64], lo: usize, hi: usize) -> Vec<usize> {
    let hi = hi.min(x.len());
    if hi <= lo + 2 {
        return Vec::new();
    }
    let w = &x[lo..hi];
    let last = w.len() - 1;
    let mut peaks = Vec::new();
    let mut i = 1;
    while i < last {
        if w[i - 1] < w[i] {
            let mut ahead = i + 1;
            while ahead < last && w[ahead] == w[i] {
                ahead += 1;
            }
            if w[ahead] < w[i] {
                peaks.push(lo + (i + ahead - 1) / 2);
                i = ahead;
            }
        }
        i += 1;
    }
    peaks
}

/// Strict local minima of `x` restricted to `[lo, hi)`, as global indices.
pub fn local_minima(x: &[f64], lo: usize, hi: usize) -> Vec<usize> {
    let negated: Vec<f64> = x.iter().map(|v| -v).collect();
    local_maxima(&negated, lo, hi)
}

/// Sign of a sample: `1`, `-1`, `0`, or `NaN` for missing data.
fn sign(v: f64) -> f64 {
    if v.is_nan() {
        f64::NAN
    } else if v > 0.0 {
        1.0
    } else if v < 0.0 {
        -1.0
    } else {
        0.0
    }
}

/// Positive-to-negative sign changes of `x` in `[lo, hi)`.
///
/// Each reported index is the last sample before the change, matching a
/// jump of the sign from `+1` to `-1`. Touching zero does not count.
pub fn falling_crossings(x: &[f64], lo: usize, hi: usize) -> Vec<usize> {
    sign_jumps(x, lo, hi, |d| d < -1.0)
}

/// Negative-to-positive sign changes of `x` in `[lo, hi)`.
pub fn rising_crossings(x: &[f64], lo: usize, hi: usize) -> Vec<usize> {
    sign_jumps(x, lo, hi, |d| d > 1.0)
}

fn sign_jumps(x: &[f64], lo: usize, hi: usize, keep: impl Fn(f64) -> bool) -> Vec<usize> {
    let hi = hi.min(x.len());
    if hi <= lo + 1 {
        return Vec::new();
    }
    (lo..hi - 1)
        .filter(|&i| keep(sign(x[i + 1]) - sign(x[i])))
        .collect()
}

/// Element of `candidates` closest to `target`; ties resolve to the earliest.
pub fn nearest(candidates: &[usize], target: usize) -> Option<usize> {
    candidates
        .iter()
        .copied()
        .min_by_key(|&c| c.abs_diff(target))
}

/// Index of the largest finite sample in `[lo, hi)`; first occurrence wins.
pub fn nan_argmax(x: &[f64], lo: usize, hi: usize) -> Option<usize> {
    nan_arg_extreme(x, lo, hi, |candidate, best| candidate > best)
}

/// Index of the smallest finite sample in `[lo, hi)`; first occurrence wins.
pub fn nan_argmin(x: &[f64], lo: usize, hi: usize) -> Option<usize> {
    nan_arg_extreme(x, lo, hi, |candidate, best| candidate < best)
}

fn nan_arg_extreme(
    x: &[f64],
    lo: usize,
    hi: usize,
    better: impl Fn(f64, f64) -> bool,
) -> Option<usize> {
    let hi = hi.min(x.len());
    let mut best: Option<usize> = None;
    for i in lo..hi {
        if !x[i].is_finite() {
            continue;
        }
        match best {
            Some(b) if !better(x[i], x[b]) => {}
            _ => best = Some(i),
        }
    }
    best
}

/// Mean of the finite samples in `[lo, hi)`.
pub fn nan_mean(x: &[f64], lo: usize, hi: usize) -> Option<f64> {
    let hi = hi.min(x.len());
    let (sum, count) = x
        .get(lo..hi)
        .unwrap_or(&[])
        .iter()
        .filter(|v| v.is_finite())
        .fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    (count > 0).then(|| sum / count as f64)
}

/// Trapezoid-rule area of consecutive samples with unit spacing.
pub fn trapezoid(y: &[f64]) -> f64 {
    y.windows(2).map(|w| (w[0] + w[1]) / 2.0).sum()
}

// ==== TESTS ====
