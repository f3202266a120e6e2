//! Error taxonomy for the gait engine.
//!
//! Only genuinely unexpected conditions are errors. The designed "nothing to
//! report" outcomes of the engine are values instead:
//! - a side whose markers are absent yields empty event lists
//! - a stance phase without a qualifying terminal contact or a valid peak is
//!   skipped and counted in [`SegmentationReport`](crate::segmentation::SegmentationReport)
//! - a stance whose braking/propulsion boundaries are out of order is
//!   discarded and counted the same way
//!
//! A [`GaitError`] raised while processing one trial is wrapped in
//! [`GaitError::Trial`] by the batch runner, logged, and never aborts the batch.

use std::path::PathBuf;

/// Errors raised by the gait engine.
#[derive(Debug, thiserror::Error)]
pub enum GaitError {
    /// A configuration field holds an unusable value.
    #[error("Invalid value for `{field}`: {reason}")]
    InvalidConfig {
        /// Name of the field.
        field: &'static str,
        /// Human-readable reason.
        reason: String,
    },

    /// Sample rates must be finite and strictly positive.
    #[error("Invalid sample rate: {0} Hz")]
    InvalidSampleRate(f64),

    /// Two series that must share a time base have different lengths.
    #[error("Length mismatch: expected {expected}, got {actual}")]
    LengthMismatch {
        /// Expected number of samples.
        expected: usize,
        /// Actual number of samples.
        actual: usize,
    },

    /// A marker required by an explicitly requested computation is absent.
    #[error("Missing marker: {0}")]
    MissingMarker(String),

    /// Event indices do not fit the signal they are applied to.
    #[error("Event index {index} out of range for {len} samples")]
    EventOutOfRange {
        /// Offending event index.
        index: usize,
        /// Number of samples available.
        len: usize,
    },

    /// Processing of one trial failed.
    #[error("Trial `{trial}` failed: {source}")]
    Trial {
        /// Trial identifier.
        trial: String,
        /// Underlying failure.
        #[source]
        source: Box<GaitError>,
    },

    /// A file could not be read or written.
    #[error("I/O error on `{path}`: {source}")]
    Io {
        /// Path involved.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// JSON (de)serialization failed.
    #[cfg(feature = "serde")]
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl GaitError {
    /// Construct an [`GaitError::InvalidConfig`].
    pub fn invalid_config(field: &'static str, reason: impl Into<String>) -> Self {
        GaitError::InvalidConfig {
            field,
            reason: reason.into(),
        }
    }

    /// Wrap an error with the identifier of the trial it came from.
    pub fn in_trial(self, trial: impl Into<String>) -> Self {
        GaitError::Trial {
            trial: trial.into(),
            source: Box::new(self),
        }
    }
}

/// Result type for gait engine operations.
pub type Result<T> = std::result::Result<T, GaitError>;

/// Reject sample rates that are zero, negative or not finite.
pub(crate) fn check_sample_rate(rate_hz: f64) -> Result<f64> {
    if rate_hz.is_finite() && rate_hz > 0.0 {
        Ok(rate_hz)
    } else {
        Err(GaitError::InvalidSampleRate(rate_hz))
    }
}

// ==== TESTS ====
