//! Gait Kinetics Engine Library
//!
//! Turns motion-capture, force-plate and lumbar IMU recordings of walking
//! trials into a step-by-step table: gait events, spatiotemporal parameters,
//! braking and propulsion impulses with their peaks, and trailing limb angles,
//! all joined onto one row per step.
//!
//! # Design
//!
//! - **Indices, not timestamps**: every event and interval is a sample index
//!   at the marker rate. Signals at other rates are bridged explicitly.
//! - **Absence is data**: a missing marker, a stance without a terminal
//!   contact or an unusable boundary produces an empty result or a counter,
//!   never an error. Errors are reserved for bad configuration and bad input.
//! - **Trials are independent**: a batch is a map over trials, and one failing
//!   trial never stops the others.
//!
//! # Example
//!
//! ```ignore
//! use gait_kinetics::prelude::*;
//!
//! let pipeline = GaitPipeline::new(PipelineConfig::default());
//! let result = pipeline.process_trial(&trial)?;
//! for row in result.rows() {
//!     println!("{:?} braking={:?}", row.events, row.grf.braking);
//! }
//! ```

pub mod error;
pub mod event_detection;
#[cfg(feature = "serde")]
pub mod export;
pub mod kinematics;
pub mod pipeline;
pub mod segmentation;
pub mod signal;
pub mod spatiotemporal;
pub mod step_table;
pub mod trailing_limb_angle;
pub mod types;

#[cfg(test)]
mod integration_tests;

// Re-export commonly used types
pub use error::{GaitError, Result};
pub use pipeline::{BatchReport, GaitPipeline, PipelineConfig, TrialInput, TrialResult};
pub use step_table::StepRow;
pub use types::{AnalogSignal, GaitEvents, MarkerTrajectory, PerSide, Side, SideEvents, TrialKind};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Everything needed to run the pipeline.
pub mod prelude {
    pub use crate::error::{GaitError, Result};
    pub use crate::event_detection::{DetectorParams, EventDetectorConfig, GaitEventDetector};
    pub use crate::kinematics::{MarkerSet, SacrumConfig};
    pub use crate::pipeline::{
        BatchReport, GaitPipeline, ImuStream, PipelineConfig, TrialInput, TrialResult,
    };
    pub use crate::segmentation::{Normalization, SegmentationReport, SegmenterConfig, StanceSegmenter};
    pub use crate::step_table::{StepEvents, StepRow};
    pub use crate::trailing_limb_angle::{DistalLandmark, ProximalLandmark, TlaConfig};
    pub use crate::types::{
        AnalogSignal, GaitEvents, MarkerTrajectory, PerSide, Side, SideEvents, TrialKind,
        TrialMetadata,
    };
}
