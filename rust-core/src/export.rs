//! Step-table export.
//!
//! Rows are written as JSON lines: one self-contained object per step with the
//! trial metadata flattened in, so the output can be streamed, concatenated
//! across batches and loaded directly as a data frame. Absent values are
//! `null`.
//!
//! A [`BatchSummary`] condenses a batch's outcome for logging and for the
//! trailing report of the command-line tool.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{GaitError, Result};
use crate::pipeline::{BatchReport, TrialResult};
use crate::segmentation::SegmentationReport;
use crate::step_table::StepRow;
use crate::types::PerSide;

/// Streaming JSON-lines writer for step rows.
#[derive(Debug)]
pub struct RowExporter<W: Write> {
    writer: W,
    rows_written: usize,
}

impl<W: Write> RowExporter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            rows_written: 0,
        }
    }

    /// Write one row as a single line.
    pub fn write_row(&mut self, row: &StepRow) -> Result<()> {
        serde_json::to_writer(&mut self.writer, row)?;
        self.writer.write_all(b"\n").map_err(serde_json::Error::io)?;
        self.rows_written += 1;
        Ok(())
    }

    /// Write every row of a trial, left side first.
    pub fn write_trial(&mut self, result: &TrialResult) -> Result<usize> {
        let before = self.rows_written;
        for row in result.rows() {
            self.write_row(row)?;
        }
        Ok(self.rows_written - before)
    }

    /// Rows written so far.
    pub fn rows_written(&self) -> usize {
        self.rows_written
    }

    /// Flush and hand back the underlying writer.
    pub fn finish(mut self) -> Result<W> {
        self.writer.flush().map_err(serde_json::Error::io)?;
        Ok(self.writer)
    }
}

/// Write the rows of every successful trial of a batch to `path`.
pub fn export_rows(path: &Path, report: &BatchReport) -> Result<BatchSummary> {
    let file = File::create(path).map_err(|source| GaitError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut exporter = RowExporter::new(BufWriter::new(file));
    for result in report.succeeded() {
        exporter.write_trial(result)?;
    }
    exporter.finish()?;
    Ok(BatchSummary::from_report(report))
}

/// Counts describing one batch.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BatchSummary {
    pub trials: usize,
    pub failed_trials: Vec<String>,
    pub rows: usize,
    /// Rows missing their IC or TC.
    pub unmatched_rows: usize,
    pub ambiguous_joins: usize,
    /// Stances segmented on the ground-reaction force.
    pub grf_stances: usize,
    /// Stances segmented on the sacrum acceleration.
    pub sacrum_stances: usize,
    /// Stances segmented on the lumbar IMU.
    pub imu_stances: usize,
}

impl BatchSummary {
    pub fn from_report(report: &BatchReport) -> Self {
        let mut summary = BatchSummary {
            trials: report.outcomes.len(),
            failed_trials: report.failed().map(|(trial, _)| trial.to_string()).collect(),
            ..Default::default()
        };

        for result in report.succeeded() {
            for table in [&result.steps.left, &result.steps.right] {
                summary.rows += table.report.rows;
                summary.unmatched_rows += table.report.unmatched_rows;
                summary.ambiguous_joins += table.report.ambiguous_joins;
            }
            summary.grf_stances += accepted_stances(result.grf.as_ref());
            summary.sacrum_stances += accepted_stances(result.sacrum.as_ref());
            summary.imu_stances += accepted_stances(result.lumbar_imu.as_ref());
        }
        summary
    }

    /// Pretty-printed JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

fn accepted_stances(reports: Option<&PerSide<SegmentationReport>>) -> usize {
    reports.map_or(0, |r| r.left.accepted + r.right.accepted)
}

// ==== TESTS ====
