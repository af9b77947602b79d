use std::fmt;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::data::spectrum::SpectralRecord;
use crate::denoise::batch::RecordOutcome;
use crate::denoise::engine::PeakDecision;
use crate::error::RecordErrorKind;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecordStatus {
    Succeeded,
    Failed,
    /// not started because the batch was cancelled
    Skipped,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RecordFailure {
    pub kind: RecordErrorKind,
    pub message: String,
}

/// Outcome of one input record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RecordSummary {
    /// position in the input batch
    pub index: usize,
    pub id: Option<String>,
    pub status: RecordStatus,
    pub peaks_in: usize,
    pub peaks_kept: usize,
    /// kept / input peaks, only for succeeded records
    pub retention_ratio: Option<f64>,
    #[serde(default)]
    pub exhausted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RecordFailure>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub decisions: Vec<PeakDecision>,
}

impl RecordSummary {
    fn new(index: usize, record: &SpectralRecord, outcome: &RecordOutcome) -> Self {
        let mut summary = RecordSummary {
            index,
            id: record.id.clone(),
            status: RecordStatus::Skipped,
            peaks_in: record.peaks.len(),
            peaks_kept: 0,
            retention_ratio: None,
            exhausted: false,
            error: None,
            decisions: Vec::new(),
        };
        match outcome {
            RecordOutcome::Succeeded(denoised) => {
                summary.status = RecordStatus::Succeeded;
                summary.peaks_kept = denoised.peaks_kept();
                summary.retention_ratio = Some(denoised.retention_ratio());
                summary.exhausted = denoised.exhausted;
                summary.decisions = denoised.decisions.clone();
            }
            RecordOutcome::Failed(e) => {
                summary.status = RecordStatus::Failed;
                summary.error = Some(RecordFailure {
                    kind: e.kind(),
                    message: e.to_string(),
                });
            }
            RecordOutcome::Skipped => {}
        }
        summary
    }
}

/// Aggregate result of a batch. Peak totals cover succeeded records only.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub total_peaks_in: usize,
    pub total_peaks_kept: usize,
    pub records: Vec<RecordSummary>,
}

impl Report {
    /// Summarise outcomes; `outcomes[i]` belongs to `records[i]`.
    pub fn from_outcomes(records: &[SpectralRecord], outcomes: &[RecordOutcome]) -> Self {
        let mut report = Report {
            total: records.len(),
            ..Report::default()
        };
        for (index, (record, outcome)) in records.iter().zip(outcomes).enumerate() {
            let summary = RecordSummary::new(index, record, outcome);
            match summary.status {
                RecordStatus::Succeeded => {
                    report.succeeded += 1;
                    report.total_peaks_in += summary.peaks_in;
                    report.total_peaks_kept += summary.peaks_kept;
                }
                RecordStatus::Failed => report.failed += 1,
                RecordStatus::Skipped => report.skipped += 1,
            }
            report.records.push(summary);
        }
        report
    }

    pub fn failures(&self) -> impl Iterator<Item = &RecordSummary> {
        self.records.iter().filter(|r| r.status == RecordStatus::Failed)
    }

    pub fn retention_ratio(&self) -> f64 {
        match self.total_peaks_in {
            0 => 0.0,
            n => self.total_peaks_kept as f64 / n as f64,
        }
    }

    /// The same report without per-peak decisions.
    pub fn without_decisions(&self) -> Self {
        let mut report = self.clone();
        for record in &mut report.records {
            record.decisions.clear();
        }
        report
    }
}

impl Display for Report {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} records: {} succeeded, {} failed, {} skipped; kept {} of {} peaks ({:.1}%)",
            self.total,
            self.succeeded,
            self.failed,
            self.skipped,
            self.total_peaks_kept,
            self.total_peaks_in,
            100.0 * self.retention_ratio()
        )
    }
}
