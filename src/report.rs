//! Batch summary report.
//!
//! [`BatchReport`] accumulates per-artifact results plus a timestamped
//! record of every success, skip, warning and error. At the end of a batch it
//! is logged, written to `scan_issues_report_<stamp>.json` and exported as
//! CSV (skipped, successful and failed artifacts) in the output directory.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::model::{
    ArtifactState, Classification, OutputFormat, ScanResult, Severity, SeverityBreakdown,
};

const RUN_STAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Compact timestamp used in run folder and report file names.
pub fn run_stamp(at: DateTime<Utc>) -> String {
    at.format(RUN_STAMP_FORMAT).to_string()
}

/// Per-run folder name under the output directory: `scan_reports_<stamp>`.
pub fn run_folder_name(at: DateTime<Utc>) -> String {
    format!("scan_reports_{}", run_stamp(at))
}

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to serialize summary: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("Failed to write CSV export: {0}")]
    Csv(#[from] csv::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueKind {
    Success,
    Skipped,
    Warning,
    Error,
}

/// One timestamped event in the batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueRecord {
    pub timestamp: DateTime<Utc>,
    pub target: PathBuf,
    pub kind: IssueKind,
    pub message: String,
}

/// Why a target never reached the scanner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipKind {
    /// Checksums and earlier reports; never counted as targets
    NotScannable,
    /// Left over after a failure under `fail_fast`
    FailFast,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkippedTarget {
    pub timestamp: DateTime<Utc>,
    pub path: PathBuf,
    pub kind: SkipKind,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchTotals {
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub with_findings: usize,
    pub clean: usize,
    pub unanalyzed: usize,
    pub vulnerabilities: usize,
}

#[derive(Debug, Clone)]
pub struct BatchReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub format: OutputFormat,
    pub results: Vec<ScanResult>,
    pub skipped: Vec<SkippedTarget>,
    pub issues: Vec<IssueRecord>,
}

/// On-disk shape of the JSON summary.
#[derive(Serialize)]
struct SummaryDocument<'a> {
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    format: OutputFormat,
    totals: BatchTotals,
    severity_totals: BTreeMap<Severity, usize>,
    errors_by_reason: BTreeMap<String, Vec<PathBuf>>,
    skips_by_reason: BTreeMap<String, usize>,
    warnings_by_reason: BTreeMap<String, usize>,
    results: &'a [ScanResult],
    skipped: &'a [SkippedTarget],
    issues: &'a [IssueRecord],
}

// ============================================================================
// CSV Rows
// ============================================================================

#[derive(Serialize)]
struct SkippedRow<'a> {
    timestamp: DateTime<Utc>,
    target: &'a Path,
    kind: SkipKind,
    reason: &'a str,
}

#[derive(Serialize)]
struct SuccessRow<'a> {
    timestamp: DateTime<Utc>,
    target: &'a Path,
    output_file: Option<&'a Path>,
    archive_format: Option<&'a str>,
    classification: Classification,
    vulnerabilities_found: usize,
    critical: usize,
    high: usize,
    medium: usize,
    low: usize,
    unknown: usize,
    warnings: usize,
    duration_ms: u64,
}

#[derive(Serialize)]
struct ErrorRow<'a> {
    timestamp: DateTime<Utc>,
    target: &'a Path,
    state: ArtifactState,
    reason: &'a str,
}

impl BatchReport {
    pub fn new(format: OutputFormat) -> Self {
        Self {
            started_at: Utc::now(),
            finished_at: None,
            format,
            results: Vec::new(),
            skipped: Vec::new(),
            issues: Vec::new(),
        }
    }

    /// Adds one artifact result and its issue records.
    pub fn record(&mut self, result: ScanResult) {
        for warning in &result.warnings {
            self.issue(&result.target_path, IssueKind::Warning, warning.clone());
        }
        match (&result.error, result.success) {
            (Some(error), _) => self.issue(&result.target_path, IssueKind::Error, error.clone()),
            (None, false) => self.issue(&result.target_path, IssueKind::Error, "failed"),
            (None, true) => {
                let message = match result.classification {
                    Classification::Unanalyzed => "scanned (not analyzed)".to_string(),
                    _ => format!("scanned: {} vulnerabilities", result.total_vulnerabilities),
                };
                self.issue(&result.target_path, IssueKind::Success, message);
            }
        }
        self.results.push(result);
    }

    pub fn record_skip(&mut self, path: PathBuf, kind: SkipKind, reason: impl Into<String>) {
        let reason = reason.into();
        self.issue(&path, IssueKind::Skipped, reason.clone());
        self.skipped.push(SkippedTarget {
            timestamp: Utc::now(),
            path,
            kind,
            reason,
        });
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    /// Stamp of this batch's report files, taken from its start time.
    pub fn stamp(&self) -> String {
        run_stamp(self.started_at)
    }

    fn issue(&mut self, target: &Path, kind: IssueKind, message: impl Into<String>) {
        self.issues.push(IssueRecord {
            timestamp: Utc::now(),
            target: target.to_path_buf(),
            kind,
            message: message.into(),
        });
    }

    pub fn totals(&self) -> BatchTotals {
        let mut totals = BatchTotals {
            processed: self.results.len(),
            skipped: self.skipped.len(),
            ..BatchTotals::default()
        };
        for result in &self.results {
            if !result.success {
                totals.failed += 1;
                continue;
            }
            totals.succeeded += 1;
            totals.vulnerabilities += result.total_vulnerabilities;
            match result.classification {
                Classification::Findings => totals.with_findings += 1,
                Classification::Clean => totals.clean += 1,
                Classification::Unanalyzed => totals.unanalyzed += 1,
            }
        }
        totals
    }

    pub fn severity_totals(&self) -> SeverityBreakdown {
        let mut totals = SeverityBreakdown::default();
        for result in &self.results {
            totals.merge(&result.severity_breakdown);
        }
        totals
    }

    /// Failed artifacts grouped by their error message.
    pub fn errors_by_reason(&self) -> BTreeMap<String, Vec<PathBuf>> {
        let mut grouped: BTreeMap<String, Vec<PathBuf>> = BTreeMap::new();
        for result in self.results.iter().filter(|r| !r.success) {
            let reason = result.error.clone().unwrap_or_else(|| "unknown error".to_string());
            grouped.entry(reason).or_default().push(result.target_path.clone());
        }
        grouped
    }

    pub fn skips_by_reason(&self) -> BTreeMap<String, usize> {
        count_by(self.skipped.iter().map(|s| s.reason.as_str()))
    }

    pub fn warnings_by_reason(&self) -> BTreeMap<String, usize> {
        count_by(
            self.results
                .iter()
                .flat_map(|r| r.warnings.iter().map(String::as_str)),
        )
    }

    /// Process exit code for this batch.
    ///
    /// A single target fails the process when it fails. Several targets fail
    /// it only under `fail_fast`. Checksums and earlier reports skipped up
    /// front are not targets.
    pub fn exit_code(&self, fail_fast: bool) -> i32 {
        let failed = self.results.iter().any(|r| !r.success);
        let targets = self.results.len()
            + self
                .skipped
                .iter()
                .filter(|s| s.kind == SkipKind::FailFast)
                .count();
        if failed && (targets <= 1 || fail_fast) {
            1
        } else {
            0
        }
    }

    /// Writes `scan_issues_report_<stamp>.json` into `output_dir` and returns
    /// its path.
    pub fn write_json(&self, output_dir: &Path) -> Result<PathBuf, ReportError> {
        let path = output_dir.join(format!("scan_issues_report_{}.json", self.stamp()));
        let document = SummaryDocument {
            started_at: self.started_at,
            finished_at: self.finished_at,
            format: self.format,
            totals: self.totals(),
            severity_totals: self.severity_totals().iter_all().collect(),
            errors_by_reason: self.errors_by_reason(),
            skips_by_reason: self.skips_by_reason(),
            warnings_by_reason: self.warnings_by_reason(),
            results: &self.results,
            skipped: &self.skipped,
            issues: &self.issues,
        };
        let body = serde_json::to_vec_pretty(&document)?;

        let io_err = |source| ReportError::Io {
            path: path.clone(),
            source,
        };
        std::fs::create_dir_all(output_dir).map_err(io_err)?;
        std::fs::write(&path, body).map_err(io_err)?;
        Ok(path)
    }

    /// Writes the skipped, successful and error CSV exports.
    ///
    /// A file is only written when it would have at least one row. Returns
    /// the paths written.
    pub fn write_csv(&self, output_dir: &Path) -> Result<Vec<PathBuf>, ReportError> {
        std::fs::create_dir_all(output_dir).map_err(|source| ReportError::Io {
            path: output_dir.to_path_buf(),
            source,
        })?;
        let stamp = self.stamp();
        let mut written = Vec::new();

        let skipped = self.skipped.iter().map(|s| SkippedRow {
            timestamp: s.timestamp,
            target: &s.path,
            kind: s.kind,
            reason: &s.reason,
        });
        let path = output_dir.join(format!("skipped_files_report_{stamp}.csv"));
        if write_rows(&path, skipped)? {
            written.push(path);
        }

        let successes = self.results.iter().filter(|r| r.success).map(|r| {
            let s = &r.severity_breakdown;
            SuccessRow {
                timestamp: r.finished_at,
                target: &r.target_path,
                output_file: r.output_file.as_deref(),
                archive_format: r.archive_format.as_deref(),
                classification: r.classification,
                vulnerabilities_found: r.total_vulnerabilities,
                critical: s.get(Severity::Critical),
                high: s.get(Severity::High),
                medium: s.get(Severity::Medium),
                low: s.get(Severity::Low),
                unknown: s.get(Severity::Unknown),
                warnings: r.warnings.len(),
                duration_ms: r.duration_ms,
            }
        });
        let path = output_dir.join(format!("successful_scans_report_{stamp}.csv"));
        if write_rows(&path, successes)? {
            written.push(path);
        }

        let errors = self.results.iter().filter(|r| !r.success).map(|r| ErrorRow {
            timestamp: r.finished_at,
            target: &r.target_path,
            state: r.state,
            reason: r.error.as_deref().unwrap_or("unknown error"),
        });
        let path = output_dir.join(format!("error_scans_report_{stamp}.csv"));
        if write_rows(&path, errors)? {
            written.push(path);
        }

        Ok(written)
    }

    pub fn log_summary(&self) {
        let totals = self.totals();
        let elapsed_ms = self
            .finished_at
            .map(|end| (end - self.started_at).num_milliseconds())
            .unwrap_or_default();

        info!(
            processed = totals.processed,
            succeeded = totals.succeeded,
            failed = totals.failed,
            skipped = totals.skipped,
            elapsed_ms,
            "Batch finished"
        );
        info!(
            with_findings = totals.with_findings,
            clean = totals.clean,
            unanalyzed = totals.unanalyzed,
            vulnerabilities = totals.vulnerabilities,
            severities = %self.severity_totals().summary_line(),
            "Vulnerability summary"
        );
        for (reason, targets) in self.errors_by_reason() {
            warn!(count = targets.len(), reason = %reason, "Failed artifacts");
        }
        for (reason, count) in self.skips_by_reason() {
            info!(count, reason = %reason, "Skipped targets");
        }
        for (reason, count) in self.warnings_by_reason() {
            warn!(count, reason = %reason, "Warnings");
        }
    }
}

fn count_by<'a>(reasons: impl Iterator<Item = &'a str>) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for reason in reasons {
        *counts.entry(reason.to_string()).or_insert(0) += 1;
    }
    counts
}

/// Writes `rows` with a header line. Nothing is created for zero rows.
fn write_rows<T: Serialize>(
    path: &Path,
    rows: impl Iterator<Item = T>,
) -> Result<bool, ReportError> {
    let mut rows = rows.peekable();
    if rows.peek().is_none() {
        return Ok(false);
    }
    let mut writer = csv::Writer::from_path(path)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush().map_err(|source| ReportError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    debug!(path = %path.display(), "CSV export written");
    Ok(true)
}
