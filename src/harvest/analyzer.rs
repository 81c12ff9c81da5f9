//! Scan report aggregation.
//!
//! Reads Trivy's JSON report, counts vulnerabilities per severity and
//! classifies the artifact for report routing.

use serde::Deserialize;
use std::path::Path;
use tracing::debug;

use crate::harvest::traits::AnalysisError;
use crate::model::{Classification, Finding, Severity, SeverityBreakdown};

// Trivy JSON report structures. Only the fields used here are modelled;
// every level tolerates missing or null values.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TrivyReport {
    #[serde(default)]
    results: Option<Vec<TrivyResult>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TrivyResult {
    #[serde(default)]
    target: Option<String>,
    #[serde(default)]
    vulnerabilities: Option<Vec<TrivyVulnerability>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TrivyVulnerability {
    #[serde(default, rename = "VulnerabilityID")]
    vulnerability_id: Option<String>,
    #[serde(default)]
    pkg_name: Option<String>,
    #[serde(default)]
    installed_version: Option<String>,
    #[serde(default)]
    fixed_version: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    severity: Option<String>,
}

/// Aggregated view of one scan report.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Analysis {
    pub total_vulnerabilities: usize,
    pub severity_breakdown: SeverityBreakdown,
    pub findings: Vec<Finding>,
}

impl Analysis {
    pub fn classification(&self) -> Classification {
        if self.total_vulnerabilities > 0 {
            Classification::Findings
        } else {
            Classification::Clean
        }
    }
}

/// Reads and aggregates the JSON report at `path`.
///
/// # Errors
///
/// Returns [`AnalysisError::Io`] when the file is missing or unreadable and
/// [`AnalysisError::JsonParsing`] when it is not a scanner report.
pub fn analyze(path: &Path) -> Result<Analysis, AnalysisError> {
    let raw = std::fs::read(path).map_err(|e| AnalysisError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    let report: TrivyReport =
        serde_json::from_slice(&raw).map_err(|e| AnalysisError::JsonParsing {
            path: path.to_path_buf(),
            source: e,
        })?;

    let analysis = aggregate(report);
    debug!(
        report = %path.display(),
        total = analysis.total_vulnerabilities,
        breakdown = %analysis.severity_breakdown.summary_line(),
        "Analyzed scan report"
    );
    Ok(analysis)
}

fn aggregate(report: TrivyReport) -> Analysis {
    let mut analysis = Analysis::default();

    for result in report.results.unwrap_or_default() {
        let target = result.target.unwrap_or_default();
        for vuln in result.vulnerabilities.unwrap_or_default() {
            let severity = vuln
                .severity
                .as_deref()
                .map(Severity::from_label)
                .unwrap_or(Severity::Unknown);
            analysis.severity_breakdown.record(severity);
            analysis.findings.push(Finding {
                target: target.clone(),
                vulnerability_id: vuln.vulnerability_id.unwrap_or_default(),
                pkg_name: vuln.pkg_name.unwrap_or_default(),
                installed_version: vuln.installed_version.unwrap_or_default(),
                fixed_version: vuln.fixed_version.filter(|v| !v.is_empty()),
                title: vuln.title,
                severity,
            });
        }
    }

    analysis.total_vulnerabilities = analysis.findings.len();
    analysis
}
