use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Fallback used when a declared range strips down to nothing.
pub const FALLBACK_VERSION: &str = "0.0.0";

/// Placeholder integrity value; never verified by the scanner.
pub const PLACEHOLDER_INTEGRITY: &str =
    "sha512-0000000000000000000000000000000000000000000000000000000000000000";

const NPM_REGISTRY: &str = "https://registry.npmjs.org";

/// The fields of a `package.json` the synthesizer cares about.
///
/// Defaults are applied here, once, so downstream code never sees a missing
/// name, version or dependency map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageDescriptor {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default, deserialize_with = "nullable_map")]
    pub dependencies: BTreeMap<String, String>,
}

fn default_name() -> String {
    "unknown".to_string()
}

fn default_version() -> String {
    FALLBACK_VERSION.to_string()
}

fn nullable_map<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let map = Option::<BTreeMap<String, String>>::deserialize(deserializer)?;
    Ok(map.unwrap_or_default())
}

impl PackageDescriptor {
    /// Resolves every declared dependency, in name order.
    pub fn resolved_dependencies(&self) -> Vec<ResolvedDependency> {
        self.dependencies
            .iter()
            .map(|(name, range)| ResolvedDependency::new(name, range))
            .collect()
    }
}

/// One declared dependency with its best-effort pinned version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedDependency {
    pub name: String,
    pub declared_range: String,
    pub clean_version: String,
}

impl ResolvedDependency {
    pub fn new(name: &str, declared_range: &str) -> Self {
        Self {
            name: name.to_string(),
            declared_range: declared_range.to_string(),
            clean_version: clean_version(declared_range),
        }
    }

    /// Registry tarball URL, e.g. `https://registry.npmjs.org/@scope/pkg/-/pkg-1.0.0.tgz`.
    pub fn resolved_url(&self) -> String {
        let basename = self.name.rsplit('/').next().unwrap_or(&self.name);
        format!(
            "{}/{}/-/{}-{}.tgz",
            NPM_REGISTRY, self.name, basename, self.clean_version
        )
    }
}

/// Pins a semver range to a single version by keeping the first constraint
/// and dropping its leading operators. This is not semver resolution.
pub fn clean_version(declared_range: &str) -> String {
    let first = declared_range.split_whitespace().next().unwrap_or("");
    let stripped = first.trim_start_matches(['^', '~', '>', '=', '<']);
    if stripped.is_empty() {
        FALLBACK_VERSION.to_string()
    } else {
        stripped.to_string()
    }
}

/// The `package-lock.json` written next to an unlocked `package.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SynthesizedLockfile {
    pub name: String,
    pub version: String,
    pub lockfile_version: u32,
    pub requires: bool,
    pub packages: BTreeMap<String, PackageEntry>,
    pub dependencies: BTreeMap<String, DependencyEntry>,
}

/// An entry of the lockfile `packages` map. The root entry carries `name`
/// and `dependencies`; `node_modules/*` entries carry `resolved` and
/// `integrity`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PackageEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integrity: Option<String>,
    pub license: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dependencies: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyEntry {
    pub version: String,
    pub resolved: String,
    pub integrity: String,
}

// ============================================================================
// Scan model
// ============================================================================

/// How a target reaches the scanner: unpacked first, walked in place, or
/// handed over as a single file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    Archive,
    Directory,
    File,
}

/// A unit of work for the scan pipeline.
#[derive(Debug, Clone)]
pub struct ScanTarget {
    pub source_path: PathBuf,
    pub kind: TargetKind,
}

impl ScanTarget {
    pub fn archive(path: impl Into<PathBuf>) -> Self {
        Self {
            source_path: path.into(),
            kind: TargetKind::Archive,
        }
    }

    pub fn directory(path: impl Into<PathBuf>) -> Self {
        Self {
            source_path: path.into(),
            kind: TargetKind::Directory,
        }
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            source_path: path.into(),
            kind: TargetKind::File,
        }
    }

    /// Classifies a path: directories, supported archives, and any other
    /// file (`.jar`, `.whl`, ...), which is scanned as-is.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        if path.is_dir() {
            Self::directory(path)
        } else if crate::harvest::formats::is_supported_archive(&path) {
            Self::archive(path)
        } else {
            Self::file(path)
        }
    }

    /// Short name used for output files and scratch directories.
    pub fn stem(&self) -> String {
        let file_name = self
            .source_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "target".to_string());
        let lower = file_name.to_ascii_lowercase();
        for suffix in [".tar.gz", ".tgz", ".tar", ".zip"] {
            if lower.ends_with(suffix) && file_name.len() > suffix.len() {
                return file_name[..file_name.len() - suffix.len()].to_string();
            }
        }
        file_name
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Json,
    Table,
    Sarif,
    Html,
}

impl OutputFormat {
    pub const ALL: [OutputFormat; 4] = [Self::Json, Self::Table, Self::Sarif, Self::Html];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Table => "table",
            Self::Sarif => "sarif",
            Self::Html => "html",
        }
    }

    /// Value passed to the scanner's `--format` flag.
    pub fn scanner_format(&self) -> &'static str {
        match self {
            Self::Html => "template",
            other => other.as_str(),
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Table => "txt",
            Self::Sarif => "sarif",
            Self::Html => "html",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "table" => Ok(Self::Table),
            "sarif" => Ok(Self::Sarif),
            "html" => Ok(Self::Html),
            other => Err(format!("unsupported output format: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanType {
    Fs,
    Image,
}

impl ScanType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fs => "fs",
            Self::Image => "image",
        }
    }
}

impl fmt::Display for ScanType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScanType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fs" => Ok(Self::Fs),
            "image" => Ok(Self::Image),
            other => Err(format!("unsupported scan type: {other}")),
        }
    }
}

/// Vulnerability severity, declared in reporting priority order so that
/// ordered maps list critical findings first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
    Unknown,
}

impl Severity {
    pub const ALL: [Severity; 5] = [
        Self::Critical,
        Self::High,
        Self::Medium,
        Self::Low,
        Self::Unknown,
    ];

    /// Maps a scanner label onto a bucket; unrecognized labels are `Unknown`.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_uppercase().as_str() {
            "CRITICAL" => Self::Critical,
            "HIGH" => Self::High,
            "MEDIUM" => Self::Medium,
            "LOW" => Self::Low,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "CRITICAL",
            Self::High => "HIGH",
            Self::Medium => "MEDIUM",
            Self::Low => "LOW",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Finding counts per severity, iterated most critical first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SeverityBreakdown(BTreeMap<Severity, usize>);

impl SeverityBreakdown {
    pub fn record(&mut self, severity: Severity) {
        *self.0.entry(severity).or_insert(0) += 1;
    }

    pub fn get(&self, severity: Severity) -> usize {
        self.0.get(&severity).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.0.values().sum()
    }

    /// Buckets that have at least one finding, in priority order.
    pub fn iter(&self) -> impl Iterator<Item = (Severity, usize)> + '_ {
        self.0.iter().map(|(s, c)| (*s, *c))
    }

    /// Every bucket in priority order, including empty ones.
    pub fn iter_all(&self) -> impl Iterator<Item = (Severity, usize)> + '_ {
        Severity::ALL.iter().map(move |s| (*s, self.get(*s)))
    }

    pub fn merge(&mut self, other: &SeverityBreakdown) {
        for (severity, count) in other.iter() {
            *self.0.entry(severity).or_insert(0) += count;
        }
    }

    /// Renders `CRITICAL=1 HIGH=0 ...` for log lines.
    pub fn summary_line(&self) -> String {
        self.iter_all()
            .map(|(s, c)| format!("{s}={c}"))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Report-routing classification of one scanned artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Findings,
    Clean,
    Unanalyzed,
}

/// Pipeline state of one artifact. The last two variants are terminal
/// failures; every other path ends in `Cleaned`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactState {
    Discovered,
    Extracted,
    Enhanced,
    Scanned,
    Analyzed,
    Cleaned,
    ExtractionFailed,
    ScanFailed,
}

/// What the enhancement step did for one artifact.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnhancementSummary {
    pub discovered: usize,
    pub enhanced: usize,
    pub already_locked: usize,
    pub failed: usize,
    pub skipped_over_limit: usize,
}

/// One vulnerability as carried into the batch report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub target: String,
    pub vulnerability_id: String,
    pub pkg_name: String,
    pub installed_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixed_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub severity: Severity,
}

/// Outcome of one artifact's trip through the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanResult {
    pub target_path: PathBuf,
    pub output_file: Option<PathBuf>,
    pub format: OutputFormat,
    pub total_vulnerabilities: usize,
    pub severity_breakdown: SeverityBreakdown,
    pub classification: Classification,
    pub state: ArtifactState,
    pub success: bool,
    /// Archive format detected at extraction
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive_format: Option<String>,
    /// Scratch directory the archive was unpacked into; gone after cleanup
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scratch_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Non-fatal problems (enhancement or analysis) met along the way
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub enhancement: EnhancementSummary,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub findings: Vec<Finding>,
    pub duration_ms: u64,
    pub finished_at: DateTime<Utc>,
}

impl ScanResult {
    pub fn failed(
        target_path: PathBuf,
        format: OutputFormat,
        state: ArtifactState,
        error: impl Into<String>,
    ) -> Self {
        Self {
            target_path,
            output_file: None,
            format,
            total_vulnerabilities: 0,
            severity_breakdown: SeverityBreakdown::default(),
            classification: Classification::Unanalyzed,
            state,
            success: false,
            archive_format: None,
            scratch_dir: None,
            error: Some(error.into()),
            warnings: Vec::new(),
            enhancement: EnhancementSummary::default(),
            findings: Vec::new(),
            duration_ms: 0,
            finished_at: Utc::now(),
        }
    }
}
