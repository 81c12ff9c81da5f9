//! Scan orchestration.
//!
//! This module provides the [`ScanPipeline`] coordinator that walks each
//! artifact through the stages (Extract → Enhance → Scan → Analyze → Clean):
//! - Async execution via `tokio`, blocking filesystem work on the blocking pool
//! - Structured logging via `tracing`
//! - Automatic cleanup of scratch directories via RAII (`Drop` on `TempExtraction`)
//!
//! Artifacts are processed strictly one after another. A failure is recorded
//! on the artifact's [`ScanResult`] and never aborts the batch unless
//! `fail_fast` is configured.

use chrono::Utc;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::config::HarvesterConfig;
use crate::executor::ScanRequest;
use crate::harvest::analyzer::{self, Analysis};
use crate::harvest::discovery::{skip_reason, PackageDiscovery};
use crate::harvest::enhance::Enhancer;
use crate::harvest::formats;
use crate::harvest::lockfile::LockfileSynthesizer;
use crate::harvest::traits::ExtractionError;
use crate::model::{
    ArtifactState, Classification, EnhancementSummary, OutputFormat, ScanResult, ScanTarget,
    ScanType, SeverityBreakdown, TargetKind,
};
use crate::report::{BatchReport, SkipKind};
use crate::traits::{ScanBackend, ScanError};

static SCRATCH_COUNTER: AtomicUsize = AtomicUsize::new(0);

// ============================================================================
// Pipeline Types
// ============================================================================

/// Scratch directory holding one extracted archive.
///
/// # RAII Cleanup
///
/// `TempExtraction` implements [`Drop`] so the directory is removed on every
/// exit path, including early returns and panics. It does **not** implement
/// `Clone`; clone `path` if the location is needed elsewhere.
#[derive(Debug)]
pub struct TempExtraction {
    /// Directory containing extracted files
    pub path: PathBuf,

    /// Metadata about the source archive
    pub source_info: SourceInfo,

    /// Whether to delete the directory on drop (mirrors `HarvesterConfig::cleanup`).
    pub(crate) cleanup_on_drop: bool,
}

impl TempExtraction {
    /// Creates a fresh, uniquely named directory under `work_dir`.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractionError::DirectoryCreation`] if the directory cannot
    /// be created.
    pub fn create(
        work_dir: &Path,
        stem: &str,
        source_info: SourceInfo,
        cleanup_on_drop: bool,
    ) -> Result<Self, ExtractionError> {
        let unique = format!(
            "{}-{}-{}",
            stem,
            std::process::id(),
            SCRATCH_COUNTER.fetch_add(1, Ordering::Relaxed)
        );
        let path = work_dir.join(unique);
        if path.exists() {
            std::fs::remove_dir_all(&path)?;
        }
        std::fs::create_dir_all(&path)?;

        Ok(Self {
            path,
            source_info,
            cleanup_on_drop,
        })
    }
}

impl Drop for TempExtraction {
    fn drop(&mut self) {
        if !self.cleanup_on_drop || !self.path.exists() {
            return;
        }
        match std::fs::remove_dir_all(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Removed scratch directory"),
            Err(e) => warn!(
                path = %self.path.display(),
                error = %e,
                "Failed to remove scratch directory"
            ),
        }
    }
}

/// Source archive information.
#[derive(Debug, Clone)]
pub struct SourceInfo {
    /// Archive size in bytes
    pub size_bytes: u64,

    /// Detected format identifier (e.g., "tar.gz", "zip")
    pub detected_format: String,
}

// ============================================================================
// Pipeline Errors
// ============================================================================

/// Errors that end one artifact's processing.
#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    /// The target path vanished before processing started
    #[error("Target not found: {0}")]
    TargetMissing(PathBuf),

    /// Image scans read an exported tarball, never a directory
    #[error("Image scan needs an image tarball, got directory {0}")]
    ImageNeedsTarball(PathBuf),

    /// Extraction stage failed
    #[error("Extraction failed: {0}")]
    Extraction(#[from] ExtractionError),

    /// Primary scan failed
    #[error("Scan failed: {0}")]
    Scan(#[from] ScanError),

    /// A blocking task panicked or was cancelled
    #[error("Task join error in {stage}: {reason}")]
    TaskJoin { stage: &'static str, reason: String },
}

impl PipelineError {
    /// The terminal state an artifact ends in for this error.
    pub fn failure_state(&self) -> ArtifactState {
        match self {
            Self::Scan(_) | Self::ImageNeedsTarball(_) => ArtifactState::ScanFailed,
            Self::TargetMissing(_) | Self::Extraction(_) | Self::TaskJoin { .. } => {
                ArtifactState::ExtractionFailed
            }
        }
    }
}

// ============================================================================
// Pipeline Executor
// ============================================================================

/// Sequential scan pipeline over a [`ScanBackend`].
///
/// # Example
///
/// ```no_run
/// use trivy_harvester::config::HarvesterConfig;
/// use trivy_harvester::executor::TrivyExecutor;
/// use trivy_harvester::harvest::pipeline::ScanPipeline;
/// use trivy_harvester::model::ScanTarget;
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = TrivyExecutor::from_install_dir("./trivy".as_ref())?;
/// let pipeline = ScanPipeline::new(backend, HarvesterConfig::default());
///
/// let report = pipeline
///     .run_batch(&[ScanTarget::archive("app-1.0.0.tgz")])
///     .await;
/// report.log_summary();
/// # Ok(())
/// # }
/// ```
pub struct ScanPipeline<B: ScanBackend> {
    backend: B,
    config: HarvesterConfig,
}

/// Outcome of the scan stage: the report to analyze, if any.
struct ScanStage {
    output_file: PathBuf,
    analysis_report: Option<PathBuf>,
}

/// Report names handed out in one batch.
///
/// Artifacts from different folders may share a stem (`repo1/app.tgz`,
/// `repo2/app.tgz`); later ones get `-2`, `-3`, ... appended.
#[derive(Debug, Default)]
struct ReportNames {
    taken: HashSet<String>,
}

impl ReportNames {
    fn claim(&mut self, stem: &str) -> String {
        let mut name = stem.to_string();
        let mut n = 1;
        while !self.taken.insert(name.clone()) {
            n += 1;
            name = format!("{stem}-{n}");
        }
        name
    }
}

impl<B: ScanBackend> ScanPipeline<B> {
    pub fn new(backend: B, config: HarvesterConfig) -> Self {
        Self { backend, config }
    }

    pub fn config(&self) -> &HarvesterConfig {
        &self.config
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Runs every target in order and collects the results.
    ///
    /// Checksum sidecars and existing security reports are recorded as
    /// skipped. With `fail_fast`, the targets after the first failure are
    /// recorded as skipped too. Every processed artifact gets its own report
    /// name.
    #[instrument(skip(self, targets), fields(backend = self.backend.backend_id(), count = targets.len()))]
    pub async fn run_batch(&self, targets: &[ScanTarget]) -> BatchReport {
        let mut report = BatchReport::new(self.config.format);
        let mut names = ReportNames::default();
        info!(targets = targets.len(), "Starting scan batch");

        for (index, target) in targets.iter().enumerate() {
            if let Some(reason) = skip_reason(&target.source_path) {
                info!(target = %target.source_path.display(), reason, "Skipping target");
                report.record_skip(target.source_path.clone(), SkipKind::NotScannable, reason);
                continue;
            }

            let name = names.claim(&target.stem());
            let result = self.process_named(target, &name).await;
            let failed = !result.success;
            report.record(result);

            if failed && self.config.fail_fast {
                warn!(
                    target = %target.source_path.display(),
                    remaining = targets.len() - index - 1,
                    "Stopping batch after failure (fail-fast)"
                );
                for rest in &targets[index + 1..] {
                    report.record_skip(
                        rest.source_path.clone(),
                        SkipKind::FailFast,
                        "fail-fast after earlier failure",
                    );
                }
                break;
            }
        }

        report.finish();
        report
    }

    /// Processes one artifact. Never fails: errors end up on the result.
    ///
    /// Reports are named after the target's stem.
    pub async fn process(&self, target: &ScanTarget) -> ScanResult {
        self.process_named(target, &target.stem()).await
    }

    #[instrument(skip(self, target), fields(target = %target.source_path.display(), kind = ?target.kind))]
    async fn process_named(&self, target: &ScanTarget, name: &str) -> ScanResult {
        let start = Instant::now();

        let mut result = match self.try_process(target, name).await {
            Ok(result) => result,
            Err(e) => {
                let state = e.failure_state();
                warn!(error = %e, state = ?state, "Artifact failed");
                ScanResult::failed(
                    target.source_path.clone(),
                    self.config.format,
                    state,
                    e.to_string(),
                )
            }
        };

        result.duration_ms = start.elapsed().as_millis() as u64;
        result.finished_at = Utc::now();
        if result.success {
            info!(
                duration_ms = result.duration_ms,
                total = result.total_vulnerabilities,
                classification = ?result.classification,
                "Artifact processed"
            );
        }
        result
    }

    async fn try_process(&self, target: &ScanTarget, name: &str) -> Result<ScanResult, PipelineError> {
        if !target.source_path.exists() {
            return Err(PipelineError::TargetMissing(target.source_path.clone()));
        }

        let mut state = ArtifactState::Discovered;
        let mut warnings = Vec::new();

        // ====================================================================
        // Stage 1: Extraction
        // ====================================================================
        //
        // `scratch` lives until the end of this function. Every `?` below
        // drops it, which removes the directory when cleanup is enabled.
        // Plain files and image tarballs go to the scanner untouched.

        let image = self.config.scan_type == ScanType::Image;
        let (scratch, scan_root, discovery) = match target.kind {
            TargetKind::Directory if image => {
                return Err(PipelineError::ImageNeedsTarball(target.source_path.clone()));
            }
            TargetKind::Archive if !image => {
                let temp = self.extract(target, name).await?;
                advance(&mut state, ArtifactState::Extracted);
                let root = temp.path.clone();
                (Some(temp), root, Some(PackageDiscovery::archive()))
            }
            TargetKind::Directory => (
                None,
                target.source_path.clone(),
                Some(PackageDiscovery::workspace(self.config.max_packages)),
            ),
            TargetKind::Archive | TargetKind::File => {
                debug!("Scanning target as-is");
                (None, target.source_path.clone(), None)
            }
        };
        let archive_format = scratch.as_ref().map(|t| t.source_info.detected_format.clone());
        let scratch_dir = scratch.as_ref().map(|t| t.path.clone());

        // ====================================================================
        // Stage 2: Enhancement
        // ====================================================================

        let enhancement = if let Some(discovery) = discovery.filter(|_| self.config.enhance) {
            let summary = self.enhance(&scan_root, discovery).await;
            match &summary {
                Some(s) => {
                    if s.enhanced > 0 {
                        advance(&mut state, ArtifactState::Enhanced);
                    }
                    if s.failed > 0 {
                        warnings.push(format!("{} package(s) could not be enhanced", s.failed));
                    }
                }
                None => warnings.push("enhancement task failed".to_string()),
            }
            summary.unwrap_or_default()
        } else {
            debug!("Enhancement skipped");
            EnhancementSummary::default()
        };

        // ====================================================================
        // Stage 3: Scan
        // ====================================================================

        let scanned = self.scan(&scan_root, name, &mut warnings).await?;
        advance(&mut state, ArtifactState::Scanned);

        // ====================================================================
        // Stage 4: Analysis
        // ====================================================================

        let analysis = match &scanned.analysis_report {
            Some(report) => match analyzer::analyze(report) {
                Ok(analysis) => {
                    advance(&mut state, ArtifactState::Analyzed);
                    Some(analysis)
                }
                Err(e) => {
                    warn!(error = %e, "Could not analyze scan report");
                    warnings.push(format!("analysis failed: {e}"));
                    None
                }
            },
            None => None,
        };

        let (total, breakdown, classification, findings) = match analysis {
            Some(analysis) => {
                let classification = analysis.classification();
                let Analysis {
                    total_vulnerabilities,
                    severity_breakdown,
                    findings,
                } = analysis;
                (total_vulnerabilities, severity_breakdown, classification, findings)
            }
            None => (
                0,
                SeverityBreakdown::default(),
                Classification::Unanalyzed,
                Vec::new(),
            ),
        };

        // ====================================================================
        // Stage 5: Cleanup
        // ====================================================================

        if let Some(temp) = scratch {
            let cleaned = temp.cleanup_on_drop;
            debug!(
                format = %temp.source_info.detected_format,
                size_bytes = temp.source_info.size_bytes,
                "Releasing scratch directory"
            );
            drop(temp);
            if cleaned {
                advance(&mut state, ArtifactState::Cleaned);
            } else {
                debug!(path = %scan_root.display(), "Cleanup disabled, keeping extracted files");
            }
        } else {
            advance(&mut state, ArtifactState::Cleaned);
        }

        Ok(ScanResult {
            target_path: target.source_path.clone(),
            output_file: Some(scanned.output_file),
            format: self.config.format,
            total_vulnerabilities: total,
            severity_breakdown: breakdown,
            classification,
            state,
            success: true,
            archive_format,
            scratch_dir,
            error: None,
            warnings,
            enhancement,
            findings,
            duration_ms: 0,
            finished_at: Utc::now(),
        })
    }

    async fn extract(&self, target: &ScanTarget, stem: &str) -> Result<TempExtraction, PipelineError> {
        let source = target.source_path.clone();
        let format = formats::detect(&source)
            .ok_or_else(|| ExtractionError::UnsupportedFormat(source.clone()))?;
        let size_bytes = std::fs::metadata(&source).map(|m| m.len()).unwrap_or(0);

        let temp = TempExtraction::create(
            &self.config.work_dir,
            stem,
            SourceInfo {
                size_bytes,
                detected_format: format.name().to_string(),
            },
            self.config.cleanup,
        )?;

        info!(format = format.name(), size_bytes, "Starting extraction stage");
        let start = Instant::now();
        let dest = temp.path.clone();

        // On error `temp` is dropped here, taking the partial extraction with it.
        tokio::task::spawn_blocking(move || formats::extract(&source, &dest))
            .await
            .map_err(|e| PipelineError::TaskJoin {
                stage: "extraction",
                reason: e.to_string(),
            })??;

        info!(
            duration_ms = start.elapsed().as_millis() as u64,
            path = %temp.path.display(),
            "Extraction completed"
        );
        Ok(temp)
    }

    async fn enhance(&self, root: &Path, discovery: PackageDiscovery) -> Option<EnhancementSummary> {
        let enhancer = Enhancer::new(
            discovery,
            LockfileSynthesizer::new(self.config.max_dependencies),
        );
        let root = root.to_path_buf();

        match tokio::task::spawn_blocking(move || enhancer.enhance(&root)).await {
            Ok(summary) => Some(summary),
            Err(e) => {
                warn!(error = %e, "Enhancement task failed, scanning without lockfiles");
                None
            }
        }
    }

    /// Runs the companion JSON scan (when needed) and then the primary scan.
    async fn scan(
        &self,
        root: &Path,
        stem: &str,
        warnings: &mut Vec<String>,
    ) -> Result<ScanStage, PipelineError> {
        let format = self.config.format;

        let companion = if format != OutputFormat::Json && self.config.companion_json {
            let request = self.request(root, stem, OutputFormat::Json);
            match self.backend.scan(&request).await {
                Ok(outcome) => Some(outcome.output_file),
                Err(e) => {
                    warn!(error = %e, "Companion JSON scan failed, result will be unanalyzed");
                    warnings.push(format!("companion JSON scan failed: {e}"));
                    None
                }
            }
        } else {
            None
        };

        let request = self.request(root, stem, format);
        let outcome = self.backend.scan(&request).await?;

        let analysis_report = if format == OutputFormat::Json {
            Some(outcome.output_file.clone())
        } else {
            companion
        };

        Ok(ScanStage {
            output_file: outcome.output_file,
            analysis_report,
        })
    }

    fn request(&self, root: &Path, stem: &str, format: OutputFormat) -> ScanRequest {
        ScanRequest {
            target: root.to_path_buf(),
            output_file: self.config.output_path(format, stem),
            format,
            scan_type: self.config.scan_type,
            template: match format {
                OutputFormat::Html => self.config.template.clone(),
                _ => None,
            },
        }
    }
}

fn advance(state: &mut ArtifactState, next: ArtifactState) {
    debug!(from = ?*state, to = ?next, "Artifact state");
    *state = next;
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ScanOutcome;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tempfile::TempDir;

    const REPORT: &str = r#"{"Results":[{"Target":"package-lock.json","Vulnerabilities":[
        {"VulnerabilityID":"CVE-2021-23337","PkgName":"lodash","InstalledVersion":"4.17.19","Severity":"HIGH"}
    ]}]}"#;

    /// Writes a canned report and remembers what it was asked to scan.
    #[derive(Default)]
    struct MockBackend {
        fail: bool,
        seen: Mutex<Vec<(PathBuf, OutputFormat, bool)>>,
    }

    #[async_trait]
    impl ScanBackend for MockBackend {
        fn backend_id(&self) -> &str {
            "mock"
        }

        async fn scan(&self, request: &ScanRequest) -> Result<ScanOutcome, ScanError> {
            let had_lockfile = walkdir::WalkDir::new(&request.target)
                .into_iter()
                .filter_map(Result::ok)
                .any(|e| e.file_name() == "package-lock.json");
            self.seen
                .lock()
                .unwrap()
                .push((request.target.clone(), request.format, had_lockfile));

            if self.fail {
                return Err(ScanError::NonZeroExit {
                    code: 1,
                    stderr: "boom".to_string(),
                });
            }
            std::fs::create_dir_all(request.output_file.parent().unwrap())?;
            std::fs::write(&request.output_file, REPORT)?;
            Ok(ScanOutcome {
                exit_code: 0,
                output_file: request.output_file.clone(),
                duration_ms: 1,
            })
        }
    }

    fn config(base: &Path) -> HarvesterConfig {
        HarvesterConfig {
            output_dir: base.join("reports"),
            work_dir: base.join("work"),
            ..HarvesterConfig::default()
        }
    }

    fn project(base: &Path) -> PathBuf {
        let dir = base.join("project");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("package.json"),
            r#"{"name":"app","dependencies":{"lodash":"^4.17.19"}}"#,
        )
        .unwrap();
        dir
    }

    #[tokio::test]
    async fn test_directory_target_is_enhanced_scanned_and_analyzed() {
        let base = TempDir::new().unwrap();
        let dir = project(base.path());
        let pipeline = ScanPipeline::new(MockBackend::default(), config(base.path()));

        let result = pipeline.process(&ScanTarget::directory(&dir)).await;

        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.state, ArtifactState::Cleaned);
        assert_eq!(result.total_vulnerabilities, 1);
        assert_eq!(result.classification, Classification::Findings);
        assert_eq!(result.enhancement.enhanced, 1);
        assert_eq!(result.findings[0].pkg_name, "lodash");
        assert_eq!(
            result.output_file.unwrap(),
            base.path().join("reports/project.trivy.json")
        );

        let seen = pipeline.backend().seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].2, "lockfile must exist before the scan runs");
    }

    #[tokio::test]
    async fn test_enhancement_can_be_disabled() {
        let base = TempDir::new().unwrap();
        let dir = project(base.path());
        let cfg = HarvesterConfig {
            enhance: false,
            ..config(base.path())
        };
        let pipeline = ScanPipeline::new(MockBackend::default(), cfg);

        let result = pipeline.process(&ScanTarget::directory(&dir)).await;

        assert!(result.success);
        assert!(!dir.join("package-lock.json").exists());
        assert!(!pipeline.backend().seen.lock().unwrap()[0].2);
    }

    #[tokio::test]
    async fn test_html_runs_companion_json_first() {
        let base = TempDir::new().unwrap();
        let dir = project(base.path());
        let cfg = HarvesterConfig {
            format: OutputFormat::Html,
            ..config(base.path())
        };
        let pipeline = ScanPipeline::new(MockBackend::default(), cfg);

        let result = pipeline.process(&ScanTarget::directory(&dir)).await;

        let formats: Vec<OutputFormat> = pipeline
            .backend()
            .seen
            .lock()
            .unwrap()
            .iter()
            .map(|s| s.1)
            .collect();
        assert_eq!(formats, vec![OutputFormat::Json, OutputFormat::Html]);
        assert_eq!(result.classification, Classification::Findings);
        assert_eq!(
            result.output_file.unwrap(),
            base.path().join("reports/project.trivy.html")
        );
    }

    #[tokio::test]
    async fn test_without_companion_non_json_is_unanalyzed() {
        let base = TempDir::new().unwrap();
        let dir = project(base.path());
        let cfg = HarvesterConfig {
            format: OutputFormat::Table,
            companion_json: false,
            ..config(base.path())
        };
        let pipeline = ScanPipeline::new(MockBackend::default(), cfg);

        let result = pipeline.process(&ScanTarget::directory(&dir)).await;

        assert!(result.success);
        assert_eq!(result.classification, Classification::Unanalyzed);
        assert_eq!(result.state, ArtifactState::Cleaned);
        assert_eq!(pipeline.backend().seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_scan_failure_is_recorded_not_raised() {
        let base = TempDir::new().unwrap();
        let dir = project(base.path());
        let backend = MockBackend {
            fail: true,
            ..MockBackend::default()
        };
        let pipeline = ScanPipeline::new(backend, config(base.path()));

        let result = pipeline.process(&ScanTarget::directory(&dir)).await;

        assert!(!result.success);
        assert_eq!(result.state, ArtifactState::ScanFailed);
        assert!(result.error.unwrap().contains("boom"));
    }

    #[tokio::test]
    async fn test_missing_target_fails_extraction() {
        let base = TempDir::new().unwrap();
        let pipeline = ScanPipeline::new(MockBackend::default(), config(base.path()));

        let result = pipeline
            .process(&ScanTarget::archive(base.path().join("absent.tgz")))
            .await;

        assert!(!result.success);
        assert_eq!(result.state, ArtifactState::ExtractionFailed);
        assert!(pipeline.backend().seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unsupported_archive_leaves_no_scratch() {
        let base = TempDir::new().unwrap();
        let file = base.path().join("bundle.rar");
        std::fs::write(&file, b"not an archive").unwrap();
        let pipeline = ScanPipeline::new(MockBackend::default(), config(base.path()));

        let result = pipeline.process(&ScanTarget::archive(&file)).await;

        assert_eq!(result.state, ArtifactState::ExtractionFailed);
        let work = base.path().join("work");
        assert!(!work.exists() || std::fs::read_dir(&work).unwrap().next().is_none());
    }

    #[tokio::test]
    async fn test_plain_file_is_scanned_in_place() {
        let base = TempDir::new().unwrap();
        let jar = base.path().join("lib-1.0.jar");
        std::fs::write(&jar, b"PK\x03\x04").unwrap();
        let pipeline = ScanPipeline::new(MockBackend::default(), config(base.path()));

        let result = pipeline.process(&ScanTarget::from_path(&jar)).await;

        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.state, ArtifactState::Cleaned);
        assert_eq!(result.enhancement, EnhancementSummary::default());
        assert!(result.scratch_dir.is_none());
        assert_eq!(pipeline.backend().seen.lock().unwrap()[0].0, jar);
        assert!(!base.path().join("work").exists());
    }

    #[tokio::test]
    async fn test_image_tarball_is_not_extracted() {
        let base = TempDir::new().unwrap();
        let tarball = base.path().join("app-image.tar");
        std::fs::write(&tarball, b"not unpacked").unwrap();
        let cfg = HarvesterConfig {
            scan_type: ScanType::Image,
            ..config(base.path())
        };
        let pipeline = ScanPipeline::new(MockBackend::default(), cfg);

        let result = pipeline.process(&ScanTarget::archive(&tarball)).await;

        assert!(result.success, "{:?}", result.error);
        assert!(result.archive_format.is_none());
        assert_eq!(pipeline.backend().seen.lock().unwrap()[0].0, tarball);
        assert!(!base.path().join("work").exists());
    }

    #[tokio::test]
    async fn test_image_scan_rejects_directories() {
        let base = TempDir::new().unwrap();
        let dir = project(base.path());
        let cfg = HarvesterConfig {
            scan_type: ScanType::Image,
            ..config(base.path())
        };
        let pipeline = ScanPipeline::new(MockBackend::default(), cfg);

        let result = pipeline.process(&ScanTarget::directory(&dir)).await;

        assert!(!result.success);
        assert_eq!(result.state, ArtifactState::ScanFailed);
        assert!(!dir.join("package-lock.json").exists());
        assert!(pipeline.backend().seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_report_names_are_unique_per_batch() {
        let mut names = ReportNames::default();
        assert_eq!(names.claim("app"), "app");
        assert_eq!(names.claim("app"), "app-2");
        assert_eq!(names.claim("app"), "app-3");
        assert_eq!(names.claim("app-2"), "app-2-2");
        assert_eq!(names.claim("lib"), "lib");
    }

    #[test]
    fn test_temp_extraction_removed_on_drop() {
        let base = TempDir::new().unwrap();
        let info = SourceInfo {
            size_bytes: 0,
            detected_format: "tar.gz".to_string(),
        };

        let kept = TempExtraction::create(base.path(), "a", info.clone(), false).unwrap();
        let removed = TempExtraction::create(base.path(), "a", info, true).unwrap();
        assert_ne!(kept.path, removed.path);

        let (kept_path, removed_path) = (kept.path.clone(), removed.path.clone());
        drop(kept);
        drop(removed);
        assert!(kept_path.exists());
        assert!(!removed_path.exists());
    }
}
