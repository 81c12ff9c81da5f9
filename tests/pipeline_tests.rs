//! End-to-end pipeline tests over real archives and a mock scanner backend.

use async_trait::async_trait;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::Value;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::TempDir;

use trivy_harvester::config::HarvesterConfig;
use trivy_harvester::executor::{ScanOutcome, ScanRequest};
use trivy_harvester::harvest::{analyze, ScanPipeline};
use trivy_harvester::model::{ArtifactState, Classification, ScanTarget, Severity, TargetKind};
use trivy_harvester::report::SkipKind;
use trivy_harvester::traits::{ScanBackend, ScanError};

const CLEAN_REPORT: &str = r#"{"SchemaVersion":2,"Results":[{"Target":"package-lock.json"}]}"#;
const LODASH_REPORT: &str = r#"{"Results":[{"Target":"package/package-lock.json","Vulnerabilities":[
    {"VulnerabilityID":"CVE-2021-23337","PkgName":"lodash","InstalledVersion":"4.17.19","FixedVersion":"4.17.21","Severity":"HIGH"},
    {"VulnerabilityID":"CVE-2020-28500","PkgName":"lodash","InstalledVersion":"4.17.19","FixedVersion":"4.17.21","Severity":"MEDIUM"}
]}]}"#;

/// What the scanner saw when it was invoked.
struct Seen {
    target: PathBuf,
    lockfile: Option<String>,
    yarn_lock: bool,
}

/// Reports lodash findings whenever a synthesized lockfile mentions lodash.
#[derive(Default)]
struct RecordingBackend {
    fail: bool,
    seen: Mutex<Vec<Seen>>,
}

#[async_trait]
impl ScanBackend for RecordingBackend {
    fn backend_id(&self) -> &str {
        "recording"
    }

    async fn scan(&self, request: &ScanRequest) -> Result<ScanOutcome, ScanError> {
        let files: Vec<PathBuf> = walkdir::WalkDir::new(&request.target)
            .into_iter()
            .filter_map(Result::ok)
            .map(|e| e.into_path())
            .collect();
        let lockfile = files
            .iter()
            .find(|p| p.file_name().is_some_and(|n| n == "package-lock.json"))
            .map(|p| std::fs::read_to_string(p).unwrap());
        let yarn_lock = files
            .iter()
            .any(|p| p.file_name().is_some_and(|n| n == "yarn.lock"));

        let report = match &lockfile {
            Some(body) if body.contains("lodash") => LODASH_REPORT,
            _ => CLEAN_REPORT,
        };
        self.seen.lock().unwrap().push(Seen {
            target: request.target.clone(),
            lockfile,
            yarn_lock,
        });

        if self.fail {
            return Err(ScanError::NonZeroExit {
                code: 2,
                stderr: "database download failed".to_string(),
            });
        }
        std::fs::create_dir_all(request.output_file.parent().unwrap())?;
        std::fs::write(&request.output_file, report)?;
        Ok(ScanOutcome {
            exit_code: 0,
            output_file: request.output_file.clone(),
            duration_ms: 1,
        })
    }
}

fn write_tgz(path: &Path, files: &[(&str, &str)]) {
    let encoder = GzEncoder::new(File::create(path).unwrap(), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for (name, body) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(body.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, name, body.as_bytes()).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap();
}

fn config(base: &Path) -> HarvesterConfig {
    HarvesterConfig {
        output_dir: base.join("reports"),
        work_dir: base.join("work"),
        ..HarvesterConfig::default()
    }
}

fn scratch_entries(base: &Path) -> usize {
    match std::fs::read_dir(base.join("work")) {
        Ok(entries) => entries.count(),
        Err(_) => 0,
    }
}

const LODASH_MANIFEST: &str = r#"{"name":"app","version":"1.0.0","dependencies":{"lodash":"^4.17.19"}}"#;

#[tokio::test]
async fn test_lodash_archive_end_to_end() {
    let base = TempDir::new().unwrap();
    let archive = base.path().join("app-1.0.0.tgz");
    write_tgz(&archive, &[("package/package.json", LODASH_MANIFEST)]);

    let pipeline = ScanPipeline::new(RecordingBackend::default(), config(base.path()));
    let result = pipeline.process(&ScanTarget::archive(&archive)).await;

    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.state, ArtifactState::Cleaned);
    assert_eq!(result.enhancement.enhanced, 1);
    assert_eq!(result.total_vulnerabilities, 2);
    assert_eq!(result.classification, Classification::Findings);
    assert_eq!(result.severity_breakdown.get(Severity::High), 1);
    assert_eq!(result.severity_breakdown.get(Severity::Medium), 1);
    assert_eq!(
        result.output_file.as_deref(),
        Some(base.path().join("reports/app-1.0.0.trivy.json").as_path())
    );

    let seen = pipeline.backend().seen.lock().unwrap();
    let lockfile: Value = serde_json::from_str(seen[0].lockfile.as_deref().unwrap()).unwrap();
    assert_eq!(lockfile["lockfileVersion"], 3);
    assert_eq!(lockfile["packages"][""]["dependencies"]["lodash"], "^4.17.19");
    let lodash = &lockfile["packages"]["node_modules/lodash"];
    assert_eq!(lodash["version"], "4.17.19");
    assert_eq!(
        lodash["resolved"],
        "https://registry.npmjs.org/lodash/-/lodash-4.17.19.tgz"
    );
    assert_eq!(lockfile["dependencies"]["lodash"]["version"], "4.17.19");

    assert!(!seen[0].target.exists(), "scratch directory must be removed");
    assert_eq!(scratch_entries(base.path()), 0);
}

#[tokio::test]
async fn test_existing_yarn_lock_skips_enhancement() {
    let base = TempDir::new().unwrap();
    let archive = base.path().join("locked.tgz");
    write_tgz(
        &archive,
        &[
            ("package/package.json", LODASH_MANIFEST),
            ("package/yarn.lock", "# yarn lockfile v1\n"),
        ],
    );

    let pipeline = ScanPipeline::new(RecordingBackend::default(), config(base.path()));
    let result = pipeline.process(&ScanTarget::archive(&archive)).await;

    assert!(result.success);
    assert_eq!(result.enhancement.enhanced, 0);
    assert_eq!(result.enhancement.already_locked, 1);

    let seen = pipeline.backend().seen.lock().unwrap();
    assert!(seen[0].yarn_lock);
    assert!(seen[0].lockfile.is_none());
}

#[tokio::test]
async fn test_corrupt_archive_does_not_stop_the_batch() {
    let base = TempDir::new().unwrap();
    let first = base.path().join("a.tgz");
    let corrupt = base.path().join("b.tgz");
    let third = base.path().join("c.tgz");
    write_tgz(&first, &[("package/package.json", LODASH_MANIFEST)]);
    std::fs::write(&corrupt, b"\x1f\x8bthis is not gzip data").unwrap();
    write_tgz(&third, &[("package/package.json", r#"{"name":"c"}"#)]);

    let pipeline = ScanPipeline::new(RecordingBackend::default(), config(base.path()));
    let targets = vec![
        ScanTarget::archive(&first),
        ScanTarget::archive(&corrupt),
        ScanTarget::archive(&third),
    ];
    let report = pipeline.run_batch(&targets).await;

    let states: Vec<ArtifactState> = report.results.iter().map(|r| r.state).collect();
    assert_eq!(
        states,
        vec![
            ArtifactState::Cleaned,
            ArtifactState::ExtractionFailed,
            ArtifactState::Cleaned
        ]
    );
    assert_eq!(report.results[2].classification, Classification::Clean);

    let totals = report.totals();
    assert_eq!(totals.processed, 3);
    assert_eq!(totals.failed, 1);
    assert_eq!(totals.with_findings, 1);
    assert_eq!(report.exit_code(false), 0);

    assert_eq!(pipeline.backend().seen.lock().unwrap().len(), 2);
    assert_eq!(scratch_entries(base.path()), 0);
}

#[tokio::test]
async fn test_scratch_removed_when_scan_fails() {
    let base = TempDir::new().unwrap();
    let archive = base.path().join("app.tgz");
    write_tgz(&archive, &[("package/package.json", LODASH_MANIFEST)]);

    let backend = RecordingBackend {
        fail: true,
        ..RecordingBackend::default()
    };
    let pipeline = ScanPipeline::new(backend, config(base.path()));
    let result = pipeline.process(&ScanTarget::archive(&archive)).await;

    assert!(!result.success);
    assert_eq!(result.state, ArtifactState::ScanFailed);
    assert!(result.error.unwrap().contains("database download failed"));
    assert_eq!(scratch_entries(base.path()), 0);
}

#[tokio::test]
async fn test_no_cleanup_keeps_extracted_files() {
    let base = TempDir::new().unwrap();
    let archive = base.path().join("app.tgz");
    write_tgz(&archive, &[("package/package.json", LODASH_MANIFEST)]);

    let cfg = HarvesterConfig {
        cleanup: false,
        ..config(base.path())
    };
    let pipeline = ScanPipeline::new(RecordingBackend::default(), cfg);
    let result = pipeline.process(&ScanTarget::archive(&archive)).await;

    assert!(result.success);
    assert_eq!(result.state, ArtifactState::Analyzed);
    let seen = pipeline.backend().seen.lock().unwrap();
    assert!(seen[0].target.join("package/package-lock.json").is_file());
}

#[tokio::test]
async fn test_fail_fast_skips_remaining_targets() {
    let base = TempDir::new().unwrap();
    let missing = base.path().join("missing.tgz");
    let good = base.path().join("good.tgz");
    let checksum = base.path().join("good.tgz.sha256");
    write_tgz(&good, &[("package/package.json", r#"{"name":"good"}"#)]);
    std::fs::write(&checksum, "abc  good.tgz\n").unwrap();

    let cfg = HarvesterConfig {
        fail_fast: true,
        ..config(base.path())
    };
    let pipeline = ScanPipeline::new(RecordingBackend::default(), cfg);
    let report = pipeline
        .run_batch(&[
            ScanTarget::archive(&checksum),
            ScanTarget::archive(&missing),
            ScanTarget::archive(&good),
        ])
        .await;

    assert_eq!(report.results.len(), 1);
    assert_eq!(report.skipped.len(), 2);
    assert_eq!(report.skipped[0].reason, "checksum file");
    assert_eq!(report.skipped[0].kind, SkipKind::NotScannable);
    assert_eq!(report.skipped[1].path, good);
    assert_eq!(report.skipped[1].kind, SkipKind::FailFast);
    assert_eq!(report.exit_code(true), 1);
    assert!(pipeline.backend().seen.lock().unwrap().is_empty());

    let summary = report.write_json(&base.path().join("reports")).unwrap();
    let doc: Value = serde_json::from_str(&std::fs::read_to_string(summary).unwrap()).unwrap();
    assert_eq!(doc["totals"]["failed"], 1);
    assert_eq!(doc["totals"]["skipped"], 2);
}

#[tokio::test]
async fn test_same_stem_archives_get_separate_reports() {
    let base = TempDir::new().unwrap();
    let first = base.path().join("repo1/app.tgz");
    let second = base.path().join("repo2/app.tgz");
    std::fs::create_dir_all(first.parent().unwrap()).unwrap();
    std::fs::create_dir_all(second.parent().unwrap()).unwrap();
    write_tgz(&first, &[("package/package.json", LODASH_MANIFEST)]);
    write_tgz(&second, &[("package/package.json", r#"{"name":"app"}"#)]);

    let pipeline = ScanPipeline::new(RecordingBackend::default(), config(base.path()));
    let report = pipeline
        .run_batch(&[ScanTarget::archive(&first), ScanTarget::archive(&second)])
        .await;

    let outputs: Vec<PathBuf> = report
        .results
        .iter()
        .map(|r| r.output_file.clone().unwrap())
        .collect();
    assert_eq!(outputs[0], base.path().join("reports/app.trivy.json"));
    assert_eq!(outputs[1], base.path().join("reports/app-2.trivy.json"));

    for result in &report.results {
        let on_disk = analyze(result.output_file.as_deref().unwrap()).unwrap();
        assert_eq!(on_disk.total_vulnerabilities, result.total_vulnerabilities);
    }
    assert_eq!(report.results[0].classification, Classification::Findings);
    assert_eq!(report.results[1].classification, Classification::Clean);
}

#[tokio::test]
async fn test_plain_files_scanned_and_old_reports_skipped() {
    let base = TempDir::new().unwrap();
    let jar = base.path().join("lib-1.0.jar");
    let sarif = base.path().join("lib-1.0.sarif");
    let old_report = base.path().join("lib-1.0-trivy-report.json");
    std::fs::write(&jar, b"PK\x03\x04").unwrap();
    std::fs::write(&sarif, "{}").unwrap();
    std::fs::write(&old_report, "{}").unwrap();

    let targets: Vec<ScanTarget> = [&jar, &sarif, &old_report]
        .into_iter()
        .map(ScanTarget::from_path)
        .collect();
    assert_eq!(targets[0].kind, TargetKind::File);

    let pipeline = ScanPipeline::new(RecordingBackend::default(), config(base.path()));
    let report = pipeline.run_batch(&targets).await;

    assert_eq!(report.results.len(), 1);
    let result = &report.results[0];
    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.state, ArtifactState::Cleaned);
    assert_eq!(result.enhancement.enhanced, 0);

    let reasons: Vec<&str> = report.skipped.iter().map(|s| s.reason.as_str()).collect();
    assert_eq!(reasons, vec!["existing security report"; 2]);

    let seen = pipeline.backend().seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].target, jar);
    assert_eq!(scratch_entries(base.path()), 0);
}

#[tokio::test]
async fn test_summary_and_csv_exports_written_per_run() {
    let base = TempDir::new().unwrap();
    let good = base.path().join("good.tgz");
    let corrupt = base.path().join("bad.tgz");
    write_tgz(&good, &[("package/package.json", LODASH_MANIFEST)]);
    std::fs::write(&corrupt, b"\x1f\x8bnot gzip").unwrap();

    let pipeline = ScanPipeline::new(RecordingBackend::default(), config(base.path()));
    let report = pipeline
        .run_batch(&[ScanTarget::archive(&good), ScanTarget::archive(&corrupt)])
        .await;

    let out = base.path().join("reports");
    let summary = report.write_json(&out).unwrap();
    let csvs = report.write_csv(&out).unwrap();
    let stamp = report.stamp();

    assert!(summary.ends_with(format!("scan_issues_report_{stamp}.json")));
    assert_eq!(csvs.len(), 2);
    let errors = std::fs::read_to_string(out.join(format!("error_scans_report_{stamp}.csv"))).unwrap();
    assert!(errors.contains("bad.tgz"));
    assert!(errors.contains("extraction_failed"));
}
