use crate::model::{OutputFormat, ScanType};
use crate::traits::{ScanBackend, ScanError};
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

/// Binary names probed inside a scanner installation folder.
const BINARY_CANDIDATES: [&str; 2] = ["trivy", "trivy.exe"];

/// Template names probed under `<install>/contrib`, most specific first.
const TEMPLATE_CANDIDATES: [&str; 2] = ["html-custom.tpl", "html.tpl"];

const VERSION_PROBE_TIMEOUT: Duration = Duration::from_secs(30);

/// One scanner invocation.
#[derive(Debug, Clone)]
pub struct ScanRequest {
    pub target: PathBuf,
    pub output_file: PathBuf,
    pub format: OutputFormat,
    pub scan_type: ScanType,
    /// User-supplied HTML template; only consulted for [`OutputFormat::Html`].
    pub template: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ScanOutcome {
    pub exit_code: i32,
    pub output_file: PathBuf,
    pub duration_ms: u64,
}

/// Drives the Trivy CLI.
#[derive(Debug, Clone)]
pub struct TrivyExecutor {
    binary: PathBuf,
    install_dir: PathBuf,
    proxy: Option<String>,
    quiet: bool,
}

impl TrivyExecutor {
    /// Uses `binary` directly; templates are looked up next to it.
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        let binary = binary.into();
        let install_dir = binary
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Self {
            binary,
            install_dir,
            proxy: None,
            quiet: true,
        }
    }

    /// Locates the scanner binary inside an installation folder.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError::BinaryNotFound`] when no candidate exists.
    pub fn from_install_dir(install_dir: &Path) -> Result<Self, ScanError> {
        let binary = BINARY_CANDIDATES
            .iter()
            .map(|name| install_dir.join(name))
            .find(|candidate| candidate.is_file())
            .ok_or_else(|| ScanError::BinaryNotFound(install_dir.join(BINARY_CANDIDATES[0])))?;

        Ok(Self {
            binary,
            install_dir: install_dir.to_path_buf(),
            proxy: None,
            quiet: true,
        })
    }

    /// Proxy URL exported to the scanner process only.
    pub fn with_proxy(mut self, proxy: Option<String>) -> Self {
        self.proxy = proxy;
        self
    }

    /// Passes `--quiet` to the scanner (default: on).
    pub fn with_quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Builds the full argument list for `request`.
    ///
    /// # Errors
    ///
    /// Fails only for HTML output when no template can be found.
    pub fn build_args(&self, request: &ScanRequest) -> Result<Vec<OsString>, ScanError> {
        let mut args: Vec<OsString> = vec![
            request.scan_type.as_str().into(),
            "--scanners".into(),
            "vuln".into(),
            "--format".into(),
            request.format.scanner_format().into(),
        ];

        if request.format == OutputFormat::Html {
            let template = resolve_template(request.template.as_deref(), &self.install_dir)?;
            let mut value = OsString::from("@");
            value.push(template.as_os_str());
            args.push("--template".into());
            args.push(value);
        }

        args.push("--output".into());
        args.push(request.output_file.as_os_str().to_owned());
        if self.quiet {
            args.push("--quiet".into());
        }
        // Image tarballs are read with `--input`; a positional argument would
        // be taken as a registry reference.
        if request.scan_type == ScanType::Image {
            args.push("--input".into());
        }
        args.push(request.target.as_os_str().to_owned());
        Ok(args)
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.binary);
        if let Some(proxy) = &self.proxy {
            command
                .env("HTTP_PROXY", proxy)
                .env("HTTPS_PROXY", proxy)
                .env("http_proxy", proxy)
                .env("https_proxy", proxy);
        }
        command
    }
}

/// Picks the HTML template: the explicit path, then the custom template in
/// the installation's `contrib` folder, then the stock one.
///
/// # Errors
///
/// Returns [`ScanError::TemplateNotFound`] listing every path tried.
pub fn resolve_template(explicit: Option<&Path>, install_dir: &Path) -> Result<PathBuf, ScanError> {
    let mut tried = Vec::new();

    if let Some(path) = explicit {
        if path.is_file() {
            return Ok(path.to_path_buf());
        }
        warn!(template = %path.display(), "Explicit template not found, trying defaults");
        tried.push(path.to_path_buf());
    }

    let contrib = install_dir.join("contrib");
    for name in TEMPLATE_CANDIDATES {
        let candidate = contrib.join(name);
        if candidate.is_file() {
            return Ok(candidate);
        }
        tried.push(candidate);
    }

    Err(ScanError::TemplateNotFound { tried })
}

#[async_trait]
impl ScanBackend for TrivyExecutor {
    fn backend_id(&self) -> &str {
        "trivy"
    }

    #[instrument(skip(self, request), fields(target = %request.target.display(), format = %request.format))]
    async fn scan(&self, request: &ScanRequest) -> Result<ScanOutcome, ScanError> {
        let args = self.build_args(request)?;

        if let Some(parent) = request.output_file.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        // A report left over from an earlier run must not pass for this one.
        match tokio::fs::remove_file(&request.output_file).await {
            Ok(()) => debug!(output = %request.output_file.display(), "Removed stale report"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(ScanError::Io(e)),
        }

        debug!(
            binary = %self.binary.display(),
            args = ?args,
            "Running scanner"
        );

        let start = Instant::now();
        let output = self
            .command()
            .args(&args)
            .output()
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => ScanError::BinaryNotFound(self.binary.clone()),
                _ => ScanError::Spawn(e),
            })?;
        let duration_ms = start.elapsed().as_millis() as u64;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stdout.trim().is_empty() {
            debug!(stdout = %stdout.trim(), "Scanner stdout");
        }
        if !stderr.trim().is_empty() {
            debug!(stderr = %stderr.trim(), "Scanner stderr");
        }

        let code = output.status.code().ok_or(ScanError::Terminated)?;
        if code != 0 {
            return Err(ScanError::NonZeroExit {
                code,
                stderr: stderr.trim().to_string(),
            });
        }

        if !request.output_file.is_file() {
            return Err(ScanError::MissingOutput(request.output_file.clone()));
        }

        info!(duration_ms, output = %request.output_file.display(), "Scan completed");
        Ok(ScanOutcome {
            exit_code: code,
            output_file: request.output_file.clone(),
            duration_ms,
        })
    }

    async fn version(&self) -> Option<String> {
        let probe = self.command().arg("--version").output();
        match timeout(VERSION_PROBE_TIMEOUT, probe).await {
            Ok(Ok(output)) if output.status.success() => String::from_utf8_lossy(&output.stdout)
                .lines()
                .next()
                .map(|line| line.trim().to_string()),
            Ok(Ok(output)) => {
                warn!(status = ?output.status.code(), "Scanner version probe failed");
                None
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Could not run scanner version probe");
                None
            }
            Err(_) => {
                warn!(
                    timeout_secs = VERSION_PROBE_TIMEOUT.as_secs(),
                    "Scanner version probe timed out"
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn request(format: OutputFormat) -> ScanRequest {
        ScanRequest {
            target: PathBuf::from("/work/app"),
            output_file: PathBuf::from("/reports/app.trivy.json"),
            format,
            scan_type: ScanType::Fs,
            template: None,
        }
    }

    fn strings(args: Vec<OsString>) -> Vec<String> {
        args.into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_json_args_force_vuln_scanner() {
        let executor = TrivyExecutor::new("/opt/trivy/trivy");
        let args = strings(executor.build_args(&request(OutputFormat::Json)).unwrap());
        assert_eq!(
            args,
            vec![
                "fs",
                "--scanners",
                "vuln",
                "--format",
                "json",
                "--output",
                "/reports/app.trivy.json",
                "--quiet",
                "/work/app"
            ]
        );
    }

    #[test]
    fn test_html_args_use_contrib_template() {
        let install = TempDir::new().unwrap();
        std::fs::create_dir_all(install.path().join("contrib")).unwrap();
        std::fs::write(install.path().join("contrib/html.tpl"), "tpl").unwrap();

        let executor = TrivyExecutor::new(install.path().join("trivy")).with_quiet(false);
        let args = strings(executor.build_args(&request(OutputFormat::Html)).unwrap());

        let expected_template = format!("@{}", install.path().join("contrib/html.tpl").display());
        assert_eq!(args[4], "template");
        assert_eq!(args[5], "--template");
        assert_eq!(args[6], expected_template);
        assert!(!args.contains(&"--quiet".to_string()));
        assert_eq!(args.last().unwrap(), "/work/app");
    }

    #[test]
    fn test_template_resolution_order() {
        let install = TempDir::new().unwrap();
        let contrib = install.path().join("contrib");
        std::fs::create_dir_all(&contrib).unwrap();
        std::fs::write(contrib.join("html.tpl"), "generic").unwrap();
        std::fs::write(contrib.join("html-custom.tpl"), "custom").unwrap();

        let explicit = install.path().join("mine.tpl");
        std::fs::write(&explicit, "mine").unwrap();

        assert_eq!(
            resolve_template(Some(&explicit), install.path()).unwrap(),
            explicit
        );
        assert_eq!(
            resolve_template(None, install.path()).unwrap(),
            contrib.join("html-custom.tpl")
        );

        std::fs::remove_file(contrib.join("html-custom.tpl")).unwrap();
        let missing = install.path().join("missing.tpl");
        assert_eq!(
            resolve_template(Some(&missing), install.path()).unwrap(),
            contrib.join("html.tpl")
        );
    }

    #[test]
    fn test_template_missing_is_an_error() {
        let install = TempDir::new().unwrap();
        let err = resolve_template(None, install.path()).unwrap_err();
        match err {
            ScanError::TemplateNotFound { tried } => assert_eq!(tried.len(), 2),
            other => panic!("unexpected error: {other}"),
        }

        let executor = TrivyExecutor::new(install.path().join("trivy"));
        assert!(executor.build_args(&request(OutputFormat::Html)).is_err());
    }

    #[test]
    fn test_from_install_dir_requires_binary() {
        let install = TempDir::new().unwrap();
        assert!(matches!(
            TrivyExecutor::from_install_dir(install.path()),
            Err(ScanError::BinaryNotFound(_))
        ));

        std::fs::write(install.path().join("trivy"), "").unwrap();
        let executor = TrivyExecutor::from_install_dir(install.path()).unwrap();
        assert_eq!(executor.binary(), install.path().join("trivy"));
    }

    #[tokio::test]
    async fn test_missing_binary_fails_scan() {
        let dir = TempDir::new().unwrap();
        let executor = TrivyExecutor::new(dir.path().join("no-such-trivy"));
        let mut req = request(OutputFormat::Json);
        req.output_file = dir.path().join("out.json");

        let err = executor.scan(&req).await.unwrap_err();
        assert!(matches!(err, ScanError::BinaryNotFound(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_non_zero_exit_is_a_scan_failure() {
        let dir = TempDir::new().unwrap();
        let executor = TrivyExecutor::new("false");
        let mut req = request(OutputFormat::Json);
        req.output_file = dir.path().join("out.json");

        let err = executor.scan(&req).await.unwrap_err();
        assert!(matches!(err, ScanError::NonZeroExit { code: 1, .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_success_without_output_is_a_scan_failure() {
        let dir = TempDir::new().unwrap();
        let executor = TrivyExecutor::new("true");
        let mut req = request(OutputFormat::Json);
        req.output_file = dir.path().join("reports/out.json");

        let err = executor.scan(&req).await.unwrap_err();
        assert!(matches!(err, ScanError::MissingOutput(_)));
        // The output directory is prepared even though nothing was written.
        assert!(dir.path().join("reports").is_dir());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stale_report_does_not_count_as_output() {
        let dir = TempDir::new().unwrap();
        let executor = TrivyExecutor::new("true");
        let mut req = request(OutputFormat::Json);
        req.output_file = dir.path().join("out.json");
        std::fs::write(&req.output_file, r#"{"Results":[]}"#).unwrap();

        let err = executor.scan(&req).await.unwrap_err();
        assert!(matches!(err, ScanError::MissingOutput(_)));
        assert!(!req.output_file.exists());
    }

    #[test]
    fn test_image_args_read_the_tarball_with_input() {
        let executor = TrivyExecutor::new("/opt/trivy/trivy");
        let mut req = request(OutputFormat::Json);
        req.scan_type = ScanType::Image;
        req.target = PathBuf::from("/images/app.tar");

        let args = strings(executor.build_args(&req).unwrap());
        assert_eq!(args[0], "image");
        assert_eq!(&args[args.len() - 2..], ["--input", "/images/app.tar"]);
    }
}
