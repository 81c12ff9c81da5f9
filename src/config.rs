//! Harvester configuration.
//!
//! [`HarvesterConfig`] is built once at the process boundary (environment,
//! `.env`, CLI flags) and handed to the components that need it. Nothing
//! below this layer reads the environment.
//!
//! ```
//! use trivy_harvester::config::HarvesterConfig;
//!
//! let config = HarvesterConfig::from_env_with(|key| match key {
//!     "TRIVY_HARVESTER_MAX_PACKAGES" => Some("5".to_string()),
//!     _ => None,
//! })
//! .unwrap();
//! assert_eq!(config.max_packages, 5);
//! assert!(config.cleanup);
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;

use crate::harvest::discovery::DEFAULT_WORKSPACE_MAX_PACKAGES;
use crate::harvest::lockfile::DEFAULT_MAX_DEPENDENCIES;
use crate::model::{OutputFormat, ScanType};

pub const ENV_INSTALL_DIR: &str = "TRIVY_HARVESTER_INSTALL_DIR";
pub const ENV_PROXY: &str = "TRIVY_HARVESTER_PROXY";
pub const ENV_ENHANCE: &str = "TRIVY_HARVESTER_ENHANCE";
pub const ENV_CLEANUP: &str = "TRIVY_HARVESTER_CLEANUP";
pub const ENV_MAX_PACKAGES: &str = "TRIVY_HARVESTER_MAX_PACKAGES";
pub const ENV_MAX_DEPENDENCIES: &str = "TRIVY_HARVESTER_MAX_DEPENDENCIES";
pub const ENV_OUTPUT_DIR: &str = "TRIVY_HARVESTER_OUTPUT_DIR";
pub const ENV_WORK_DIR: &str = "TRIVY_HARVESTER_WORK_DIR";
pub const ENV_RUN_FOLDER: &str = "TRIVY_HARVESTER_RUN_FOLDER";

/// Placeholder replaced by the artifact name in output file names.
pub const NAME_PLACEHOLDER: &str = "{name}";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("config error: {field}: {reason}")]
    Invalid { field: String, reason: String },
}

impl ConfigError {
    fn invalid(field: &str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

/// Settings shared by the enhancement and scan commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarvesterConfig {
    /// Scanner installation folder (binary and `contrib/` templates)
    pub install_dir: Option<PathBuf>,
    /// Proxy URL exported to the scanner process
    pub proxy: Option<String>,
    /// Synthesize lockfiles before scanning
    pub enhance: bool,
    /// Delete scratch directories after each artifact
    pub cleanup: bool,
    /// Ceiling on `package.json` files per workspace-wide search
    pub max_packages: usize,
    /// Ceiling on dependencies per synthesized lockfile
    pub max_dependencies: usize,
    /// Where report files are written
    pub output_dir: PathBuf,
    /// Put each run's reports in a `scan_reports_<stamp>` folder under
    /// `output_dir`
    pub run_folder: bool,
    /// Parent of per-artifact scratch directories
    pub work_dir: PathBuf,
    pub format: OutputFormat,
    pub scan_type: ScanType,
    /// Explicit HTML template
    pub template: Option<PathBuf>,
    /// Run an extra JSON scan when `format` is not JSON, for classification
    pub companion_json: bool,
    /// Stop the batch at the first failed artifact
    pub fail_fast: bool,
    /// Output file name patterns per format; `{name}` is the artifact name
    pub output_names: BTreeMap<OutputFormat, String>,
}

impl Default for HarvesterConfig {
    fn default() -> Self {
        let output_names = OutputFormat::ALL
            .iter()
            .map(|f| (*f, format!("{NAME_PLACEHOLDER}.trivy.{}", f.extension())))
            .collect();

        Self {
            install_dir: None,
            proxy: None,
            enhance: true,
            cleanup: true,
            max_packages: DEFAULT_WORKSPACE_MAX_PACKAGES,
            max_dependencies: DEFAULT_MAX_DEPENDENCIES,
            output_dir: PathBuf::from("./vulnerability_reports"),
            run_folder: true,
            work_dir: std::env::temp_dir().join("trivy-harvester"),
            format: OutputFormat::Json,
            scan_type: ScanType::Fs,
            template: None,
            companion_json: true,
            fail_fast: false,
            output_names,
        }
    }
}

impl HarvesterConfig {
    /// Reads configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    /// Reads configuration through `lookup`, starting from the defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for unparsable values or a failed
    /// [`validate`](Self::validate).
    pub fn from_env_with<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut config = Self::default();

        if let Some(dir) = get(ENV_INSTALL_DIR) {
            config.install_dir = Some(PathBuf::from(dir));
        }
        config.proxy = get(ENV_PROXY).or_else(|| get("HTTPS_PROXY"));
        if let Some(v) = get(ENV_ENHANCE) {
            config.enhance = parse_bool(ENV_ENHANCE, &v)?;
        }
        if let Some(v) = get(ENV_CLEANUP) {
            config.cleanup = parse_bool(ENV_CLEANUP, &v)?;
        }
        if let Some(v) = get(ENV_MAX_PACKAGES) {
            config.max_packages = parse_count(ENV_MAX_PACKAGES, &v)?;
        }
        if let Some(v) = get(ENV_MAX_DEPENDENCIES) {
            config.max_dependencies = parse_count(ENV_MAX_DEPENDENCIES, &v)?;
        }
        if let Some(dir) = get(ENV_OUTPUT_DIR) {
            config.output_dir = PathBuf::from(dir);
        }
        if let Some(v) = get(ENV_RUN_FOLDER) {
            config.run_folder = parse_bool(ENV_RUN_FOLDER, &v)?;
        }
        if let Some(dir) = get(ENV_WORK_DIR) {
            config.work_dir = PathBuf::from(dir);
        }
        for format in OutputFormat::ALL {
            let key = format!("TRIVY_HARVESTER_OUTPUT_{}", format.as_str().to_ascii_uppercase());
            if let Some(name) = get(key.as_str()) {
                config.output_names.insert(format, name);
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Checks value ranges.
    ///
    /// - `max_packages`, `max_dependencies`: at least 1
    /// - output names: non-empty, no path separators
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_packages == 0 {
            return Err(ConfigError::invalid("max_packages", "must be at least 1"));
        }
        if self.max_dependencies == 0 {
            return Err(ConfigError::invalid("max_dependencies", "must be at least 1"));
        }
        for (format, name) in &self.output_names {
            if name.is_empty() || name.contains('/') || name.contains('\\') {
                return Err(ConfigError::invalid(
                    &format!("output_names.{format}"),
                    format!("'{name}' must be a plain file name"),
                ));
            }
        }
        Ok(())
    }

    /// Report file path for an artifact named `stem`.
    pub fn output_path(&self, format: OutputFormat, stem: &str) -> PathBuf {
        let pattern = self
            .output_names
            .get(&format)
            .cloned()
            .unwrap_or_else(|| format!("{NAME_PLACEHOLDER}.trivy.{}", format.extension()));
        self.output_dir
            .join(pattern.replace(NAME_PLACEHOLDER, stem))
    }
}

fn parse_bool(field: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::invalid(field, format!("'{other}' is not a boolean"))),
    }
}

fn parse_count(field: &str, value: &str) -> Result<usize, ConfigError> {
    value
        .parse::<usize>()
        .map_err(|_| ConfigError::invalid(field, format!("'{value}' is not a count")))
}
