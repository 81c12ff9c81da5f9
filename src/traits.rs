use crate::executor::{ScanOutcome, ScanRequest};
use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Scanner binary not found: {0}")]
    BinaryNotFound(PathBuf),
    #[error("Failed to launch scanner: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("Scanner exited with code {code}: {stderr}")]
    NonZeroExit { code: i32, stderr: String },
    #[error("Scanner was terminated by a signal")]
    Terminated,
    #[error("No HTML template found (tried: {})", join_paths(.tried))]
    TemplateNotFound { tried: Vec<PathBuf> },
    #[error("Scanner reported success but wrote no output to {0}")]
    MissingOutput(PathBuf),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn join_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// A vulnerability scanner the pipeline can drive.
///
/// The production implementation shells out to Trivy; tests substitute a
/// backend that writes canned reports.
#[async_trait]
pub trait ScanBackend: Send + Sync {
    /// Returns the identifier of this backend (e.g., "trivy").
    fn backend_id(&self) -> &str;

    /// Runs one scan and waits for it to finish. On success exactly one
    /// report file exists at `request.output_file`.
    async fn scan(&self, request: &ScanRequest) -> Result<ScanOutcome, ScanError>;

    /// Probes the backend version, if it can be determined.
    async fn version(&self) -> Option<String> {
        None
    }
}
