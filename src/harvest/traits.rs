//! Core traits and error types for the harvest stages.
//!
//! This module defines the seams of the scan pipeline:
//! - Archive handling via [`ArchiveFormat`]
//! - One error enum per stage, so the orchestrator can decide per stage
//!   whether a failure is fatal to the artifact or merely degrading

use std::path::{Path, PathBuf};
use thiserror::Error;

// ============================================================================
// Archive Format Trait
// ============================================================================

/// Abstraction over the archive formats an artifact can arrive in.
///
/// Each supported format implements this trait to provide:
/// - Format detection from the file name
/// - Content extraction to a destination directory
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync` so a single registry of formats can
/// be shared with blocking extraction tasks.
pub trait ArchiveFormat: Send + Sync {
    /// Returns the unique identifier for this format.
    ///
    /// Examples: `"tar.gz"`, `"tar"`, `"zip"`
    fn name(&self) -> &'static str;

    /// Detects if a file matches this format.
    ///
    /// Detection is by case-insensitive file name suffix; file contents are
    /// not inspected.
    fn can_handle(&self, path: &Path) -> bool;

    /// Extracts archive contents to a destination directory.
    ///
    /// The destination directory must already exist. A failed extraction may
    /// leave partial files behind; callers must not reuse the directory.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractionError`] if the archive is unreadable or corrupt,
    /// or if writing an entry fails.
    fn extract(&self, source: &Path, dest: &Path) -> Result<(), ExtractionError>;
}

/// Returns `true` when `path`'s file name ends with `suffix`, ignoring case.
pub(crate) fn has_suffix(path: &Path, suffix: &str) -> bool {
    path.file_name()
        .map(|n| n.to_string_lossy().to_ascii_lowercase().ends_with(suffix))
        .unwrap_or(false)
}

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur while unpacking an archive.
#[derive(Error, Debug)]
pub enum ExtractionError {
    /// Failed to create or access the extraction directory
    #[error("Failed to create extraction directory: {0}")]
    DirectoryCreation(#[from] std::io::Error),

    /// Archive file could not be opened
    #[error("Failed to open archive {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// No registered format handles this file
    #[error("Unsupported archive format: {0}")]
    UnsupportedFormat(PathBuf),

    /// Archive file is corrupted or malformed
    #[error("Corrupted archive {path}: {reason}")]
    CorruptedArchive { path: PathBuf, reason: String },
}

/// Errors that can occur while synthesizing a lockfile.
///
/// All of these are recoverable at the artifact level: the artifact is still
/// scanned, only without the synthesized lockfile.
#[derive(Error, Debug)]
pub enum EnhancementError {
    /// `package.json` could not be read
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// `package.json` is not valid JSON or has unexpected field types
    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Writing the lockfile or the `node_modules` skeleton failed
    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Lockfile serialization failed
    #[error("Failed to serialize lockfile: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Errors that can occur while reading a scan report.
#[derive(Error, Debug)]
pub enum AnalysisError {
    /// Report file is missing or unreadable
    #[error("I/O error reading report {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Report is not valid scanner JSON
    #[error("JSON parsing failed for {path}: {source}")]
    JsonParsing {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

// ============================================================================
// Tests
// ============================================================================
