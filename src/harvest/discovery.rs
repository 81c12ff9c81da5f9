//! Package discovery and the enhancement gate.
//!
//! Discovery walks a tree for `package.json` files. The gate decides, per
//! package directory, whether a lockfile has to be synthesized at all.

use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

use crate::harvest::formats;
use crate::harvest::traits::has_suffix;

/// Lockfiles that make a directory scannable as-is.
pub const LOCKFILE_NAMES: [&str; 3] = ["package-lock.json", "yarn.lock", "pnpm-lock.yaml"];

/// Directories skipped by workspace-wide discovery.
pub const EXCLUDED_DIRS: [&str; 10] = [
    "node_modules",
    ".git",
    ".svn",
    ".hg",
    "test",
    "tests",
    "__tests__",
    "coverage",
    "dist",
    "build",
];

const MANIFEST_NAME: &str = "package.json";

/// Sidecar files published next to artifacts; never scan targets.
pub const CHECKSUM_SUFFIXES: [&str; 4] = [".md5", ".sha1", ".sha256", ".sha512"];

/// Default ceiling on manifests processed by a workspace-wide search.
pub const DEFAULT_WORKSPACE_MAX_PACKAGES: usize = 20;

/// Returns `false` when `package_dir` already holds a recognized lockfile.
///
/// Only checks for existence, so repeated calls agree as long as the
/// directory does not change.
pub fn needs_enhancement(package_dir: &Path) -> bool {
    !LOCKFILE_NAMES
        .iter()
        .any(|name| package_dir.join(name).exists())
}

/// Manifests found by one discovery walk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Discovered {
    /// Manifests to process, in walk order.
    pub manifests: Vec<PathBuf>,
    /// Manifests found beyond the ceiling and left alone.
    pub skipped: usize,
}

/// Recursive `package.json` finder.
#[derive(Debug, Clone)]
pub struct PackageDiscovery {
    exclude_non_source: bool,
    max_packages: Option<usize>,
}

impl PackageDiscovery {
    /// Workspace-wide search: skips non-source directories and stops at
    /// `max_packages` manifests.
    pub fn workspace(max_packages: usize) -> Self {
        Self {
            exclude_non_source: true,
            max_packages: Some(max_packages),
        }
    }

    /// Search inside one extracted archive: everything is walked, no ceiling.
    pub fn archive() -> Self {
        Self {
            exclude_non_source: false,
            max_packages: None,
        }
    }

    pub fn discover(&self, root: &Path) -> Discovered {
        let root = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
        let exclude = self.exclude_non_source;

        let mut manifests: Vec<PathBuf> = WalkDir::new(&root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| !(exclude && is_excluded_dir(entry)))
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    debug!(error = %e, "Skipping unreadable path during discovery");
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file() && entry.file_name() == MANIFEST_NAME)
            .map(DirEntry::into_path)
            .collect();

        let mut skipped = 0;
        if let Some(max) = self.max_packages {
            if manifests.len() > max {
                skipped = manifests.len() - max;
                warn!(
                    found = manifests.len(),
                    limit = max,
                    skipped,
                    root = %root.display(),
                    "Too many package.json files, processing only the first ones"
                );
                manifests.truncate(max);
            }
        }

        debug!(count = manifests.len(), root = %root.display(), "Discovered package.json files");
        Discovered { manifests, skipped }
    }
}

fn is_excluded_dir(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .map(|name| EXCLUDED_DIRS.contains(&name))
            .unwrap_or(false)
}

pub fn is_checksum_file(path: &Path) -> bool {
    CHECKSUM_SUFFIXES.iter().any(|suffix| has_suffix(path, suffix))
}

/// Name fragments of scanner reports published next to artifacts.
const REPORT_MARKERS: [&str; 2] = ["trivy-report", "scan-report"];

pub const SKIP_CHECKSUM: &str = "checksum file";
pub const SKIP_SECURITY_REPORT: &str = "existing security report";

/// Why `path` is not worth scanning, if it isn't.
///
/// Checksum sidecars and earlier security reports (`*.sarif`, names
/// containing `trivy-report` or `scan-report`) are skipped.
pub fn skip_reason(path: &Path) -> Option<&'static str> {
    if is_checksum_file(path) {
        return Some(SKIP_CHECKSUM);
    }
    let name = path.file_name()?.to_string_lossy().to_ascii_lowercase();
    if has_suffix(path, ".sarif") || REPORT_MARKERS.iter().any(|m| name.contains(m)) {
        return Some(SKIP_SECURITY_REPORT);
    }
    None
}

/// Lists the supported archives under `root`, sorted by path.
///
/// Checksum sidecars are ignored even when their stem looks like an archive
/// (`app.tgz.sha256`).
pub fn find_archives(root: &Path) -> Vec<PathBuf> {
    let mut archives: Vec<PathBuf> = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .map(DirEntry::into_path)
        .filter(|path| !is_checksum_file(path) && formats::is_supported_archive(path))
        .collect();
    archives.sort();
    debug!(count = archives.len(), root = %root.display(), "Found archives");
    archives
}
