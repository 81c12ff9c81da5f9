//! npm lockfile synthesis.
//!
//! Trivy's npm detector only looks at lockfiles. For a package that ships a
//! bare `package.json`, [`LockfileSynthesizer`] fabricates a
//! `package-lock.json` (lockfileVersion 3) plus a `node_modules` skeleton
//! from the declared dependency ranges, so the declared dependencies get
//! scanned. Versions are pinned by stripping range operators, not resolved.
//!
//! Everything is computed in memory from a single parse and written once.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};

use crate::harvest::traits::EnhancementError;
use crate::model::{
    DependencyEntry, PackageDescriptor, PackageEntry, ResolvedDependency, SynthesizedLockfile,
    PLACEHOLDER_INTEGRITY,
};

pub const LOCKFILE_NAME: &str = "package-lock.json";
pub const LOCKFILE_VERSION: u32 = 3;

/// Default ceiling on dependencies written into one lockfile.
pub const DEFAULT_MAX_DEPENDENCIES: usize = 100;

const LICENSE: &str = "MIT";

/// What one synthesis wrote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SynthesisReport {
    pub name: String,
    pub version: String,
    /// Dependencies declared in `package.json`.
    pub dependency_count: usize,
    /// `node_modules/*/package.json` files written.
    pub created_packages: usize,
    /// Dependencies dropped by the ceiling.
    pub truncated: usize,
    pub lockfile: PathBuf,
}

/// In-memory result of [`LockfileSynthesizer::build`].
#[derive(Debug, Clone)]
pub struct LockfilePlan {
    pub lockfile: SynthesizedLockfile,
    /// Dependencies that made it into the lockfile, in lockfile order.
    pub included: Vec<ResolvedDependency>,
    pub truncated: usize,
    pub rejected: Vec<String>,
}

#[derive(Serialize)]
struct SkeletonManifest<'a> {
    name: &'a str,
    version: &'a str,
}

/// Builds and writes synthesized lockfiles.
#[derive(Debug, Clone)]
pub struct LockfileSynthesizer {
    max_dependencies: usize,
}

impl Default for LockfileSynthesizer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DEPENDENCIES)
    }
}

impl LockfileSynthesizer {
    pub fn new(max_dependencies: usize) -> Self {
        Self { max_dependencies }
    }

    /// Reads the fields of `package.json` the lockfile needs.
    ///
    /// # Errors
    ///
    /// Returns [`EnhancementError::Read`] or [`EnhancementError::Parse`].
    pub fn read_descriptor(path: &Path) -> Result<PackageDescriptor, EnhancementError> {
        let raw = fs::read(path).map_err(|e| EnhancementError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        serde_json::from_slice(&raw).map_err(|e| EnhancementError::Parse {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Builds the lockfile structure without touching the filesystem.
    pub fn build(&self, descriptor: &PackageDescriptor) -> LockfilePlan {
        let mut rejected = Vec::new();
        let safe: Vec<ResolvedDependency> = descriptor
            .resolved_dependencies()
            .into_iter()
            .filter(|dep| {
                let ok = is_safe_package_name(&dep.name);
                if !ok {
                    rejected.push(dep.name.clone());
                }
                ok
            })
            .collect();

        let truncated = safe.len().saturating_sub(self.max_dependencies);
        let included: Vec<ResolvedDependency> =
            safe.into_iter().take(self.max_dependencies).collect();

        let mut packages = BTreeMap::new();
        packages.insert(
            String::new(),
            PackageEntry {
                name: Some(descriptor.name.clone()),
                version: descriptor.version.clone(),
                license: LICENSE.to_string(),
                dependencies: descriptor.dependencies.clone(),
                ..PackageEntry::default()
            },
        );

        let mut dependencies = BTreeMap::new();
        for dep in &included {
            let resolved = dep.resolved_url();
            packages.insert(
                format!("node_modules/{}", dep.name),
                PackageEntry {
                    version: dep.clean_version.clone(),
                    resolved: Some(resolved.clone()),
                    integrity: Some(PLACEHOLDER_INTEGRITY.to_string()),
                    license: LICENSE.to_string(),
                    ..PackageEntry::default()
                },
            );
            dependencies.insert(
                dep.name.clone(),
                DependencyEntry {
                    version: dep.clean_version.clone(),
                    resolved,
                    integrity: PLACEHOLDER_INTEGRITY.to_string(),
                },
            );
        }

        LockfilePlan {
            lockfile: SynthesizedLockfile {
                name: descriptor.name.clone(),
                version: descriptor.version.clone(),
                lockfile_version: LOCKFILE_VERSION,
                requires: true,
                packages,
                dependencies,
            },
            included,
            truncated,
            rejected,
        }
    }

    /// Writes `package-lock.json` and the `node_modules` skeleton for the
    /// manifest at `package_json` into `output_dir`.
    ///
    /// An existing `package-lock.json` is overwritten; callers consult
    /// [`needs_enhancement`](crate::harvest::discovery::needs_enhancement)
    /// first.
    ///
    /// # Errors
    ///
    /// Returns [`EnhancementError`] if the manifest cannot be read or parsed,
    /// or if any file cannot be written. Truncation is not an error.
    pub fn synthesize(
        &self,
        package_json: &Path,
        output_dir: &Path,
    ) -> Result<SynthesisReport, EnhancementError> {
        let descriptor = Self::read_descriptor(package_json)?;
        let plan = self.build(&descriptor);

        if plan.truncated > 0 {
            warn!(
                package = %descriptor.name,
                declared = descriptor.dependencies.len(),
                limit = self.max_dependencies,
                dropped = plan.truncated,
                "Dependency count above limit, lockfile truncated"
            );
        }
        for name in &plan.rejected {
            warn!(package = %descriptor.name, dependency = %name, "Skipping dependency with unsafe name");
        }

        let lockfile_path = output_dir.join(LOCKFILE_NAME);
        let body = serde_json::to_string_pretty(&plan.lockfile)?;
        write_file(&lockfile_path, body.as_bytes())?;

        let mut created_packages = 0;
        if !plan.included.is_empty() {
            let node_modules = output_dir.join("node_modules");
            for dep in &plan.included {
                let dep_dir = node_modules.join(&dep.name);
                fs::create_dir_all(&dep_dir).map_err(|e| EnhancementError::Write {
                    path: dep_dir.clone(),
                    source: e,
                })?;
                let manifest = serde_json::to_string_pretty(&SkeletonManifest {
                    name: &dep.name,
                    version: &dep.clean_version,
                })?;
                write_file(&dep_dir.join("package.json"), manifest.as_bytes())?;
                created_packages += 1;
            }
        }

        info!(
            package = %descriptor.name,
            version = %descriptor.version,
            dependencies = descriptor.dependencies.len(),
            created_packages,
            lockfile = %lockfile_path.display(),
            "Synthesized lockfile"
        );

        Ok(SynthesisReport {
            name: descriptor.name,
            version: descriptor.version,
            dependency_count: descriptor.dependencies.len(),
            created_packages,
            truncated: plan.truncated,
            lockfile: lockfile_path,
        })
    }
}

fn write_file(path: &Path, body: &[u8]) -> Result<(), EnhancementError> {
    debug!(path = %path.display(), bytes = body.len(), "Writing file");
    fs::write(path, body).map_err(|e| EnhancementError::Write {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Package names become directory paths under `node_modules`; reject any
/// that could point elsewhere.
fn is_safe_package_name(name: &str) -> bool {
    if name.is_empty() || name.contains('\\') {
        return false;
    }
    Path::new(name)
        .components()
        .all(|c| matches!(c, Component::Normal(_)))
}
