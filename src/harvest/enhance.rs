//! Tree-level enhancement: discover manifests, gate, synthesize.

use std::path::Path;
use tracing::{debug, info, warn};

use crate::harvest::discovery::{needs_enhancement, PackageDiscovery};
use crate::harvest::lockfile::LockfileSynthesizer;
use crate::model::EnhancementSummary;

/// Synthesizes lockfiles for every unlocked package under a root.
#[derive(Debug, Clone)]
pub struct Enhancer {
    discovery: PackageDiscovery,
    synthesizer: LockfileSynthesizer,
}

impl Enhancer {
    pub fn new(discovery: PackageDiscovery, synthesizer: LockfileSynthesizer) -> Self {
        Self {
            discovery,
            synthesizer,
        }
    }

    /// Enhances every package found under `root`.
    ///
    /// Never fails: a package whose synthesis fails is counted and logged,
    /// and the remaining packages are still processed.
    pub fn enhance(&self, root: &Path) -> EnhancementSummary {
        let found = self.discovery.discover(root);
        let mut summary = EnhancementSummary {
            discovered: found.manifests.len() + found.skipped,
            skipped_over_limit: found.skipped,
            ..EnhancementSummary::default()
        };

        for manifest in &found.manifests {
            let Some(package_dir) = manifest.parent() else {
                continue;
            };

            if !needs_enhancement(package_dir) {
                debug!(dir = %package_dir.display(), "Lockfile present, skipping");
                summary.already_locked += 1;
                continue;
            }

            match self.synthesizer.synthesize(manifest, package_dir) {
                Ok(_) => summary.enhanced += 1,
                Err(e) => {
                    warn!(
                        manifest = %manifest.display(),
                        error = %e,
                        "Enhancement failed, package will be scanned without a lockfile"
                    );
                    summary.failed += 1;
                }
            }
        }

        info!(
            root = %root.display(),
            discovered = summary.discovered,
            enhanced = summary.enhanced,
            already_locked = summary.already_locked,
            failed = summary.failed,
            "Enhancement finished"
        );
        summary
    }
}
