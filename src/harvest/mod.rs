//! Harvest module - lockfile enhancement and scan orchestration.
//!
//! - **Traits**: [`ArchiveFormat`] plus the per-stage error types
//! - **Formats**: tar, tar.gz and zip extraction
//! - **Discovery / Lockfile / Enhance**: find unlocked npm packages and
//!   synthesize a `package-lock.json` for each
//! - **Analyzer**: severity aggregation over the scanner's JSON report
//! - **Pipeline**: async orchestrator via [`pipeline::ScanPipeline`]

pub mod analyzer;
pub mod discovery;
pub mod enhance;
pub mod formats;
pub mod lockfile;
pub mod pipeline;
pub mod traits;

// Re-export commonly used types
pub use traits::{AnalysisError, ArchiveFormat, EnhancementError, ExtractionError};

pub use analyzer::{analyze, Analysis};
pub use discovery::{find_archives, needs_enhancement, PackageDiscovery};
pub use enhance::Enhancer;
pub use lockfile::{LockfileSynthesizer, SynthesisReport};
pub use pipeline::{PipelineError, ScanPipeline, SourceInfo, TempExtraction};
