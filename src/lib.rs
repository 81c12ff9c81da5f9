pub mod config;
pub mod executor;
pub mod harvest;
pub mod model;
pub mod report;
pub mod traits;

// Re-export common types for convenience
pub use config::{ConfigError, HarvesterConfig};
pub use executor::*;
pub use model::*;
pub use report::{BatchReport, SkipKind};
pub use traits::*;
