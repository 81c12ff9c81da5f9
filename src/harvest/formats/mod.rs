//! Archive format implementations.
//!
//! This module contains the format-specific implementations of the
//! [`ArchiveFormat`](crate::harvest::ArchiveFormat) trait:
//! - `tar` - gzip-compressed (`.tar.gz`, `.tgz`) and plain (`.tar`) tarballs
//! - `zip` - zip archives

pub mod tar;
pub mod zip;

use std::path::Path;
use tracing::debug;

use crate::harvest::traits::{ArchiveFormat, ExtractionError};

pub use self::tar::{TarFormat, TarGzFormat};
pub use self::zip::ZipFormat;

static FORMATS: [&dyn ArchiveFormat; 3] = [&TarGzFormat, &TarFormat, &ZipFormat];

/// Returns the format handling `path`, if any.
pub fn detect(path: &Path) -> Option<&'static dyn ArchiveFormat> {
    FORMATS.iter().copied().find(|f| f.can_handle(path))
}

/// Returns `true` if `path` names a supported archive.
pub fn is_supported_archive(path: &Path) -> bool {
    detect(path).is_some()
}

/// Extracts `archive` into `dest`, creating `dest` if needed.
///
/// # Errors
///
/// Returns [`ExtractionError::UnsupportedFormat`] for unknown suffixes and the
/// format's own error otherwise. No rollback is performed on failure.
pub fn extract(archive: &Path, dest: &Path) -> Result<(), ExtractionError> {
    let format =
        detect(archive).ok_or_else(|| ExtractionError::UnsupportedFormat(archive.to_path_buf()))?;

    std::fs::create_dir_all(dest)?;
    debug!(
        format = format.name(),
        archive = %archive.display(),
        dest = %dest.display(),
        "Extracting archive"
    );
    format.extract(archive, dest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_by_suffix() {
        assert_eq!(detect(Path::new("a.tar.gz")).unwrap().name(), "tar.gz");
        assert_eq!(detect(Path::new("a.TGZ")).unwrap().name(), "tar.gz");
        assert_eq!(detect(Path::new("a.tar")).unwrap().name(), "tar");
        assert_eq!(detect(Path::new("a.Zip")).unwrap().name(), "zip");
        assert!(detect(Path::new("a.rar")).is_none());
        assert!(detect(Path::new("a.tgz.sha256")).is_none());
    }

    #[test]
    fn test_unsupported_format_is_rejected_before_touching_dest() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out");
        let err = extract(Path::new("pkg.7z"), &dest).unwrap_err();
        assert!(matches!(err, ExtractionError::UnsupportedFormat(_)));
        assert!(!dest.exists());
    }
}
