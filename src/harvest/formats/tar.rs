use flate2::read::GzDecoder;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tar::Archive;

use crate::harvest::traits::{has_suffix, ArchiveFormat, ExtractionError};

/// Gzip-compressed tarballs: `.tar.gz`, `.tgz` (npm's package format).
pub struct TarGzFormat;

/// Uncompressed tarballs.
pub struct TarFormat;

impl ArchiveFormat for TarGzFormat {
    fn name(&self) -> &'static str {
        "tar.gz"
    }

    fn can_handle(&self, path: &Path) -> bool {
        has_suffix(path, ".tar.gz") || has_suffix(path, ".tgz")
    }

    fn extract(&self, source: &Path, dest: &Path) -> Result<(), ExtractionError> {
        let file = open(source)?;
        unpack(GzDecoder::new(file), source, dest)
    }
}

impl ArchiveFormat for TarFormat {
    fn name(&self) -> &'static str {
        "tar"
    }

    fn can_handle(&self, path: &Path) -> bool {
        has_suffix(path, ".tar")
    }

    fn extract(&self, source: &Path, dest: &Path) -> Result<(), ExtractionError> {
        let file = open(source)?;
        unpack(file, source, dest)
    }
}

fn open(source: &Path) -> Result<File, ExtractionError> {
    File::open(source).map_err(|e| ExtractionError::Unreadable {
        path: source.to_path_buf(),
        source: e,
    })
}

// `Archive::unpack` refuses entries that would land outside `dest`.
fn unpack<R: Read>(reader: R, source: &Path, dest: &Path) -> Result<(), ExtractionError> {
    let mut archive = Archive::new(reader);
    archive.set_preserve_permissions(false);
    archive.set_overwrite(true);
    archive
        .unpack(dest)
        .map_err(|e| ExtractionError::CorruptedArchive {
            path: source.to_path_buf(),
            reason: e.to_string(),
        })
}
