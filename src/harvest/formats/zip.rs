use std::fs::{self, File};
use std::io;
use std::path::Path;
use tracing::warn;
use zip::ZipArchive;

use crate::harvest::traits::{has_suffix, ArchiveFormat, ExtractionError};

/// Zip archives.
pub struct ZipFormat;

impl ArchiveFormat for ZipFormat {
    fn name(&self) -> &'static str {
        "zip"
    }

    fn can_handle(&self, path: &Path) -> bool {
        has_suffix(path, ".zip")
    }

    fn extract(&self, source: &Path, dest: &Path) -> Result<(), ExtractionError> {
        let corrupted = |reason: String| ExtractionError::CorruptedArchive {
            path: source.to_path_buf(),
            reason,
        };

        let file = File::open(source).map_err(|e| ExtractionError::Unreadable {
            path: source.to_path_buf(),
            source: e,
        })?;
        let mut archive = ZipArchive::new(file).map_err(|e| corrupted(e.to_string()))?;

        for i in 0..archive.len() {
            let mut entry = archive.by_index(i).map_err(|e| corrupted(e.to_string()))?;

            // Zip Slip guard: entries must stay inside `dest`.
            let relative = match entry.enclosed_name() {
                Some(name) => name.to_path_buf(),
                None => {
                    warn!(entry = entry.name(), "Skipping zip entry outside extraction root");
                    continue;
                }
            };
            let out_path = dest.join(relative);

            if entry.is_dir() {
                fs::create_dir_all(&out_path)?;
                continue;
            }

            if let Some(parent) = out_path.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut out_file = File::create(&out_path)?;
            io::copy(&mut entry, &mut out_file).map_err(|e| corrupted(e.to_string()))?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;
    use zip::write::FileOptions;

    #[test]
    fn test_extract_zip_with_nested_package() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("site.zip");

        let mut writer = zip::ZipWriter::new(File::create(&archive).unwrap());
        writer.add_directory("web/", FileOptions::default()).unwrap();
        writer
            .start_file("web/package.json", FileOptions::default())
            .unwrap();
        writer.write_all(br#"{"name":"web"}"#).unwrap();
        writer.finish().unwrap();

        let dest = dir.path().join("out");
        fs::create_dir_all(&dest).unwrap();
        ZipFormat.extract(&archive, &dest).unwrap();

        assert!(dest.join("web").is_dir());
        assert_eq!(
            fs::read_to_string(dest.join("web/package.json")).unwrap(),
            r#"{"name":"web"}"#
        );
    }

    #[test]
    fn test_entries_escaping_root_are_skipped() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("evil.zip");

        let mut writer = zip::ZipWriter::new(File::create(&archive).unwrap());
        writer
            .start_file("../escaped.txt", FileOptions::default())
            .unwrap();
        writer.write_all(b"nope").unwrap();
        writer.start_file("ok.txt", FileOptions::default()).unwrap();
        writer.write_all(b"fine").unwrap();
        writer.finish().unwrap();

        let dest = dir.path().join("out");
        fs::create_dir_all(&dest).unwrap();
        ZipFormat.extract(&archive, &dest).unwrap();

        assert!(dest.join("ok.txt").is_file());
        assert!(!dir.path().join("escaped.txt").exists());
    }

    #[test]
    fn test_corrupt_zip_fails() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("broken.zip");
        fs::write(&archive, b"PK but not really").unwrap();

        let err = ZipFormat.extract(&archive, dir.path()).unwrap_err();
        assert!(matches!(err, ExtractionError::CorruptedArchive { .. }));
    }
}
