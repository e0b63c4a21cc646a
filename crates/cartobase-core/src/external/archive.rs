//! Extraction of configured archive members into a scratch directory.
//!
//! Only the members named in the source config are pulled out; member paths
//! are validated against escapes so a hostile archive cannot write outside
//! the destination.

use crate::error::{CartobaseError, Result};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tracing::debug;
use zip::ZipArchive;

fn archive_error(path: &Path, detail: impl Into<String>) -> CartobaseError {
    CartobaseError::Archive {
        path: path.display().to_string(),
        detail: detail.into(),
    }
}

/// Extract the named members of a zip archive into `dest`, preserving their
/// internal paths. Returns the extracted file paths in member order.
pub fn extract_members(archive: &Path, members: &[String], dest: &Path) -> Result<Vec<PathBuf>> {
    let file = File::open(archive)?;
    let mut zip =
        ZipArchive::new(BufReader::new(file)).map_err(|e| archive_error(archive, e.to_string()))?;

    std::fs::create_dir_all(dest)?;
    let mut extracted = Vec::with_capacity(members.len());

    for member in members {
        let mut entry = zip
            .by_name(member)
            .map_err(|e| archive_error(archive, format!("member '{member}': {e}")))?;
        let relative = entry
            .enclosed_name()
            .ok_or_else(|| archive_error(archive, format!("member '{member}' escapes the archive root")))?;
        let out_path = dest.join(relative);
        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&out_path)?;
        std::io::copy(&mut entry, &mut out)?;
        debug!(member = %member, to = %out_path.display(), "extracted");
        extracted.push(out_path);
    }

    Ok(extracted)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    fn build_zip(path: &Path, members: &[(&str, &[u8])]) {
        let file = File::create(path).unwrap();
        let mut writer = ZipWriter::new(file);
        for (name, content) in members {
            writer
                .start_file(*name, SimpleFileOptions::default())
                .unwrap();
            writer.write_all(content).unwrap();
        }
        writer.finish().unwrap();
    }

    #[test]
    fn extracts_listed_members_with_their_paths() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("water.zip");
        build_zip(
            &archive,
            &[
                ("split/water_polygons.shp", b"shp".as_slice()),
                ("split/water_polygons.dbf", b"dbf".as_slice()),
                ("README.txt", b"docs".as_slice()),
            ],
        );

        let dest = dir.path().join("extract");
        let members = vec![
            "split/water_polygons.shp".to_string(),
            "split/water_polygons.dbf".to_string(),
        ];
        let extracted = extract_members(&archive, &members, &dest).unwrap();

        assert_eq!(extracted.len(), 2);
        assert_eq!(
            std::fs::read(dest.join("split/water_polygons.shp")).unwrap(),
            b"shp"
        );
        assert_eq!(
            std::fs::read(dest.join("split/water_polygons.dbf")).unwrap(),
            b"dbf"
        );
        // unlisted members stay in the archive
        assert!(!dest.join("README.txt").exists());
    }

    #[test]
    fn missing_member_is_reported_by_name() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("water.zip");
        build_zip(&archive, &[("present.shp", b"x".as_slice())]);

        let err = extract_members(
            &archive,
            &["absent.shp".to_string()],
            &dir.path().join("extract"),
        )
        .unwrap_err();

        match err {
            CartobaseError::Archive { detail, .. } => assert!(detail.contains("absent.shp")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn escaping_member_is_rejected() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("evil.zip");
        build_zip(&archive, &[("../evil.txt", b"pwn".as_slice())]);

        let err = extract_members(
            &archive,
            &["../evil.txt".to_string()],
            &dir.path().join("extract"),
        )
        .unwrap_err();

        assert!(matches!(err, CartobaseError::Archive { .. }));
        assert!(!dir.path().join("evil.txt").exists());
    }

    #[test]
    fn not_a_zip_is_an_archive_error() {
        let dir = TempDir::new().unwrap();
        let bogus = dir.path().join("bogus.zip");
        std::fs::write(&bogus, b"not a zip at all").unwrap();

        let err = extract_members(&bogus, &["x".to_string()], &dir.path().join("extract"))
            .unwrap_err();
        assert!(matches!(err, CartobaseError::Archive { .. }));
    }
}
