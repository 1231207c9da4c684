//! Deterministic archive assembly for evidence bundles.
//!
//! Entries are written in the caller-supplied (sorted) order with fixed
//! timestamps and permissions, so archiving an unchanged staging tree twice
//! produces byte-identical output.

use std::fs;
use std::io::{BufReader, Write};
use std::path::Path;

use anyhow::{Context, Result};
use flate2::write::GzEncoder;
use flate2::Compression;
use log::debug;
use zip::write::FileOptions;
use zip::ZipWriter;

/// Write `entries` (paths relative to `staging`) into a zip at `dest`.
pub fn write_zip(staging: &Path, entries: &[String], dest: &Path, level: u32) -> Result<()> {
    let file = fs::File::create(dest)
        .context(format!("Failed to create archive {}", dest.display()))?;
    let mut zip = ZipWriter::new(file);

    // Fixed timestamp and permissions keep the output reproducible.
    let options = FileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated)
        .compression_level(Some(level as i32))
        .last_modified_time(zip::DateTime::default())
        .unix_permissions(0o644);

    for rel_path in entries {
        let abs_path = staging.join(rel_path);
        zip.start_file(rel_path.clone(), options)
            .context(format!("Failed to start zip entry {}", rel_path))?;
        let mut reader = BufReader::new(
            fs::File::open(&abs_path)
                .context(format!("Failed to open {}", abs_path.display()))?,
        );
        std::io::copy(&mut reader, &mut zip)
            .context(format!("Failed to write zip entry {}", rel_path))?;
        debug!("Archived {}", rel_path);
    }

    zip.finish().context("Failed to finalize zip archive")?;
    Ok(())
}

/// Write `entries` into a gzip-compressed tarball at `dest`.
pub fn write_tar_gz(staging: &Path, entries: &[String], dest: &Path, level: u32) -> Result<()> {
    let file = fs::File::create(dest)
        .context(format!("Failed to create archive {}", dest.display()))?;
    let encoder = GzEncoder::new(file, Compression::new(level));
    let mut tar = tar::Builder::new(encoder);

    for rel_path in entries {
        let abs_path = staging.join(rel_path);
        let data = fs::read(&abs_path)
            .context(format!("Failed to read {}", abs_path.display()))?;

        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(0);
        header.set_cksum();
        tar.append_data(&mut header, rel_path, data.as_slice())
            .context(format!("Failed to write tar entry {}", rel_path))?;
        debug!("Archived {}", rel_path);
    }

    let encoder = tar.into_inner().context("Failed to finalize tar stream")?;
    let mut file = encoder.finish().context("Failed to finalize gzip stream")?;
    file.flush().context("Failed to flush archive")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn staging_with_files() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("artifacts")).unwrap();
        fs::write(dir.path().join("manifest.json"), b"{}\n").unwrap();
        fs::write(dir.path().join("artifacts/a.txt"), b"alpha").unwrap();
        fs::write(dir.path().join("artifacts/b.txt"), b"beta").unwrap();
        dir
    }

    fn entries() -> Vec<String> {
        vec![
            "artifacts/a.txt".to_string(),
            "artifacts/b.txt".to_string(),
            "manifest.json".to_string(),
        ]
    }

    #[test]
    fn test_zip_is_byte_idempotent() {
        let staging = staging_with_files();
        let out = TempDir::new().unwrap();
        let first = out.path().join("one.zip");
        let second = out.path().join("two.zip");

        write_zip(staging.path(), &entries(), &first, 6).unwrap();
        write_zip(staging.path(), &entries(), &second, 6).unwrap();

        assert_eq!(fs::read(&first).unwrap(), fs::read(&second).unwrap());
    }

    #[test]
    fn test_tar_gz_is_byte_idempotent() {
        let staging = staging_with_files();
        let out = TempDir::new().unwrap();
        let first = out.path().join("one.tar.gz");
        let second = out.path().join("two.tar.gz");

        write_tar_gz(staging.path(), &entries(), &first, 6).unwrap();
        write_tar_gz(staging.path(), &entries(), &second, 6).unwrap();

        assert_eq!(fs::read(&first).unwrap(), fs::read(&second).unwrap());
    }

    #[test]
    fn test_zip_round_trips_content() {
        let staging = staging_with_files();
        let out = TempDir::new().unwrap();
        let archive = out.path().join("bundle.zip");
        write_zip(staging.path(), &entries(), &archive, 6).unwrap();

        let mut zip = zip::ZipArchive::new(fs::File::open(&archive).unwrap()).unwrap();
        let mut names: Vec<String> = (0..zip.len())
            .map(|i| zip.by_index(i).unwrap().name().to_string())
            .collect();
        names.sort();
        assert_eq!(names, entries());

        use std::io::Read;
        let mut content = String::new();
        zip.by_name("artifacts/a.txt")
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "alpha");
    }

    #[test]
    fn test_missing_entry_errors() {
        let staging = staging_with_files();
        let out = TempDir::new().unwrap();
        let archive = out.path().join("bundle.zip");
        let result = write_zip(
            staging.path(),
            &["artifacts/ghost.txt".to_string()],
            &archive,
            6,
        );
        assert!(result.is_err());
    }
}
