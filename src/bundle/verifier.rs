//! Bundle verification: recompute every hash a bundle claims and report
//! the differences instead of failing on the first one.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use log::{info, warn};
use serde::Serialize;

use crate::security::path::confine_to_root;
use crate::utils::hash::sha256_file;

use super::manifest::Manifest;
use super::packager::parse_checksums;

#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct Mismatch {
    pub path: String,
    /// Hash the bundle claims; empty when the file was never listed.
    pub expected: String,
    /// Recomputed hash; empty when the listed file is missing.
    pub actual: String,
}

#[derive(Debug, Serialize, Clone)]
pub struct VerifyReport {
    pub ok: bool,
    pub mismatches: Vec<Mismatch>,
}

impl VerifyReport {
    fn from_mismatches(mut mismatches: Vec<Mismatch>) -> Self {
        mismatches.sort_by(|a, b| a.path.cmp(&b.path));
        VerifyReport {
            ok: mismatches.is_empty(),
            mismatches,
        }
    }
}

/// Verify a bundle given either its staging directory or its archive file.
///
/// Archives are checked against their `.sha256` sidecar first, then
/// unpacked to a scratch directory and verified like a staging tree.
pub fn verify(path: &Path) -> Result<VerifyReport> {
    if path.is_dir() {
        return verify_staging(path);
    }
    if !path.is_file() {
        bail!("bundle path does not exist: {}", path.display());
    }
    verify_archive(path)
}

/// Check every file in a staged bundle directory against `checksums.txt`
/// and the manifest's duplicate map.
pub fn verify_staging(staging: &Path) -> Result<VerifyReport> {
    let checksums_path = staging.join("checksums.txt");
    let content = fs::read_to_string(&checksums_path)
        .context(format!("Failed to read {}", checksums_path.display()))?;
    let listed = parse_checksums(&content)?;

    let mut mismatches = Vec::new();
    for (rel_path, expected) in &listed {
        // checksums.txt is untrusted input; a listed path must stay
        // inside the staging tree.
        let abs = match confine_to_root(staging, Path::new(rel_path)) {
            Ok(abs) => abs,
            Err(e) => {
                warn!("Listed path rejected: {}: {:#}", rel_path, e);
                mismatches.push(Mismatch {
                    path: rel_path.clone(),
                    expected: expected.clone(),
                    actual: String::new(),
                });
                continue;
            }
        };
        match sha256_file(&abs) {
            Ok(actual) if &actual == expected => {}
            Ok(actual) => mismatches.push(Mismatch {
                path: rel_path.clone(),
                expected: expected.clone(),
                actual,
            }),
            Err(e) => {
                warn!("Listed file unreadable: {}: {:#}", rel_path, e);
                mismatches.push(Mismatch {
                    path: rel_path.clone(),
                    expected: expected.clone(),
                    actual: String::new(),
                });
            }
        }
    }

    // Files present on disk but absent from the listing are tampering too.
    for entry in walkdir::WalkDir::new(staging)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
    {
        let rel = entry
            .path()
            .strip_prefix(staging)
            .context("walked path outside staging root")?;
        let rel_str = match rel.to_str() {
            Some(s) => s.replace('\\', "/"),
            None => continue,
        };
        if rel_str == "checksums.txt" || rel_str == "manifest.json" {
            continue;
        }
        if !listed.contains_key(&rel_str) {
            mismatches.push(Mismatch {
                path: rel_str.clone(),
                expected: String::new(),
                actual: sha256_file(entry.path()).unwrap_or_default(),
            });
        }
    }

    // The manifest duplicates the checksum map; a divergence means one of
    // the two index files was edited after packaging.
    let manifest_path = staging.join("manifest.json");
    let manifest_bytes = fs::read(&manifest_path)
        .context(format!("Failed to read {}", manifest_path.display()))?;
    let manifest: Manifest =
        serde_json::from_slice(&manifest_bytes).context("Failed to parse manifest.json")?;
    for (path, expected) in &listed {
        match manifest.checksums.get(path) {
            Some(recorded) if recorded == expected => {}
            Some(recorded) => mismatches.push(Mismatch {
                path: format!("manifest:{}", path),
                expected: expected.clone(),
                actual: recorded.clone(),
            }),
            None => mismatches.push(Mismatch {
                path: format!("manifest:{}", path),
                expected: expected.clone(),
                actual: String::new(),
            }),
        }
    }
    for path in manifest.checksums.keys() {
        if !listed.contains_key(path) {
            mismatches.push(Mismatch {
                path: format!("manifest:{}", path),
                expected: String::new(),
                actual: manifest.checksums[path].clone(),
            });
        }
    }

    let report = VerifyReport::from_mismatches(mismatches);
    info!(
        "Verified {}: {} ({} mismatches)",
        staging.display(),
        if report.ok { "ok" } else { "FAILED" },
        report.mismatches.len()
    );
    Ok(report)
}

fn verify_archive(archive: &Path) -> Result<VerifyReport> {
    let mut mismatches = Vec::new();

    if let Some(sidecar) = sidecar_path(archive) {
        if sidecar.exists() {
            let recorded = fs::read_to_string(&sidecar)?
                .split_whitespace()
                .next()
                .unwrap_or_default()
                .to_string();
            let actual = sha256_file(archive)?;
            if recorded != actual {
                mismatches.push(Mismatch {
                    path: archive
                        .file_name()
                        .map(|n| n.to_string_lossy().to_string())
                        .unwrap_or_default(),
                    expected: recorded,
                    actual,
                });
            }
        } else {
            warn!("No hash sidecar found at {}", sidecar.display());
        }
    }

    let scratch = std::env::temp_dir().join(format!(
        "triage-verify-{}",
        uuid::Uuid::new_v4().simple()
    ));
    fs::create_dir_all(&scratch)?;
    let unpack_result = unpack(archive, &scratch).and_then(|_| verify_staging(&scratch));
    let cleanup = fs::remove_dir_all(&scratch);
    if let Err(e) = cleanup {
        warn!("Failed to remove scratch directory: {}", e);
    }

    // A corrupted archive may not unpack at all; when the sidecar already
    // flagged it, that is a verdict rather than an error.
    let mut report = match unpack_result {
        Ok(report) => report,
        Err(e) if !mismatches.is_empty() => {
            warn!("Archive failed to unpack: {:#}", e);
            VerifyReport {
                ok: false,
                mismatches: Vec::new(),
            }
        }
        Err(e) => return Err(e),
    };
    report.mismatches.extend(mismatches);
    report.mismatches.sort_by(|a, b| a.path.cmp(&b.path));
    report.ok = report.mismatches.is_empty();
    Ok(report)
}

fn sidecar_path(archive: &Path) -> Option<PathBuf> {
    let name = archive.file_name()?.to_str()?;
    let stem = name
        .strip_suffix(".tar.gz")
        .or_else(|| name.strip_suffix(".zip"))?;
    Some(archive.with_file_name(format!("{}.sha256", stem)))
}

fn unpack(archive: &Path, dest: &Path) -> Result<()> {
    let name = archive.to_string_lossy();
    if name.ends_with(".zip") {
        let file = fs::File::open(archive)
            .context(format!("Failed to open {}", archive.display()))?;
        let mut zip = zip::ZipArchive::new(file).context("Failed to read zip archive")?;
        zip.extract(dest).context("Failed to extract zip archive")?;
        Ok(())
    } else if name.ends_with(".tar.gz") {
        let file = fs::File::open(archive)
            .context(format!("Failed to open {}", archive.display()))?;
        let decoder = flate2::read::GzDecoder::new(file);
        let mut tar = tar::Archive::new(decoder);
        tar.unpack(dest).context("Failed to extract tar archive")?;
        Ok(())
    } else {
        bail!("unrecognised archive format: {}", archive.display());
    }
}
