//! Bundle assembly: stage artifacts, findings and reports, checksum
//! everything, emit the manifest, then archive the lot deterministically.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::{debug, info};

use crate::config::{ArchiveFormat, CoreConfig};
use crate::models::{CollectionRun, Finding};
use crate::report::ReportFile;
use crate::security::path::safe_file_name;
use crate::utils::archive;
use crate::utils::hash::sha256_file;

use super::manifest::Manifest;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageErrorKind {
    Io,
    SizeExceeded,
    Encoding,
}

impl fmt::Display for PackageErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PackageErrorKind::Io => write!(f, "io"),
            PackageErrorKind::SizeExceeded => write!(f, "size_exceeded"),
            PackageErrorKind::Encoding => write!(f, "encoding"),
        }
    }
}

/// Packaging failure. The staging directory is left intact for diagnosis.
#[derive(Debug)]
pub struct PackageError {
    pub kind: PackageErrorKind,
    pub message: String,
}

impl PackageError {
    fn new(kind: PackageErrorKind, message: impl Into<String>) -> Self {
        PackageError {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for PackageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "package_error[{}]: {}", self.kind, self.message)
    }
}

impl std::error::Error for PackageError {}

/// Everything produced for one run: the staging tree, the archive and its
/// hash sidecar.
#[derive(Debug)]
pub struct PackagedBundle {
    pub staging_dir: PathBuf,
    pub archive_path: PathBuf,
    pub sidecar_path: PathBuf,
    pub archive_checksum: String,
    pub manifest: Manifest,
}

pub struct BundlePackager {
    config: CoreConfig,
}

impl BundlePackager {
    pub fn new(config: CoreConfig) -> Self {
        BundlePackager { config }
    }

    /// Assemble the bundle for `run` under `dest`.
    ///
    /// The layout and the archive entry order are fully determined by the
    /// inputs, so packaging the same run twice yields identical bytes.
    pub fn package(
        &self,
        run: &CollectionRun,
        findings: &[Finding],
        reports: &[ReportFile],
        dest: &Path,
        case_id: Option<&str>,
    ) -> Result<PackagedBundle> {
        let staging_dir = dest.join(format!("bundle-{}", run.run_id));
        for sub in ["artifacts", "findings", "reports"] {
            fs::create_dir_all(staging_dir.join(sub)).map_err(|e| {
                PackageError::new(
                    PackageErrorKind::Io,
                    format!("failed to create staging directory: {}", e),
                )
            })?;
        }
        info!("Staging bundle at {}", staging_dir.display());

        self.stage_artifacts(run, &staging_dir)?;
        self.stage_findings(findings, &staging_dir)?;
        for report in reports {
            let path = staging_dir.join("reports").join(safe_file_name(&report.name));
            fs::write(&path, &report.bytes).map_err(|e| {
                PackageError::new(
                    PackageErrorKind::Io,
                    format!("failed to write report {}: {}", report.name, e),
                )
            })?;
        }

        // Hash the content files, then write checksums.txt and the manifest
        // that duplicates them. The two index files are archived after the
        // content so they can describe it.
        let checksums = compute_checksums(&staging_dir)?;
        let checksums_text = render_checksums(&checksums);
        fs::write(staging_dir.join("checksums.txt"), &checksums_text).map_err(|e| {
            PackageError::new(
                PackageErrorKind::Io,
                format!("failed to write checksums.txt: {}", e),
            )
        })?;

        let manifest = Manifest::build(
            run,
            findings,
            &self.config,
            self.config.platform,
            checksums.clone(),
            case_id,
        );
        let manifest_bytes = manifest.encode().map_err(|e| {
            PackageError::new(
                PackageErrorKind::Encoding,
                format!("failed to encode manifest: {}", e),
            )
        })?;
        fs::write(staging_dir.join("manifest.json"), &manifest_bytes).map_err(|e| {
            PackageError::new(
                PackageErrorKind::Io,
                format!("failed to write manifest.json: {}", e),
            )
        })?;

        let mut entries: Vec<String> = checksums.keys().cloned().collect();
        entries.push("checksums.txt".to_string());
        entries.push("manifest.json".to_string());

        let ext = self.config.archive_format.extension();
        let archive_path = dest.join(format!("bundle-{}.{}", run.run_id, ext));
        let write_result = match self.config.archive_format {
            ArchiveFormat::Zip => archive::write_zip(
                &staging_dir,
                &entries,
                &archive_path,
                self.config.compression_level,
            ),
            ArchiveFormat::TarGz => archive::write_tar_gz(
                &staging_dir,
                &entries,
                &archive_path,
                self.config.compression_level,
            ),
        };
        write_result.map_err(|e| {
            PackageError::new(PackageErrorKind::Io, format!("archiving failed: {:#}", e))
        })?;

        let archive_checksum = sha256_file(&archive_path)
            .map_err(|e| PackageError::new(PackageErrorKind::Io, format!("{:#}", e)))?;
        let sidecar_path = dest.join(format!("bundle-{}.sha256", run.run_id));
        let archive_name = archive_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        fs::write(
            &sidecar_path,
            format!("{}  {}\n", archive_checksum, archive_name),
        )
        .map_err(|e| {
            PackageError::new(
                PackageErrorKind::Io,
                format!("failed to write hash sidecar: {}", e),
            )
        })?;

        info!(
            "Packaged bundle {} ({} artifacts, {} findings)",
            archive_path.display(),
            manifest.artifacts.len(),
            findings.len()
        );
        Ok(PackagedBundle {
            staging_dir,
            archive_path,
            sidecar_path,
            archive_checksum,
            manifest,
        })
    }

    fn stage_artifacts(&self, run: &CollectionRun, staging_dir: &Path) -> Result<()> {
        let mut used_names: HashSet<String> = HashSet::new();
        for result in run.successes() {
            let encoded = result.data.encode();
            if encoded.len() as u64 > self.config.max_artifact_size {
                return Err(PackageError::new(
                    PackageErrorKind::SizeExceeded,
                    format!(
                        "artifact {} is {} bytes, limit is {}",
                        result.spec.name,
                        encoded.len(),
                        self.config.max_artifact_size
                    ),
                )
                .into());
            }

            let base = safe_file_name(&result.spec.name);
            let ext = result.data.extension();
            // sanitisation can collide two distinct artifact names
            let mut file_name = format!("{}.{}", base, ext);
            let mut suffix = 1;
            while !used_names.insert(file_name.clone()) {
                suffix += 1;
                file_name = format!("{}_{}.{}", base, suffix, ext);
            }

            let path = staging_dir.join("artifacts").join(&file_name);
            fs::write(&path, &encoded).map_err(|e| {
                PackageError::new(
                    PackageErrorKind::Io,
                    format!("failed to write artifact {}: {}", result.spec.name, e),
                )
            })?;
            debug!("Staged artifacts/{}", file_name);
        }
        Ok(())
    }

    fn stage_findings(&self, findings: &[Finding], staging_dir: &Path) -> Result<()> {
        let mut bytes = serde_json::to_vec_pretty(findings).map_err(|e| {
            PackageError::new(
                PackageErrorKind::Encoding,
                format!("failed to encode findings: {}", e),
            )
        })?;
        bytes.push(b'\n');
        fs::write(staging_dir.join("findings").join("findings.json"), bytes).map_err(|e| {
            PackageError::new(
                PackageErrorKind::Io,
                format!("failed to write findings.json: {}", e),
            )
        })?;
        Ok(())
    }
}

/// Relative-path to sha256 map for every regular file under `staging`,
/// excluding the two index files.
pub fn compute_checksums(staging: &Path) -> Result<BTreeMap<String, String>> {
    let mut checksums = BTreeMap::new();
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
        let rel_str = rel
            .to_str()
            .context("non-UTF-8 path in staging directory")?
            .replace('\\', "/");
        if rel_str == "checksums.txt" || rel_str == "manifest.json" {
            continue;
        }
        let digest = sha256_file(entry.path())?;
        checksums.insert(rel_str, digest);
    }
    Ok(checksums)
}

/// Render the map in the on-disk `checksums.txt` format: two spaces between
/// hash and path, sorted by path, LF endings.
pub fn render_checksums(checksums: &BTreeMap<String, String>) -> String {
    let mut out = String::new();
    for (path, digest) in checksums {
        out.push_str(digest);
        out.push_str("  ");
        out.push_str(path);
        out.push('\n');
    }
    out
}

/// Parse `checksums.txt` content back into a map.
pub fn parse_checksums(content: &str) -> Result<BTreeMap<String, String>> {
    let mut map = BTreeMap::new();
    for (number, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let (digest, path) = line
            .split_once("  ")
            .with_context(|| format!("malformed checksum line {}", number + 1))?;
        map.insert(path.to_string(), digest.to_string());
    }
    Ok(map)
}
