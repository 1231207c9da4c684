//! Collection helpers shared by the native platform collectors.
//!
//! Dispatch on the spec kind lives here; the per-OS modules contribute
//! their command tables and anything genuinely platform-specific.

use std::fs;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde_json::json;
use sysinfo::{CpuExt, System, SystemExt};
use walkdir::WalkDir;

use crate::catalogue::spec::{ArtifactKind, ArtifactSpec};
use crate::models::{
    ArtifactData, ArtifactResult, ArtifactStatus, CollectError, ErrorKind, SkipReason,
};

use super::command::{run_command, split_args, CommandOutcome};
use super::CollectContext;

/// Upper bound on entries emitted by a metadata listing.
const METADATA_ENTRY_CAP: usize = 10_000;
/// Directory recursion depth for metadata listings.
const METADATA_MAX_DEPTH: usize = 3;

/// Execute one spec using the shared kind dispatch. `tag` names the
/// collector variant in the produced result.
pub async fn collect_native(
    spec: &ArtifactSpec,
    ctx: &CollectContext,
    tag: &'static str,
) -> ArtifactResult {
    let started_at = ctx.clock.now();

    if spec.network && !ctx.allow_network {
        return ArtifactResult::skipped(
            spec.clone(),
            SkipReason::NetworkDisallowed,
            started_at,
            tag,
        );
    }

    match spec.kind {
        ArtifactKind::Command => collect_command_artifact(spec, ctx, tag, started_at).await,
        ArtifactKind::File => collect_file_artifact(spec, ctx, tag, started_at),
        ArtifactKind::Metadata => collect_metadata_artifact(spec, ctx, tag, started_at),
        ArtifactKind::Dump => ArtifactResult::outcome(
            spec.clone(),
            ArtifactStatus::NotAvailable,
            started_at,
            ctx.clock.now(),
            tag,
            Some(CollectError::new(
                ErrorKind::NotAvailable,
                "memory acquisition is not available on this build",
            )),
        ),
        // Registry artifacts only exist on Windows; the Windows collector
        // overrides this arm before delegating here.
        ArtifactKind::Registry | ArtifactKind::Hive => ArtifactResult::skipped(
            spec.clone(),
            SkipReason::PlatformMismatch,
            started_at,
            tag,
        ),
    }
}

/// `command` kind: run the utility named in the parameters and capture
/// both output streams.
pub async fn collect_command_artifact(
    spec: &ArtifactSpec,
    ctx: &CollectContext,
    tag: &'static str,
    started_at: DateTime<Utc>,
) -> ArtifactResult {
    let program = match spec.param("program") {
        Some(p) => p,
        None => {
            return ArtifactResult::outcome(
                spec.clone(),
                ArtifactStatus::Failed,
                started_at,
                ctx.clock.now(),
                tag,
                Some(CollectError::new(
                    ErrorKind::CollectorFailed,
                    "command spec is missing the 'program' parameter",
                )),
            );
        }
    };
    let args_param = spec.param("args").unwrap_or("");
    let args = split_args(args_param);
    let optional = spec.param("optional") == Some("true");
    let source = format!("{} {}", program, args_param);

    match run_command(program, &args, ctx).await {
        CommandOutcome::Captured {
            stdout,
            stderr,
            exit_code,
        } => {
            let produced_output = !stdout.is_empty();
            if exit_code != Some(0) && !produced_output {
                let message = String::from_utf8_lossy(&stderr).trim().to_string();
                return ArtifactResult::outcome(
                    spec.clone(),
                    ArtifactStatus::Failed,
                    started_at,
                    ctx.clock.now(),
                    tag,
                    Some(CollectError::new(
                        ErrorKind::CollectorFailed,
                        format!(
                            "{} exited with {:?}: {}",
                            program, exit_code, message
                        ),
                    )),
                );
            }
            let mut text = String::from_utf8_lossy(&stdout).into_owned();
            if !stderr.is_empty() {
                text.push_str("\n--- stderr ---\n");
                text.push_str(&String::from_utf8_lossy(&stderr));
            }
            ArtifactResult::success(
                spec.clone(),
                ArtifactData::Text(text),
                started_at,
                ctx.clock.now(),
                tag,
                &source,
            )
        }
        CommandOutcome::TimedOut => ArtifactResult::outcome(
            spec.clone(),
            ArtifactStatus::Cancelled,
            started_at,
            ctx.clock.now(),
            tag,
            Some(CollectError::new(
                ErrorKind::CollectorTimeout,
                format!("{} exceeded its deadline and was killed", program),
            )),
        ),
        CommandOutcome::Cancelled => ArtifactResult::outcome(
            spec.clone(),
            ArtifactStatus::Cancelled,
            started_at,
            ctx.clock.now(),
            tag,
            None,
        ),
        CommandOutcome::NotFound(name) => {
            let status = if optional {
                ArtifactStatus::NotAvailable
            } else {
                ArtifactStatus::Failed
            };
            let kind = if optional {
                ErrorKind::NotAvailable
            } else {
                ErrorKind::CollectorFailed
            };
            ArtifactResult::outcome(
                spec.clone(),
                status,
                started_at,
                ctx.clock.now(),
                tag,
                Some(CollectError::new(kind, format!("{} not found on host", name))),
            )
        }
        CommandOutcome::PermissionDenied(message) => ArtifactResult::outcome(
            spec.clone(),
            ArtifactStatus::Failed,
            started_at,
            ctx.clock.now(),
            tag,
            Some(CollectError::new(ErrorKind::Permission, message)),
        ),
        CommandOutcome::SpawnFailed(message) => ArtifactResult::outcome(
            spec.clone(),
            ArtifactStatus::Failed,
            started_at,
            ctx.clock.now(),
            tag,
            Some(CollectError::new(ErrorKind::CollectorFailed, message)),
        ),
    }
}

/// `file` kind: read the file(s) named in the parameters, tailing anything
/// over the log-size cap. Alternates that do not exist are skipped; the
/// artifact fails only when nothing was readable.
pub fn collect_file_artifact(
    spec: &ArtifactSpec,
    ctx: &CollectContext,
    tag: &'static str,
    started_at: DateTime<Utc>,
) -> ArtifactResult {
    let paths = spec_paths(spec);
    if paths.is_empty() {
        return ArtifactResult::outcome(
            spec.clone(),
            ArtifactStatus::Failed,
            started_at,
            ctx.clock.now(),
            tag,
            Some(CollectError::new(
                ErrorKind::CollectorFailed,
                "file spec names no 'path' or 'paths' parameter",
            )),
        );
    }

    let mut text = String::new();
    let mut any_read = false;
    let mut truncated = false;
    let mut permission_denied = false;

    for path in &paths {
        let path = Path::new(path);
        let files = if path.is_dir() {
            regular_files_in(path)
        } else {
            vec![path.to_path_buf()]
        };
        for file in files {
            match read_file_tail(&file, ctx.max_log_size) {
                Ok((bytes, was_truncated)) => {
                    any_read = true;
                    truncated |= was_truncated;
                    text.push_str(&format!("### {} ###\n", file.display()));
                    text.push_str(&String::from_utf8_lossy(&bytes));
                    if !text.ends_with('\n') {
                        text.push('\n');
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    debug!("Skipping absent file {}", file.display());
                }
                Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                    warn!("Permission denied reading {}", file.display());
                    permission_denied = true;
                }
                Err(e) => {
                    warn!("Failed to read {}: {}", file.display(), e);
                }
            }
        }
    }

    if !any_read {
        let (status, kind, message) = if permission_denied {
            (
                ArtifactStatus::Failed,
                ErrorKind::Permission,
                "permission denied for all candidate files",
            )
        } else {
            (
                ArtifactStatus::NotAvailable,
                ErrorKind::NotAvailable,
                "no candidate file exists on this host",
            )
        };
        return ArtifactResult::outcome(
            spec.clone(),
            status,
            started_at,
            ctx.clock.now(),
            tag,
            Some(CollectError::new(kind, message)),
        );
    }

    let source = paths.join(";");
    let mut result = ArtifactResult::success(
        spec.clone(),
        ArtifactData::Text(text),
        started_at,
        ctx.clock.now(),
        tag,
        &source,
    );
    result.truncated = truncated;
    result
}

/// `metadata` kind: either the sysinfo host profile or a stat listing of
/// the directories named in the parameters.
pub fn collect_metadata_artifact(
    spec: &ArtifactSpec,
    ctx: &CollectContext,
    tag: &'static str,
    started_at: DateTime<Utc>,
) -> ArtifactResult {
    if spec.param("source") == Some("sysinfo") {
        let profile = host_profile_value();
        return ArtifactResult::success(
            spec.clone(),
            ArtifactData::Structured(profile),
            started_at,
            ctx.clock.now(),
            tag,
            "sysinfo",
        );
    }

    let paths = spec_paths(spec);
    if paths.is_empty() {
        return ArtifactResult::outcome(
            spec.clone(),
            ArtifactStatus::Failed,
            started_at,
            ctx.clock.now(),
            tag,
            Some(CollectError::new(
                ErrorKind::CollectorFailed,
                "metadata spec names no 'paths' parameter",
            )),
        );
    }

    let mut entries = Vec::new();
    for root in &paths {
        for entry in WalkDir::new(root)
            .max_depth(METADATA_MAX_DEPTH)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if entries.len() >= METADATA_ENTRY_CAP {
                break;
            }
            let meta = match entry.metadata() {
                Ok(m) => m,
                Err(_) => continue,
            };
            let modified = meta
                .modified()
                .ok()
                .map(|t| DateTime::<Utc>::from(t).to_rfc3339());
            entries.push(json!({
                "path": entry.path().to_string_lossy(),
                "size": meta.len(),
                "is_dir": meta.is_dir(),
                "modified": modified,
            }));
        }
    }

    ArtifactResult::success(
        spec.clone(),
        ArtifactData::Structured(json!({ "entries": entries })),
        started_at,
        ctx.clock.now(),
        tag,
        &paths.join(";"),
    )
}

/// Hostname, OS and CPU summary used by the `host_profile` artifact.
pub fn host_profile_value() -> serde_json::Value {
    let mut system = System::new();
    system.refresh_cpu();
    system.refresh_memory();
    json!({
        "hostname": system.host_name(),
        "os_name": system.name(),
        "os_version": system.os_version(),
        "kernel_version": system.kernel_version(),
        "cpu_count": system.cpus().len(),
        "cpu_brand": system.cpus().first().map(|c| c.brand().to_string()),
        "total_memory_kb": system.total_memory(),
    })
}

/// Read a file, keeping only the last `cap` bytes when it is larger.
pub fn read_file_tail(path: &Path, cap: u64) -> std::io::Result<(Vec<u8>, bool)> {
    let mut file = fs::File::open(path)?;
    let len = file.metadata()?.len();
    if len <= cap {
        let mut bytes = Vec::with_capacity(len as usize);
        file.read_to_end(&mut bytes)?;
        return Ok((bytes, false));
    }
    file.seek(SeekFrom::Start(len - cap))?;
    let mut bytes = Vec::with_capacity(cap as usize);
    file.read_to_end(&mut bytes)?;
    Ok((bytes, true))
}

fn regular_files_in(dir: &Path) -> Vec<std::path::PathBuf> {
    let mut files: Vec<_> = fs::read_dir(dir)
        .into_iter()
        .flatten()
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .collect();
    files.sort();
    files
}

fn spec_paths(spec: &ArtifactSpec) -> Vec<String> {
    if let Some(path) = spec.param("path") {
        return vec![path.to_string()];
    }
    spec.param("paths")
        .map(|p| {
            p.split(';')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalogue::spec::{ArtifactCategory, ArtifactKind};
    use crate::collectors::tests::test_context;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_read_file_tail_truncates_to_cap() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("big.log");
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(&vec![b'x'; 100]).unwrap();
        file.write_all(b"TAIL").unwrap();

        let (bytes, truncated) = read_file_tail(&path, 4).unwrap();
        assert!(truncated);
        assert_eq!(bytes, b"TAIL");

        let (bytes, truncated) = read_file_tail(&path, 10_000).unwrap();
        assert!(!truncated);
        assert_eq!(bytes.len(), 104);
    }

    #[tokio::test]
    async fn test_file_artifact_records_truncation() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("auth.log");
        fs::write(&path, vec![b'y'; 2048]).unwrap();

        let spec = ArtifactSpec::command("auth_log", "test")
            .with_kind(ArtifactKind::File)
            .with_category(ArtifactCategory::Logs)
            .with_param("path", path.to_str().unwrap());
        let mut ctx = test_context();
        ctx.max_log_size = 512;

        let result = collect_native(&spec, &ctx, "test").await;
        assert_eq!(result.status, ArtifactStatus::Success);
        assert!(result.truncated);
        assert_eq!(result.size, result.data.encode().len() as u64);
    }

    #[tokio::test]
    async fn test_file_artifact_missing_all_is_not_available() {
        let spec = ArtifactSpec::command("ghost_log", "test")
            .with_kind(ArtifactKind::File)
            .with_param("paths", "/nonexistent/a;/nonexistent/b");
        let ctx = test_context();
        let result = collect_native(&spec, &ctx, "test").await;
        assert_eq!(result.status, ArtifactStatus::NotAvailable);
        assert_eq!(result.error.as_ref().unwrap().kind, ErrorKind::NotAvailable);
    }

    #[tokio::test]
    async fn test_metadata_listing_is_sorted_and_structured() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("b.txt"), b"b").unwrap();
        fs::write(dir.path().join("a.txt"), b"a").unwrap();

        let spec = ArtifactSpec::command("tmp_listing", "test")
            .with_kind(ArtifactKind::Metadata)
            .with_param("paths", dir.path().to_str().unwrap());
        let ctx = test_context();
        let result = collect_native(&spec, &ctx, "test").await;
        assert_eq!(result.status, ArtifactStatus::Success);

        if let ArtifactData::Structured(value) = &result.data {
            let entries = value["entries"].as_array().unwrap();
            // root dir + two files, sorted by file name within the walk
            assert_eq!(entries.len(), 3);
            let paths: Vec<&str> =
                entries.iter().map(|e| e["path"].as_str().unwrap()).collect();
            assert!(paths[1].ends_with("a.txt"));
            assert!(paths[2].ends_with("b.txt"));
        } else {
            panic!("metadata artifact should be structured");
        }
    }

    #[tokio::test]
    async fn test_host_profile_artifact() {
        let spec = ArtifactSpec::command("host_profile", "test")
            .with_kind(ArtifactKind::Metadata)
            .with_param("source", "sysinfo");
        let ctx = test_context();
        let result = collect_native(&spec, &ctx, "test").await;
        assert_eq!(result.status, ArtifactStatus::Success);
        assert_eq!(result.data.extension(), "json");
        assert_eq!(result.source, "sysinfo");
    }

    #[tokio::test]
    async fn test_dump_kind_reports_not_available() {
        let spec = ArtifactSpec::command("memory_image", "test").with_kind(ArtifactKind::Dump);
        let ctx = test_context();
        let result = collect_native(&spec, &ctx, "test").await;
        assert_eq!(result.status, ArtifactStatus::NotAvailable);
    }

    #[tokio::test]
    async fn test_network_gate_skips() {
        let spec = ArtifactSpec::command("dns_probe", "test").uses_network();
        let ctx = test_context();
        let result = collect_native(&spec, &ctx, "test").await;
        assert_eq!(result.status, ArtifactStatus::Skipped);
        assert_eq!(result.skip_reason, Some(SkipReason::NetworkDisallowed));
    }

    #[tokio::test]
    async fn test_command_artifact_success() {
        let spec = ArtifactSpec::command("echo_test", "test")
            .with_param("program", "echo")
            .with_param("args", "hello world");
        let ctx = test_context();
        let result = collect_native(&spec, &ctx, "test").await;
        assert_eq!(result.status, ArtifactStatus::Success);
        assert!(result.data.as_text().contains("hello world"));
        assert!(!result.checksum.is_empty());
    }

    #[tokio::test]
    async fn test_optional_missing_tool_is_not_available() {
        let spec = ArtifactSpec::command("fancy_tool", "test")
            .with_param("program", "definitely-not-a-real-tool-xyz")
            .with_param("optional", "true");
        let ctx = test_context();
        let result = collect_native(&spec, &ctx, "test").await;
        assert_eq!(result.status, ArtifactStatus::NotAvailable);
    }

    #[tokio::test]
    async fn test_required_missing_tool_is_failed() {
        let spec = ArtifactSpec::command("fancy_tool", "test")
            .with_param("program", "definitely-not-a-real-tool-xyz");
        let ctx = test_context();
        let result = collect_native(&spec, &ctx, "test").await;
        assert_eq!(result.status, ArtifactStatus::Failed);
        assert_eq!(
            result.error.as_ref().unwrap().kind,
            ErrorKind::CollectorFailed
        );
    }
}
