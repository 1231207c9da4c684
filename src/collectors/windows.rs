//! Windows platform collector.
//!
//! Command, file and metadata kinds go through the shared dispatch;
//! registry enumeration uses `winreg` directly and hive copies fall back
//! to reading the hive files (shadow-copy access needs privileges the
//! tool does not escalate to).

use log::{info, warn};
use serde_json::json;
use winreg::enums::{HKEY_CURRENT_USER, HKEY_LOCAL_MACHINE, HKEY_USERS};
use winreg::RegKey;

use crate::catalogue::spec::{ArtifactKind, ArtifactSpec, Platform};
use crate::config::CoreConfig;
use crate::models::{
    ArtifactData, ArtifactResult, ArtifactStatus, CollectError, ErrorKind,
};

use super::common;
use super::{CollectContext, PlatformCollector};

pub struct WindowsCollector {
    max_log_size: u64,
}

impl WindowsCollector {
    pub fn new(config: &CoreConfig) -> Self {
        info!("Initializing Windows collector");
        WindowsCollector {
            max_log_size: config.max_log_size,
        }
    }

    fn collect_registry(&self, spec: &ArtifactSpec, ctx: &CollectContext) -> ArtifactResult {
        let started_at = ctx.clock.now();
        let keys = match spec.param("keys") {
            Some(keys) => keys,
            None => {
                return ArtifactResult::outcome(
                    spec.clone(),
                    ArtifactStatus::Failed,
                    started_at,
                    ctx.clock.now(),
                    self.name(),
                    Some(CollectError::new(
                        ErrorKind::CollectorFailed,
                        "registry spec names no 'keys' parameter",
                    )),
                );
            }
        };

        let mut dump = Vec::new();
        let mut errors = Vec::new();
        for key_path in keys.split(';').map(str::trim).filter(|k| !k.is_empty()) {
            match enumerate_key(key_path) {
                Ok(values) => dump.push(json!({ "key": key_path, "values": values })),
                Err(e) => {
                    warn!("Failed to enumerate {}: {}", key_path, e);
                    errors.push(format!("{}: {}", key_path, e));
                }
            }
        }

        if dump.is_empty() {
            return ArtifactResult::outcome(
                spec.clone(),
                ArtifactStatus::Failed,
                started_at,
                ctx.clock.now(),
                self.name(),
                Some(CollectError::new(
                    ErrorKind::CollectorFailed,
                    errors.join("; "),
                )),
            );
        }

        ArtifactResult::success(
            spec.clone(),
            ArtifactData::Structured(json!({ "keys": dump, "errors": errors })),
            started_at,
            ctx.clock.now(),
            self.name(),
            keys,
        )
    }
}

#[async_trait::async_trait]
impl PlatformCollector for WindowsCollector {
    async fn collect(&self, spec: &ArtifactSpec, ctx: &CollectContext) -> ArtifactResult {
        debug_assert!(self.max_log_size > 0);
        match spec.kind {
            ArtifactKind::Registry => self.collect_registry(spec, ctx),
            // Hive files are locked while Windows runs; reading them raw
            // works for the backup copies named in the catalogue and the
            // file dispatch already reports permission failures as data.
            ArtifactKind::Hive => {
                let mut file_spec = spec.clone();
                file_spec.kind = ArtifactKind::File;
                common::collect_native(&file_spec, ctx, "windows").await
            }
            _ => common::collect_native(spec, ctx, "windows").await,
        }
    }

    fn platform(&self) -> Platform {
        Platform::Windows
    }

    fn name(&self) -> &'static str {
        "windows"
    }
}

/// Enumerate one registry key's values as name/value string pairs.
fn enumerate_key(path: &str) -> anyhow::Result<Vec<serde_json::Value>> {
    let (hive, rest) = path
        .split_once('\\')
        .ok_or_else(|| anyhow::anyhow!("registry path has no hive prefix: {}", path))?;
    let root = match hive.to_ascii_uppercase().as_str() {
        "HKLM" | "HKEY_LOCAL_MACHINE" => RegKey::predef(HKEY_LOCAL_MACHINE),
        "HKCU" | "HKEY_CURRENT_USER" => RegKey::predef(HKEY_CURRENT_USER),
        "HKU" | "HKEY_USERS" => RegKey::predef(HKEY_USERS),
        other => anyhow::bail!("unsupported hive: {}", other),
    };
    let key = root.open_subkey(rest)?;
    let mut values = Vec::new();
    for item in key.enum_values() {
        let (name, value) = item?;
        values.push(json!({ "name": name, "value": format!("{}", value) }));
    }
    Ok(values)
}
