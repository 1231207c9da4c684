//! Linux platform collector.
//!
//! Most of the work is the shared kind dispatch in [`super::common`]; the
//! Linux variant adds a root-privilege probe so operators know up front
//! when system files will be unreadable.

use log::{info, warn};

use crate::catalogue::spec::{ArtifactKind, ArtifactSpec, Platform};
use crate::config::CoreConfig;
use crate::models::ArtifactResult;

use super::common;
use super::{CollectContext, PlatformCollector};

pub struct LinuxCollector {
    max_log_size: u64,
}

impl LinuxCollector {
    pub fn new(config: &CoreConfig) -> Self {
        info!("Initializing Linux collector");
        if !is_root() {
            warn!("Not running as root; some system files may be unreadable");
        }
        LinuxCollector {
            max_log_size: config.max_log_size,
        }
    }
}

#[async_trait::async_trait]
impl PlatformCollector for LinuxCollector {
    async fn collect(&self, spec: &ArtifactSpec, ctx: &CollectContext) -> ArtifactResult {
        debug_assert!(self.max_log_size > 0);
        // Registry kinds never select for Linux, but a hand-built catalogue
        // may still route one here; the shared dispatch maps it to a
        // platform-mismatch skip.
        if matches!(spec.kind, ArtifactKind::Registry | ArtifactKind::Hive) {
            warn!(
                "Registry artifact {} routed to the Linux collector",
                spec.name
            );
        }
        common::collect_native(spec, ctx, "linux").await
    }

    fn platform(&self) -> Platform {
        Platform::Linux
    }

    fn name(&self) -> &'static str {
        "linux"
    }
}

fn is_root() -> bool {
    std::fs::metadata("/proc/self")
        .map(|m| {
            use std::os::unix::fs::MetadataExt;
            m.uid() == 0
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalogue::spec::ArtifactKind;
    use crate::collectors::tests::test_context;
    use crate::models::{ArtifactStatus, SkipReason};

    #[tokio::test]
    async fn test_registry_spec_skipped_as_platform_mismatch() {
        let collector = LinuxCollector::new(&CoreConfig::default());
        let spec = ArtifactSpec::command("run_keys", "test")
            .with_kind(ArtifactKind::Registry)
            .with_param("keys", "HKLM\\Software");
        let result = collector.collect(&spec, &test_context()).await;
        assert_eq!(result.status, ArtifactStatus::Skipped);
        assert_eq!(result.skip_reason, Some(SkipReason::PlatformMismatch));
        assert_eq!(result.collector, "linux");
    }

    #[tokio::test]
    async fn test_command_spec_runs() {
        let collector = LinuxCollector::new(&CoreConfig::default());
        let spec = ArtifactSpec::command("uname_info", "test")
            .with_param("program", "uname")
            .with_param("args", "-a");
        let result = collector.collect(&spec, &test_context()).await;
        assert_eq!(result.status, ArtifactStatus::Success);
        assert!(!result.data.as_text().is_empty());
    }
}
