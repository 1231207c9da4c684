//! Platform collectors: given one [`ArtifactSpec`], produce one
//! [`ArtifactResult`].
//!
//! Each platform implements the same narrow contract behind
//! [`PlatformCollector`]; a factory keyed on the runtime OS picks the
//! variant. The deterministic [`mock::MockCollector`] keeps the pipeline
//! total on unsupported platforms and in tests.

pub mod common;
pub mod command;
#[cfg(unix)]
pub mod linux;
pub mod mock;
#[cfg(target_os = "windows")]
pub mod windows;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::info;

use crate::catalogue::spec::{ArtifactSpec, Platform};
use crate::config::CoreConfig;
use crate::engine::cancel::CancelToken;
use crate::models::ArtifactResult;
use crate::utils::clock::Clock;

/// Everything a collector needs for one execution: a deadline, the shared
/// cancellation signal, the network gate, and a staging directory it may
/// write scratch files under. Collectors never touch the host outside it.
pub struct CollectContext {
    pub deadline: Instant,
    pub cancel: CancelToken,
    pub allow_network: bool,
    pub staging_dir: PathBuf,
    pub max_log_size: u64,
    pub clock: Arc<dyn Clock>,
}

impl CollectContext {
    /// Wall time left before the per-spec deadline, zero if expired.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Contract every platform variant implements.
#[async_trait::async_trait]
pub trait PlatformCollector: Send + Sync {
    /// Execute one spec. Failures are encoded in the returned result,
    /// never raised: the engine treats every outcome as data.
    async fn collect(&self, spec: &ArtifactSpec, ctx: &CollectContext) -> ArtifactResult;

    /// Platform this collector serves; drives catalogue selection.
    fn platform(&self) -> Platform;

    /// Tag recorded in results, e.g. "linux" or "mock".
    fn name(&self) -> &'static str;
}

/// Collector for the current OS, falling back to the mock variant on
/// platforms without a native implementation.
pub fn collector_for_host(config: &CoreConfig) -> Arc<dyn PlatformCollector> {
    #[cfg(target_os = "windows")]
    {
        info!("Using Windows collector");
        Arc::new(windows::WindowsCollector::new(config))
    }
    #[cfg(target_os = "linux")]
    {
        info!("Using Linux collector");
        Arc::new(linux::LinuxCollector::new(config))
    }
    #[cfg(not(any(target_os = "windows", target_os = "linux")))]
    {
        let _ = config;
        info!("No native collector for this platform, using mock collector");
        Arc::new(mock::MockCollector::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::clock::FixedClock;

    pub(crate) fn test_context() -> CollectContext {
        CollectContext {
            deadline: Instant::now() + Duration::from_secs(30),
            cancel: CancelToken::new(),
            allow_network: false,
            staging_dir: std::env::temp_dir(),
            max_log_size: 10 * 1024 * 1024,
            clock: Arc::new(FixedClock::epoch_2024()),
        }
    }

    #[test]
    fn test_factory_returns_native_or_mock() {
        let collector = collector_for_host(&CoreConfig::default());
        // whichever variant was chosen, it reports a concrete platform tag
        assert!(!collector.name().is_empty());
    }

    #[test]
    fn test_context_remaining_counts_down() {
        let ctx = test_context();
        assert!(ctx.remaining() <= Duration::from_secs(30));
        assert!(ctx.remaining() > Duration::from_secs(25));
    }
}
