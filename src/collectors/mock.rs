//! Deterministic mock collector.
//!
//! Produces synthesized, clearly non-host payloads for a fixed spec set.
//! The test suite scripts per-artifact delays, payload overrides and
//! failures through the builder methods; unsupported platforms use it
//! as-is so the pipeline stays total.

use std::collections::HashMap;
use std::time::Duration;

use serde_json::json;

use crate::catalogue::spec::{ArtifactKind, ArtifactSpec, Platform};
use crate::models::{
    ArtifactData, ArtifactResult, ArtifactStatus, CollectError, ErrorKind, SkipReason,
};

use super::{CollectContext, PlatformCollector};

pub struct MockCollector {
    delays: HashMap<String, Duration>,
    failures: HashMap<String, ErrorKind>,
    payloads: HashMap<String, ArtifactData>,
}

impl MockCollector {
    pub fn new() -> Self {
        MockCollector {
            delays: HashMap::new(),
            failures: HashMap::new(),
            payloads: HashMap::new(),
        }
    }

    /// Sleep this long before producing the named artifact.
    pub fn with_delay(mut self, name: &str, delay: Duration) -> Self {
        self.delays.insert(name.to_string(), delay);
        self
    }

    /// Script the named artifact to fail with the given kind.
    pub fn with_failure(mut self, name: &str, kind: ErrorKind) -> Self {
        self.failures.insert(name.to_string(), kind);
        self
    }

    /// Override the synthesized payload for the named artifact.
    pub fn with_payload(mut self, name: &str, data: ArtifactData) -> Self {
        self.payloads.insert(name.to_string(), data);
        self
    }

    fn synthesize(&self, spec: &ArtifactSpec) -> ArtifactData {
        if let Some(data) = self.payloads.get(&spec.name) {
            return data.clone();
        }
        match spec.name.as_str() {
            "host_profile" => ArtifactData::Structured(json!({
                "hostname": "mock-host",
                "os_name": "MockOS",
                "os_version": "1.0",
                "kernel_version": "0.0.0-mock",
                "cpu_count": 4,
            })),
            "running_processes" => ArtifactData::Text(
                "PID   USER   COMMAND\n\
                 1     root   /sbin/init\n\
                 212   root   /usr/sbin/sshd -D\n\
                 530   web    /usr/sbin/nginx -g daemon off;\n"
                    .to_string(),
            ),
            "network_connections" => ArtifactData::Text(
                "Proto Local            Peer             State\n\
                 tcp   0.0.0.0:22       0.0.0.0:0        LISTEN\n\
                 tcp   127.0.0.1:5432   0.0.0.0:0        LISTEN\n"
                    .to_string(),
            ),
            "auth_log" => ArtifactData::Text(
                "Jan 15 14:01:02 mock-host sshd[212]: Accepted publickey for admin\n\
                 Jan 15 14:02:10 mock-host sudo: admin : TTY=pts/0 ; COMMAND=/bin/ls\n"
                    .to_string(),
            ),
            _ => match spec.kind {
                ArtifactKind::Metadata => ArtifactData::Structured(json!({
                    "entries": [
                        { "path": "/mock/a", "size": 64, "is_dir": false },
                        { "path": "/mock/b", "size": 128, "is_dir": false },
                    ]
                })),
                _ => ArtifactData::Text(format!("synthesized payload for {}\n", spec.name)),
            },
        }
    }
}

impl Default for MockCollector {
    fn default() -> Self {
        MockCollector::new()
    }
}

#[async_trait::async_trait]
impl PlatformCollector for MockCollector {
    async fn collect(&self, spec: &ArtifactSpec, ctx: &CollectContext) -> ArtifactResult {
        let started_at = ctx.clock.now();

        if spec.network && !ctx.allow_network {
            return ArtifactResult::skipped(
                spec.clone(),
                SkipReason::NetworkDisallowed,
                started_at,
                self.name(),
            );
        }

        if let Some(delay) = self.delays.get(&spec.name) {
            let remaining = ctx.remaining();
            if *delay >= remaining {
                // honour whichever bound fires first, like a real child kill
                tokio::select! {
                    _ = tokio::time::sleep(remaining) => {}
                    _ = ctx.cancel.cancelled() => {}
                }
                return ArtifactResult::outcome(
                    spec.clone(),
                    ArtifactStatus::Cancelled,
                    started_at,
                    ctx.clock.now(),
                    self.name(),
                    Some(CollectError::new(
                        ErrorKind::CollectorTimeout,
                        format!("{} exceeded its deadline", spec.name),
                    )),
                );
            }
            tokio::select! {
                _ = tokio::time::sleep(*delay) => {}
                _ = ctx.cancel.cancelled() => {
                    return ArtifactResult::outcome(
                        spec.clone(),
                        ArtifactStatus::Cancelled,
                        started_at,
                        ctx.clock.now(),
                        self.name(),
                        None,
                    );
                }
            }
        }

        if let Some(kind) = self.failures.get(&spec.name) {
            let status = match kind {
                ErrorKind::NotAvailable => ArtifactStatus::NotAvailable,
                ErrorKind::CollectorTimeout => ArtifactStatus::Cancelled,
                _ => ArtifactStatus::Failed,
            };
            return ArtifactResult::outcome(
                spec.clone(),
                status,
                started_at,
                ctx.clock.now(),
                self.name(),
                Some(CollectError::new(
                    *kind,
                    format!("scripted {} for {}", kind, spec.name),
                )),
            );
        }

        if spec.kind == ArtifactKind::Dump {
            return ArtifactResult::outcome(
                spec.clone(),
                ArtifactStatus::NotAvailable,
                started_at,
                ctx.clock.now(),
                self.name(),
                Some(CollectError::new(
                    ErrorKind::NotAvailable,
                    "mock collector does not synthesize dumps",
                )),
            );
        }

        let data = self.synthesize(spec);
        ArtifactResult::success(
            spec.clone(),
            data,
            started_at,
            ctx.clock.now(),
            self.name(),
            "synthesized",
        )
    }

    fn platform(&self) -> Platform {
        Platform::Any
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalogue::builtin::mock_specs;
    use crate::collectors::tests::test_context;
    use std::time::Instant;

    fn spec(name: &str) -> ArtifactSpec {
        mock_specs()
            .into_iter()
            .find(|s| s.name == name)
            .unwrap_or_else(|| ArtifactSpec::command(name, "ad-hoc"))
    }

    #[tokio::test]
    async fn test_payloads_are_deterministic() {
        let collector = MockCollector::new();
        let ctx = test_context();
        let first = collector.collect(&spec("running_processes"), &ctx).await;
        let second = collector.collect(&spec("running_processes"), &ctx).await;
        assert_eq!(first.checksum, second.checksum);
        assert_eq!(first.status, ArtifactStatus::Success);
        assert_eq!(first.size, first.data.encode().len() as u64);
    }

    #[tokio::test]
    async fn test_structured_payload_for_host_profile() {
        let collector = MockCollector::new();
        let result = collector.collect(&spec("host_profile"), &test_context()).await;
        assert_eq!(result.data.extension(), "json");
        assert!(result.data.as_text().contains("mock-host"));
    }

    #[tokio::test]
    async fn test_scripted_failure() {
        let collector =
            MockCollector::new().with_failure("auth_log", ErrorKind::CollectorFailed);
        let result = collector.collect(&spec("auth_log"), &test_context()).await;
        assert_eq!(result.status, ArtifactStatus::Failed);
        assert!(result.error.is_some());
    }

    #[tokio::test]
    async fn test_delay_past_deadline_cancels() {
        let collector =
            MockCollector::new().with_delay("slow_cmd", Duration::from_millis(500));
        let mut ctx = test_context();
        ctx.deadline = Instant::now() + Duration::from_millis(100);

        let started = Instant::now();
        let result = collector.collect(&spec("slow_cmd"), &ctx).await;
        assert_eq!(result.status, ArtifactStatus::Cancelled);
        assert_eq!(
            result.error.as_ref().unwrap().kind,
            ErrorKind::CollectorTimeout
        );
        assert!(started.elapsed() < Duration::from_millis(400));
    }

    #[tokio::test]
    async fn test_payload_override() {
        let collector = MockCollector::new().with_payload(
            "network_connections",
            ArtifactData::Text("tcp 10.0.0.5:4444 ESTABLISHED\n".to_string()),
        );
        let result = collector
            .collect(&spec("network_connections"), &test_context())
            .await;
        assert!(result.data.as_text().contains(":4444"));
    }
}
