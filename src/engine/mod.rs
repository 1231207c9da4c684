//! Collection engine: runs the artifacts a profile selects, in the order
//! the catalogue dictates, under global and per-artifact time bounds.
//!
//! Ordering is total and deterministic: every volatile spec finishes before
//! any non-volatile spec starts; non-volatile specs run by ascending
//! (priority, name) with dependency gating. Workers are independent tasks
//! bounded by a semaphore; results are merged and stable-sorted at
//! finalisation so completion order never leaks into the output.

pub mod cancel;

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use uuid::Uuid;

use crate::catalogue::spec::ArtifactSpec;
use crate::catalogue::Catalogue;
use crate::collectors::{CollectContext, PlatformCollector};
use crate::config::{CollectionProfile, CoreConfig, PriorityPolicy};
use crate::models::{
    ArtifactData, ArtifactResult, ArtifactStatus, CollectError, CollectionRun, ErrorKind,
    RunCounters, SkipReason,
};
use crate::security::redaction;
use crate::utils::clock::Clock;
use crate::utils::hash::sha256_bytes;
use cancel::CancelToken;

/// How long workers get to return after cancellation before they are
/// force-terminated and recorded as cancelled.
const DRAIN_WINDOW: Duration = Duration::from_secs(5);

/// Shared per-run environment cloned into every worker task.
#[derive(Clone)]
struct ExecEnv {
    collector: Arc<dyn PlatformCollector>,
    clock: Arc<dyn Clock>,
    cancel: CancelToken,
    allow_network: bool,
    max_log_size: u64,
    default_timeout: Duration,
    staging_dir: PathBuf,
}

pub struct CollectionEngine {
    collector: Arc<dyn PlatformCollector>,
    clock: Arc<dyn Clock>,
    config: CoreConfig,
    cancel: CancelToken,
    drain_window: Duration,
}

impl CollectionEngine {
    pub fn new(
        collector: Arc<dyn PlatformCollector>,
        clock: Arc<dyn Clock>,
        config: CoreConfig,
    ) -> Self {
        CollectionEngine {
            collector,
            clock,
            config,
            cancel: CancelToken::new(),
            drain_window: DRAIN_WINDOW,
        }
    }

    /// Token external callers may trip to cancel the run.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    #[cfg(test)]
    pub fn with_drain_window(mut self, window: Duration) -> Self {
        self.drain_window = window;
        self
    }

    /// Execute one run. Always returns a `CollectionRun`; failures live in
    /// the per-artifact results.
    pub async fn run(
        &self,
        catalogue: &Catalogue,
        profile: &CollectionProfile,
    ) -> CollectionRun {
        let run_id = short_run_id();
        let started_at = self.clock.now();
        let selected = catalogue.select(profile, self.collector.platform());
        info!(
            "Starting collection run {} with {} artifacts",
            run_id,
            selected.len()
        );

        let staging_dir = std::env::temp_dir().join(format!("triage-scratch-{}", run_id));
        if let Err(e) = std::fs::create_dir_all(&staging_dir) {
            warn!("Failed to create scratch directory: {}", e);
        }

        let env = ExecEnv {
            collector: Arc::clone(&self.collector),
            clock: Arc::clone(&self.clock),
            cancel: self.cancel.clone(),
            allow_network: profile.allow_network,
            max_log_size: self.config.max_log_size,
            default_timeout: self.config.default_timeout(),
            staging_dir: staging_dir.clone(),
        };

        // Profile-wide watchdog: on expiry every pending spec is cancelled.
        let watchdog = {
            let cancel = self.cancel.clone();
            let timeout = profile.timeout();
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                warn!("Profile timeout expired, cancelling run");
                cancel.cancel();
            })
        };

        let (volatile, non_volatile): (Vec<_>, Vec<_>) =
            selected.into_iter().partition(|s| s.volatile);

        let mut results: Vec<ArtifactResult> = Vec::new();
        let mut statuses: HashMap<String, ArtifactStatus> = HashMap::new();

        // Phase 1: volatile, strictly before anything else. VolatileFirst
        // runs specs one at a time; other policies batch within each
        // level. Dependency gating applies either way.
        let volatile_parallel = match profile.priority_policy {
            PriorityPolicy::VolatileFirst => 1,
            _ => profile.max_parallel,
        };
        self.run_phase(&env, volatile, volatile_parallel, &mut results, &mut statuses)
            .await;

        // Phase 2: non-volatile, by ascending priority.
        self.run_phase(
            &env,
            non_volatile,
            profile.max_parallel,
            &mut results,
            &mut statuses,
        )
        .await;

        watchdog.abort();
        if let Err(e) = std::fs::remove_dir_all(&staging_dir) {
            debug!("Failed to remove scratch directory: {}", e);
        }

        if self.config.redaction_enabled {
            redact_results(&mut results);
        }

        // Deterministic output order regardless of completion order.
        results.sort_by(|a, b| a.spec.order_key().cmp(&b.spec.order_key()));
        let counters = RunCounters::tally(&results);
        let finished_at = self.clock.now();
        info!(
            "Run {} finished: {} ok, {} failed, {} skipped, {} cancelled, {} unavailable",
            run_id,
            counters.succeeded,
            counters.failed,
            counters.skipped,
            counters.cancelled,
            counters.not_available
        );

        CollectionRun {
            run_id,
            started_at,
            finished_at,
            results,
            counters,
        }
    }

    /// Run one phase's specs (already in (priority, name) order): group
    /// them by priority level, then execute each level in dependency
    /// waves so a spec never starts before its dependencies resolved.
    async fn run_phase(
        &self,
        env: &ExecEnv,
        specs: Vec<ArtifactSpec>,
        max_parallel: usize,
        results: &mut Vec<ArtifactResult>,
        statuses: &mut HashMap<String, ArtifactStatus>,
    ) {
        let mut levels: Vec<(u8, Vec<ArtifactSpec>)> = Vec::new();
        for spec in specs {
            match levels.last_mut() {
                Some((priority, group)) if *priority == spec.priority => group.push(spec),
                _ => levels.push((spec.priority, vec![spec])),
            }
        }

        for (priority, specs) in levels {
            debug!("Scheduling priority {} level", priority);
            let mut pending = specs;
            while !pending.is_empty() {
                let pending_names: HashSet<String> =
                    pending.iter().map(|s| s.name.clone()).collect();
                let mut ready = Vec::new();
                let mut waiting = Vec::new();

                for spec in pending {
                    match dependency_state(&spec, statuses, &pending_names) {
                        DepState::Ready => ready.push(spec),
                        DepState::Waiting => waiting.push(spec),
                        DepState::Blocked => {
                            let result = ArtifactResult::skipped(
                                spec,
                                SkipReason::DependencyFailed,
                                self.clock.now(),
                                self.collector.name(),
                            );
                            statuses.insert(result.spec.name.clone(), result.status);
                            results.push(result);
                        }
                    }
                }

                if ready.is_empty() {
                    // Remaining specs wait on each other without any being
                    // runnable; catalogue validation rules this out, but
                    // never livelock on a hand-built selection.
                    for spec in waiting {
                        let result = ArtifactResult::skipped(
                            spec,
                            SkipReason::DependencyFailed,
                            self.clock.now(),
                            self.collector.name(),
                        );
                        statuses.insert(result.spec.name.clone(), result.status);
                        results.push(result);
                    }
                    break;
                }

                let batch = self.run_batch(env, ready, max_parallel).await;
                for result in batch {
                    statuses.insert(result.spec.name.clone(), result.status);
                    results.push(result);
                }
                pending = waiting;
            }
        }
    }

    /// Run one batch of independent specs with bounded concurrency,
    /// honouring the drain window after cancellation.
    async fn run_batch(
        &self,
        env: &ExecEnv,
        specs: Vec<ArtifactSpec>,
        max_parallel: usize,
    ) -> Vec<ArtifactResult> {
        if specs.is_empty() {
            return Vec::new();
        }

        // A width of one means strict in-order execution; cancellation
        // short-circuits the remaining specs inside execute_spec.
        if max_parallel <= 1 {
            let mut batch = Vec::with_capacity(specs.len());
            for spec in specs {
                batch.push(execute_spec(env.clone(), spec).await);
            }
            return batch;
        }

        let semaphore = Arc::new(Semaphore::new(max_parallel));
        let mut joinset: JoinSet<ArtifactResult> = JoinSet::new();
        let mut expected: Vec<ArtifactSpec> = Vec::with_capacity(specs.len());

        for spec in specs {
            expected.push(spec.clone());
            let env = env.clone();
            let semaphore = Arc::clone(&semaphore);
            joinset.spawn(async move {
                let _permit = semaphore.acquire().await;
                execute_spec(env, spec).await
            });
        }

        let mut batch = Vec::with_capacity(expected.len());
        let mut drain_deadline: Option<Instant> = None;
        loop {
            if drain_deadline.is_none() && env.cancel.is_cancelled() {
                drain_deadline = Some(Instant::now() + self.drain_window);
            }
            let joined = match drain_deadline {
                Some(deadline) => {
                    match tokio::time::timeout_at(deadline.into(), joinset.join_next()).await
                    {
                        Ok(joined) => joined,
                        Err(_) => {
                            warn!("Drain window expired, force-terminating stragglers");
                            joinset.abort_all();
                            while joinset.join_next().await.is_some() {}
                            break;
                        }
                    }
                }
                None => joinset.join_next().await,
            };
            match joined {
                Some(Ok(result)) => batch.push(result),
                Some(Err(e)) => warn!("Collector task aborted: {}", e),
                None => break,
            }
        }

        // Stragglers that never returned are recorded as cancelled.
        let done: HashSet<&str> = batch.iter().map(|r| r.spec.name.as_str()).collect();
        let missing: Vec<ArtifactSpec> = expected
            .into_iter()
            .filter(|s| !done.contains(s.name.as_str()))
            .collect();
        for spec in missing {
            let now = env.clock.now();
            batch.push(ArtifactResult::outcome(
                spec,
                ArtifactStatus::Cancelled,
                now,
                now,
                env.collector.name(),
                Some(CollectError::new(
                    ErrorKind::CollectorTimeout,
                    "worker did not return within the drain window",
                )),
            ));
        }
        batch
    }
}

enum DepState {
    Ready,
    Waiting,
    Blocked,
}

fn dependency_state(
    spec: &ArtifactSpec,
    statuses: &HashMap<String, ArtifactStatus>,
    pending_names: &HashSet<String>,
) -> DepState {
    let mut state = DepState::Ready;
    for dep in &spec.dependencies {
        match statuses.get(dep) {
            Some(ArtifactStatus::Success) => {}
            Some(_) => return DepState::Blocked,
            None if pending_names.contains(dep) => state = DepState::Waiting,
            // Dependency was never selected or sits in a later phase; it
            // can never succeed before this spec, so the spec is blocked.
            None => return DepState::Blocked,
        }
    }
    state
}

/// Execute one spec under its effective timeout. Cancellation observed
/// before the start short-circuits to a cancelled result.
async fn execute_spec(env: ExecEnv, spec: ArtifactSpec) -> ArtifactResult {
    if env.cancel.is_cancelled() {
        let now = env.clock.now();
        return ArtifactResult::outcome(
            spec,
            ArtifactStatus::Cancelled,
            now,
            now,
            env.collector.name(),
            None,
        );
    }

    let timeout = spec.effective_timeout(env.default_timeout);
    let started_at = env.clock.now();
    let ctx = CollectContext {
        deadline: Instant::now() + timeout,
        cancel: env.cancel.clone(),
        allow_network: env.allow_network,
        staging_dir: env.staging_dir.clone(),
        max_log_size: env.max_log_size,
        clock: Arc::clone(&env.clock),
    };

    debug!("Collecting artifact {}", spec.name);
    // The engine's own timeout backstops collectors that fail to honour
    // the context deadline.
    let grace = timeout + Duration::from_millis(250);
    match tokio::time::timeout(grace, env.collector.collect(&spec, &ctx)).await {
        Ok(result) => result,
        Err(_) => {
            warn!("Artifact {} overran its deadline", spec.name);
            ArtifactResult::outcome(
                spec,
                ArtifactStatus::Cancelled,
                started_at,
                env.clock.now(),
                env.collector.name(),
                Some(CollectError::new(
                    ErrorKind::CollectorTimeout,
                    "collector exceeded its deadline",
                )),
            )
        }
    }
}

/// Rewrite successful text artifacts with the built-in redaction
/// patterns, keeping size and checksum consistent with the new bytes.
fn redact_results(results: &mut [ArtifactResult]) {
    let rules = redaction::builtin_redactions();
    for result in results.iter_mut() {
        if result.status != ArtifactStatus::Success {
            continue;
        }
        if let ArtifactData::Text(text) = &result.data {
            let (redacted, hits) = redaction::apply(&rules, text);
            if hits > 0 {
                debug!("Redacted {} matches in {}", hits, result.spec.name);
                result.data = ArtifactData::Text(redacted);
                let encoded = result.data.encode();
                result.size = encoded.len() as u64;
                result.checksum = sha256_bytes(&encoded);
            }
        }
    }
}

fn short_run_id() -> String {
    let id = Uuid::new_v4().simple().to_string();
    id[..12].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collectors::mock::MockCollector;
    use crate::utils::clock::SystemClock;

    fn engine(collector: MockCollector) -> CollectionEngine {
        CollectionEngine::new(
            Arc::new(collector),
            Arc::new(SystemClock),
            CoreConfig::default(),
        )
    }

    fn spec(name: &str, priority: u8) -> ArtifactSpec {
        ArtifactSpec::command(name, "test").with_priority(priority)
    }

    #[tokio::test]
    async fn test_every_selected_spec_appears_exactly_once() {
        let catalogue = Catalogue::build(vec![
            spec("a", 1),
            spec("b", 2).volatile(),
            spec("c", 2),
            spec("d", 3).depends_on("a"),
        ])
        .unwrap();
        let run = engine(MockCollector::new())
            .run(&catalogue, &CollectionProfile::default())
            .await;

        assert_eq!(run.results.len(), 4);
        let mut names: Vec<&str> = run.results.iter().map(|r| r.name()).collect();
        names.dedup();
        assert_eq!(names.len(), 4);
        assert_eq!(run.counters.succeeded, 4);
    }

    #[tokio::test]
    async fn test_volatile_finishes_before_non_volatile_starts() {
        let catalogue = Catalogue::build(vec![
            spec("n1", 1),
            spec("v1", 2).volatile(),
        ])
        .unwrap();
        let run = engine(MockCollector::new())
            .run(&catalogue, &CollectionProfile::default())
            .await;

        let v1 = run.result("v1").unwrap();
        let n1 = run.result("n1").unwrap();
        assert!(v1.finished_at <= n1.started_at);
    }

    #[tokio::test]
    async fn test_dependency_failure_skips_dependents() {
        let catalogue = Catalogue::build(vec![
            spec("a", 1),
            spec("b", 2).depends_on("a"),
            spec("c", 3).depends_on("b"),
        ])
        .unwrap();
        let collector = MockCollector::new().with_failure("a", ErrorKind::CollectorFailed);
        let run = engine(collector)
            .run(&catalogue, &CollectionProfile::default())
            .await;

        assert_eq!(run.result("a").unwrap().status, ArtifactStatus::Failed);
        let b = run.result("b").unwrap();
        assert_eq!(b.status, ArtifactStatus::Skipped);
        assert_eq!(b.skip_reason, Some(SkipReason::DependencyFailed));
        assert_eq!(
            run.result("c").unwrap().skip_reason,
            Some(SkipReason::DependencyFailed)
        );
    }

    #[tokio::test]
    async fn test_volatile_dependency_failure_skips_dependent() {
        let catalogue = Catalogue::build(vec![
            spec("v_base", 1).volatile(),
            spec("v_child", 2).volatile().depends_on("v_base"),
        ])
        .unwrap();
        let collector =
            MockCollector::new().with_failure("v_base", ErrorKind::CollectorFailed);
        let run = engine(collector)
            .run(&catalogue, &CollectionProfile::default())
            .await;

        assert_eq!(run.result("v_base").unwrap().status, ArtifactStatus::Failed);
        let child = run.result("v_child").unwrap();
        assert_eq!(child.status, ArtifactStatus::Skipped);
        assert_eq!(child.skip_reason, Some(SkipReason::DependencyFailed));
    }

    #[tokio::test]
    async fn test_volatile_waves_gate_dependencies_when_batched() {
        let catalogue = Catalogue::build(vec![
            spec("v_base", 1).volatile(),
            spec("v_child", 1).volatile().depends_on("v_base"),
            spec("v_failed", 1).volatile(),
            spec("v_orphan", 1).volatile().depends_on("v_failed"),
        ])
        .unwrap();
        let collector =
            MockCollector::new().with_failure("v_failed", ErrorKind::CollectorFailed);
        let mut profile = CollectionProfile::default();
        profile.priority_policy = PriorityPolicy::Balanced;

        let run = engine(collector).run(&catalogue, &profile).await;
        let base = run.result("v_base").unwrap();
        let child = run.result("v_child").unwrap();
        assert_eq!(child.status, ArtifactStatus::Success);
        assert!(base.finished_at <= child.started_at);
        assert_eq!(
            run.result("v_orphan").unwrap().skip_reason,
            Some(SkipReason::DependencyFailed)
        );
    }

    #[tokio::test]
    async fn test_same_level_dependency_chain_executes_in_waves() {
        let catalogue = Catalogue::build(vec![
            spec("base", 2),
            spec("mid", 2).depends_on("base"),
            spec("top", 2).depends_on("mid"),
        ])
        .unwrap();
        let run = engine(MockCollector::new())
            .run(&catalogue, &CollectionProfile::default())
            .await;

        assert_eq!(run.counters.succeeded, 3);
        let base = run.result("base").unwrap();
        let mid = run.result("mid").unwrap();
        let top = run.result("top").unwrap();
        assert!(base.finished_at <= mid.started_at);
        assert!(mid.finished_at <= top.started_at);
    }

    #[tokio::test]
    async fn test_per_spec_timeout_cancels_only_that_spec() {
        let catalogue = Catalogue::build(vec![
            spec("slow_cmd", 1).with_timeout_ms(100),
            spec("fast_cmd", 2),
        ])
        .unwrap();
        let collector =
            MockCollector::new().with_delay("slow_cmd", Duration::from_millis(500));

        let started = Instant::now();
        let run = engine(collector)
            .run(&catalogue, &CollectionProfile::default())
            .await;
        assert!(started.elapsed() < Duration::from_millis(2000));

        let slow = run.result("slow_cmd").unwrap();
        assert_eq!(slow.status, ArtifactStatus::Cancelled);
        assert_eq!(
            slow.error.as_ref().unwrap().kind,
            ErrorKind::CollectorTimeout
        );
        assert_eq!(run.result("fast_cmd").unwrap().status, ArtifactStatus::Success);
    }

    #[tokio::test]
    async fn test_profile_watchdog_cancels_pending_specs() {
        let catalogue = Catalogue::build(vec![
            spec("first", 1).volatile(),
            spec("second", 2),
            spec("third", 3),
        ])
        .unwrap();
        let collector = MockCollector::new()
            .with_delay("first", Duration::from_millis(300));
        let mut profile = CollectionProfile::default();
        profile.timeout_secs = 0; // fires immediately

        let run = engine(collector).run(&catalogue, &profile).await;
        assert_eq!(run.results.len(), 3);
        for result in &run.results {
            assert_eq!(result.status, ArtifactStatus::Cancelled, "{}", result.name());
        }
    }

    #[tokio::test]
    async fn test_empty_selection_yields_empty_run() {
        let catalogue = Catalogue::build(vec![spec("a", 1)]).unwrap();
        let mut profile = CollectionProfile::default();
        profile.include.insert("not_in_catalogue".into());

        let run = engine(MockCollector::new()).run(&catalogue, &profile).await;
        assert!(run.results.is_empty());
        assert_eq!(run.counters.total(), 0);
    }

    #[tokio::test]
    async fn test_results_sorted_by_priority_then_name() {
        let catalogue = Catalogue::build(vec![
            spec("zeta", 1),
            spec("alpha", 2),
            spec("beta", 1),
        ])
        .unwrap();
        let run = engine(MockCollector::new())
            .run(&catalogue, &CollectionProfile::default())
            .await;
        let names: Vec<&str> = run.results.iter().map(|r| r.name()).collect();
        assert_eq!(names, vec!["beta", "zeta", "alpha"]);
    }

    #[tokio::test]
    async fn test_balanced_policy_still_orders_phases() {
        let catalogue = Catalogue::build(vec![
            spec("v_a", 1).volatile(),
            spec("v_b", 1).volatile(),
            spec("n_a", 1),
        ])
        .unwrap();
        let mut profile = CollectionProfile::default();
        profile.priority_policy = PriorityPolicy::Balanced;

        let run = engine(MockCollector::new()).run(&catalogue, &profile).await;
        let n_start = run.result("n_a").unwrap().started_at;
        assert!(run.result("v_a").unwrap().finished_at <= n_start);
        assert!(run.result("v_b").unwrap().finished_at <= n_start);
    }

    #[tokio::test]
    async fn test_external_cancellation() {
        let catalogue = Catalogue::build(vec![spec("slow_cmd", 1)]).unwrap();
        let collector =
            MockCollector::new().with_delay("slow_cmd", Duration::from_millis(200));
        let engine = engine(collector);
        let token = engine.cancel_token();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            token.cancel();
        });

        let run = engine.run(&catalogue, &CollectionProfile::default()).await;
        assert_eq!(run.result("slow_cmd").unwrap().status, ArtifactStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_redaction_rewrites_text_artifacts() {
        let catalogue = Catalogue::build(vec![spec("shell_history", 1)]).unwrap();
        let collector = MockCollector::new().with_payload(
            "shell_history",
            ArtifactData::Text("export API_KEY=abcd1234\nls -la\n".to_string()),
        );
        let config = CoreConfig {
            redaction_enabled: true,
            ..Default::default()
        };
        let engine =
            CollectionEngine::new(Arc::new(collector), Arc::new(SystemClock), config);

        let run = engine.run(&catalogue, &CollectionProfile::default()).await;
        let result = run.result("shell_history").unwrap();
        let text = result.data.as_text();
        assert!(text.contains("API_KEY=<redacted>"));
        assert!(!text.contains("abcd1234"));
        assert!(text.contains("ls -la"));
        assert_eq!(result.size, result.data.encode().len() as u64);
        assert_eq!(result.checksum, sha256_bytes(&result.data.encode()));
    }

    #[test]
    fn test_dependency_state_logic() {
        let mut statuses = HashMap::new();
        statuses.insert("ok".to_string(), ArtifactStatus::Success);
        statuses.insert("bad".to_string(), ArtifactStatus::Failed);
        let pending: HashSet<String> = ["later".to_string()].into_iter().collect();

        let ready = ArtifactSpec::command("x", "").depends_on("ok");
        assert!(matches!(
            dependency_state(&ready, &statuses, &pending),
            DepState::Ready
        ));

        let blocked = ArtifactSpec::command("x", "").depends_on("bad");
        assert!(matches!(
            dependency_state(&blocked, &statuses, &pending),
            DepState::Blocked
        ));

        let waiting = ArtifactSpec::command("x", "").depends_on("later");
        assert!(matches!(
            dependency_state(&waiting, &statuses, &pending),
            DepState::Waiting
        ));

        let missing = ArtifactSpec::command("x", "").depends_on("ghost");
        assert!(matches!(
            dependency_state(&missing, &statuses, &pending),
            DepState::Blocked
        ));
    }

    #[test]
    fn test_run_id_is_short_hex() {
        let id = short_run_id();
        assert_eq!(id.len(), 12);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
