//! End-to-end pipeline tests: collection through detection, reporting,
//! packaging and verification, all against the deterministic mock
//! collector.

use std::fs;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tempfile::TempDir;

use host_triage::bundle::{verify, BundlePackager};
use host_triage::catalogue::spec::{ArtifactCategory, ArtifactSpec};
use host_triage::catalogue::Catalogue;
use host_triage::collectors::mock::MockCollector;
use host_triage::config::{CollectionProfile, CoreConfig};
use host_triage::detection::DetectionEngine;
use host_triage::engine::CollectionEngine;
use host_triage::models::{
    ArtifactStatus, CollectionRun, ErrorKind, Finding, Severity, SkipReason,
};
use host_triage::report::ReportGenerator;
use host_triage::utils::clock::SystemClock;
use host_triage::utils::hash::sha256_bytes;

fn engine_with(collector: MockCollector, config: CoreConfig) -> CollectionEngine {
    CollectionEngine::new(Arc::new(collector), Arc::new(SystemClock), config)
}

async fn collect(
    collector: MockCollector,
    specs: Vec<ArtifactSpec>,
    profile: &CollectionProfile,
) -> CollectionRun {
    let catalogue = Catalogue::build(specs).unwrap();
    engine_with(collector, CoreConfig::default())
        .run(&catalogue, profile)
        .await
}

fn package(
    run: &CollectionRun,
    findings: &[Finding],
    dest: &std::path::Path,
) -> host_triage::bundle::PackagedBundle {
    let config = CoreConfig::default();
    let reports = ReportGenerator::new(&config).generate(run, findings);
    BundlePackager::new(config)
        .package(run, findings, &reports, dest, None)
        .unwrap()
}

#[tokio::test]
async fn minimal_mock_run_produces_clean_bundle() {
    let specs = vec![
        ArtifactSpec::command("host_profile", "host facts")
            .with_category(ArtifactCategory::Host)
            .with_priority(1),
        ArtifactSpec::command("running_processes", "process table")
            .with_category(ArtifactCategory::Process)
            .with_priority(2)
            .depends_on("host_profile"),
    ];
    let run = collect(MockCollector::new(), specs, &CollectionProfile::default()).await;

    assert_eq!(run.results.len(), 2);
    assert!(run
        .results
        .iter()
        .all(|r| r.status == ArtifactStatus::Success));
    for result in &run.results {
        assert!(result.started_at <= result.finished_at);
        assert_eq!(result.size, result.data.encode().len() as u64);
        assert_eq!(result.checksum, sha256_bytes(&result.data.encode()));
    }

    let config = CoreConfig::default();
    let findings = DetectionEngine::new(&config, Arc::new(SystemClock)).detect(&run);
    assert!(findings.is_empty());

    let dest = TempDir::new().unwrap();
    let bundle = package(&run, &findings, dest.path());
    assert!(bundle.staging_dir.join("artifacts/host_profile.json").exists());
    assert!(bundle
        .staging_dir
        .join("artifacts/running_processes.txt")
        .exists());

    let findings_json =
        fs::read_to_string(bundle.staging_dir.join("findings/findings.json")).unwrap();
    assert_eq!(findings_json.trim(), "[]");

    let summary =
        fs::read_to_string(bundle.staging_dir.join("reports/summary.md")).unwrap();
    assert!(summary.contains("Collected 2 artifacts, 0 findings."));

    assert!(verify(&bundle.staging_dir).unwrap().ok);
    assert!(verify(&bundle.archive_path).unwrap().ok);
}

#[tokio::test]
async fn per_spec_timeout_cancels_but_bundle_is_still_produced() {
    let specs = vec![ArtifactSpec::command("slow_cmd", "sleeps too long")
        .with_timeout_ms(100)];
    let collector = MockCollector::new().with_delay("slow_cmd", Duration::from_millis(500));

    let started = Instant::now();
    let run = collect(collector, specs, &CollectionProfile::default()).await;
    assert!(started.elapsed() < Duration::from_millis(2000));

    let result = run.result("slow_cmd").unwrap();
    assert_eq!(result.status, ArtifactStatus::Cancelled);
    assert_eq!(
        result.error.as_ref().unwrap().kind,
        ErrorKind::CollectorTimeout
    );

    let dest = TempDir::new().unwrap();
    let bundle = package(&run, &[], dest.path());
    assert!(bundle.archive_path.exists());
    assert!(verify(&bundle.staging_dir).unwrap().ok);
}

#[tokio::test]
async fn failed_dependency_skips_dependent_without_aborting() {
    let specs = vec![
        ArtifactSpec::command("a", "will fail").with_priority(1),
        ArtifactSpec::command("b", "needs a")
            .with_priority(2)
            .depends_on("a"),
    ];
    let collector = MockCollector::new().with_failure("a", ErrorKind::CollectorFailed);
    let run = collect(collector, specs, &CollectionProfile::default()).await;

    assert_eq!(run.result("a").unwrap().status, ArtifactStatus::Failed);
    let b = run.result("b").unwrap();
    assert_eq!(b.status, ArtifactStatus::Skipped);
    assert_eq!(b.skip_reason, Some(SkipReason::DependencyFailed));
}

#[tokio::test]
async fn volatile_dependency_failure_skips_dependent() {
    let specs = vec![
        ArtifactSpec::command("v_base", "will fail")
            .with_priority(1)
            .volatile(),
        ArtifactSpec::command("v_child", "needs v_base")
            .with_priority(2)
            .volatile()
            .depends_on("v_base"),
    ];
    let collector = MockCollector::new().with_failure("v_base", ErrorKind::CollectorFailed);
    let run = collect(collector, specs, &CollectionProfile::default()).await;

    assert_eq!(run.result("v_base").unwrap().status, ArtifactStatus::Failed);
    let child = run.result("v_child").unwrap();
    assert_eq!(child.status, ArtifactStatus::Skipped);
    assert_eq!(child.skip_reason, Some(SkipReason::DependencyFailed));
}

#[tokio::test]
async fn volatile_runs_before_higher_priority_non_volatile() {
    let specs = vec![
        ArtifactSpec::command("v1", "volatile")
            .with_priority(2)
            .volatile(),
        ArtifactSpec::command("n1", "stable").with_priority(1),
    ];
    let run = collect(MockCollector::new(), specs, &CollectionProfile::default()).await;

    let v1 = run.result("v1").unwrap();
    let n1 = run.result("n1").unwrap();
    assert!(v1.finished_at <= n1.started_at);
}

#[tokio::test]
async fn custom_rule_matches_suspicious_port() {
    let rules_dir = TempDir::new().unwrap();
    let rules_path = rules_dir.path().join("rules.yaml");
    fs::write(
        &rules_path,
        r#"
- id: R1
  name: suspicious port
  description: connection to port 4444
  severity: high
  category: network
  selector:
    categories: [network]
  match:
    substring:
      needle: ":4444"
"#,
    )
    .unwrap();

    let specs = vec![ArtifactSpec::command("network_connections", "sockets")
        .with_category(ArtifactCategory::Network)];
    let collector = MockCollector::new().with_payload(
        "network_connections",
        host_triage::models::ArtifactData::Text(
            "tcp 10.0.0.5:4444 ESTABLISHED\n".to_string(),
        ),
    );
    let run = collect(collector, specs, &CollectionProfile::default()).await;

    let config = CoreConfig {
        custom_rules_path: Some(rules_path),
        ..Default::default()
    };
    let findings = DetectionEngine::new(&config, Arc::new(SystemClock)).detect(&run);

    let r1: Vec<&Finding> = findings.iter().filter(|f| f.rule_id == "R1").collect();
    assert_eq!(r1.len(), 1);
    assert_eq!(r1[0].severity, Severity::High);
    assert_eq!(r1[0].evidence.len(), 1);
    assert_eq!(r1[0].evidence[0].source, "network_connections");
    assert_eq!(r1[0].evidence[0].value, ":4444");
}

#[tokio::test]
async fn flipped_byte_fails_verification() {
    let specs = vec![ArtifactSpec::command("host_profile", "host facts")
        .with_category(ArtifactCategory::Host)];
    let run = collect(MockCollector::new(), specs, &CollectionProfile::default()).await;

    let dest = TempDir::new().unwrap();
    let bundle = package(&run, &[], dest.path());
    assert!(verify(&bundle.staging_dir).unwrap().ok);

    let target = bundle.staging_dir.join("artifacts/host_profile.json");
    let mut bytes = fs::read(&target).unwrap();
    bytes[0] ^= 0xff;
    fs::write(&target, bytes).unwrap();

    let report = verify(&bundle.staging_dir).unwrap();
    assert!(!report.ok);
    assert!(report
        .mismatches
        .iter()
        .any(|m| m.path == "artifacts/host_profile.json"));

    // the archive-level hash trips as well once the archive is tampered
    let mut archive_bytes = fs::read(&bundle.archive_path).unwrap();
    let last = archive_bytes.len() - 1;
    archive_bytes[last] ^= 0xff;
    fs::write(&bundle.archive_path, archive_bytes).unwrap();
    let ok = verify(&bundle.archive_path).map(|r| r.ok).unwrap_or(false);
    assert!(!ok);
}

#[tokio::test]
async fn empty_selection_still_yields_valid_bundle_and_reports() {
    let specs = vec![ArtifactSpec::command("host_profile", "host facts")];
    let mut profile = CollectionProfile::default();
    profile.include.insert("not_in_catalogue".to_string());
    let run = collect(MockCollector::new(), specs, &profile).await;
    assert!(run.results.is_empty());

    let dest = TempDir::new().unwrap();
    let bundle = package(&run, &[], dest.path());
    assert!(verify(&bundle.staging_dir).unwrap().ok);

    let summary =
        fs::read_to_string(bundle.staging_dir.join("reports/summary.md")).unwrap();
    assert!(summary.contains("No artifacts collected."));
}

#[tokio::test]
async fn packaging_twice_is_byte_identical() {
    let specs = vec![
        ArtifactSpec::command("host_profile", "host facts")
            .with_category(ArtifactCategory::Host),
        ArtifactSpec::command("auth_log", "auth events")
            .with_category(ArtifactCategory::Logs),
    ];
    let run = collect(MockCollector::new(), specs, &CollectionProfile::default()).await;

    let dest_a = TempDir::new().unwrap();
    let dest_b = TempDir::new().unwrap();
    let a = package(&run, &[], dest_a.path());
    let b = package(&run, &[], dest_b.path());

    assert_eq!(
        fs::read(&a.archive_path).unwrap(),
        fs::read(&b.archive_path).unwrap()
    );
    assert_eq!(
        fs::read(&a.sidecar_path).unwrap(),
        fs::read(&b.sidecar_path).unwrap()
    );
}
