//! Core data model shared by the collection, detection and packaging stages.
//!
//! Failures during collection are data, not control flow: every artifact
//! execution produces an [`ArtifactResult`] whose `status` and optional
//! `error` describe what happened. Later stages inspect the status instead
//! of catching errors.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::catalogue::spec::ArtifactSpec;

/// Terminal state of one artifact execution.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactStatus {
    Success,
    Failed,
    Skipped,
    Cancelled,
    NotAvailable,
}

impl fmt::Display for ArtifactStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactStatus::Success => write!(f, "success"),
            ArtifactStatus::Failed => write!(f, "failed"),
            ArtifactStatus::Skipped => write!(f, "skipped"),
            ArtifactStatus::Cancelled => write!(f, "cancelled"),
            ArtifactStatus::NotAvailable => write!(f, "not_available"),
        }
    }
}

/// Why a spec was skipped rather than executed.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    DependencyFailed,
    PlatformMismatch,
    NetworkDisallowed,
}

/// Error taxonomy. Kinds, not type names: the same shape travels through
/// per-artifact results, packaging failures and incident-store rejections.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Catalogue,
    CollectorTimeout,
    CollectorFailed,
    NotAvailable,
    Permission,
    PackageError,
    VerifyMismatch,
    IncidentLocked,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Catalogue => "catalogue",
            ErrorKind::CollectorTimeout => "collector_timeout",
            ErrorKind::CollectorFailed => "collector_failed",
            ErrorKind::NotAvailable => "not_available",
            ErrorKind::Permission => "permission",
            ErrorKind::PackageError => "package_error",
            ErrorKind::VerifyMismatch => "verify_mismatch",
            ErrorKind::IncidentLocked => "incident_locked",
        };
        write!(f, "{}", s)
    }
}

/// Kind plus human message, recorded inside results and findings streams.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct CollectError {
    pub kind: ErrorKind,
    pub message: String,
}

impl CollectError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        CollectError {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for CollectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for CollectError {}

/// Opaque artifact payload. Packagers and the detection engine only ever
/// see it through [`ArtifactData::encode`] and [`ArtifactData::as_text`].
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactData {
    Text(String),
    Structured(serde_json::Value),
    Binary(Vec<u8>),
}

impl ArtifactData {
    /// Canonical byte encoding. Structured data is pretty-printed JSON so
    /// the same value always encodes to the same bytes.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            ArtifactData::Text(s) => s.as_bytes().to_vec(),
            ArtifactData::Structured(v) => {
                // serde_json pretty output is deterministic for a given Value
                let mut bytes = serde_json::to_vec_pretty(v).unwrap_or_default();
                bytes.push(b'\n');
                bytes
            }
            ArtifactData::Binary(b) => b.clone(),
        }
    }

    /// Textual projection used by the detection engine.
    pub fn as_text(&self) -> Cow<'_, str> {
        match self {
            ArtifactData::Text(s) => Cow::Borrowed(s),
            ArtifactData::Structured(v) => {
                Cow::Owned(serde_json::to_string_pretty(v).unwrap_or_default())
            }
            ArtifactData::Binary(b) => String::from_utf8_lossy(b),
        }
    }

    /// Extension used when the payload is staged into a bundle.
    pub fn extension(&self) -> &'static str {
        match self {
            ArtifactData::Structured(_) => "json",
            _ => "txt",
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            ArtifactData::Text(s) => s.is_empty(),
            ArtifactData::Structured(v) => v.is_null(),
            ArtifactData::Binary(b) => b.is_empty(),
        }
    }
}

/// Outcome of executing one [`ArtifactSpec`]. Immutable once the engine
/// finalises the run.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ArtifactResult {
    pub spec: ArtifactSpec,
    pub status: ArtifactStatus,
    pub data: ArtifactData,
    pub size: u64,
    pub checksum: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub collector: String,
    pub source: String,
    #[serde(default)]
    pub truncated: bool,
    #[serde(default)]
    pub skip_reason: Option<SkipReason>,
    #[serde(default)]
    pub error: Option<CollectError>,
}

impl ArtifactResult {
    /// Build a successful result; size and checksum are derived from the
    /// canonical encoding so the §3 invariants hold by construction.
    pub fn success(
        spec: ArtifactSpec,
        data: ArtifactData,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        collector: &str,
        source: &str,
    ) -> Self {
        let encoded = data.encode();
        let checksum = crate::utils::hash::sha256_bytes(&encoded);
        let duration_ms = duration_ms(started_at, finished_at);
        ArtifactResult {
            spec,
            status: ArtifactStatus::Success,
            size: encoded.len() as u64,
            checksum,
            data,
            started_at,
            finished_at,
            duration_ms,
            collector: collector.to_string(),
            source: source.to_string(),
            truncated: false,
            skip_reason: None,
            error: None,
        }
    }

    /// Non-success outcome with an empty payload.
    pub fn outcome(
        spec: ArtifactSpec,
        status: ArtifactStatus,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        collector: &str,
        error: Option<CollectError>,
    ) -> Self {
        let duration_ms = duration_ms(started_at, finished_at);
        ArtifactResult {
            spec,
            status,
            data: ArtifactData::Text(String::new()),
            size: 0,
            checksum: String::new(),
            started_at,
            finished_at,
            duration_ms,
            collector: collector.to_string(),
            source: String::new(),
            truncated: false,
            skip_reason: None,
            error,
        }
    }

    pub fn skipped(
        spec: ArtifactSpec,
        reason: SkipReason,
        at: DateTime<Utc>,
        collector: &str,
    ) -> Self {
        let mut result =
            ArtifactResult::outcome(spec, ArtifactStatus::Skipped, at, at, collector, None);
        result.skip_reason = Some(reason);
        result
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }
}

/// Per-status tallies for a finished run.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct RunCounters {
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub cancelled: usize,
    pub not_available: usize,
}

impl RunCounters {
    pub fn tally(results: &[ArtifactResult]) -> Self {
        let mut counters = RunCounters::default();
        for result in results {
            match result.status {
                ArtifactStatus::Success => counters.succeeded += 1,
                ArtifactStatus::Failed => counters.failed += 1,
                ArtifactStatus::Skipped => counters.skipped += 1,
                ArtifactStatus::Cancelled => counters.cancelled += 1,
                ArtifactStatus::NotAvailable => counters.not_available += 1,
            }
        }
        counters
    }

    pub fn total(&self) -> usize {
        self.succeeded + self.failed + self.skipped + self.cancelled + self.not_available
    }
}

/// One end-to-end execution of the collection engine for a single profile.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CollectionRun {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub results: Vec<ArtifactResult>,
    pub counters: RunCounters,
}

impl CollectionRun {
    pub fn result(&self, name: &str) -> Option<&ArtifactResult> {
        self.results.iter().find(|r| r.spec.name == name)
    }

    pub fn successes(&self) -> impl Iterator<Item = &ArtifactResult> {
        self.results
            .iter()
            .filter(|r| r.status == ArtifactStatus::Success)
    }
}

/// Finding severity. Ordering is ascending so `Critical` compares greatest.
#[derive(
    Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

/// A single piece of supporting evidence inside a finding.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Evidence {
    #[serde(rename = "type")]
    pub kind: String,
    /// Name of the artifact result the evidence was extracted from.
    pub source: String,
    pub value: String,
    pub description: String,
    /// Informational confidence in [0, 1]; never used as a gate.
    pub confidence: f64,
}

/// Output of one rule firing against a collection run.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Finding {
    #[serde(rename = "ruleID")]
    pub rule_id: String,
    #[serde(rename = "ruleName")]
    pub rule_name: String,
    pub category: String,
    pub severity: Severity,
    pub description: String,
    pub tags: Vec<String>,
    pub timestamp: DateTime<Utc>,
    pub evidence: Vec<Evidence>,
}

/// Free-form metadata map used by incidents and the manifest.
pub type MetadataMap = HashMap<String, serde_json::Value>;

fn duration_ms(start: DateTime<Utc>, end: DateTime<Utc>) -> u64 {
    (end - start).num_milliseconds().max(0) as u64
}
