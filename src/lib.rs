//! # host-triage
//!
//! An incident-response host triage tool: collect forensic artifacts from
//! the running host, scan them with detection rules, and package the
//! evidence into a verifiable, self-describing bundle.
//!
//! ## Overview
//!
//! A run walks a declarative artifact catalogue, executes the selected
//! specs with strict volatile-first ordering and bounded concurrency, and
//! treats every per-artifact failure as data rather than control flow.
//! The resulting run feeds three further stages that all consume the same
//! inputs: rule-based detection, report generation, and bundle packaging
//! with per-file checksums and a deterministic archive.
//!
//! ## Pipeline
//!
//! ```text
//! Profile -> CollectionEngine -> [ArtifactResult]
//!         -> DetectionEngine  -> [Finding]
//!         -> ReportGenerator  -> reports/
//!         -> BundlePackager   -> bundle-<runID>.{zip,tar.gz} + sha256
//! ```
//!
//! When an incident context is active the run's results, findings and
//! timeline events are additionally merged into the incident's isolated
//! store.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use host_triage::catalogue::builtin::builtin_catalogue;
//! use host_triage::collectors::collector_for_host;
//! use host_triage::config::{CollectionProfile, CoreConfig};
//! use host_triage::engine::CollectionEngine;
//! use host_triage::utils::clock::SystemClock;
//!
//! # #[tokio::main]
//! # async fn main() -> anyhow::Result<()> {
//! let config = CoreConfig::default();
//! let catalogue = builtin_catalogue(config.platform)?;
//! let engine = CollectionEngine::new(
//!     collector_for_host(&config),
//!     Arc::new(SystemClock),
//!     config,
//! );
//! let run = engine.run(&catalogue, &CollectionProfile::default()).await;
//! println!("collected {} artifacts", run.counters.succeeded);
//! # Ok(())
//! # }
//! ```

pub mod bundle;
pub mod catalogue;
pub mod cli;
pub mod collectors;
pub mod config;
pub mod detection;
pub mod engine;
pub mod incident;
pub mod models;
pub mod report;
pub mod security;
pub mod store;
pub mod utils;
