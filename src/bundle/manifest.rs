//! Bundle manifest: the self-describing record written as
//! `manifest.json` at the staging root.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::catalogue::spec::Platform;
use crate::config::CoreConfig;
use crate::models::{CollectionRun, Finding, MetadataMap};
use crate::utils::get_hostname;

pub const TOOL_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct HostInfo {
    pub hostname: String,
    pub platform: String,
}

/// One collected artifact as recorded in the manifest. Only successful
/// results appear; everything else is summarised in `metadata`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ManifestArtifact {
    pub name: String,
    pub description: String,
    pub category: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub size: u64,
    pub checksum: String,
    pub collected_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    #[serde(rename = "caseID")]
    pub case_id: String,
    pub tool_version: String,
    pub collection_time: DateTime<Utc>,
    pub host_info: HostInfo,
    pub artifacts: Vec<ManifestArtifact>,
    pub findings: Vec<Finding>,
    /// Fingerprint plus full serialised configuration, so a bundle can say
    /// what settings produced it.
    pub configuration: serde_json::Value,
    pub redaction_rules: Vec<String>,
    /// Duplicates `checksums.txt` as a path-to-hex map.
    pub checksums: BTreeMap<String, String>,
    pub metadata: MetadataMap,
}

impl Manifest {
    pub fn build(
        run: &CollectionRun,
        findings: &[Finding],
        config: &CoreConfig,
        platform: Platform,
        checksums: BTreeMap<String, String>,
        case_id: Option<&str>,
    ) -> Manifest {
        let artifacts = run
            .successes()
            .map(|result| ManifestArtifact {
                name: result.spec.name.clone(),
                description: result.spec.description.clone(),
                category: result.spec.category.to_string(),
                kind: result.spec.kind.to_string(),
                size: result.size,
                checksum: result.checksum.clone(),
                collected_at: result.finished_at,
            })
            .collect();

        let mut metadata = MetadataMap::new();
        metadata.insert(
            "runID".to_string(),
            serde_json::Value::String(run.run_id.clone()),
        );
        metadata.insert(
            "counters".to_string(),
            serde_json::to_value(&run.counters).unwrap_or_default(),
        );

        Manifest {
            case_id: case_id.unwrap_or(&run.run_id).to_string(),
            tool_version: TOOL_VERSION.to_string(),
            collection_time: run.started_at,
            host_info: HostInfo {
                hostname: get_hostname(),
                platform: platform.to_string(),
            },
            artifacts,
            findings: findings.to_vec(),
            configuration: serde_json::json!({
                "fingerprint": config.fingerprint(),
                "settings": serde_json::to_value(config).unwrap_or_default(),
            }),
            redaction_rules: if config.redaction_enabled {
                crate::security::redaction::rule_names()
            } else {
                Vec::new()
            },
            checksums,
            metadata,
        }
    }

    /// Canonical serialisation written to `manifest.json`.
    pub fn encode(&self) -> anyhow::Result<Vec<u8>> {
        let mut bytes = serde_json::to_vec_pretty(self)?;
        bytes.push(b'\n');
        Ok(bytes)
    }
}
