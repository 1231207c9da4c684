//! Incident context: analyst-scoped state that outlives any single
//! collection run.
//!
//! An incident owns the runs, findings, notes and timeline merged into it
//! and persists as one JSON file under the reports root. Writes go through
//! [`IncidentStore`], which serialises them and enforces the isolation
//! policy between incidents.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::CoreConfig;
use crate::models::{
    ArtifactResult, CollectError, CollectionRun, ErrorKind, Finding, MetadataMap, Severity,
};
use crate::security::path::safe_file_name;
use crate::utils::clock::Clock;

/// Bumped whenever the on-disk incident layout changes shape.
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum IsolationLevel {
    /// A run already owned by another incident is rejected.
    Strict,
    /// Overlap is allowed; the timeline records the other incident's id.
    Loose,
}

impl Default for IsolationLevel {
    fn default() -> Self {
        IsolationLevel::Strict
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum IncidentStatus {
    Open,
    Closed,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TimelineEvent {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub description: String,
    pub source: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct IncidentContext {
    pub schema_version: u32,
    pub id: String,
    pub title: String,
    pub description: String,
    pub severity: Severity,
    pub status: IncidentStatus,
    pub analyst: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub isolation_level: IsolationLevel,
    /// Collected artifacts keyed by run id.
    #[serde(default)]
    pub artifacts: BTreeMap<String, Vec<ArtifactResult>>,
    #[serde(default)]
    pub findings: Vec<Finding>,
    #[serde(default)]
    pub notes: Vec<String>,
    #[serde(default)]
    pub timeline: Vec<TimelineEvent>,
    /// String-keyed scratch memory for the analyst.
    #[serde(default)]
    pub memory: MetadataMap,
}

impl IncidentContext {
    pub fn is_closed(&self) -> bool {
        self.status == IncidentStatus::Closed
    }

    pub fn add_note(&mut self, note: impl Into<String>) {
        self.notes.push(note.into());
    }

    pub fn remember(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.memory.insert(key.into(), value);
    }

    pub fn recall(&self, key: &str) -> Option<&serde_json::Value> {
        self.memory.get(key)
    }

    fn record_event(
        &mut self,
        at: DateTime<Utc>,
        event_type: &str,
        description: String,
        source: &str,
        data: serde_json::Value,
    ) {
        self.timeline.push(TimelineEvent {
            id: Uuid::new_v4().simple().to_string(),
            timestamp: at,
            event_type: event_type.to_string(),
            description,
            source: source.to_string(),
            data,
        });
    }
}

/// Compact listing entry for `incident list`.
#[derive(Debug, Serialize, Clone)]
pub struct IncidentSummary {
    pub id: String,
    pub title: String,
    pub status: IncidentStatus,
    pub severity: Severity,
    pub updated_at: DateTime<Utc>,
}

pub struct IncidentStore {
    root: PathBuf,
    clock: Arc<dyn Clock>,
    // all writes across incidents go through this store in-process
    write_lock: Mutex<()>,
}

impl IncidentStore {
    pub fn new(config: &CoreConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let root = config.reports_root.join("incidents");
        fs::create_dir_all(&root)
            .context(format!("Failed to create {}", root.display()))?;
        Ok(IncidentStore {
            root,
            clock,
            write_lock: Mutex::new(()),
        })
    }

    pub fn create(
        &self,
        title: &str,
        description: &str,
        analyst: &str,
        severity: Severity,
        isolation_level: IsolationLevel,
    ) -> Result<IncidentContext> {
        let now = self.clock.now();
        let id = format!(
            "INC-{}-{}",
            now.format("%Y%m%d"),
            &Uuid::new_v4().simple().to_string()[..4]
        );
        let mut incident = IncidentContext {
            schema_version: SCHEMA_VERSION,
            id: id.clone(),
            title: title.to_string(),
            description: description.to_string(),
            severity,
            status: IncidentStatus::Open,
            analyst: analyst.to_string(),
            tags: Vec::new(),
            created_at: now,
            updated_at: now,
            isolation_level,
            artifacts: BTreeMap::new(),
            findings: Vec::new(),
            notes: Vec::new(),
            timeline: Vec::new(),
            memory: MetadataMap::new(),
        };
        incident.record_event(
            now,
            "incident_created",
            format!("incident {} opened by {}", id, analyst),
            "incident_store",
            serde_json::Value::Null,
        );
        self.save(&incident)?;
        info!("Created incident {}", id);
        Ok(incident)
    }

    pub fn path_for(&self, id: &str) -> PathBuf {
        self.root.join(format!("{}.json", safe_file_name(id)))
    }

    pub fn load(&self, id: &str) -> Result<IncidentContext> {
        let path = self.path_for(id);
        let bytes = fs::read(&path)
            .context(format!("Failed to read incident {}", path.display()))?;
        let incident: IncidentContext = serde_json::from_slice(&bytes)
            .context(format!("Failed to parse incident {}", id))?;
        if incident.schema_version > SCHEMA_VERSION {
            bail!(
                "incident {} has schema version {} which this build does not understand",
                id,
                incident.schema_version
            );
        }
        Ok(incident)
    }

    /// Persist the incident. Fails with `incident_locked` when the on-disk
    /// copy is already closed; loading a closed incident is read-only.
    pub fn save(&self, incident: &IncidentContext) -> Result<PathBuf> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let path = self.path_for(&incident.id);
        if path.exists() {
            let stored = self.load(&incident.id)?;
            if stored.is_closed() {
                return Err(CollectError::new(
                    ErrorKind::IncidentLocked,
                    format!("incident {} is closed", incident.id),
                )
                .into());
            }
        }
        self.write_unchecked(incident, &path)?;
        Ok(path)
    }

    fn write_unchecked(&self, incident: &IncidentContext, path: &Path) -> Result<()> {
        let mut bytes = serde_json::to_vec_pretty(incident)
            .context("Failed to serialize incident")?;
        bytes.push(b'\n');
        fs::write(path, bytes)
            .context(format!("Failed to write {}", path.display()))?;
        debug!("Persisted incident {}", incident.id);
        Ok(())
    }

    pub fn list(&self) -> Result<Vec<IncidentSummary>> {
        let mut summaries = Vec::new();
        for entry in fs::read_dir(&self.root)
            .context(format!("Failed to read {}", self.root.display()))?
        {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match fs::read(&path)
                .map_err(anyhow::Error::from)
                .and_then(|b| serde_json::from_slice::<IncidentContext>(&b).map_err(Into::into))
            {
                Ok(incident) => summaries.push(IncidentSummary {
                    id: incident.id,
                    title: incident.title,
                    status: incident.status,
                    severity: incident.severity,
                    updated_at: incident.updated_at,
                }),
                Err(e) => warn!("Skipping unreadable incident {}: {:#}", path.display(), e),
            }
        }
        summaries.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(summaries)
    }

    fn current_path(&self) -> PathBuf {
        self.root.join("current")
    }

    /// Make an incident the session's current one. Subsequent collections
    /// without an explicit incident id merge into it.
    pub fn set_current(&self, id: &str) -> Result<IncidentContext> {
        let incident = self.load(id)?;
        if incident.is_closed() {
            return Err(CollectError::new(
                ErrorKind::IncidentLocked,
                format!("incident {} is closed", id),
            )
            .into());
        }
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        fs::write(self.current_path(), format!("{}\n", incident.id))
            .context("Failed to record current incident")?;
        info!("Incident {} is now current", incident.id);
        Ok(incident)
    }

    /// The current incident, if one is set and still loadable.
    pub fn current(&self) -> Result<Option<IncidentContext>> {
        let path = self.current_path();
        if !path.exists() {
            return Ok(None);
        }
        let id = fs::read_to_string(&path)
            .context("Failed to read current incident pointer")?
            .trim()
            .to_string();
        if id.is_empty() {
            return Ok(None);
        }
        match self.load(&id) {
            Ok(incident) => Ok(Some(incident)),
            Err(e) => {
                warn!("Current incident {} is unreadable: {:#}", id, e);
                Ok(None)
            }
        }
    }

    pub fn clear_current(&self) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let path = self.current_path();
        if path.exists() {
            fs::remove_file(&path).context("Failed to clear current incident")?;
        }
        Ok(())
    }

    pub fn close(&self, id: &str) -> Result<IncidentContext> {
        let mut incident = self.load(id)?;
        if incident.is_closed() {
            return Err(CollectError::new(
                ErrorKind::IncidentLocked,
                format!("incident {} is already closed", id),
            )
            .into());
        }
        let now = self.clock.now();
        incident.status = IncidentStatus::Closed;
        incident.updated_at = now;
        incident.record_event(
            now,
            "incident_closed",
            format!("incident {} closed", id),
            "incident_store",
            serde_json::Value::Null,
        );
        // the closed state itself still has to reach disk
        let guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        self.write_unchecked(&incident, &self.path_for(id))?;
        drop(guard);
        // a closed incident can no longer be the session's current one
        let pointer = self.current_path();
        if fs::read_to_string(&pointer)
            .map(|s| s.trim() == id)
            .unwrap_or(false)
        {
            self.clear_current()?;
        }
        info!("Closed incident {}", id);
        Ok(incident)
    }

    /// Merge a finished run and its findings into the incident, honouring
    /// the isolation level, and persist the result.
    pub fn merge_run(
        &self,
        incident: &mut IncidentContext,
        run: &CollectionRun,
        findings: &[Finding],
    ) -> Result<()> {
        if incident.is_closed() {
            return Err(CollectError::new(
                ErrorKind::IncidentLocked,
                format!("incident {} is closed", incident.id),
            )
            .into());
        }

        let now = self.clock.now();
        if let Some(owner) = self.owner_of_run(&run.run_id, &incident.id)? {
            match incident.isolation_level {
                IsolationLevel::Strict => {
                    return Err(CollectError::new(
                        ErrorKind::IncidentLocked,
                        format!(
                            "run {} already belongs to incident {}",
                            run.run_id, owner
                        ),
                    )
                    .into());
                }
                IsolationLevel::Loose => {
                    incident.record_event(
                        now,
                        "run_overlap",
                        format!("run {} is also held by incident {}", run.run_id, owner),
                        "incident_store",
                        serde_json::json!({ "otherIncident": owner }),
                    );
                }
            }
        }

        incident
            .artifacts
            .insert(run.run_id.clone(), run.results.clone());
        incident.findings.extend_from_slice(findings);
        incident.record_event(
            now,
            "run_merged",
            format!(
                "run {} merged: {} artifacts, {} findings",
                run.run_id,
                run.counters.succeeded,
                findings.len()
            ),
            "collection_engine",
            serde_json::json!({ "runID": run.run_id }),
        );
        for finding in findings {
            incident.record_event(
                now,
                "finding_detected",
                format!("{}: {}", finding.rule_id, finding.rule_name),
                "detection_engine",
                serde_json::json!({ "severity": finding.severity }),
            );
        }
        incident.updated_at = now;
        self.save(incident)?;
        Ok(())
    }

    /// Incident (other than `except`) that already holds `run_id`, if any.
    fn owner_of_run(&self, run_id: &str, except: &str) -> Result<Option<String>> {
        for summary in self.list()? {
            if summary.id == except {
                continue;
            }
            let incident = match self.load(&summary.id) {
                Ok(incident) => incident,
                Err(e) => {
                    warn!("Skipping incident {} during overlap scan: {:#}", summary.id, e);
                    continue;
                }
            };
            if incident.artifacts.contains_key(run_id) {
                return Ok(Some(summary.id));
            }
        }
        Ok(None)
    }
}
