//! Core configuration consumed by every stage.
//!
//! The flag/YAML front-end lives outside the core; this module owns the
//! validated `CoreConfig` struct, its YAML (de)serialisation and the
//! per-run `CollectionProfile`.

pub mod profile;

pub use profile::{CollectionProfile, PriorityPolicy};

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::catalogue::spec::Platform;
use crate::models::Severity;

/// Report formats the generator can emit.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    Md,
    Html,
    Json,
}

/// Archive container for the evidence bundle.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveFormat {
    Zip,
    TarGz,
}

impl ArchiveFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ArchiveFormat::Zip => "zip",
            ArchiveFormat::TarGz => "tar.gz",
        }
    }
}

impl Default for ArchiveFormat {
    fn default() -> Self {
        ArchiveFormat::Zip
    }
}

/// Configuration surface of the core, loadable from YAML.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct CoreConfig {
    #[serde(default = "default_reports_root")]
    pub reports_root: PathBuf,
    /// Per-artifact timeout default, seconds.
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: u64,
    /// Hard cap on a single encoded artifact, bytes.
    #[serde(default = "default_max_artifact_size")]
    pub max_artifact_size: u64,
    /// Log files larger than this are tailed to the last N bytes.
    #[serde(default = "default_max_log_size")]
    pub max_log_size: u64,
    /// Log files older than this are skipped by age-filtered specs, days.
    #[serde(default = "default_max_log_age_days")]
    pub max_log_age_days: u64,
    #[serde(default = "default_detection_timeout_secs")]
    pub detection_timeout_secs: u64,
    /// Findings below this severity are dropped.
    #[serde(default = "default_min_severity")]
    pub min_severity: Severity,
    /// 0..=9, passed through to the archive writer.
    #[serde(default = "default_compression_level")]
    pub compression_level: u32,
    /// Only sha256 is supported; kept explicit so manifests are
    /// self-describing.
    #[serde(default = "default_checksum_algorithm")]
    pub checksum_algorithm: String,
    #[serde(default)]
    pub redaction_enabled: bool,
    #[serde(default)]
    pub allow_network: bool,
    #[serde(default = "Platform::current")]
    pub platform: Platform,
    #[serde(default = "default_report_formats")]
    pub report_formats: Vec<ReportFormat>,
    #[serde(default)]
    pub archive_format: ArchiveFormat,
    #[serde(default)]
    pub sigma_rules_path: Option<PathBuf>,
    #[serde(default)]
    pub custom_rules_path: Option<PathBuf>,
}

fn default_reports_root() -> PathBuf {
    std::env::temp_dir().join("host-triage-reports")
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_artifact_size() -> u64 {
    256 * 1024 * 1024
}

fn default_max_log_size() -> u64 {
    10 * 1024 * 1024
}

fn default_max_log_age_days() -> u64 {
    90
}

fn default_detection_timeout_secs() -> u64 {
    60
}

fn default_min_severity() -> Severity {
    Severity::Low
}

fn default_compression_level() -> u32 {
    6
}

fn default_checksum_algorithm() -> String {
    "sha256".to_string()
}

fn default_report_formats() -> Vec<ReportFormat> {
    vec![ReportFormat::Md, ReportFormat::Html]
}

impl Default for CoreConfig {
    fn default() -> Self {
        CoreConfig {
            reports_root: default_reports_root(),
            default_timeout_secs: default_timeout_secs(),
            max_artifact_size: default_max_artifact_size(),
            max_log_size: default_max_log_size(),
            max_log_age_days: default_max_log_age_days(),
            detection_timeout_secs: default_detection_timeout_secs(),
            min_severity: default_min_severity(),
            compression_level: default_compression_level(),
            checksum_algorithm: default_checksum_algorithm(),
            redaction_enabled: false,
            allow_network: false,
            platform: Platform::current(),
            report_formats: default_report_formats(),
            archive_format: ArchiveFormat::default(),
            sigma_rules_path: None,
            custom_rules_path: None,
        }
    }
}

impl CoreConfig {
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .context(format!("Failed to read config file: {}", path.display()))?;
        let config: CoreConfig =
            serde_yaml::from_str(&content).context("Failed to parse YAML config")?;
        config.validate()?;
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn save_to_yaml_file(&self, path: &Path) -> Result<()> {
        let yaml = serde_yaml::to_string(self).context("Failed to serialize config to YAML")?;
        fs::write(path, yaml)
            .context(format!("Failed to write config to {}", path.display()))?;
        info!("Saved configuration to {}", path.display());
        Ok(())
    }

    /// Reject configurations the core cannot honour. Errors here map to
    /// the validation exit code at the CLI boundary.
    pub fn validate(&self) -> Result<()> {
        if self.compression_level > 9 {
            bail!(
                "compression_level must be in 0..=9, got {}",
                self.compression_level
            );
        }
        if self.checksum_algorithm != "sha256" {
            bail!(
                "unsupported checksum algorithm: {}",
                self.checksum_algorithm
            );
        }
        if self.default_timeout_secs == 0 {
            bail!("default_timeout_secs must be positive");
        }
        if self.max_log_size == 0 {
            bail!("max_log_size must be positive");
        }
        if let Some(path) = &self.custom_rules_path {
            if !path.exists() {
                bail!("custom_rules_path does not exist: {}", path.display());
            }
        }
        Ok(())
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }

    pub fn max_log_age(&self) -> Duration {
        Duration::from_secs(self.max_log_age_days * 24 * 60 * 60)
    }

    /// Stable fingerprint of the configuration, recorded in the manifest
    /// so a bundle can say what settings produced it.
    pub fn fingerprint(&self) -> String {
        let encoded = serde_json::to_vec(self).unwrap_or_default();
        crate::utils::hash::sha256_bytes(&encoded)
    }
}

/// Load a config file or fall back to defaults, creating the file when a
/// path is given but missing.
pub fn load_or_create_config(config_path: Option<&Path>) -> Result<CoreConfig> {
    match config_path {
        Some(path) if path.exists() => CoreConfig::from_yaml_file(path),
        Some(path) => {
            info!("Creating default config at {}", path.display());
            let config = CoreConfig::default();
            config.save_to_yaml_file(path)?;
            Ok(config)
        }
        None => {
            info!("No config path provided, using defaults");
            Ok(CoreConfig::default())
        }
    }
}
