use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Artifact category, used for selection, detection rule targeting and
/// report grouping.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactCategory {
    Host,
    System,
    Process,
    Service,
    Network,
    Filesystem,
    Registry,
    Logs,
    Users,
    Memory,
    Timeline,
    Application,
    Hardware,
    Storage,
}

impl fmt::Display for ArtifactCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ArtifactCategory::Host => "host",
            ArtifactCategory::System => "system",
            ArtifactCategory::Process => "process",
            ArtifactCategory::Service => "service",
            ArtifactCategory::Network => "network",
            ArtifactCategory::Filesystem => "filesystem",
            ArtifactCategory::Registry => "registry",
            ArtifactCategory::Logs => "logs",
            ArtifactCategory::Users => "users",
            ArtifactCategory::Memory => "memory",
            ArtifactCategory::Timeline => "timeline",
            ArtifactCategory::Application => "application",
            ArtifactCategory::Hardware => "hardware",
            ArtifactCategory::Storage => "storage",
        };
        write!(f, "{}", s)
    }
}

/// How the artifact is realised by a platform collector.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    /// Run an OS utility and capture its output.
    Command,
    /// Read one or more files, tailing large logs to a byte cap.
    File,
    /// Enumerate named registry keys (Windows only).
    Registry,
    /// Copy registry hive files (Windows only).
    Hive,
    /// Memory or state dump; may legitimately report `not_available`.
    Dump,
    /// Stat-style enumeration of directories named in parameters.
    Metadata,
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ArtifactKind::Command => "command",
            ArtifactKind::File => "file",
            ArtifactKind::Registry => "registry",
            ArtifactKind::Hive => "hive",
            ArtifactKind::Dump => "dump",
            ArtifactKind::Metadata => "metadata",
        };
        write!(f, "{}", s)
    }
}

/// Platform an artifact applies to.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Windows,
    Linux,
    Any,
}

impl Platform {
    /// Platform of the running process.
    pub fn current() -> Platform {
        match std::env::consts::OS {
            "windows" => Platform::Windows,
            "linux" => Platform::Linux,
            _ => Platform::Any,
        }
    }

    /// Whether a spec declared for `self` may run on `target`.
    pub fn accepts(&self, target: Platform) -> bool {
        matches!(self, Platform::Any) || *self == target || target == Platform::Any
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Platform::Windows => write!(f, "windows"),
            Platform::Linux => write!(f, "linux"),
            Platform::Any => write!(f, "any"),
        }
    }
}

/// Declarative description of one collectible artifact.
///
/// Specs are static data owned by the catalogue; the engine derives all
/// ordering (volatility, priority, dependencies) from them rather than
/// hard-coding it in collectors.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ArtifactSpec {
    /// Unique, stable identifier.
    pub name: String,
    pub description: String,
    pub category: ArtifactCategory,
    pub kind: ArtifactKind,
    #[serde(default = "default_platform")]
    pub platform: Platform,
    /// Volatile specs are collected strictly before non-volatile ones.
    #[serde(default)]
    pub volatile: bool,
    /// 1 (highest) to 5 (lowest). Ties break on stable name order.
    #[serde(default = "default_priority")]
    pub priority: u8,
    /// Names of specs that must have succeeded before this one runs.
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub parameters: HashMap<String, String>,
    /// Per-execution wall clock limit in milliseconds. Inherits the
    /// profile default when absent. Zero or negative values are rejected
    /// by catalogue validation.
    #[serde(default)]
    pub timeout_ms: Option<i64>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Spec reaches out over the network; gated by the profile.
    #[serde(default)]
    pub network: bool,
}

fn default_platform() -> Platform {
    Platform::Any
}

fn default_priority() -> u8 {
    3
}

fn default_enabled() -> bool {
    true
}

impl ArtifactSpec {
    /// Minimal command spec with defaults; builder methods refine it.
    pub fn command(name: &str, description: &str) -> Self {
        ArtifactSpec {
            name: name.to_string(),
            description: description.to_string(),
            category: ArtifactCategory::System,
            kind: ArtifactKind::Command,
            platform: Platform::Any,
            volatile: false,
            priority: 3,
            dependencies: Vec::new(),
            parameters: HashMap::new(),
            timeout_ms: None,
            enabled: true,
            network: false,
        }
    }

    pub fn with_kind(mut self, kind: ArtifactKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_category(mut self, category: ArtifactCategory) -> Self {
        self.category = category;
        self
    }

    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    pub fn volatile(mut self) -> Self {
        self.volatile = true;
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn depends_on(mut self, name: &str) -> Self {
        self.dependencies.push(name.to_string());
        self
    }

    pub fn with_param(mut self, key: &str, value: &str) -> Self {
        self.parameters.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_timeout_ms(mut self, ms: i64) -> Self {
        self.timeout_ms = Some(ms);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn uses_network(mut self) -> Self {
        self.network = true;
        self
    }

    /// Effective timeout, falling back to the supplied profile default.
    pub fn effective_timeout(&self, default: Duration) -> Duration {
        match self.timeout_ms {
            Some(ms) if ms > 0 => Duration::from_millis(ms as u64),
            _ => default,
        }
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).map(String::as_str)
    }

    /// Sort key implementing the total ordering rule: ascending priority,
    /// then stable name order.
    pub fn order_key(&self) -> (u8, &str) {
        (self.priority, self.name.as_str())
    }
}
