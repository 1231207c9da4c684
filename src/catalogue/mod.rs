//! Artifact catalogue: the declarative table of everything the tool knows
//! how to collect.
//!
//! The catalogue is built once at startup, validated (unique names, acyclic
//! dependencies, volatility rules), and read-only thereafter. The engine
//! derives execution order from it instead of encoding ordering rules in
//! collectors.

pub mod builtin;
pub mod spec;

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::config::profile::CollectionProfile;
use spec::{ArtifactCategory, ArtifactSpec, Platform};

/// Extended-profile cutoff: priority <= 3 is the standard set.
pub const STANDARD_PRIORITY_CUTOFF: u8 = 3;

/// Validation failure while building the catalogue. Fatal at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogueError {
    Duplicate(String),
    Cycle(String),
    BadDependency { spec: String, dependency: String },
    /// A volatile spec depending on a non-volatile one would break the
    /// volatile-first ordering guarantee.
    VolatileDependency { spec: String, dependency: String },
    BadTimeout { spec: String, timeout_ms: i64 },
}

impl fmt::Display for CatalogueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CatalogueError::Duplicate(name) => {
                write!(f, "duplicate artifact spec: {}", name)
            }
            CatalogueError::Cycle(name) => {
                write!(f, "dependency cycle involving artifact: {}", name)
            }
            CatalogueError::BadDependency { spec, dependency } => {
                write!(f, "artifact {} depends on unknown artifact {}", spec, dependency)
            }
            CatalogueError::VolatileDependency { spec, dependency } => write!(
                f,
                "volatile artifact {} may not depend on non-volatile artifact {}",
                spec, dependency
            ),
            CatalogueError::BadTimeout { spec, timeout_ms } => write!(
                f,
                "artifact {} declares a non-positive timeout of {} ms",
                spec, timeout_ms
            ),
        }
    }
}

impl std::error::Error for CatalogueError {}

/// Serialisable on-disk shape, mirroring the YAML config file layout.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CatalogueFile {
    pub version: String,
    #[serde(default)]
    pub description: String,
    pub artifacts: Vec<ArtifactSpec>,
}

/// Validated, read-only collection of artifact specs.
#[derive(Debug, Clone)]
pub struct Catalogue {
    specs: Vec<ArtifactSpec>,
    index: HashMap<String, usize>,
}

impl Catalogue {
    /// Build a validated catalogue from a list of specs.
    pub fn build(specs: Vec<ArtifactSpec>) -> Result<Self, CatalogueError> {
        let mut catalogue = Catalogue {
            specs: Vec::new(),
            index: HashMap::new(),
        };
        for spec in specs {
            catalogue.register(spec)?;
        }
        catalogue.validate()?;
        Ok(catalogue)
    }

    /// Load a catalogue from a YAML file, then validate it.
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .context(format!("Failed to read catalogue file: {}", path.display()))?;
        let file: CatalogueFile =
            serde_yaml::from_str(&content).context("Failed to parse catalogue YAML")?;
        debug!(
            "Loaded {} artifact specs from {}",
            file.artifacts.len(),
            path.display()
        );
        Ok(Catalogue::build(file.artifacts)?)
    }

    /// Save the catalogue as YAML, e.g. for `init-config`.
    pub fn save_to_yaml_file(&self, path: &Path, description: &str) -> Result<()> {
        let file = CatalogueFile {
            version: env!("CARGO_PKG_VERSION").to_string(),
            description: description.to_string(),
            artifacts: self.specs.clone(),
        };
        let yaml =
            serde_yaml::to_string(&file).context("Failed to serialize catalogue to YAML")?;
        fs::write(path, yaml)
            .context(format!("Failed to write catalogue to {}", path.display()))?;
        Ok(())
    }

    fn register(&mut self, spec: ArtifactSpec) -> Result<(), CatalogueError> {
        if self.index.contains_key(&spec.name) {
            return Err(CatalogueError::Duplicate(spec.name));
        }
        if let Some(ms) = spec.timeout_ms {
            if ms <= 0 {
                return Err(CatalogueError::BadTimeout {
                    spec: spec.name,
                    timeout_ms: ms,
                });
            }
        }
        self.index.insert(spec.name.clone(), self.specs.len());
        self.specs.push(spec);
        Ok(())
    }

    /// Full-graph validation: unknown dependencies, cycles, volatility.
    fn validate(&self) -> Result<(), CatalogueError> {
        for spec in &self.specs {
            for dep in &spec.dependencies {
                let dep_spec = self.get(dep).ok_or_else(|| CatalogueError::BadDependency {
                    spec: spec.name.clone(),
                    dependency: dep.clone(),
                })?;
                if spec.volatile && !dep_spec.volatile {
                    return Err(CatalogueError::VolatileDependency {
                        spec: spec.name.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }
        self.check_cycles()
    }

    /// Iterative three-colour DFS over the dependency graph.
    fn check_cycles(&self) -> Result<(), CatalogueError> {
        const WHITE: u8 = 0;
        const GREY: u8 = 1;
        const BLACK: u8 = 2;
        let mut colour = vec![WHITE; self.specs.len()];

        for start in 0..self.specs.len() {
            if colour[start] != WHITE {
                continue;
            }
            // stack of (node, next-dependency-index)
            let mut stack = vec![(start, 0usize)];
            colour[start] = GREY;
            while let Some(&mut (node, ref mut next)) = stack.last_mut() {
                let deps = &self.specs[node].dependencies;
                if *next >= deps.len() {
                    colour[node] = BLACK;
                    stack.pop();
                    continue;
                }
                let dep = &deps[*next];
                *next += 1;
                let dep_idx = self.index[dep];
                match colour[dep_idx] {
                    GREY => {
                        return Err(CatalogueError::Cycle(self.specs[dep_idx].name.clone()))
                    }
                    WHITE => {
                        colour[dep_idx] = GREY;
                        stack.push((dep_idx, 0));
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ArtifactSpec> {
        self.index.get(name).map(|&i| &self.specs[i])
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ArtifactSpec> {
        self.specs.iter()
    }

    /// Specs the engine will execute for this profile and platform, in the
    /// exact order the engine uses: volatile first in (priority, name)
    /// order, then non-volatile in (priority, name) order.
    pub fn select(&self, profile: &CollectionProfile, platform: Platform) -> Vec<ArtifactSpec> {
        let mut selected: Vec<ArtifactSpec> = self
            .specs
            .iter()
            .filter(|s| s.enabled)
            .filter(|s| s.platform.accepts(platform))
            .filter(|s| profile.extended || s.priority <= STANDARD_PRIORITY_CUTOFF)
            .filter(|s| profile.selects(&s.name))
            .filter(|s| !s.network || profile.allow_network)
            .cloned()
            .collect();

        selected.sort_by(|a, b| {
            // volatile partition first, then the shared total order
            (!a.volatile, a.priority, a.name.as_str())
                .cmp(&(!b.volatile, b.priority, b.name.as_str()))
        });
        selected
    }

    pub fn volatile_only(&self) -> Vec<&ArtifactSpec> {
        self.specs.iter().filter(|s| s.volatile).collect()
    }

    pub fn by_priority(&self) -> BTreeMap<u8, Vec<&ArtifactSpec>> {
        let mut map: BTreeMap<u8, Vec<&ArtifactSpec>> = BTreeMap::new();
        for spec in &self.specs {
            map.entry(spec.priority).or_default().push(spec);
        }
        map
    }

    pub fn by_category(&self) -> BTreeMap<ArtifactCategory, Vec<&ArtifactSpec>> {
        let mut map: BTreeMap<ArtifactCategory, Vec<&ArtifactSpec>> = BTreeMap::new();
        for spec in &self.specs {
            map.entry(spec.category).or_default().push(spec);
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::spec::{ArtifactKind, Platform};
    use super::*;

    fn spec(name: &str, priority: u8) -> ArtifactSpec {
        ArtifactSpec::command(name, "test").with_priority(priority)
    }

    #[test]
    fn test_duplicate_rejected() {
        let err = Catalogue::build(vec![spec("a", 1), spec("a", 2)]).unwrap_err();
        assert_eq!(err, CatalogueError::Duplicate("a".into()));
    }

    #[test]
    fn test_unknown_dependency_rejected() {
        let err = Catalogue::build(vec![spec("a", 1).depends_on("ghost")]).unwrap_err();
        assert!(matches!(err, CatalogueError::BadDependency { .. }));
    }

    #[test]
    fn test_cycle_rejected() {
        let err = Catalogue::build(vec![
            spec("a", 1).depends_on("b"),
            spec("b", 1).depends_on("c"),
            spec("c", 1).depends_on("a"),
        ])
        .unwrap_err();
        assert!(matches!(err, CatalogueError::Cycle(_)));
    }

    #[test]
    fn test_self_cycle_rejected() {
        let err = Catalogue::build(vec![spec("a", 1).depends_on("a")]).unwrap_err();
        assert!(matches!(err, CatalogueError::Cycle(_)));
    }

    #[test]
    fn test_volatile_may_not_depend_on_non_volatile() {
        let err = Catalogue::build(vec![
            spec("base", 1),
            spec("fast", 1).volatile().depends_on("base"),
        ])
        .unwrap_err();
        assert!(matches!(err, CatalogueError::VolatileDependency { .. }));
    }

    #[test]
    fn test_non_positive_timeout_rejected() {
        let err = Catalogue::build(vec![spec("a", 1).with_timeout_ms(0)]).unwrap_err();
        assert!(matches!(err, CatalogueError::BadTimeout { .. }));
        let err = Catalogue::build(vec![spec("a", 1).with_timeout_ms(-5)]).unwrap_err();
        assert!(matches!(err, CatalogueError::BadTimeout { .. }));
    }

    #[test]
    fn test_valid_dag_accepted() {
        let catalogue = Catalogue::build(vec![
            spec("a", 1),
            spec("b", 2).depends_on("a"),
            spec("c", 2).depends_on("a").depends_on("b"),
        ])
        .unwrap();
        assert_eq!(catalogue.len(), 3);
        assert!(catalogue.get("b").is_some());
        assert!(catalogue.get("missing").is_none());
    }

    #[test]
    fn test_select_orders_volatile_first_regardless_of_priority() {
        let catalogue = Catalogue::build(vec![
            spec("n1", 1),
            spec("v1", 2).volatile(),
            spec("v0", 3).volatile(),
            spec("n0", 2),
        ])
        .unwrap();
        let order: Vec<String> = catalogue
            .select(&CollectionProfile::default(), Platform::Linux)
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(order, vec!["v1", "v0", "n1", "n0"]);
    }

    #[test]
    fn test_select_filters_priority_unless_extended() {
        let catalogue = Catalogue::build(vec![spec("std", 3), spec("deep", 4)]).unwrap();
        let standard = catalogue.select(&CollectionProfile::default(), Platform::Linux);
        assert_eq!(standard.len(), 1);
        assert_eq!(standard[0].name, "std");

        let extended = catalogue.select(&CollectionProfile::extended(), Platform::Linux);
        assert_eq!(extended.len(), 2);
    }

    #[test]
    fn test_select_respects_platform_and_enabled() {
        let catalogue = Catalogue::build(vec![
            spec("linux_only", 1).with_platform(Platform::Linux),
            spec("windows_only", 1).with_platform(Platform::Windows),
            spec("off", 1).disabled(),
        ])
        .unwrap();
        let selected = catalogue.select(&CollectionProfile::default(), Platform::Linux);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].name, "linux_only");
    }

    #[test]
    fn test_select_network_gate() {
        let catalogue = Catalogue::build(vec![
            spec("dns_cache", 1).uses_network(),
            spec("local", 1),
        ])
        .unwrap();
        let closed = catalogue.select(&CollectionProfile::default(), Platform::Linux);
        assert_eq!(closed.len(), 1);

        let mut open = CollectionProfile::default();
        open.allow_network = true;
        assert_eq!(catalogue.select(&open, Platform::Linux).len(), 2);
    }

    #[test]
    fn test_select_disjoint_include_yields_empty() {
        let catalogue = Catalogue::build(vec![spec("a", 1), spec("b", 1)]).unwrap();
        let mut profile = CollectionProfile::default();
        profile.include.insert("nothing_here".into());
        assert!(catalogue.select(&profile, Platform::Linux).is_empty());
    }

    #[test]
    fn test_yaml_round_trip() {
        let catalogue =
            Catalogue::build(vec![spec("a", 1), spec("b", 2).depends_on("a")]).unwrap();
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("catalogue.yaml");
        catalogue.save_to_yaml_file(&path, "round trip").unwrap();

        let loaded = Catalogue::from_yaml_file(&path).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.get("b").unwrap().dependencies, vec!["a"]);
    }

    #[test]
    fn test_by_priority_and_category_queries() {
        let catalogue = Catalogue::build(vec![
            spec("a", 1).with_kind(ArtifactKind::Command),
            spec("b", 1),
            spec("c", 2),
        ])
        .unwrap();
        let by_priority = catalogue.by_priority();
        assert_eq!(by_priority[&1].len(), 2);
        assert_eq!(by_priority[&2].len(), 1);
        assert_eq!(catalogue.volatile_only().len(), 0);
    }
}
