//! Rule descriptors: declarative YAML-loadable patterns plus the built-in
//! set shipped with the tool.

use std::path::Path;

use anyhow::{Context, Result};
use log::warn;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::catalogue::spec::ArtifactCategory;
use crate::models::{ArtifactResult, Severity};

/// Which artifact results a rule applies to. Empty selector matches all.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct RuleSelector {
    #[serde(default)]
    pub categories: Vec<ArtifactCategory>,
    #[serde(default)]
    pub names: Vec<String>,
}

impl RuleSelector {
    pub fn matches(&self, result: &ArtifactResult) -> bool {
        if self.categories.is_empty() && self.names.is_empty() {
            return true;
        }
        self.categories.contains(&result.spec.category)
            || self.names.iter().any(|n| n == &result.spec.name)
    }
}

/// Pattern applied to an artifact's textual projection, or to its
/// structured value for the JSON variants.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum MatchSpec {
    Regex { pattern: String },
    Substring { needle: String },
    /// RFC 6901 pointer into structured payloads; fires when the pointed
    /// value exists and, if `contains` is set, its rendering contains it.
    JsonPath {
        pointer: String,
        #[serde(default)]
        contains: Option<String>,
    },
    /// Pointer comparison against a literal value.
    StructuredPredicate {
        pointer: String,
        equals: serde_json::Value,
    },
}

fn default_threshold() -> usize {
    1
}

/// One detection rule as loaded from YAML. Matching is case-insensitive
/// unless `case_sensitive` is set.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Rule {
    pub id: String,
    pub name: String,
    pub description: String,
    pub severity: Severity,
    pub category: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub selector: RuleSelector,
    #[serde(rename = "match")]
    pub matcher: MatchSpec,
    #[serde(default = "default_threshold")]
    pub threshold: usize,
    #[serde(default)]
    pub case_sensitive: bool,
}

/// A rule with its regex pre-compiled. Compilation happens once at load so
/// a bad pattern is rejected before any artifact is scanned.
#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub rule: Rule,
    pub regex: Option<Regex>,
}

impl Rule {
    pub fn compile(self) -> Result<CompiledRule> {
        if self.id.is_empty() {
            anyhow::bail!("rule has an empty id");
        }
        if self.threshold == 0 {
            anyhow::bail!("rule {} has a zero threshold", self.id);
        }
        let regex = match &self.matcher {
            MatchSpec::Regex { pattern } => Some(
                RegexBuilder::new(pattern)
                    .case_insensitive(!self.case_sensitive)
                    .build()
                    .context(format!("rule {} has an invalid pattern", self.id))?,
            ),
            _ => None,
        };
        Ok(CompiledRule { rule: self, regex })
    }
}

/// Load rules from a YAML file holding a sequence of rule descriptors.
/// Malformed entries are logged and dropped; the rest still load.
pub fn load_rules_file(path: &Path) -> Result<Vec<CompiledRule>> {
    let content = std::fs::read_to_string(path)
        .context(format!("Failed to read rules file: {}", path.display()))?;
    let raw: Vec<serde_yaml::Value> =
        serde_yaml::from_str(&content).context("Rules file is not a YAML sequence")?;

    let mut compiled = Vec::new();
    for (index, value) in raw.into_iter().enumerate() {
        let rule: Rule = match serde_yaml::from_value(value) {
            Ok(rule) => rule,
            Err(e) => {
                warn!("Skipping malformed rule at index {}: {}", index, e);
                continue;
            }
        };
        let id = rule.id.clone();
        match rule.compile() {
            Ok(rule) => compiled.push(rule),
            Err(e) => warn!("Skipping rule {}: {:#}", id, e),
        }
    }
    Ok(compiled)
}

/// Rules shipped with the tool. Kept deliberately small; operators extend
/// the set through `custom_rules_path`.
pub fn builtin_rules() -> Vec<Rule> {
    vec![
        Rule {
            id: "HT-NET-001".to_string(),
            name: "Connection to a commonly abused port".to_string(),
            description: "A network endpoint uses a port associated with \
                          remote-access tooling or IRC-based C2."
                .to_string(),
            severity: Severity::High,
            category: "network".to_string(),
            tags: vec!["c2".to_string(), "network".to_string()],
            selector: RuleSelector {
                categories: vec![ArtifactCategory::Network],
                names: Vec::new(),
            },
            matcher: MatchSpec::Regex {
                pattern: r":(4444|1337|31337|6667)\b".to_string(),
            },
            threshold: 1,
            case_sensitive: false,
        },
        Rule {
            id: "HT-PROC-001".to_string(),
            name: "Download piped into a shell".to_string(),
            description: "A process command line fetches remote content and \
                          pipes it directly into a shell interpreter."
                .to_string(),
            severity: Severity::High,
            category: "process".to_string(),
            tags: vec!["execution".to_string(), "download".to_string()],
            selector: RuleSelector {
                categories: vec![ArtifactCategory::Process],
                names: Vec::new(),
            },
            matcher: MatchSpec::Regex {
                pattern: r"(curl|wget)[^\n|]*\|\s*(ba|z)?sh\b".to_string(),
            },
            threshold: 1,
            case_sensitive: false,
        },
        Rule {
            id: "HT-FS-001".to_string(),
            name: "Executable content under a temp directory".to_string(),
            description: "Script or binary files staged under /tmp or a \
                          Windows temp directory."
                .to_string(),
            severity: Severity::Medium,
            category: "filesystem".to_string(),
            tags: vec!["staging".to_string(), "persistence".to_string()],
            selector: RuleSelector {
                categories: vec![ArtifactCategory::Filesystem],
                names: Vec::new(),
            },
            matcher: MatchSpec::Regex {
                pattern: r"(/tmp/|\\temp\\)\S+\.(sh|py|pl|elf|exe|dll|ps1)\b".to_string(),
            },
            threshold: 1,
            case_sensitive: false,
        },
        Rule {
            id: "HT-USER-001".to_string(),
            name: "Account added to an administrative group".to_string(),
            description: "Log lines record a user creation or an addition to \
                          sudo, wheel or the local Administrators group."
                .to_string(),
            severity: Severity::High,
            category: "users".to_string(),
            tags: vec!["privilege-escalation".to_string(), "accounts".to_string()],
            selector: RuleSelector {
                categories: vec![ArtifactCategory::Logs, ArtifactCategory::Users],
                names: Vec::new(),
            },
            matcher: MatchSpec::Regex {
                pattern: r"(useradd\b|usermod\s+-aG\s+(sudo|wheel)|net\s+localgroup\s+administrators\s+\S+\s+/add)"
                    .to_string(),
            },
            threshold: 1,
            case_sensitive: false,
        },
        Rule {
            id: "HT-AUTH-001".to_string(),
            name: "Repeated authentication failures".to_string(),
            description: "An authentication log shows multiple failed logon \
                          attempts, a common brute-force indicator."
                .to_string(),
            severity: Severity::Medium,
            category: "logs".to_string(),
            tags: vec!["brute-force".to_string(), "authentication".to_string()],
            selector: RuleSelector {
                categories: vec![ArtifactCategory::Logs],
                names: Vec::new(),
            },
            matcher: MatchSpec::Substring {
                needle: "failed password".to_string(),
            },
            threshold: 5,
            case_sensitive: false,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_rules_all_compile() {
        for rule in builtin_rules() {
            let id = rule.id.clone();
            rule.compile().unwrap_or_else(|e| panic!("{}: {}", id, e));
        }
    }

    #[test]
    fn test_invalid_regex_rejected_at_compile() {
        let mut rule = builtin_rules().remove(0);
        rule.matcher = MatchSpec::Regex {
            pattern: "(unclosed".to_string(),
        };
        assert!(rule.compile().is_err());
    }

    #[test]
    fn test_zero_threshold_rejected() {
        let mut rule = builtin_rules().remove(0);
        rule.threshold = 0;
        assert!(rule.compile().is_err());
    }

    #[test]
    fn test_empty_selector_matches_everything() {
        let selector = RuleSelector::default();
        let now = chrono::Utc::now();
        let result = ArtifactResult::success(
            crate::catalogue::spec::ArtifactSpec::command("anything", ""),
            crate::models::ArtifactData::Text("x".into()),
            now,
            now,
            "mock",
            "s",
        );
        assert!(selector.matches(&result));
    }

    #[test]
    fn test_rules_yaml_loading_skips_malformed() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("rules.yaml");
        std::fs::write(
            &path,
            r#"
- id: CUSTOM-1
  name: custom rule
  description: test
  severity: low
  category: test
  match:
    substring:
      needle: hello
- id: BROKEN-1
  name: missing fields
"#,
        )
        .unwrap();
        let rules = load_rules_file(&path).unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].rule.id, "CUSTOM-1");
    }

    #[test]
    fn test_rule_yaml_round_trip() {
        let rule = builtin_rules().remove(0);
        let yaml = serde_yaml::to_string(&rule).unwrap();
        let back: Rule = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back, rule);
    }
}
