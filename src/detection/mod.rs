//! Detection engine: applies compiled rules to a finished collection run
//! and produces ordered findings.
//!
//! Evaluation is pure over the run's successful results; rules never see
//! failed or skipped artifacts. Findings come out in a deterministic
//! order so two passes over the same run are byte-identical downstream.

pub mod rules;

use std::cmp::Reverse;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::config::CoreConfig;
use crate::models::{
    ArtifactData, ArtifactResult, CollectionRun, Evidence, Finding, Severity,
};
use crate::utils::clock::Clock;
use rules::{builtin_rules, load_rules_file, CompiledRule, MatchSpec};

/// Evidence cap per (rule, artifact) pair; a chatty log line repeated ten
/// thousand times still reads as one signal.
const MAX_EVIDENCE_PER_RESULT: usize = 25;

pub struct DetectionEngine {
    rules: Vec<CompiledRule>,
    min_severity: Severity,
    timeout: Duration,
    clock: Arc<dyn Clock>,
}

impl DetectionEngine {
    /// Build the engine from the built-in rule set plus any custom rules
    /// the configuration names. Rule loading failures degrade to the
    /// built-in set rather than aborting.
    pub fn new(config: &CoreConfig, clock: Arc<dyn Clock>) -> Self {
        let mut rules: Vec<CompiledRule> = Vec::new();
        for rule in builtin_rules() {
            let id = rule.id.clone();
            match rule.compile() {
                Ok(compiled) => rules.push(compiled),
                Err(e) => warn!("Built-in rule {} failed to compile: {:#}", id, e),
            }
        }
        if let Some(path) = &config.custom_rules_path {
            match load_rules_file(path) {
                Ok(custom) => {
                    info!("Loaded {} custom rules from {}", custom.len(), path.display());
                    rules.extend(custom);
                }
                Err(e) => warn!("Failed to load custom rules: {:#}", e),
            }
        }
        if let Some(path) = &config.sigma_rules_path {
            warn!(
                "Sigma rule translation is not built in, ignoring {}",
                path.display()
            );
        }
        DetectionEngine {
            rules,
            min_severity: config.min_severity,
            timeout: Duration::from_secs(config.detection_timeout_secs),
            clock,
        }
    }

    #[cfg(test)]
    pub fn with_rules(rules: Vec<CompiledRule>, clock: Arc<dyn Clock>) -> Self {
        DetectionEngine {
            rules,
            min_severity: Severity::Low,
            timeout: Duration::from_secs(60),
            clock,
        }
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    pub fn rules(&self) -> impl Iterator<Item = &rules::Rule> {
        self.rules.iter().map(|c| &c.rule)
    }

    /// Evaluate every rule against the run's successful results.
    pub fn detect(&self, run: &CollectionRun) -> Vec<Finding> {
        let started = Instant::now();
        let mut findings = Vec::new();

        for compiled in &self.rules {
            if started.elapsed() > self.timeout {
                warn!(
                    "Detection budget exhausted after {} rules, skipping the rest",
                    findings.len()
                );
                break;
            }
            if compiled.rule.severity < self.min_severity {
                continue;
            }

            let mut evidence = Vec::new();
            let mut matches = 0usize;
            for result in run.successes() {
                if !compiled.rule.selector.matches(result) {
                    continue;
                }
                let (items, raw) = evaluate(compiled, result);
                matches += raw;
                evidence.extend(items);
            }

            // threshold compares against the raw match count; the stored
            // evidence is capped separately
            if matches >= compiled.rule.threshold {
                debug!(
                    "Rule {} fired with {} matches ({} kept as evidence)",
                    compiled.rule.id,
                    matches,
                    evidence.len()
                );
                findings.push(Finding {
                    rule_id: compiled.rule.id.clone(),
                    rule_name: compiled.rule.name.clone(),
                    category: compiled.rule.category.clone(),
                    severity: compiled.rule.severity,
                    description: compiled.rule.description.clone(),
                    tags: compiled.rule.tags.clone(),
                    timestamp: self.clock.now(),
                    evidence,
                });
            }
        }

        findings.sort_by(|a, b| {
            (Reverse(a.severity), &a.rule_id, first_source(a))
                .cmp(&(Reverse(b.severity), &b.rule_id, first_source(b)))
        });
        info!("Detection produced {} findings", findings.len());
        findings
    }
}

fn first_source(finding: &Finding) -> &str {
    finding
        .evidence
        .first()
        .map(|e| e.source.as_str())
        .unwrap_or("")
}

/// Apply one rule's matcher to one result. Returns the evidence items
/// (capped at [`MAX_EVIDENCE_PER_RESULT`]) together with the raw match
/// count, which is what the rule's threshold is compared against.
fn evaluate(compiled: &CompiledRule, result: &ArtifactResult) -> (Vec<Evidence>, usize) {
    match &compiled.rule.matcher {
        MatchSpec::Regex { .. } => {
            let regex = match &compiled.regex {
                Some(regex) => regex,
                None => return (Vec::new(), 0),
            };
            let text = result.data.as_text();
            let mut raw = 0;
            let mut items = Vec::new();
            for m in regex.find_iter(&text) {
                raw += 1;
                if items.len() < MAX_EVIDENCE_PER_RESULT {
                    items.push(Evidence {
                        kind: "regex_match".to_string(),
                        source: result.spec.name.clone(),
                        value: m.as_str().to_string(),
                        description: format!("pattern matched in {}", result.spec.name),
                        confidence: 0.9,
                    });
                }
            }
            (items, raw)
        }
        MatchSpec::Substring { needle } => {
            let text = result.data.as_text();
            let hits = find_all(&text, needle, !compiled.rule.case_sensitive);
            let raw = hits.len();
            let items = hits
                .into_iter()
                .take(MAX_EVIDENCE_PER_RESULT)
                .map(|value| Evidence {
                    kind: "substring_match".to_string(),
                    source: result.spec.name.clone(),
                    value,
                    description: format!("substring found in {}", result.spec.name),
                    confidence: 0.7,
                })
                .collect();
            (items, raw)
        }
        MatchSpec::JsonPath { pointer, contains } => {
            let items: Vec<Evidence> = structured_value(result, pointer)
                .filter(|rendered| match contains {
                    Some(needle) => rendered
                        .to_lowercase()
                        .contains(&needle.to_lowercase()),
                    None => true,
                })
                .map(|value| Evidence {
                    kind: "structured_match".to_string(),
                    source: result.spec.name.clone(),
                    value,
                    description: format!("{} present in {}", pointer, result.spec.name),
                    confidence: 0.8,
                })
                .into_iter()
                .collect();
            let raw = items.len();
            (items, raw)
        }
        MatchSpec::StructuredPredicate { pointer, equals } => {
            let matched = match &result.data {
                ArtifactData::Structured(v) => {
                    v.pointer(pointer).map(|found| found == equals).unwrap_or(false)
                }
                _ => false,
            };
            if matched {
                let items = vec![Evidence {
                    kind: "structured_match".to_string(),
                    source: result.spec.name.clone(),
                    value: render_value(equals),
                    description: format!("{} equals expected value", pointer),
                    confidence: 0.8,
                }];
                (items, 1)
            } else {
                (Vec::new(), 0)
            }
        }
    }
}

fn structured_value(result: &ArtifactResult, pointer: &str) -> Option<String> {
    match &result.data {
        ArtifactData::Structured(v) => v.pointer(pointer).map(render_value),
        _ => None,
    }
}

fn render_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// All occurrences of `needle` in `haystack`, returning the matched slices
/// from the original text.
fn find_all(haystack: &str, needle: &str, case_insensitive: bool) -> Vec<String> {
    if needle.is_empty() {
        return Vec::new();
    }
    let (h, n) = if case_insensitive {
        (haystack.to_lowercase(), needle.to_lowercase())
    } else {
        (haystack.to_string(), needle.to_string())
    };
    let mut matches = Vec::new();
    let mut offset = 0;
    while let Some(pos) = h[offset..].find(&n) {
        let start = offset + pos;
        let end = start + n.len();
        // lowercasing may shift byte offsets for non-ASCII text; fall back
        // to the needle itself rather than slicing off a char boundary
        let value = haystack.get(start..end).unwrap_or(needle).to_string();
        matches.push(value);
        offset = end;
    }
    matches
}
