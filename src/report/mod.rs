//! Report generation: summary, findings and full HTML report derived from
//! the same run and findings.
//!
//! Reports are rendered to in-memory files and handed to the packager, so
//! generation never touches the filesystem and identical inputs always
//! produce identical bytes.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use log::info;

use crate::bundle::manifest::TOOL_VERSION;
use crate::config::{CoreConfig, ReportFormat};
use crate::models::{CollectionRun, Finding, Severity};
use crate::utils::get_hostname;

/// One rendered report, named as it will appear under `reports/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportFile {
    pub name: String,
    pub bytes: Vec<u8>,
}

const SEVERITIES_DESC: [Severity; 4] = [
    Severity::Critical,
    Severity::High,
    Severity::Medium,
    Severity::Low,
];

pub struct ReportGenerator {
    formats: Vec<ReportFormat>,
    platform: String,
}

impl ReportGenerator {
    pub fn new(config: &CoreConfig) -> Self {
        ReportGenerator {
            formats: config.report_formats.clone(),
            platform: config.platform.to_string(),
        }
    }

    /// Render every configured report for one run.
    pub fn generate(&self, run: &CollectionRun, findings: &[Finding]) -> Vec<ReportFile> {
        let mut reports = Vec::new();
        for format in &self.formats {
            match format {
                ReportFormat::Md => {
                    reports.push(ReportFile {
                        name: "summary.md".to_string(),
                        bytes: self.summary_md(run, findings).into_bytes(),
                    });
                    reports.push(ReportFile {
                        name: "findings.md".to_string(),
                        bytes: findings_md(findings).into_bytes(),
                    });
                }
                ReportFormat::Html => reports.push(ReportFile {
                    name: "full_report.html".to_string(),
                    bytes: self.full_report_html(run, findings).into_bytes(),
                }),
                ReportFormat::Json => reports.push(ReportFile {
                    name: "summary.json".to_string(),
                    bytes: summary_json(run, findings),
                }),
            }
        }
        info!("Generated {} report files", reports.len());
        reports
    }

    fn summary_md(&self, run: &CollectionRun, findings: &[Finding]) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "# Triage Summary");
        let _ = writeln!(out);
        let _ = writeln!(out, "- **Host:** {}", get_hostname());
        let _ = writeln!(out, "- **Platform:** {}", self.platform);
        let _ = writeln!(out, "- **Run:** {}", run.run_id);
        let _ = writeln!(out, "- **Started:** {}", run.started_at.to_rfc3339());
        let _ = writeln!(out, "- **Finished:** {}", run.finished_at.to_rfc3339());
        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "Collected {} artifacts, {} findings.",
            run.counters.succeeded,
            findings.len()
        );
        let _ = writeln!(out);

        let _ = writeln!(out, "## Artifacts by category");
        let _ = writeln!(out);
        let by_category = category_counts(run);
        if by_category.is_empty() {
            let _ = writeln!(out, "No artifacts collected.");
        } else {
            let _ = writeln!(out, "| Category | Count |");
            let _ = writeln!(out, "|----------|-------|");
            for (category, count) in &by_category {
                let _ = writeln!(out, "| {} | {} |", category, count);
            }
        }
        let _ = writeln!(out);

        let _ = writeln!(out, "## Findings by severity");
        let _ = writeln!(out);
        let _ = writeln!(out, "| Severity | Count |");
        let _ = writeln!(out, "|----------|-------|");
        for severity in SEVERITIES_DESC {
            let count = findings.iter().filter(|f| f.severity == severity).count();
            let _ = writeln!(out, "| {} | {} |", severity, count);
        }
        let _ = writeln!(out);

        let urgent: Vec<&Finding> = findings
            .iter()
            .filter(|f| f.severity >= Severity::High)
            .collect();
        let _ = writeln!(out, "## High and critical findings");
        let _ = writeln!(out);
        if urgent.is_empty() {
            let _ = writeln!(out, "None.");
        } else {
            for finding in &urgent {
                let _ = writeln!(
                    out,
                    "- **[{}]** {} ({}): {}",
                    finding.severity.to_string().to_uppercase(),
                    finding.rule_name,
                    finding.rule_id,
                    finding.description
                );
            }
        }
        let _ = writeln!(out);

        let _ = writeln!(out, "## Recommendations");
        let _ = writeln!(out);
        for line in recommendations(run, findings) {
            let _ = writeln!(out, "- {}", line);
        }
        out
    }

    fn full_report_html(&self, run: &CollectionRun, findings: &[Finding]) -> String {
        let mut out = String::new();
        out.push_str("<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n");
        out.push_str("<meta charset=\"utf-8\">\n");
        out.push_str("<title>Host Triage Report</title>\n<style>\n");
        out.push_str(EMBEDDED_CSS);
        out.push_str("</style>\n</head>\n<body>\n");

        let _ = writeln!(out, "<h1>Host Triage Report</h1>");
        let _ = writeln!(out, "<table class=\"kv\">");
        let _ = writeln!(
            out,
            "<tr><th>Host</th><td>{}</td></tr>",
            escape(&get_hostname())
        );
        let _ = writeln!(
            out,
            "<tr><th>Platform</th><td>{}</td></tr>",
            escape(&self.platform)
        );
        let _ = writeln!(out, "<tr><th>Run</th><td>{}</td></tr>", escape(&run.run_id));
        let _ = writeln!(
            out,
            "<tr><th>Started</th><td>{}</td></tr>",
            run.started_at.to_rfc3339()
        );
        let _ = writeln!(
            out,
            "<tr><th>Finished</th><td>{}</td></tr>",
            run.finished_at.to_rfc3339()
        );
        let _ = writeln!(out, "</table>");

        let _ = writeln!(out, "<h2>Artifacts</h2>");
        if run.successes().next().is_none() {
            let _ = writeln!(out, "<p>No artifacts collected.</p>");
        } else {
            let _ = writeln!(out, "<table>");
            let _ = writeln!(
                out,
                "<tr><th>Name</th><th>Category</th><th>Type</th>\
                 <th>Size</th><th>Description</th></tr>"
            );
            for result in run.successes() {
                let _ = writeln!(
                    out,
                    "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
                    escape(&result.spec.name),
                    result.spec.category,
                    result.spec.kind,
                    result.size,
                    escape(&result.spec.description)
                );
            }
            let _ = writeln!(out, "</table>");
        }

        let _ = writeln!(out, "<h2>Findings</h2>");
        if findings.is_empty() {
            let _ = writeln!(out, "<p>No findings.</p>");
        } else {
            for severity in SEVERITIES_DESC {
                let group: Vec<&Finding> =
                    findings.iter().filter(|f| f.severity == severity).collect();
                if group.is_empty() {
                    continue;
                }
                let _ = writeln!(
                    out,
                    "<h3 class=\"sev-{}\">{} ({})</h3>",
                    severity,
                    severity.to_string().to_uppercase(),
                    group.len()
                );
                for finding in group {
                    let _ = writeln!(out, "<div class=\"finding sev-{}\">", finding.severity);
                    let _ = writeln!(
                        out,
                        "<p><strong>{}</strong> ({})</p>",
                        escape(&finding.rule_name),
                        escape(&finding.rule_id)
                    );
                    let _ = writeln!(out, "<p>{}</p>", escape(&finding.description));
                    let _ = writeln!(out, "<ul>");
                    for evidence in &finding.evidence {
                        let _ = writeln!(
                            out,
                            "<li><code>{}</code> in <em>{}</em></li>",
                            escape(&evidence.value),
                            escape(&evidence.source)
                        );
                    }
                    let _ = writeln!(out, "</ul>");
                    if !finding.tags.is_empty() {
                        let _ = writeln!(
                            out,
                            "<p class=\"tags\">{}</p>",
                            escape(&finding.tags.join(", "))
                        );
                    }
                    let _ = writeln!(out, "</div>");
                }
            }
        }

        let _ = writeln!(
            out,
            "<footer>host-triage {} &middot; {}</footer>",
            TOOL_VERSION,
            run.finished_at.to_rfc3339()
        );
        out.push_str("</body>\n</html>\n");
        out
    }
}

fn findings_md(findings: &[Finding]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Findings");
    let _ = writeln!(out);
    if findings.is_empty() {
        let _ = writeln!(out, "No findings.");
        let _ = writeln!(out);
    }
    for severity in SEVERITIES_DESC {
        let group: Vec<&Finding> = findings.iter().filter(|f| f.severity == severity).collect();
        if group.is_empty() {
            continue;
        }
        let _ = writeln!(out, "## {}", severity.to_string().to_uppercase());
        let _ = writeln!(out);
        for finding in group {
            let _ = writeln!(out, "### {} ({})", finding.rule_name, finding.rule_id);
            let _ = writeln!(out);
            let _ = writeln!(out, "{}", finding.description);
            let _ = writeln!(out);
            let _ = writeln!(out, "- Category: {}", finding.category);
            if !finding.tags.is_empty() {
                let _ = writeln!(out, "- Tags: {}", finding.tags.join(", "));
            }
            let _ = writeln!(out, "- Evidence:");
            for evidence in &finding.evidence {
                let _ = writeln!(
                    out,
                    "  - `{}` in {} (confidence {:.1})",
                    evidence.value, evidence.source, evidence.confidence
                );
            }
            let _ = writeln!(out);
        }
    }

    let _ = writeln!(out, "## Counts");
    let _ = writeln!(out);
    let _ = writeln!(out, "| Severity | Count |");
    let _ = writeln!(out, "|----------|-------|");
    for severity in SEVERITIES_DESC {
        let count = findings.iter().filter(|f| f.severity == severity).count();
        let _ = writeln!(out, "| {} | {} |", severity, count);
    }
    out
}

fn summary_json(run: &CollectionRun, findings: &[Finding]) -> Vec<u8> {
    let by_severity: BTreeMap<String, usize> = SEVERITIES_DESC
        .iter()
        .map(|s| {
            (
                s.to_string(),
                findings.iter().filter(|f| f.severity == *s).count(),
            )
        })
        .collect();
    let value = serde_json::json!({
        "runID": run.run_id,
        "counters": run.counters,
        "artifactsByCategory": category_counts(run),
        "findingsBySeverity": by_severity,
    });
    let mut bytes = serde_json::to_vec_pretty(&value).unwrap_or_default();
    bytes.push(b'\n');
    bytes
}

fn category_counts(run: &CollectionRun) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for result in run.successes() {
        *counts.entry(result.spec.category.to_string()).or_insert(0) += 1;
    }
    counts
}

fn recommendations(run: &CollectionRun, findings: &[Finding]) -> Vec<String> {
    let mut out = Vec::new();
    if findings.iter().any(|f| f.severity >= Severity::High) {
        out.push(
            "Isolate this host from the network pending investigation of the \
             high and critical findings above."
                .to_string(),
        );
        out.push(
            "Preserve the evidence bundle and verify its checksums before \
             sharing it."
                .to_string(),
        );
    }
    if run.counters.failed > 0 || run.counters.cancelled > 0 {
        out.push(format!(
            "{} artifacts failed or were cancelled; re-run with a longer \
             timeout or elevated privileges to fill the gaps.",
            run.counters.failed + run.counters.cancelled
        ));
    }
    if out.is_empty() {
        out.push(
            "No urgent findings. Archive the bundle with your case records."
                .to_string(),
        );
    }
    out
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

const EMBEDDED_CSS: &str = "\
body { font-family: sans-serif; margin: 2em; color: #222; }
table { border-collapse: collapse; margin: 1em 0; }
th, td { border: 1px solid #ccc; padding: 0.4em 0.8em; text-align: left; }
table.kv th { background: #f4f4f4; width: 8em; }
.finding { border-left: 4px solid #999; padding: 0.2em 1em; margin: 1em 0; }
.sev-critical { border-color: #b71c1c; color: #b71c1c; }
.sev-high { border-color: #e65100; color: #e65100; }
.sev-medium { border-color: #f9a825; color: #7a5c00; }
.sev-low { border-color: #2e7d32; color: #2e7d32; }
.finding p, .finding ul { color: #222; }
.tags { font-size: 0.9em; color: #666; }
footer { margin-top: 3em; font-size: 0.8em; color: #888; }
";
