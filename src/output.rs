//! Result formatting for evaluation outcomes and lint reports.

use colored::Colorize;
use serde::Serialize;

use crate::{
    evaluator::EvaluationOutcome,
    loader::{CoverageReport, LoadIssue},
    rules::{Conflict, Severity}
};

/// Output format for results
#[derive(Debug, Clone, Copy, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    Yaml
}

/// Output options
#[derive(Debug, Clone)]
pub struct OutputOptions {
    pub format:  OutputFormat,
    pub colored: bool,
    pub verbose: bool
}

impl Default for OutputOptions {
    fn default() -> Self {
        Self {
            format:  OutputFormat::Text,
            colored: true,
            verbose: false
        }
    }
}

/// Lint result for serialization
#[derive(Debug, Serialize)]
pub struct LintReport {
    pub coverage:  CoverageReport,
    pub issues:    Vec<String>,
    pub conflicts: Vec<String>
}

impl LintReport {
    pub fn new(coverage: CoverageReport, issues: &[LoadIssue], conflicts: &[Conflict]) -> Self {
        Self {
            coverage,
            issues: issues.iter().map(ToString::to_string).collect(),
            conflicts: conflicts.iter().map(ToString::to_string).collect()
        }
    }
}

/// Format one identity's evaluation outcome
pub fn format_evaluation(outcome: &EvaluationOutcome, opts: &OutputOptions) -> String {
    match opts.format {
        OutputFormat::Json => serde_json::to_string_pretty(outcome).unwrap_or_default(),
        OutputFormat::Yaml => serde_yaml::to_string(outcome).unwrap_or_default(),
        OutputFormat::Text => format_evaluation_text(outcome, opts)
    }
}

fn format_evaluation_text(outcome: &EvaluationOutcome, opts: &OutputOptions) -> String {
    let mut output = String::new();

    let header = "=== Semantic Evaluation ===\n\n";
    if opts.colored {
        output.push_str(&header.bold().to_string());
    } else {
        output.push_str(header);
    }

    if outcome.matches.is_empty() {
        output.push_str("No semantic rules matched.\n");
    }

    for matched in &outcome.matches {
        let severity_tag = format!("[{}]", matched.severity);
        let severity_tag = if opts.colored {
            colorize_severity(&severity_tag, matched.severity)
        } else {
            severity_tag
        };
        output.push_str(&format!(
            "{} {} ({})\n",
            severity_tag, matched.semantic_value, matched.rule_id
        ));

        let stores: Vec<&str> = matched.matched_stores.iter().map(String::as_str).collect();
        output.push_str(&format!("  stores: {}\n", stores.join(", ")));
        output.push_str(&format!(
            "  scope: {}  confidence: {:.2}\n",
            matched.scope, matched.confidence
        ));
        if opts.verbose {
            for condition in &matched.conditions {
                output.push_str(&format!("  condition: {}\n", condition));
            }
        }
        output.push('\n');
    }

    if outcome.stats.cancelled {
        let note = "Evaluation cancelled; results are partial.\n";
        if opts.colored {
            output.push_str(&note.yellow().to_string());
        } else {
            output.push_str(note);
        }
    }

    output.push_str(&format!(
        "{} matched, {} evaluated, {} fallbacks, {} stores skipped\n",
        outcome.matches.len(),
        outcome.stats.rules_evaluated,
        outcome.stats.fallback_evaluations,
        outcome.stats.stores_skipped
    ));

    if opts.verbose && !outcome.decision_log.is_empty() {
        output.push_str("\nDecision log:\n");
        for entry in &outcome.decision_log {
            output.push_str(&format!("  - {}\n", entry));
        }
    }

    output
}

/// Format a lint report over all loaded rule scopes
pub fn format_lint(report: &LintReport, opts: &OutputOptions) -> String {
    match opts.format {
        OutputFormat::Json => serde_json::to_string_pretty(report).unwrap_or_default(),
        OutputFormat::Yaml => serde_yaml::to_string(report).unwrap_or_default(),
        OutputFormat::Text => format_lint_text(report, opts)
    }
}

fn format_lint_text(report: &LintReport, opts: &OutputOptions) -> String {
    let mut output = String::new();

    let header = "=== Rule Lint ===\n\n";
    if opts.colored {
        output.push_str(&header.bold().to_string());
    } else {
        output.push_str(header);
    }

    output.push_str(&format!("Total rules: {}\n", report.coverage.total_rules));
    for (scope, count) in &report.coverage.per_scope {
        output.push_str(&format!("  {}: {}\n", scope, count));
    }

    if !report.coverage.per_store.is_empty() {
        output.push_str("\nRules per store:\n");
        for (store, count) in &report.coverage.per_store {
            output.push_str(&format!("  {}: {}\n", store, count));
        }
    }

    if !report.coverage.per_category.is_empty() {
        output.push_str("\nRules per category:\n");
        for (category, count) in &report.coverage.per_category {
            output.push_str(&format!("  {}: {}\n", category, count));
        }
    }

    if !report.issues.is_empty() {
        let title = format!("\n{} entries skipped:\n", report.issues.len());
        if opts.colored {
            output.push_str(&title.yellow().to_string());
        } else {
            output.push_str(&title);
        }
        for issue in &report.issues {
            output.push_str(&format!("  - {}\n", issue));
        }
    }

    if !report.conflicts.is_empty() {
        let title = format!("\n{} mapping conflicts:\n", report.conflicts.len());
        if opts.colored {
            output.push_str(&title.red().to_string());
        } else {
            output.push_str(&title);
        }
        for conflict in &report.conflicts {
            output.push_str(&format!("  - {}\n", conflict));
        }
    }

    output
}

fn colorize_severity(text: &str, severity: Severity) -> String {
    match severity {
        Severity::Info => text.green().to_string(),
        Severity::Low => text.cyan().to_string(),
        Severity::Medium => text.yellow().to_string(),
        Severity::High => text.red().to_string(),
        Severity::Critical => text.red().bold().to_string()
    }
}
