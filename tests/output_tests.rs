// SPDX-FileCopyrightText: 2026 Crow Forensics
// SPDX-License-Identifier: MIT

use std::collections::BTreeSet;

use artifact_semantics::{
    evaluator::{EvaluationOutcome, StatisticsSnapshot},
    output::{LintReport, OutputFormat, OutputOptions, format_evaluation, format_lint},
    rules::{Conflict, LogicOperator, Scope, SemanticMatch, Severity}
};

fn sample_match(severity: Severity) -> SemanticMatch {
    SemanticMatch {
        rule_id: "identity-web-browser".to_string(),
        rule_name: "Web Browser Activity".to_string(),
        semantic_value: "Web Browser Activity".to_string(),
        logic_operator: LogicOperator::And,
        category: "user_activity".to_string(),
        severity,
        confidence: 0.9,
        scope: Scope::Global,
        matched_stores: BTreeSet::from(["prefetch".to_string(), "srum".to_string()]),
        conditions: vec!["prefetch.executable_name regex '(?i)CHROME'".to_string()]
    }
}

fn sample_outcome(severity: Severity) -> EvaluationOutcome {
    EvaluationOutcome {
        matches:      vec![sample_match(severity)],
        stats:        StatisticsSnapshot {
            identities_evaluated: 1,
            rules_evaluated: 3,
            rules_matched: 1,
            identities_with_matches: 1,
            ..Default::default()
        },
        decision_log: vec!["scope override: rule 'R1' from wing scope".to_string()]
    }
}

fn plain_text() -> OutputOptions {
    OutputOptions {
        format:  OutputFormat::Text,
        colored: false,
        verbose: false
    }
}

#[test]
fn test_text_output_lists_match_and_stores() {
    let text = format_evaluation(&sample_outcome(Severity::Info), &plain_text());
    assert!(text.contains("Web Browser Activity"));
    assert!(text.contains("identity-web-browser"));
    assert!(text.contains("prefetch, srum"));
    assert!(text.contains("[INFO]"));
}

#[test]
fn test_text_output_without_matches() {
    let outcome = EvaluationOutcome {
        matches:      Vec::new(),
        stats:        StatisticsSnapshot::default(),
        decision_log: Vec::new()
    };
    let text = format_evaluation(&outcome, &plain_text());
    assert!(text.contains("No semantic rules matched"));
}

#[test]
fn test_verbose_text_includes_conditions_and_log() {
    let opts = OutputOptions {
        verbose: true,
        ..plain_text()
    };
    let text = format_evaluation(&sample_outcome(Severity::Info), &opts);
    assert!(text.contains("condition: prefetch.executable_name"));
    assert!(text.contains("Decision log:"));
    assert!(text.contains("scope override"));
}

#[test]
fn test_non_verbose_text_omits_decision_log() {
    let text = format_evaluation(&sample_outcome(Severity::Info), &plain_text());
    assert!(!text.contains("Decision log:"));
}

#[test]
fn test_cancelled_outcome_is_flagged() {
    let mut outcome = sample_outcome(Severity::Info);
    outcome.stats.cancelled = true;
    let text = format_evaluation(&outcome, &plain_text());
    assert!(text.contains("cancelled"));
}

#[test]
fn test_json_output_round_trips() {
    let opts = OutputOptions {
        format: OutputFormat::Json,
        ..plain_text()
    };
    let json = format_evaluation(&sample_outcome(Severity::High), &opts);
    let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();

    assert_eq!(parsed["matches"][0]["rule_id"], "identity-web-browser");
    assert_eq!(parsed["matches"][0]["severity"], "high");
    assert_eq!(parsed["stats"]["rules_matched"], 1);
    assert!(parsed["decision_log"].is_array());
}

#[test]
fn test_yaml_output_parses() {
    let opts = OutputOptions {
        format: OutputFormat::Yaml,
        ..plain_text()
    };
    let yaml = format_evaluation(&sample_outcome(Severity::Low), &opts);
    let parsed: serde_yaml::Value = serde_yaml::from_str(&yaml).unwrap();
    assert_eq!(
        parsed["matches"][0]["semantic_value"],
        serde_yaml::Value::String("Web Browser Activity".to_string())
    );
}

#[test]
fn test_severity_tags_in_text() {
    for (severity, tag) in [
        (Severity::Low, "[LOW]"),
        (Severity::Medium, "[MEDIUM]"),
        (Severity::High, "[HIGH]"),
        (Severity::Critical, "[CRITICAL]"),
    ] {
        let text = format_evaluation(&sample_outcome(severity), &plain_text());
        assert!(text.contains(tag), "missing {}", tag);
    }
}

fn sample_lint() -> LintReport {
    let mut per_scope = indexmap::IndexMap::new();
    per_scope.insert("global".to_string(), 2usize);
    let coverage = artifact_semantics::loader::CoverageReport {
        total_rules: 2,
        per_scope,
        per_store: indexmap::IndexMap::new(),
        per_category: indexmap::IndexMap::new(),
        issues: 1,
        conflicts: 1
    };
    let conflict = Conflict {
        store_id:        "SecurityLogs".into(),
        field_name:      "EventID".into(),
        technical_value: "4624".to_string(),
        rule_ids:        vec!["a".to_string(), "b".to_string()],
        semantic_values: vec!["User Login".to_string(), "Logon".to_string()]
    };
    LintReport {
        coverage,
        issues: vec!["rules.yaml: mappings[1]: invalid mapping".to_string()],
        conflicts: vec![conflict.to_string()]
    }
}

#[test]
fn test_lint_text_output() {
    let text = format_lint(&sample_lint(), &plain_text());
    assert!(text.contains("Total rules: 2"));
    assert!(text.contains("global: 2"));
    assert!(text.contains("entries skipped"));
    assert!(text.contains("mapping conflicts"));
    assert!(text.contains("4624"));
}

#[test]
fn test_lint_json_output() {
    let opts = OutputOptions {
        format: OutputFormat::Json,
        ..plain_text()
    };
    let json = format_lint(&sample_lint(), &opts);
    let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed["coverage"]["total_rules"], 2);
    assert_eq!(parsed["issues"].as_array().unwrap().len(), 1);
}
