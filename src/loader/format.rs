//! Rule file parsing: YAML and JSON, entry-by-entry.
//!
//! A rule file carries a `mappings` list, a `rules` list, or both.
//! Parsing is deliberately forgiving at the file level and strict at the
//! entry level: a malformed entry is skipped and reported, the rest of
//! the file still loads. Nothing in here ever panics or propagates an
//! error to the caller; the worst outcome is a report full of issues and
//! zero rules.

use std::{
    fmt, fs,
    path::{Path, PathBuf}
};

use serde_json::Value;
use tracing::warn;

use crate::rules::{Mapping, Rule, Scope, mapping_to_rule, validate_rule};

/// One skipped entry or failed file, with enough context to act on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadIssue {
    pub path:    PathBuf,
    /// Entry label within the file, e.g. `rules[3]`; `None` for
    /// file-level failures.
    pub entry:   Option<String>,
    pub message: String
}

impl fmt::Display for LoadIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.entry {
            Some(entry) => write!(f, "{}: {}: {}", self.path.display(), entry, self.message),
            None => write!(f, "{}: {}", self.path.display(), self.message)
        }
    }
}

/// Result of loading one file: the rules that survived validation plus
/// the issues for everything that did not.
#[derive(Debug, Clone, Default)]
pub struct LoadReport {
    pub rules:  Vec<Rule>,
    pub issues: Vec<LoadIssue>
}

/// Context stamped onto every rule loaded from one source.
#[derive(Debug, Clone, Default)]
pub struct LoadContext {
    pub scope:       Scope,
    pub wing_id:     Option<String>,
    pub pipeline_id: Option<String>,
    pub case_id:     Option<String>
}

/// Load one rule file. Never fails: file-level problems come back as a
/// single issue with no rules.
pub fn load_file(path: &Path, context: &LoadContext) -> LoadReport {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            return LoadReport {
                rules:  Vec::new(),
                issues: vec![LoadIssue {
                    path:    path.to_path_buf(),
                    entry:   None,
                    message: format!("cannot read file: {}", e)
                }]
            };
        }
    };
    load_content(path, &content, context)
}

/// Parse rule content already in memory (a file's text, or the defaults
/// embedded in the binary). `path` only labels issues.
pub fn load_content(path: &Path, content: &str, context: &LoadContext) -> LoadReport {
    let mut report = LoadReport::default();

    let document: Value = match parse_document(path, content) {
        Ok(document) => document,
        Err(message) => {
            report.issues.push(LoadIssue {
                path: path.to_path_buf(),
                entry: None,
                message
            });
            return report;
        }
    };

    // inherit_global + override_global together is contradictory; the
    // file is rejected rather than guessed at.
    let inherit = flag(&document, "inherit_global");
    let override_ = flag(&document, "override_global");
    if inherit && override_ {
        report.issues.push(LoadIssue {
            path:    path.to_path_buf(),
            entry:   None,
            message: "both inherit_global and override_global are set; file skipped".to_string()
        });
        return report;
    }

    if let Some(entries) = document.get("mappings").and_then(Value::as_array) {
        for (index, entry) in entries.iter().enumerate() {
            match parse_mapping_entry(entry, context) {
                Ok(rule) => report.rules.push(rule),
                Err(message) => report.issues.push(LoadIssue {
                    path: path.to_path_buf(),
                    entry: Some(format!("mappings[{}]", index)),
                    message
                })
            }
        }
    }

    if let Some(entries) = document.get("rules").and_then(Value::as_array) {
        for (index, entry) in entries.iter().enumerate() {
            match parse_rule_entry(entry, context) {
                Ok(rule) => report.rules.push(rule),
                Err(message) => report.issues.push(LoadIssue {
                    path: path.to_path_buf(),
                    entry: Some(format!("rules[{}]", index)),
                    message
                })
            }
        }
    }

    for issue in &report.issues {
        warn!(%issue, "rule entry skipped");
    }

    report
}

fn parse_document(path: &Path, content: &str) -> Result<Value, String> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    match extension.as_str() {
        "json" => {
            serde_json::from_str(content).map_err(|e| format!("invalid JSON: {}", e))
        }
        "yaml" | "yml" => {
            serde_yaml::from_str(content).map_err(|e| format!("invalid YAML: {}", e))
        }
        other => Err(format!("unsupported rule file extension '{}'", other))
    }
}

fn flag(document: &Value, key: &str) -> bool {
    document.get(key).and_then(Value::as_bool).unwrap_or(false)
}

fn parse_mapping_entry(entry: &Value, context: &LoadContext) -> Result<Rule, String> {
    let mapping: Mapping =
        serde_json::from_value(entry.clone()).map_err(|e| format!("malformed mapping: {}", e))?;
    let mut rule =
        mapping_to_rule(&mapping, context.scope).map_err(|e| format!("invalid mapping: {}", e))?;
    stamp_context(&mut rule, context);
    Ok(rule)
}

fn parse_rule_entry(entry: &Value, context: &LoadContext) -> Result<Rule, String> {
    let mut rule: Rule =
        serde_json::from_value(entry.clone()).map_err(|e| format!("malformed rule: {}", e))?;
    rule.confidence = rule.confidence.clamp(0.0, 1.0);
    stamp_context(&mut rule, context);
    validate_rule(&rule).map_err(|e| format!("invalid rule: {}", e))?;
    Ok(rule)
}

fn stamp_context(rule: &mut Rule, context: &LoadContext) {
    rule.scope = context.scope;
    rule.wing_id = context.wing_id.clone();
    rule.pipeline_id = context.pipeline_id.clone();
    rule.case_id = context.case_id.clone();
}
