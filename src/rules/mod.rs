//! Semantic rule model and in-memory evaluation semantics.
//!
//! Rules are declarative predicates over per-store fields that produce a
//! semantic label on match. This module defines the canonical in-memory
//! evaluation used by the fallback path and by identity-level rules:
//!
//! ```text
//! ┌───────────────┐     ┌──────────────────┐     ┌──────────────────┐
//! │ RecordBundle  │────▶│ Rule::evaluate   │────▶│ RuleOutcome      │
//! │ store -> row  │     │ (AND/OR fold)    │     │ matched + stores │
//! └───────────────┘     └──────────────────┘     └──────────────────┘
//! ```
//!
//! For each condition the row for `store_id` is looked up; a missing row
//! or missing field makes the condition false. Truthy conditions record
//! `store_id.field_name`; AND requires every condition true, OR at least
//! one. The SQL fast path in [`crate::query`] must agree with these
//! semantics for every translatable rule - that equivalence is the
//! engine's central correctness property.
//!
//! # Operator semantics
//!
//! | Operator | In-memory behavior |
//! |---|---|
//! | equals / not_equals | case-sensitive; numeric when both sides numeric |
//! | contains | case-insensitive substring |
//! | regex | case-insensitive, cached; invalid pattern matches nothing |
//! | wildcard | field present, non-null, non-empty |
//! | ordering | numeric when the literal is numeric, else lexicographic |

mod types;

use std::borrow::Cow;

pub use types::{
    Condition, ConditionValue, ConditionVec, Conflict, IDENTITY_STORE, InterpretationThresholds,
    LogicOperator, MAX_RULE_CONDITIONS, Mapping, Operator, Rule, RuleProvenance, RuleSet,
    ScoringWeights, SemanticMatch, Severity, Scope
};
use serde_json::Value;
use smallvec::SmallVec;
use thiserror::Error;

use crate::{cache::compile_pattern_cached, identity::RecordBundle};

/// Result of evaluating one rule against an in-memory record bundle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleOutcome {
    pub matched:            bool,
    /// `store_id.field_name` strings of the conditions that held.
    pub matched_conditions: Vec<String>,
    /// Stores contributing the conditions that held.
    pub matched_stores:     std::collections::BTreeSet<String>
}

impl Rule {
    /// Evaluate this rule against an in-memory record bundle.
    ///
    /// This is the reference semantics every other evaluation path must
    /// reproduce. A condition whose store or field is absent is false; no
    /// error is possible.
    pub fn evaluate(&self, records: &RecordBundle) -> RuleOutcome {
        // A rule without conditions matches nothing on any path.
        if self.conditions.is_empty() {
            return RuleOutcome::default();
        }

        let mut matched_conditions = Vec::new();
        let mut matched_stores = std::collections::BTreeSet::new();

        for condition in &self.conditions {
            let value = records
                .get(condition.store_id.as_str())
                .and_then(|row| row.get(condition.field_name.as_str()));

            let holds = match value {
                Some(field) => condition_matches(condition, field),
                None => false
            };

            if holds {
                matched_conditions.push(format!("{}.{}", condition.store_id, condition.field_name));
                matched_stores.insert(condition.store_id.to_string());
            } else if self.logic_operator == LogicOperator::And {
                return RuleOutcome::default();
            }
        }

        let matched = match self.logic_operator {
            LogicOperator::And => matched_conditions.len() == self.conditions.len(),
            LogicOperator::Or => !matched_conditions.is_empty()
        };

        if !matched {
            return RuleOutcome::default();
        }
        RuleOutcome {
            matched,
            matched_conditions,
            matched_stores
        }
    }
}

/// Apply one condition to a field value already in memory.
pub fn condition_matches(condition: &Condition, field: &Value) -> bool {
    match condition.operator {
        Operator::Wildcard => field_present(field),
        Operator::Equals => equals(condition.value.as_ref(), field),
        Operator::NotEquals => {
            // A null field compares unequal to nothing, matching SQL.
            !field.is_null() && !equals(condition.value.as_ref(), field)
        }
        Operator::Contains => {
            let Some(needle) = condition_text(condition) else {
                return false;
            };
            match field_text(field) {
                Some(haystack) => haystack.to_lowercase().contains(&needle.to_lowercase()),
                None => false
            }
        }
        Operator::Regex => {
            let Some(pattern) = condition_text(condition) else {
                return false;
            };
            let Some(regex) = compile_pattern_cached(&pattern) else {
                // Invalid pattern: the condition fails on every path.
                return false;
            };
            match field_text(field) {
                Some(text) => regex.is_match(&text),
                None => false
            }
        }
        Operator::GreaterThan | Operator::LessThan | Operator::GreaterEqual | Operator::LessEqual => {
            ordering_matches(condition, field)
        }
    }
}

fn field_present(field: &Value) -> bool {
    match field {
        Value::Null => false,
        Value::String(s) => !s.is_empty(),
        _ => true
    }
}

fn equals(literal: Option<&ConditionValue>, field: &Value) -> bool {
    let Some(literal) = literal else {
        return false;
    };
    if field.is_null() {
        return false;
    }
    if literal.is_numeric()
        && let Some(lhs) = field_number(field)
        && let Some(rhs) = literal.as_f64()
    {
        return lhs == rhs;
    }
    match field_text(field) {
        Some(text) => text == literal.to_string(),
        None => false
    }
}

fn ordering_matches(condition: &Condition, field: &Value) -> bool {
    let Some(literal) = condition.value.as_ref() else {
        return false;
    };
    if field.is_null() {
        return false;
    }
    if let Some(rhs) = literal.as_f64() {
        let Some(lhs) = field_number(field) else {
            return false;
        };
        return apply_ordering(condition.operator, lhs.partial_cmp(&rhs));
    }
    let Some(text) = field_text(field) else {
        return false;
    };
    let rhs = literal.to_string();
    apply_ordering(condition.operator, Some(text.as_ref().cmp(rhs.as_str())))
}

fn apply_ordering(operator: Operator, ordering: Option<std::cmp::Ordering>) -> bool {
    use std::cmp::Ordering::{Equal, Greater, Less};
    let Some(ordering) = ordering else {
        return false;
    };
    match operator {
        Operator::GreaterThan => ordering == Greater,
        Operator::LessThan => ordering == Less,
        Operator::GreaterEqual => matches!(ordering, Greater | Equal),
        Operator::LessEqual => matches!(ordering, Less | Equal),
        _ => false
    }
}

fn condition_text(condition: &Condition) -> Option<String> {
    condition.value.as_ref().map(ToString::to_string)
}

/// Text view of a field value: strings as-is, numbers and booleans
/// rendered; null, arrays, and objects have none.
fn field_text(field: &Value) -> Option<Cow<'_, str>> {
    match field {
        Value::String(s) => Some(Cow::Borrowed(s.as_str())),
        Value::Number(n) => Some(Cow::Owned(n.to_string())),
        Value::Bool(b) => Some(Cow::Owned(b.to_string())),
        _ => None
    }
}

fn field_number(field: &Value) -> Option<f64> {
    match field {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None
    }
}

/// Why a rule or mapping failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuleError {
    #[error("rule_id is empty")]
    EmptyRuleId,
    #[error("semantic_value is empty")]
    EmptySemanticValue,
    #[error("rule has no conditions")]
    NoConditions,
    #[error("rule has {0} conditions, maximum is {MAX_RULE_CONDITIONS}")]
    TooManyConditions(usize),
    #[error("field name '{0}' {1}")]
    InvalidFieldName(String, &'static str),
    #[error("operator '{0}' requires a value")]
    MissingValue(Operator),
    #[error("mapping needs exactly one of technical_value or pattern")]
    AmbiguousMapping
}

/// Check a field name against the identifier rules shared by the loader
/// and the query builder.
pub fn field_name_problem(field_name: &str) -> Option<&'static str> {
    if field_name.is_empty() {
        return Some("is empty");
    }
    if !field_name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
    {
        return Some("contains characters outside [A-Za-z0-9_.]");
    }
    if field_name.matches('.').count() > 1 {
        return Some("has more than one dot");
    }
    None
}

/// Validate a rule's structural invariants.
///
/// The loader calls this for every parsed entry; invalid entries are
/// skipped and reported, never repaired.
pub fn validate_rule(rule: &Rule) -> Result<(), RuleError> {
    if rule.rule_id.trim().is_empty() {
        return Err(RuleError::EmptyRuleId);
    }
    if rule.semantic_value.trim().is_empty() {
        return Err(RuleError::EmptySemanticValue);
    }
    if rule.conditions.is_empty() {
        return Err(RuleError::NoConditions);
    }
    if rule.conditions.len() > MAX_RULE_CONDITIONS {
        return Err(RuleError::TooManyConditions(rule.conditions.len()));
    }
    for condition in &rule.conditions {
        if let Some(problem) = field_name_problem(&condition.field_name) {
            return Err(RuleError::InvalidFieldName(
                condition.field_name.to_string(),
                problem
            ));
        }
        if condition.operator.requires_value() && condition.value.is_none() {
            return Err(RuleError::MissingValue(condition.operator));
        }
    }
    Ok(())
}

/// Convert an authoring mapping to the canonical rule form.
///
/// The derived `rule_id` is a pure function of the mapping key, keeping it
/// stable across reloads.
pub fn mapping_to_rule(mapping: &Mapping, scope: Scope) -> Result<Rule, RuleError> {
    let primary = match (&mapping.technical_value, &mapping.pattern) {
        (Some(value), None) => Condition {
            store_id:   mapping.source.clone(),
            field_name: mapping.field.clone(),
            operator:   Operator::Equals,
            value:      Some(value.clone())
        },
        (None, Some(pattern)) => Condition {
            store_id:   mapping.source.clone(),
            field_name: mapping.field.clone(),
            operator:   Operator::Regex,
            value:      Some(ConditionValue::Text(pattern.clone()))
        },
        _ => return Err(RuleError::AmbiguousMapping)
    };

    let key = match &primary.value {
        Some(value) => value.to_string(),
        None => String::new()
    };
    let mut conditions: ConditionVec = SmallVec::new();
    conditions.push(primary);
    conditions.extend(mapping.conditions.iter().cloned());

    let rule = Rule {
        rule_id:        format!("mapping:{}.{}:{}", mapping.source, mapping.field, key),
        name:           mapping.semantic_value.clone(),
        description:    String::new(),
        category:       mapping.category.clone(),
        severity:       mapping.severity,
        confidence:     mapping.confidence.clamp(0.0, 1.0),
        conditions,
        logic_operator: LogicOperator::And,
        semantic_value: mapping.semantic_value.clone(),
        artifact_type:  mapping.artifact_type.clone(),
        scope,
        wing_id:        None,
        pipeline_id:    None,
        case_id:        None
    };
    validate_rule(&rule)?;
    Ok(rule)
}

/// Detect mapping-level conflicts in a set of rules.
///
/// A conflict is two rules with the same `(store_id, field_name,
/// technical_value)` key but different semantic values.
pub fn conflict_report(rules: &[Rule]) -> Vec<Conflict> {
    use std::collections::BTreeMap;

    let mut by_key: BTreeMap<(String, String, String), Vec<&Rule>> = BTreeMap::new();
    for rule in rules {
        if let Some((store_id, field_name, value)) = rule.mapping_key() {
            by_key
                .entry((store_id.to_string(), field_name.to_string(), value))
                .or_default()
                .push(rule);
        }
    }

    let mut conflicts = Vec::new();
    for ((store_id, field_name, technical_value), entries) in by_key {
        let mut semantic_values: Vec<String> =
            entries.iter().map(|r| r.semantic_value.clone()).collect();
        semantic_values.sort();
        semantic_values.dedup();
        if semantic_values.len() > 1 {
            conflicts.push(Conflict {
                store_id: store_id.into(),
                field_name: field_name.into(),
                technical_value,
                rule_ids: entries.iter().map(|r| r.rule_id.clone()).collect(),
                semantic_values
            });
        }
    }
    conflicts
}
