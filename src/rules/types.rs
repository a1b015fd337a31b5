//! Type definitions for the semantic rule system.
//!
//! This module defines the core types used throughout the engine:
//! - [`Severity`] - Rule severity levels (Info through Critical)
//! - [`Scope`] - Precedence scope a rule was loaded from
//! - [`Condition`] / [`Operator`] / [`ConditionValue`] - Typed predicates
//! - [`Rule`] - Compound semantic rule with AND/OR logic
//! - [`Mapping`] - One-condition authoring shorthand
//! - [`SemanticMatch`] - Evaluation output
//! - [`RuleSet`] / [`Conflict`] - Loader products

use std::collections::BTreeSet;
use std::path::PathBuf;

use compact_str::CompactString;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Maximum number of conditions a single rule may carry.
pub const MAX_RULE_CONDITIONS: usize = 10;

/// Store identifier that addresses the identity itself rather than a store.
pub const IDENTITY_STORE: &str = "_identity";

/// Severity level attached to a rule and its matches.
///
/// Ordered from lowest to highest for sorting and exit-code purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Info,
    Low,
    Medium,
    High,
    Critical
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info => write!(f, "INFO"),
            Self::Low => write!(f, "LOW"),
            Self::Medium => write!(f, "MEDIUM"),
            Self::High => write!(f, "HIGH"),
            Self::Critical => write!(f, "CRITICAL")
        }
    }
}

/// Precedence scope a rule originates from.
///
/// [`Scope::priority`] gives the numeric rank used by the scope resolver
/// (higher wins).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    BuiltIn,
    #[default]
    Global,
    Pipeline,
    Wing,
    Case
}

impl Scope {
    /// Numeric precedence rank, higher wins.
    pub fn priority(&self) -> u8 {
        match self {
            Self::BuiltIn => 0,
            Self::Global => 1,
            Self::Pipeline => 2,
            Self::Wing => 3,
            Self::Case => 4
        }
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BuiltIn => write!(f, "built_in"),
            Self::Global => write!(f, "global"),
            Self::Pipeline => write!(f, "pipeline"),
            Self::Wing => write!(f, "wing"),
            Self::Case => write!(f, "case")
        }
    }
}

/// Top-level combinator for a rule's conditions. Single level, no nesting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum LogicOperator {
    #[default]
    #[serde(rename = "AND", alias = "and")]
    And,
    #[serde(rename = "OR", alias = "or")]
    Or
}

impl std::fmt::Display for LogicOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::And => write!(f, "AND"),
            Self::Or => write!(f, "OR")
        }
    }
}

/// Comparison operator of a single condition.
///
/// Exactly nine operators are supported; each maps one-to-one onto a SQL
/// fragment in the query builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Equals,
    NotEquals,
    Contains,
    Regex,
    Wildcard,
    GreaterThan,
    LessThan,
    GreaterEqual,
    LessEqual
}

impl Operator {
    /// Whether this operator requires a comparison value.
    ///
    /// `wildcard` asserts "field present and non-empty" and ignores any
    /// value; every other operator needs one.
    pub fn requires_value(&self) -> bool {
        !matches!(self, Self::Wildcard)
    }

    /// Whether this operator performs an ordering comparison.
    pub fn is_ordering(&self) -> bool {
        matches!(
            self,
            Self::GreaterThan | Self::LessThan | Self::GreaterEqual | Self::LessEqual
        )
    }
}

impl std::fmt::Display for Operator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Equals => write!(f, "equals"),
            Self::NotEquals => write!(f, "not_equals"),
            Self::Contains => write!(f, "contains"),
            Self::Regex => write!(f, "regex"),
            Self::Wildcard => write!(f, "wildcard"),
            Self::GreaterThan => write!(f, "greater_than"),
            Self::LessThan => write!(f, "less_than"),
            Self::GreaterEqual => write!(f, "greater_equal"),
            Self::LessEqual => write!(f, "less_equal")
        }
    }
}

/// Typed literal carried by a condition.
///
/// Rule files may supply strings, integers, or floats; anything else is a
/// parse error for that entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConditionValue {
    Integer(i64),
    Number(f64),
    Text(String)
}

impl ConditionValue {
    /// Numeric view of the value, if it has one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Integer(i) => Some(*i as f64),
            Self::Number(n) => Some(*n),
            Self::Text(_) => None
        }
    }

    /// Whether the literal is numeric (integer or float).
    pub fn is_numeric(&self) -> bool {
        !matches!(self, Self::Text(_))
    }
}

impl std::fmt::Display for ConditionValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Integer(i) => write!(f, "{}", i),
            Self::Number(n) => write!(f, "{}", n),
            Self::Text(s) => write!(f, "{}", s)
        }
    }
}

/// A single predicate against one store.
///
/// `field_name` is a literal column name. A single embedded dot is
/// permitted and is NOT interpreted as nested access; two or more dots are
/// rejected by validation and by the query builder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    /// Store the predicate addresses; `_identity` targets the identity.
    pub store_id:   CompactString,
    /// Literal column name in the store's data table.
    pub field_name: CompactString,
    /// Comparison operator.
    pub operator:   Operator,
    /// Comparison value; `None` only with the `wildcard` operator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value:      Option<ConditionValue>
}

impl Condition {
    /// Whether this condition targets the identity rather than a store.
    pub fn is_identity(&self) -> bool {
        self.store_id == IDENTITY_STORE
    }

    /// Human-readable rendering used in match audit trails.
    pub fn describe(&self) -> String {
        match &self.value {
            Some(value) => format!(
                "{}.{} {} '{}'",
                self.store_id, self.field_name, self.operator, value
            ),
            None => format!("{}.{} {}", self.store_id, self.field_name, self.operator)
        }
    }
}

/// Type alias for condition lists (at most [`MAX_RULE_CONDITIONS`]).
pub type ConditionVec = SmallVec<[Condition; 4]>;

/// A compound semantic rule.
///
/// Rules are immutable once loaded; the evaluator only borrows them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    /// Unique within its scope, stable across reloads.
    pub rule_id:        String,
    /// Human-readable rule name.
    pub name:           String,
    #[serde(default)]
    pub description:    String,
    /// Free-form grouping label (e.g. "authentication", "user_activity").
    #[serde(default)]
    pub category:       String,
    #[serde(default)]
    pub severity:       Severity,
    /// Confidence in the semantic label, clamped to [0, 1] at load time.
    #[serde(default = "default_confidence")]
    pub confidence:     f64,
    /// Ordered conditions, 1..=10 entries.
    pub conditions:     ConditionVec,
    #[serde(default)]
    pub logic_operator: LogicOperator,
    /// Label produced when the rule matches.
    pub semantic_value: String,
    /// Optional artifact-type gate checked by the store pre-filter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_type:  Option<String>,
    #[serde(default)]
    pub scope:          Scope,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wing_id:        Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline_id:    Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub case_id:        Option<String>
}

fn default_confidence() -> f64 {
    1.0
}

impl Rule {
    /// A rule is identity-level iff every condition targets `_identity`.
    pub fn is_identity_level(&self) -> bool {
        !self.conditions.is_empty() && self.conditions.iter().all(Condition::is_identity)
    }

    /// Distinct non-identity stores referenced by the rule's conditions.
    pub fn referenced_stores(&self) -> BTreeSet<&str> {
        self.conditions
            .iter()
            .filter(|c| !c.is_identity())
            .map(|c| c.store_id.as_str())
            .collect()
    }

    /// Column names this rule needs from one particular store.
    pub fn required_columns(&self, store_id: &str) -> Vec<&str> {
        self.conditions
            .iter()
            .filter(|c| c.store_id == store_id)
            .map(|c| c.field_name.as_str())
            .collect()
    }

    /// Flattened human-readable condition strings for audit output.
    pub fn describe_conditions(&self) -> Vec<String> {
        self.conditions.iter().map(Condition::describe).collect()
    }

    /// The mapping-conflict key `(store_id, field_name, technical_value)`
    /// for rules reducible to a single equality test.
    pub fn mapping_key(&self) -> Option<(CompactString, CompactString, String)> {
        if self.conditions.len() != 1 {
            return None;
        }
        let condition = &self.conditions[0];
        if condition.operator != Operator::Equals {
            return None;
        }
        let value = condition.value.as_ref()?;
        Some((
            condition.store_id.clone(),
            condition.field_name.clone(),
            value.to_string()
        ))
    }
}

/// Degenerate one-condition rule form kept for authoring convenience.
///
/// `(source, field, technical_value | pattern) -> semantic_value` plus
/// optional extra conditions that must all hold. Mappings are converted to
/// [`Rule`]s by the loader; the evaluator never sees them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mapping {
    /// Store the mapping applies to.
    pub source:          CompactString,
    /// Column holding the technical value.
    pub field:           CompactString,
    /// Exact value to match; mutually exclusive with `pattern`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub technical_value: Option<ConditionValue>,
    /// Regex alternative to `technical_value`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern:         Option<String>,
    /// Label produced on match.
    pub semantic_value:  String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_type:   Option<String>,
    #[serde(default)]
    pub category:        String,
    #[serde(default)]
    pub severity:        Severity,
    #[serde(default = "default_confidence")]
    pub confidence:      f64,
    /// Extra conditions ANDed onto the primary one.
    #[serde(default)]
    pub conditions:      Vec<Condition>
}

/// One rule matching an identity, with the stores that contributed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SemanticMatch {
    pub rule_id:        String,
    pub rule_name:      String,
    pub semantic_value: String,
    pub logic_operator: LogicOperator,
    pub category:       String,
    pub severity:       Severity,
    pub confidence:     f64,
    pub scope:          Scope,
    /// Unordered set of store identifiers that contributed evidence.
    pub matched_stores: BTreeSet<String>,
    /// Human-readable condition strings for audit.
    pub conditions:     Vec<String>
}

/// Where a loaded rule file came from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleProvenance {
    pub path:     PathBuf,
    pub priority: u8
}

/// Rules loaded for one scope, with provenance.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RuleSet {
    pub scope:   Scope,
    pub rules:   Vec<Rule>,
    pub sources: Vec<RuleProvenance>
}

impl RuleSet {
    pub fn new(scope: Scope) -> Self {
        Self {
            scope,
            rules: Vec::new(),
            sources: Vec::new()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Two rules agreeing on `(store_id, field_name, technical_value)` but
/// disagreeing on the semantic value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Conflict {
    pub store_id:        CompactString,
    pub field_name:      CompactString,
    pub technical_value: String,
    pub rule_ids:        Vec<String>,
    pub semantic_values: Vec<String>
}

impl std::fmt::Display for Conflict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}.{} = '{}' maps to {:?} (rules {:?})",
            self.store_id, self.field_name, self.technical_value, self.semantic_values, self.rule_ids
        )
    }
}

/// Scoring weights kept separate from semantic rules.
///
/// Weights share the scope-resolution machinery but are a disjoint
/// persistence concern; the engine only stores and merges them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ScoringWeights {
    /// Weight per store identifier.
    #[serde(default)]
    pub weights:    IndexMap<String, f64>,
    /// Interpretation thresholds for downstream scoring.
    #[serde(default)]
    pub thresholds: InterpretationThresholds
}

/// Score boundaries used when interpreting weighted results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterpretationThresholds {
    pub strong:   f64,
    pub moderate: f64,
    pub weak:     f64
}

impl Default for InterpretationThresholds {
    fn default() -> Self {
        Self {
            strong:   0.8,
            moderate: 0.5,
            weak:     0.2
        }
    }
}
