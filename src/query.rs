//! Translation of semantic rules into parameterized SQL.
//!
//! The builder converts one compound rule into a single SELECT against a
//! store's data table, or rejects it as untranslatable. Rejection is not
//! an error: the evaluator answers it by falling back to the in-memory
//! path for that rule.
//!
//! # Operator mapping
//!
//! | Operator | SQL fragment | Parameter binding |
//! |---|---|---|
//! | equals | `field = ?` | raw value |
//! | not_equals | `field != ?` | raw value |
//! | contains | `field LIKE ?` | `%value%` |
//! | regex | `field REGEXP ?` | raw pattern |
//! | wildcard | `field IS NOT NULL AND field != ''` | none |
//! | greater_than .. less_equal | `field <op> ?` | typed value |
//!
//! Every value travels as a positional parameter; no value is ever
//! interpolated into the SQL text. The builder inspects values only to
//! type them. `REGEXP` requires the scalar function the store adapter
//! registers on each connection.

use thiserror::Error;

use crate::rules::{
    Condition, ConditionValue, MAX_RULE_CONDITIONS, Operator, Rule, field_name_problem
};

/// Conventional name of the data table inside every store.
pub const STORE_DATA_TABLE: &str = "feather_data";

/// A value bound positionally into a prepared statement.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Text(String),
    Integer(i64),
    Real(f64)
}

impl rusqlite::ToSql for ParamValue {
    fn to_sql(&self) -> rusqlite::Result<rusqlite::types::ToSqlOutput<'_>> {
        use rusqlite::types::{ToSqlOutput, ValueRef};
        Ok(match self {
            Self::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Self::Integer(i) => ToSqlOutput::Owned(rusqlite::types::Value::Integer(*i)),
            Self::Real(r) => ToSqlOutput::Owned(rusqlite::types::Value::Real(*r))
        })
    }
}

impl From<&ConditionValue> for ParamValue {
    fn from(value: &ConditionValue) -> Self {
        match value {
            ConditionValue::Integer(i) => Self::Integer(*i),
            ConditionValue::Number(n) => Self::Real(*n),
            ConditionValue::Text(s) => Self::Text(s.clone())
        }
    }
}

/// A rule translated to SQL, ready for the store adapter.
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltQuery {
    pub sql:    String,
    pub params: Vec<ParamValue>
}

impl BuiltQuery {
    /// Whether execution needs the REGEXP scalar function registered.
    pub fn needs_regexp(&self) -> bool {
        self.sql.contains("REGEXP")
    }
}

/// Why a rule could not be translated. Triggers the fallback path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("rule '{rule_id}' is untranslatable: {reason}")]
pub struct Untranslatable {
    pub rule_id: String,
    pub reason:  String
}

/// Build a parameterized SELECT for `rule` against `table`.
///
/// The typed model makes unknown operators and callable values
/// unrepresentable; the remaining rejection reasons are structural:
/// zero conditions, more than [`MAX_RULE_CONDITIONS`], a missing value
/// on a value-requiring operator, or a field name outside
/// `[A-Za-z0-9_.]` / with more than one dot.
pub fn build_query(rule: &Rule, table: &str) -> Result<BuiltQuery, Untranslatable> {
    let reject = |reason: String| Untranslatable {
        rule_id: rule.rule_id.clone(),
        reason
    };

    if rule.conditions.is_empty() {
        return Err(reject("rule has no conditions".into()));
    }
    if rule.conditions.len() > MAX_RULE_CONDITIONS {
        return Err(reject(format!(
            "rule has {} conditions, maximum is {}",
            rule.conditions.len(),
            MAX_RULE_CONDITIONS
        )));
    }

    let mut clauses = Vec::with_capacity(rule.conditions.len());
    let mut params = Vec::new();

    for condition in &rule.conditions {
        let (clause, param) = translate_condition(condition).map_err(|reason| {
            reject(format!(
                "condition on '{}': {}",
                condition.field_name, reason
            ))
        })?;
        clauses.push(format!("({})", clause));
        if let Some(param) = param {
            params.push(param);
        }
    }

    let combined = clauses.join(&format!(" {} ", rule.logic_operator));
    let sql = format!("SELECT * FROM {} WHERE {}", table, combined);

    Ok(BuiltQuery {
        sql,
        params
    })
}

/// Translate one condition into a WHERE fragment and optional parameter.
fn translate_condition(condition: &Condition) -> Result<(String, Option<ParamValue>), String> {
    if let Some(problem) = field_name_problem(&condition.field_name) {
        return Err(format!("field name {}", problem));
    }
    let field = condition.field_name.as_str();

    if condition.operator == Operator::Wildcard {
        return Ok((format!("{field} IS NOT NULL AND {field} != ''"), None));
    }

    let value = condition
        .value
        .as_ref()
        .ok_or_else(|| format!("operator '{}' requires a value", condition.operator))?;

    let fragment = match condition.operator {
        Operator::Equals => format!("{field} = ?"),
        Operator::NotEquals => format!("{field} != ?"),
        Operator::Contains => format!("{field} LIKE ?"),
        Operator::Regex => format!("{field} REGEXP ?"),
        Operator::GreaterThan => format!("{field} > ?"),
        Operator::LessThan => format!("{field} < ?"),
        Operator::GreaterEqual => format!("{field} >= ?"),
        Operator::LessEqual => format!("{field} <= ?"),
        Operator::Wildcard => unreachable!("handled above")
    };

    let param = match condition.operator {
        Operator::Contains => ParamValue::Text(format!("%{}%", value)),
        Operator::Regex => ParamValue::Text(value.to_string()),
        _ => ParamValue::from(value)
    };

    Ok((fragment, Some(param)))
}
