// SPDX-FileCopyrightText: 2026 Crow Forensics
// SPDX-License-Identifier: MIT

use artifact_semantics::{
    loader::LoadedRules,
    rules::{
        Condition, ConditionValue, LogicOperator, Operator, Rule, RuleSet, ScoringWeights, Scope,
        Severity
    },
    scope::{ResolutionContext, ResolutionStrategy, ScopeResolver}
};
use smallvec::smallvec;

fn rule_with_value(rule_id: &str, scope: Scope, semantic_value: &str, value: &str) -> Rule {
    Rule {
        rule_id:        rule_id.to_string(),
        name:           rule_id.to_string(),
        description:    String::new(),
        category:       String::new(),
        severity:       Severity::Info,
        confidence:     1.0,
        conditions:     smallvec![Condition {
            store_id:   "prefetch".into(),
            field_name: "executable_name".into(),
            operator:   Operator::Equals,
            value:      Some(ConditionValue::Text(value.to_string()))
        }],
        logic_operator: LogicOperator::And,
        semantic_value: semantic_value.to_string(),
        artifact_type:  None,
        scope,
        wing_id:        None,
        pipeline_id:    None,
        case_id:        None
    }
}

// Distinct technical values per rule so only the conflict tests collide
fn rule(rule_id: &str, scope: Scope, semantic_value: &str) -> Rule {
    rule_with_value(rule_id, scope, semantic_value, &format!("{}.exe", rule_id))
}

fn loaded(sets: Vec<RuleSet>) -> LoadedRules {
    let mut map = indexmap::IndexMap::new();
    for set in sets {
        map.insert(set.scope, set);
    }
    LoadedRules {
        generation: 1,
        sets:       map,
        issues:     Vec::new(),
        conflicts:  Vec::new()
    }
}

fn set(scope: Scope, rules: Vec<Rule>) -> RuleSet {
    RuleSet {
        scope,
        rules,
        sources: Vec::new()
    }
}

fn wing_context() -> ResolutionContext {
    ResolutionContext {
        wing_id:     Some("wing-1".to_string()),
        pipeline_id: None,
        case_id:     None
    }
}

#[test]
fn test_same_rule_id_higher_scope_wins() {
    let loaded = loaded(vec![
        set(Scope::Global, vec![rule("R1", Scope::Global, "A")]),
        set(Scope::Wing, vec![rule("R1", Scope::Wing, "B")]),
    ]);

    let resolver = ScopeResolver::default();
    let effective = resolver.resolve(&loaded, &wing_context());

    assert_eq!(effective.rules.len(), 1);
    assert_eq!(effective.rules[0].semantic_value, "B");
    assert_eq!(effective.rules[0].scope, Scope::Wing);
    assert!(
        effective
            .decision_log
            .iter()
            .any(|entry| entry.contains("override") && entry.contains("R1"))
    );
}

#[test]
fn test_overridden_rule_never_contributes() {
    // Scope monotonicity: the shadowed definition is fully discarded
    let loaded = loaded(vec![
        set(Scope::Global, vec![rule("R1", Scope::Global, "A")]),
        set(Scope::Case, vec![rule("R1", Scope::Case, "C")]),
    ]);

    let context = ResolutionContext {
        case_id: Some("case-9".to_string()),
        ..Default::default()
    };
    let effective = ScopeResolver::default().resolve(&loaded, &context);

    assert!(effective.rules.iter().all(|r| r.semantic_value != "A"));
}

#[test]
fn test_priority_order_case_wing_pipeline_global() {
    let loaded = loaded(vec![
        set(Scope::BuiltIn, vec![rule("b", Scope::BuiltIn, "built-in")]),
        set(Scope::Global, vec![rule("g", Scope::Global, "global")]),
        set(Scope::Pipeline, vec![rule("p", Scope::Pipeline, "pipeline")]),
        set(Scope::Wing, vec![rule("w", Scope::Wing, "wing")]),
        set(Scope::Case, vec![rule("c", Scope::Case, "case")]),
    ]);

    let context = ResolutionContext {
        wing_id:     Some("wing-1".to_string()),
        pipeline_id: Some("pipe-1".to_string()),
        case_id:     Some("case-1".to_string())
    };
    let effective = ScopeResolver::default().resolve(&loaded, &context);

    let order: Vec<Scope> = effective.rules.iter().map(|r| r.scope).collect();
    assert_eq!(
        order,
        vec![Scope::Case, Scope::Wing, Scope::Pipeline, Scope::Global, Scope::BuiltIn]
    );
}

#[test]
fn test_scoped_rules_excluded_without_context() {
    let loaded = loaded(vec![
        set(Scope::Global, vec![rule("g", Scope::Global, "global")]),
        set(Scope::Wing, vec![rule("w", Scope::Wing, "wing")]),
    ]);

    let effective = ScopeResolver::default().resolve(&loaded, &ResolutionContext::default());
    assert_eq!(effective.rules.len(), 1);
    assert_eq!(effective.rules[0].rule_id, "g");
}

#[test]
fn test_wing_rule_pinned_to_other_wing_excluded() {
    let mut pinned = rule("w", Scope::Wing, "wing");
    pinned.wing_id = Some("other-wing".to_string());
    let loaded = loaded(vec![set(Scope::Wing, vec![pinned])]);

    let effective = ScopeResolver::default().resolve(&loaded, &wing_context());
    assert!(effective.rules.is_empty());
}

#[test]
fn test_wing_rule_matching_wing_included() {
    let mut pinned = rule("w", Scope::Wing, "wing");
    pinned.wing_id = Some("wing-1".to_string());
    let loaded = loaded(vec![set(Scope::Wing, vec![pinned])]);

    let effective = ScopeResolver::default().resolve(&loaded, &wing_context());
    assert_eq!(effective.rules.len(), 1);
}

#[test]
fn test_key_conflict_case_precedence_keeps_deeper_scope() {
    let loaded = loaded(vec![
        set(
            Scope::Global,
            vec![rule_with_value("g-login", Scope::Global, "User Login", "chrome.exe")]
        ),
        set(
            Scope::Wing,
            vec![rule_with_value("w-login", Scope::Wing, "Interactive Logon", "chrome.exe")]
        ),
    ]);

    let resolver = ScopeResolver::new(ResolutionStrategy::CasePrecedence);
    let effective = resolver.resolve(&loaded, &wing_context());

    assert_eq!(effective.rules.len(), 1);
    assert_eq!(effective.rules[0].semantic_value, "Interactive Logon");
    assert!(
        effective
            .decision_log
            .iter()
            .any(|entry| entry.contains("conflict") && entry.contains("case_precedence"))
    );
}

#[test]
fn test_key_conflict_global_precedence_keeps_shallower_scope() {
    let loaded = loaded(vec![
        set(
            Scope::Global,
            vec![rule_with_value("g-login", Scope::Global, "User Login", "chrome.exe")]
        ),
        set(
            Scope::Wing,
            vec![rule_with_value("w-login", Scope::Wing, "Interactive Logon", "chrome.exe")]
        ),
    ]);

    let resolver = ScopeResolver::new(ResolutionStrategy::GlobalPrecedence);
    let effective = resolver.resolve(&loaded, &wing_context());

    assert_eq!(effective.rules.len(), 1);
    assert_eq!(effective.rules[0].semantic_value, "User Login");
}

#[test]
fn test_key_conflict_additive_merge_keeps_both() {
    let loaded = loaded(vec![
        set(
            Scope::Global,
            vec![rule_with_value("g-login", Scope::Global, "User Login", "chrome.exe")]
        ),
        set(
            Scope::Wing,
            vec![rule_with_value("w-login", Scope::Wing, "Interactive Logon", "chrome.exe")]
        ),
    ]);

    let resolver = ScopeResolver::new(ResolutionStrategy::AdditiveMerge);
    let effective = resolver.resolve(&loaded, &wing_context());

    assert_eq!(effective.rules.len(), 2);
}

#[test]
fn test_resolver_does_not_mutate_inputs() {
    let loaded = loaded(vec![
        set(Scope::Global, vec![rule("R1", Scope::Global, "A")]),
        set(Scope::Wing, vec![rule("R1", Scope::Wing, "B")]),
    ]);
    let before: Vec<Rule> = loaded.rules_for(Scope::Global).to_vec();

    let _ = ScopeResolver::default().resolve(&loaded, &wing_context());

    assert_eq!(loaded.rules_for(Scope::Global), before.as_slice());
}

fn weights(pairs: &[(&str, f64)]) -> ScoringWeights {
    let mut weights = ScoringWeights::default();
    for (key, value) in pairs {
        weights.weights.insert(key.to_string(), *value);
    }
    weights
}

#[test]
fn test_weights_case_precedence_deeper_overrides() {
    let resolver = ScopeResolver::new(ResolutionStrategy::CasePrecedence);
    let (merged, decisions) = resolver.merge_weights(&[
        (Scope::Global, weights(&[("prefetch", 0.4), ("srum", 0.6)])),
        (Scope::Case, weights(&[("prefetch", 0.9)])),
    ]);

    assert_eq!(merged.weights.get("prefetch"), Some(&0.9));
    // Shallower entries are overridden, never removed
    assert_eq!(merged.weights.get("srum"), Some(&0.6));
    assert!(!decisions.is_empty());
}

#[test]
fn test_weights_average_strategy() {
    let resolver = ScopeResolver::new(ResolutionStrategy::Average);
    let (merged, _) = resolver.merge_weights(&[
        (Scope::Global, weights(&[("prefetch", 0.4)])),
        (Scope::Case, weights(&[("prefetch", 0.8)])),
    ]);

    let averaged = merged.weights.get("prefetch").copied().unwrap();
    assert!((averaged - 0.6).abs() < f64::EPSILON);
}

#[test]
fn test_weights_global_precedence_shallower_wins() {
    let resolver = ScopeResolver::new(ResolutionStrategy::GlobalPrecedence);
    let (merged, _) = resolver.merge_weights(&[
        (Scope::Global, weights(&[("prefetch", 0.4)])),
        (Scope::Case, weights(&[("prefetch", 0.8)])),
    ]);

    assert_eq!(merged.weights.get("prefetch"), Some(&0.4));
}
