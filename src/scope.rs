//! Scope resolution: folding per-scope rule sets into one effective list.
//!
//! Up to five rule sets (built-in, global, pipeline, wing, case) are
//! merged for a given execution context. Priority is highest first:
//! case > wing > pipeline > global > built-in. Two rules sharing a
//! `rule_id` resolve to the higher-priority one; two rules sharing a
//! mapping key `(store_id, field_name, technical_value)` but differing
//! elsewhere resolve by the configured strategy. Every decision lands in
//! the log the caller gets back.
//!
//! The resolver never mutates its inputs; it produces a fresh list each
//! time. Scoring weights are a disjoint concern resolved by the same
//! fold, with the additional `average` strategy for numeric merges.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{
    loader::LoadedRules,
    rules::{Rule, Scope, ScoringWeights}
};

/// How same-key disagreements between scopes are settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    /// The deeper (more specific) scope wins outright.
    #[default]
    CasePrecedence,
    /// Dictionary-valued fields merge; deeper scopes override entries
    /// but never remove them.
    AdditiveMerge,
    /// The shallower scope wins; for operator-declared immutable keys.
    GlobalPrecedence,
    /// Numeric average; only meaningful for scoring weights.
    Average
}

impl std::fmt::Display for ResolutionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CasePrecedence => write!(f, "case_precedence"),
            Self::AdditiveMerge => write!(f, "additive_merge"),
            Self::GlobalPrecedence => write!(f, "global_precedence"),
            Self::Average => write!(f, "average")
        }
    }
}

/// Execution context selecting which scoped rules participate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolutionContext {
    pub wing_id:     Option<String>,
    pub pipeline_id: Option<String>,
    pub case_id:     Option<String>
}

/// The deduplicated, priority-ordered rule list for one context.
#[derive(Debug, Clone, Default)]
pub struct EffectiveRules {
    /// Reload generation the rules came from; compare to detect reloads.
    pub generation:   u64,
    /// Rules in priority order, highest first.
    pub rules:        Vec<Rule>,
    /// Human-readable trace of overrides and conflict resolutions.
    pub decision_log: Vec<String>
}

/// Folds scoped rule sets into [`EffectiveRules`].
#[derive(Debug, Clone, Default)]
pub struct ScopeResolver {
    strategy: ResolutionStrategy
}

impl ScopeResolver {
    pub fn new(strategy: ResolutionStrategy) -> Self {
        Self {
            strategy
        }
    }

    /// Merge all scopes applicable under `context`.
    pub fn resolve(&self, loaded: &LoadedRules, context: &ResolutionContext) -> EffectiveRules {
        let mut decision_log = Vec::new();
        let mut rules: Vec<Rule> = Vec::new();
        let mut seen_ids: HashMap<String, Scope> = HashMap::new();

        // Highest precedence first so the first occurrence of an id wins.
        for scope in [
            Scope::Case,
            Scope::Wing,
            Scope::Pipeline,
            Scope::Global,
            Scope::BuiltIn,
        ] {
            for rule in loaded.rules_for(scope) {
                if !applies_to_context(rule, context) {
                    continue;
                }
                if let Some(winner_scope) = seen_ids.get(&rule.rule_id) {
                    decision_log.push(format!(
                        "scope override: rule '{}' from {} scope overrides {} definition",
                        rule.rule_id, winner_scope, scope
                    ));
                    continue;
                }
                seen_ids.insert(rule.rule_id.clone(), scope);
                rules.push(rule.clone());
            }
        }

        self.resolve_key_conflicts(&mut rules, &mut decision_log);

        EffectiveRules {
            generation: loaded.generation,
            rules,
            decision_log
        }
    }

    /// Settle rules that target the same mapping key under different ids.
    fn resolve_key_conflicts(&self, rules: &mut Vec<Rule>, decision_log: &mut Vec<String>) {
        let mut keep: HashSet<usize> = (0..rules.len()).collect();
        let mut by_key: BTreeMap<(String, String, String), Vec<usize>> = BTreeMap::new();

        for (index, rule) in rules.iter().enumerate() {
            if let Some((store_id, field_name, value)) = rule.mapping_key() {
                by_key
                    .entry((store_id.to_string(), field_name.to_string(), value))
                    .or_default()
                    .push(index);
            }
        }

        for ((store_id, field_name, value), indices) in by_key {
            if indices.len() < 2 {
                continue;
            }
            let distinct_labels: HashSet<&str> = indices
                .iter()
                .map(|&i| rules[i].semantic_value.as_str())
                .collect();
            if distinct_labels.len() < 2 {
                continue;
            }

            let winner = match self.strategy {
                // Rules arrive highest priority first.
                ResolutionStrategy::CasePrecedence | ResolutionStrategy::Average => {
                    *indices
                        .iter()
                        .max_by_key(|&&i| rules[i].scope.priority())
                        .unwrap_or(&indices[0])
                }
                ResolutionStrategy::GlobalPrecedence => {
                    *indices
                        .iter()
                        .min_by_key(|&&i| rules[i].scope.priority())
                        .unwrap_or(&indices[0])
                }
                ResolutionStrategy::AdditiveMerge => {
                    decision_log.push(format!(
                        "conflict kept additively: {}.{} = '{}' retains {} rules",
                        store_id,
                        field_name,
                        value,
                        indices.len()
                    ));
                    continue;
                }
            };

            for &index in &indices {
                if index != winner {
                    keep.remove(&index);
                }
            }
            warn!(
                store_id = %store_id,
                field_name = %field_name,
                technical_value = %value,
                winner = %rules[winner].rule_id,
                "mapping key conflict resolved"
            );
            decision_log.push(format!(
                "conflict: {}.{} = '{}' resolved by {} to '{}' (rule '{}')",
                store_id, field_name, value, self.strategy, rules[winner].semantic_value,
                rules[winner].rule_id
            ));
        }

        if keep.len() != rules.len() {
            let mut index = 0;
            rules.retain(|_| {
                let kept = keep.contains(&index);
                index += 1;
                kept
            });
        }
    }

    /// Merge scoring weights across scopes, shallowest first.
    ///
    /// Weights share the fold but not the rule semantics: they are plain
    /// numeric maps, so `average` is meaningful here.
    pub fn merge_weights(
        &self,
        layers: &[(Scope, ScoringWeights)]
    ) -> (ScoringWeights, Vec<String>) {
        let mut decisions = Vec::new();
        let mut ordered: Vec<&(Scope, ScoringWeights)> = layers.iter().collect();
        ordered.sort_by_key(|(scope, _)| scope.priority());

        let mut merged = ScoringWeights::default();
        match self.strategy {
            ResolutionStrategy::Average => {
                let mut sums: indexmap::IndexMap<String, (f64, usize)> = indexmap::IndexMap::new();
                for (_, weights) in &ordered {
                    for (key, value) in &weights.weights {
                        let entry = sums.entry(key.clone()).or_insert((0.0, 0));
                        entry.0 += value;
                        entry.1 += 1;
                    }
                }
                for (key, (sum, count)) in sums {
                    merged.weights.insert(key, sum / count as f64);
                }
                if let Some((scope, weights)) = ordered.last() {
                    merged.thresholds = weights.thresholds.clone();
                    decisions.push(format!("weights averaged; thresholds taken from {}", scope));
                }
            }
            ResolutionStrategy::GlobalPrecedence => {
                // Shallowest layer wins whole keys.
                for (scope, weights) in ordered.iter().rev() {
                    for (key, value) in &weights.weights {
                        if merged.weights.insert(key.clone(), *value).is_some() {
                            decisions
                                .push(format!("weight '{}' pinned by {} scope", key, scope));
                        }
                    }
                }
                if let Some((_, weights)) = ordered.first() {
                    merged.thresholds = weights.thresholds.clone();
                }
            }
            ResolutionStrategy::CasePrecedence | ResolutionStrategy::AdditiveMerge => {
                // Deeper scopes override entries but do not remove them.
                for (scope, weights) in &ordered {
                    for (key, value) in &weights.weights {
                        if merged.weights.insert(key.clone(), *value).is_some() {
                            decisions
                                .push(format!("weight '{}' overridden by {} scope", key, scope));
                        }
                    }
                    merged.thresholds = weights.thresholds.clone();
                }
            }
        }

        (merged, decisions)
    }
}

fn applies_to_context(rule: &Rule, context: &ResolutionContext) -> bool {
    match rule.scope {
        Scope::Wing => id_matches(&rule.wing_id, &context.wing_id),
        Scope::Pipeline => id_matches(&rule.pipeline_id, &context.pipeline_id),
        Scope::Case => id_matches(&rule.case_id, &context.case_id),
        Scope::Global | Scope::BuiltIn => true
    }
}

fn id_matches(rule_id: &Option<String>, context_id: &Option<String>) -> bool {
    match (rule_id, context_id) {
        // Rules not pinned to an id apply whenever the scope is active.
        (None, Some(_)) => true,
        (Some(required), Some(active)) => required == active,
        // Scope not active in this context
        (_, None) => false
    }
}
