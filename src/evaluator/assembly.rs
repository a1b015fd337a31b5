//! Final assembly of per-rule matches.
//!
//! Workers emit one match per (rule, store); the assembly deduplicates by
//! `rule_id` and unions the contributing store sets so a rule matching in
//! several stores yields a single match naming all of them. Order of the
//! returned list is unspecified by contract.

use indexmap::IndexMap;

use crate::rules::SemanticMatch;

/// Deduplicate matches by rule id, unioning `matched_stores`.
pub fn merge(matches: impl IntoIterator<Item = SemanticMatch>) -> Vec<SemanticMatch> {
    let mut by_rule: IndexMap<String, SemanticMatch> = IndexMap::new();

    for candidate in matches {
        match by_rule.get_mut(&candidate.rule_id) {
            Some(existing) => {
                existing.matched_stores.extend(candidate.matched_stores);
            }
            None => {
                by_rule.insert(candidate.rule_id.clone(), candidate);
            }
        }
    }

    by_rule.into_values().collect()
}
