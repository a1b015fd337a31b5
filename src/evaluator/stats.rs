//! Lock-free evaluation counters.
//!
//! Workers increment atomically; nothing here is ever locked. A
//! [`StatisticsSnapshot`] is taken per evaluation and serialized into the
//! outcome handed to the caller.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::rules::Scope;

/// Process-lifetime counters for the evaluator.
#[derive(Debug, Default)]
pub struct EvaluationStatistics {
    identities_evaluated:    AtomicU64,
    rules_evaluated:         AtomicU64,
    rules_matched:           AtomicU64,
    identities_with_matches: AtomicU64,
    query_path_hits:         AtomicU64,
    fallback_evaluations:    AtomicU64,
    stores_skipped:          AtomicU64,
    built_in_rules_applied:  AtomicU64,
    global_rules_applied:    AtomicU64,
    pipeline_rules_applied:  AtomicU64,
    wing_rules_applied:      AtomicU64,
    case_rules_applied:      AtomicU64
}

impl EvaluationStatistics {
    pub fn record_identity(&self) {
        self.identities_evaluated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rules_evaluated(&self, count: u64) {
        self.rules_evaluated.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_match(&self, scope: Scope) {
        self.rules_matched.fetch_add(1, Ordering::Relaxed);
        let counter = match scope {
            Scope::BuiltIn => &self.built_in_rules_applied,
            Scope::Global => &self.global_rules_applied,
            Scope::Pipeline => &self.pipeline_rules_applied,
            Scope::Wing => &self.wing_rules_applied,
            Scope::Case => &self.case_rules_applied
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_identity_with_matches(&self) {
        self.identities_with_matches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_query_path_hit(&self) {
        self.query_path_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fallback(&self) {
        self.fallback_evaluations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_store_skipped(&self) {
        self.stores_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reset(&self) {
        self.identities_evaluated.store(0, Ordering::Relaxed);
        self.rules_evaluated.store(0, Ordering::Relaxed);
        self.rules_matched.store(0, Ordering::Relaxed);
        self.identities_with_matches.store(0, Ordering::Relaxed);
        self.query_path_hits.store(0, Ordering::Relaxed);
        self.fallback_evaluations.store(0, Ordering::Relaxed);
        self.stores_skipped.store(0, Ordering::Relaxed);
        self.built_in_rules_applied.store(0, Ordering::Relaxed);
        self.global_rules_applied.store(0, Ordering::Relaxed);
        self.pipeline_rules_applied.store(0, Ordering::Relaxed);
        self.wing_rules_applied.store(0, Ordering::Relaxed);
        self.case_rules_applied.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self, cancelled: bool) -> StatisticsSnapshot {
        StatisticsSnapshot {
            identities_evaluated: self.identities_evaluated.load(Ordering::Relaxed),
            rules_evaluated: self.rules_evaluated.load(Ordering::Relaxed),
            rules_matched: self.rules_matched.load(Ordering::Relaxed),
            identities_with_matches: self.identities_with_matches.load(Ordering::Relaxed),
            query_path_hits: self.query_path_hits.load(Ordering::Relaxed),
            fallback_evaluations: self.fallback_evaluations.load(Ordering::Relaxed),
            stores_skipped: self.stores_skipped.load(Ordering::Relaxed),
            built_in_rules_applied: self.built_in_rules_applied.load(Ordering::Relaxed),
            global_rules_applied: self.global_rules_applied.load(Ordering::Relaxed),
            pipeline_rules_applied: self.pipeline_rules_applied.load(Ordering::Relaxed),
            wing_rules_applied: self.wing_rules_applied.load(Ordering::Relaxed),
            case_rules_applied: self.case_rules_applied.load(Ordering::Relaxed),
            cancelled
        }
    }
}

/// Point-in-time view of the counters, serialized into outcomes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatisticsSnapshot {
    pub identities_evaluated:    u64,
    pub rules_evaluated:         u64,
    pub rules_matched:           u64,
    pub identities_with_matches: u64,
    pub query_path_hits:         u64,
    pub fallback_evaluations:    u64,
    pub stores_skipped:          u64,
    pub built_in_rules_applied:  u64,
    pub global_rules_applied:    u64,
    pub pipeline_rules_applied:  u64,
    pub wing_rules_applied:      u64,
    pub case_rules_applied:      u64,
    pub cancelled:               bool
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate_and_reset() {
        let stats = EvaluationStatistics::default();
        stats.record_identity();
        stats.record_rules_evaluated(3);
        stats.record_match(Scope::Wing);
        stats.record_match(Scope::Global);
        stats.record_identity_with_matches();
        stats.record_fallback();
        stats.record_store_skipped();

        let snapshot = stats.snapshot(false);
        assert_eq!(snapshot.identities_evaluated, 1);
        assert_eq!(snapshot.rules_evaluated, 3);
        assert_eq!(snapshot.rules_matched, 2);
        assert_eq!(snapshot.wing_rules_applied, 1);
        assert_eq!(snapshot.global_rules_applied, 1);
        assert_eq!(snapshot.fallback_evaluations, 1);
        assert_eq!(snapshot.stores_skipped, 1);
        assert!(!snapshot.cancelled);

        stats.reset();
        assert_eq!(stats.snapshot(true).rules_matched, 0);
        assert!(stats.snapshot(true).cancelled);
    }

    #[test]
    fn test_snapshot_serializes() {
        let stats = EvaluationStatistics::default();
        let json = serde_json::to_value(stats.snapshot(false)).unwrap();
        assert_eq!(json["identities_evaluated"], 0);
        assert_eq!(json["cancelled"], false);
    }
}
