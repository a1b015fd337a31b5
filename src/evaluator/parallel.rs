//! Parallel execution of record-level rules, one worker per store group.
//!
//! Store groups are the unit of parallelism: a rule referencing N stores
//! appears in N groups, and each group runs on its own worker with its
//! own store connection. Workers share nothing mutable except the pattern
//! cache and the atomic statistics counters; results and log entries are
//! returned, not written into shared state.
//!
//! Groups go parallel once their count reaches the configured threshold,
//! on a fixed rayon pool bounded by `max_workers`. One worker (or a pool
//! build failure) degrades to strictly sequential processing with
//! identical results.

use std::{path::PathBuf, time::Instant};

use rayon::prelude::*;
use tracing::{debug, error, warn};

use super::{CancellationToken, EvaluatorOptions, match_from_rule, stats::EvaluationStatistics};
use crate::{
    identity::Identity,
    query::{STORE_DATA_TABLE, build_query},
    rules::{Rule, SemanticMatch},
    store::{Descriptor, StoreHandle, prefilter_skip_reason}
};

/// Rules to evaluate against one store.
pub struct StoreGroup<'a> {
    pub store_id: String,
    pub path:     PathBuf,
    pub rules:    Vec<&'a Rule>
}

/// Read-only state shared by every worker of one evaluation.
pub struct WorkerShared<'a> {
    pub identity:     &'a Identity,
    pub cancellation: &'a CancellationToken,
    pub deadline:     Option<Instant>,
    pub stats:        &'a EvaluationStatistics
}

/// Matches plus decision-log entries produced by one worker.
type WorkerOutput = (Vec<SemanticMatch>, Vec<String>);

/// Run all store groups, in parallel when the group count reaches the
/// threshold and more than one worker is allowed.
pub fn run_store_groups(
    groups: &[StoreGroup<'_>],
    shared: &WorkerShared<'_>,
    options: &EvaluatorOptions
) -> WorkerOutput {
    let parallel = options.enable_parallel
        && options.max_workers > 1
        && groups.len() >= options.parallel_threshold;

    let outputs: Vec<WorkerOutput> = if parallel {
        match rayon::ThreadPoolBuilder::new()
            .num_threads(options.max_workers)
            .build()
        {
            Ok(pool) => pool.install(|| {
                groups
                    .par_iter()
                    .map(|group| process_store_group(group, shared, options))
                    .collect()
            }),
            Err(e) => {
                warn!(error = %e, "worker pool unavailable, processing sequentially");
                groups
                    .iter()
                    .map(|group| process_store_group(group, shared, options))
                    .collect()
            }
        }
    } else {
        groups
            .iter()
            .map(|group| process_store_group(group, shared, options))
            .collect()
    };

    let mut matches = Vec::new();
    let mut log = Vec::new();
    for (mut worker_matches, mut worker_log) in outputs {
        matches.append(&mut worker_matches);
        log.append(&mut worker_log);
    }
    (matches, log)
}

enum StoreState {
    Ready {
        handle:     StoreHandle,
        descriptor: Option<Descriptor>
    },
    Unavailable(String)
}

/// Process every rule of one store group. The store handle is acquired
/// here and released when the worker finishes, on every exit path.
fn process_store_group(
    group: &StoreGroup<'_>,
    shared: &WorkerShared<'_>,
    options: &EvaluatorOptions
) -> WorkerOutput {
    let mut matches = Vec::new();
    let mut log = Vec::new();

    let state = match StoreHandle::open(&group.path) {
        Ok(handle) => match handle.metadata() {
            Ok(descriptor) => StoreState::Ready {
                handle,
                descriptor
            },
            Err(e) => {
                error!(
                    store = %group.store_id,
                    path = %group.path.display(),
                    error = %e,
                    "store descriptor unreadable"
                );
                StoreState::Unavailable(format!("descriptor unreadable: {}", e))
            }
        },
        Err(e) => {
            error!(
                store = %group.store_id,
                path = %group.path.display(),
                error = %e,
                "store unavailable"
            );
            StoreState::Unavailable(e.to_string())
        }
    };

    // Soft deadline for this store's queries, combined with the
    // caller-supplied one.
    let deadline = match (shared.deadline, options.query_deadline) {
        (Some(outer), Some(per_store)) => Some(outer.min(Instant::now() + per_store)),
        (Some(outer), None) => Some(outer),
        (None, Some(per_store)) => Some(Instant::now() + per_store),
        (None, None) => None
    };

    for &rule in &group.rules {
        if shared.cancellation.is_cancelled() {
            log.push(format!(
                "cancelled: store '{}' stopped before rule '{}'",
                group.store_id, rule.rule_id
            ));
            break;
        }

        if let Some(deadline) = deadline
            && Instant::now() > deadline
        {
            fall_back(
                rule,
                &group.store_id,
                "store deadline exceeded",
                shared,
                &mut matches,
                &mut log
            );
            continue;
        }

        let (handle, descriptor) = match &state {
            StoreState::Ready {
                handle,
                descriptor
            } => (handle, descriptor),
            StoreState::Unavailable(reason) => {
                fall_back(rule, &group.store_id, reason, shared, &mut matches, &mut log);
                continue;
            }
        };

        // Pre-filter: descriptor-only go/no-go, no record pages touched.
        let required = rule.required_columns(&group.store_id);
        if let Some(reason) = prefilter_skip_reason(
            descriptor.as_ref(),
            &required,
            rule.artifact_type.as_deref()
        ) {
            shared.stats.record_store_skipped();
            debug!(
                store = %group.store_id,
                rule_id = %rule.rule_id,
                reason = %reason,
                "store skipped by pre-filter"
            );
            log.push(format!(
                "skip: store '{}' for rule '{}' - {}",
                group.store_id, rule.rule_id, reason
            ));
            continue;
        }

        let query = match build_query(rule, STORE_DATA_TABLE) {
            Ok(query) => query,
            Err(untranslatable) => {
                fall_back(
                    rule,
                    &group.store_id,
                    &untranslatable.reason,
                    shared,
                    &mut matches,
                    &mut log
                );
                continue;
            }
        };

        if query.needs_regexp()
            && let Err(e) = handle.register_regexp()
        {
            error!(
                store = %group.store_id,
                rule_id = %rule.rule_id,
                error = %e,
                "REGEXP registration failed"
            );
            fall_back(
                rule,
                &group.store_id,
                "REGEXP registration failed",
                shared,
                &mut matches,
                &mut log
            );
            continue;
        }

        match handle.has_rows(&query) {
            Ok(true) => {
                shared.stats.record_query_path_hit();
                matches.push(match_from_rule(
                    rule,
                    std::iter::once(group.store_id.clone()).collect()
                ));
            }
            Ok(false) => {}
            Err(e) => {
                error!(
                    rule_id = %rule.rule_id,
                    path = %group.path.display(),
                    error = %e,
                    "query execution failed"
                );
                fall_back(
                    rule,
                    &group.store_id,
                    &format!("query execution failed: {}", e),
                    shared,
                    &mut matches,
                    &mut log
                );
            }
        }
    }

    (matches, log)
}

/// Graceful degradation: evaluate the rule in memory over the identity's
/// anchor records, exactly as the pure in-memory path would.
fn fall_back(
    rule: &Rule,
    store_id: &str,
    reason: &str,
    shared: &WorkerShared<'_>,
    matches: &mut Vec<SemanticMatch>,
    log: &mut Vec<String>
) {
    shared.stats.record_fallback();
    log.push(format!(
        "fallback: rule '{}' on store '{}' evaluated in memory - {}",
        rule.rule_id, store_id, reason
    ));
    let outcome = rule.evaluate(&shared.identity.anchor_records);
    if outcome.matched {
        matches.push(match_from_rule(rule, outcome.matched_stores));
    }
}
