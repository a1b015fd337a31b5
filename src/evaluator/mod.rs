//! Two-tier semantic rule evaluation.
//!
//! The evaluator is the engine's core. For one identity it resolves the
//! effective rules, partitions them, and runs each tier on the path that
//! fits it:
//!
//! ```text
//! ┌──────────────┐    ┌────────────────┐    ┌─────────────────────┐
//! │ RuleRepo     │───▶│ ScopeResolver  │───▶│ partition by tier   │
//! └──────────────┘    └────────────────┘    └──────────┬──────────┘
//!                                                      │
//!                        ┌─────────────────────────────┼───────────┐
//!                        ▼                             ▼           │
//!               identity-level rules          record-level rules   │
//!               (in-memory, fast path)        (SQL per store group,│
//!                        │                     parallel workers)   │
//!                        └──────────────┬──────────────┘           │
//!                                       ▼                          │
//!                                  assembly::merge ◀── fallback ───┘
//! ```
//!
//! Every failure on the optimized path - untranslatable rule, store
//! unavailable, query error, missing REGEXP, deadline - degrades to
//! in-memory evaluation over the identity's anchor records for that rule
//! only. The invariant: a rule that cannot take the optimized path
//! produces exactly the result the in-memory path would produce. Only a
//! host REGEXP function that cannot be registered at all aborts an
//! evaluation.

pub mod assembly;
mod parallel;
mod stats;

use std::{
    collections::HashMap,
    sync::{
        Arc, RwLock,
        atomic::{AtomicBool, Ordering}
    },
    time::{Duration, Instant}
};

pub use stats::{EvaluationStatistics, StatisticsSnapshot};
use tracing::{debug, info};

use crate::{
    config::EvaluationConfig,
    error::{AppResult, fatal_adapter_error},
    identity::Identity,
    loader::RuleRepository,
    rules::{IDENTITY_STORE, Rule, SemanticMatch},
    scope::{EffectiveRules, ResolutionContext, ScopeResolver},
    store::probe_regexp_support
};

/// Cooperative cancellation flag checked at rule boundaries.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Evaluator tuning, usually taken from [`EvaluationConfig`].
#[derive(Debug, Clone)]
pub struct EvaluatorOptions {
    pub enable_parallel:    bool,
    /// Store-group count at which workers go parallel.
    pub parallel_threshold: usize,
    /// Worker pool bound; 1 means strictly sequential.
    pub max_workers:        usize,
    /// Soft per-store query deadline.
    pub query_deadline:     Option<Duration>
}

impl Default for EvaluatorOptions {
    fn default() -> Self {
        Self {
            enable_parallel:    true,
            parallel_threshold: 3,
            max_workers:        4,
            query_deadline:     None
        }
    }
}

impl From<&EvaluationConfig> for EvaluatorOptions {
    fn from(config: &EvaluationConfig) -> Self {
        Self {
            enable_parallel:    config.enable_parallel,
            parallel_threshold: config.parallel_threshold,
            max_workers:        config.max_workers.max(1),
            query_deadline:     (config.query_deadline_ms > 0)
                .then(|| Duration::from_millis(config.query_deadline_ms))
        }
    }
}

/// Per-call context: scope selection plus cancellation and deadline.
#[derive(Debug, Clone, Default)]
pub struct EvaluationContext {
    pub wing_id:      Option<String>,
    pub pipeline_id:  Option<String>,
    pub case_id:      Option<String>,
    pub cancellation: CancellationToken,
    /// Absolute soft deadline for store queries.
    pub deadline:     Option<Instant>
}

impl EvaluationContext {
    fn resolution(&self) -> ResolutionContext {
        ResolutionContext {
            wing_id:     self.wing_id.clone(),
            pipeline_id: self.pipeline_id.clone(),
            case_id:     self.case_id.clone()
        }
    }

    fn cache_key(&self) -> String {
        format!(
            "{}:{}:{}",
            self.wing_id.as_deref().unwrap_or(""),
            self.pipeline_id.as_deref().unwrap_or(""),
            self.case_id.as_deref().unwrap_or("")
        )
    }
}

/// What one evaluation hands back to the caller.
#[derive(Debug, Clone, serde::Serialize)]
pub struct EvaluationOutcome {
    /// Matched rules; list order is unspecified.
    pub matches:      Vec<SemanticMatch>,
    pub stats:        StatisticsSnapshot,
    /// Scope overrides, conflicts, fallbacks, and skips, human-readable.
    pub decision_log: Vec<String>
}

/// Evaluates semantic rules against identities.
///
/// The evaluator borrows immutable rule snapshots from the repository;
/// a concurrent reload never disturbs an evaluation in flight.
pub struct SemanticRuleEvaluator {
    repository: Arc<RuleRepository>,
    resolver:   ScopeResolver,
    options:    EvaluatorOptions,
    statistics: EvaluationStatistics,
    rule_cache: RwLock<HashMap<String, Arc<EffectiveRules>>>
}

impl SemanticRuleEvaluator {
    pub fn new(
        repository: Arc<RuleRepository>,
        resolver: ScopeResolver,
        options: EvaluatorOptions
    ) -> Self {
        Self {
            repository,
            resolver,
            options: EvaluatorOptions {
                max_workers: options.max_workers.max(1),
                ..options
            },
            statistics: EvaluationStatistics::default(),
            rule_cache: RwLock::new(HashMap::new())
        }
    }

    pub fn statistics(&self) -> &EvaluationStatistics {
        &self.statistics
    }

    pub fn reset_statistics(&self) {
        self.statistics.reset();
    }

    /// Reload every rule scope and drop memoized effective rules.
    pub fn reload_rules(&self) -> AppResult<()> {
        self.repository.reload()?;
        if let Ok(mut cache) = self.rule_cache.write() {
            cache.clear();
        }
        Ok(())
    }

    /// Effective rules for a context, memoized per repository generation.
    pub fn effective_rules(&self, context: &ResolutionContext) -> Arc<EffectiveRules> {
        let loaded = self.repository.current();
        let key = format!(
            "{}:{}:{}:{}",
            loaded.generation,
            context.wing_id.as_deref().unwrap_or(""),
            context.pipeline_id.as_deref().unwrap_or(""),
            context.case_id.as_deref().unwrap_or("")
        );

        if let Ok(cache) = self.rule_cache.read()
            && let Some(cached) = cache.get(&key)
        {
            return Arc::clone(cached);
        }

        let resolved = Arc::new(self.resolver.resolve(&loaded, context));
        if let Ok(mut cache) = self.rule_cache.write() {
            // Entries from earlier generations can never be read again.
            cache.retain(|cached_key, _| {
                cached_key.starts_with(&format!("{}:", loaded.generation))
            });
            cache.insert(key, Arc::clone(&resolved));
        }
        resolved
    }

    /// Evaluate a batch of identities under one context, preserving
    /// input order. Cancellation is observed between identities as well
    /// as inside each evaluation.
    pub fn evaluate_batch(
        &self,
        identities: &[Identity],
        context: &EvaluationContext
    ) -> AppResult<Vec<EvaluationOutcome>> {
        identities
            .iter()
            .map(|identity| self.evaluate_identity(identity, context))
            .collect()
    }

    /// Evaluate all effective rules against one identity.
    ///
    /// Returns `Err` only when the adapter is fatally unusable (the
    /// REGEXP scalar function cannot be registered at all); every other
    /// failure degrades to the in-memory path per rule.
    pub fn evaluate_identity(
        &self,
        identity: &Identity,
        context: &EvaluationContext
    ) -> AppResult<EvaluationOutcome> {
        self.statistics.record_identity();

        let effective = self.effective_rules(&context.resolution());
        let mut decision_log = effective.decision_log.clone();

        if effective.rules.is_empty() {
            debug!("no rules for evaluation context {}", context.cache_key());
            return Ok(EvaluationOutcome {
                matches: Vec::new(),
                stats: self.statistics.snapshot(context.cancellation.is_cancelled()),
                decision_log
            });
        }

        let (identity_rules, record_rules): (Vec<&Rule>, Vec<&Rule>) = effective
            .rules
            .iter()
            .partition(|rule| rule.is_identity_level());

        debug!(
            identity_rules = identity_rules.len(),
            record_rules = record_rules.len(),
            "rules partitioned"
        );

        let mut raw_matches = Vec::new();

        // Fast path: identity-level rules never touch a store.
        if !identity_rules.is_empty() {
            let bundle = identity.identity_bundle();
            for &rule in &identity_rules {
                if context.cancellation.is_cancelled() {
                    decision_log.push("cancelled: identity-level evaluation stopped".to_string());
                    break;
                }
                let outcome = rule.evaluate(&bundle);
                if outcome.matched {
                    raw_matches.push(match_from_rule(
                        rule,
                        std::iter::once(IDENTITY_STORE.to_string()).collect()
                    ));
                }
            }
        }

        // Optimized path: record-level rules via SQL per store group.
        if !record_rules.is_empty() && !context.cancellation.is_cancelled() {
            probe_regexp_support().map_err(|e| fatal_adapter_error(e.to_string()))?;

            let store_paths = identity.store_paths();

            if store_paths.is_empty() {
                decision_log.push(format!(
                    "fallback: no store paths available, {} record-level rules evaluated in memory",
                    record_rules.len()
                ));
                for &rule in &record_rules {
                    if context.cancellation.is_cancelled() {
                        break;
                    }
                    self.statistics.record_fallback();
                    let outcome = rule.evaluate(&identity.anchor_records);
                    if outcome.matched {
                        raw_matches.push(match_from_rule(rule, outcome.matched_stores));
                    }
                }
            } else {
                let mut groups: indexmap::IndexMap<String, parallel::StoreGroup<'_>> =
                    indexmap::IndexMap::new();
                for &rule in &record_rules {
                    let stores = rule.referenced_stores();
                    let mut grouped = false;
                    for store_id in &stores {
                        if let Some(path) = store_paths.get(*store_id) {
                            groups
                                .entry(store_id.to_string())
                                .or_insert_with(|| parallel::StoreGroup {
                                    store_id: store_id.to_string(),
                                    path:     path.clone(),
                                    rules:    Vec::new()
                                })
                                .rules
                                .push(rule);
                            grouped = true;
                        }
                    }
                    if !grouped {
                        // Rule references only stores this identity lacks;
                        // the fallback contract still applies to it.
                        self.statistics.record_fallback();
                        decision_log.push(format!(
                            "fallback: rule '{}' references no available store",
                            rule.rule_id
                        ));
                        let outcome = rule.evaluate(&identity.anchor_records);
                        if outcome.matched {
                            raw_matches.push(match_from_rule(rule, outcome.matched_stores));
                        }
                    }
                }

                let groups: Vec<parallel::StoreGroup<'_>> = groups.into_values().collect();
                let shared = parallel::WorkerShared {
                    identity,
                    cancellation: &context.cancellation,
                    deadline: context.deadline,
                    stats: &self.statistics
                };
                let (group_matches, group_log) =
                    parallel::run_store_groups(&groups, &shared, &self.options);
                raw_matches.extend(group_matches);
                decision_log.extend(group_log);
            }
        }

        let matches = assembly::merge(raw_matches);

        self.statistics
            .record_rules_evaluated((identity_rules.len() + record_rules.len()) as u64);
        for matched in &matches {
            self.statistics.record_match(matched.scope);
        }
        if !matches.is_empty() {
            self.statistics.record_identity_with_matches();
        }

        info!(
            matched = matches.len(),
            evaluated = identity_rules.len() + record_rules.len(),
            cancelled = context.cancellation.is_cancelled(),
            "identity evaluation completed"
        );

        Ok(EvaluationOutcome {
            matches,
            stats: self.statistics.snapshot(context.cancellation.is_cancelled()),
            decision_log
        })
    }
}

/// Build the outward match record for a rule and its contributing stores.
pub(crate) fn match_from_rule(
    rule: &Rule,
    matched_stores: std::collections::BTreeSet<String>
) -> SemanticMatch {
    SemanticMatch {
        rule_id: rule.rule_id.clone(),
        rule_name: rule.name.clone(),
        semantic_value: rule.semantic_value.clone(),
        logic_operator: rule.logic_operator,
        category: rule.category.clone(),
        severity: rule.severity,
        confidence: rule.confidence,
        scope: rule.scope,
        matched_stores,
        conditions: rule.describe_conditions()
    }
}
