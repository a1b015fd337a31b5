//! Rule discovery, loading, and the reloadable repository.
//!
//! Rule files live in per-scope directories:
//!
//! ```text
//! <built-in>/default_mappings/     lowest precedence
//! <config-root>/semantic_mappings/
//! <pipeline>/semantic_mappings/
//! <wing>/semantic_mappings/
//! <case>/semantic_mappings/        highest precedence
//! ```
//!
//! Filenames carry no semantics; every `*.yaml`, `*.yml`, and `*.json`
//! in a scope directory is loaded. Parse errors never abort a batch:
//! offending entries are skipped and reported, other files still load.
//!
//! [`RuleRepository::reload`] is atomic - it builds a complete new state
//! before swapping it in, so an evaluation running concurrently keeps its
//! snapshot and a failed reload leaves the previous good state active.

mod format;

use std::{
    fs,
    path::{Path, PathBuf},
    sync::{
        Arc, RwLock,
        atomic::{AtomicU64, Ordering}
    }
};

pub use format::{LoadContext, LoadIssue, LoadReport, load_content, load_file};
use indexmap::IndexMap;
use serde::Serialize;
use tracing::{debug, info};

use crate::{
    config::RulesConfig,
    error::{AppResult, rule_dir_error},
    rules::{Conflict, Rule, RuleProvenance, RuleSet, Scope, Severity, conflict_report}
};

/// Default mappings compiled into the binary, lowest precedence of all.
const BUILTIN_DEFAULTS: &str = include_str!("../../assets/default_mappings.yaml");

/// Parse the built-in defaults bundled with the binary.
///
/// These ship as YAML inside the executable and load under the
/// `built_in` scope; any on-disk scope overrides them.
pub fn load_builtin_defaults() -> LoadReport {
    load_content(
        Path::new("<built-in>/default_mappings.yaml"),
        BUILTIN_DEFAULTS,
        &LoadContext {
            scope: Scope::BuiltIn,
            ..Default::default()
        }
    )
}

/// A rule file discovered for a scope, ordered by priority.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceDescriptor {
    pub path:     PathBuf,
    pub scope:    Scope,
    pub priority: u8
}

/// Directories to scan, one optional root per scope.
///
/// The conventional `semantic_mappings` / `default_mappings` subdirectory
/// is appended by [`DiscoveryPaths::conventional`]; the fields here are
/// the directories actually scanned.
#[derive(Debug, Clone, Default)]
pub struct DiscoveryPaths {
    pub built_in: Option<PathBuf>,
    pub global:   Vec<PathBuf>,
    pub pipeline: Option<PathBuf>,
    pub wing:     Option<PathBuf>,
    pub case:     Option<PathBuf>
}

impl DiscoveryPaths {
    /// Apply the on-disk layout convention to scope roots.
    pub fn conventional(
        built_in_root: Option<&Path>,
        global_roots: &[PathBuf],
        pipeline_root: Option<&Path>,
        wing_root: Option<&Path>,
        case_root: Option<&Path>
    ) -> Self {
        Self {
            built_in: built_in_root.map(|p| p.join("default_mappings")),
            global:   global_roots
                .iter()
                .map(|p| p.join("semantic_mappings"))
                .collect(),
            pipeline: pipeline_root.map(|p| p.join("semantic_mappings")),
            wing:     wing_root.map(|p| p.join("semantic_mappings")),
            case:     case_root.map(|p| p.join("semantic_mappings"))
        }
    }

    fn scope_dirs(&self) -> Vec<(Scope, &Path)> {
        let mut dirs: Vec<(Scope, &Path)> = Vec::new();
        if let Some(path) = &self.built_in {
            dirs.push((Scope::BuiltIn, path));
        }
        for path in &self.global {
            dirs.push((Scope::Global, path));
        }
        if let Some(path) = &self.pipeline {
            dirs.push((Scope::Pipeline, path));
        }
        if let Some(path) = &self.wing {
            dirs.push((Scope::Wing, path));
        }
        if let Some(path) = &self.case {
            dirs.push((Scope::Case, path));
        }
        dirs
    }
}

/// Enumerate rule files per scope, lowest precedence first.
///
/// Missing directories are silently skipped; unreadable ones error so a
/// reload does not silently drop a whole scope.
pub fn discover(paths: &DiscoveryPaths) -> AppResult<Vec<SourceDescriptor>> {
    let mut sources = Vec::new();

    for (scope, dir) in paths.scope_dirs() {
        if !dir.exists() {
            debug!(dir = %dir.display(), %scope, "scope directory absent, skipping");
            continue;
        }
        let entries = fs::read_dir(dir).map_err(|e| rule_dir_error(&dir.display().to_string(), e))?;
        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| is_rule_file(path))
            .collect();
        // Deterministic order within a scope
        files.sort();
        for path in files {
            sources.push(SourceDescriptor {
                path,
                scope,
                priority: scope.priority()
            });
        }
    }

    Ok(sources)
}

fn is_rule_file(path: &Path) -> bool {
    if !path.is_file() {
        return false;
    }
    matches!(
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref(),
        Some("yaml" | "yml" | "json")
    )
}

/// Fully-loaded rule state: one immutable snapshot per reload.
#[derive(Debug, Default)]
pub struct LoadedRules {
    /// Monotonic generation counter; compare handles to detect reloads.
    pub generation: u64,
    /// Per-scope rule sets keyed by scope, in precedence order.
    pub sets:       IndexMap<Scope, RuleSet>,
    /// Entries and files skipped during the load.
    pub issues:     Vec<LoadIssue>,
    /// Same-key mapping conflicts found across all scopes.
    pub conflicts:  Vec<Conflict>
}

impl LoadedRules {
    pub fn total_rules(&self) -> usize {
        self.sets.values().map(|set| set.rules.len()).sum()
    }

    pub fn rules_for(&self, scope: Scope) -> &[Rule] {
        self.sets
            .get(&scope)
            .map(|set| set.rules.as_slice())
            .unwrap_or_default()
    }

    /// Summary of rule coverage for lint output.
    pub fn coverage(&self) -> CoverageReport {
        let mut per_scope = IndexMap::new();
        let mut per_store = IndexMap::new();
        let mut per_category = IndexMap::new();

        for set in self.sets.values() {
            *per_scope.entry(set.scope.to_string()).or_insert(0usize) += set.rules.len();
            for rule in &set.rules {
                for store in rule.referenced_stores() {
                    *per_store.entry(store.to_string()).or_insert(0usize) += 1;
                }
                if rule.is_identity_level() {
                    *per_store.entry("_identity".to_string()).or_insert(0usize) += 1;
                }
                let category = if rule.category.is_empty() {
                    "uncategorized"
                } else {
                    rule.category.as_str()
                };
                *per_category.entry(category.to_string()).or_insert(0usize) += 1;
            }
        }

        CoverageReport {
            total_rules: self.total_rules(),
            per_scope,
            per_store,
            per_category,
            issues: self.issues.len(),
            conflicts: self.conflicts.len()
        }
    }
}

/// Rule counts by scope, store, and category.
#[derive(Debug, Clone, Serialize)]
pub struct CoverageReport {
    pub total_rules:  usize,
    pub per_scope:    IndexMap<String, usize>,
    pub per_store:    IndexMap<String, usize>,
    pub per_category: IndexMap<String, usize>,
    pub issues:       usize,
    pub conflicts:    usize
}

/// Owner of the authoritative rule state for every scope.
///
/// Readers take cheap `Arc` snapshots; `reload` swaps the active pointer
/// so in-flight evaluations keep the snapshot they started with.
pub struct RuleRepository {
    paths:            DiscoveryPaths,
    config:           RulesConfig,
    context_ids:      LoadContextIds,
    builtin_defaults: bool,
    generation:       AtomicU64,
    state:            RwLock<Arc<LoadedRules>>
}

/// Identifiers stamped onto rules of the matching scope at load time.
#[derive(Debug, Clone, Default)]
pub struct LoadContextIds {
    pub wing_id:     Option<String>,
    pub pipeline_id: Option<String>,
    pub case_id:     Option<String>
}

impl RuleRepository {
    /// Create an empty repository; call [`reload`](Self::reload) to load.
    pub fn new(paths: DiscoveryPaths, config: RulesConfig, context_ids: LoadContextIds) -> Self {
        Self {
            paths,
            config,
            context_ids,
            builtin_defaults: false,
            generation: AtomicU64::new(0),
            state: RwLock::new(Arc::new(LoadedRules::default()))
        }
    }

    /// Also load the defaults compiled into the binary (lowest
    /// precedence) on every reload.
    pub fn with_builtin_defaults(mut self) -> Self {
        self.builtin_defaults = true;
        self
    }

    /// Current immutable snapshot.
    pub fn current(&self) -> Arc<LoadedRules> {
        self.state
            .read()
            .map(|guard| Arc::clone(&guard))
            .unwrap_or_default()
    }

    /// Reload every scope from disk and atomically swap the snapshot.
    ///
    /// On error the previous state stays active. Reloading twice with
    /// unchanged files yields the same rules (generation aside).
    pub fn reload(&self) -> AppResult<Arc<LoadedRules>> {
        let sources = discover(&self.paths)?;
        let mut sets: IndexMap<Scope, RuleSet> = IndexMap::new();
        let mut issues = Vec::new();

        if self.builtin_defaults {
            let mut report = load_builtin_defaults();
            issues.append(&mut report.issues);
            let set = sets
                .entry(Scope::BuiltIn)
                .or_insert_with(|| RuleSet::new(Scope::BuiltIn));
            for mut rule in report.rules {
                if self.is_disabled(&rule.rule_id) {
                    continue;
                }
                if let Some(severity) = self.severity_override(&rule.rule_id) {
                    rule.severity = severity;
                }
                set.rules.push(rule);
            }
        }

        for source in sources {
            let context = LoadContext {
                scope:       source.scope,
                wing_id:     applies(source.scope == Scope::Wing, &self.context_ids.wing_id),
                pipeline_id: applies(
                    source.scope == Scope::Pipeline,
                    &self.context_ids.pipeline_id
                ),
                case_id:     applies(source.scope == Scope::Case, &self.context_ids.case_id)
            };
            let mut report = load_file(&source.path, &context);
            issues.append(&mut report.issues);

            let set = sets
                .entry(source.scope)
                .or_insert_with(|| RuleSet::new(source.scope));
            set.sources.push(RuleProvenance {
                path:     source.path.clone(),
                priority: source.priority
            });
            for mut rule in report.rules {
                if self.is_disabled(&rule.rule_id) {
                    debug!(rule_id = %rule.rule_id, "rule disabled by configuration");
                    continue;
                }
                if let Some(severity) = self.severity_override(&rule.rule_id) {
                    rule.severity = severity;
                }
                set.rules.push(rule);
            }
        }

        let all_rules: Vec<Rule> = sets
            .values()
            .flat_map(|set| set.rules.iter().cloned())
            .collect();
        let conflicts = conflict_report(&all_rules);

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let loaded = Arc::new(LoadedRules {
            generation,
            sets,
            issues,
            conflicts
        });

        if let Ok(mut guard) = self.state.write() {
            *guard = Arc::clone(&loaded);
        }

        info!(
            generation,
            rules = loaded.total_rules(),
            issues = loaded.issues.len(),
            conflicts = loaded.conflicts.len(),
            "rule repository reloaded"
        );

        Ok(loaded)
    }

    fn is_disabled(&self, rule_id: &str) -> bool {
        self.config
            .disabled
            .iter()
            .any(|d| d.eq_ignore_ascii_case(rule_id))
    }

    fn severity_override(&self, rule_id: &str) -> Option<Severity> {
        self.config
            .severity
            .get(rule_id)
            .and_then(|s| parse_severity(s))
    }
}

fn applies(matches_scope: bool, id: &Option<String>) -> Option<String> {
    if matches_scope { id.clone() } else { None }
}

/// Parse severity string to enum
pub fn parse_severity(s: &str) -> Option<Severity> {
    match s.to_lowercase().as_str() {
        "info" => Some(Severity::Info),
        "low" => Some(Severity::Low),
        "medium" => Some(Severity::Medium),
        "high" => Some(Severity::High),
        "critical" => Some(Severity::Critical),
        _ => None
    }
}
