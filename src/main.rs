//! # Artifact Semantics
//!
//! Semantic rule evaluation for forensic artifact correlation.
//!
//! `artifact-semantics` attaches semantic labels ("User Login", "Web
//! Browser Activity", "Confirmed Execution") to correlated identities by
//! evaluating declarative multi-condition rules against heterogeneous
//! artifact stores (event logs, prefetch, SRUM, registry, MFT, ...).
//!
//! # Architecture
//!
//! Evaluation is two-tier:
//!
//! 1. **Identity-level rules** (every condition targets `_identity`) are
//!    evaluated in memory against the identity's own fields - no store is
//!    ever opened.
//!
//! 2. **Record-level rules** are translated to parameterized SQL and
//!    executed against each referenced store, with store groups running
//!    in parallel once their count reaches the configured threshold. A
//!    cheap descriptor pre-filter eliminates irrelevant stores without
//!    touching record pages. Any failure along the optimized path
//!    degrades to in-memory evaluation over the identity's anchor
//!    records for that rule only.
//!
//! # Quick Start
//!
//! ```bash
//! # Evaluate one identity against global rules
//! artifact-semantics evaluate -i identity.json -r /etc/crow
//!
//! # Wing- and case-scoped rules with context identifiers
//! artifact-semantics evaluate -i identity.json -r /etc/crow \
//!     --wing-root /cases/w1 --wing w1 --case-root /cases/w1/c7 --case c7
//!
//! # Stream the identity document from stdin, JSON output
//! cat identities.json | artifact-semantics evaluate -i - -r /etc/crow -f json
//!
//! # Check rule files for skipped entries and conflicts
//! artifact-semantics lint -r /etc/crow
//! ```
//!
//! # Rule Files
//!
//! Rule directories are scanned per scope (`<root>/semantic_mappings/`,
//! built-ins under `default_mappings/`); every `*.yaml`, `*.yml`, and
//! `*.json` loads. Files carry `mappings` (one-condition shorthand) and
//! `rules` (compound AND/OR conditions):
//!
//! ```yaml
//! mappings:
//!   - source: SecurityLogs
//!     field: EventID
//!     technical_value: "4624"
//!     semantic_value: User Login
//!     category: authentication
//!     severity: info
//! rules:
//!   - rule_id: identity-web-browser
//!     name: Web Browser Activity
//!     logic_operator: AND
//!     conditions:
//!       - store_id: _identity
//!         field_name: identity_type
//!         operator: equals
//!         value: application
//!       - store_id: _identity
//!         field_name: identity_value
//!         operator: regex
//!         value: "(CHROME|FIREFOX|EDGE)"
//!     semantic_value: Web Browser Activity
//!     category: user_activity
//!     severity: info
//! ```
//!
//! Scope precedence, highest first: case > wing > pipeline > global >
//! built-in. Two rules sharing a `rule_id` resolve to the higher scope;
//! same-key mapping conflicts resolve by the configured strategy and are
//! recorded in the decision log.
//!
//! # Exit Codes
//!
//! The process exit code reflects the highest severity among matches:
//!
//! - `0` - no matches, or nothing above `low`
//! - `1` - `medium` matches found
//! - `2` - `high` or `critical` matches found
//!
//! # Environment Variables
//!
//! | Variable | Description |
//! |----------|-------------|
//! | `RULE_FILE_SEARCH_PATH` | Extra global rule directories |
//! | `SEMANTIC_PARALLEL_MAX` | Worker pool bound |
//! | `SEMANTIC_PARALLEL_THRESHOLD` | Store-group count triggering parallelism |
//! | `RUST_LOG` | Log filter (tracing env-filter syntax) |
//!
//! # Modules
//!
//! - [`rules`] - Rule model and in-memory evaluation semantics
//! - [`loader`] - Rule discovery, parsing, and atomic reload
//! - [`scope`] - Scope resolution and conflict strategies
//! - [`query`] - Rule-to-SQL translation
//! - [`store`] - Read-only store adapter and descriptor pre-filter
//! - [`evaluator`] - Two-tier evaluation engine
//! - [`cache`] - Compiled-pattern cache
//! - [`config`] - Configuration loading
//! - [`output`] - Result formatting
//! - [`error`] - Error types and constructors

mod cache;
mod cli;
mod config;
mod error;
mod evaluator;
mod identity;
mod loader;
mod output;
mod query;
mod rules;
mod scope;
mod store;

use std::{
    fs::read_to_string,
    io::{self, Read},
    path::PathBuf,
    process,
    sync::Arc
};

use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;

use crate::{
    cli::{Cli, Commands, Format, OutputArgs, RulePathArgs},
    config::Config,
    error::{AppResult, file_read_error, identity_parse_error},
    evaluator::{EvaluationContext, EvaluationOutcome, EvaluatorOptions, SemanticRuleEvaluator},
    identity::Identity,
    loader::{DiscoveryPaths, LoadContextIds, RuleRepository},
    output::{LintReport, OutputFormat, OutputOptions, format_evaluation, format_lint},
    rules::Severity,
    scope::ScopeResolver
};

fn main() {
    match run() {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    }
}

fn run() -> AppResult<i32> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .try_init();

    let cli = Cli::parse();
    let config = Config::load()?;

    match cli.command {
        Commands::Evaluate {
            identity,
            rule_paths,
            wing,
            pipeline,
            case,
            max_workers,
            parallel_threshold,
            output
        } => run_evaluate(
            &config,
            identity,
            rule_paths,
            wing,
            pipeline,
            case,
            max_workers,
            parallel_threshold,
            output
        ),
        Commands::Lint {
            rule_paths,
            output
        } => run_lint(&config, rule_paths, output)
    }
}

#[allow(clippy::too_many_arguments)]
fn run_evaluate(
    config: &Config,
    identity_path: PathBuf,
    rule_paths: RulePathArgs,
    wing: Option<String>,
    pipeline: Option<String>,
    case: Option<String>,
    max_workers: Option<usize>,
    parallel_threshold: Option<usize>,
    output: OutputArgs
) -> AppResult<i32> {
    let output_opts = output_options(&output);

    let mut repository = RuleRepository::new(
        discovery_paths(config, &rule_paths),
        config.rules.clone(),
        LoadContextIds {
            wing_id:     wing.clone(),
            pipeline_id: pipeline.clone(),
            case_id:     case.clone()
        }
    );
    if !rule_paths.no_builtin {
        repository = repository.with_builtin_defaults();
    }
    let repository = Arc::new(repository);
    repository.reload()?;

    let mut options = EvaluatorOptions::from(&config.evaluation);
    if let Some(max_workers) = max_workers {
        options.max_workers = max_workers.max(1);
    }
    if let Some(threshold) = parallel_threshold {
        options.parallel_threshold = threshold;
    }

    let evaluator = SemanticRuleEvaluator::new(
        repository,
        ScopeResolver::new(config.resolution.strategy),
        options
    );

    let identities = read_identities(&identity_path)?;

    let context = EvaluationContext {
        wing_id: wing,
        pipeline_id: pipeline,
        case_id: case,
        ..Default::default()
    };

    // Progress bar for batch evaluation in text mode
    let progress = if identities.len() > 1 && matches!(output.output_format, Format::Text) {
        let pb = ProgressBar::new(identities.len() as u64);
        if let Ok(style) = ProgressStyle::default_bar().template("{bar:30} {pos}/{len} {msg}") {
            pb.set_style(style);
        }
        pb.set_message("Evaluating identities");
        Some(pb)
    } else {
        None
    };

    let mut outcomes: Vec<EvaluationOutcome> = Vec::with_capacity(identities.len());
    for identity in &identities {
        let outcome = evaluator.evaluate_identity(identity, &context)?;
        if let Some(pb) = &progress {
            pb.inc(1);
        }
        outcomes.push(outcome);
    }
    if let Some(pb) = progress {
        pb.finish_and_clear();
    }

    // A batch in a structured format prints one document
    if outcomes.len() > 1 && !matches!(output.output_format, Format::Text) {
        let rendered = match output.output_format {
            Format::Json => serde_json::to_string_pretty(&outcomes).unwrap_or_default(),
            Format::Yaml => serde_yaml::to_string(&outcomes).unwrap_or_default(),
            Format::Text => unreachable!()
        };
        println!("{}", rendered);
    } else {
        for outcome in &outcomes {
            println!("{}", format_evaluation(outcome, &output_opts));
        }
    }

    let top_severity = outcomes
        .iter()
        .flat_map(|o| o.matches.iter())
        .map(|m| m.severity)
        .max();

    Ok(match top_severity {
        Some(Severity::High | Severity::Critical) => 2,
        Some(Severity::Medium) => 1,
        _ => 0
    })
}

fn run_lint(config: &Config, rule_paths: RulePathArgs, output: OutputArgs) -> AppResult<i32> {
    let output_opts = output_options(&output);

    let mut repository = RuleRepository::new(
        discovery_paths(config, &rule_paths),
        config.rules.clone(),
        LoadContextIds::default()
    );
    if !rule_paths.no_builtin {
        repository = repository.with_builtin_defaults();
    }
    let loaded = repository.reload()?;

    let report = LintReport::new(loaded.coverage(), &loaded.issues, &loaded.conflicts);
    println!("{}", format_lint(&report, &output_opts));

    Ok(if loaded.issues.is_empty() && loaded.conflicts.is_empty() {
        0
    } else {
        1
    })
}

fn discovery_paths(config: &Config, rule_paths: &RulePathArgs) -> DiscoveryPaths {
    let mut global_roots = rule_paths.rules_root.clone();
    global_roots.extend(config.rules.search_path.iter().cloned());

    DiscoveryPaths::conventional(
        rule_paths.built_in_root.as_deref(),
        &global_roots,
        rule_paths.pipeline_root.as_deref(),
        rule_paths.wing_root.as_deref(),
        rule_paths.case_root.as_deref()
    )
}

fn output_options(output: &OutputArgs) -> OutputOptions {
    OutputOptions {
        format:  match output.output_format {
            Format::Text => OutputFormat::Text,
            Format::Json => OutputFormat::Json,
            Format::Yaml => OutputFormat::Yaml
        },
        colored: !output.no_color,
        verbose: output.verbose
    }
}

/// Read one identity or an array of identities from a file or stdin.
fn read_identities(path: &PathBuf) -> AppResult<Vec<Identity>> {
    let content = if path.to_str() == Some("-") {
        let mut buffer = String::new();
        io::stdin()
            .read_to_string(&mut buffer)
            .map_err(|e| file_read_error("stdin", e))?;
        buffer
    } else {
        read_to_string(path).map_err(|e| file_read_error(&path.display().to_string(), e))?
    };

    let document: serde_json::Value =
        serde_json::from_str(&content).map_err(|e| identity_parse_error(e.to_string()))?;

    if document.is_array() {
        serde_json::from_value(document).map_err(|e| identity_parse_error(e.to_string()))
    } else {
        let identity: Identity =
            serde_json::from_value(document).map_err(|e| identity_parse_error(e.to_string()))?;
        Ok(vec![identity])
    }
}
