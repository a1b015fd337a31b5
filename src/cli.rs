use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Artifact Semantics - Evaluate semantic rules against correlated identities
#[derive(Parser, Debug)]
#[command(name = "artifact-semantics")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Evaluate semantic rules against identities from a JSON document
    Evaluate {
        /// Path to identity JSON (use - for stdin); one object or an array
        #[arg(short, long)]
        identity: PathBuf,

        #[command(flatten)]
        rule_paths: RulePathArgs,

        /// Wing identifier for wing-scoped rules
        #[arg(long)]
        wing: Option<String>,

        /// Pipeline identifier for pipeline-scoped rules
        #[arg(long)]
        pipeline: Option<String>,

        /// Case identifier for case-scoped rules
        #[arg(long)]
        case: Option<String>,

        /// Maximum worker threads for parallel store evaluation
        #[arg(long, env = "SEMANTIC_PARALLEL_MAX")]
        max_workers: Option<usize>,

        /// Store-group count that triggers parallel evaluation
        #[arg(long, env = "SEMANTIC_PARALLEL_THRESHOLD")]
        parallel_threshold: Option<usize>,

        #[command(flatten)]
        output: OutputArgs
    },

    /// Load all rule scopes and report skipped entries, conflicts, and coverage
    Lint {
        #[command(flatten)]
        rule_paths: RulePathArgs,

        #[command(flatten)]
        output: OutputArgs
    }
}

/// Scope roots; the conventional subdirectory is appended per scope
#[derive(Args, Debug, Clone)]
pub struct RulePathArgs {
    /// Global rule roots (each contains semantic_mappings/)
    #[arg(short = 'r', long = "rules-root")]
    pub rules_root: Vec<PathBuf>,

    /// Built-in rule root (contains default_mappings/)
    #[arg(long)]
    pub built_in_root: Option<PathBuf>,

    /// Pipeline directory (contains semantic_mappings/)
    #[arg(long)]
    pub pipeline_root: Option<PathBuf>,

    /// Wing directory (contains semantic_mappings/)
    #[arg(long)]
    pub wing_root: Option<PathBuf>,

    /// Case directory (contains semantic_mappings/)
    #[arg(long)]
    pub case_root: Option<PathBuf>,

    /// Skip the default mappings bundled with the binary
    #[arg(long)]
    pub no_builtin: bool
}

#[derive(Args, Debug, Clone)]
pub struct OutputArgs {
    /// Output format
    #[arg(short = 'f', long, value_enum, default_value = "text")]
    pub output_format: Format,

    /// Enable verbose output with conditions and the decision log
    #[arg(short, long)]
    pub verbose: bool,

    /// Disable colored output
    #[arg(long)]
    pub no_color: bool
}

#[derive(Debug, Clone, ValueEnum)]
pub enum Format {
    Text,
    Json,
    Yaml
}
