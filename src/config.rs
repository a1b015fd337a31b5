//! Configuration loading and management.
//!
//! Configuration is loaded from multiple sources with the following
//! precedence (highest to lowest):
//!
//! 1. Command-line arguments
//! 2. Environment variables
//! 3. `.artifact-semantics.toml` in current directory
//! 4. `~/.config/artifact-semantics/config.toml`
//! 5. Default values
//!
//! # Configuration File Format
//!
//! ```toml
//! [evaluation]
//! enable_parallel = true
//! parallel_threshold = 3    # store groups needed to go parallel
//! max_workers = 4           # lower bound 1; 1 = strictly sequential
//! query_deadline_ms = 0     # 0 disables the per-store soft deadline
//!
//! [rules]
//! search_path = ["/etc/crow/semantic_mappings"]
//! disabled = ["mapping:SecurityLogs.EventID:4625"]
//!
//! [rules.severity]
//! identity-web-browser = "low"
//!
//! [resolution]
//! strategy = "case_precedence"   # additive_merge, global_precedence
//! ```
//!
//! # Environment Variables
//!
//! | Variable | Description |
//! |----------|-------------|
//! | `RULE_FILE_SEARCH_PATH` | Colon-separated global rule directories |
//! | `SEMANTIC_PARALLEL_MAX` | Override `max_workers` |
//! | `SEMANTIC_PARALLEL_THRESHOLD` | Override `parallel_threshold` |

use std::{collections::HashMap, env, fs, path::PathBuf};

use serde::Deserialize;

use crate::{
    error::{AppResult, config_error},
    scope::ResolutionStrategy
};

/// Application configuration
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub evaluation: EvaluationConfig,
    #[serde(default)]
    pub rules:      RulesConfig,
    #[serde(default)]
    pub resolution: ResolutionConfig
}

/// Evaluator tuning knobs
#[derive(Debug, Clone, Deserialize)]
pub struct EvaluationConfig {
    pub enable_parallel:    bool,
    /// Minimum store-group count before workers go parallel.
    pub parallel_threshold: usize,
    /// Worker pool size; clamped to at least 1.
    pub max_workers:        usize,
    /// Soft per-store query deadline in milliseconds; 0 disables.
    pub query_deadline_ms:  u64
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            enable_parallel:    true,
            parallel_threshold: 3,
            max_workers:        4,
            query_deadline_ms:  0
        }
    }
}

/// Rule discovery and filtering configuration
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RulesConfig {
    /// Extra directories scanned for global-scope rule files.
    #[serde(default)]
    pub search_path: Vec<PathBuf>,
    /// Disabled rule IDs
    #[serde(default)]
    pub disabled:    Vec<String>,
    /// Severity overrides (rule_id -> severity)
    #[serde(default)]
    pub severity:    HashMap<String, String>
}

/// Scope-conflict resolution configuration
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ResolutionConfig {
    #[serde(default)]
    pub strategy: ResolutionStrategy
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables
    /// 2. Config file in current directory (.artifact-semantics.toml)
    /// 3. Config file in home directory (~/.config/artifact-semantics/config.toml)
    /// 4. Default values
    pub fn load() -> AppResult<Self> {
        let mut config = Self::default();

        // Try to load from home directory config
        if let Some(home) = env::var_os("HOME") {
            let home_config = PathBuf::from(home)
                .join(".config")
                .join("artifact-semantics")
                .join("config.toml");

            if home_config.exists() {
                let content = fs::read_to_string(&home_config)
                    .map_err(|e| config_error(format!("Failed to read config file: {}", e)))?;
                config = toml::from_str(&content)
                    .map_err(|e| config_error(format!("Invalid config file: {}", e)))?;
            }
        }

        // Try to load from current directory config (overrides home config)
        let local_config = PathBuf::from(".artifact-semantics.toml");
        if local_config.exists() {
            let content = fs::read_to_string(&local_config)
                .map_err(|e| config_error(format!("Failed to read config file: {}", e)))?;
            config = toml::from_str(&content)
                .map_err(|e| config_error(format!("Invalid config file: {}", e)))?;
        }

        // Override with environment variables
        if let Ok(path_list) = env::var("RULE_FILE_SEARCH_PATH") {
            config.rules.search_path = env::split_paths(&path_list).collect();
        }

        if let Ok(max) = env::var("SEMANTIC_PARALLEL_MAX") {
            config.evaluation.max_workers = max
                .parse()
                .map_err(|_| config_error(format!("Invalid SEMANTIC_PARALLEL_MAX: '{}'", max)))?;
        }

        if let Ok(threshold) = env::var("SEMANTIC_PARALLEL_THRESHOLD") {
            config.evaluation.parallel_threshold = threshold.parse().map_err(|_| {
                config_error(format!("Invalid SEMANTIC_PARALLEL_THRESHOLD: '{}'", threshold))
            })?;
        }

        config.evaluation.max_workers = config.evaluation.max_workers.max(1);

        Ok(config)
    }
}
