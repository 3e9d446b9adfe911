//! Configuration System
//!
//! Provides hierarchical configuration loading from:
//! - sqlweave.toml (default configuration)
//! - sqlweave.local.toml (git-ignored local overrides)
//! - Environment variables (SQLWEAVE_* prefix)
//!
//! ## Example
//!
//! ```toml
//! # sqlweave.toml
//! [compiler]
//! rewriting_passes = ["captured_members", "nullable_members", "contains"]
//! parameter_prefix = "@p"
//!
//! [cache]
//! max_entries = 500
//! ```
//!
//! Environment variable overrides:
//! ```bash
//! SQLWEAVE_CACHE__ENABLED=false
//! SQLWEAVE_LOGGING__FORMAT=json
//! ```

use crate::optimizer::OptimizePass;
use crate::rewriting::RewritePass;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration struct
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub compiler: CompilerConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompilerConfig {
    /// Rewriting passes, in the order they run
    #[serde(default = "default_rewriting_passes")]
    pub rewriting_passes: Vec<String>,

    /// Optimizing passes, in the order they run each round
    #[serde(default = "default_optimizing_passes")]
    pub optimizing_passes: Vec<String>,

    /// Rounds over the optimizing passes before giving up on a fixpoint
    #[serde(default = "default_max_optimizer_iterations")]
    pub max_optimizer_iterations: usize,

    /// Placeholder prefix; parameters render as `<prefix>0`, `<prefix>1`, ...
    #[serde(default = "default_parameter_prefix")]
    pub parameter_prefix: String,

    /// Schema for tables defined without one
    #[serde(default = "default_schema")]
    pub default_schema: String,
}

/// Plan cache configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Compiled plans kept before the least recently used is evicted
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error) or a filter directive
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (text, json)
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_rewriting_passes() -> Vec<String> {
    RewritePass::ALL.iter().map(|p| p.name().to_string()).collect()
}
fn default_optimizing_passes() -> Vec<String> {
    OptimizePass::ALL.iter().map(|p| p.name().to_string()).collect()
}
fn default_max_optimizer_iterations() -> usize {
    10
}
fn default_parameter_prefix() -> String {
    "@p".to_string()
}
fn default_schema() -> String {
    "dbo".to_string()
}
fn default_true() -> bool {
    true
}
fn default_max_entries() -> usize {
    1000
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "text".to_string()
}

impl Config {
    /// Load configuration from default locations
    ///
    /// Merges in order:
    /// 1. sqlweave.toml (base configuration)
    /// 2. sqlweave.local.toml (local overrides, git-ignored)
    /// 3. Environment variables (SQLWEAVE_* prefix)
    pub fn load() -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file("sqlweave.toml"))
            .merge(Toml::file("sqlweave.local.toml"))
            .merge(Env::prefixed("SQLWEAVE_").split("__"))
            .extract()
    }

    /// Load configuration from specific file path
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("SQLWEAVE_").split("__"))
            .extract()
    }

    /// Parse configuration from TOML text, without environment overrides
    pub fn from_toml_str(text: &str) -> Result<Self, figment::Error> {
        Figment::new().merge(Toml::string(text)).extract()
    }
}

impl Default for CompilerConfig {
    fn default() -> Self {
        CompilerConfig {
            rewriting_passes: default_rewriting_passes(),
            optimizing_passes: default_optimizing_passes(),
            max_optimizer_iterations: default_max_optimizer_iterations(),
            parameter_prefix: default_parameter_prefix(),
            default_schema: default_schema(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            enabled: true,
            max_entries: default_max_entries(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.compiler.parameter_prefix, "@p");
        assert_eq!(config.compiler.default_schema, "dbo");
        assert_eq!(config.compiler.rewriting_passes.len(), RewritePass::ALL.len());
        assert_eq!(
            config.compiler.optimizing_passes,
            vec!["key_equality", "prune_columns", "simplify_booleans"]
        );
        assert!(config.cache.enabled);
        assert_eq!(config.cache.max_entries, 1000);
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let toml_str = toml::to_string(&config).unwrap();

        assert!(toml_str.contains("[compiler]"));
        assert!(toml_str.contains("[cache]"));
        assert!(toml_str.contains("[logging]"));

        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = Config::from_toml_str(
            r#"
            [compiler]
            optimizing_passes = ["simplify_booleans"]

            [cache]
            max_entries = 5
            "#,
        )
        .unwrap();

        assert_eq!(config.compiler.optimizing_passes, vec!["simplify_booleans"]);
        assert_eq!(config.compiler.parameter_prefix, "@p");
        assert_eq!(config.cache.max_entries, 5);
        assert!(config.cache.enabled);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[compiler]\nparameter_prefix = \"@arg\"\n\n[logging]\nformat = \"json\""
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.compiler.parameter_prefix, "@arg");
        assert_eq!(config.logging.format, "json");
    }

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::from_file(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.compiler, CompilerConfig::default());
    }
}
