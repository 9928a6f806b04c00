use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, StepGraphError};

/// Top-level stepgraph configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub log: LogConfig,
}

/// Limits applied to every run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum nesting of containers and of forks within forks.
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    /// Maximum steps executed in one run, branch steps included.
    /// 0 disables the limit (a cyclic graph then runs forever).
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
            max_steps: default_max_steps(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite database file.
    #[serde(default = "default_store_path")]
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// `tracing` filter directive used when `RUST_LOG` is unset.
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

fn default_max_depth() -> usize { 64 }
fn default_max_steps() -> usize { 10_000 }
fn default_store_path() -> String { "~/.stepgraph/stepgraph.db".to_string() }
fn default_log_filter() -> String { "stepgraph=info,warn".to_string() }

impl AppConfig {
    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| StepGraphError::ConfigNotFound(path.display().to_string()))?;

        // Expand ${ENV_VAR} references
        let expanded = expand_env_vars(&content);

        toml::from_str(&expanded)
            .map_err(|e| StepGraphError::Config(e.to_string()))
    }

    /// Load config if the file exists, defaults otherwise.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Resolve the database path (expand ~).
    pub fn store_path(&self) -> PathBuf {
        let p = &self.store.path;
        if let Some(rest) = p.strip_prefix("~/") {
            if let Some(home) = dirs_home() {
                return home.join(rest);
            }
        }
        PathBuf::from(p)
    }
}

impl EngineConfig {
    /// `max_steps` as an optional limit.
    pub fn step_limit(&self) -> Option<usize> {
        (self.max_steps > 0).then_some(self.max_steps)
    }
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                Err(_) => {
                    // Keep original if env var not set
                    result.push_str(&format!("${{{}}}", var_name));
                }
            }
        } else {
            result.push(c);
        }
    }
    result
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_env_vars() {
        std::env::set_var("TEST_STEPGRAPH_VAR", "hello");
        let result = expand_env_vars("key = \"${TEST_STEPGRAPH_VAR}\"");
        assert_eq!(result, "key = \"hello\"");
        std::env::remove_var("TEST_STEPGRAPH_VAR");
    }

    #[test]
    fn test_expand_env_vars_missing() {
        let result = expand_env_vars("key = \"${NONEXISTENT_STEPGRAPH_VAR}\"");
        assert_eq!(result, "key = \"${NONEXISTENT_STEPGRAPH_VAR}\"");
    }

    #[test]
    fn test_defaults_from_empty_toml() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert_eq!(config.engine.max_depth, 64);
        assert_eq!(config.engine.max_steps, 10_000);
        assert_eq!(config.log.filter, "stepgraph=info,warn");
        assert!(config.store.path.ends_with("stepgraph.db"));
    }

    #[test]
    fn test_step_limit_zero_disables() {
        let config: AppConfig = toml::from_str("[engine]\nmax_steps = 0\n").unwrap();
        assert_eq!(config.engine.step_limit(), None);
        assert_eq!(config.engine.max_depth, 64);
        assert_eq!(EngineConfig::default().step_limit(), Some(10_000));
    }

    #[test]
    fn test_store_path_absolute_is_kept() {
        let config: AppConfig = toml::from_str("[store]\npath = \"/tmp/flows.db\"\n").unwrap();
        assert_eq!(config.store_path(), PathBuf::from("/tmp/flows.db"));
    }
}
