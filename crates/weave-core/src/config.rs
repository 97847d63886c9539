use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::catalog::AgentSpec;
use crate::error::{Result, WeaveError};

/// Top-level Weave configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Directory of `<AgentName>.json` catalog files.
    #[serde(default = "default_agents_dir")]
    pub agents_dir: String,
    #[serde(default)]
    pub llm: LlmConfig,
    pub planner: PlannerConfig,
    #[serde(default)]
    pub responder: Option<ResponderConfig>,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub log: Option<LogConfig>,
    /// Inline agent catalog entries (override files in `agents_dir`).
    #[serde(default)]
    pub agents: Vec<AgentSpec>,
}

fn default_agents_dir() -> String { "Agents".to_string() }

/// Connection settings for the chat-completion provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub retry: Option<RetryConfig>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            base_url: None,
            api_key: None,
            max_tokens: default_max_tokens(),
            timeout_secs: default_timeout_secs(),
            retry: None,
        }
    }
}

fn default_provider() -> String { "openai".to_string() }
fn default_max_tokens() -> u32 { 800 }
fn default_timeout_secs() -> u64 { 120 }

/// Retry configuration for LLM requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

fn default_max_retries() -> u32 { 3 }
fn default_initial_backoff() -> u64 { 1000 }
fn default_max_backoff() -> u64 { 30000 }

/// Planner model and parse-retry policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannerConfig {
    pub model: String,
    #[serde(default)]
    pub temperature: f32,
    /// Total attempts before giving up on malformed planner output.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Sleep between attempts is `retry_backoff_ms * attempt`.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    /// Used when the catalog has no `orchestrator_agent` entry.
    #[serde(default)]
    pub system_prompt: Option<String>,
}

impl PlannerConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            temperature: 0.0,
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            system_prompt: None,
        }
    }
}

fn default_retry_backoff_ms() -> u64 { 1500 }

/// Final-answer synthesis model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponderConfig {
    pub model: String,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default)]
    pub system_prompt: Option<String>,
}

/// Plan execution settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Upper bound on concurrently dispatched steps within one ready set.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
        }
    }
}

fn default_max_concurrency() -> usize { 8 }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

fn default_db_path() -> String { "memory.db".to_string() }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Number of most recent turns rendered verbatim for the planner.
    #[serde(default = "default_max_window")]
    pub max_window: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_window: default_max_window(),
        }
    }
}

fn default_max_window() -> usize { 4 }

/// JSONL event logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Enable event logging (default: true when section is present).
    #[serde(default = "default_log_enabled")]
    pub enabled: bool,
    /// Directory for log files. Default: logs
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    /// 1 = turn/plan summaries, 2 = + ready sets and planner retries, 3 = + steps.
    #[serde(default = "default_log_level")]
    pub level: u8,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: default_log_enabled(),
            log_dir: default_log_dir(),
            level: default_log_level(),
        }
    }
}

fn default_log_enabled() -> bool { true }
fn default_log_dir() -> String { "logs".to_string() }
fn default_log_level() -> u8 { 2 }

impl AppConfig {
    /// Defaults for every section except the planner, which has none.
    pub fn with_planner(planner: PlannerConfig) -> Self {
        Self {
            agents_dir: default_agents_dir(),
            llm: LlmConfig::default(),
            planner,
            responder: None,
            engine: EngineConfig::default(),
            memory: MemoryConfig::default(),
            history: HistoryConfig::default(),
            log: None,
            agents: Vec::new(),
        }
    }

    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| WeaveError::ConfigNotFound(path.display().to_string()))?;

        // Expand ${ENV_VAR} references
        let expanded = expand_env_vars(&content);

        toml::from_str(&expanded).map_err(|e| WeaveError::Config(e.to_string()))
    }

    /// Resolve the agents directory relative to `base` (the config file's directory).
    pub fn agents_dir_in(&self, base: &Path) -> PathBuf {
        resolve_path(base, &self.agents_dir)
    }

    pub fn db_path_in(&self, base: &Path) -> PathBuf {
        resolve_path(base, &self.memory.db_path)
    }

    /// Responder settings, defaulting to the planner model.
    pub fn responder(&self) -> ResponderConfig {
        self.responder.clone().unwrap_or_else(|| ResponderConfig {
            model: self.planner.model.clone(),
            temperature: self.planner.temperature,
            system_prompt: None,
        })
    }
}

fn resolve_path(base: &Path, raw: &str) -> PathBuf {
    if let Some(rest) = raw.strip_prefix("~/") {
        if let Some(home) = dirs_home() {
            return home.join(rest);
        }
    }
    let path = PathBuf::from(raw);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
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
        std::env::set_var("TEST_WEAVE_VAR", "hello");
        let result = expand_env_vars("key = \"${TEST_WEAVE_VAR}\"");
        assert_eq!(result, "key = \"hello\"");
        std::env::remove_var("TEST_WEAVE_VAR");
    }

    #[test]
    fn test_expand_env_vars_missing() {
        let result = expand_env_vars("key = \"${NONEXISTENT_WEAVE_VAR}\"");
        assert_eq!(result, "key = \"${NONEXISTENT_WEAVE_VAR}\"");
    }

    #[test]
    fn test_defaults_from_minimal_toml() {
        let toml_str = r#"
[planner]
model = "gpt-4o-mini"
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.agents_dir, "Agents");
        assert_eq!(config.planner.max_retries, 3);
        assert_eq!(config.planner.retry_backoff_ms, 1500);
        assert_eq!(config.planner.temperature, 0.0);
        assert_eq!(config.engine.max_concurrency, 8);
        assert_eq!(config.memory.db_path, "memory.db");
        assert_eq!(config.history.max_window, 4);
        assert_eq!(config.llm.max_tokens, 800);
        assert!(config.log.is_none());
        assert!(config.agents.is_empty());
    }

    #[test]
    fn test_responder_falls_back_to_planner_model() {
        let config: AppConfig = toml::from_str(
            r#"
[planner]
model = "planner-model"
temperature = 0.3
"#,
        )
        .unwrap();
        let responder = config.responder();
        assert_eq!(responder.model, "planner-model");
        assert_eq!(responder.temperature, 0.3);
    }

    #[test]
    fn test_relative_paths_resolve_against_base() {
        let config: AppConfig = toml::from_str(
            r#"
agents_dir = "catalog/agents"
[planner]
model = "m"
[memory]
db_path = "/var/lib/weave/memory.db"
"#,
        )
        .unwrap();
        let base = Path::new("/etc/weave");
        assert_eq!(
            config.agents_dir_in(base),
            PathBuf::from("/etc/weave/catalog/agents")
        );
        assert_eq!(
            config.db_path_in(base),
            PathBuf::from("/var/lib/weave/memory.db")
        );
    }

    #[test]
    fn test_log_section_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
[planner]
model = "m"
[log]
"#,
        )
        .unwrap();
        let log = config.log.unwrap();
        assert!(log.enabled);
        assert_eq!(log.log_dir, "logs");
        assert_eq!(log.level, 2);
    }
}
