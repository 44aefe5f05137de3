use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{NodeflowError, Result};

/// Top-level nodeflow configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub log_sink: LogSinkConfig,
    #[serde(default)]
    pub handlers: HandlersConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite database holding scripts, nodes and execution logs.
    #[serde(default = "default_database")]
    pub database: String,
    /// Keys removed from a node's `data` payload before it is persisted.
    #[serde(default = "default_strip_data_fields")]
    pub strip_data_fields: Vec<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database: default_database(),
            strip_data_fields: default_strip_data_fields(),
        }
    }
}

fn default_database() -> String { "~/.nodeflow/nodeflow.db".to_string() }
fn default_strip_data_fields() -> Vec<String> { vec!["color".to_string()] }

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Parallel node execution within one run. Always rejected when set.
    #[serde(default)]
    pub parallel: bool,
}

/// Delivery policy for node execution log events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSinkConfig {
    #[serde(default = "default_sink_enabled")]
    pub enabled: bool,
    #[serde(default = "default_sink_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_sink_initial_backoff")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_sink_max_backoff")]
    pub max_backoff_ms: u64,
    /// Overall deadline for delivering one event, retries included.
    #[serde(default = "default_sink_timeout")]
    pub timeout_ms: u64,
}

impl Default for LogSinkConfig {
    fn default() -> Self {
        Self {
            enabled: default_sink_enabled(),
            max_retries: default_sink_max_retries(),
            initial_backoff_ms: default_sink_initial_backoff(),
            max_backoff_ms: default_sink_max_backoff(),
            timeout_ms: default_sink_timeout(),
        }
    }
}

fn default_sink_enabled() -> bool { true }
fn default_sink_max_retries() -> u32 { 3 }
fn default_sink_initial_backoff() -> u64 { 100 }
fn default_sink_max_backoff() -> u64 { 2000 }
fn default_sink_timeout() -> u64 { 5000 }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandlersConfig {
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,
}

impl Default for HandlersConfig {
    fn default() -> Self {
        Self {
            http_timeout_secs: default_http_timeout(),
        }
    }
}

fn default_http_timeout() -> u64 { 30 }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive used when `RUST_LOG` is unset.
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

fn default_log_filter() -> String { "nodeflow=info,warn".to_string() }

impl AppConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| NodeflowError::ConfigNotFound(path.display().to_string()))?;

        // Expand ${ENV_VAR} references
        let expanded = expand_env_vars(&content);

        toml::from_str(&expanded).map_err(|e| NodeflowError::Config(e.to_string()))
    }

    /// Resolve the database path (expand ~).
    pub fn database_path(&self) -> PathBuf {
        let db = &self.storage.database;
        if let Some(rest) = db.strip_prefix("~/") {
            if let Some(home) = dirs_home() {
                return home.join(rest);
            }
        }
        PathBuf::from(db)
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

pub fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}
