//! Configuration management for Strata.
//!
//! Configuration is loaded from multiple sources with the following priority:
//! 1. Environment variables (highest priority)
//! 2. Project-local `strata.toml` file
//! 3. User config `~/.config/strata/config.toml`
//! 4. Built-in defaults (lowest priority)
//!
//! The pipeline only ever reads these values; it never writes them back.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

mod defaults;

pub use defaults::*;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Interpreter selection rules, applied at startup.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub rules: Vec<RuleConfig>,

    /// Execution engine limits.
    pub engine: EngineConfig,

    /// Chunked interpretation bounds.
    pub chunk: ChunkConfig,

    /// Relational store location.
    pub storage: StorageConfig,

    /// Graph backend selection and call policy.
    pub graph: GraphConfig,
}

impl Config {
    /// Load configuration from default locations.
    ///
    /// Searches for config in order:
    /// 1. `./strata.toml` (project local)
    /// 2. `~/.config/strata/config.toml` (user config)
    /// 3. Falls back to defaults
    pub fn load() -> Result<Self, ConfigError> {
        if Path::new("strata.toml").exists() {
            return Self::from_file("strata.toml");
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("strata").join("config.toml");
            if user_config.exists() {
                return Self::from_file(&user_config);
            }
        }

        let mut config = Self::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&content)?;

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Apply environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Some(n) = env_parse("STRATA_MAX_CONCURRENT") {
            self.engine.max_concurrent = n;
        }
        if let Some(n) = env_parse("STRATA_MAX_QUEUE") {
            self.engine.max_queue = n;
        }
        if let Some(n) = env_parse("STRATA_TIMEOUT_MS") {
            self.engine.default_timeout_ms = n;
        }
        if let Some(n) = env_parse("STRATA_MAX_FILE_SIZE") {
            self.engine.default_max_size_bytes = n;
        }
        if let Some(n) = env_parse("STRATA_CHUNK_CEILING") {
            self.chunk.max_files_ceiling = n;
        }
        if let Ok(dir) = std::env::var("STRATA_DATA_DIR") {
            self.storage.data_dir = dir;
        }
        if let Ok(backend) = std::env::var("STRATA_GRAPH_BACKEND") {
            self.graph.backend = backend;
        }
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.engine.max_concurrent == 0 {
            return Err(ConfigError::Invalid(
                "engine.max_concurrent must be at least 1".to_string(),
            ));
        }
        if self.chunk.max_files_ceiling == 0 {
            return Err(ConfigError::Invalid(
                "chunk.max_files_ceiling must be at least 1".to_string(),
            ));
        }
        if let Some(rule) = self.rules.iter().find(|r| r.id.is_empty() || r.target.is_empty()) {
            return Err(ConfigError::Invalid(format!(
                "rule '{}' needs both an id and a target",
                rule.id
            )));
        }
        if !matches!(self.graph.backend.as_str(), "surreal" | "memory") {
            return Err(ConfigError::Invalid(format!(
                "unknown graph backend '{}'",
                self.graph.backend
            )));
        }
        Ok(())
    }

    /// Create a default config file content as a string.
    pub fn default_config_string() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

/// One `[[rules]]` entry.
///
/// ```toml
/// [[rules]]
/// id = "large-notebooks"
/// priority = 10
/// target = "notebook"
/// extension = "ipynb"
/// config = { max_size_bytes = 52428800 }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleConfig {
    pub id: String,
    pub priority: i32,
    /// Interpreter id the rule selects.
    pub target: String,
    pub path_regex: Option<String>,
    /// File name that must exist in the same directory.
    pub sibling: Option<String>,
    pub min_size: Option<u64>,
    pub extension: Option<String>,
    /// Overrides merged over the target's config.
    pub config: serde_json::Map<String, serde_json::Value>,
}

/// Execution engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Interpretations allowed to run at once.
    pub max_concurrent: usize,

    /// Interpretations allowed to wait for a slot; beyond this, BACKPRESSURE.
    pub max_queue: usize,

    /// Wall-clock budget when the interpreter sets none (milliseconds).
    pub default_timeout_ms: u64,

    /// Size guard when the interpreter sets none (bytes).
    pub default_max_size_bytes: u64,

    /// Hard cap on the serialized result payload (bytes).
    pub max_payload_bytes: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            max_queue: DEFAULT_MAX_QUEUE,
            default_timeout_ms: DEFAULT_TIMEOUT_MS,
            default_max_size_bytes: DEFAULT_MAX_SIZE_BYTES,
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
        }
    }
}

impl EngineConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }
}

/// Chunked interpretation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkConfig {
    /// Rows per chunk when the request does not say.
    pub default_max_files: usize,

    /// Upper clamp applied to any requested chunk size.
    pub max_files_ceiling: usize,

    /// Descriptors per store transaction during enumeration.
    pub ingest_batch_size: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            default_max_files: DEFAULT_CHUNK_MAX_FILES,
            max_files_ceiling: DEFAULT_CHUNK_MAX_FILES_CEILING,
            ingest_batch_size: DEFAULT_INGEST_BATCH_SIZE,
        }
    }
}

impl ChunkConfig {
    /// Clamp a requested chunk size into `[1, max_files_ceiling]`.
    pub fn clamp(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.default_max_files)
            .clamp(1, self.max_files_ceiling.max(1))
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Base directory for strata data (default: ".strata").
    pub data_dir: String,

    /// SQLite file name.
    pub db_file: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: DEFAULT_DATA_DIR.to_string(),
            db_file: DEFAULT_DB_FILE.to_string(),
        }
    }
}

impl StorageConfig {
    /// Full path to the SQLite database.
    pub fn db_path(&self) -> PathBuf {
        PathBuf::from(&self.data_dir).join(&self.db_file)
    }
}

/// Graph backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Backend name: "surreal" (embedded, persistent) or "memory".
    pub backend: String,

    /// Graph directory, relative to `storage.data_dir` unless absolute.
    pub path: String,

    /// Timeout for one backend call (milliseconds).
    pub call_timeout_ms: u64,

    /// Retries after the first failed call.
    pub max_retries: u32,

    /// First backoff delay (milliseconds), doubled per retry.
    pub backoff_ms: u64,

    /// Rows projected per page.
    pub page_size: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            backend: DEFAULT_GRAPH_BACKEND.to_string(),
            path: DEFAULT_GRAPH_DIR.to_string(),
            call_timeout_ms: DEFAULT_GRAPH_CALL_TIMEOUT_MS,
            max_retries: DEFAULT_GRAPH_MAX_RETRIES,
            backoff_ms: DEFAULT_GRAPH_BACKOFF_MS,
            page_size: DEFAULT_GRAPH_PAGE_SIZE,
        }
    }
}

impl GraphConfig {
    /// Resolve the graph directory against the data directory.
    pub fn resolved_path(&self, storage: &StorageConfig) -> PathBuf {
        let path = PathBuf::from(&self.path);
        if path.is_absolute() {
            path
        } else {
            PathBuf::from(&storage.data_dir).join(path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.engine.max_concurrent, DEFAULT_MAX_CONCURRENT);
        assert_eq!(config.chunk.max_files_ceiling, DEFAULT_CHUNK_MAX_FILES_CEILING);
        assert_eq!(config.storage.data_dir, DEFAULT_DATA_DIR);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_to_toml() {
        let config = Config::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("[engine]"));
        assert!(toml_str.contains("[chunk]"));
        assert!(toml_str.contains("[storage]"));
        assert!(toml_str.contains("[graph]"));
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
[engine]
max_concurrent = 8
default_timeout_ms = 500

[chunk]
max_files_ceiling = 100

[graph]
backend = "memory"
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.engine.max_concurrent, 8);
        assert_eq!(config.engine.default_timeout(), Duration::from_millis(500));
        assert_eq!(config.engine.max_queue, DEFAULT_MAX_QUEUE);
        assert_eq!(config.chunk.max_files_ceiling, 100);
        assert_eq!(config.graph.backend, "memory");
    }

    #[test]
    fn test_rules_from_toml() {
        let toml_str = r#"
[[rules]]
id = "large-notebooks"
priority = 10
target = "notebook"
extension = "ipynb"
config = { max_size_bytes = 52428800 }

[engine]
max_concurrent = 2
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.rules.len(), 1);
        let rule = &config.rules[0];
        assert_eq!(rule.priority, 10);
        assert_eq!(rule.extension.as_deref(), Some("ipynb"));
        assert_eq!(rule.config["max_size_bytes"], 52_428_800);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rule_without_target_rejected() {
        let mut config = Config::default();
        config.rules.push(RuleConfig {
            id: "r".to_string(),
            ..Default::default()
        });
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_chunk_clamp() {
        let chunk = ChunkConfig {
            default_max_files: 50,
            max_files_ceiling: 2000,
            ingest_batch_size: 10,
        };
        assert_eq!(chunk.clamp(None), 50);
        assert_eq!(chunk.clamp(Some(0)), 1);
        assert_eq!(chunk.clamp(Some(7)), 7);
        assert_eq!(chunk.clamp(Some(1_000_000)), 2000);
    }

    #[test]
    fn test_invalid_backend_rejected() {
        let mut config = Config::default();
        config.graph.backend = "neo4j".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_graph_path_resolution() {
        let storage = StorageConfig {
            data_dir: "/tmp/strata".to_string(),
            ..StorageConfig::default()
        };
        let graph = GraphConfig::default();
        assert_eq!(graph.resolved_path(&storage), PathBuf::from("/tmp/strata/graph"));
    }
}
