//! Configuration loading and resolution
//!
//! Bootstrap configuration lives in a single TOML file. The file path is
//! resolved in priority order:
//! 1. Command-line argument (highest priority)
//! 2. `SEMLINK_CONFIG` environment variable
//! 3. `<user config dir>/semlink/config.toml`, if it exists
//! 4. Built-in defaults (no file)

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Environment variable naming the configuration file
pub const CONFIG_ENV_VAR: &str = "SEMLINK_CONFIG";

/// Bootstrap configuration loaded from TOML
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TomlConfig {
    /// Directory holding the per-language payload caches
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    /// Directory holding `<model>.json` classifier files
    #[serde(default = "default_model_dir")]
    pub model_dir: PathBuf,

    /// Languages the fetch stages serve
    #[serde(default = "default_langcodes")]
    pub langcodes: Vec<String>,

    /// Worker count per fetch stage per pass
    #[serde(default = "default_threads")]
    pub threads: usize,

    #[serde(default)]
    pub entity_service: EntityServiceConfig,

    #[serde(default)]
    pub statistics: StatisticsConfig,

    #[serde(default)]
    pub http: HttpConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Entity-data service endpoint
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EntityServiceConfig {
    #[serde(default = "default_entity_url")]
    pub url: String,

    /// Source name sent to the service per language (e.g. `en` → `enwiki`).
    /// Languages without an entry send the language code itself.
    #[serde(default)]
    pub source_names: BTreeMap<String, String>,
}

impl Default for EntityServiceConfig {
    fn default() -> Self {
        Self {
            url: default_entity_url(),
            source_names: BTreeMap::new(),
        }
    }
}

/// Page-view statistics service endpoint
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StatisticsConfig {
    /// Base URL; requests go to `<base_url>/<lang>/<YYYYMM>/<title>`
    #[serde(default = "default_statistics_url")]
    pub base_url: String,
}

impl Default for StatisticsConfig {
    fn default() -> Self {
        Self {
            base_url: default_statistics_url(),
        }
    }
}

/// HTTP client timeouts
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HttpConfig {
    /// Per-request wall-clock timeout
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Shorter timeout for the first statistics attempt
    #[serde(default = "default_first_attempt_timeout_ms")]
    pub stats_first_attempt_timeout_ms: u64,
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn stats_first_attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.stats_first_attempt_timeout_ms)
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            stats_first_attempt_timeout_ms: default_first_attempt_timeout_ms(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            model_dir: default_model_dir(),
            langcodes: default_langcodes(),
            threads: default_threads(),
            entity_service: EntityServiceConfig::default(),
            statistics: StatisticsConfig::default(),
            http: HttpConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl TomlConfig {
    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.threads == 0 {
            return Err(Error::Config("threads must be at least 1".to_string()));
        }
        if self.langcodes.is_empty() {
            return Err(Error::Config("langcodes must not be empty".to_string()));
        }
        if self.http.timeout_ms == 0 {
            return Err(Error::Config("http.timeout_ms must be positive".to_string()));
        }
        Ok(())
    }
}

fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .map(|d| d.join("semlink"))
        .unwrap_or_else(|| PathBuf::from("./semlink_cache"))
}

fn default_model_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("semlink").join("models"))
        .unwrap_or_else(|| PathBuf::from("./models"))
}

fn default_langcodes() -> Vec<String> {
    vec!["en".to_string()]
}

fn default_threads() -> usize {
    8
}

fn default_entity_url() -> String {
    "http://localhost:8080/wikipediaminer/services/exploreArticle".to_string()
}

fn default_statistics_url() -> String {
    "http://stats.grok.se/json".to_string()
}

fn default_timeout_ms() -> u64 {
    15_000
}

fn default_first_attempt_timeout_ms() -> u64 {
    1_000
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Resolve which configuration file to read, if any
pub fn resolve_config_path(cli_arg: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    dirs::config_dir()
        .map(|d| d.join("semlink").join("config.toml"))
        .filter(|p| p.exists())
}

/// Load configuration from `path`, or built-in defaults when `None`
pub fn load_config(path: Option<&Path>) -> Result<TomlConfig> {
    let config = match path {
        Some(path) => {
            let content = std::fs::read_to_string(path).map_err(|e| {
                Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
            })?;
            let config: TomlConfig = toml::from_str(&content)
                .map_err(|e| Error::Config(format!("Failed to parse TOML: {}", e)))?;
            info!("Loaded TOML configuration from {}", path.display());
            config
        }
        None => TomlConfig::default(),
    };

    config.validate()?;
    Ok(config)
}

/// Write configuration atomically (temp file + rename)
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Failed to serialize TOML: {}", e)))?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let tmp_path = path.with_extension("toml.tmp");
    std::fs::write(&tmp_path, content)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}
