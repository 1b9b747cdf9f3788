//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub index: IndexConfig,

    #[serde(default)]
    pub search: SearchConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Index table backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Persistent SQLite table under `data_dir`
    Sqlite,
    /// Process-local table, lost on exit
    Memory,
}

impl std::str::FromStr for Backend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sqlite" => Ok(Backend::Sqlite),
            "memory" => Ok(Backend::Memory),
            other => Err(ConfigError::Invalid(format!("unknown backend '{}'", other))),
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    #[serde(default = "default_backend")]
    pub backend: Backend,
}

fn default_data_dir() -> String {
    dirs::data_local_dir()
        .map(|p| p.join("tagsieve").to_string_lossy().to_string())
        .unwrap_or_else(|| "./tagsieve_data".to_string())
}

fn default_backend() -> Backend {
    Backend::Sqlite
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            backend: default_backend(),
        }
    }
}

/// Index layout configuration
#[derive(Debug, Clone, Deserialize)]
pub struct IndexConfig {
    #[serde(default = "default_bucket_width")]
    pub bucket_width_ms: u64,

    #[serde(default = "default_recent_series_capacity")]
    pub recent_series_capacity: usize,
}

fn default_bucket_width() -> u64 {
    86_400_000 // 1 day
}

fn default_recent_series_capacity() -> usize {
    crate::index::DEFAULT_RECENT_SERIES_CAPACITY
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            bucket_width_ms: default_bucket_width(),
            recent_series_capacity: default_recent_series_capacity(),
        }
    }
}

/// Search limits
#[derive(Debug, Clone, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_deadline_ms")]
    pub deadline_ms: u64,

    #[serde(default = "default_max_series")]
    pub max_series: usize,

    #[serde(default = "default_scan_limit_multiplier")]
    pub scan_limit_multiplier: usize,

    #[serde(default = "default_check_interval")]
    pub deadline_check_interval: u32,
}

fn default_deadline_ms() -> u64 {
    30_000 // 30 seconds
}

fn default_max_series() -> usize {
    100_000
}

fn default_scan_limit_multiplier() -> usize {
    100
}

fn default_check_interval() -> u32 {
    crate::index::DEFAULT_CHECK_INTERVAL
}

impl SearchConfig {
    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }

    /// Per-filter scan limit derived from `max_series`
    pub fn scan_limit(&self) -> usize {
        self.max_series.saturating_mul(self.scan_limit_multiplier)
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            deadline_ms: default_deadline_ms(),
            max_series: default_max_series(),
            scan_limit_multiplier: default_scan_limit_multiplier(),
            deadline_check_interval: default_check_interval(),
        }
    }
}

/// Cost cache configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cost_cache_capacity")]
    pub cost_cache_capacity: usize,
}

fn default_cost_cache_capacity() -> usize {
    crate::index::DEFAULT_COST_CACHE_CAPACITY
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cost_cache_capacity: default_cost_cache_capacity(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,

    pub file: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            file: None,
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Self::parse(&content).map_err(|e| match e {
            ConfigError::Parse { error, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                error,
            },
            other => other,
        })
    }

    /// Parse and validate configuration from TOML text
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: PathBuf::new(),
            error: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        // Try default config locations
        let config_paths = [
            dirs::config_dir().map(|p| p.join("tagsieve").join("config.toml")),
            Some(PathBuf::from("/etc/tagsieve/config.toml")),
            Some(PathBuf::from("./config.toml")),
        ];

        for path_opt in config_paths.iter().flatten() {
            if path_opt.exists() {
                match Self::load_with_env(path_opt) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path_opt);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path_opt, e);
                    }
                }
            }
        }

        // Fall back to environment-only config
        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.index.bucket_width_ms == 0 {
            return Err(ConfigError::Invalid(
                "index.bucket_width_ms must be positive".to_string(),
            ));
        }
        if self.search.max_series == 0 {
            return Err(ConfigError::Invalid(
                "search.max_series must be positive".to_string(),
            ));
        }
        if self.search.scan_limit_multiplier == 0 {
            return Err(ConfigError::Invalid(
                "search.scan_limit_multiplier must be positive".to_string(),
            ));
        }
        if !matches!(self.logging.format.as_str(), "pretty" | "json") {
            return Err(ConfigError::Invalid(format!(
                "logging.format must be 'pretty' or 'json', got '{}'",
                self.logging.format
            )));
        }
        Ok(())
    }

    /// Apply environment variable overrides to an existing config
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from `lookup`; unparsable numbers are ignored
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        // Storage overrides
        if let Some(data_dir) = lookup("TAGSIEVE_DATA_DIR") {
            self.storage.data_dir = data_dir;
        }
        if let Some(backend) = lookup("TAGSIEVE_BACKEND") {
            match backend.parse() {
                Ok(b) => self.storage.backend = b,
                Err(e) => tracing::warn!("Ignoring TAGSIEVE_BACKEND: {}", e),
            }
        }

        // Search overrides
        if let Some(deadline) = lookup("TAGSIEVE_SEARCH_DEADLINE_MS") {
            if let Ok(ms) = deadline.parse() {
                self.search.deadline_ms = ms;
            }
        }
        if let Some(max_series) = lookup("TAGSIEVE_MAX_SERIES") {
            if let Ok(n) = max_series.parse() {
                self.search.max_series = n;
            }
        }

        // Logging overrides
        if let Some(level) = lookup("TAGSIEVE_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = lookup("TAGSIEVE_LOG_FORMAT") {
            self.logging.format = format;
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# Tagsieve Configuration
#
# Environment variables override these settings:
# - TAGSIEVE_DATA_DIR
# - TAGSIEVE_BACKEND
# - TAGSIEVE_SEARCH_DEADLINE_MS
# - TAGSIEVE_MAX_SERIES
# - TAGSIEVE_LOG_LEVEL
# - TAGSIEVE_LOG_FORMAT

[storage]
# Directory holding the index database
data_dir = "~/.local/share/tagsieve"

# Index table backend: sqlite (persistent) or memory
backend = "sqlite"

[index]
# Width of the date buckets postings are grouped by (ms)
bucket_width_ms = 86400000

# How many recently indexed (tenant, bucket, series) triples to remember
recent_series_capacity = 65536

[search]
# Per-search deadline (ms)
deadline_ms = 30000

# Maximum number of series a search returns
max_series = 100000

# Per-filter scan limit is max_series * scan_limit_multiplier
scan_limit_multiplier = 100

# Iterations between deadline checks (rounded up to a power of two)
deadline_check_interval = 1024

[cache]
# Entries kept in the filter cost cache
cost_cache_capacity = 100000

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"

# Optional log file path
# file = "/var/log/tagsieve/tagsieve.log"
"#
    .to_string()
}
