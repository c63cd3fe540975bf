//! Configuration management for citydb operations
//!
//! Supports:
//! - Hardcoded defaults
//! - An optional configuration file (any format supported by `config`)
//! - Environment variable overrides (`CITYDB__IMPORT__MODE=skip_existing`)
//! - Validation of the merged result

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct CitydbConfig {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub import: ImportConfig,

    #[serde(default)]
    pub export: ExportConfig,

    #[serde(default)]
    pub delete: DeleteConfig,

    #[serde(default)]
    pub query: QueryConfig,
}

impl CitydbConfig {
    /// Load configuration with precedence:
    /// 1. Environment variables (highest priority)
    /// 2. File named by the CITYDB_CONFIG env var
    /// 3. Hardcoded defaults (lowest priority)
    pub fn load() -> Result<Self, ConfigError> {
        let mut builder = Self::set_defaults(Config::builder())?;

        if let Ok(config_path) = std::env::var("CITYDB_CONFIG") {
            builder = builder.add_source(File::with_name(&config_path).required(false));
        }

        // Example: CITYDB__DATABASE__MAX_BATCH_SIZE=500
        builder = builder.add_source(
            Environment::with_prefix("CITYDB")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: CitydbConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn set_defaults(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
        builder
            .set_default("database.url", "sqlite://citydb.sqlite")?
            .set_default("database.max_connections", 8)?
            .set_default("database.max_batch_size", 1000)?
            .set_default("import.mode", "import_all")?
            .set_default("import.retry.max_attempts", 1)?
            .set_default("import.retry.initial_backoff_ms", 100)?
            .set_default("import.retry.max_backoff_ms", 5000)?
            .set_default("import.retry.backoff_multiplier", 2.0)?
            .set_default("export.max_hierarchy_depth", 64)?
            .set_default("delete.mode", "delete")?
            .set_default("delete.retry.max_attempts", 1)?
            .set_default("delete.retry.initial_backoff_ms", 100)?
            .set_default("delete.retry.max_backoff_ms", 5000)?
            .set_default("delete.retry.backoff_multiplier", 2.0)?
            .set_default("query.max_filter_depth", 32)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database.max_batch_size == 0 {
            return Err(ConfigError::Message(
                "database.max_batch_size must be > 0".to_string(),
            ));
        }

        if self.database.max_connections == 0 {
            return Err(ConfigError::Message(
                "database.max_connections must be > 0".to_string(),
            ));
        }

        if self.import.retry.max_attempts == 0 || self.delete.retry.max_attempts == 0 {
            return Err(ConfigError::Message(
                "retry.max_attempts must be > 0 (1 disables retries)".to_string(),
            ));
        }

        if self.query.max_filter_depth == 0 {
            return Err(ConfigError::Message(
                "query.max_filter_depth must be > 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Load configuration from a specific file path
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config: CitydbConfig = Self::set_defaults(Config::builder())?
            .add_source(File::from(path.as_ref()))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }
}

/// Database connection settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    pub url: String,

    pub max_connections: u32,

    /// Maximum number of rows or ids submitted in one batch
    pub max_batch_size: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://citydb.sqlite".to_string(),
            max_connections: 8,
            max_batch_size: 1000,
        }
    }
}

/// How the importer treats features whose object id already exists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportMode {
    #[default]
    ImportAll,
    SkipExisting,
}

/// Import settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct ImportConfig {
    /// Lineage template; `@file@`, `@date@` and `@session@` are substituted
    #[serde(default)]
    pub lineage: Option<String>,

    #[serde(default)]
    pub mode: ImportMode,

    #[serde(default)]
    pub retry: RetryConfig,
}

/// Export settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExportConfig {
    /// Hard bound on child feature recursion, applied on top of any LOD
    /// filter search depth
    pub max_hierarchy_depth: u32,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            max_hierarchy_depth: 64,
        }
    }
}

/// Whether deleted features are removed or only terminated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteMode {
    #[default]
    Delete,
    Terminate,
}

/// Delete settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct DeleteConfig {
    #[serde(default)]
    pub mode: DeleteMode,

    #[serde(default)]
    pub retry: RetryConfig,
}

/// Retry configuration for batch flushes
///
/// `max_attempts` counts the first attempt, so the default of 1 never retries.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    /// Maximum number of attempts per batch
    pub max_attempts: u32,

    /// Initial backoff delay in milliseconds
    pub initial_backoff_ms: u64,

    /// Maximum backoff delay in milliseconds
    pub max_backoff_ms: u64,

    /// Backoff multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff_ms: 100,
            max_backoff_ms: 5000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Retry up to `max_attempts` times with the default backoff
    #[must_use]
    pub fn attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    /// Calculate backoff delay for a given retry attempt
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let delay_ms = (self.initial_backoff_ms as f64
            * self.backoff_multiplier.powi(attempt as i32))
        .min(self.max_backoff_ms as f64);
        Duration::from_millis(delay_ms as u64)
    }
}

/// Query compilation limits
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueryConfig {
    /// Maximum filter nesting depth
    pub max_filter_depth: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            max_filter_depth: 32,
        }
    }
}
