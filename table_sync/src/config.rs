//! Configuration handling for table_sync

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::{Error, Result};

/// Column used to restrict a comparison to one logical partition of rows
pub const DEFAULT_FILTER_COLUMN: &str = "partitionId";

/// Bound parameters allowed in a single statement by the destination driver
pub const DEFAULT_MAX_PARAMETERS: usize = 2000;

/// Load configuration from a TOML or YAML file
pub fn load_from_file(path: &str) -> Result<Config> {
    let config_str = fs::read_to_string(path)
        .map_err(|e| Error::ConfigError(format!("Failed to read config file: {}", e)))?;

    let is_yaml = Path::new(path)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"))
        .unwrap_or(false);

    let config: Config = if is_yaml {
        serde_yaml::from_str(&config_str)
            .map_err(|e| Error::ConfigError(format!("Failed to parse config file: {}", e)))?
    } else {
        toml::from_str(&config_str)
            .map_err(|e| Error::ConfigError(format!("Failed to parse config file: {}", e)))?
    };

    config.validate()?;
    Ok(config)
}

/// Represents the complete table_sync configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    pub source: DatabaseConfig,
    pub destination: DatabaseConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    pub logging: Option<LoggingConfig>,
}

impl Config {
    /// Reject configurations the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        for (side, db) in [("source", &self.source), ("destination", &self.destination)] {
            if !matches!(db.driver.as_str(), "postgres" | "mysql" | "sqlite") {
                return Err(Error::ConfigError(format!(
                    "Unsupported {} database driver: {}",
                    side, db.driver
                )));
            }
        }

        if self.source.driver != self.destination.driver {
            return Err(Error::ConfigError(format!(
                "Source and destination must use the same driver (got {} and {})",
                self.source.driver, self.destination.driver
            )));
        }

        if self.sync.max_parameters == 0 {
            return Err(Error::ConfigError(
                "sync.max_parameters must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

/// Database connection configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub driver: String,
    pub url: String,
    pub pool_size: Option<u32>,
    pub timeout_seconds: Option<u64>,
    pub schema: Option<String>,
}

/// Row synchronization behavior
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct SyncConfig {
    /// Partition column; the diff is restricted to it when a filter value is supplied
    pub filter_column: String,
    /// Upper bound on bound parameters per generated statement
    pub max_parameters: usize,
    pub apply_updates: bool,
    pub apply_deletes: bool,
    /// Compute changesets without writing to the destination
    pub dry_run: bool,
    /// Only these tables are compared, when set
    pub tables: Option<Vec<String>>,
    pub exclude_tables: Option<Vec<String>>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            filter_column: DEFAULT_FILTER_COLUMN.to_string(),
            max_parameters: DEFAULT_MAX_PARAMETERS,
            apply_updates: false,
            apply_deletes: false,
            dry_run: false,
            tables: None,
            exclude_tables: None,
        }
    }
}

impl SyncConfig {
    /// Whether a table passes the include / exclude lists
    pub fn includes_table(&self, name: &str) -> bool {
        if let Some(tables) = &self.tables {
            if !tables.iter().any(|t| t == name) {
                return false;
            }
        }

        match &self.exclude_tables {
            Some(excluded) => !excluded.iter().any(|t| t == name),
            None => true,
        }
    }
}

/// Logging configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
    pub format: String,
    pub stdout: bool,
}
