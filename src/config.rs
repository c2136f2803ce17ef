//! Configuration loading from TOML with environment overrides.
//!
//! Every section has defaults, so an empty file (or no file at all) yields a
//! working configuration that keeps its database under `data/`.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::ledger::posting::PostingPolicy;

/// Environment variable naming a TOML file to load.
pub const CONFIG_PATH_ENV: &str = "LEDGER_CONFIG";
/// Environment variable overriding `database.path`.
pub const DATABASE_PATH_ENV: &str = "LEDGER_DATABASE_PATH";
/// Environment variable overriding `logging.filter`.
pub const LOG_FILTER_ENV: &str = "LEDGER_LOG";

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub database: DatabaseSettings,
    pub posting: PostingPolicy,
    pub logging: LoggingSettings,
}

/// SQLite file location and connection tunables.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    /// Path to the database file; parent directories are created on open.
    pub path: PathBuf,

    /// Busy timeout for SQLite connections, in milliseconds.
    pub busy_timeout_ms: u64,

    /// Maximum number of pooled SQLite connections.
    pub pool_max_size: u32,

    /// How long to wait for a pooled connection before giving up, in milliseconds.
    pub connection_timeout_ms: u64,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data").join("database.sqlite"),
            busy_timeout_ms: 5_000,
            pool_max_size: 8,
            connection_timeout_ms: 10_000,
        }
    }
}

/// Log filter and output format.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// `EnvFilter` directive, used when `RUST_LOG` is not set.
    pub filter: String,

    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            json: false,
        }
    }
}

impl LedgerConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Parse configuration from TOML text.
    pub fn from_toml_str(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    /// Build configuration from the process environment.
    ///
    /// Loads `.env` if present, then the file named by `LEDGER_CONFIG` (if
    /// set), then applies `LEDGER_DATABASE_PATH` and `LEDGER_LOG`.
    pub fn from_env() -> Result<Self, ConfigError> {
        if let Err(e) = dotenv::dotenv() {
            tracing::debug!("no .env loaded: {e}");
        }

        let mut config = match std::env::var_os(CONFIG_PATH_ENV) {
            Some(path) => Self::load(PathBuf::from(path))?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Apply overrides from a key lookup (the environment in production).
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup(DATABASE_PATH_ENV).filter(|v| !v.trim().is_empty()) {
            self.database.path = PathBuf::from(path);
        }
        if let Some(filter) = lookup(LOG_FILTER_ENV).filter(|v| !v.trim().is_empty()) {
            self.logging.filter = filter;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::money::Amount;
    use std::collections::HashMap;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = LedgerConfig::from_toml_str("").unwrap();
        assert_eq!(config, LedgerConfig::default());
        assert_eq!(config.database.path, PathBuf::from("data/database.sqlite"));
        assert_eq!(config.posting.future_grace_days, 1);
    }

    #[test]
    fn test_partial_sections() {
        let config = LedgerConfig::from_toml_str(
            r#"
            [database]
            path = "/var/lib/ledger/books.sqlite"
            pool_max_size = 2

            [posting]
            max_abs_amount = 500000
            future_grace_days = 0

            [logging]
            json = true
            "#,
        )
        .unwrap();

        assert_eq!(config.database.pool_max_size, 2);
        assert_eq!(config.database.busy_timeout_ms, 5_000);
        assert_eq!(config.posting.max_abs_amount, Amount::from_minor(500000));
        assert_eq!(config.posting.future_grace_days, 0);
        assert_eq!(config.posting.closed_edit_grace_days, 30);
        assert!(config.logging.json);
        assert_eq!(config.logging.filter, "info");
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            (DATABASE_PATH_ENV, "/tmp/ledger.sqlite"),
            (LOG_FILTER_ENV, "ledger_core=debug"),
        ]
        .into_iter()
        .collect();

        let mut config = LedgerConfig::default();
        config.apply_overrides(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.database.path, PathBuf::from("/tmp/ledger.sqlite"));
        assert_eq!(config.logging.filter, "ledger_core=debug");
    }

    #[test]
    fn test_load_reports_missing_file() {
        let err = LedgerConfig::load("/nonexistent/ledger.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
