use common::config::{PoolConfig, StorageConfig};
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::error::FileStorageError;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub database: PoolConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let s = Config::builder()
            // Load from config/file_storage.toml
            .add_source(File::with_name("config/file_storage").required(false))
            // Override from environment (e.g., FILE_STORAGE__DATABASE__URL)
            .add_source(Environment::with_prefix("FILE_STORAGE").separator("__"))
            .build()?;

        s.try_deserialize()
    }

    pub fn validate(&self) -> Result<(), FileStorageError> {
        validate_pool_config(&self.database)?;
        validate_storage_config(&self.storage)
    }
}

pub fn validate_pool_config(config: &PoolConfig) -> Result<(), FileStorageError> {
    if config.url.trim().is_empty() {
        return Err(invalid("database.url must not be empty"));
    }
    if config.max_connections == 0 {
        return Err(invalid("database.max_connections must be at least 1"));
    }
    if config.min_connections > config.max_connections {
        return Err(invalid(
            "database.min_connections must not exceed database.max_connections",
        ));
    }
    if !(config.semaphore_fraction > 0.0 && config.semaphore_fraction <= 1.0) {
        return Err(invalid("database.semaphore_fraction must be in (0, 1]"));
    }
    Ok(())
}

pub fn validate_storage_config(config: &StorageConfig) -> Result<(), FileStorageError> {
    validate_identifier("storage.project_name", &config.project_name)?;
    validate_identifier("storage.table_name", &config.table_name)?;
    if config.chunk_size == 0 || config.chunk_size > i32::MAX as usize {
        return Err(invalid("storage.chunk_size must be between 1 and 2^31-1"));
    }
    Ok(())
}

/// Names are spliced into DDL and queries, so only plain identifiers pass.
fn validate_identifier(field: &str, value: &str) -> Result<(), FileStorageError> {
    let mut chars = value.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    let valid_rest = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');

    if valid_start && valid_rest && value.len() <= 63 {
        Ok(())
    } else {
        Err(invalid(&format!(
            "{field} must be a plain SQL identifier, got {value:?}"
        )))
    }
}

fn invalid(message: &str) -> FileStorageError {
    FileStorageError::Configuration(message.to_string())
}
