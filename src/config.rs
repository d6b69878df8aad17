//! Database configuration.
//!
//! Configuration is an explicitly passed object, resolved once when a
//! model is constructed and threaded through session acquisition. There
//! is no hidden global registry; the only process-wide state is the
//! per-database session reuse in [`crate::connection`].

use std::fmt;

use serde::{Deserialize, Serialize};

fn default_port() -> u16 {
    3306
}

/// Connection settings for one target database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbConfig {
    /// Server hostname or IP.
    pub host: String,
    /// Server port, defaults to 3306.
    #[serde(default = "default_port")]
    pub port: u16,
    /// User name.
    pub user: String,
    /// Password.
    pub password: String,
    /// Database (schema) name. Also the session-reuse identity: models
    /// built against the same database share one live session.
    pub database: String,
    /// Optional character set applied on connect (`SET NAMES ...`).
    #[serde(default)]
    pub charset: Option<String>,
}

/// Configuration loading error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The file could not be read or deserialized.
    Load(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Load(msg) => write!(f, "Failed to load DB configuration: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl DbConfig {
    /// Load configuration from a file.
    ///
    /// The extension selects the format (`.toml`, `.yaml`, `.json`, ...),
    /// as supported by the `config` crate. Missing required fields are a
    /// [`ConfigError::Load`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the file is missing, unreadable, or
    /// does not deserialize into a [`DbConfig`].
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .build()
            .map_err(|e| ConfigError::Load(e.to_string()))?;

        settings
            .try_deserialize()
            .map_err(|e| ConfigError::Load(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_toml(toml: &str) -> Result<DbConfig, ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()
            .map_err(|e| ConfigError::Load(e.to_string()))?;
        settings
            .try_deserialize()
            .map_err(|e| ConfigError::Load(e.to_string()))
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let config = from_toml(
            r#"
            host = "localhost"
            user = "app"
            password = "secret"
            database = "blog"
            "#,
        )
        .unwrap();
        assert_eq!(config.port, 3306);
        assert_eq!(config.charset, None);
        assert_eq!(config.database, "blog");
    }

    #[test]
    fn test_deserialize_full() {
        let config = from_toml(
            r#"
            host = "db.internal"
            port = 3307
            user = "app"
            password = "secret"
            database = "blog"
            charset = "utf8mb4"
            "#,
        )
        .unwrap();
        assert_eq!(config.port, 3307);
        assert_eq!(config.charset.as_deref(), Some("utf8mb4"));
    }

    #[test]
    fn test_missing_field_is_an_error() {
        let result = from_toml(r#"host = "localhost""#);
        assert!(result.is_err());
    }

    #[test]
    fn test_from_file_missing_path() {
        assert!(DbConfig::from_file("/nonexistent/db-config").is_err());
    }
}
