//! Configuration file loading and parsing.
//!
//! This module handles loading the configuration file from disk and
//! parsing it into validated, type-safe structures.
//!
//! # Configuration File Locations
//!
//! The configuration file is searched in the following order:
//!
//! 1. Path specified via `--config` CLI flag
//! 2. Default location:
//!    - **Linux/macOS:** `~/.opshub-mcp/config.json`
//!    - **Windows:** `%USERPROFILE%\.opshub-mcp\config.json`
//!
//! A missing file at the *default* location is not an error: the server
//! then starts with an empty bridge and only its built-in tools. A
//! missing file passed explicitly via `--config` is.

mod settings;

pub use settings::{Config, LoggingConfig, ServerEntryConfig};

use std::path::{Path, PathBuf};

/// Errors that can occur during configuration operations.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Configuration file could not be read.
    #[error("failed to read configuration file: {path}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Configuration file could not be parsed.
    #[error("failed to parse configuration file: {path}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// Configuration file not found.
    #[error("configuration file not found: {path}")]
    NotFound {
        /// Path where the configuration file was expected.
        path: PathBuf,
    },

    /// Configuration validation failed.
    #[error("configuration validation failed: {message}")]
    ValidationError {
        /// Description of the validation failure.
        message: String,
    },
}

/// Returns the default configuration directory.
///
/// - **Linux/macOS:** `~/.opshub-mcp/`
/// - **Windows:** `%USERPROFILE%\.opshub-mcp\`
#[must_use]
pub fn default_config_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|p| p.join(".opshub-mcp"))
}

/// Returns the platform-specific default configuration file path.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    default_config_dir().map(|p| p.join("config.json"))
}

/// Loads and parses the configuration file.
///
/// If `path` is `None`, uses the platform-specific default location;
/// a missing file there yields the default (empty) configuration.
///
/// # Errors
///
/// Returns an error if:
/// - An explicitly given file cannot be found or read
/// - The JSON is malformed
/// - Validation fails
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let (config_path, explicit) = match path {
        Some(p) => (p.to_path_buf(), true),
        None => match default_config_path() {
            Some(p) => (p, false),
            None => return Ok(Config::default()),
        },
    };

    if !config_path.exists() {
        if explicit {
            return Err(ConfigError::NotFound { path: config_path });
        }
        return Ok(Config::default());
    }

    let contents = std::fs::read_to_string(&config_path).map_err(|source| {
        ConfigError::ReadError {
            path: config_path.clone(),
            source,
        }
    })?;

    let config: Config =
        serde_json::from_str(&contents).map_err(|source| ConfigError::ParseError {
            path: config_path.clone(),
            source,
        })?;

    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn explicit_missing_path_is_an_error() {
        let result = load_config(Some(Path::new("/nonexistent/opshub/config.json")));
        assert!(matches!(result, Err(ConfigError::NotFound { .. })));
    }

    #[test]
    fn explicit_path_is_loaded_and_validated() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"{{"servers": [{{"id": "s1", "command": "probe-mcp"}}]}}"#
        )
        .unwrap();

        let config = load_config(Some(file.path())).unwrap();
        assert_eq!(config.servers.len(), 1);
        assert_eq!(config.servers[0].id, "s1");
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{{ not json").unwrap();

        let result = load_config(Some(file.path()));
        assert!(matches!(result, Err(ConfigError::ParseError { .. })));
    }

    #[test]
    fn invalid_config_fails_validation() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"servers": [{{"id": "", "command": "x"}}]}}"#).unwrap();

        let result = load_config(Some(file.path()));
        assert!(matches!(result, Err(ConfigError::ValidationError { .. })));
    }
}
