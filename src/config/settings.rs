//! Configuration structures for deserialisation.
//!
//! These structures map directly to the JSON configuration file format
//! and convert into the runtime types the bridge consumes.

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;

use crate::bridge::{BridgeConfig, ServerEntry};
use crate::config::ConfigError;

/// Root configuration structure.
///
/// This is the top-level structure that matches the JSON config file.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct Config {
    /// Optional JSON schema reference (ignored during parsing).
    #[serde(rename = "$schema", default)]
    _schema: Option<String>,

    /// Optional comment field (ignored during parsing).
    #[serde(rename = "_comment", default)]
    _comment: Option<String>,

    /// MCP servers to bridge into the local registry.
    #[serde(default)]
    pub servers: Vec<ServerEntryConfig>,

    /// Whether to connect and discover every server at startup.
    #[serde(default = "default_auto_discover")]
    pub auto_discover: bool,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

const fn default_auto_discover() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            _schema: None,
            _comment: None,
            servers: Vec::new(),
            auto_discover: default_auto_discover(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any validation checks fail.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = std::collections::HashSet::new();
        for server in &self.servers {
            server.validate()?;
            if !seen.insert(server.id.as_str()) {
                return Err(ConfigError::ValidationError {
                    message: format!("duplicate server id: {}", server.id),
                });
            }
        }
        Ok(())
    }

    /// Converts the configuration into the bridge's runtime form.
    #[must_use]
    pub fn into_bridge_config(self) -> BridgeConfig {
        BridgeConfig {
            servers: self
                .servers
                .into_iter()
                .map(ServerEntryConfig::into_entry)
                .collect(),
            auto_discover: self.auto_discover,
        }
    }
}

/// Configuration for a single bridged server.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct ServerEntryConfig {
    /// Unique id; becomes the `mcp:<id>:` namespace segment.
    pub id: String,

    /// Command path of the server executable.
    pub command: String,

    /// Arguments passed verbatim.
    #[serde(default)]
    pub args: Vec<String>,

    /// Replacement environment for the child process. When present it
    /// replaces the parent environment entirely.
    #[serde(default)]
    pub env: Option<HashMap<String, String>>,

    /// Per-call timeout in seconds.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl ServerEntryConfig {
    /// Validates this entry.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.id.is_empty() {
            return Err(ConfigError::ValidationError {
                message: "server id cannot be empty".to_string(),
            });
        }
        if self.id.contains(':') {
            return Err(ConfigError::ValidationError {
                message: format!("server id `{}` must not contain ':'", self.id),
            });
        }
        if self.command.is_empty() {
            return Err(ConfigError::ValidationError {
                message: format!("server `{}` has an empty command", self.id),
            });
        }
        Ok(())
    }

    fn into_entry(self) -> ServerEntry {
        ServerEntry {
            id: self.id,
            command: self.command,
            args: self.args,
            env: self.env,
            timeout: self.timeout_secs.map(Duration::from_secs),
        }
    }
}

/// Logging settings.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, or error.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "warn".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Config {
        serde_json::from_str(json).expect("valid config JSON")
    }

    #[test]
    fn minimal_config_parses_with_defaults() {
        let config = parse("{}");
        assert!(config.servers.is_empty());
        assert!(config.auto_discover);
        assert_eq!(config.logging.level, "warn");
        config.validate().unwrap();
    }

    #[test]
    fn full_config_parses() {
        let config = parse(
            r#"{
                "servers": [
                    {"id": "k8s", "command": "kubectl-mcp", "args": ["--context", "prod"], "timeoutSecs": 60},
                    {"id": "db", "command": "db-mcp", "env": {"PATH": "/usr/bin"}}
                ],
                "autoDiscover": false,
                "logging": {"level": "debug"}
            }"#,
        );
        config.validate().unwrap();

        let bridge = config.into_bridge_config();
        assert!(!bridge.auto_discover);
        assert_eq!(bridge.servers.len(), 2);
        assert_eq!(bridge.servers[0].timeout, Some(Duration::from_secs(60)));
        assert_eq!(
            bridge.servers[1].env.as_ref().unwrap().get("PATH").unwrap(),
            "/usr/bin"
        );
    }

    #[test]
    fn duplicate_server_ids_fail_validation() {
        let config = parse(
            r#"{"servers": [
                {"id": "a", "command": "x"},
                {"id": "a", "command": "y"}
            ]}"#,
        );
        assert!(config.validate().is_err());
    }

    #[test]
    fn server_id_with_colon_fails_validation() {
        let config = parse(r#"{"servers": [{"id": "a:b", "command": "x"}]}"#);
        assert!(config.validate().is_err());
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(serde_json::from_str::<Config>(r#"{"unknown": true}"#).is_err());
    }
}
