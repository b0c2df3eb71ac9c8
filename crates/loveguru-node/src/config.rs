//! Node configuration.
//!
//! Sources are layered in this order, later ones winning:
//!
//! 1. Built-in defaults
//! 2. Optional YAML file passed with `--config`
//! 3. `LOVEGURU__*` environment variables, `__` separating nested keys
//!    (e.g. `LOVEGURU__HUB__SHARD_COUNT=8`)
//! 4. Command-line overrides applied by the binary

use crate::observability::LogFormat;
use config::{Environment, File, FileFormat};
use loveguru_realtime::{HubConfig, RealtimeError};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "LOVEGURU";

/// Configuration loading errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error("invalid hub configuration: {0}")]
    Hub(#[from] RealtimeError),
}

/// Configuration for the chat node.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NodeConfig {
    /// HTTP listen address.
    pub api_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
    /// Log output format.
    pub log_format: LogFormat,
    /// Hub tunables.
    pub hub: HubConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            api_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            hub: HubConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Load configuration from an optional YAML file and the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(File::from(path).format(FileFormat::Yaml).required(true));
        }

        let built = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("hub.allowed_origins"),
            )
            .build()?;

        let config: NodeConfig = built.try_deserialize()?;
        config.hub.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_without_sources() {
        let config = NodeConfig::load(None).unwrap();
        assert_eq!(config.api_addr, SocketAddr::from(([127, 0, 0, 1], 8080)));
        assert_eq!(config.hub.outbound_capacity, 256);
        assert!(config.hub.allowed_origins.is_empty());
    }

    #[test]
    fn test_yaml_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "api_addr: \"0.0.0.0:9000\"\nlog_format: json\nhub:\n  shard_count: 2\n  allowed_origins:\n    - https://app.loveguru.example"
        )
        .unwrap();

        let config = NodeConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.api_addr.port(), 9000);
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.hub.shard_count, 2);
        assert_eq!(
            config.hub.allowed_origins,
            vec!["https://app.loveguru.example".to_string()]
        );
        // Untouched keys keep their defaults.
        assert_eq!(config.hub.write_timeout_secs, 10);
    }

    #[test]
    fn test_round_trips_through_yaml() {
        let original = NodeConfig::default();
        let yaml = serde_yaml::to_string(&original).unwrap();

        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        file.write_all(yaml.as_bytes()).unwrap();

        let loaded = NodeConfig::load(Some(file.path())).unwrap();
        assert_eq!(loaded.api_addr, original.api_addr);
        assert_eq!(loaded.hub.sweep_interval_secs, original.hub.sweep_interval_secs);
    }

    #[test]
    fn test_environment_overrides() {
        std::env::set_var("LOVEGURU__HUB__HISTORY_LIMIT", "7");
        let config = NodeConfig::load(None).unwrap();
        std::env::remove_var("LOVEGURU__HUB__HISTORY_LIMIT");

        assert_eq!(config.hub.history_limit, 7);
    }

    #[test]
    fn test_invalid_hub_config_rejected() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "hub:\n  shard_count: 0").unwrap();

        let result = NodeConfig::load(Some(file.path()));
        assert!(matches!(result, Err(ConfigError::Hub(_))));
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let result = NodeConfig::load(Some(Path::new("/nonexistent/loveguru.yaml")));
        assert!(matches!(result, Err(ConfigError::Load(_))));
    }
}
