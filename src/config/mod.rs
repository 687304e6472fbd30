//! Application configuration.
//!
//! Aggregates configuration from all modules into a single Config struct
//! that can be loaded from YAML files or environment variables.

mod messaging;
mod relay;
mod server;
mod storage;

pub use messaging::{ChannelConfig, KafkaConfig, MessagingConfig, MessagingType};
pub use relay::{LifecycleConfig, RelayConfig};
pub use server::ServerConfig;
pub use storage::{PostgresConfig, SqliteConfig, StorageConfig, StorageType};

use serde::Deserialize;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "STREAMRELAY_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "STREAMRELAY";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "STREAMRELAY_LOG";
/// Environment variable selecting the log output format (`json` or text).
pub const LOG_FORMAT_ENV_VAR: &str = "STREAMRELAY_LOG_FORMAT";

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load config: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP server configuration.
    pub server: ServerConfig,
    /// Durable store configuration.
    pub storage: StorageConfig,
    /// Stream broker configuration.
    pub messaging: MessagingConfig,
    /// Consumer/producer tuning.
    pub relay: RelayConfig,
    /// Startup/shutdown configuration.
    pub lifecycle: LifecycleConfig,
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `config.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `CONFIG_ENV_VAR` environment variable (if set)
    /// 4. Environment variables with `CONFIG_ENV_PREFIX` prefix
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the relay cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let kafka = &self.messaging.kafka;
        if kafka.topic.trim().is_empty() {
            return Err(ConfigError::Invalid("messaging.kafka.topic must not be empty".into()));
        }
        if self.messaging.messaging_type == MessagingType::Kafka {
            if kafka.group_id.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "messaging.kafka.group_id must not be empty".into(),
                ));
            }
            if kafka.bootstrap_servers.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "messaging.kafka.bootstrap_servers must not be empty".into(),
                ));
            }
        }
        if !matches!(kafka.auto_offset_reset.as_str(), "earliest" | "latest") {
            return Err(ConfigError::Invalid(format!(
                "messaging.kafka.auto_offset_reset must be 'earliest' or 'latest', got '{}'",
                kafka.auto_offset_reset
            )));
        }
        if self.relay.poll_timeout_ms == 0 {
            return Err(ConfigError::Invalid("relay.poll_timeout_ms must be positive".into()));
        }
        if self.relay.subscriber_buffer == 0 {
            return Err(ConfigError::Invalid("relay.subscriber_buffer must be positive".into()));
        }
        if self.lifecycle.grace_period_secs == 0 {
            return Err(ConfigError::Invalid(
                "lifecycle.grace_period_secs must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Create config for testing.
    pub fn for_test() -> Self {
        Self::default()
    }
}
