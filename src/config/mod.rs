//! Application configuration.
//!
//! Aggregates broker, role and retention settings into a single Config
//! struct that can be loaded from YAML files or environment variables.

mod broker;

use serde::Deserialize;

pub use broker::{validate_endpoint, BrokerConfig, DEFAULT_BROKER_HOST, DEFAULT_BROKER_PORT};

use crate::store::{DEFAULT_RETENTION_DAYS, MAX_RETENTION_DAYS};

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "CRASHWATCH_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "CRASHWATCH";

/// Errors raised while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid broker host '{0}'")]
    InvalidHost(String),

    #[error("Invalid broker port {0}")]
    InvalidPort(u16),

    #[error("Retention of {0} days exceeds the maximum of {max}", max = MAX_RETENTION_DAYS)]
    InvalidRetention(u32),

    #[error("Failed to load config: {0}")]
    Load(#[from] ::config::ConfigError),
}

/// Role this instance plays.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Publishes simulated crash alerts.
    #[default]
    Publisher,
    /// Receives alerts and acknowledges them.
    #[serde(alias = "responder")]
    Subscriber,
}

/// Which broker transport the binary uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// External MQTT broker.
    #[default]
    Mqtt,
    /// In-process broker, for standalone runs.
    Channel,
}

/// Retention settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Incidents older than this many days are deleted by the daily sweep.
    pub days: u32,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            days: DEFAULT_RETENTION_DAYS,
        }
    }
}

impl RetentionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.days > MAX_RETENTION_DAYS {
            return Err(ConfigError::InvalidRetention(self.days));
        }
        Ok(())
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub broker: BrokerConfig,
    pub mode: Mode,
    pub transport: TransportKind,
    /// Surface inbound alerts as notifications.
    pub notifications_enabled: bool,
    pub retention: RetentionConfig,
    /// Identity attached to acknowledgements and responses.
    pub responder_id: Option<String>,
    /// Publisher mode: seconds between simulated alerts. Unset publishes once.
    pub alert_interval_secs: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            broker: BrokerConfig::default(),
            mode: Mode::default(),
            transport: TransportKind::default(),
            notifications_enabled: true,
            retention: RetentionConfig::default(),
            responder_id: None,
            alert_interval_secs: None,
        }
    }
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration is loaded in order (later sources override earlier):
    /// 1. `config.yaml` in current directory (optional)
    /// 2. File at `path` argument (required if provided)
    /// 3. File at `CONFIG_ENV_VAR` environment variable (required if set)
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
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.broker.validate()?;
        config.retention.validate()?;
        Ok(config)
    }
}
