//! Broker endpoint configuration.

use serde::Deserialize;

use super::ConfigError;

/// Broker host used when none is configured.
pub const DEFAULT_BROKER_HOST: &str = "192.168.1.100";
/// Standard unencrypted MQTT port.
pub const DEFAULT_BROKER_PORT: u16 = 1883;

/// Broker endpoint and client identity.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    /// Client identifier. Generated per process when unset.
    pub client_id: Option<String>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_BROKER_HOST.to_string(),
            port: DEFAULT_BROKER_PORT,
            client_id: None,
        }
    }
}

impl BrokerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_endpoint(&self.host, self.port)
    }
}

/// Reject endpoints that cannot name a TCP broker.
///
/// The host must be a bare hostname or address: non-empty, no whitespace,
/// no scheme or path. Port 0 is rejected.
pub fn validate_endpoint(host: &str, port: u16) -> Result<(), ConfigError> {
    let malformed = host.is_empty()
        || host.chars().any(char::is_whitespace)
        || host.contains("://")
        || host.contains('/');
    if malformed {
        return Err(ConfigError::InvalidHost(host.to_string()));
    }
    if port == 0 {
        return Err(ConfigError::InvalidPort(port));
    }
    Ok(())
}
