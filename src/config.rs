//! Configuration module for the RPC client reliability core
//!
//! This module handles configuration loading from TOML files and provides
//! structured configuration types with validated defaults.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::commitment::Commitment;

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Endpoint configuration
    pub endpoints: EndpointSettings,

    /// WebSocket keep-alive and sharding configuration
    #[serde(default)]
    pub websocket: WebsocketSettings,

    /// Confirmation timeout configuration
    #[serde(default)]
    pub confirmation: ConfirmationSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointSettings {
    /// JSON-RPC HTTP endpoint
    pub http_url: String,

    /// JSON-RPC WebSocket endpoint
    pub ws_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebsocketSettings {
    /// Idle interval after which a keep-alive ping is sent
    #[serde(default = "default_ping_interval_ms")]
    pub ping_interval_ms: u64,
}

impl Default for WebsocketSettings {
    fn default() -> Self {
        Self {
            ping_interval_ms: default_ping_interval_ms(),
        }
    }
}

impl WebsocketSettings {
    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }
}

/// Per-commitment confirmation timeouts. The defaults are an external
/// contract: processed → 30s, confirmed/finalized → 60s.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmationSettings {
    #[serde(default = "default_processed_timeout_ms")]
    pub processed_timeout_ms: u64,

    #[serde(default = "default_confirmed_timeout_ms")]
    pub confirmed_timeout_ms: u64,

    #[serde(default = "default_finalized_timeout_ms")]
    pub finalized_timeout_ms: u64,
}

impl Default for ConfirmationSettings {
    fn default() -> Self {
        Self {
            processed_timeout_ms: default_processed_timeout_ms(),
            confirmed_timeout_ms: default_confirmed_timeout_ms(),
            finalized_timeout_ms: default_finalized_timeout_ms(),
        }
    }
}

impl ConfirmationSettings {
    /// Timeout applied when the caller does not supply one.
    pub fn timeout_for(&self, commitment: Commitment) -> Duration {
        let millis = match commitment {
            Commitment::Processed => self.processed_timeout_ms,
            Commitment::Confirmed => self.confirmed_timeout_ms,
            Commitment::Finalized => self.finalized_timeout_ms,
        };
        Duration::from_millis(millis)
    }
}

fn default_ping_interval_ms() -> u64 {
    5_000
}

fn default_processed_timeout_ms() -> u64 {
    30_000
}

fn default_confirmed_timeout_ms() -> u64 {
    60_000
}

fn default_finalized_timeout_ms() -> u64 {
    60_000
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Validation(String),
}

impl Config {
    /// Parse a configuration from a TOML string and validate it.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Validate the configuration, returning the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoints.http_url.is_empty() {
            return Err(ConfigError::Validation("http_url must not be empty".into()));
        }
        if !self.endpoints.ws_url.starts_with("ws://") && !self.endpoints.ws_url.starts_with("wss://")
        {
            return Err(ConfigError::Validation(format!(
                "ws_url must use a ws:// or wss:// scheme, got: {}",
                self.endpoints.ws_url
            )));
        }
        if self.websocket.ping_interval_ms == 0 {
            return Err(ConfigError::Validation(
                "ping_interval_ms must be greater than zero".into(),
            ));
        }
        for (name, value) in [
            ("processed_timeout_ms", self.confirmation.processed_timeout_ms),
            ("confirmed_timeout_ms", self.confirmation.confirmed_timeout_ms),
            ("finalized_timeout_ms", self.confirmation.finalized_timeout_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::Validation(format!(
                    "{name} must be greater than zero"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_config() -> Config {
        Config {
            endpoints: EndpointSettings {
                http_url: "https://api.mainnet-beta.solana.com".to_string(),
                ws_url: "wss://api.mainnet-beta.solana.com".to_string(),
            },
            websocket: WebsocketSettings::default(),
            confirmation: ConfirmationSettings::default(),
        }
    }

    #[test]
    fn test_default_timeout_table() {
        let settings = ConfirmationSettings::default();
        assert_eq!(
            settings.timeout_for(Commitment::Processed),
            Duration::from_millis(30_000)
        );
        assert_eq!(
            settings.timeout_for(Commitment::Confirmed),
            Duration::from_millis(60_000)
        );
        assert_eq!(
            settings.timeout_for(Commitment::Finalized),
            Duration::from_millis(60_000)
        );
    }

    #[test]
    fn test_parse_minimal_toml_applies_defaults() {
        let config = Config::from_toml_str(
            r#"
            [endpoints]
            http_url = "https://api.devnet.solana.com"
            ws_url = "wss://api.devnet.solana.com"
            "#,
        )
        .expect("config should parse");

        assert_eq!(config.websocket.ping_interval_ms, 5_000);
        assert_eq!(config.confirmation.processed_timeout_ms, 30_000);
        assert_eq!(config.confirmation.finalized_timeout_ms, 60_000);
    }

    #[test]
    fn test_validation_rejects_non_websocket_scheme() {
        let mut config = minimal_config();
        config.endpoints.ws_url = "https://api.devnet.solana.com".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn test_validation_rejects_zero_timeouts() {
        let mut config = minimal_config();
        config.confirmation.confirmed_timeout_ms = 0;
        assert!(config.validate().is_err());
    }
}
