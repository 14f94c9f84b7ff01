//! Configuration file support
//!
//! Loads and rewrites the server configuration as TOML. The pull mapping
//! table is part of the persisted shape so registered relays survive a
//! restart.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::ServerConfig;

/// Configuration file format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigFile {
    /// Server settings
    pub server: ServerSettings,
    /// Relay settings
    pub relay: Option<RelaySettings>,
    /// Logging settings
    pub logging: Option<LoggingSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Host address to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// TLS certificate path
    pub cert_file: Option<String>,
    /// TLS private key path
    pub key_file: Option<String>,
    /// Enable CORS
    pub cors_enabled: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelaySettings {
    /// Reconnect dropped relay pulls
    pub reconnect: Option<bool>,
    /// Pull mapping: stream path -> upstream source URL
    pub pull: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl ConfigFile {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: ConfigFile = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), Box<dyn std::error::Error>> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), content)?;
        Ok(())
    }

    /// Generate default configuration file
    pub fn default_config() -> Self {
        Self::from_server_config(&ServerConfig::default())
    }

    /// Convert to ServerConfig
    pub fn into_server_config(self) -> ServerConfig {
        let relay = self.relay.unwrap_or_default();
        ServerConfig {
            host: self.server.host,
            port: self.server.port,
            cert_file: self.server.cert_file,
            key_file: self.server.key_file,
            reconnect: relay.reconnect.unwrap_or(false),
            pull: relay.pull.unwrap_or_default(),
            cors_enabled: self.server.cors_enabled.unwrap_or(true),
            log_level: self
                .logging
                .map(|l| l.level)
                .unwrap_or_else(|| "info".to_string()),
        }
    }

    /// Build the persisted shape back from a runtime configuration.
    ///
    /// Used by the save-pull path, which rewrites the whole file.
    pub fn from_server_config(config: &ServerConfig) -> Self {
        Self {
            server: ServerSettings {
                host: config.host.clone(),
                port: config.port,
                cert_file: config.cert_file.clone(),
                key_file: config.key_file.clone(),
                cors_enabled: Some(config.cors_enabled),
            },
            relay: Some(RelaySettings {
                reconnect: Some(config.reconnect),
                pull: Some(config.pull.clone()),
            }),
            logging: Some(LoggingSettings {
                level: config.log_level.clone(),
            }),
        }
    }
}
