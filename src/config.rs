//! Server configuration

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// TLS certificate path (listener TLS is configured externally;
    /// the paths are carried so they persist across restarts)
    pub cert_file: Option<String>,

    /// TLS private key path
    pub key_file: Option<String>,

    /// Reconnect dropped relay pulls
    pub reconnect: bool,

    /// Persisted pull mapping: stream path -> upstream source URL.
    /// BTreeMap keeps bootstrap and persistence order deterministic.
    pub pull: BTreeMap<String, String>,

    /// Enable CORS
    pub cors_enabled: bool,

    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            cert_file: None,
            key_file: None,
            reconnect: false,
            pull: BTreeMap::new(),
            cors_enabled: true,
            log_level: "info".to_string(),
        }
    }
}

impl ServerConfig {
    /// Get the socket address string
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
