//! Application state management
//!
//! One `AppState` is shared by every handler and background task. The
//! configuration is mutable only through [`AppState::save_pull`]: the
//! in-memory update happens under a short lock, and file rewrites are
//! serialized behind an async lock in snapshot order, with the blocking
//! write running off the async workers.

use std::path::PathBuf;

use parking_lot::Mutex;

use crate::config::ServerConfig;
use crate::config_file::ConfigFile;
use crate::error::{HdlError, Result};
use crate::registry::StreamRegistry;

/// Shared application state
pub struct AppState {
    /// Live stream registry
    pub registry: StreamRegistry,
    /// Process-wide configuration; serialize all mutation through
    /// [`AppState::save_pull`]
    config: Mutex<ServerConfig>,
    /// Serializes file rewrites so the file always ends up reflecting the
    /// latest snapshot
    persist: tokio::sync::Mutex<()>,
    /// Where the configuration persists, when it persists at all
    config_path: Option<PathBuf>,
}

impl AppState {
    /// Create application state from a loaded configuration
    pub fn new(config: ServerConfig, config_path: Option<PathBuf>) -> Self {
        Self {
            registry: StreamRegistry::new(),
            config: Mutex::new(config),
            persist: tokio::sync::Mutex::new(()),
            config_path,
        }
    }

    /// Snapshot of the current configuration
    pub fn config(&self) -> ServerConfig {
        self.config.lock().clone()
    }

    /// Whether dropped relay pulls should reconnect
    pub fn reconnect(&self) -> bool {
        self.config.lock().reconnect
    }

    /// The persisted pull mapping, in deterministic order
    pub fn pull_entries(&self) -> Vec<(String, String)> {
        self.config
            .lock()
            .pull
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Record a pull mapping and flush the configuration to disk.
    ///
    /// The persist lock is taken before the in-memory update, so the file
    /// write order matches the snapshot order; the write itself runs on
    /// the blocking pool. Without a configured path the mapping still
    /// updates in memory.
    pub async fn save_pull(&self, stream_path: &str, target: &str) -> Result<()> {
        let Some(path) = self.config_path.clone() else {
            self.config
                .lock()
                .pull
                .insert(stream_path.to_string(), target.to_string());
            return Ok(());
        };

        let _persist = self.persist.lock().await;
        let snapshot = {
            let mut config = self.config.lock();
            config
                .pull
                .insert(stream_path.to_string(), target.to_string());
            ConfigFile::from_server_config(&config)
        };
        tokio::task::spawn_blocking(move || {
            snapshot
                .to_file(&path)
                .map_err(|e| HdlError::Config(e.to_string()))
        })
        .await
        .map_err(|e| HdlError::Config(e.to_string()))?
    }
}
