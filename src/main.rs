//! HDL Streaming Server
//!
//! An HTTP-FLV server that re-serves live streams as chunked FLV over
//! HTTP, with a control plane for listing pulled relays and registering
//! new ones.

mod amf;
mod config;
mod config_file;
mod error;
mod flv;
mod http;
mod metadata;
mod mux;
mod path;
mod registry;
mod relay;
mod state;
mod track;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::ServerConfig;
use crate::error::{HdlError, Result};
use crate::http::create_router;
use crate::state::AppState;

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
const APP_NAME: &str = "hdl-server";

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration before logging so the configured level can seed
    // the default filter.
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.toml".to_string());
    let config_path = PathBuf::from(config_path);
    let (config, load_error) = if config_path.exists() {
        match crate::config_file::ConfigFile::from_file(&config_path) {
            Ok(cf) => (cf.into_server_config(), None),
            Err(e) => (ServerConfig::default(), Some(e.to_string())),
        }
    } else {
        (ServerConfig::default(), None)
    };

    init_logging(&config.log_level);

    tracing::info!("{} v{} starting", APP_NAME, VERSION);
    if let Some(e) = load_error {
        tracing::warn!(
            "Failed to load config file {}: {}. Using defaults.",
            config_path.display(),
            e
        );
    }
    tracing::info!("Configuration loaded: {:?}", config);

    // Create application state; the config path is kept so saved pulls
    // persist back to the same file.
    let state = Arc::new(AppState::new(config.clone(), Some(config_path)));

    // Re-establish persisted relay pulls in the background; a slow
    // upstream must not hold up the listener.
    let bootstrap = state.clone();
    tokio::spawn(async move {
        relay::auto_pull(&bootstrap).await;
    });

    // Build router
    let app = create_router(state.clone());

    // Start server
    let addr: SocketAddr = config
        .socket_addr()
        .parse()
        .map_err(|e| HdlError::Config(format!("invalid listen address: {e}")))?;
    tracing::info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Initialize logging with tracing. `RUST_LOG` wins over the configured
/// level.
fn init_logging(level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter(level))),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Default filter directive derived from the configured log level
fn default_filter(level: &str) -> String {
    format!("hdl_server={level},tower_http={level}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_default_filter_uses_configured_level() {
        assert_eq!(default_filter("warn"), "hdl_server=warn,tower_http=warn");
    }
}
