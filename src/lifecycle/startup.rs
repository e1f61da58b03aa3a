//! Startup orchestration.
//!
//! # Responsibilities
//! - Initialize subsystems in dependency order
//! - Start the config watcher when asked to
//! - Bind the listener and run the accept loop until a signal arrives
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Subsystems initialize in order, not concurrently
//! - Listeners start last (traffic only when ready)

use std::net::SocketAddr;
use std::path::Path;

use thiserror::Error;
use tokio::sync::mpsc;

use crate::config::watcher::ConfigWatcher;
use crate::config::ProxyConfig;
use crate::lifecycle::signals::wait_for_signal;
use crate::lifecycle::Shutdown;
use crate::net::{Listener, ListenerError};
use crate::observability::metrics;
use crate::relay::ProxyServer;

/// Fatal error before or while serving.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("listener: {0}")]
    Listener(#[from] ListenerError),

    #[error("invalid metrics address {address:?}: {source}")]
    MetricsAddress {
        address: String,
        source: std::net::AddrParseError,
    },

    #[error("metrics exporter: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),

    #[error("config watcher: {0}")]
    Watch(#[from] notify::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Run the proxy until SIGINT/SIGTERM.
///
/// `watch` names the configuration file to reload on change, if any.
pub async fn run(config: ProxyConfig, watch: Option<&Path>) -> Result<(), StartupError> {
    if config.observability.metrics_enabled {
        let address = &config.observability.metrics_address;
        let addr: SocketAddr = address.parse().map_err(|source| StartupError::MetricsAddress {
            address: address.clone(),
            source,
        })?;
        metrics::init_metrics(addr)?;
    }

    let (_updates_tx, mut updates) = mpsc::unbounded_channel();
    let _watcher = match watch {
        Some(path) => {
            let (watcher, rx) = ConfigWatcher::new(path);
            updates = rx;
            Some(watcher.run()?)
        }
        None => None,
    };

    let listener = Listener::bind(&config.listener).await?;

    let shutdown = Shutdown::new();
    let server = ProxyServer::new(config);
    let serving = server.run(listener, updates, shutdown.subscribe());

    let trigger = shutdown.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        trigger.trigger();
    });

    serving.await?;
    Ok(())
}
