//! Accept loop.
//!
//! # Responsibilities
//! - Accept clients and hand each one to its own session task
//! - Swap in reloaded configuration for sessions accepted afterwards
//! - Stop accepting on shutdown and give open sessions a grace period
//! - Flush the traffic log before returning

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::config::ProxyConfig;
use crate::net::{ConnectionTracker, Listener, ListenerError};
use crate::observability::TrafficLog;
use crate::relay::session::{RelaySession, SessionContext};

/// Pause after a failed accept before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// The intercepting proxy server.
pub struct ProxyServer {
    config: ProxyConfig,
    tracker: ConnectionTracker,
}

impl ProxyServer {
    pub fn new(config: ProxyConfig) -> Self {
        Self {
            config,
            tracker: ConnectionTracker::new(),
        }
    }

    /// Handle on the live session count.
    pub fn tracker(&self) -> ConnectionTracker {
        self.tracker.clone()
    }

    /// Serve until `shutdown` fires, then wait for open sessions.
    pub async fn run(
        mut self,
        listener: Listener,
        mut config_updates: mpsc::UnboundedReceiver<ProxyConfig>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> std::io::Result<()> {
        let local_addr = listener.local_addr()?;
        let (traffic, traffic_writer) = open_traffic_log(&self.config).await;

        tracing::info!(
            address = %local_addr,
            routing = ?self.config.routing,
            injection = self.config.injection.enabled,
            traffic_log = traffic.is_enabled(),
            "Proxy server starting"
        );

        let mut ctx = Arc::new(SessionContext::from_config(&self.config, traffic.clone()));

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer, permit)) => {
                        let guard = self.tracker.track();
                        let session = RelaySession::new(guard.id(), peer, Arc::clone(&ctx));
                        tokio::spawn(async move {
                            // Outcome is logged inside the session span.
                            let _ = session.run(stream).await;
                            drop(permit);
                            drop(guard);
                        });
                    }
                    Err(ListenerError::Closed) => break,
                    Err(e) => {
                        tracing::warn!(error = %e, "Accept failed");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
                Some(update) = config_updates.recv() => {
                    if update.listener != self.config.listener {
                        tracing::warn!("Listener settings changed; restart to apply them");
                    }
                    if update.traffic_log != self.config.traffic_log {
                        tracing::warn!("Traffic log settings changed; restart to apply them");
                    }
                    ctx = Arc::new(SessionContext::from_config(&update, traffic.clone()));
                    tracing::info!(routing = ?update.routing, "Configuration reloaded for new sessions");
                    self.config = update;
                }
                _ = shutdown.recv() => {
                    tracing::info!("Shutdown signal received, no longer accepting");
                    break;
                }
            }
        }

        drop(listener);
        let grace = self.config.timeouts.shutdown_grace();
        if !self.tracker.wait_for_drain(grace).await {
            tracing::warn!(
                active = self.tracker.active_count(),
                grace = ?grace,
                "Sessions still open after grace period"
            );
        }

        // The writer finishes once the last handle is dropped and the queue is empty.
        drop(ctx);
        drop(traffic);
        if let Some(writer) = traffic_writer {
            if tokio::time::timeout(grace, writer).await.is_err() {
                tracing::warn!(grace = ?grace, "Traffic log not flushed within grace period");
            }
        }

        tracing::info!("Proxy server stopped");
        Ok(())
    }
}

/// Open the traffic log and its writer task, falling back to a disabled log
/// on failure.
async fn open_traffic_log(config: &ProxyConfig) -> (TrafficLog, Option<JoinHandle<()>>) {
    if !config.traffic_log.enabled {
        return (TrafficLog::disabled(), None);
    }

    let path = Path::new(&config.traffic_log.path);
    match TrafficLog::open(path).await {
        Ok((log, writer)) => (log, Some(writer)),
        Err(e) => {
            tracing::error!(error = %e, path = %path.display(), "Cannot open traffic log, continuing without it");
            (TrafficLog::disabled(), None)
        }
    }
}
