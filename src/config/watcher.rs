//! Configuration file watcher for hot reload.
//!
//! Only settings read at session start (routing, injection, timeouts,
//! limits) take effect on reload. The listener and the traffic log keep the
//! values they were started with.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::load_config;
use crate::config::schema::ProxyConfig;

/// Watches one configuration file and publishes every valid revision.
pub struct ConfigWatcher {
    path: PathBuf,
    update_tx: mpsc::UnboundedSender<ProxyConfig>,
}

impl ConfigWatcher {
    /// Returns the watcher and the receiving end of its updates.
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<ProxyConfig>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        (
            Self {
                path: path.to_path_buf(),
                update_tx,
            },
            update_rx,
        )
    }

    /// Start watching. The returned handle must be kept alive.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let Self { path, update_tx } = self;
        let reload_path = path.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if is_content_change(&event.kind) => {
                    reload(&reload_path, &update_tx);
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = %e, "Config watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&path, RecursiveMode::NonRecursive)?;
        tracing::info!(path = %path.display(), "Config watcher started");
        Ok(watcher)
    }
}

fn is_content_change(kind: &EventKind) -> bool {
    kind.is_modify() || kind.is_create()
}

fn reload(path: &Path, tx: &mpsc::UnboundedSender<ProxyConfig>) {
    match load_config(path) {
        Ok(config) => {
            tracing::info!(path = %path.display(), "Config file changed, reloaded");
            let _ = tx.send(config);
        }
        Err(e) => {
            tracing::error!(error = %e, "Config reload failed, keeping current configuration");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reload_publishes_valid_config_only() {
        let path = std::env::temp_dir().join(format!("intercept-proxy-watch-{}.toml", std::process::id()));
        let (watcher, mut rx) = ConfigWatcher::new(&path);

        std::fs::write(&path, "[routing]\nmode = \"fixed_target\"\nhost = \"a.test\"\n").unwrap();
        reload(&path, &watcher.update_tx);
        let config = rx.try_recv().unwrap();
        assert_eq!(config.routing, crate::routing::RoutingMode::fixed("a.test", 80));

        std::fs::write(&path, "[listener]\nmax_connections = 0\n").unwrap();
        reload(&path, &watcher.update_tx);
        assert!(rx.try_recv().is_err());

        std::fs::remove_file(&path).unwrap();
    }
}
