//! Command-line interface.
//!
//! Flags override values from the configuration file; the merged result is
//! validated again before anything starts.

use std::path::{Path, PathBuf};

use clap::Parser;

use crate::config::loader::{load_config, ConfigError};
use crate::config::validation::{validate_config, ValidationError};
use crate::config::ProxyConfig;
use crate::routing::{mode::DEFAULT_HTTP_PORT, parse_authority, RoutingMode};

#[derive(Parser, Debug, Default)]
#[command(name = "intercept-proxy", version)]
#[command(about = "HTTP/1.x forward proxy that rewrites traffic in flight", long_about = None)]
pub struct Cli {
    /// TOML configuration file.
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Address to listen on, e.g. 0.0.0.0:8080.
    #[arg(short, long, value_name = "ADDR")]
    pub listen: Option<String>,

    /// Send every request to this upstream instead of the request's Host.
    #[arg(short, long, value_name = "HOST[:PORT]")]
    pub target: Option<String>,

    /// Append forwarded traffic to this file.
    #[arg(long, value_name = "PATH", conflicts_with = "no_log_file")]
    pub log_file: Option<String>,

    /// Do not write a traffic log.
    #[arg(long)]
    pub no_log_file: bool,

    /// Forward response bodies without injecting the marker.
    #[arg(long)]
    pub no_inject: bool,

    /// Reload the configuration file when it changes.
    #[arg(long, requires = "config")]
    pub watch: bool,
}

impl Cli {
    /// Load the configuration file (or defaults) and apply flag overrides.
    pub fn load_config(&self) -> Result<ProxyConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => load_config(path)?,
            None => ProxyConfig::default(),
        };
        self.apply_overrides(&mut config)?;
        validate_config(&config).map_err(ConfigError::Validation)?;
        Ok(config)
    }

    /// The file to watch, if reloading was requested.
    pub fn watch_path(&self) -> Option<&Path> {
        self.watch.then_some(self.config.as_deref()).flatten()
    }

    fn apply_overrides(&self, config: &mut ProxyConfig) -> Result<(), ConfigError> {
        if let Some(listen) = &self.listen {
            config.listener.bind_address = listen.clone();
        }
        if let Some(target) = &self.target {
            let destination = parse_authority(target, DEFAULT_HTTP_PORT).map_err(|e| {
                ConfigError::Validation(vec![ValidationError::new("--target", e.to_string())])
            })?;
            config.routing = RoutingMode::fixed(destination.host, destination.port);
        }
        if let Some(path) = &self.log_file {
            config.traffic_log.enabled = true;
            config.traffic_log.path = path.clone();
        }
        if self.no_log_file {
            config.traffic_log.enabled = false;
        }
        if self.no_inject {
            config.injection.enabled = false;
        }
        Ok(())
    }
}
