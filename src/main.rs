//! Intercepting HTTP/1.x forward proxy.
//!
//! # Architecture Overview
//!
//! ```text
//!                     ┌──────────────────────────────────────────────────────────┐
//!                     │                     INTERCEPT PROXY                      │
//!                     │                                                          │
//!   Client request    │  ┌─────────┐    ┌──────────┐    ┌─────────┐    ┌──────┐  │
//!   ──────────────────┼─▶│   net   │───▶│  relay   │───▶│  http   │───▶│route │──┼──▶ Origin
//!                     │  │listener │    │ session  │    │ framer  │    │      │  │
//!                     │  └─────────┘    └────┬─────┘    │ rewrite │    └──────┘  │
//!                     │                      │          └─────────┘              │
//!   Client response   │                      ▼                                   │
//!   ◀─────────────────┼──────────── dechunk + inject + Content-Length ◀──────────┼─── Origin
//!                     │                                                          │
//!                     │  ┌────────────────────────────────────────────────────┐  │
//!                     │  │ config (toml, notify) │ observability (tracing,    │  │
//!                     │  │ lifecycle (signals)   │ metrics, traffic log)      │  │
//!                     │  └────────────────────────────────────────────────────┘  │
//!                     └──────────────────────────────────────────────────────────┘
//! ```

use clap::Parser;

use intercept_proxy::cli::Cli;
use intercept_proxy::lifecycle::startup;
use intercept_proxy::observability::logging;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = cli.load_config()?;

    logging::init_tracing(&config.observability);
    tracing::info!("intercept-proxy v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.listener.bind_address,
        max_connections = config.listener.max_connections,
        routing = ?config.routing,
        injection = config.injection.enabled,
        traffic_log = config.traffic_log.enabled,
        "Configuration loaded"
    );

    startup::run(config, cli.watch_path()).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
