//! Name resolution and upstream connect.
//!
//! # Design Decisions
//! - Resolution goes through `tokio::net::lookup_host` (blocking pool)
//! - Every resolved address is tried in order; the first to connect wins
//! - One deadline covers resolution and all connect attempts
//! - No retries: a failure closes the session and the client retries

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpStream;

use crate::error::RoutingError;
use crate::routing::mode::Destination;

/// Resolve `destination` to its socket addresses.
pub async fn resolve(destination: &Destination) -> Result<Vec<SocketAddr>, RoutingError> {
    let addrs: Vec<SocketAddr> = tokio::net::lookup_host((destination.host.as_str(), destination.port))
        .await
        .map_err(|source| RoutingError::Resolve {
            host: destination.host.clone(),
            source,
        })?
        .collect();

    if addrs.is_empty() {
        return Err(RoutingError::NoAddress {
            host: destination.host.clone(),
        });
    }
    Ok(addrs)
}

/// Resolve and connect within `timeout`.
pub async fn connect(destination: &Destination, timeout: Duration) -> Result<TcpStream, RoutingError> {
    match tokio::time::timeout(timeout, connect_any(destination)).await {
        Ok(result) => result,
        Err(_) => Err(RoutingError::ConnectTimeout {
            host: destination.to_string(),
            after: timeout,
        }),
    }
}

async fn connect_any(destination: &Destination) -> Result<TcpStream, RoutingError> {
    let addrs = resolve(destination).await?;

    let mut last_error = None;
    for addr in addrs {
        match TcpStream::connect(addr).await {
            Ok(stream) => {
                if let Err(e) = stream.set_nodelay(true) {
                    tracing::debug!(address = %addr, error = %e, "Failed to set TCP_NODELAY");
                }
                tracing::debug!(destination = %destination, address = %addr, "Upstream connected");
                return Ok(stream);
            }
            Err(source) => {
                tracing::debug!(address = %addr, error = %source, "Upstream connect attempt failed");
                last_error = Some(RoutingError::Connect { addr, source });
            }
        }
    }

    Err(last_error.unwrap_or_else(|| RoutingError::NoAddress {
        host: destination.host.clone(),
    }))
}
