//! Error taxonomy for the interception pipeline.
//!
//! Every error is scoped to a single session: the accept loop logs it and
//! keeps going. Peer closure is not an error and never shows up here.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

/// Result alias used throughout the relay.
pub type ProxyResult<T> = Result<T, ProxyError>;

/// Traffic direction, used to label errors and log records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Client to upstream (requests).
    Upstream,
    /// Upstream to client (responses).
    Downstream,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Upstream => "client->upstream",
            Direction::Downstream => "upstream->client",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A message could not be framed. The message is never forwarded.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FramingError {
    #[error("invalid Content-Length value {0:?}")]
    InvalidContentLength(String),

    #[error("conflicting Content-Length values")]
    ConflictingContentLength,

    #[error("header block exceeds {limit} bytes")]
    HeadersTooLarge { limit: usize },

    #[error("message body exceeds {limit} bytes")]
    BodyTooLarge { limit: usize },

    #[error("malformed chunked body: {0}")]
    InvalidChunk(&'static str),

    #[error("connection closed before the message was complete")]
    Truncated,
}

/// The destination of a session could not be established.
#[derive(Debug, Error)]
pub enum RoutingError {
    #[error("request has no Host header")]
    MissingHost,

    #[error("invalid Host header {0:?}")]
    InvalidHost(String),

    #[error("failed to resolve {host}: {source}")]
    Resolve {
        host: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{host} did not resolve to any address")]
    NoAddress { host: String },

    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("timed out connecting to {host} after {after:?}")]
    ConnectTimeout { host: String, after: Duration },
}

impl RoutingError {
    /// Short label for metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            RoutingError::MissingHost => "missing_host",
            RoutingError::InvalidHost(_) => "invalid_host",
            RoutingError::Resolve { .. } | RoutingError::NoAddress { .. } => "resolve",
            RoutingError::Connect { .. } => "connect",
            RoutingError::ConnectTimeout { .. } => "connect_timeout",
        }
    }
}

/// Session-level failure.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("framing error ({direction}): {source}")]
    Framing {
        direction: Direction,
        #[source]
        source: FramingError,
    },

    #[error("routing error: {0}")]
    Routing(#[from] RoutingError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{direction} idle for more than {after:?}")]
    IdleTimeout { direction: Direction, after: Duration },
}

impl ProxyError {
    pub fn framing(direction: Direction, source: FramingError) -> Self {
        ProxyError::Framing { direction, source }
    }

    /// Short label for metrics and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            ProxyError::Framing { .. } => "framing",
            ProxyError::Routing(_) => "routing",
            ProxyError::Io(_) => "io",
            ProxyError::IdleTimeout { .. } => "idle_timeout",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kinds() {
        let err = ProxyError::framing(Direction::Upstream, FramingError::Truncated);
        assert_eq!(err.kind(), "framing");
        assert!(err.to_string().contains("client->upstream"));

        let err: ProxyError = RoutingError::MissingHost.into();
        assert_eq!(err.kind(), "routing");
        assert_eq!(RoutingError::MissingHost.reason(), "missing_host");
    }
}
