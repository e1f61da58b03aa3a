//! Operating modes and destination selection.

use serde::{Deserialize, Serialize};

use crate::error::RoutingError;
use crate::http::headers;

pub const DEFAULT_HTTP_PORT: u16 = 80;

fn default_http_port() -> u16 {
    DEFAULT_HTTP_PORT
}

/// How a session picks its upstream.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum RoutingMode {
    /// Every session goes to one destination and Host is rewritten to it.
    FixedTarget {
        host: String,
        #[serde(default = "default_http_port")]
        port: u16,
    },
    /// The destination comes from each client's Host header.
    #[default]
    Transparent,
}

impl RoutingMode {
    pub fn fixed(host: impl Into<String>, port: u16) -> Self {
        RoutingMode::FixedTarget {
            host: host.into(),
            port,
        }
    }

    pub fn is_transparent(&self) -> bool {
        matches!(self, RoutingMode::Transparent)
    }

    /// Where a request with this header block should go.
    pub fn destination(&self, header_block: &[u8]) -> Result<Destination, RoutingError> {
        match self {
            RoutingMode::FixedTarget { host, port } => Ok(Destination::new(host.clone(), *port)),
            RoutingMode::Transparent => {
                let host = headers::find_header(header_block, headers::HOST)
                    .map(|h| h.value)
                    .filter(|v| !v.is_empty())
                    .ok_or(RoutingError::MissingHost)?;
                parse_authority(&host, DEFAULT_HTTP_PORT)
            }
        }
    }

    /// Value the Host header is rewritten to, if this mode rewrites it.
    pub fn host_header(&self) -> Option<String> {
        match self {
            RoutingMode::FixedTarget { host, port } => {
                Some(Destination::new(host.clone(), *port).host_header())
            }
            RoutingMode::Transparent => None,
        }
    }
}

/// A resolved-by-name upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub host: String,
    pub port: u16,
}

impl Destination {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// `host` on the default port, `host:port` otherwise.
    pub fn host_header(&self) -> String {
        if self.port == DEFAULT_HTTP_PORT {
            self.bracketed_host()
        } else {
            self.to_string()
        }
    }

    fn bracketed_host(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        }
    }
}

impl std::fmt::Display for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.bracketed_host(), self.port)
    }
}

/// Parse `host`, `host:port`, `[v6]` or `[v6]:port`.
pub fn parse_authority(value: &str, default_port: u16) -> Result<Destination, RoutingError> {
    let invalid = || RoutingError::InvalidHost(value.to_string());
    let value = value.trim();

    let (host, port) = if let Some(rest) = value.strip_prefix('[') {
        let (host, after) = rest.split_once(']').ok_or_else(invalid)?;
        match after {
            "" => (host, None),
            _ => (host, Some(after.strip_prefix(':').ok_or_else(invalid)?)),
        }
    } else {
        match value.rsplit_once(':') {
            // More than one colon without brackets: a bare IPv6 literal.
            Some((host, _)) if host.contains(':') => (value, None),
            Some((host, port)) => (host, Some(port)),
            None => (value, None),
        }
    };

    if host.is_empty() || host.chars().any(|c| c.is_whitespace() || c == '/' || c == '@') {
        return Err(invalid());
    }
    let port = match port {
        Some(p) => p.parse::<u16>().ok().filter(|p| *p != 0).ok_or_else(invalid)?,
        None => default_port,
    };

    Ok(Destination::new(host, port))
}
