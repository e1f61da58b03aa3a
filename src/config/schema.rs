//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::http::FrameLimits;
use crate::routing::RoutingMode;

/// Root configuration for the intercepting proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address, connection limit).
    pub listener: ListenerConfig,

    /// Fixed-target or transparent routing.
    pub routing: RoutingMode,

    /// Response body injection.
    pub injection: InjectionConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Framing and buffer limits.
    pub limits: LimitsConfig,

    /// Raw traffic log.
    pub traffic_log: TrafficLogConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Maximum concurrent sessions (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_connections: 1024,
        }
    }
}

/// Marker injection into response bodies.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct InjectionConfig {
    /// Enable injection. Chunked responses are re-framed either way.
    pub enabled: bool,

    /// Literal the payload is inserted in front of.
    pub anchor: String,

    /// Fragment inserted before the anchor.
    pub payload: String,
}

impl Default for InjectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            anchor: "</body>".to_string(),
            payload: "<h1 style='color:red;'>[proxy injection worked]</h1>".to_string(),
        }
    }
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Resolution plus connect deadline in seconds.
    pub connect_secs: u64,

    /// Per-read idle timeout in seconds (0 disables).
    pub idle_secs: u64,

    /// How long shutdown waits for active sessions, in seconds.
    pub shutdown_grace_secs: u64,
}

impl TimeoutConfig {
    pub fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }

    pub fn idle(&self) -> Option<Duration> {
        (self.idle_secs > 0).then(|| Duration::from_secs(self.idle_secs))
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 5,
            idle_secs: 60,
            shutdown_grace_secs: 10,
        }
    }
}

/// Framing and buffer limits.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct LimitsConfig {
    /// Largest accepted header block.
    pub max_header_bytes: usize,

    /// Largest buffered body (after dechunking).
    pub max_body_bytes: usize,

    /// Size of each socket read.
    pub read_buffer_bytes: usize,
}

impl LimitsConfig {
    pub fn frame_limits(&self) -> FrameLimits {
        FrameLimits {
            max_header_bytes: self.max_header_bytes,
            max_body_bytes: self.max_body_bytes,
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        let frame = FrameLimits::default();
        Self {
            max_header_bytes: frame.max_header_bytes,
            max_body_bytes: frame.max_body_bytes,
            read_buffer_bytes: 8 * 1024,
        }
    }
}

/// Raw traffic log configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct TrafficLogConfig {
    /// Append every forwarded message to `path`.
    pub enabled: bool,

    pub path: String,
}

impl Default for TrafficLogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: "proxy.log".to_string(),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error). `RUST_LOG` wins.
    pub log_level: String,

    /// Emit JSON log lines.
    pub json_logs: bool,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
