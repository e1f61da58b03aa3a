//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate addresses, ports and limits
//! - Reject injection settings that could never match
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use crate::config::schema::ProxyConfig;
use crate::routing::RoutingMode;

/// One semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Check `config` for semantic errors.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("{:?} is not a socket address", config.listener.bind_address),
        ));
    }
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::new("listener.max_connections", "must be greater than 0"));
    }

    if let RoutingMode::FixedTarget { host, port } = &config.routing {
        if host.trim().is_empty() {
            errors.push(ValidationError::new("routing.host", "must not be empty in fixed_target mode"));
        }
        if *port == 0 {
            errors.push(ValidationError::new("routing.port", "must be greater than 0"));
        }
    }

    if config.injection.enabled {
        if config.injection.anchor.is_empty() {
            errors.push(ValidationError::new("injection.anchor", "must not be empty when injection is enabled"));
        }
        if config.injection.payload.is_empty() {
            errors.push(ValidationError::new("injection.payload", "must not be empty when injection is enabled"));
        }
    }

    if config.timeouts.connect_secs == 0 {
        errors.push(ValidationError::new("timeouts.connect_secs", "must be greater than 0"));
    }

    // Room for at least a request line and the terminator.
    if config.limits.max_header_bytes < 16 {
        errors.push(ValidationError::new("limits.max_header_bytes", "must be at least 16"));
    }
    if config.limits.read_buffer_bytes == 0 {
        errors.push(ValidationError::new("limits.read_buffer_bytes", "must be greater than 0"));
    }

    if config.traffic_log.enabled && config.traffic_log.path.trim().is_empty() {
        errors.push(ValidationError::new("traffic_log.path", "must not be empty when the traffic log is enabled"));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("{:?} is not a socket address", config.observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
