//! Intercepting HTTP/1.x forward proxy library

pub mod cli;
pub mod config;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod relay;
pub mod resilience;
pub mod routing;

pub use config::schema::ProxyConfig;
pub use error::{ProxyError, ProxyResult};
pub use lifecycle::Shutdown;
pub use relay::ProxyServer;
