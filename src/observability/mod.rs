//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Sessions and the accept loop produce:
//!     → logging.rs (structured tracing events)
//!     → metrics.rs (counters, gauges)
//!     → traffic_log.rs (raw forwarded messages, labeled per direction)
//! ```
//!
//! # Design Decisions
//! - Structured fields (connection_id, destination, error) on every event
//! - The traffic log has exactly one writer
//! - Metrics are cheap and off by default

pub mod logging;
pub mod metrics;
pub mod traffic_log;

pub use traffic_log::{TrafficLabel, TrafficLog};
