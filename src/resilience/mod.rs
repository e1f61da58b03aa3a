//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Socket read in either direction:
//!     → timeouts.rs (idle deadline per read)
//! Upstream connect:
//!     → routing::resolver (single connect deadline)
//! ```
//!
//! # Design Decisions
//! - Every wait on a peer has a deadline unless explicitly disabled
//! - Nothing is retried; a failed session is closed and the client retries

pub mod timeouts;

pub use timeouts::{read_with_idle_timeout, TimedRead};
