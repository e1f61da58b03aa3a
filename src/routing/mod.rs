//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! First complete request (header block)
//!     → mode.rs (fixed target or Host header → Destination)
//!     → resolver.rs (lookup_host, connect with deadline)
//!     → upstream TcpStream owned by the session
//! ```
//!
//! # Design Decisions
//! - The mode is an explicit tagged variant chosen in configuration
//! - Transparent mode never guesses: no Host means no route
//! - Transparent mode honours an explicit port in Host, default 80

pub mod mode;
pub mod resolver;

pub use mode::{parse_authority, Destination, RoutingMode};
