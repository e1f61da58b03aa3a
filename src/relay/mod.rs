//! Relay subsystem.
//!
//! # Data Flow
//! ```text
//! Listener accept
//!     → server.rs (one task per client, shared SessionContext)
//!     → session.rs (route the first request, connect upstream)
//!     → pipe.rs (frame messages off each socket half)
//!     → http::request / http::response (rewrite)
//!     → opposite socket half, traffic log
//! ```
//!
//! # Design Decisions
//! - One task per session; its two directions are joined, not spawned
//! - Configuration reloads swap the context for new sessions only

pub mod pipe;
pub mod server;
pub mod session;

pub use server::ProxyServer;
pub use session::{DirectionEnd, RelaySession, SessionContext, SessionState};
