//! HTTP/1.x interception pipeline.
//!
//! # Data Flow
//! ```text
//! socket bytes
//!     → framer.rs (header terminator, Content-Length / chunked framing)
//!     → chunked.rs (dechunk while framing)
//!     → request.rs / response.rs (plan RewriteDirectives)
//!     → rewrite.rs + headers.rs (apply edits to the raw header block)
//!     → socket bytes
//! ```
//!
//! # Design Decisions
//! - Only as much HTTP is parsed as the rewrites need
//! - Header blocks are edited as bytes so untouched lines stay byte-identical
//! - Whole messages are buffered before any byte is forwarded

pub mod chunked;
pub mod framer;
pub mod headers;
pub mod request;
pub mod response;
pub mod rewrite;

pub use framer::{BodyFraming, FrameLimits, FrameState, MessageFramer, MessageKind, RawMessage};
pub use request::RequestRewriter;
pub use response::{ResponseRewriter, RewrittenResponse};
pub use rewrite::{HttpMessage, RewriteDirective};
