//! Origin response rewriting.
//!
//! # Responsibilities
//! - Re-frame chunked responses as fixed-length messages
//! - Inject the marker fragment before the anchor
//! - Keep Content-Length equal to the bytes actually sent
//!
//! # Design Decisions
//! - Injection only ever sees the dechunked payload
//! - Compressed bodies (Content-Encoding other than identity) are never touched
//! - Bodies with a transfer coding other than chunked are forwarded as received
//! - Content-Length is recomputed only after the body is final

use crate::config::InjectionConfig;
use crate::http::framer::{BodyFraming, RawMessage};
use crate::http::headers::{transfer_codings, CONTENT_ENCODING, TRANSFER_ENCODING};
use crate::http::rewrite::{HttpMessage, RewriteDirective};

/// Outcome of rewriting one response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewrittenResponse {
    pub message: HttpMessage,
    pub injected: bool,
    pub dechunked: bool,
}

/// Rewrites responses on their way back to the client.
#[derive(Debug, Clone)]
pub struct ResponseRewriter {
    inject: Option<RewriteDirective>,
}

impl ResponseRewriter {
    pub fn new(config: &InjectionConfig) -> Self {
        let inject = (config.enabled && !config.anchor.is_empty()).then(|| {
            RewriteDirective::InjectBeforeAnchor {
                anchor: config.anchor.as_bytes().to_vec(),
                payload: config.payload.as_bytes().to_vec(),
            }
        });
        Self { inject }
    }

    pub fn rewrite(&self, response: RawMessage) -> RewrittenResponse {
        if has_foreign_transfer_coding(&response.header_block) {
            tracing::debug!("Transfer coding other than chunked, forwarding unmodified");
            return RewrittenResponse {
                message: HttpMessage::new(response.header_block, response.body),
                injected: false,
                dechunked: false,
            };
        }

        let dechunked = response.framing == BodyFraming::Chunked;
        let body = match response.decoded {
            Some(decoded) if dechunked => decoded,
            _ => response.body,
        };
        let mut message = HttpMessage::new(response.header_block, body);

        if dechunked {
            RewriteDirective::remove(TRANSFER_ENCODING).apply(&mut message);
        }

        let injected = match &self.inject {
            Some(directive) if is_identity_encoded(&message) => directive.apply(&mut message),
            _ => false,
        };

        if injected || dechunked {
            RewriteDirective::RecomputeContentLength.apply(&mut message);
        }

        RewrittenResponse {
            message,
            injected,
            dechunked,
        }
    }
}

/// Whether the body carries a transfer coding the proxy cannot undo.
fn has_foreign_transfer_coding(block: &[u8]) -> bool {
    transfer_codings(block).iter().any(|c| c != "chunked")
}

fn is_identity_encoded(message: &HttpMessage) -> bool {
    match message.header(CONTENT_ENCODING) {
        None => true,
        Some(value) => value
            .split(',')
            .map(str::trim)
            .all(|c| c.is_empty() || c.eq_ignore_ascii_case("identity")),
    }
}
