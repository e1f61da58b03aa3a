//! Client request rewriting.
//!
//! # Responsibilities
//! - Strip cache validators so the origin always sends a full body
//! - Point Host at the fixed target when one is configured
//! - Force `Accept-Encoding: identity` so response bodies stay searchable
//!
//! # Design Decisions
//! - Directives are planned once per session and applied per request
//! - Bodies pass through untouched, including their transfer coding

use crate::http::framer::RawMessage;
use crate::http::headers::{ACCEPT_ENCODING, HOST, IF_MODIFIED_SINCE, IF_NONE_MATCH};
use crate::http::rewrite::{apply_all, HttpMessage, RewriteDirective};
use crate::routing::RoutingMode;

pub const IDENTITY: &str = "identity";

/// Rewrites requests on their way to the origin.
#[derive(Debug, Clone)]
pub struct RequestRewriter {
    directives: Vec<RewriteDirective>,
}

impl RequestRewriter {
    pub fn new(mode: &RoutingMode) -> Self {
        let mut directives = vec![
            RewriteDirective::remove(IF_NONE_MATCH),
            RewriteDirective::remove(IF_MODIFIED_SINCE),
        ];

        if let Some(host) = mode.host_header() {
            directives.push(RewriteDirective::replace(HOST, &host));
            directives.push(RewriteDirective::insert(HOST, &host));
        }

        directives.push(RewriteDirective::replace(ACCEPT_ENCODING, IDENTITY));
        directives.push(RewriteDirective::insert(ACCEPT_ENCODING, IDENTITY));

        Self { directives }
    }

    pub fn rewrite(&self, request: RawMessage) -> HttpMessage {
        let mut message = HttpMessage::new(request.header_block, request.body);
        let applied = apply_all(&self.directives, &mut message);
        tracing::trace!(applied = applied.len(), "Request rewritten");
        message
    }
}
