//! Rewrite directives and the message they operate on.
//!
//! Each rewriter expresses its work as an ordered list of directives; the
//! order is fixed per direction so the same input always produces the same
//! bytes.

use crate::http::headers::{self, find_subsequence};

/// A message in the middle of being rewritten.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpMessage {
    pub header_block: Vec<u8>,
    pub body: Vec<u8>,
}

impl HttpMessage {
    pub fn new(header_block: Vec<u8>, body: Vec<u8>) -> Self {
        Self { header_block, body }
    }

    /// Header block followed by body, ready for the socket.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.header_block.len() + self.body.len());
        out.extend_from_slice(&self.header_block);
        out.extend_from_slice(&self.body);
        out
    }

    pub fn header(&self, name: &str) -> Option<String> {
        headers::find_header(&self.header_block, name).map(|h| h.value)
    }
}

/// One edit applied to a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RewriteDirective {
    /// Set the value of an existing header. No-op when absent.
    ReplaceHeader { name: String, value: String },
    /// Remove every occurrence of a header.
    RemoveHeader(String),
    /// Insert `Name: value` after the first line unless a header with that
    /// name already exists.
    InsertHeaderAfterFirstLine(String),
    /// Insert `payload` before the first occurrence of `anchor` in the body.
    InjectBeforeAnchor { anchor: Vec<u8>, payload: Vec<u8> },
    /// Set Content-Length to the current body length. Must follow any body
    /// edit.
    RecomputeContentLength,
}

impl RewriteDirective {
    pub fn replace(name: &str, value: &str) -> Self {
        RewriteDirective::ReplaceHeader {
            name: name.to_string(),
            value: value.to_string(),
        }
    }

    pub fn remove(name: &str) -> Self {
        RewriteDirective::RemoveHeader(name.to_string())
    }

    pub fn insert(name: &str, value: &str) -> Self {
        RewriteDirective::InsertHeaderAfterFirstLine(format!("{}: {}", name, value))
    }

    /// Apply to `message`; returns whether anything changed.
    pub fn apply(&self, message: &mut HttpMessage) -> bool {
        match self {
            RewriteDirective::ReplaceHeader { name, value } => {
                if headers::find_header(&message.header_block, name).is_none() {
                    return false;
                }
                message.header_block = headers::set_header(&message.header_block, name, value);
                true
            }
            RewriteDirective::RemoveHeader(name) => {
                let before = message.header_block.len();
                message.header_block = headers::remove_header(&message.header_block, name);
                message.header_block.len() != before
            }
            RewriteDirective::InsertHeaderAfterFirstLine(line) => {
                let name = line.split(':').next().unwrap_or(line).trim();
                if headers::find_header(&message.header_block, name).is_some() {
                    return false;
                }
                message.header_block = headers::insert_after_request_line(&message.header_block, line);
                true
            }
            RewriteDirective::InjectBeforeAnchor { anchor, payload } => {
                let Some(at) = find_subsequence(&message.body, anchor) else {
                    return false;
                };
                message.body.splice(at..at, payload.iter().copied());
                true
            }
            RewriteDirective::RecomputeContentLength => {
                let updated = headers::recompute_content_length(&message.header_block, message.body.len());
                let changed = updated != message.header_block;
                message.header_block = updated;
                changed
            }
        }
    }
}

/// Apply `directives` in order; returns the ones that changed something.
pub fn apply_all<'a>(
    directives: &'a [RewriteDirective],
    message: &mut HttpMessage,
) -> Vec<&'a RewriteDirective> {
    directives.iter().filter(|d| d.apply(message)).collect()
}
