//! Header block tokenizer and pure editing operations.
//!
//! A header block is the raw bytes of a message up to and including the
//! blank line that terminates it. Every operation here takes a block and
//! returns a new one; nothing is parsed into an owned header map, so header
//! order, casing and unrelated bytes survive a rewrite untouched.
//!
//! # Design Decisions
//! - Names match case-insensitively (RFC 9110 section 5.1)
//! - A line's span covers its CRLF and any obsolete folded continuation lines
//! - Lines without a colon are skipped, never rejected

use std::ops::Range;

pub const CRLF: &[u8] = b"\r\n";

/// Blank-line terminator separating headers from body.
pub const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

pub const CONTENT_LENGTH: &str = "Content-Length";
pub const TRANSFER_ENCODING: &str = "Transfer-Encoding";
pub const CONTENT_ENCODING: &str = "Content-Encoding";
pub const ACCEPT_ENCODING: &str = "Accept-Encoding";
pub const HOST: &str = "Host";
pub const IF_NONE_MATCH: &str = "If-None-Match";
pub const IF_MODIFIED_SINCE: &str = "If-Modified-Since";

/// One header field located in a block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderLine {
    /// Field name as the peer wrote it.
    pub name: String,
    /// Field value with surrounding whitespace trimmed. Folded
    /// continuation lines are joined with a single space.
    pub value: String,
    /// Byte span of the whole line in the block, CRLF included.
    pub span: Range<usize>,
}

impl HeaderLine {
    pub fn is(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }
}

/// Position of the first occurrence of `needle` in `haystack`.
pub fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Offset just past the first line (request line or status line).
pub fn start_line_end(block: &[u8]) -> usize {
    find_subsequence(block, CRLF)
        .map(|i| i + CRLF.len())
        .unwrap_or(block.len())
}

/// The first line without its CRLF.
pub fn start_line(block: &[u8]) -> &[u8] {
    let end = start_line_end(block);
    block[..end].strip_suffix(CRLF).unwrap_or(&block[..end])
}

/// Tokenize every header field after the first line.
pub fn parse_headers(block: &[u8]) -> Vec<HeaderLine> {
    let mut headers: Vec<HeaderLine> = Vec::new();
    let mut pos = start_line_end(block);

    while pos < block.len() {
        let (line_end, next) = match find_subsequence(&block[pos..], CRLF) {
            Some(i) => (pos + i, pos + i + CRLF.len()),
            None => (block.len(), block.len()),
        };
        let line = &block[pos..line_end];

        // Blank line: end of headers.
        if line.is_empty() {
            break;
        }

        if line[0] == b' ' || line[0] == b'\t' {
            if let Some(prev) = headers.last_mut() {
                let folded = String::from_utf8_lossy(line.trim_ascii());
                if !folded.is_empty() {
                    if !prev.value.is_empty() {
                        prev.value.push(' ');
                    }
                    prev.value.push_str(&folded);
                }
                prev.span.end = next;
            }
        } else if let Some(colon) = line.iter().position(|&b| b == b':') {
            headers.push(HeaderLine {
                name: String::from_utf8_lossy(line[..colon].trim_ascii_end()).into_owned(),
                value: String::from_utf8_lossy(line[colon + 1..].trim_ascii()).into_owned(),
                span: pos..next,
            });
        }

        pos = next;
    }

    headers
}

/// First header named `name`.
pub fn find_header(block: &[u8], name: &str) -> Option<HeaderLine> {
    parse_headers(block).into_iter().find(|h| h.is(name))
}

/// Every header named `name`, in block order.
pub fn find_all(block: &[u8], name: &str) -> Vec<HeaderLine> {
    parse_headers(block).into_iter().filter(|h| h.is(name)).collect()
}

/// Replace the line at `span` with `new_line` (given without CRLF).
pub fn replace_header_line(block: &[u8], span: Range<usize>, new_line: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(block.len() + new_line.len());
    out.extend_from_slice(&block[..span.start]);
    out.extend_from_slice(new_line.as_bytes());
    out.extend_from_slice(CRLF);
    out.extend_from_slice(&block[span.end..]);
    out
}

/// Delete the line at `span`, CRLF included.
pub fn remove_header_line(block: &[u8], span: Range<usize>) -> Vec<u8> {
    let mut out = Vec::with_capacity(block.len());
    out.extend_from_slice(&block[..span.start]);
    out.extend_from_slice(&block[span.end..]);
    out
}

/// Insert `new_line` (given without CRLF) right after the first line.
pub fn insert_after_request_line(block: &[u8], new_line: &str) -> Vec<u8> {
    let at = start_line_end(block);
    let mut out = Vec::with_capacity(block.len() + new_line.len() + CRLF.len());
    out.extend_from_slice(&block[..at]);
    out.extend_from_slice(new_line.as_bytes());
    out.extend_from_slice(CRLF);
    out.extend_from_slice(&block[at..]);
    out
}

/// Remove every header named `name`.
pub fn remove_header(block: &[u8], name: &str) -> Vec<u8> {
    // Back to front so earlier spans stay valid.
    find_all(block, name)
        .into_iter()
        .rev()
        .fold(block.to_vec(), |acc, h| remove_header_line(&acc, h.span))
}

/// Replace the first `name` header with `name: value`, dropping any
/// duplicates, or insert it after the first line when absent.
pub fn set_header(block: &[u8], name: &str, value: &str) -> Vec<u8> {
    let existing = find_all(block, name);
    let Some(first) = existing.first() else {
        return insert_after_request_line(block, &format!("{}: {}", name, value));
    };

    let mut out = existing[1..]
        .iter()
        .rev()
        .fold(block.to_vec(), |acc, h| remove_header_line(&acc, h.span.clone()));
    // Keep the peer's spelling of the name.
    let line = format!("{}: {}", first.name, value);
    out = replace_header_line(&out, first.span.clone(), &line);
    out
}

/// Replace or insert `Content-Length` with the exact body size.
pub fn recompute_content_length(block: &[u8], body_len: usize) -> Vec<u8> {
    set_header(block, CONTENT_LENGTH, &body_len.to_string())
}

/// Transfer codings named by every Transfer-Encoding header, lowercased,
/// in the order they were applied.
pub fn transfer_codings(block: &[u8]) -> Vec<String> {
    find_all(block, TRANSFER_ENCODING)
        .iter()
        .flat_map(|h| h.value.split(',').map(str::trim).filter(|c| !c.is_empty()))
        .map(str::to_ascii_lowercase)
        .collect()
}
