//! Message framing over an arbitrary byte stream.
//!
//! # Responsibilities
//! - Accumulate bytes until the header terminator is seen
//! - Derive body framing from Content-Length / Transfer-Encoding
//! - Report how much more is needed, or that a message is complete
//! - Keep bytes past the end of a message for the next one
//!
//! # Design Decisions
//! - The header block is frozen once found; only the body grows
//! - Chunked wins over Content-Length
//! - A response without any length is complete when the peer closes
//! - A request without any length has no body

use bytes::BytesMut;

use crate::error::FramingError;
use crate::http::chunked::{ChunkProgress, ChunkedDecoder};
use crate::http::headers::{self, HeaderLine, HEADER_TERMINATOR};

/// Whether the framer reads requests or responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Request,
    Response,
}

/// How the end of a body is found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFraming {
    /// Exactly `n` bytes follow the header block.
    ContentLength(usize),
    /// Chunked transfer coding.
    Chunked,
    /// Everything until the peer closes the connection.
    UntilClose,
    /// No body.
    Empty,
}

/// Framer progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    NeedMoreHeaderData,
    /// More body bytes are required; the count is known only for
    /// Content-Length framing.
    NeedMoreBodyData(Option<usize>),
    Complete,
    ConnectionClosedMidMessage,
}

/// Size limits applied while framing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLimits {
    pub max_header_bytes: usize,
    pub max_body_bytes: usize,
}

impl Default for FrameLimits {
    fn default() -> Self {
        Self {
            max_header_bytes: 64 * 1024,
            max_body_bytes: 16 * 1024 * 1024,
        }
    }
}

/// One complete message as received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    /// Bytes through the terminating blank line.
    pub header_block: Vec<u8>,
    /// Body bytes exactly as they came off the wire.
    pub body: Vec<u8>,
    pub framing: BodyFraming,
    /// Dechunked body, present for chunked messages only.
    pub decoded: Option<Vec<u8>>,
}

impl RawMessage {
    /// Whether this is a HEAD request, whose response carries no body.
    pub fn is_head_request(&self) -> bool {
        headers::start_line(&self.header_block).starts_with(b"HEAD ")
    }

    pub fn start_line(&self) -> String {
        String::from_utf8_lossy(headers::start_line(&self.header_block)).into_owned()
    }
}

/// Incremental framer for one direction of one connection.
#[derive(Debug)]
pub struct MessageFramer {
    kind: MessageKind,
    limits: FrameLimits,
    buf: BytesMut,
    /// Bytes already searched for the terminator.
    scanned: usize,
    header_len: Option<usize>,
    framing: Option<BodyFraming>,
    chunked: Option<ChunkedDecoder>,
    /// Total length of the buffered message once complete.
    complete_at: Option<usize>,
    /// The message in progress has no body regardless of its headers.
    no_body: bool,
    closed: bool,
}

impl MessageFramer {
    pub fn new(kind: MessageKind, limits: FrameLimits) -> Self {
        Self {
            kind,
            limits,
            buf: BytesMut::with_capacity(8 * 1024),
            scanned: 0,
            header_len: None,
            framing: None,
            chunked: None,
            complete_at: None,
            no_body: false,
            closed: false,
        }
    }

    /// Append bytes and report progress.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<FrameState, FramingError> {
        self.buf.extend_from_slice(bytes);
        self.poll()
    }

    /// Report progress on what is already buffered.
    pub fn poll(&mut self) -> Result<FrameState, FramingError> {
        if self.complete_at.is_some() {
            return Ok(FrameState::Complete);
        }

        let header_len = match self.header_len {
            Some(len) => len,
            None => match self.find_header_end()? {
                Some(len) => len,
                None if self.closed => return Ok(FrameState::ConnectionClosedMidMessage),
                None => return Ok(FrameState::NeedMoreHeaderData),
            },
        };

        let framing = match self.framing {
            Some(framing) => framing,
            None => {
                let framing = if self.no_body {
                    BodyFraming::Empty
                } else {
                    body_framing(self.kind, &self.buf[..header_len])?
                };
                if framing == BodyFraming::Chunked {
                    self.chunked = Some(ChunkedDecoder::new());
                }
                self.framing = Some(framing);
                framing
            }
        };

        let have = self.buf.len() - header_len;
        let state = match framing {
            BodyFraming::Empty => {
                self.complete_at = Some(header_len);
                FrameState::Complete
            }
            BodyFraming::ContentLength(n) => {
                if n > self.limits.max_body_bytes {
                    return Err(FramingError::BodyTooLarge {
                        limit: self.limits.max_body_bytes,
                    });
                }
                if have >= n {
                    self.complete_at = Some(header_len + n);
                    FrameState::Complete
                } else {
                    FrameState::NeedMoreBodyData(Some(n - have))
                }
            }
            BodyFraming::UntilClose => {
                if have > self.limits.max_body_bytes {
                    return Err(FramingError::BodyTooLarge {
                        limit: self.limits.max_body_bytes,
                    });
                }
                if self.closed {
                    self.complete_at = Some(self.buf.len());
                    FrameState::Complete
                } else {
                    FrameState::NeedMoreBodyData(None)
                }
            }
            BodyFraming::Chunked => {
                let decoder = self.chunked.get_or_insert_with(ChunkedDecoder::new);
                let progress = decoder.decode(&self.buf[header_len..])?;
                if decoder.decoded_len() > self.limits.max_body_bytes {
                    return Err(FramingError::BodyTooLarge {
                        limit: self.limits.max_body_bytes,
                    });
                }
                match progress {
                    ChunkProgress::Done { consumed } => {
                        self.complete_at = Some(header_len + consumed);
                        FrameState::Complete
                    }
                    ChunkProgress::NeedMore => FrameState::NeedMoreBodyData(None),
                }
            }
        };

        if state != FrameState::Complete && self.closed {
            return Ok(FrameState::ConnectionClosedMidMessage);
        }
        Ok(state)
    }

    /// Treat the message in progress as bodiless, as a response to HEAD is.
    /// Has no effect once its header block has been framed.
    pub fn expect_no_body(&mut self) {
        if self.framing.is_none() {
            self.no_body = true;
        }
    }

    /// Record that the peer closed its side and report the final state.
    pub fn close(&mut self) -> Result<FrameState, FramingError> {
        self.closed = true;
        if self.is_idle() {
            return Ok(FrameState::ConnectionClosedMidMessage);
        }
        self.poll()
    }

    /// Nothing is buffered: the stream sits between messages.
    pub fn is_idle(&self) -> bool {
        self.buf.is_empty() && self.header_len.is_none()
    }

    /// Whether the header terminator of the current message has been seen.
    pub fn has_header(&self) -> bool {
        self.header_len.is_some()
    }

    /// Remove the completed message, keeping any following bytes buffered.
    pub fn take_message(&mut self) -> Option<RawMessage> {
        let total = self.complete_at?;
        let header_len = self.header_len?;
        let framing = self.framing?;

        let mut message = self.buf.split_to(total);
        let header_block = message.split_to(header_len).to_vec();
        let body = message.to_vec();
        let decoded = self.chunked.take().map(ChunkedDecoder::into_decoded);

        self.reset();
        Some(RawMessage {
            header_block,
            body,
            framing,
            decoded,
        })
    }

    /// Drain everything buffered, framed or not.
    pub fn take_unframed(&mut self) -> Vec<u8> {
        let raw = self.buf.split().to_vec();
        self.reset();
        raw
    }

    fn reset(&mut self) {
        self.scanned = 0;
        self.header_len = None;
        self.framing = None;
        self.chunked = None;
        self.complete_at = None;
        self.no_body = false;
    }

    fn find_header_end(&mut self) -> Result<Option<usize>, FramingError> {
        // Resume a few bytes back in case the terminator straddled two reads.
        let from = self.scanned.saturating_sub(HEADER_TERMINATOR.len() - 1);
        match headers::find_subsequence(&self.buf[from..], HEADER_TERMINATOR) {
            Some(i) => {
                let len = from + i + HEADER_TERMINATOR.len();
                if len > self.limits.max_header_bytes {
                    return Err(FramingError::HeadersTooLarge {
                        limit: self.limits.max_header_bytes,
                    });
                }
                self.header_len = Some(len);
                Ok(Some(len))
            }
            None => {
                if self.buf.len() > self.limits.max_header_bytes {
                    return Err(FramingError::HeadersTooLarge {
                        limit: self.limits.max_header_bytes,
                    });
                }
                self.scanned = self.buf.len();
                Ok(None)
            }
        }
    }
}

/// Determine body framing from a complete header block.
pub fn body_framing(kind: MessageKind, block: &[u8]) -> Result<BodyFraming, FramingError> {
    if kind == MessageKind::Response {
        if let Some(status) = status_code(block) {
            if (100..200).contains(&status) || status == 204 || status == 304 {
                return Ok(BodyFraming::Empty);
            }
        }
    }

    let fields = headers::parse_headers(block);

    // Only a final "chunked" delimits the body.
    if headers::transfer_codings(block).last().is_some_and(|c| c == "chunked") {
        return Ok(BodyFraming::Chunked);
    }

    if let Some(length) = content_length(&fields)? {
        return Ok(BodyFraming::ContentLength(length));
    }

    Ok(match kind {
        MessageKind::Request => BodyFraming::Empty,
        MessageKind::Response => BodyFraming::UntilClose,
    })
}

/// The single Content-Length value, if any.
fn content_length(fields: &[HeaderLine]) -> Result<Option<usize>, FramingError> {
    let mut length = None;
    for field in fields.iter().filter(|h| h.is(headers::CONTENT_LENGTH)) {
        // A list like "5, 5" is tolerated as long as every entry agrees.
        for raw in field.value.split(',') {
            let raw = raw.trim();
            if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
                return Err(FramingError::InvalidContentLength(field.value.clone()));
            }
            let value: usize = raw
                .parse()
                .map_err(|_| FramingError::InvalidContentLength(field.value.clone()))?;
            match length {
                Some(existing) if existing != value => {
                    return Err(FramingError::ConflictingContentLength)
                }
                _ => length = Some(value),
            }
        }
    }
    Ok(length)
}

/// Status code of a response status line.
pub fn status_code(block: &[u8]) -> Option<u16> {
    let line = headers::start_line(block);
    let mut parts = line.split(|&b| b == b' ').filter(|p| !p.is_empty());
    let version = parts.next()?;
    if !version.starts_with(b"HTTP/") {
        return None;
    }
    std::str::from_utf8(parts.next()?).ok()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn framer(kind: MessageKind) -> MessageFramer {
        MessageFramer::new(kind, FrameLimits::default())
    }

    #[test]
    fn waits_for_header_terminator() {
        let mut f = framer(MessageKind::Request);
        assert_eq!(f.feed(b"GET / HTTP/1.1\r\nHost: a").unwrap(), FrameState::NeedMoreHeaderData);
        assert_eq!(f.feed(b"\r\n\r").unwrap(), FrameState::NeedMoreHeaderData);
        assert_eq!(f.feed(b"\n").unwrap(), FrameState::Complete);

        let msg = f.take_message().unwrap();
        assert_eq!(msg.header_block, b"GET / HTTP/1.1\r\nHost: a\r\n\r\n");
        assert!(msg.body.is_empty());
        assert_eq!(msg.framing, BodyFraming::Empty);
        assert!(f.is_idle());
    }

    #[test]
    fn content_length_body_across_reads() {
        let mut f = framer(MessageKind::Response);
        assert_eq!(
            f.feed(b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\nhello").unwrap(),
            FrameState::NeedMoreBodyData(Some(5))
        );
        assert_eq!(f.feed(b"world").unwrap(), FrameState::Complete);
        let msg = f.take_message().unwrap();
        assert_eq!(msg.body, b"helloworld");
        assert_eq!(msg.framing, BodyFraming::ContentLength(10));
    }

    #[test]
    fn keeps_bytes_after_message() {
        let mut f = framer(MessageKind::Request);
        let two = b"POST /a HTTP/1.1\r\nContent-Length: 2\r\n\r\nokGET /b HTTP/1.1\r\n\r\n";
        assert_eq!(f.feed(two).unwrap(), FrameState::Complete);
        assert_eq!(f.take_message().unwrap().body, b"ok");

        assert_eq!(f.poll().unwrap(), FrameState::Complete);
        let second = f.take_message().unwrap();
        assert_eq!(second.start_line(), "GET /b HTTP/1.1");
        assert!(f.is_idle());
    }

    #[test]
    fn malformed_content_length_is_fatal() {
        let mut f = framer(MessageKind::Response);
        assert_eq!(
            f.feed(b"HTTP/1.1 200 OK\r\nContent-Length: abc\r\n\r\n"),
            Err(FramingError::InvalidContentLength("abc".into()))
        );

        let mut f = framer(MessageKind::Response);
        assert_eq!(
            f.feed(b"HTTP/1.1 200 OK\r\nContent-Length: -1\r\n\r\n"),
            Err(FramingError::InvalidContentLength("-1".into()))
        );
    }

    #[test]
    fn conflicting_content_length_is_fatal() {
        let mut f = framer(MessageKind::Response);
        assert_eq!(
            f.feed(b"HTTP/1.1 200 OK\r\nContent-Length: 1\r\nContent-Length: 2\r\n\r\n"),
            Err(FramingError::ConflictingContentLength)
        );
    }

    #[test]
    fn response_without_length_completes_on_close() {
        let mut f = framer(MessageKind::Response);
        assert_eq!(
            f.feed(b"HTTP/1.0 200 OK\r\n\r\nsome body").unwrap(),
            FrameState::NeedMoreBodyData(None)
        );
        assert_eq!(f.feed(b" more").unwrap(), FrameState::NeedMoreBodyData(None));
        assert_eq!(f.close().unwrap(), FrameState::Complete);
        let msg = f.take_message().unwrap();
        assert_eq!(msg.body, b"some body more");
        assert_eq!(msg.framing, BodyFraming::UntilClose);
    }

    #[test]
    fn chunked_response_is_decoded() {
        let mut f = framer(MessageKind::Response);
        let head = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\nContent-Length: 99\r\n\r\n";
        assert_eq!(f.feed(head).unwrap(), FrameState::NeedMoreBodyData(None));
        assert_eq!(f.feed(b"3\r\nabc\r\n").unwrap(), FrameState::NeedMoreBodyData(None));
        assert_eq!(f.feed(b"0\r\n\r\n").unwrap(), FrameState::Complete);

        let msg = f.take_message().unwrap();
        assert_eq!(msg.framing, BodyFraming::Chunked);
        assert_eq!(msg.body, b"3\r\nabc\r\n0\r\n\r\n");
        assert_eq!(msg.decoded.as_deref(), Some(b"abc".as_slice()));
    }

    #[test]
    fn head_response_has_no_body() {
        let mut f = framer(MessageKind::Response);
        f.expect_no_body();
        let state = f
            .feed(b"HTTP/1.1 200 OK\r\nContent-Length: 28\r\n\r\nHTTP/1.1 204 No Content\r\n\r\n")
            .unwrap();
        assert_eq!(state, FrameState::Complete);

        let msg = f.take_message().unwrap();
        assert_eq!(msg.framing, BodyFraming::Empty);
        assert!(msg.body.is_empty());

        // The expectation covers one message only.
        assert_eq!(f.poll().unwrap(), FrameState::Complete);
        assert_eq!(f.take_message().unwrap().start_line(), "HTTP/1.1 204 No Content");
        f.feed(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\n").unwrap();
        assert_eq!(f.poll().unwrap(), FrameState::NeedMoreBodyData(Some(2)));
    }

    #[test]
    fn detects_head_requests() {
        let mut f = framer(MessageKind::Request);
        f.feed(b"HEAD / HTTP/1.1\r\nHost: a\r\n\r\nGET / HTTP/1.1\r\n\r\n").unwrap();
        assert!(f.take_message().unwrap().is_head_request());
        f.poll().unwrap();
        assert!(!f.take_message().unwrap().is_head_request());
    }

    #[test]
    fn interim_and_bodiless_statuses() {
        let mut f = framer(MessageKind::Response);
        let bytes = b"HTTP/1.1 100 Continue\r\n\r\nHTTP/1.1 304 Not Modified\r\nETag: x\r\n\r\n";
        assert_eq!(f.feed(bytes).unwrap(), FrameState::Complete);
        assert_eq!(f.take_message().unwrap().framing, BodyFraming::Empty);
        assert_eq!(f.poll().unwrap(), FrameState::Complete);
        assert_eq!(f.take_message().unwrap().start_line(), "HTTP/1.1 304 Not Modified");
    }

    #[test]
    fn close_mid_message() {
        let mut f = framer(MessageKind::Response);
        f.feed(b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\nabc").unwrap();
        assert_eq!(f.close().unwrap(), FrameState::ConnectionClosedMidMessage);

        let mut f = framer(MessageKind::Response);
        f.feed(b"HTTP/1.1 200 OK\r\nServer").unwrap();
        assert_eq!(f.close().unwrap(), FrameState::ConnectionClosedMidMessage);
        assert!(!f.has_header());
        assert_eq!(f.take_unframed(), b"HTTP/1.1 200 OK\r\nServer");
    }

    #[test]
    fn header_limit() {
        let mut f = MessageFramer::new(
            MessageKind::Request,
            FrameLimits {
                max_header_bytes: 16,
                max_body_bytes: 16,
            },
        );
        assert_eq!(
            f.feed(b"GET /a-very-long-path HTTP/1.1\r\n"),
            Err(FramingError::HeadersTooLarge { limit: 16 })
        );
    }

    #[test]
    fn parses_status_codes() {
        assert_eq!(status_code(b"HTTP/1.1 404 Not Found\r\n\r\n"), Some(404));
        assert_eq!(status_code(b"GET / HTTP/1.1\r\n\r\n"), None);
    }
}
