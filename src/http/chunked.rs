//! Incremental decoder for `Transfer-Encoding: chunked` bodies.
//!
//! The decoder is fed the whole wire body accumulated so far and keeps its
//! own cursor, so every byte is examined once no matter how the body is
//! split across reads.

use crate::error::FramingError;
use crate::http::headers::{find_subsequence, CRLF};

/// Longest chunk-size line accepted (size plus extensions).
const MAX_SIZE_LINE: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Size,
    Data { remaining: usize },
    DataEnd,
    Trailer,
    Done,
}

/// Progress after a decode step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkProgress {
    NeedMore,
    /// The terminating chunk and trailers were seen; `consumed` wire bytes
    /// belong to this body.
    Done { consumed: usize },
}

#[derive(Debug)]
pub struct ChunkedDecoder {
    state: State,
    pos: usize,
    decoded: Vec<u8>,
}

impl ChunkedDecoder {
    pub fn new() -> Self {
        Self {
            state: State::Size,
            pos: 0,
            decoded: Vec::new(),
        }
    }

    /// Decoded payload length so far.
    pub fn decoded_len(&self) -> usize {
        self.decoded.len()
    }

    /// Continue decoding `wire`, which must extend the slice passed on the
    /// previous call.
    pub fn decode(&mut self, wire: &[u8]) -> Result<ChunkProgress, FramingError> {
        loop {
            match self.state {
                State::Size => {
                    let Some(i) = find_subsequence(&wire[self.pos..], CRLF) else {
                        if wire.len() - self.pos > MAX_SIZE_LINE {
                            return Err(FramingError::InvalidChunk("chunk size line too long"));
                        }
                        return Ok(ChunkProgress::NeedMore);
                    };
                    let line = &wire[self.pos..self.pos + i];
                    let size = parse_chunk_size(line)?;
                    self.pos += i + CRLF.len();
                    self.state = if size == 0 {
                        State::Trailer
                    } else {
                        State::Data { remaining: size }
                    };
                }
                State::Data { remaining } => {
                    let available = (wire.len() - self.pos).min(remaining);
                    self.decoded
                        .extend_from_slice(&wire[self.pos..self.pos + available]);
                    self.pos += available;
                    if available < remaining {
                        self.state = State::Data {
                            remaining: remaining - available,
                        };
                        return Ok(ChunkProgress::NeedMore);
                    }
                    self.state = State::DataEnd;
                }
                State::DataEnd => {
                    if wire.len() - self.pos < CRLF.len() {
                        return Ok(ChunkProgress::NeedMore);
                    }
                    if &wire[self.pos..self.pos + CRLF.len()] != CRLF {
                        return Err(FramingError::InvalidChunk("missing CRLF after chunk data"));
                    }
                    self.pos += CRLF.len();
                    self.state = State::Size;
                }
                State::Trailer => {
                    let Some(i) = find_subsequence(&wire[self.pos..], CRLF) else {
                        return Ok(ChunkProgress::NeedMore);
                    };
                    self.pos += i + CRLF.len();
                    // An empty line ends the trailer section.
                    if i == 0 {
                        self.state = State::Done;
                    }
                }
                State::Done => return Ok(ChunkProgress::Done { consumed: self.pos }),
            }
        }
    }

    /// The flat payload.
    pub fn into_decoded(self) -> Vec<u8> {
        self.decoded
    }
}

impl Default for ChunkedDecoder {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_chunk_size(line: &[u8]) -> Result<usize, FramingError> {
    // Chunk extensions (";name=value") are ignored.
    let size = line.split(|&b| b == b';').next().unwrap_or(line).trim_ascii();
    if size.is_empty() || !size.iter().all(u8::is_ascii_hexdigit) {
        return Err(FramingError::InvalidChunk("invalid chunk size"));
    }
    let text = std::str::from_utf8(size).map_err(|_| FramingError::InvalidChunk("invalid chunk size"))?;
    usize::from_str_radix(text, 16).map_err(|_| FramingError::InvalidChunk("chunk size overflow"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(wire: &[u8]) -> Result<Vec<u8>, FramingError> {
        let mut decoder = ChunkedDecoder::new();
        match decoder.decode(wire)? {
            ChunkProgress::Done { .. } => Ok(decoder.into_decoded()),
            ChunkProgress::NeedMore => Err(FramingError::Truncated),
        }
    }

    #[test]
    fn decodes_complete_body() {
        let wire = b"5\r\nhello\r\n7;ext=1\r\n, world\r\n0\r\n\r\n";
        assert_eq!(decode_all(wire).unwrap(), b"hello, world");
    }

    #[test]
    fn decodes_byte_by_byte() {
        let wire = b"4\r\nWiki\r\n6\r\npedia \r\nE\r\nin \r\n\r\nchunks.\r\n0\r\nX-Trailer: 1\r\n\r\nEXTRA";
        let mut decoder = ChunkedDecoder::new();
        let mut done = None;
        for end in 1..=wire.len() {
            if let ChunkProgress::Done { consumed } = decoder.decode(&wire[..end]).unwrap() {
                done = Some(consumed);
                break;
            }
        }
        assert_eq!(done, Some(wire.len() - "EXTRA".len()));
        assert_eq!(decoder.into_decoded(), b"Wikipedia in \r\n\r\nchunks.");
    }

    #[test]
    fn rejects_bad_size() {
        assert_eq!(
            decode_all(b"zz\r\nhello\r\n0\r\n\r\n"),
            Err(FramingError::InvalidChunk("invalid chunk size"))
        );
    }

    #[test]
    fn rejects_missing_data_terminator() {
        assert!(matches!(
            decode_all(b"2\r\nabXX0\r\n\r\n"),
            Err(FramingError::InvalidChunk(_))
        ));
    }

    #[test]
    fn incomplete_body_is_truncated() {
        assert_eq!(decode_all(b"5\r\nhel"), Err(FramingError::Truncated));
    }
}
