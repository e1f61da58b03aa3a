//! One inbound side of a session: socket reads feeding a framer.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncRead;

use crate::error::{Direction, FramingError, ProxyError, ProxyResult};
use crate::http::{FrameLimits, FrameState, MessageFramer, MessageKind, RawMessage};
use crate::resilience::{read_with_idle_timeout, TimedRead};

/// Reads whole messages off one half of a connection.
pub struct Inbound<R> {
    reader: R,
    framer: MessageFramer,
    buf: Vec<u8>,
    idle: Option<Duration>,
    direction: Direction,
    /// Responses still owed to this side's peer; the idle deadline is not
    /// enforced while any are.
    outstanding: Option<Arc<AtomicUsize>>,
}

impl<R> Inbound<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(
        reader: R,
        kind: MessageKind,
        limits: FrameLimits,
        read_buffer: usize,
        idle: Option<Duration>,
        direction: Direction,
    ) -> Self {
        Self {
            reader,
            framer: MessageFramer::new(kind, limits),
            buf: vec![0; read_buffer.max(1)],
            idle,
            direction,
            outstanding: None,
        }
    }

    /// Suspend the idle deadline while `outstanding` is non-zero.
    pub fn with_outstanding(mut self, outstanding: Arc<AtomicUsize>) -> Self {
        self.outstanding = Some(outstanding);
        self
    }

    /// The next complete message, or `None` when the peer closed cleanly
    /// between messages.
    pub async fn next_message(&mut self) -> ProxyResult<Option<RawMessage>> {
        self.next_message_with(|_| {}).await
    }

    /// Like [`Inbound::next_message`], calling `before_framing` on the framer
    /// ahead of every framing step.
    pub async fn next_message_with<F>(&mut self, mut before_framing: F) -> ProxyResult<Option<RawMessage>>
    where
        F: FnMut(&mut MessageFramer),
    {
        let direction = self.direction;
        let framing = |e: FramingError| ProxyError::framing(direction, e);

        loop {
            before_framing(&mut self.framer);
            if self.framer.poll().map_err(framing)? == FrameState::Complete {
                return Ok(self.framer.take_message());
            }

            match read_with_idle_timeout(&mut self.reader, &mut self.buf, self.idle).await? {
                TimedRead::Data(n) => {
                    before_framing(&mut self.framer);
                    let state = self.framer.feed(&self.buf[..n]).map_err(framing)?;
                    tracing::trace!(direction = %direction, bytes = n, state = ?state, "Read");
                }
                TimedRead::Eof => {
                    if self.framer.is_idle() {
                        return Ok(None);
                    }
                    return match self.framer.close().map_err(framing)? {
                        FrameState::Complete => Ok(self.framer.take_message()),
                        _ => Err(framing(FramingError::Truncated)),
                    };
                }
                TimedRead::Idle if self.awaiting_responses() => {
                    tracing::trace!(direction = %direction, "Idle while a response is outstanding");
                }
                TimedRead::Idle => {
                    return Err(ProxyError::IdleTimeout {
                        direction,
                        after: self.idle.unwrap_or_default(),
                    })
                }
            }
        }
    }

    fn awaiting_responses(&self) -> bool {
        self.outstanding
            .as_ref()
            .is_some_and(|n| n.load(Ordering::SeqCst) > 0)
    }

    /// Whether the message in progress got as far as its header terminator.
    pub fn has_header(&self) -> bool {
        self.framer.has_header()
    }

    /// Everything buffered but not framed.
    pub fn take_unframed(&mut self) -> Vec<u8> {
        self.framer.take_unframed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    fn inbound<R: AsyncRead + Unpin>(reader: R, kind: MessageKind) -> Inbound<R> {
        Inbound::new(
            reader,
            kind,
            FrameLimits::default(),
            4,
            Some(Duration::from_secs(2)),
            Direction::Upstream,
        )
    }

    #[tokio::test]
    async fn frames_messages_split_across_tiny_reads() {
        let (mut tx, rx) = tokio::io::duplex(8);
        let writer = tokio::spawn(async move {
            for byte in b"POST / HTTP/1.1\r\nContent-Length: 3\r\n\r\nabcGET /2 HTTP/1.1\r\n\r\n" {
                tx.write_all(&[*byte]).await.unwrap();
            }
        });

        let mut inbound = inbound(rx, MessageKind::Request);
        let first = inbound.next_message().await.unwrap().unwrap();
        assert_eq!(first.body, b"abc");
        let second = inbound.next_message().await.unwrap().unwrap();
        assert_eq!(second.start_line(), "GET /2 HTTP/1.1");

        writer.await.unwrap();
        assert!(inbound.next_message().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn truncated_message_is_an_error() {
        let (mut tx, rx) = tokio::io::duplex(64);
        tx.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\nabc").await.unwrap();
        drop(tx);

        let mut inbound = inbound(rx, MessageKind::Response);
        let err = inbound.next_message().await.unwrap_err();
        assert!(matches!(
            err,
            ProxyError::Framing {
                source: FramingError::Truncated,
                ..
            }
        ));
        assert!(inbound.has_header());
    }

    #[tokio::test]
    async fn outstanding_responses_suspend_idle_deadline() {
        let (mut tx, rx) = tokio::io::duplex(64);
        let outstanding = Arc::new(AtomicUsize::new(1));
        let mut inbound = Inbound::new(
            rx,
            MessageKind::Request,
            FrameLimits::default(),
            64,
            Some(Duration::from_millis(20)),
            Direction::Upstream,
        )
        .with_outstanding(Arc::clone(&outstanding));

        let writer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            tx.write_all(b"GET /late HTTP/1.1\r\n\r\n").await.unwrap();
            tx
        });
        let request = inbound.next_message().await.unwrap().unwrap();
        assert_eq!(request.start_line(), "GET /late HTTP/1.1");
        let _tx = writer.await.unwrap();

        outstanding.store(0, Ordering::SeqCst);
        assert!(matches!(
            inbound.next_message().await,
            Err(ProxyError::IdleTimeout { .. })
        ));
    }

    #[tokio::test]
    async fn hook_runs_before_framing() {
        let (mut tx, rx) = tokio::io::duplex(64);
        tx.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\n").await.unwrap();

        let mut inbound = inbound(rx, MessageKind::Response);
        let response = inbound
            .next_message_with(|framer| framer.expect_no_body())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(response.framing, crate::http::BodyFraming::Empty);
    }

    #[tokio::test]
    async fn idle_peer_times_out() {
        let (_tx, rx) = tokio::io::duplex(64);
        let mut inbound = Inbound::new(
            rx,
            MessageKind::Request,
            FrameLimits::default(),
            64,
            Some(Duration::from_millis(20)),
            Direction::Upstream,
        );
        assert!(matches!(
            inbound.next_message().await,
            Err(ProxyError::IdleTimeout { .. })
        ));
    }
}
