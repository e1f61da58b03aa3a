//! One client connection from accept to close.
//!
//! # Responsibilities
//! - Frame the first request and pick the upstream from it
//! - Open the upstream connection
//! - Run both directions concurrently, rewriting every message
//! - Tear the whole session down when either direction ends
//!
//! # Data Flow
//! ```text
//! Accepted → Routing (first request framed, destination resolved)
//!          → Forwarding (client→upstream and upstream→client in parallel)
//!          → Closed (either direction ended, the other is cancelled)
//! ```
//!
//! # Design Decisions
//! - A session owns both sockets; dropping a direction's future closes its halves
//! - The first direction to finish flips a watch flag the other one waits on
//! - Routing failures close the client without a response
//! - Each forwarded request queues whether its response has a body (HEAD);
//!   the response side takes one entry per final response
//! - The client may sit idle past the idle timeout while a response is owed

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch};
use tracing::Instrument;

use crate::config::ProxyConfig;
use crate::error::{Direction, FramingError, ProxyError, ProxyResult};
use crate::http::framer::status_code;
use crate::http::{
    BodyFraming, FrameLimits, MessageKind, RawMessage, RequestRewriter, ResponseRewriter,
};
use crate::net::ConnectionId;
use crate::observability::{metrics, TrafficLabel, TrafficLog};
use crate::relay::pipe::Inbound;
use crate::routing::{resolver, Destination, RoutingMode};

/// Where a session is in its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Accepted,
    Routing,
    Forwarding,
    Closed,
}

/// Why one direction of a session stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectionEnd {
    /// The reading peer closed its side.
    PeerClosed,
    /// The other direction finished first.
    Terminated,
    /// A later request asked for a different upstream.
    Rerouted,
}

/// Everything a session needs from configuration, shared between sessions.
#[derive(Debug)]
pub struct SessionContext {
    pub routing: RoutingMode,
    pub requests: RequestRewriter,
    pub responses: ResponseRewriter,
    pub traffic: TrafficLog,
    pub limits: FrameLimits,
    pub read_buffer: usize,
    pub connect_timeout: Duration,
    pub idle_timeout: Option<Duration>,
}

impl SessionContext {
    pub fn from_config(config: &ProxyConfig, traffic: TrafficLog) -> Self {
        Self {
            routing: config.routing.clone(),
            requests: RequestRewriter::new(&config.routing),
            responses: ResponseRewriter::new(&config.injection),
            traffic,
            limits: config.limits.frame_limits(),
            read_buffer: config.limits.read_buffer_bytes,
            connect_timeout: config.timeouts.connect(),
            idle_timeout: config.timeouts.idle(),
        }
    }
}

/// A single proxied client connection.
pub struct RelaySession {
    id: ConnectionId,
    peer: SocketAddr,
    ctx: Arc<SessionContext>,
    state: SessionState,
}

impl RelaySession {
    pub fn new(id: ConnectionId, peer: SocketAddr, ctx: Arc<SessionContext>) -> Self {
        Self {
            id,
            peer,
            ctx,
            state: SessionState::Accepted,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Drive the session over `client` until both directions are done.
    ///
    /// Errors are logged and counted here; callers only need the result
    /// for tests.
    pub async fn run<S>(mut self, client: S) -> ProxyResult<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let span = tracing::info_span!("session", connection_id = %self.id, peer_addr = %self.peer);
        async move {
            metrics::record_session_opened();
            let result = self.relay(client).await;
            self.transition(SessionState::Closed);

            match &result {
                Ok(()) => {
                    metrics::record_session_closed("closed");
                    tracing::debug!("Session closed");
                }
                Err(ProxyError::Routing(e)) => {
                    metrics::record_session_closed("routing");
                    metrics::record_routing_failure(e.reason());
                    tracing::warn!(error = %e, "Routing failed, closing client");
                }
                Err(e) => {
                    metrics::record_session_closed(e.kind());
                    tracing::warn!(error = %e, kind = e.kind(), "Session aborted");
                }
            }
            result
        }
        .instrument(span)
        .await
    }

    fn transition(&mut self, next: SessionState) {
        tracing::trace!(from = ?self.state, to = ?next, "Session state");
        self.state = next;
    }

    async fn relay<S>(&mut self, client: S) -> ProxyResult<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let ctx = Arc::clone(&self.ctx);
        let outstanding = Arc::new(AtomicUsize::new(0));
        let (client_rd, client_wr) = tokio::io::split(client);
        let mut requests = Inbound::new(
            client_rd,
            MessageKind::Request,
            ctx.limits,
            ctx.read_buffer,
            ctx.idle_timeout,
            Direction::Upstream,
        )
        .with_outstanding(Arc::clone(&outstanding));

        self.transition(SessionState::Routing);
        let Some(first) = requests.next_message().await? else {
            tracing::debug!("Client closed before sending a request");
            return Ok(());
        };

        let destination = ctx.routing.destination(&first.header_block)?;
        tracing::info!(request = %first.start_line(), destination = %destination, "Routing request");
        let upstream = resolver::connect(&destination, ctx.connect_timeout).await?;
        let (upstream_rd, upstream_wr) = upstream.into_split();

        self.transition(SessionState::Forwarding);
        let responses = Inbound::new(
            upstream_rd,
            MessageKind::Response,
            ctx.limits,
            ctx.read_buffer,
            ctx.idle_timeout,
            Direction::Downstream,
        );

        let (expect_tx, expect_rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = watch::channel(false);
        let upstream_half = until_stopped(
            pump_requests(
                RequestSide {
                    id: self.id,
                    ctx: &ctx,
                    destination: &destination,
                    expectations: expect_tx,
                    outstanding: &outstanding,
                },
                first,
                requests,
                upstream_wr,
            ),
            stop_rx.clone(),
            &stop_tx,
        );
        let downstream_half = until_stopped(
            pump_responses(
                ResponseSide {
                    id: self.id,
                    ctx: &ctx,
                    expectations: expect_rx,
                    outstanding: &outstanding,
                },
                responses,
                client_wr,
            ),
            stop_rx,
            &stop_tx,
        );

        let (up, down) = tokio::join!(upstream_half, downstream_half);
        let (up, down) = (up?, down?);
        tracing::debug!(upstream = ?up, downstream = ?down, "Both directions finished");
        Ok(())
    }
}

/// Run `pump` until it finishes or the other direction does.
async fn until_stopped<F>(
    pump: F,
    mut stop: watch::Receiver<bool>,
    stop_tx: &watch::Sender<bool>,
) -> ProxyResult<DirectionEnd>
where
    F: Future<Output = ProxyResult<DirectionEnd>>,
{
    let result = tokio::select! {
        biased;
        result = pump => result,
        _ = stop.wait_for(|stopped| *stopped) => Ok(DirectionEnd::Terminated),
    };
    stop_tx.send_replace(true);
    result
}

/// What the client→upstream direction shares with the rest of the session.
struct RequestSide<'a> {
    id: ConnectionId,
    ctx: &'a SessionContext,
    destination: &'a Destination,
    /// One entry per forwarded request: true when its response has no body.
    expectations: mpsc::UnboundedSender<bool>,
    outstanding: &'a AtomicUsize,
}

/// What the upstream→client direction shares with the rest of the session.
struct ResponseSide<'a> {
    id: ConnectionId,
    ctx: &'a SessionContext,
    expectations: mpsc::UnboundedReceiver<bool>,
    outstanding: &'a AtomicUsize,
}

async fn pump_requests<R, W>(
    side: RequestSide<'_>,
    first: RawMessage,
    mut inbound: Inbound<R>,
    mut upstream: W,
) -> ProxyResult<DirectionEnd>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let (id, ctx, destination) = (side.id, side.ctx, side.destination);
    let mut pending = Some(first);
    loop {
        let request = match pending.take() {
            Some(request) => request,
            None => match inbound.next_message().await? {
                Some(request) => request,
                None => {
                    tracing::debug!("Client closed connection");
                    return Ok(DirectionEnd::PeerClosed);
                }
            },
        };

        if ctx.routing.is_transparent() {
            match ctx.routing.destination(&request.header_block) {
                Ok(next) if next == *destination => {}
                Ok(next) => {
                    tracing::debug!(destination = %next, "Request for another upstream, ending session");
                    return Ok(DirectionEnd::Rerouted);
                }
                Err(e) => return Err(e.into()),
            }
        }

        let line = request.start_line();
        let no_body = request.is_head_request();
        let bytes = ctx.requests.rewrite(request).to_bytes();

        // Queued before the write so the expectation exists before any
        // response byte can.
        side.outstanding.fetch_add(1, Ordering::SeqCst);
        let _ = side.expectations.send(no_body);
        upstream.write_all(&bytes).await?;
        upstream.flush().await?;

        ctx.traffic.record(id, TrafficLabel::Request, &bytes);
        metrics::record_message(Direction::Upstream.as_str());
        tracing::debug!(request = %line, bytes = bytes.len(), "Request forwarded");
    }
}

async fn pump_responses<R, W>(
    mut side: ResponseSide<'_>,
    mut inbound: Inbound<R>,
    mut client: W,
) -> ProxyResult<DirectionEnd>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let (id, ctx) = (side.id, side.ctx);
    // Whether the response in progress answers a HEAD; None until the
    // matching request has been taken off the queue.
    let mut no_body: Option<bool> = None;

    loop {
        let next = inbound
            .next_message_with(|framer| {
                if no_body.is_none() {
                    no_body = side.expectations.try_recv().ok();
                }
                if no_body == Some(true) {
                    framer.expect_no_body();
                }
            })
            .await;
        let response = match next {
            Ok(Some(response)) => response,
            Ok(None) => {
                tracing::debug!("Upstream closed connection");
                return Ok(DirectionEnd::PeerClosed);
            }
            Err(ProxyError::Framing {
                source: FramingError::Truncated,
                ..
            }) if !inbound.has_header() => {
                let raw = inbound.take_unframed();
                tracing::warn!(bytes = raw.len(), "Upstream closed inside a header block, forwarding it unmodified");
                client.write_all(&raw).await?;
                client.flush().await?;
                ctx.traffic.record(id, TrafficLabel::Response, &raw);
                return Ok(DirectionEnd::PeerClosed);
            }
            Err(e) => return Err(e),
        };

        let status = response.start_line();
        let until_close = response.framing == BodyFraming::UntilClose;
        let interim = status_code(&response.header_block)
            .is_some_and(|code| (100..200).contains(&code) && code != 101);
        let rewritten = ctx.responses.rewrite(response);
        if rewritten.injected {
            metrics::record_injection();
            tracing::info!(status = %status, "Marker injected");
        }

        let bytes = rewritten.message.to_bytes();
        ctx.traffic.record(id, TrafficLabel::Response, &bytes);
        client.write_all(&bytes).await?;
        client.flush().await?;

        if !interim {
            no_body = None;
            let _ = side
                .outstanding
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        }

        metrics::record_message(Direction::Downstream.as_str());
        tracing::debug!(
            status = %status,
            bytes = bytes.len(),
            dechunked = rewritten.dechunked,
            "Response forwarded"
        );

        if until_close {
            return Ok(DirectionEnd::PeerClosed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InjectionConfig;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    fn context(routing: RoutingMode) -> Arc<SessionContext> {
        let mut config = ProxyConfig::default();
        config.routing = routing;
        config.timeouts.idle_secs = 5;
        Arc::new(SessionContext::from_config(&config, TrafficLog::disabled()))
    }

    fn session(ctx: Arc<SessionContext>) -> RelaySession {
        RelaySession::new(ConnectionId::new(), "127.0.0.1:1".parse().unwrap(), ctx)
    }

    #[test]
    fn context_follows_config() {
        let mut config = ProxyConfig::default();
        config.timeouts.idle_secs = 0;
        config.injection = InjectionConfig {
            enabled: false,
            ..InjectionConfig::default()
        };
        let ctx = SessionContext::from_config(&config, TrafficLog::disabled());
        assert!(ctx.idle_timeout.is_none());
        assert!(ctx.routing.is_transparent());
        assert_eq!(ctx.read_buffer, config.limits.read_buffer_bytes);
    }

    #[tokio::test]
    async fn client_closing_before_a_request_is_clean() {
        let (client, proxy_side) = tokio::io::duplex(1024);
        drop(client);
        let session = session(context(RoutingMode::Transparent));
        assert_eq!(session.state(), SessionState::Accepted);
        session.run(proxy_side).await.unwrap();
    }

    #[tokio::test]
    async fn missing_host_is_a_routing_error() {
        let (mut client, proxy_side) = tokio::io::duplex(1024);
        client.write_all(b"GET / HTTP/1.1\r\n\r\n").await.unwrap();

        let result = session(context(RoutingMode::Transparent)).run(proxy_side).await;
        assert!(matches!(result, Err(ProxyError::Routing(_))));

        let mut rest = Vec::new();
        client.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn relays_and_rewrites_one_exchange() {
        let origin = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = origin.local_addr().unwrap().port();
        let origin_task = tokio::spawn(async move {
            let (mut stream, _) = origin.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let n = stream.read(&mut buf).await.unwrap();
            let body = "<html><body>Hi</body></html>";
            let response = format!("HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n{}", body.len(), body);
            stream.write_all(response.as_bytes()).await.unwrap();
            String::from_utf8_lossy(&buf[..n]).into_owned()
        });

        let (mut client, proxy_side) = tokio::io::duplex(4096);
        let ctx = context(RoutingMode::fixed("127.0.0.1", port));
        let session = tokio::spawn(session(ctx).run(proxy_side));

        client
            .write_all(b"GET / HTTP/1.1\r\nHost: example.com\r\nIf-None-Match: \"x\"\r\n\r\n")
            .await
            .unwrap();

        let seen = origin_task.await.unwrap();
        assert!(seen.contains(&format!("Host: 127.0.0.1:{port}\r\n")));
        assert!(seen.contains("Accept-Encoding: identity\r\n"));
        assert!(!seen.contains("If-None-Match"));

        let mut received = Vec::new();
        client.read_to_end(&mut received).await.unwrap();
        let text = String::from_utf8(received).unwrap();
        assert!(text.contains("Content-Length: 80\r\n"));
        assert!(text.contains("[proxy injection worked]</h1></body>"));

        session.await.unwrap().unwrap();
    }
}
