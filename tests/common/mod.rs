//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use intercept_proxy::config::ProxyConfig;
use intercept_proxy::net::{ConnectionTracker, Listener};
use intercept_proxy::routing::RoutingMode;
use intercept_proxy::{ProxyServer, Shutdown};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub const PAGE: &str = "<html><body>Hi</body></html>";

/// A complete `200 OK` response carrying `body` with a Content-Length.
pub fn ok_response(body: &str) -> String {
    format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: {}\r\n\r\n{}",
        body.len(),
        body
    )
}

/// Start a mock origin that answers every request head it reads with
/// `response`, keeping connections open between requests.
///
/// Every request head it sees is sent on the returned channel.
pub async fn start_origin(response: String) -> (SocketAddr, mpsc::UnboundedReceiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let tx = tx.clone();
            let response = response.clone();
            tokio::spawn(async move {
                let mut pending = Vec::new();
                while let Some(head) = read_head(&mut socket, &mut pending).await {
                    let _ = tx.send(head);
                    if socket.write_all(response.as_bytes()).await.is_err() {
                        break;
                    }
                }
            });
        }
    });

    (addr, rx)
}

/// Start a mock origin that accepts and reads but never answers.
///
/// The returned channel yields once per connection the peer has closed.
pub async fn start_silent_origin() -> (SocketAddr, mpsc::UnboundedReceiver<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let tx = tx.clone();
            tokio::spawn(async move {
                let mut sink = Vec::new();
                let _ = socket.read_to_end(&mut sink).await;
                let _ = tx.send(());
            });
        }
    });

    (addr, rx)
}

/// An address nothing listens on.
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

/// Configuration for a proxy under test: loopback listener, no traffic log.
pub fn proxy_config(routing: RoutingMode) -> ProxyConfig {
    let mut config = ProxyConfig::default();
    config.listener.bind_address = "127.0.0.1:0".to_string();
    config.routing = routing;
    config.traffic_log.enabled = false;
    config.timeouts.connect_secs = 2;
    config.timeouts.idle_secs = 5;
    config.timeouts.shutdown_grace_secs = 1;
    config
}

/// A running proxy and the handles to steer it.
pub struct TestProxy {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
    pub updates: mpsc::UnboundedSender<ProxyConfig>,
    pub tracker: ConnectionTracker,
    pub handle: JoinHandle<std::io::Result<()>>,
}

impl TestProxy {
    pub async fn stop(self) {
        self.shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(5), self.handle)
            .await
            .expect("proxy did not stop")
            .unwrap()
            .unwrap();
    }

    /// Wait until every session has ended.
    pub async fn wait_idle(&self) -> bool {
        self.tracker.wait_for_drain(Duration::from_secs(5)).await
    }
}

pub async fn start_proxy(config: ProxyConfig) -> TestProxy {
    let listener = Listener::bind(&config.listener).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();
    let (updates, update_rx) = mpsc::unbounded_channel();

    let server = ProxyServer::new(config);
    let tracker = server.tracker();
    let handle = tokio::spawn(server.run(listener, update_rx, shutdown.subscribe()));

    TestProxy {
        addr,
        shutdown,
        updates,
        tracker,
        handle,
    }
}

/// Read one request or response head, leaving any extra bytes in `pending`.
pub async fn read_head<R: AsyncRead + Unpin>(reader: &mut R, pending: &mut Vec<u8>) -> Option<String> {
    let mut buf = [0u8; 4096];
    loop {
        if let Some(end) = find(pending, b"\r\n\r\n") {
            let head: Vec<u8> = pending.drain(..end + 4).collect();
            return Some(String::from_utf8_lossy(&head).into_owned());
        }
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => return None,
            Ok(n) => pending.extend_from_slice(&buf[..n]),
        }
    }
}

/// Read one Content-Length framed response from the proxy.
pub async fn read_response(stream: &mut TcpStream, pending: &mut Vec<u8>) -> Option<(String, String)> {
    let head = read_head(stream, pending).await?;
    let length = head
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);

    let mut buf = [0u8; 4096];
    while pending.len() < length {
        match stream.read(&mut buf).await {
            Ok(0) | Err(_) => return None,
            Ok(n) => pending.extend_from_slice(&buf[..n]),
        }
    }
    let body: Vec<u8> = pending.drain(..length).collect();
    Some((head, String::from_utf8_lossy(&body).into_owned()))
}

/// Send one request on a fresh connection and read the response.
pub async fn exchange(proxy: SocketAddr, request: &str) -> (String, String) {
    let mut stream = TcpStream::connect(proxy).await.unwrap();
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut pending = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), read_response(&mut stream, &mut pending))
        .await
        .expect("timed out waiting for response")
        .expect("connection closed before a full response")
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}
