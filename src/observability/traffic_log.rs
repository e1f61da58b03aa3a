//! Append-only log of forwarded messages.
//!
//! Both directions of every session send records over one channel to a
//! single writer task, so a record is always written whole. The queue is
//! bounded: when the disk falls behind, new records are dropped with a
//! warning. Write failures are logged and dropped; they never affect a
//! session.

use std::path::Path;

use tokio::fs::OpenOptions;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::net::ConnectionId;

/// Records queued for the writer before new ones are dropped.
pub const QUEUE_DEPTH: usize = 1024;

/// Which kind of message a record holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrafficLabel {
    Request,
    Response,
}

impl TrafficLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrafficLabel::Request => "[request]",
            TrafficLabel::Response => "[response]",
        }
    }
}

#[derive(Debug)]
struct TrafficRecord {
    connection: ConnectionId,
    label: TrafficLabel,
    bytes: Vec<u8>,
}

impl TrafficRecord {
    fn encode(&self) -> Vec<u8> {
        let head = format!("{} {}\n", self.label.as_str(), self.connection);
        let mut out = Vec::with_capacity(head.len() + self.bytes.len() + 1);
        out.extend_from_slice(head.as_bytes());
        out.extend_from_slice(&self.bytes);
        out.push(b'\n');
        out
    }
}

/// Cheap, cloneable handle to the writer task.
#[derive(Debug, Clone, Default)]
pub struct TrafficLog {
    tx: Option<mpsc::Sender<TrafficRecord>>,
}

impl TrafficLog {
    /// A log that discards everything.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Open `path` for appending and start the writer task.
    pub async fn open(path: &Path) -> std::io::Result<(Self, JoinHandle<()>)> {
        let file = OpenOptions::new().create(true).append(true).open(path).await?;
        tracing::info!(path = %path.display(), "Traffic log opened");
        Ok(Self::with_writer(file))
    }

    /// Start the writer task over any async writer.
    ///
    /// The task ends once every handle has been dropped and the queue is
    /// flushed.
    pub fn with_writer<W>(writer: W) -> (Self, JoinHandle<()>)
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        Self::with_queue_depth(writer, QUEUE_DEPTH)
    }

    pub fn with_queue_depth<W>(writer: W, depth: usize) -> (Self, JoinHandle<()>)
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(depth.max(1));
        let handle = tokio::spawn(write_records(writer, rx));
        (Self { tx: Some(tx) }, handle)
    }

    pub fn is_enabled(&self) -> bool {
        self.tx.is_some()
    }

    /// Queue one record. Returns whether it was queued.
    pub fn record(&self, connection: ConnectionId, label: TrafficLabel, bytes: &[u8]) -> bool {
        let Some(tx) = &self.tx else {
            return false;
        };
        let record = TrafficRecord {
            connection,
            label,
            bytes: bytes.to_vec(),
        };
        match tx.try_send(record) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(connection_id = %connection, label = label.as_str(), "Traffic log queue full, record dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!(connection_id = %connection, "Traffic log writer gone, record dropped");
                false
            }
        }
    }
}

async fn write_records<W>(mut writer: W, mut rx: mpsc::Receiver<TrafficRecord>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(record) = rx.recv().await {
        let encoded = record.encode();
        if let Err(e) = writer.write_all(&encoded).await {
            tracing::warn!(error = %e, connection_id = %record.connection, "Traffic log write failed");
            continue;
        }
        if let Err(e) = writer.flush().await {
            tracing::warn!(error = %e, "Traffic log flush failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_are_labeled_and_whole() {
        let path = std::env::temp_dir().join(format!("intercept-proxy-traffic-{}.log", std::process::id()));
        let _ = std::fs::remove_file(&path);

        let (log, writer) = TrafficLog::open(&path).await.unwrap();
        let id = ConnectionId::new();

        let a = log.clone();
        let b = log.clone();
        let t1 = tokio::spawn(async move {
            for _ in 0..50 {
                a.record(id, TrafficLabel::Request, b"GET / HTTP/1.1\r\n\r\n");
            }
        });
        let t2 = tokio::spawn(async move {
            for _ in 0..50 {
                b.record(id, TrafficLabel::Response, b"HTTP/1.1 204 No Content\r\n\r\n");
            }
        });
        t1.await.unwrap();
        t2.await.unwrap();
        drop(log);
        writer.await.unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let request = format!("[request] {}\nGET / HTTP/1.1\r\n\r\n\n", id);
        let response = format!("[response] {}\nHTTP/1.1 204 No Content\r\n\r\n\n", id);
        assert_eq!(text.matches(&request).count(), 50);
        assert_eq!(text.matches(&response).count(), 50);
        assert_eq!(text.len(), 50 * (request.len() + response.len()));

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn disabled_log_is_silent() {
        let log = TrafficLog::disabled();
        assert!(!log.is_enabled());
        assert!(!log.record(ConnectionId::new(), TrafficLabel::Request, b"x"));
    }

    #[tokio::test]
    async fn full_queue_drops_records() {
        // Nobody reads the other end, so the writer stalls on its first record.
        let (_reader, writer) = tokio::io::duplex(1);
        let (log, handle) = TrafficLog::with_queue_depth(writer, 2);
        let id = ConnectionId::new();

        assert!(log.record(id, TrafficLabel::Request, b"first"));
        assert!(log.record(id, TrafficLabel::Request, b"second"));
        assert!(!log.record(id, TrafficLabel::Request, b"third"));

        handle.abort();
    }
}
