//! Timeout enforcement.
//!
//! # Responsibilities
//! - Bound every socket read by the session idle timeout
//! - Report idleness distinctly from EOF and I/O errors
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities
//! - An idle timeout of `None` waits forever
//! - The client side of a session ignores the deadline while it is owed a
//!   response; only the upstream side times out a slow origin

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};

/// Outcome of one bounded read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimedRead {
    Data(usize),
    Eof,
    Idle,
}

/// Read once into `buf`, giving up after `idle`.
pub async fn read_with_idle_timeout<R>(
    reader: &mut R,
    buf: &mut [u8],
    idle: Option<Duration>,
) -> std::io::Result<TimedRead>
where
    R: AsyncRead + Unpin,
{
    let read = reader.read(buf);
    let n = match idle {
        Some(limit) => match tokio::time::timeout(limit, read).await {
            Ok(result) => result?,
            Err(_) => return Ok(TimedRead::Idle),
        },
        None => read.await?,
    };

    Ok(if n == 0 { TimedRead::Eof } else { TimedRead::Data(n) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn data_eof_and_idle() {
        let (mut a, mut b) = tokio::io::duplex(64);
        let mut buf = [0u8; 16];

        b.write_all(b"hi").await.unwrap();
        assert_eq!(
            read_with_idle_timeout(&mut a, &mut buf, Some(Duration::from_secs(1))).await.unwrap(),
            TimedRead::Data(2)
        );

        assert_eq!(
            read_with_idle_timeout(&mut a, &mut buf, Some(Duration::from_millis(20))).await.unwrap(),
            TimedRead::Idle
        );

        drop(b);
        assert_eq!(
            read_with_idle_timeout(&mut a, &mut buf, None).await.unwrap(),
            TimedRead::Eof
        );
    }
}
