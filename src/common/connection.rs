//! # Transport Session
//!
//! A [`Connection`] owns one reliable, ordered byte stream to one server and
//! offers the two primitives the protocol is written in:
//!
//! - [`Connection::read_exact`]: returns exactly `n` bytes, accumulating
//!   partial reads, or fails with [`ClientError::ShortRead`] if the stream
//!   ends first.
//! - [`Connection::write_all`]: hands every byte to the transport, or fails
//!   with [`ClientError::ShortWrite`] if the transport stops accepting them.
//!
//! Each call runs under the session's I/O timeout. The stream is generic so
//! the same session type carries TLS in production and in-memory pipes in
//! tests. Dropping a `Connection` closes the stream.
//!
//! New sessions come from a [`Dialer`].

use std::future::Future;
use std::io::ErrorKind;
use std::time::Duration;

use log::debug;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

use super::error::{ClientError, Result};

/// Default per-call read/write deadline.
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(30);

/// Opens byte streams to named servers.
pub trait Dialer: Send + Sync + 'static {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Connect to `address` (`host:port`). Fails with
    /// [`ClientError::Connection`] on DNS, TCP or handshake failure.
    fn dial(&self, address: &str) -> impl Future<Output = Result<Self::Stream>> + Send;
}

/// One session with one server.
pub struct Connection<S> {
    stream: S,
    /// Peer label for logs
    peer: String,
    io_timeout: Duration,
    bytes_sent: u64,
    bytes_received: u64,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap an established stream.
    ///
    /// `peer` only labels log lines; `io_timeout` bounds every later call.
    pub fn new(stream: S, peer: impl Into<String>, io_timeout: Duration) -> Self {
        Self {
            stream,
            peer: peer.into(),
            io_timeout,
            bytes_sent: 0,
            bytes_received: 0,
        }
    }

    /// Dial `address` with `dialer` and wrap the stream in a session.
    ///
    /// # Errors
    ///
    /// Whatever the dialer reports, usually `ClientError::Connection` or
    /// `ClientError::Timeout`.
    pub async fn open<D>(dialer: &D, address: &str, io_timeout: Duration) -> Result<Self>
    where
        D: Dialer<Stream = S>,
    {
        let stream = dialer.dial(address).await?;
        debug!("session opened to {}", address);
        Ok(Self::new(stream, address, io_timeout))
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    /// Read exactly `n` bytes.
    pub async fn read_exact(&mut self, n: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; n];
        self.fill(&mut buf).await?;
        Ok(buf)
    }

    /// Read a fixed-size field.
    pub async fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut buf = [0u8; N];
        self.fill(&mut buf).await?;
        Ok(buf)
    }

    pub async fn read_u8(&mut self) -> Result<u8> {
        let [byte] = self.read_array::<1>().await?;
        Ok(byte)
    }

    /// Read a little-endian `u32`.
    pub async fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.read_array::<4>().await?))
    }

    /// Write every byte of `bytes` and flush.
    pub async fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        let mut written = 0;
        while written < bytes.len() {
            let result = timeout(self.io_timeout, self.stream.write(&bytes[written..])).await;
            let n = match result {
                Err(_) => return Err(self.timed_out("write")),
                Ok(Ok(n)) => n,
                Ok(Err(e)) if is_broken_pipe(e.kind()) => {
                    return Err(ClientError::ShortWrite {
                        expected: bytes.len(),
                        written,
                    })
                }
                Ok(Err(e)) => return Err(ClientError::Io(e)),
            };
            if n == 0 {
                return Err(ClientError::ShortWrite {
                    expected: bytes.len(),
                    written,
                });
            }
            written += n;
            self.bytes_sent += n as u64;
        }

        let result = timeout(self.io_timeout, self.stream.flush()).await;
        match result {
            Err(_) => Err(self.timed_out("flush")),
            Ok(result) => result.map_err(ClientError::Io),
        }
    }

    /// Gracefully close the session.
    pub async fn shutdown(mut self) -> Result<()> {
        let result = timeout(self.io_timeout, self.stream.shutdown()).await;
        match result {
            Err(_) => Err(self.timed_out("shutdown")),
            Ok(result) => result.map_err(ClientError::Io),
        }
    }

    async fn fill(&mut self, buf: &mut [u8]) -> Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            let result = timeout(self.io_timeout, self.stream.read(&mut buf[filled..])).await;
            let n = match result {
                Err(_) => return Err(self.timed_out("read")),
                Ok(Ok(n)) => n,
                // TLS reports a peer that vanished without close_notify this way
                Ok(Err(e)) if e.kind() == ErrorKind::UnexpectedEof => 0,
                Ok(Err(e)) => return Err(ClientError::Io(e)),
            };
            if n == 0 {
                return Err(ClientError::ShortRead {
                    expected: buf.len(),
                    received: filled,
                });
            }
            filled += n;
            self.bytes_received += n as u64;
        }
        Ok(())
    }

    fn timed_out(&self, operation: &'static str) -> ClientError {
        debug!("{} to {} timed out", operation, self.peer);
        ClientError::Timeout {
            operation,
            timeout: self.io_timeout,
        }
    }
}

fn is_broken_pipe(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::BrokenPipe | ErrorKind::ConnectionReset | ErrorKind::WriteZero
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_read_exact_accumulates_single_byte_chunks() {
        // a 1-byte pipe delivers every write one byte at a time
        let (client, mut server) = duplex(1);
        let payload: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
        let expected = payload.clone();

        let writer = tokio::spawn(async move {
            server.write_all(&payload).await.unwrap();
            server
        });

        let mut conn = Connection::new(client, "leader", TIMEOUT);
        let received = conn.read_exact(1000).await.unwrap();
        assert_eq!(received, expected);
        assert_eq!(conn.bytes_received(), 1000);
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn test_stream_closing_early_is_short_read() {
        let (client, mut server) = duplex(64);
        server.write_all(&[1, 2, 3]).await.unwrap();
        drop(server);

        let mut conn = Connection::new(client, "leader", TIMEOUT);
        let err = conn.read_exact(8).await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::ShortRead {
                expected: 8,
                received: 3
            }
        ));
    }

    #[tokio::test]
    async fn test_write_to_closed_peer_is_short_write() {
        let (client, server) = duplex(64);
        drop(server);

        let mut conn = Connection::new(client, "leader", TIMEOUT);
        let err = conn.write_all(&[0u8; 16]).await.unwrap_err();
        assert!(matches!(err, ClientError::ShortWrite { expected: 16, written: 0 }));
    }

    #[tokio::test]
    async fn test_write_all_through_small_pipe() {
        let (client, server) = duplex(3);
        let mut sender = Connection::new(client, "leader", TIMEOUT);
        let mut receiver = Connection::new(server, "client", TIMEOUT);

        let reader = tokio::spawn(async move { receiver.read_exact(100).await.unwrap() });
        sender.write_all(&[9u8; 100]).await.unwrap();
        assert_eq!(sender.bytes_sent(), 100);
        assert_eq!(reader.await.unwrap(), vec![9u8; 100]);
    }

    #[tokio::test]
    async fn test_read_times_out() {
        let (client, _server) = duplex(64);
        let mut conn = Connection::new(client, "leader", Duration::from_millis(50));
        let err = conn.read_u32().await.unwrap_err();
        assert!(matches!(err, ClientError::Timeout { operation: "read", .. }));
        assert_eq!(err.to_string(), "read timed out after 50ms");
    }

    #[tokio::test]
    async fn test_little_endian_integers() {
        let (client, mut server) = duplex(64);
        server.write_all(&[0x78, 0x56, 0x34, 0x12, 0xFF]).await.unwrap();

        let mut conn = Connection::new(client, "leader", TIMEOUT);
        assert_eq!(conn.read_u32().await.unwrap(), 0x1234_5678);
        assert_eq!(conn.read_u8().await.unwrap(), 0xFF);
    }
}
