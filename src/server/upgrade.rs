//! Post-`101 Switching Protocols` handle.
//!
//! Once a [`Handler`](crate::Handler) answers with `Action::upgrade`, the HTTP
//! connection loop stops parsing requests and hands the raw socket to the
//! handler as an [`UpgradeHandle`]: a small bidirectional, timeout-bounded
//! byte-slice interface, grounded on the same read/write timeout-racing
//! pattern `ConnLimits::write_bytes`/`send_error` already use.

use std::io;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::sleep;

/// A raw, bidirectional byte channel over a connection that has left the HTTP
/// request/response cycle behind. `recv`/`send` race against `timeout`
/// exactly like the ordinary HTTP read/write path, so a stalled upgraded
/// peer can't pin a worker slot forever.
pub struct UpgradeHandle {
    stream: TcpStream,
    timeout: Duration,
}

impl UpgradeHandle {
    #[inline]
    pub(crate) fn new(stream: TcpStream, timeout: Duration) -> Self {
        UpgradeHandle { stream, timeout }
    }

    /// Reads into `buf`, returning the number of bytes read (`0` on a clean
    /// peer close), or `io::ErrorKind::TimedOut` if nothing arrives within
    /// the connection's configured timeout.
    #[inline]
    pub async fn recv(&mut self, buf: &mut [u8]) -> Result<usize, io::Error> {
        tokio::select! {
            biased;

            result = self.stream.read(buf) => result,
            _ = sleep(self.timeout) => {
                Err(io::Error::new(io::ErrorKind::TimedOut, "upgrade read timeout"))
            },
        }
    }

    /// Writes the whole of `data`, racing the same write timeout the HTTP
    /// path uses.
    #[inline]
    pub async fn send(&mut self, data: &[u8]) -> Result<(), io::Error> {
        tokio::select! {
            biased;

            result = self.stream.write_all(data) => result,
            _ = sleep(self.timeout) => {
                Err(io::Error::new(io::ErrorKind::TimedOut, "upgrade write timeout"))
            },
        }
    }

    /// Flushes and shuts the socket down. Called automatically on drop via
    /// best-effort `shutdown`, but callers that care about the result should
    /// call this explicitly.
    #[inline]
    pub async fn close(mut self) -> Result<(), io::Error> {
        self.stream.shutdown().await
    }
}
