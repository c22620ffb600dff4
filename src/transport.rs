use crate::error::{Result, SmaError};
use std::future::Future;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Byte-stream duplex channel to an inverter.
///
/// Implementations handle the physical layer (RFCOMM tty, TCP bridge, ...);
/// framing, escaping and checksums live in [`crate::link::Link`].
pub trait Transport {
    /// Read at most `max` bytes, waiting no longer than `timeout` for the
    /// first of them. Returns [`SmaError::Timeout`] when nothing arrived.
    fn recv(
        &mut self,
        max: usize,
        timeout: Duration,
    ) -> impl Future<Output = Result<Vec<u8>>> + Send;

    /// Write all of `bytes`.
    fn send(&mut self, bytes: &[u8]) -> impl Future<Output = Result<()>> + Send;
}

/// [`Transport`] over any tokio byte stream.
pub struct StreamTransport<S> {
    stream: S,
}

impl<S> StreamTransport<S> {
    pub const fn new(stream: S) -> Self {
        Self { stream }
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}

impl<S> std::fmt::Debug for StreamTransport<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamTransport").finish_non_exhaustive()
    }
}

impl<S> Transport for StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn recv(&mut self, max: usize, timeout: Duration) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; max];
        let n = tokio::time::timeout(timeout, self.stream.read(&mut buf))
            .await
            .map_err(|_| SmaError::Timeout)??;
        if n == 0 && max > 0 {
            return Err(SmaError::Disconnected);
        }
        buf.truncate(n);
        Ok(buf)
    }

    async fn send(&mut self, bytes: &[u8]) -> Result<()> {
        self.stream.write_all(bytes).await?;
        self.stream.flush().await?;
        Ok(())
    }
}

pub type TcpTransport = StreamTransport<tokio::net::TcpStream>;

impl TcpTransport {
    /// Connect to a TCP bridge in front of the inverter's RFCOMM channel.
    pub async fn connect(addr: &str) -> Result<Self> {
        let stream = tokio::net::TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(Self::new(stream))
    }
}
