//! RFCOMM transport.
//!
//! The inverter is reached through a bound RFCOMM tty (`rfcomm bind 0 <addr>`),
//! which behaves like a serial port. The baud rate is ignored by the kernel
//! for RFCOMM but `tokio-serial` requires one.

use crate::error::{Result, SmaError};
use crate::transport::{StreamTransport, Transport};
use std::time::Duration;
use tokio_serial::{SerialPortBuilderExt, SerialStream};

pub const DEFAULT_DEVICE: &str = "/dev/rfcomm0";
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Transport over an RFCOMM tty.
///
/// # Example
///
/// ```ignore
/// use sma_rs::{SerialTransport, Transport};
///
/// let mut transport = SerialTransport::open("/dev/rfcomm0").await?;
/// transport.send(&frame).await?;
/// ```
pub struct SerialTransport {
    inner: StreamTransport<SerialStream>,
    path: String,
}

impl std::fmt::Debug for SerialTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialTransport")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl SerialTransport {
    pub async fn new(path: &str, baud_rate: u32) -> Result<Self> {
        let port = tokio_serial::new(path, baud_rate)
            .open_native_async()
            .map_err(|e| SmaError::Io(std::io::Error::other(e.to_string())))?;

        tracing::debug!("Opened {} at {} baud", path, baud_rate);
        Ok(Self {
            inner: StreamTransport::new(port),
            path: path.to_string(),
        })
    }

    pub async fn open(path: &str) -> Result<Self> {
        Self::new(path, DEFAULT_BAUD_RATE).await
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

impl Transport for SerialTransport {
    async fn recv(&mut self, max: usize, timeout: Duration) -> Result<Vec<u8>> {
        self.inner.recv(max, timeout).await
    }

    async fn send(&mut self, bytes: &[u8]) -> Result<()> {
        self.inner.send(bytes).await
    }
}
