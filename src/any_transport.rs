use crate::error::Result;
use crate::serial::SerialTransport;
use crate::transport::{TcpTransport, Transport};
use std::time::Duration;

pub enum AnyTransport {
    Serial(SerialTransport),
    Tcp(TcpTransport),
}

impl AnyTransport {
    pub fn kind(&self) -> &'static str {
        match self {
            AnyTransport::Serial(_) => "rfcomm",
            AnyTransport::Tcp(_) => "tcp",
        }
    }
}

impl Transport for AnyTransport {
    async fn recv(&mut self, max: usize, timeout: Duration) -> Result<Vec<u8>> {
        match self {
            AnyTransport::Serial(t) => t.recv(max, timeout).await,
            AnyTransport::Tcp(t) => t.recv(max, timeout).await,
        }
    }

    async fn send(&mut self, bytes: &[u8]) -> Result<()> {
        match self {
            AnyTransport::Serial(t) => t.send(bytes).await,
            AnyTransport::Tcp(t) => t.send(bytes).await,
        }
    }
}

impl From<SerialTransport> for AnyTransport {
    fn from(t: SerialTransport) -> Self {
        AnyTransport::Serial(t)
    }
}

impl From<TcpTransport> for AnyTransport {
    fn from(t: TcpTransport) -> Self {
        AnyTransport::Tcp(t)
    }
}
