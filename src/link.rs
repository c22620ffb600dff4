//! Frame-level I/O on top of a [`Transport`].

use crate::error::{Result, SmaError};
use crate::frame::{
    FrameView, HEADER_LEN, HexBytes, checkbit, detect_self_echo, fix_incoming_length,
    is_terminated, unescape_frame, verify_checkbit,
};
use crate::transport::Transport;
use std::time::Duration;
use tokio::time::Instant;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// One received frame, unescaped and length-corrected.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReceivedFrame {
    pub bytes: Vec<u8>,
    /// The raw frame ended with the level 2 closing flag.
    pub terminated: bool,
}

impl ReceivedFrame {
    pub fn view(&self) -> FrameView<'_> {
        FrameView::new(&self.bytes)
    }

    /// Bytes `start..start + len`, or [`SmaError::ShortFrame`].
    pub fn field(&self, start: usize, len: usize) -> Result<&[u8]> {
        self.bytes
            .get(start..start + len)
            .ok_or(SmaError::ShortFrame {
                needed: start + len,
                got: self.bytes.len(),
            })
    }

    pub fn byte(&self, offset: usize) -> Result<u8> {
        self.field(offset, 1).map(|b| b[0])
    }

    pub fn array<const N: usize>(&self, start: usize) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.field(start, N)?);
        Ok(out)
    }
}

/// Reads and writes whole frames, remembering the last frame sent so that an
/// echo of it is not mistaken for a reply.
///
/// Bytes of a frame that has only partly arrived when a read times out are
/// kept and completed by the next read.
pub struct Link<T> {
    transport: T,
    timeout: Duration,
    last_sent: Vec<u8>,
    partial: Vec<u8>,
}

impl<T> std::fmt::Debug for Link<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link")
            .field("timeout", &self.timeout)
            .field("last_sent", &self.last_sent.len())
            .field("partial", &self.partial.len())
            .finish_non_exhaustive()
    }
}

impl<T: Transport> Link<T> {
    pub fn new(transport: T, timeout: Duration) -> Self {
        Self {
            transport,
            timeout,
            last_sent: Vec::new(),
            partial: Vec::new(),
        }
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn last_sent(&self) -> &[u8] {
        &self.last_sent
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn into_inner(self) -> T {
        self.transport
    }

    pub async fn send_frame(&mut self, frame: Vec<u8>) -> Result<()> {
        tracing::trace!("send {} bytes: {}", frame.len(), HexBytes(&frame));
        self.transport.send(&frame).await?;
        self.last_sent = frame;
        Ok(())
    }

    /// Reads one frame within the configured timeout.
    pub async fn read_frame(&mut self) -> Result<ReceivedFrame> {
        self.read_frame_within(self.timeout).await
    }

    /// Discards whatever frames are already waiting. Returns how many.
    pub async fn drain(&mut self) -> usize {
        let mut drained = 0;
        while let Ok(frame) = self.read_frame_within(Duration::ZERO).await {
            tracing::debug!("Drained stale frame: {:?}", frame.view());
            drained += 1;
        }
        drained
    }

    async fn read_frame_within(&mut self, timeout: Duration) -> Result<ReceivedFrame> {
        let deadline = Instant::now() + timeout;
        self.fill(HEADER_LEN, deadline).await?;
        let length = usize::from(self.partial[1]);
        if length < HEADER_LEN {
            let bad = self.partial[1];
            self.partial.clear();
            return Err(SmaError::InvalidFrame(format!(
                "length byte {:#04x} shorter than header",
                bad
            )));
        }

        self.fill(length, deadline).await?;
        let raw: Vec<u8> = self.partial.drain(..length).collect();
        tracing::trace!("recv {} bytes: {}", raw.len(), HexBytes(&raw));

        if detect_self_echo(&raw, &self.last_sent) {
            return Err(SmaError::SelfEcho);
        }
        if !verify_checkbit(&raw) {
            return Err(SmaError::Checkbit {
                expected: checkbit(raw[0], raw[1], raw[2]),
                actual: raw[3],
            });
        }

        let terminated = is_terminated(&raw);
        let mut bytes = unescape_frame(&raw);
        fix_incoming_length(&mut bytes);

        let frame = ReceivedFrame { bytes, terminated };
        tracing::debug!("Received {:?}", frame.view());
        Ok(frame)
    }

    /// Reads until `n` bytes of the current frame are buffered.
    async fn fill(&mut self, n: usize, deadline: Instant) -> Result<()> {
        while self.partial.len() < n {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let chunk = self.transport.recv(n - self.partial.len(), remaining).await?;
            if chunk.is_empty() {
                self.partial.clear();
                return Err(SmaError::Disconnected);
            }
            self.partial.extend(chunk);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::StreamTransport;
    use tokio::io::AsyncWriteExt;

    fn frame(body: &[u8]) -> Vec<u8> {
        let len = (HEADER_LEN + body.len()) as u8;
        let mut f = vec![0x7E, len, 0x00, checkbit(0x7E, len, 0x00)];
        f.extend_from_slice(body);
        f
    }

    #[tokio::test]
    async fn reads_whole_frame_from_pieces() {
        let (mut peer, ours) = tokio::io::duplex(256);
        let mut link = Link::new(StreamTransport::new(ours), Duration::from_secs(1));

        let mut body = vec![0u8; 14];
        body.extend([0x7E, 0x01, 0x7D, 0x5E, 0x7E]);
        let raw = frame(&body);
        peer.write_all(&raw[..3]).await.unwrap();
        peer.write_all(&raw[3..]).await.unwrap();

        let got = link.read_frame().await.unwrap();
        assert!(got.terminated);
        assert_eq!(got.bytes.len(), raw.len() - 1);
        assert_eq!(&got.bytes[18..], &[0x7E, 0x01, 0x7E, 0x7E][..]);
    }

    #[tokio::test]
    async fn rejects_bad_checkbit() {
        let (mut peer, ours) = tokio::io::duplex(256);
        let mut link = Link::new(StreamTransport::new(ours), Duration::from_secs(1));

        let mut raw = frame(&[0u8; 14]);
        raw[3] ^= 0xFF;
        peer.write_all(&raw).await.unwrap();

        let err = link.read_frame().await.unwrap_err();
        assert!(matches!(err, SmaError::Checkbit { .. }));
    }

    #[tokio::test]
    async fn echo_of_last_sent_is_an_error() {
        let (peer, ours) = tokio::io::duplex(256);
        let mut link = Link::new(StreamTransport::new(ours), Duration::from_secs(1));
        let mut peer = StreamTransport::new(peer);

        let raw = frame(&[0x11; 14]);
        link.send_frame(raw.clone()).await.unwrap();
        let seen = peer.recv(64, Duration::from_secs(1)).await.unwrap();
        peer.send(&seen).await.unwrap();

        let err = link.read_frame().await.unwrap_err();
        assert!(matches!(err, SmaError::SelfEcho));
        assert_eq!(link.last_sent(), &raw[..]);
    }

    #[tokio::test]
    async fn short_length_byte_is_invalid() {
        let (mut peer, ours) = tokio::io::duplex(256);
        let mut link = Link::new(StreamTransport::new(ours), Duration::from_secs(1));
        peer.write_all(&[0x7E, 0x02, 0x00, 0x7C]).await.unwrap();

        let err = link.read_frame().await.unwrap_err();
        assert!(matches!(err, SmaError::InvalidFrame(_)));
    }

    #[tokio::test]
    async fn drain_discards_waiting_frames() {
        let (mut peer, ours) = tokio::io::duplex(256);
        let mut link = Link::new(StreamTransport::new(ours), Duration::from_secs(1));
        peer.write_all(&frame(&[0u8; 14])).await.unwrap();
        peer.write_all(&frame(&[1u8; 14])).await.unwrap();

        assert_eq!(link.drain().await, 2);
        let err = link.read_frame_within(Duration::from_millis(10)).await;
        assert!(matches!(err, Err(SmaError::Timeout)));
    }

    #[tokio::test]
    async fn drain_keeps_a_half_arrived_frame() {
        let (mut peer, ours) = tokio::io::duplex(256);
        let mut link = Link::new(StreamTransport::new(ours), Duration::from_secs(1));
        let first = frame(&[0x21; 14]);
        let second = frame(&[0x22; 20]);

        peer.write_all(&first[..HEADER_LEN]).await.unwrap();
        assert_eq!(link.drain().await, 0);

        peer.write_all(&first[HEADER_LEN..]).await.unwrap();
        peer.write_all(&second).await.unwrap();

        let got = link.read_frame().await.unwrap();
        assert_eq!(&got.bytes[4..], &first[4..]);
        let got = link.read_frame().await.unwrap();
        assert_eq!(&got.bytes[4..], &second[4..]);
    }

    #[tokio::test]
    async fn timed_out_body_completes_on_next_read() {
        let (mut peer, ours) = tokio::io::duplex(256);
        let mut link = Link::new(StreamTransport::new(ours), Duration::from_millis(20));
        let raw = frame(&[0x33; 14]);

        peer.write_all(&raw[..10]).await.unwrap();
        assert!(matches!(link.read_frame().await, Err(SmaError::Timeout)));

        peer.write_all(&raw[10..]).await.unwrap();
        let got = link.read_frame().await.unwrap();
        assert_eq!(&got.bytes[4..], &raw[4..]);
    }
}
