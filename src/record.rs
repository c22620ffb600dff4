//! Reassembly of a logical record that may span several level 1 frames.

use crate::error::{Result, SmaError};
use crate::link::{Link, ReceivedFrame};
use crate::transport::Transport;

/// Offset of the records-remaining counter in the first frame.
pub const REMAINING_OFFSET: usize = 43;
/// Where record data starts in the first frame.
pub const FIRST_DATA_OFFSET: usize = 59;
/// Where record data resumes in a continuation frame.
pub const CONTINUATION_OFFSET: usize = 18;
/// Bytes after the data in a terminated frame: FCS16 and the closing flag.
pub const TRAILER_LEN: usize = 3;
pub const DEFAULT_CEILING: usize = 500;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record {
    pub payload: Vec<u8>,
    /// Records the inverter still has queued after this one.
    pub remaining: u16,
}

#[derive(Debug, Clone, Copy)]
pub struct RecordReader {
    ceiling: usize,
}

impl Default for RecordReader {
    fn default() -> Self {
        Self {
            ceiling: DEFAULT_CEILING,
        }
    }
}

impl RecordReader {
    pub const fn with_ceiling(ceiling: usize) -> Self {
        Self { ceiling }
    }

    /// Collects one record starting from `frame`, reading continuation frames
    /// from `link` until one is terminated. On return `frame` holds the last
    /// frame read. A failed read discards everything collected so far.
    pub async fn read<T: Transport>(
        &self,
        link: &mut Link<T>,
        frame: &mut ReceivedFrame,
    ) -> Result<Record> {
        let remaining = frame.field(REMAINING_OFFSET, 2).map(|b| u16::from_le_bytes([b[0], b[1]]))?;
        let mut payload = Vec::new();
        let mut cursor = FIRST_DATA_OFFSET;

        loop {
            let end = if frame.terminated {
                frame.bytes.len().saturating_sub(TRAILER_LEN)
            } else {
                frame.bytes.len()
            };
            if cursor < end {
                if payload.len() + (end - cursor) > self.ceiling {
                    return Err(SmaError::RecordOverflow(self.ceiling));
                }
                payload.extend_from_slice(&frame.bytes[cursor..end]);
                cursor = end;
            }

            if frame.terminated {
                break;
            }

            *frame = link.read_frame().await?;
            if !payload.is_empty() {
                cursor = CONTINUATION_OFFSET;
            }
        }

        tracing::debug!(
            "Reassembled {} byte record, {} remaining",
            payload.len(),
            remaining
        );
        Ok(Record { payload, remaining })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::StreamTransport;
    use std::time::Duration;

    fn first_frame(data: &[u8], remaining: u16, terminated: bool) -> ReceivedFrame {
        let mut bytes = vec![0u8; FIRST_DATA_OFFSET];
        bytes[REMAINING_OFFSET..REMAINING_OFFSET + 2].copy_from_slice(&remaining.to_le_bytes());
        bytes.extend_from_slice(data);
        if terminated {
            bytes.extend([0xAA, 0xBB, 0x7E]);
        }
        ReceivedFrame { bytes, terminated }
    }

    fn idle_link() -> Link<StreamTransport<tokio::io::DuplexStream>> {
        let (_peer, ours) = tokio::io::duplex(16);
        Link::new(StreamTransport::new(ours), Duration::from_millis(10))
    }

    #[tokio::test]
    async fn single_terminated_frame() {
        let mut link = idle_link();
        let mut frame = first_frame(&[1, 2, 3, 4], 0, true);
        let record = RecordReader::default().read(&mut link, &mut frame).await.unwrap();
        assert_eq!(record.payload, vec![1, 2, 3, 4]);
        assert_eq!(record.remaining, 0);
    }

    #[tokio::test]
    async fn ceiling_stops_runaway_frames() {
        let mut link = idle_link();
        let mut frame = first_frame(&[0u8; 81], 1, true);
        let err = RecordReader::with_ceiling(80)
            .read(&mut link, &mut frame)
            .await
            .unwrap_err();
        assert!(matches!(err, SmaError::RecordOverflow(80)));
    }

    #[tokio::test]
    async fn payload_at_ceiling_is_accepted() {
        let mut link = idle_link();
        let mut frame = first_frame(&[7u8; 80], 0, true);
        let record = RecordReader::with_ceiling(80)
            .read(&mut link, &mut frame)
            .await
            .unwrap();
        assert_eq!(record.payload.len(), 80);
    }

    #[tokio::test]
    async fn failed_continuation_read_discards_record() {
        let mut link = idle_link();
        let mut frame = first_frame(&[9u8; 8], 3, false);
        let err = RecordReader::default()
            .read(&mut link, &mut frame)
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn short_first_frame_is_rejected() {
        let mut link = idle_link();
        let mut frame = ReceivedFrame {
            bytes: vec![0u8; 20],
            terminated: true,
        };
        let err = RecordReader::default()
            .read(&mut link, &mut frame)
            .await
            .unwrap_err();
        assert!(matches!(err, SmaError::ShortFrame { .. }));
    }
}
