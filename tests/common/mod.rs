#![allow(dead_code)]

use sma_rs::frame::{FLAG, checkbit, escape_frame};
use sma_rs::{BtAddress, Config, Result, SmaError, Transport};
use std::collections::VecDeque;
use std::time::Duration;

/// Inverter 00:80:25:1D:AC:53, wire order.
pub const INVERTER: [u8; 6] = [0x53, 0xAC, 0x1D, 0x25, 0x80, 0x00];
/// Our adapter 00:1A:7D:DA:71:0C, wire order.
pub const LOCAL: [u8; 6] = [0x0C, 0x71, 0xDA, 0x7D, 0x1A, 0x00];
pub const INVERTER_SUSYID: [u8; 2] = [0x7D, 0x00];
pub const INVERTER_SERIAL: u32 = 2_100_123_456;

/// In-memory transport that hands out queued frames and releases a further
/// batch of frames after each send.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    incoming: VecDeque<Vec<u8>>,
    pending: VecDeque<u8>,
    replies: VecDeque<Vec<Vec<u8>>>,
    echo_next: bool,
    pub sent: Vec<Vec<u8>>,
    /// Attempts to start reading a new frame, including ones that timed out.
    pub frame_reads: usize,
    pub timeouts: usize,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames available straight away.
    pub fn push(&mut self, frame: Vec<u8>) {
        self.incoming.push_back(frame);
    }

    /// Frames that arrive after the next send that has no reply queued yet.
    pub fn reply(&mut self, frames: Vec<Vec<u8>>) {
        self.replies.push_back(frames);
    }

    /// The next frame sent comes straight back, ahead of its reply.
    pub fn echo_next_send(&mut self) {
        self.echo_next = true;
    }
}

impl Transport for ScriptedTransport {
    async fn recv(&mut self, max: usize, _timeout: Duration) -> Result<Vec<u8>> {
        if self.pending.is_empty() {
            self.frame_reads += 1;
            match self.incoming.pop_front() {
                Some(frame) => self.pending.extend(frame),
                None => {
                    self.timeouts += 1;
                    return Err(SmaError::Timeout);
                }
            }
        }
        let n = max.min(self.pending.len());
        Ok(self.pending.drain(..n).collect())
    }

    async fn send(&mut self, bytes: &[u8]) -> Result<()> {
        self.sent.push(bytes.to_vec());
        if std::mem::take(&mut self.echo_next) {
            self.incoming.push_back(bytes.to_vec());
        }
        if let Some(frames) = self.replies.pop_front() {
            self.incoming.extend(frames);
        }
        Ok(())
    }
}

pub fn test_config() -> Config {
    Config {
        address: BtAddress::from_wire(INVERTER),
        read_timeout: Duration::from_millis(50),
        receive_backoff: Duration::ZERO,
        timestring_backoff: Duration::ZERO,
        max_timestring_attempts: 3,
        drain_from_line: 1000,
        utc_offset: Some(0),
        ..Config::default()
    }
}

/// Raw level 1 frame as the inverter puts it on the wire. `body` starts at
/// offset 18 and is escaped from offset 19; `terminated` appends the closing
/// flag.
pub fn raw_frame(control: [u8; 2], body: &[u8], terminated: bool) -> Vec<u8> {
    let mut frame = vec![FLAG, 0, 0x00, 0];
    frame.extend(INVERTER);
    frame.extend(LOCAL);
    frame.extend(control);
    frame.extend_from_slice(body);
    let mut raw = escape_frame(&frame);
    if terminated {
        raw.push(FLAG);
    }
    raw[1] = raw.len() as u8;
    raw[3] = checkbit(raw[0], raw[1], raw[2]);
    raw
}

/// Level 2 header for a reply from the inverter, up to offset 59.
pub fn data2plus_header(status: u16, remaining: u16) -> Vec<u8> {
    let mut body = vec![0u8; 59 - 18];
    body[..5].copy_from_slice(&[0x7E, 0xFF, 0x03, 0x60, 0x65]);
    body[31 - 18..33 - 18].copy_from_slice(&status.to_le_bytes());
    body[33 - 18..35 - 18].copy_from_slice(&INVERTER_SUSYID);
    body[35 - 18..39 - 18].copy_from_slice(&INVERTER_SERIAL.to_le_bytes());
    body[43 - 18..45 - 18].copy_from_slice(&remaining.to_le_bytes());
    body
}

/// Single-frame Data2+ reply carrying `data` from offset 59, with a dummy
/// FCS before the closing flag.
pub fn data_reply(data: &[u8], remaining: u16) -> Vec<u8> {
    let mut body = data2plus_header(0, remaining);
    body.extend_from_slice(data);
    body.extend([0x00, 0x00]);
    raw_frame([0x01, 0x00], &body, true)
}

/// One tagged 28-byte record: index, tag, type, timestamp, value, padding.
pub fn tagged_record(tag: (u8, u8), time: u32, value: u32) -> Vec<u8> {
    let mut r = vec![0x01, tag.0, tag.1, 0x00];
    r.extend(time.to_le_bytes());
    r.extend(value.to_le_bytes());
    r.resize(28, 0);
    r
}

/// Inverter type record: label index in the first value slot.
pub fn label_record(time: u32, label: u32) -> Vec<u8> {
    let mut r = vec![0x01, 0x20, 0x82, 0x08];
    r.extend(time.to_le_bytes());
    r.extend((label | 0x0100_0000).to_le_bytes());
    r.resize(40, 0);
    r
}
