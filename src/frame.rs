//! Bluetooth (level 1) framing and the SMA Data2+ envelope it carries.
//!
//! A level 1 frame starts with `0x7E`, a length byte, a zero byte and a
//! checkbit (XOR of the first three bytes), followed by the 6-byte source and
//! destination adapter addresses and a 2-byte control word. From offset 18 a
//! level 2 packet (`7E FF 03 60 65 ...`) may follow, HDLC-escaped and closed by
//! an FCS16 and a final `0x7E`. Long level 2 packets are split across several
//! level 1 frames; only the last one ends with the closing flag.

use crate::codec::frame_check_sequence;
use byteorder::{ByteOrder, LittleEndian};
use std::fmt;

pub const FLAG: u8 = 0x7E;
pub const ESCAPE: u8 = 0x7D;

/// Bytes read before the length of the rest of the frame is known.
pub const HEADER_LEN: usize = 4;

/// Level 1 header: start, length, zero, checkbit, two addresses, control.
pub const L1_HEADER_LEN: usize = 18;

/// First byte of outgoing frames subject to escaping (the byte after the
/// level 2 start flag).
pub const ESCAPE_FROM: usize = 19;

/// Signature of an SMA Data2+ packet at [`L1_HEADER_LEN`].
pub const DATA2PLUS_SIGNATURE: [u8; 5] = [0x7E, 0xFF, 0x03, 0x60, 0x65];

/// Status byte value meaning the inverter has nothing to report.
pub const STATUS_NO_DATA: u8 = 0xE0;

const STATUS_OFFSET: usize = 31;
const SOURCE_SUSYID_OFFSET: usize = 33;
const SOURCE_SERIAL_OFFSET: usize = 35;
const FRAGMENTS_OFFSET: usize = 43;

#[must_use]
pub const fn needs_escape(b: u8) -> bool {
    matches!(b, 0x7D | 0x7E | 0x11 | 0x12 | 0x13)
}

/// HDLC-escapes every reserved byte as `7D, b ^ 0x20`.
#[must_use]
pub fn escape(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + payload.len() / 8);
    for &b in payload {
        if needs_escape(b) {
            out.push(ESCAPE);
            out.push(b ^ 0x20);
        } else {
            out.push(b);
        }
    }
    out
}

/// Reverses [`escape`]. A trailing lone `0x7D` is kept as is.
#[must_use]
pub fn unescape(wire: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(wire.len());
    let mut bytes = wire.iter().copied();
    while let Some(b) = bytes.next() {
        if b != ESCAPE {
            out.push(b);
            continue;
        }
        match bytes.next() {
            Some(0x5E) => out.push(0x7E),
            Some(0x5D) => out.push(0x7D),
            Some(next) => out.push(next ^ 0x20),
            None => out.push(ESCAPE),
        }
    }
    out
}

/// Escapes an outgoing frame from [`ESCAPE_FROM`] on; the header and level 2
/// start flag go out verbatim.
#[must_use]
pub fn escape_frame(frame: &[u8]) -> Vec<u8> {
    let split = ESCAPE_FROM.min(frame.len());
    let mut out = frame[..split].to_vec();
    out.extend(escape(&frame[split..]));
    out
}

/// Unescapes a received frame. Everything after the level 1 header may carry
/// escapes, including the first byte of a continuation frame.
#[must_use]
pub fn unescape_frame(raw: &[u8]) -> Vec<u8> {
    let split = L1_HEADER_LEN.min(raw.len());
    let mut out = raw[..split].to_vec();
    out.extend(unescape(&raw[split..]));
    out
}

#[must_use]
pub const fn checkbit(a: u8, b: u8, c: u8) -> u8 {
    a ^ b ^ c
}

#[must_use]
pub fn verify_checkbit(header: &[u8]) -> bool {
    header.len() >= HEADER_LEN && header[3] == checkbit(header[0], header[1], header[2])
}

/// Sets the length byte of an escaped outgoing frame and recomputes the
/// checkbit. The length counts the closing flag that is appended afterwards.
pub fn fix_outgoing_length(frame: &mut [u8]) {
    if frame.len() < HEADER_LEN {
        return;
    }
    let len = (frame.len() + 1) as u8;
    if frame[1] != len {
        frame[1] = len;
        frame[3] = checkbit(frame[0], frame[1], frame[2]);
    }
}

/// Rewrites the length byte of an unescaped received frame to its actual size.
///
/// The checkbit is adjusted so that length + checkbit keeps its sum, except for
/// a few lengths where inverters are known to expect specific values. Frames
/// whose checkbit is `0x13` or `0x14` are left alone.
pub fn fix_incoming_length(frame: &mut [u8]) {
    if frame.len() < HEADER_LEN {
        return;
    }
    let len = frame.len() as u8;
    if frame[1] == len || matches!(frame[3], 0x13 | 0x14) {
        return;
    }
    let sum = i32::from(frame[1]) + i32::from(frame[3]);
    frame[1] = len;
    frame[3] = match len {
        0x52 => 0x2C,
        0x5A => 0x24,
        0x66 => 0x1A,
        0x6A => 0x14,
        _ => (sum - i32::from(len)) as u8,
    };
}

/// True when the raw (still escaped) bytes end with the closing flag.
#[must_use]
pub fn is_terminated(raw: &[u8]) -> bool {
    raw.last() == Some(&FLAG)
}

#[must_use]
pub fn detect_self_echo(received: &[u8], last_sent: &[u8]) -> bool {
    !last_sent.is_empty() && received == last_sent
}

/// Appends the FCS over everything after the level 2 start flag, escapes the
/// frame and fixes up its length. This is what `$CRC` does to a send buffer.
pub fn seal(frame: &mut Vec<u8>) {
    let fcs = frame_check_sequence(frame.get(ESCAPE_FROM..).unwrap_or_default());
    frame.extend_from_slice(&fcs.to_le_bytes());
    let mut sealed = escape_frame(frame);
    fix_outgoing_length(&mut sealed);
    *frame = sealed;
}

/// Read-only view of the header fields of an unescaped frame.
#[derive(Clone, Copy)]
pub struct FrameView<'a> {
    bytes: &'a [u8],
}

impl<'a> FrameView<'a> {
    #[must_use]
    pub const fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    pub fn length(&self) -> Option<u8> {
        self.bytes.get(1).copied()
    }

    pub fn checkbit(&self) -> Option<u8> {
        self.bytes.get(3).copied()
    }

    pub fn source(&self) -> Option<&'a [u8]> {
        self.bytes.get(4..10)
    }

    pub fn destination(&self) -> Option<&'a [u8]> {
        self.bytes.get(10..16)
    }

    pub fn control(&self) -> Option<u16> {
        self.bytes.get(16..18).map(LittleEndian::read_u16)
    }

    pub fn is_data2plus(&self) -> bool {
        self.bytes.get(L1_HEADER_LEN..L1_HEADER_LEN + 5) == Some(&DATA2PLUS_SIGNATURE[..])
    }

    /// Read status of a Data2+ reply; the high byte is the one inverters set
    /// to [`STATUS_NO_DATA`].
    pub fn status(&self) -> Option<u16> {
        if !self.is_data2plus() {
            return None;
        }
        self.bytes
            .get(STATUS_OFFSET..STATUS_OFFSET + 2)
            .map(LittleEndian::read_u16)
    }

    pub fn has_no_data(&self) -> bool {
        self.status().is_some_and(|s| (s >> 8) as u8 == STATUS_NO_DATA)
    }

    pub fn source_susyid(&self) -> Option<&'a [u8]> {
        self.bytes
            .get(SOURCE_SUSYID_OFFSET..SOURCE_SUSYID_OFFSET + 2)
    }

    pub fn source_serial(&self) -> Option<u32> {
        self.bytes
            .get(SOURCE_SERIAL_OFFSET..SOURCE_SERIAL_OFFSET + 4)
            .map(LittleEndian::read_u32)
    }

    /// Count of level 2 fragments still to come.
    pub fn fragments_remaining(&self) -> Option<u16> {
        self.bytes
            .get(FRAGMENTS_OFFSET..FRAGMENTS_OFFSET + 2)
            .map(LittleEndian::read_u16)
    }
}

impl fmt::Debug for FrameView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Frame");
        s.field("len", &self.bytes.len())
            .field("length", &self.length())
            .field("source", &self.source().map(HexBytes))
            .field("destination", &self.destination().map(HexBytes))
            .field("control", &self.control());
        if self.is_data2plus() {
            s.field("status", &self.status())
                .field("susyid", &self.source_susyid().map(HexBytes))
                .field("serial", &self.source_serial())
                .field("fragments", &self.fragments_remaining());
        }
        s.finish()
    }
}

/// Space separated hex, for trace output.
pub struct HexBytes<'a>(pub &'a [u8]);

impl fmt::Debug for HexBytes<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for HexBytes<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, b) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{FCS16_GOOD, FCS16_INIT, fcs16};

    #[test]
    fn escape_replaces_reserved_bytes() {
        assert_eq!(
            escape(&[0x01, 0x7E, 0x7D, 0x11, 0x12, 0x13, 0x02]),
            vec![
                0x01, 0x7D, 0x5E, 0x7D, 0x5D, 0x7D, 0x31, 0x7D, 0x32, 0x7D, 0x33, 0x02
            ]
        );
    }

    #[test]
    fn unescape_inverts_escape() {
        let mut payload: Vec<u8> = (0..=255).collect();
        payload.extend([0x7D, 0x7D, 0x7E, 0x13, 0x7D]);
        assert_eq!(unescape(&escape(&payload)), payload);
        assert_eq!(unescape(&escape(&[])), Vec::<u8>::new());
    }

    #[test]
    fn unescape_keeps_trailing_escape() {
        assert_eq!(unescape(&[0x41, 0x7D]), vec![0x41, 0x7D]);
    }

    #[test]
    fn frame_header_is_never_escaped() {
        let mut frame = vec![0x7E; ESCAPE_FROM];
        frame.push(0x7E);
        let escaped = escape_frame(&frame);
        assert_eq!(&escaped[..ESCAPE_FROM], &frame[..ESCAPE_FROM]);
        assert_eq!(&escaped[ESCAPE_FROM..], &[0x7D, 0x5E]);
    }

    #[test]
    fn checkbit_invariant() {
        for (a, b, c) in [(0x7E, 0x14, 0x00), (0x00, 0x00, 0x00), (0xFF, 0x12, 0x34)] {
            let header = [a, b, c, a ^ b ^ c];
            assert!(verify_checkbit(&header));
            for i in 0..4 {
                let mut bad = header;
                bad[i] ^= 0x01;
                assert!(!verify_checkbit(&bad), "mutated byte {i}");
            }
        }
        assert!(!verify_checkbit(&[0x7E, 0x14]));
    }

    #[test]
    fn outgoing_length_counts_closing_flag() {
        let mut frame = vec![0x7E, 0x00, 0x00, 0x00, 1, 2, 3, 4, 5, 6];
        fix_outgoing_length(&mut frame);
        assert_eq!(frame[1], 11);
        assert!(verify_checkbit(&frame));
    }

    #[test]
    fn incoming_length_uses_known_checkbits() {
        let mut frame = vec![0u8; 0x52];
        frame[0] = 0x7E;
        frame[1] = 0x55;
        frame[3] = 0x2B;
        fix_incoming_length(&mut frame);
        assert_eq!(frame[1], 0x52);
        assert_eq!(frame[3], 0x2C);
    }

    #[test]
    fn incoming_length_preserves_sum() {
        let mut frame = vec![0u8; 0x20];
        frame[1] = 0x22;
        frame[3] = 0x5C;
        fix_incoming_length(&mut frame);
        assert_eq!(frame[1], 0x20);
        assert_eq!(frame[3], 0x5E);
    }

    #[test]
    fn incoming_length_skips_reserved_checkbits() {
        let mut frame = vec![0u8; 0x20];
        frame[1] = 0x22;
        frame[3] = 0x13;
        fix_incoming_length(&mut frame);
        assert_eq!(frame[1], 0x22);
    }

    #[test]
    fn termination_and_echo() {
        assert!(is_terminated(&[0x7E, 0x01, 0x7E]));
        assert!(!is_terminated(&[0x7E, 0x01]));
        assert!(!is_terminated(&[]));
        assert!(detect_self_echo(&[1, 2, 3], &[1, 2, 3]));
        assert!(!detect_self_echo(&[1, 2, 3], &[1, 2]));
        assert!(!detect_self_echo(&[], &[]));
    }

    #[test]
    fn sealed_frame_carries_valid_fcs() {
        let mut frame = vec![0x7E, 0x00, 0x00, 0x00];
        frame.extend([0u8; 12]);
        frame.extend([0x01, 0x00]);
        frame.extend(DATA2PLUS_SIGNATURE);
        frame.extend([0x0E, 0xA0, 0x7E, 0x11, 0x00]);
        let body = frame[ESCAPE_FROM..].to_vec();

        seal(&mut frame);

        assert!(verify_checkbit(&frame));
        assert_eq!(frame[1] as usize, frame.len() + 1);
        let mut content = unescape(&frame[ESCAPE_FROM..]);
        assert_eq!(&content[..body.len()], &body[..]);
        assert_eq!(fcs16(FCS16_INIT, &content), FCS16_GOOD);
        content.truncate(body.len());
        assert_eq!(content, body);
    }

    #[test]
    fn view_reads_data2plus_fields() {
        let mut frame = vec![0u8; 60];
        frame[..5].copy_from_slice(&[0x7E, 60, 0x00, 0x42, 0xAA]);
        frame[16] = 0x01;
        frame[18..23].copy_from_slice(&DATA2PLUS_SIGNATURE);
        frame[31] = 0x00;
        frame[32] = STATUS_NO_DATA;
        frame[33..35].copy_from_slice(&[0x7D, 0x00]);
        frame[35..39].copy_from_slice(&[0x01, 0x02, 0x03, 0x04]);
        frame[43] = 2;

        let view = FrameView::new(&frame);
        assert_eq!(view.control(), Some(0x0001));
        assert!(view.is_data2plus());
        assert!(view.has_no_data());
        assert_eq!(view.source_susyid(), Some(&[0x7D, 0x00][..]));
        assert_eq!(view.source_serial(), Some(0x0403_0201));
        assert_eq!(view.fragments_remaining(), Some(2));
    }

    #[test]
    fn plain_level1_frame_has_no_status() {
        let frame = [0x7E, 0x14, 0x00, 0x6A, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 2, 0];
        let view = FrameView::new(&frame);
        assert!(!view.is_data2plus());
        assert_eq!(view.status(), None);
        assert!(!view.has_no_data());
    }

    #[test]
    fn hex_bytes_display() {
        assert_eq!(HexBytes(&[0x7E, 0x01, 0xFF]).to_string(), "7e 01 ff");
    }
}
