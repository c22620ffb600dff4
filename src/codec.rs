//! Stateless byte-level helpers shared by the framing layer and the decoders.
//!
//! All multi-byte quantities on the SMA link are little-endian. A field whose
//! bytes are all `0xFF` is the inverter's way of saying "no value"; the decoders
//! report that as a null flag rather than an error.

use byteorder::{ByteOrder, LittleEndian};
use chrono::{DateTime, Utc};
use crc::{CRC_16_IBM_SDLC, Crc};
use std::fmt;

/// Initial value of a running FCS16.
pub const FCS16_INIT: u16 = 0xFFFF;

/// Residue left after running FCS16 over a buffer followed by its own
/// (complemented, LSB first) checksum.
pub const FCS16_GOOD: u16 = 0xF0B8;

/// The frame check sequence as a complete CRC: PPP FCS16 is CRC-16/X-25.
pub const SMA_FCS: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_SDLC);

const FCS16_TABLE: [u16; 256] = fcs16_table();

const fn fcs16_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut i = 0;
    while i < 256 {
        let mut v = i as u16;
        let mut bit = 0;
        while bit < 8 {
            v = if v & 1 != 0 { (v >> 1) ^ 0x8408 } else { v >> 1 };
            bit += 1;
        }
        table[i] = v;
        i += 1;
    }
    table
}

/// Running PPP FCS16 over `bytes`, continuing from `seed`.
///
/// Start from [`FCS16_INIT`]; the value to transmit is the complement of the
/// result. Feeding a buffer plus its transmitted FCS leaves [`FCS16_GOOD`].
#[must_use]
pub fn fcs16(seed: u16, bytes: &[u8]) -> u16 {
    bytes.iter().fold(seed, |fcs, &b| {
        (fcs >> 8) ^ FCS16_TABLE[((fcs ^ u16::from(b)) & 0xFF) as usize]
    })
}

/// Complemented FCS16 of `bytes`, ready to append LSB first.
#[must_use]
pub fn frame_check_sequence(bytes: &[u8]) -> u16 {
    SMA_FCS.checksum(bytes)
}

/// Parses two characters as a hex byte.
///
/// Characters outside `0-9a-fA-F` are not rejected: they contribute
/// `c - '0'` (wrapping), which is what existing script files rely on. A missing
/// second character counts as NUL.
#[must_use]
pub fn hex_pair_to_byte(pair: &str) -> u8 {
    let mut chars = pair.bytes();
    let hi = nibble(chars.next().unwrap_or(0));
    let lo = nibble(chars.next().unwrap_or(0));
    hi.wrapping_mul(16).wrapping_add(lo)
}

const fn nibble(c: u8) -> u8 {
    match c {
        b'a'..=b'f' => c - b'a' + 10,
        b'A'..=b'F' => c - b'A' + 10,
        _ => c.wrapping_sub(b'0'),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Numeric {
    pub value: u64,
    pub is_null: bool,
}

impl Numeric {
    #[must_use]
    pub fn as_f64(self) -> f64 {
        self.value as f64
    }
}

/// Little-endian unsigned value of the first `width` bytes (at most 8).
///
/// An all-`0xFF` field decodes to zero with `is_null` set.
#[must_use]
pub fn decode_numeric(bytes: &[u8], width: usize) -> Numeric {
    let width = width.min(bytes.len()).min(8);
    let field = &bytes[..width];
    if field.iter().all(|&b| b == 0xFF) {
        return Numeric {
            value: 0,
            is_null: true,
        };
    }
    Numeric {
        value: LittleEndian::read_uint(field, width),
        is_null: false,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timestamp {
    pub epoch: i64,
    pub is_null: bool,
}

impl Timestamp {
    /// Calendar time, always in UTC.
    #[must_use]
    pub fn utc(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.epoch, 0).unwrap_or_default()
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.utc().format("%Y-%m-%d %H:%M:%S"))
    }
}

/// Four-byte little-endian epoch seconds.
#[must_use]
pub fn decode_timestamp(bytes: &[u8]) -> Timestamp {
    let n = decode_numeric(bytes, 4);
    Timestamp {
        epoch: n.value as i64,
        is_null: n.is_null,
    }
}

/// Bytes up to the first NUL or `width`, whichever comes first. A run of
/// `0xFF` is the null encoding and yields an empty string.
#[must_use]
pub fn decode_string(bytes: &[u8], width: usize) -> String {
    let field = &bytes[..width.min(bytes.len())];
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    let text = &field[..end];
    if text.iter().all(|&b| b == 0xFF) {
        return String::new();
    }
    String::from_utf8_lossy(text).into_owned()
}

/// Epoch seconds as sent on the wire: the low 32 bits, little-endian.
///
/// Equivalent to formatting the value as eight hex digits and emitting the
/// pairs in reverse order; negative offsets wrap the same way.
#[must_use]
pub fn epoch_bytes(secs: i64) -> [u8; 4] {
    (secs as u32).to_le_bytes()
}
