use crate::error::SmaError;
use rand::Rng;
use std::fmt;
use std::str::FromStr;

/// Sent for `$TIMESET` until the inverter supplies its own value.
pub const DEFAULT_TIMESET: [u8; 4] = [0x30, 0xFE, 0x7E, 0x00];
pub const TIMESTRING_LEN: usize = 25;
/// SUSyID of an inverter we have not logged in to yet.
pub const UNKNOWN_SUSYID: [u8; 2] = [0xFF, 0xFF];

/// Bluetooth adapter address. Stored in wire order, which is the reverse of
/// the usual `00:80:25:...` notation.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BtAddress([u8; 6]);

impl BtAddress {
    pub const fn from_wire(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    pub const fn wire_bytes(&self) -> [u8; 6] {
        self.0
    }
}

impl FromStr for BtAddress {
    type Err = SmaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || SmaError::InvalidAddress(s.to_string());
        let parts: Vec<&str> = s.trim().split(':').collect();
        if parts.len() != 6 {
            return Err(invalid());
        }
        let mut bytes = [0u8; 6];
        for (slot, part) in bytes.iter_mut().rev().zip(&parts) {
            if part.len() != 2 {
                return Err(invalid());
            }
            *slot = u8::from_str_radix(part, 16).map_err(|_| invalid())?;
        }
        Ok(Self(bytes))
    }
}

impl fmt::Display for BtAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            g, e, d, c, b, a
        )
    }
}

impl fmt::Debug for BtAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BtAddress({})", self)
    }
}

/// What we know about the link and the inverter, carried across commands.
#[derive(Debug, Clone)]
pub struct Session {
    pub destination: BtAddress,
    /// Our own adapter address as reported by the inverter.
    pub local_address: BtAddress,
    /// Identity we present to the inverter.
    pub my_susyid: [u8; 2],
    pub my_serial: [u8; 4],
    pub inverter_susyid: [u8; 2],
    pub inverter_serial: u32,
    pub net_id: u8,
    pub signal_strength: Option<f32>,
    pub send_counter: u8,
    pub timestring: [u8; TIMESTRING_LEN],
    pub timeset: [u8; 4],
    pub inverter_name: Option<String>,
    /// Inverter clock, epoch seconds, as last reported.
    pub inverter_time: Option<i64>,
}

impl Session {
    /// Session with a random identity, as each run of the tool presents
    /// itself as a fresh device.
    pub fn new(destination: BtAddress) -> Self {
        let mut rng = rand::thread_rng();
        let mut my_susyid = [0u8; 2];
        let mut my_serial = [0u8; 4];
        for b in my_susyid.iter_mut().chain(my_serial.iter_mut()) {
            *b = rng.gen_range(0..254);
        }
        Self::with_identity(destination, my_susyid, my_serial)
    }

    pub fn with_identity(destination: BtAddress, my_susyid: [u8; 2], my_serial: [u8; 4]) -> Self {
        Self {
            destination,
            local_address: BtAddress::default(),
            my_susyid,
            my_serial,
            inverter_susyid: UNKNOWN_SUSYID,
            inverter_serial: 0,
            net_id: 0,
            signal_strength: None,
            send_counter: 0,
            timestring: [0; TIMESTRING_LEN],
            timeset: DEFAULT_TIMESET,
            inverter_name: None,
            inverter_time: None,
        }
    }

    /// Serial as sent by `$SERIAL`: most significant byte first.
    pub fn serial_bytes(&self) -> [u8; 4] {
        self.inverter_serial.to_be_bytes()
    }

    pub fn next_count(&mut self) -> u8 {
        self.send_counter = self.send_counter.wrapping_add(1);
        self.send_counter
    }

    pub fn is_logged_in(&self) -> bool {
        self.inverter_susyid != UNKNOWN_SUSYID
    }
}
