use chrono::{DateTime, Utc};
use serde::Serialize;

/// One decoded spot value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LiveDataEntry {
    pub timestamp: DateTime<Utc>,
    pub inverter: String,
    pub serial: u32,
    pub description: String,
    /// Value formatted to the key's precision.
    pub value: String,
    pub units: String,
    pub persistent: bool,
}

/// One five-minute archive sample.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArchiveDataEntry {
    pub timestamp: DateTime<Utc>,
    pub inverter: String,
    pub serial: u32,
    /// Lifetime yield in kWh.
    pub accumulated_kwh: f64,
    /// Average power over the preceding interval in W.
    pub current_watts: f64,
}

/// Everything decoded so far, in the order it was decoded.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Readings {
    pub live: Vec<LiveDataEntry>,
    pub archive: Vec<ArchiveDataEntry>,
}

impl Readings {
    pub fn is_empty(&self) -> bool {
        self.live.is_empty() && self.archive.is_empty()
    }

    pub fn clear(&mut self) {
        self.live.clear();
        self.archive.clear();
    }
}
