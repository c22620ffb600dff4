//! Decoders for reassembled records and fixed-layout replies.
//!
//! Tagged records share one layout: a class byte, the two tag bytes, a type
//! byte, a 4-byte timestamp and the value from offset 8.

use crate::codec::{Timestamp, decode_numeric, decode_string, decode_timestamp};
use crate::error::Result;
use crate::keys::{KeyEntry, KeyTable, Precision, Tag};
use crate::labels::LabelLookup;
use crate::link::ReceivedFrame;
use std::fmt;

/// Tag of the device type label; its decoded text names the inverter.
pub const TYPE_LABEL_TAG: Tag = Tag(0x20, 0x82);

const TIME_OFFSET: usize = 4;
const VALUE_OFFSET: usize = 8;
const POWER_VALUE_WIDTH: usize = 3;
const LABEL_INDEX_WIDTH: usize = 2;

const ARCHIVE_RECORD_LEN: usize = 12;
/// Archive samples are five minutes apart.
pub const ARCHIVE_INTERVAL: i64 = 300;

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Number { value: f64, decimals: usize },
    Text(String),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Number { value, decimals } => write!(f, "{:.*}", decimals, value),
            FieldValue::Text(s) => f.write_str(s),
        }
    }
}

/// A decoded record, before it is tied to an inverter.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub tag: Tag,
    pub timestamp: Timestamp,
    pub description: String,
    pub units: String,
    pub value: FieldValue,
    pub persistent: bool,
}

impl Field {
    fn new(entry: &KeyEntry, timestamp: Timestamp, value: FieldValue, persistent: bool) -> Self {
        Self {
            tag: entry.tag,
            timestamp,
            description: entry.description.clone(),
            units: entry.units.clone(),
            value,
            persistent,
        }
    }

    fn numeric(entry: &KeyEntry, timestamp: Timestamp, raw: u64) -> Self {
        let value = FieldValue::Number {
            value: raw as f64 / entry.divisor,
            decimals: entry.precision.decimals(),
        };
        // A zero reading is always reported so the last known value is kept.
        let persistent = entry.persistent || raw == 0;
        Self::new(entry, timestamp, value, persistent)
    }
}

fn record_tag(payload: &[u8], at: usize) -> Option<Tag> {
    payload.get(at + 1..at + 3).map(|t| Tag(t[0], t[1]))
}

/// Stride between power series records: chosen by the type byte of the first
/// record, else the gap of the first record's key.
pub fn power_series_stride(payload: &[u8], keys: &KeyTable) -> Option<usize> {
    match payload.get(3) {
        Some(0x08 | 0x10) => Some(40),
        Some(0x40 | 0x00) => Some(28),
        _ => record_tag(payload, 0)
            .and_then(|tag| keys.lookup(tag))
            .map(|entry| entry.record_gap)
            .filter(|&gap| gap > 0),
    }
}

/// Spot/total power records: timestamp plus a 3-byte value each. Records
/// whose tag has no key are logged and skipped.
pub fn decode_power_series(payload: &[u8], keys: &KeyTable) -> Vec<Field> {
    let Some(stride) = power_series_stride(payload, keys) else {
        tracing::warn!("Cannot determine record stride for power series");
        return Vec::new();
    };

    let mut fields = Vec::new();
    let mut i = 0;
    while i + VALUE_OFFSET + POWER_VALUE_WIDTH <= payload.len() {
        let tag = Tag(payload[i + 1], payload[i + 2]);
        let timestamp = decode_timestamp(&payload[i + TIME_OFFSET..]);
        let raw = decode_numeric(&payload[i + VALUE_OFFSET..], POWER_VALUE_WIDTH);
        match keys.lookup(tag) {
            Some(entry) => fields.push(Field::numeric(entry, timestamp, raw.value)),
            None if payload[0] > 0 => {
                tracing::warn!("{} no data for {} = {}", timestamp, tag, raw.value);
            }
            None => {}
        }
        i += stride;
    }
    fields
}

/// Generic tagged records. The first record's key fixes stride and value
/// width; each record is then decoded by its own key's precision. Decoding
/// stops at the first record with an unknown tag.
pub fn decode_tagged_fields(
    payload: &[u8],
    keys: &KeyTable,
    labels: &dyn LabelLookup,
) -> Vec<Field> {
    let Some(first) = record_tag(payload, 0).and_then(|tag| keys.lookup(tag)) else {
        tracing::warn!("No key for first record of {} byte payload", payload.len());
        return Vec::new();
    };
    let stride = if first.record_gap > 0 {
        first.record_gap
    } else {
        payload.len().max(1)
    };
    let width = first.data_length;

    let mut fields = Vec::new();
    let mut i = 0;
    while i + VALUE_OFFSET <= payload.len() {
        let tag = Tag(payload[i + 1], payload[i + 2]);
        let Some(entry) = keys.lookup(tag) else {
            tracing::warn!("No data for tag {} at offset {}", tag, i);
            break;
        };
        let timestamp = decode_timestamp(&payload[i + TIME_OFFSET..]);
        let value = &payload[i + VALUE_OFFSET..];

        let field = match entry.precision {
            Precision::Fixed(_) => {
                let raw = decode_numeric(value, width);
                Field::numeric(entry, timestamp, raw.value)
            }
            Precision::Timestamp => Field::new(
                entry,
                timestamp,
                FieldValue::Text(timestamp.to_string()),
                entry.persistent,
            ),
            Precision::Label => {
                let index = decode_numeric(value, LABEL_INDEX_WIDTH).value as u32;
                match labels.label(index) {
                    Some(label) => {
                        Field::new(entry, timestamp, FieldValue::Text(label), entry.persistent)
                    }
                    None => {
                        tracing::warn!("No label for index {} ({})", index, entry.description);
                        i += stride;
                        continue;
                    }
                }
            }
            Precision::Text => Field::new(
                entry,
                timestamp,
                FieldValue::Text(decode_string(value, width)),
                entry.persistent,
            ),
        };
        tracing::debug!(
            "{} {:<20} = {} {}",
            field.timestamp,
            field.description,
            field.value,
            field.units
        );
        fields.push(field);
        i += stride;
    }
    fields
}

/// Running state across archive payloads of one request.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArchiveCursor {
    prev_time: Option<i64>,
    prev_total: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArchiveSample {
    pub timestamp: Timestamp,
    pub total_wh: u64,
    pub accumulated_kwh: f64,
    pub current_watts: f64,
}

/// Splits an archive payload into 12-byte samples (timestamp, lifetime Wh).
///
/// The first sample seeds the running total. A sample that is not exactly one
/// interval after its predecessor ends the payload.
pub fn decode_archive(payload: &[u8], cursor: &mut ArchiveCursor) -> Vec<ArchiveSample> {
    let mut samples = Vec::new();
    for record in payload.chunks_exact(ARCHIVE_RECORD_LEN) {
        let timestamp = decode_timestamp(&record[..4]);
        let expected = cursor.prev_time.map(|t| t + ARCHIVE_INTERVAL);
        cursor.prev_time = Some(timestamp.epoch);
        if let Some(expected) = expected
            && timestamp.epoch != expected
        {
            tracing::warn!(
                "Date Error: expected {} got {}",
                Timestamp {
                    epoch: expected,
                    is_null: false
                },
                timestamp
            );
            break;
        }

        let total = decode_numeric(&record[4..], 8).value;
        let prev_total = cursor.prev_total.unwrap_or(total);
        cursor.prev_total = Some(total);
        samples.push(ArchiveSample {
            timestamp,
            total_wh: total,
            accumulated_kwh: total as f64 / 1000.0,
            current_watts: (total as f64 - prev_total as f64) * 12.0,
        });
    }
    samples
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DayTotals {
    pub total_kwh: f64,
    pub today_kwh: f64,
}

/// Lifetime and daily yield from a `$DTOT` reply.
pub fn decode_day_totals(frame: &ReceivedFrame) -> Result<DayTotals> {
    let total = decode_numeric(frame.field(67, 3)?, 3).value;
    let today = decode_numeric(frame.field(83, 2)?, 2).value;
    Ok(DayTotals {
        total_kwh: total as f64 / 1000.0,
        today_kwh: today as f64 / 1000.0,
    })
}
