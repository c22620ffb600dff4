//! Key table: how to decode a tagged field.
//!
//! Entries are read from the `:unit conversions` block of the command file:
//!
//! ```text
//! :unit conversions
//! # tag1 tag2 "description"   "units" decimal recordgap datalength persistent
//! 82 00     "Grid Power"      "W"     0       28        4          0
//! :end unit conversions
//! ```

use crate::error::{Result, SmaError};
use std::fmt;
use std::path::Path;

pub const BLOCK_START: &str = ":unit conversions";
pub const BLOCK_END: &str = ":end unit conversions";

/// Two byte field identifier, in the order the bytes appear in a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tag(pub u8, pub u8);

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02x} {:02x}", self.0, self.1)
    }
}

/// How a field's value bytes are interpreted.
///
/// Codes 0-4 are decimal places; 97, 98 and 99 select timestamp, label and
/// text values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precision {
    /// Unsigned integer scaled by `10^decimals`.
    Fixed(u8),
    /// The record's own timestamp, formatted as a date (code 97).
    Timestamp,
    /// Index into the label collaborator (code 98).
    Label,
    /// NUL-terminated text (code 99).
    Text,
}

impl Precision {
    #[must_use]
    pub const fn from_code(code: i64) -> Option<Precision> {
        match code {
            0..=4 => Some(Precision::Fixed(code as u8)),
            97 => Some(Precision::Timestamp),
            98 => Some(Precision::Label),
            99 => Some(Precision::Text),
            _ => None,
        }
    }

    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Precision::Fixed(d) => d,
            Precision::Timestamp => 97,
            Precision::Label => 98,
            Precision::Text => 99,
        }
    }

    #[must_use]
    pub const fn decimals(self) -> usize {
        match self {
            Precision::Fixed(d) => d as usize,
            _ => 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct KeyEntry {
    pub tag: Tag,
    pub description: String,
    pub units: String,
    pub precision: Precision,
    pub divisor: f64,
    /// Distance between consecutive records carrying this tag.
    pub record_gap: usize,
    /// Width of the value field.
    pub data_length: usize,
    pub persistent: bool,
}

impl KeyEntry {
    pub fn new(
        tag: Tag,
        description: &str,
        units: &str,
        precision: Precision,
        record_gap: usize,
        data_length: usize,
        persistent: bool,
    ) -> Self {
        Self {
            tag,
            description: description.to_string(),
            units: units.to_string(),
            precision,
            divisor: 10f64.powi(precision.decimals() as i32),
            record_gap,
            data_length,
            persistent,
        }
    }

    fn parse(line: &str) -> std::result::Result<KeyEntry, String> {
        let mut rest = line.trim();
        let tag1 = parse_hex(next_word(&mut rest)?)?;
        let tag2 = parse_hex(next_word(&mut rest)?)?;
        let description = next_quoted(&mut rest)?;
        let units = next_quoted(&mut rest)?;

        let numbers = rest
            .split_whitespace()
            .take(4)
            .map(|s| s.parse::<i64>().map_err(|e| format!("{}: {}", s, e)))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let [decimal, gap, length, persistent] = numbers[..] else {
            return Err(format!("expected 4 numeric fields, found {}", numbers.len()));
        };

        let precision = Precision::from_code(decimal)
            .ok_or_else(|| format!("unknown precision code {}", decimal))?;
        let record_gap = usize::try_from(gap).map_err(|_| format!("bad record gap {}", gap))?;
        let data_length =
            usize::try_from(length).map_err(|_| format!("bad data length {}", length))?;

        Ok(KeyEntry::new(
            Tag(tag1, tag2),
            description,
            units,
            precision,
            record_gap,
            data_length,
            persistent != 0,
        ))
    }
}

fn next_word<'a>(rest: &mut &'a str) -> std::result::Result<&'a str, String> {
    let s = rest.trim_start();
    let end = s.find(char::is_whitespace).unwrap_or(s.len());
    if end == 0 {
        return Err("missing tag".to_string());
    }
    *rest = &s[end..];
    Ok(&s[..end])
}

fn next_quoted<'a>(rest: &mut &'a str) -> std::result::Result<&'a str, String> {
    let s = rest.trim_start();
    let inner = s
        .strip_prefix('"')
        .ok_or_else(|| "expected quoted string".to_string())?;
    let end = inner
        .find('"')
        .ok_or_else(|| "unterminated quoted string".to_string())?;
    *rest = &inner[end + 1..];
    Ok(&inner[..end])
}

fn parse_hex(s: &str) -> std::result::Result<u8, String> {
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    u8::from_str_radix(digits, 16).map_err(|e| format!("bad tag byte {}: {}", s, e))
}

/// Ordered list of entries; lookups return the first entry with a given tag.
#[derive(Debug, Clone, Default)]
pub struct KeyTable {
    entries: Vec<KeyEntry>,
}

impl KeyTable {
    pub fn new(entries: Vec<KeyEntry>) -> Self {
        Self { entries }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self> {
        let mut entries = Vec::new();
        let mut in_block = false;
        let mut seen_block = false;

        for (idx, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.starts_with(BLOCK_END) {
                in_block = false;
                continue;
            }
            if line.starts_with(BLOCK_START) {
                in_block = true;
                seen_block = true;
                continue;
            }
            if !in_block || line.is_empty() || line.starts_with('#') || line.starts_with(':') {
                continue;
            }
            let entry = KeyEntry::parse(line).map_err(|message| SmaError::KeyTable {
                line: idx + 1,
                message,
            })?;
            entries.push(entry);
        }

        if !seen_block {
            return Err(SmaError::KeyTable {
                line: 0,
                message: format!("no '{}' block", BLOCK_START),
            });
        }
        tracing::debug!("Loaded {} key table entries", entries.len());
        Ok(Self { entries })
    }

    pub fn lookup(&self, tag: Tag) -> Option<&KeyEntry> {
        self.entries.iter().find(|e| e.tag == tag)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &KeyEntry> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const TABLE: &str = r#"
:init
R 7E 14 00 6A $END;
:unit conversions
# tag1 tag2 desc units decimal gap length persistent
82 00 "Grid Power" "W" 0 28 4 0
1e 41 "Max Power" "W" 0 40 4 1
57 46 "Grid Freq" "Hz" 2 28 4 0
82 00 "Duplicate Power" "kW" 3 28 4 1
20 82 "Inverter Type" "" 98 40 4 1
:end unit conversions
:logoff
"#;

    #[test]
    fn parses_block_only() {
        let table = KeyTable::parse(TABLE).unwrap();
        assert_eq!(table.len(), 5);

        let freq = table.lookup(Tag(0x57, 0x46)).unwrap();
        assert_eq!(freq.description, "Grid Freq");
        assert_eq!(freq.units, "Hz");
        assert_eq!(freq.precision, Precision::Fixed(2));
        assert_eq!(freq.divisor, 100.0);
        assert_eq!(freq.record_gap, 28);
        assert_eq!(freq.data_length, 4);
        assert!(!freq.persistent);

        let label = table.lookup(Tag(0x20, 0x82)).unwrap();
        assert_eq!(label.precision, Precision::Label);
        assert_eq!(label.units, "");
    }

    #[test]
    fn first_match_wins() {
        let table = KeyTable::parse(TABLE).unwrap();
        let entry = table.lookup(Tag(0x82, 0x00)).unwrap();
        assert_eq!(entry.description, "Grid Power");
        assert_eq!(entry.units, "W");
    }

    #[test]
    fn missing_tag_is_none() {
        let table = KeyTable::parse(TABLE).unwrap();
        assert!(table.lookup(Tag(0x00, 0x82)).is_none());
    }

    #[test]
    fn bad_line_reports_line_number() {
        let text = ":unit conversions\n82 00 \"Grid Power\" \"W\" 0 28\n";
        match KeyTable::parse(text) {
            Err(SmaError::KeyTable { line, .. }) => assert_eq!(line, 2),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn unknown_precision_is_rejected() {
        let text = ":unit conversions\n82 00 \"Grid Power\" \"W\" 7 28 4 0\n";
        assert!(matches!(
            KeyTable::parse(text),
            Err(SmaError::KeyTable { line: 2, .. })
        ));
    }

    #[test]
    fn missing_block_is_an_error() {
        assert!(KeyTable::parse(":init\nR 7E $END\n").is_err());
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(TABLE.as_bytes()).unwrap();
        let table = KeyTable::load(file.path()).unwrap();
        assert_eq!(table.iter().count(), 5);
    }
}
