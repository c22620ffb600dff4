//! Destinations for decoded readings.

use crate::error::{Result, SmaError};
use crate::output::Readings;
use influxdb_line_protocol::LineProtocolBuilder;
use std::io::Write;

pub const LIVE_MEASUREMENT: &str = "sma_live";
pub const ARCHIVE_MEASUREMENT: &str = "sma_archive";

pub trait OutputSink {
    fn write(&mut self, readings: &Readings) -> Result<()>;
}

/// Human-readable table, one reading per line.
pub struct ConsoleSink<W> {
    out: W,
}

impl<W: Write> ConsoleSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> OutputSink for ConsoleSink<W> {
    fn write(&mut self, readings: &Readings) -> Result<()> {
        for entry in &readings.live {
            writeln!(
                self.out,
                "{} {:<20} {:<32} {:>14} {}",
                entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
                entry.inverter,
                entry.description,
                entry.value,
                entry.units
            )?;
        }
        for entry in &readings.archive {
            writeln!(
                self.out,
                "{} {:<20} total={:.3} kWh current={:.0} W",
                entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
                entry.inverter,
                entry.accumulated_kwh,
                entry.current_watts
            )?;
        }
        self.out.flush()?;
        Ok(())
    }
}

/// InfluxDB line protocol with nanosecond timestamps.
pub struct LineProtocolSink<W> {
    out: W,
}

impl<W: Write> LineProtocolSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> OutputSink for LineProtocolSink<W> {
    fn write(&mut self, readings: &Readings) -> Result<()> {
        let text = readings_to_influx(readings)?;
        self.out.write_all(text.as_bytes())?;
        self.out.flush()?;
        Ok(())
    }
}

pub fn readings_to_influx(readings: &Readings) -> Result<String> {
    macro_rules! tagged {
        ($b:expr, $name:expr, $entry:expr, $serial:expr) => {
            $b.measurement($name)
                .tag("inverter", tag_value(&$entry.inverter))
                .tag("serial", $serial)
        };
    }

    let mut builder = LineProtocolBuilder::new();

    for entry in &readings.live {
        let serial = entry.serial.to_string();
        let ts = entry.timestamp.timestamp_nanos_opt().unwrap_or(0);
        let line = tagged!(builder, LIVE_MEASUREMENT, entry, &serial)
            .tag("description", tag_value(&entry.description))
            .tag("persistent", if entry.persistent { "true" } else { "false" });
        let line = match entry.value.parse::<f64>() {
            Ok(v) if v.is_finite() => line.field("value", v),
            _ => line.field("value", entry.value.as_str()),
        };
        builder = line
            .field("units", entry.units.as_str())
            .timestamp(ts)
            .close_line();
    }

    for entry in &readings.archive {
        let serial = entry.serial.to_string();
        let ts = entry.timestamp.timestamp_nanos_opt().unwrap_or(0);
        builder = tagged!(builder, ARCHIVE_MEASUREMENT, entry, &serial)
            .field("accumulated_kwh", entry.accumulated_kwh)
            .field("current_watts", entry.current_watts)
            .timestamp(ts)
            .close_line();
    }

    line_protocol_text(builder.build())
}

fn line_protocol_text(bytes: Vec<u8>) -> Result<String> {
    String::from_utf8(bytes).map_err(|e| SmaError::Output(format!("line protocol: {}", e)))
}

/// Tags may not be empty.
fn tag_value(s: &str) -> &str {
    if s.is_empty() { "unknown" } else { s }
}

/// One JSON object per line.
pub struct JsonSink<W> {
    out: W,
}

impl<W: Write> JsonSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> OutputSink for JsonSink<W> {
    fn write(&mut self, readings: &Readings) -> Result<()> {
        for entry in &readings.live {
            serde_json::to_writer(&mut self.out, entry).map_err(std::io::Error::from)?;
            writeln!(self.out)?;
        }
        for entry in &readings.archive {
            serde_json::to_writer(&mut self.out, entry).map_err(std::io::Error::from)?;
            writeln!(self.out)?;
        }
        self.out.flush()?;
        Ok(())
    }
}
