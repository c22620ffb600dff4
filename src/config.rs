use crate::error::{Result, SmaError};
use crate::link::DEFAULT_TIMEOUT;
use crate::session::BtAddress;
use chrono::{DateTime, Datelike, Local, NaiveDate, NaiveDateTime, TimeZone, Timelike, Utc};
use std::time::Duration;

pub const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
pub const DEFAULT_PASSWORD: &str = "0000";

/// Window of archive data to request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl DateRange {
    /// Parses both ends as `YYYY-MM-DD HH:MM:SS` in UTC.
    pub fn parse(from: &str, to: &str) -> Result<Self> {
        Ok(Self {
            from: parse_date(from)?,
            to: parse_date(to)?,
        })
    }

    /// Everything from 2000-01-01 up to the current minute.
    pub fn since_2000(now: DateTime<Utc>) -> Self {
        let from = NaiveDate::from_ymd_opt(2000, 1, 1)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|d| d.and_utc())
            .unwrap_or_default();
        let to = now
            .with_second(0)
            .and_then(|t| t.with_nanosecond(0))
            .unwrap_or(now);
        Self { from, to }
    }
}

pub fn parse_date(s: &str) -> Result<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s.trim(), DATE_FORMAT)
        .map(|d| d.and_utc())
        .map_err(|e| SmaError::InvalidDate(format!("{}: {}", s, e)))
}

#[derive(Debug, Clone)]
pub struct Config {
    pub address: BtAddress,
    pub password: String,
    pub read_timeout: Duration,
    pub receive_backoff: Duration,
    pub max_receive_failures: u32,
    /// Pause between timestring retries, and before continuing when the
    /// inverter clock lags ours.
    pub timestring_backoff: Duration,
    pub max_timestring_attempts: u32,
    /// Send lines after this script line first discard pending input.
    pub drain_from_line: usize,
    pub date_range: Option<DateRange>,
    /// Seconds east of UTC reported by `$TIMEZONE`; derived from the host's
    /// offset if unset.
    pub utc_offset: Option<i32>,
    /// Take an hour off the host offset while daylight saving time is in
    /// effect. Ignored when `utc_offset` is set.
    pub dst_adjust: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            address: BtAddress::default(),
            password: DEFAULT_PASSWORD.to_string(),
            read_timeout: DEFAULT_TIMEOUT,
            receive_backoff: Duration::from_secs(10),
            max_receive_failures: 3,
            timestring_backoff: Duration::from_secs(5),
            max_timestring_attempts: 60,
            drain_from_line: 22,
            date_range: None,
            utc_offset: None,
            dst_adjust: true,
        }
    }
}

impl Config {
    pub fn utc_offset_secs(&self) -> i32 {
        if let Some(offset) = self.utc_offset {
            return offset;
        }
        let now = Local::now();
        let current = now.offset().local_minus_utc();
        let offset_in = |month| {
            Local
                .with_ymd_and_hms(now.year(), month, 1, 12, 0, 0)
                .single()
                .map_or(current, |t| t.offset().local_minus_utc())
        };
        host_offset(current, offset_in(1), offset_in(7), self.dst_adjust)
    }
}

/// Daylight saving time is in effect when `current` is ahead of the smaller
/// of the January and July offsets.
pub fn host_offset(current: i32, january: i32, july: i32, dst_adjust: bool) -> i32 {
    if dst_adjust && current > january.min(july) {
        current - 3600
    } else {
        current
    }
}
