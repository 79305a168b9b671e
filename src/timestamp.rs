// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Publication timestamp parsing strategies.
//!
//! Sources publish dates in a localized format:
//!
//! ```text
//! Martes 16 septiembre de 2025 | 23:01
//! ```
//!
//! [`LocalizedDateParser`] understands that format and resolves it in a
//! configured IANA zone. [`Rfc3339Parser`] is the drop-in replacement for
//! feeds that already send ISO timestamps. The ingest processor only sees
//! the [`TimestampParser`] trait.
//!
//! # Example
//!
//! ```
//! use newsflow::timestamp::{LocalizedDateParser, TimestampParser};
//!
//! let parser = LocalizedDateParser::new("America/Santiago");
//! let ts = parser.parse("Martes 16 septiembre de 2025 | 23:01").unwrap();
//! assert_eq!(ts.format("%Y-%m-%d %H:%M").to_string(), "2025-09-16 23:01");
//! ```

use std::sync::OnceLock;

use chrono::{DateTime, FixedOffset, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, TimeZone};
use chrono_tz::Tz;
use regex::Regex;
use thiserror::Error;
use tracing::warn;

/// Offset used when the configured zone name cannot be loaded (UTC−03:00).
pub const FALLBACK_OFFSET_SECS: i32 = -3 * 3600;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TimestampError {
    #[error("Unrecognized date format: {0}")]
    Format(String),
    #[error("Unrecognized month: {0}")]
    Month(String),
    #[error("Date out of range: {0}")]
    OutOfRange(String),
}

/// Turns a source's publication string into an absolute instant.
pub trait TimestampParser: Send + Sync {
    fn parse(&self, raw: &str) -> Result<DateTime<FixedOffset>, TimestampError>;
}

fn localized_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"(?i)^(?:(?:lunes|martes|miércoles|miercoles|jueves|viernes|sábado|sabado|domingo),?\s+)?(\d{1,2})\s+(?:de\s+)?(\w+)\s+de\s+(\d{4})\s*\|\s*(\d{1,2}):(\d{2})$",
        )
        .expect("localized date pattern is valid")
    })
}

fn month_number(name: &str) -> Option<u32> {
    let month = match name.to_lowercase().as_str() {
        "enero" => 1,
        "febrero" => 2,
        "marzo" => 3,
        "abril" => 4,
        "mayo" => 5,
        "junio" => 6,
        "julio" => 7,
        "agosto" => 8,
        "septiembre" | "setiembre" => 9,
        "octubre" => 10,
        "noviembre" => 11,
        "diciembre" => 12,
        _ => return None,
    };
    Some(month)
}

#[derive(Debug, Clone, Copy)]
enum Zone {
    Named(Tz),
    Fixed(FixedOffset),
}

/// Parser for `<weekday> <day> <month> de <year> | <hh>:<mm>` strings.
#[derive(Debug, Clone)]
pub struct LocalizedDateParser {
    zone: Zone,
}

impl LocalizedDateParser {
    /// Resolve local times in `zone_name`, or in UTC−03:00 if it is unknown.
    pub fn new(zone_name: &str) -> Self {
        let zone = match zone_name.parse::<Tz>() {
            Ok(tz) => Zone::Named(tz),
            Err(e) => {
                warn!(zone = zone_name, error = %e, "Unknown time zone, using fixed UTC-03:00");
                Zone::Fixed(fallback_offset())
            }
        };
        Self { zone }
    }

    /// Name of the zone in effect (for logs).
    pub fn zone_name(&self) -> String {
        match self.zone {
            Zone::Named(tz) => tz.name().to_string(),
            Zone::Fixed(offset) => offset.to_string(),
        }
    }

    fn resolve(&self, naive: NaiveDateTime) -> Option<DateTime<FixedOffset>> {
        match self.zone {
            Zone::Named(tz) => resolve_local(&tz, naive).map(|dt| dt.fixed_offset()),
            Zone::Fixed(offset) => resolve_local(&offset, naive).map(|dt| dt.fixed_offset()),
        }
    }
}

fn fallback_offset() -> FixedOffset {
    FixedOffset::east_opt(FALLBACK_OFFSET_SECS).expect("fallback offset is within a day")
}

/// Ambiguous local times (DST fall-back) take the earlier instant; local
/// times inside a DST gap are moved forward by one hour.
fn resolve_local<Z: TimeZone>(tz: &Z, naive: NaiveDateTime) -> Option<DateTime<Z>> {
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => Some(dt),
        LocalResult::Ambiguous(earliest, _) => Some(earliest),
        LocalResult::None => tz
            .from_local_datetime(&(naive + TimeDelta::hours(1)))
            .earliest(),
    }
}

impl TimestampParser for LocalizedDateParser {
    fn parse(&self, raw: &str) -> Result<DateTime<FixedOffset>, TimestampError> {
        let raw = raw.trim();
        let caps = localized_pattern()
            .captures(raw)
            .ok_or_else(|| TimestampError::Format(raw.to_string()))?;

        // The pattern only admits digits in these groups; widths keep them in range for u32/i32
        let day: u32 = caps[1].parse().map_err(|_| TimestampError::Format(raw.to_string()))?;
        let month = month_number(&caps[2]).ok_or_else(|| TimestampError::Month(caps[2].to_string()))?;
        let year: i32 = caps[3].parse().map_err(|_| TimestampError::Format(raw.to_string()))?;
        let hour: u32 = caps[4].parse().map_err(|_| TimestampError::Format(raw.to_string()))?;
        let minute: u32 = caps[5].parse().map_err(|_| TimestampError::Format(raw.to_string()))?;

        let date = NaiveDate::from_ymd_opt(year, month, day)
            .ok_or_else(|| TimestampError::OutOfRange(raw.to_string()))?;
        let time = NaiveTime::from_hms_opt(hour, minute, 0)
            .ok_or_else(|| TimestampError::OutOfRange(raw.to_string()))?;

        self.resolve(date.and_time(time))
            .ok_or_else(|| TimestampError::OutOfRange(raw.to_string()))
    }
}

/// Parser for feeds that send RFC 3339 timestamps.
#[derive(Debug, Clone, Copy, Default)]
pub struct Rfc3339Parser;

impl TimestampParser for Rfc3339Parser {
    fn parse(&self, raw: &str) -> Result<DateTime<FixedOffset>, TimestampError> {
        DateTime::parse_from_rfc3339(raw.trim()).map_err(|_| TimestampError::Format(raw.to_string()))
    }
}
