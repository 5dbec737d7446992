//! Wire format of the `DateTime` scalar: `YYYY-MM-DDTHH:mm`, always UTC.

use chrono::{DateTime, NaiveDateTime, TimeZone, Timelike, Utc};

use crate::{GraphkitError, Result};

pub const DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M";

pub fn format_datetime(value: &DateTime<Utc>) -> String {
    value.format(DATETIME_FORMAT).to_string()
}

/// Parses the minute-precision format, falling back to RFC 3339.
pub fn parse_datetime(input: &str) -> Result<DateTime<Utc>> {
    let input = input.trim();
    if let Ok(naive) = NaiveDateTime::parse_from_str(input, DATETIME_FORMAT) {
        return Ok(Utc.from_utc_datetime(&naive));
    }

    DateTime::parse_from_rfc3339(input)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|err| GraphkitError::InvalidInput(format!("invalid DateTime `{input}`: {err}")))
}

pub fn truncate_to_minute(value: DateTime<Utc>) -> DateTime<Utc> {
    value
        .with_second(0)
        .and_then(|v| v.with_nanosecond(0))
        .unwrap_or(value)
}
