//! Parsing of `--from`/`--to` time arguments.
//!
//! Accepts either a humantime duration, interpreted as "that long ago"
//! relative to now, or one of a fixed list of date / date-time formats
//! resolved in local time.

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, TimeZone, Utc};
use thiserror::Error;

const DATE_FORMATS: &[&str] = &[
    "%d.%m.%Y", // DD.MM.YYYY
    "%d.%m.%y", // DD.MM.YY
    "%m/%d/%Y", // MM/DD/YYYY
    "%m/%d/%y", // MM/DD/YY
    "%m%d%Y",   // MMDDYYYY
    "%m%d%y",   // MMDDYY
    "%Y%m%d",   // YYYYMMDD
];

const DATETIME_FORMATS: &[&str] = &[
    "%H:%M_%Y%m%d", // HH:MM_YYYYMMDD
];

#[derive(Error, Debug)]
#[error("invalid time format: '{0}'")]
pub struct TimeParseError(String);

/// Resolves a time argument to a UTC instant.
pub fn parse_time(value: &str) -> Result<DateTime<Utc>, TimeParseError> {
    // A bare duration means "that long ago".
    if let Ok(ago) = humantime::parse_duration(value) {
        let ago = chrono::Duration::from_std(ago)
            .map_err(|_| TimeParseError(value.to_string()))?;
        return Ok(Utc::now() - ago);
    }

    for format in DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return local_to_utc(naive, value);
        }
    }

    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(value, format) {
            let naive = date
                .and_hms_opt(0, 0, 0)
                .ok_or_else(|| TimeParseError(value.to_string()))?;
            return local_to_utc(naive, value);
        }
    }

    Err(TimeParseError(value.to_string()))
}

fn local_to_utc(naive: NaiveDateTime, original: &str) -> Result<DateTime<Utc>, TimeParseError> {
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|local| local.with_timezone(&Utc))
        .ok_or_else(|| TimeParseError(original.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;

    #[test]
    fn duration_means_ago() {
        let parsed = parse_time("2h").unwrap();
        let expected = Utc::now() - chrono::Duration::hours(2);
        let drift = (parsed - expected).num_seconds().abs();
        assert!(drift <= 1, "drift was {}s", drift);
    }

    #[test]
    fn dotted_date() {
        let parsed = parse_time("24.12.2023").unwrap();
        let local = parsed.with_timezone(&Local);
        assert_eq!(local.day(), 24);
        assert_eq!(local.month(), 12);
        assert_eq!(local.year(), 2023);
    }

    #[test]
    fn slash_date() {
        let parsed = parse_time("12/24/2023").unwrap();
        let local = parsed.with_timezone(&Local);
        assert_eq!(local.month(), 12);
        assert_eq!(local.day(), 24);
    }

    #[test]
    fn compact_date_and_time() {
        let parsed = parse_time("15:30_20231224").unwrap();
        let local = parsed.with_timezone(&Local);
        assert_eq!(local.year(), 2023);

        let parsed = parse_time("20231224").unwrap();
        let local = parsed.with_timezone(&Local);
        assert_eq!(local.year(), 2023);
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(parse_time("not a time").is_err());
        assert!(parse_time("").is_err());
    }
}
