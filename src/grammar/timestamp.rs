// src/grammar/timestamp.rs

//! Timestamp extraction for engine log lines.
//!
//! Two layouts show up: the legacy `MM/DD[/YY] HH:MM:SS` stamp in local
//! time, and an ISO-8601-like stamp with a zone. The rightmost match wins.

use std::sync::LazyLock;

use chrono::{Datelike, Local, NaiveDate, TimeZone};
use regex::{Captures, Regex};

use crate::types::Timestamp;

static LEGACY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\s*(\d{1,2})/(\d{1,2})(/(\d{1,2}))?\s+(\d{1,2}):(\d{2}):(\d{2})")
        .expect("valid legacy timestamp pattern")
});

static ISO: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s*(\d{4}).?(\d{2}).?(\d{2}).(\d{2}).?(\d{2}).?(\d{2})([.,]\d+)?([Zz]|[-+](\d{2}).?(\d{2}))",
    )
    .expect("valid iso timestamp pattern")
});

/// Extract the event time of a log line, shifted by `adjust` seconds.
pub fn parse_timestamp(line: &str, adjust: i64) -> Option<Timestamp> {
    let legacy = LEGACY.captures_iter(line).last();
    let iso = ISO.captures(line);

    let legacy_start = legacy.as_ref().and_then(|c| c.get(0)).map(|m| m.start());
    let iso_start = iso.as_ref().and_then(|c| c.get(0)).map(|m| m.start());

    let ts = match (legacy_start, iso_start) {
        (Some(l), Some(i)) if i > l => iso.as_ref().and_then(iso_epoch),
        (Some(_), _) => legacy.as_ref().and_then(legacy_epoch),
        (None, Some(_)) => iso.as_ref().and_then(iso_epoch),
        (None, None) => None,
    }?;

    Some(ts + adjust)
}

fn num(caps: &Captures<'_>, idx: usize) -> Option<u32> {
    caps.get(idx).and_then(|m| m.as_str().parse().ok())
}

fn legacy_epoch(caps: &Captures<'_>) -> Option<Timestamp> {
    let month = num(caps, 1)?;
    let day = num(caps, 2)?;
    let year = match num(caps, 4) {
        Some(yy) => 2000 + yy as i32,
        None => Local::now().year(),
    };
    let (hour, minute, second) = (num(caps, 5)?, num(caps, 6)?, num(caps, 7)?);

    Local
        .with_ymd_and_hms(year, month, day, hour, minute, second)
        .earliest()
        .map(|dt| dt.timestamp())
}

fn iso_epoch(caps: &Captures<'_>) -> Option<Timestamp> {
    let year = caps.get(1)?.as_str().parse::<i32>().ok()?;
    let naive = NaiveDate::from_ymd_opt(year, num(caps, 2)?, num(caps, 3)?)?
        .and_hms_opt(num(caps, 4)?, num(caps, 5)?, num(caps, 6)?)?;
    let mut epoch = naive.and_utc().timestamp();

    let zone = caps.get(8)?.as_str();
    if !zone.eq_ignore_ascii_case("z") {
        let offset = i64::from(num(caps, 9)?) * 3600 + i64::from(num(caps, 10)?) * 60;
        // The stamp is local to the zone; shift back to UTC.
        if zone.starts_with('-') {
            epoch += offset;
        } else {
            epoch -= offset;
        }
    }

    Some(epoch)
}

/// ISO-8601 rendering (UTC) used in marker files and notification env.
pub fn isodate(ts: Timestamp) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| ts.to_string())
}

/// Parse a manifest timestamp (`2020-01-02T03:04:05Z`, `20200102T030405-0600`).
pub fn parse_iso(value: &str) -> Option<Timestamp> {
    ISO.captures(value).as_ref().and_then(iso_epoch)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iso_with_offsets() {
        assert_eq!(parse_timestamp("2020-01-01T00:00:00Z hi", 0), Some(1577836800));
        assert_eq!(parse_timestamp("2020-01-01T00:00:00-01:00 hi", 0), Some(1577840400));
        assert_eq!(parse_timestamp("20200101T010000+0100", 0), Some(1577836800));
    }

    #[test]
    fn legacy_is_local_and_adjusted() {
        let expected = Local
            .with_ymd_and_hms(2020, 3, 4, 5, 6, 7)
            .earliest()
            .map(|dt| dt.timestamp() + 10);
        assert_eq!(parse_timestamp("03/04/20 05:06:07 Event: x", 10), expected);
    }

    #[test]
    fn rightmost_legacy_stamp_wins() {
        let later = Local
            .with_ymd_and_hms(2020, 3, 4, 5, 6, 9)
            .earliest()
            .map(|dt| dt.timestamp());
        let line = "03/04/20 05:06:07 Event: ULOG_SUBMIT for Node A (1.0.0) {03/04/20 05:06:09}";
        assert_eq!(parse_timestamp(line, 0), later);
    }

    #[test]
    fn no_stamp() {
        assert_eq!(parse_timestamp("just text", 0), None);
    }
}
