// src/date.rs
//! Date normalizer: turns the date strings found in feeds, APIs and boards
//! into a calendar date rendered as `YYYY-MM-DD`.
//!
//! Formats are tried in a fixed order and the first successful parse wins.
//! The date is taken in whatever zone the input encodes; no conversion to
//! UTC or local time happens here.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use time::{format_description::well_known::Rfc2822, OffsetDateTime};

pub const CANONICAL_FORMAT: &str = "%Y-%m-%d";

/// A calendar date without time of day or zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CanonicalDate(NaiveDate);

impl CanonicalDate {
    pub fn new(date: NaiveDate) -> Self {
        Self(date)
    }

    pub fn from_ymd(year: i32, month: u32, day: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, day).map(Self)
    }

    pub fn as_naive(&self) -> NaiveDate {
        self.0
    }

    /// Whole days between this date and `today` (positive when in the past).
    pub fn age_in_days(&self, today: NaiveDate) -> i64 {
        today.signed_duration_since(self.0).num_days()
    }
}

impl fmt::Display for CanonicalDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(CANONICAL_FORMAT))
    }
}

impl FromStr for CanonicalDate {
    type Err = chrono::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NaiveDate::parse_from_str(s.trim(), CANONICAL_FORMAT).map(Self)
    }
}

impl Serialize for CanonicalDate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for CanonicalDate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Normalize a raw date string. Returns `None` when no known format matches;
/// callers must skip the item rather than substitute a default.
pub fn normalize(raw: &str) -> Option<CanonicalDate> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    let parsed = parse_rfc2822(s)
        .or_else(|| parse_rfc822_numeric_zone(s))
        .or_else(|| parse_rfc822_named_zone(s))
        .or_else(|| NaiveDate::parse_from_str(s, "%Y.%m.%d").ok())
        .or_else(|| naive_datetime(s, "%Y-%m-%d %H:%M:%S"))
        .or_else(|| naive_datetime(s, "%Y-%m-%dT%H:%M:%S%.fZ"))
        .or_else(|| naive_datetime(s, "%Y-%m-%dT%H:%M:%S%.f"))
        .or_else(|| {
            DateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%z")
                .ok()
                .map(|dt| dt.date_naive())
        })
        .or_else(|| NaiveDate::parse_from_str(s, CANONICAL_FORMAT).ok())
        .or_else(|| parse_iso_fallback(s));

    if parsed.is_none() {
        tracing::debug!(raw = %s, "unrecognized date format");
    }
    parsed.map(CanonicalDate)
}

// RFC 2822 with numeric or obsolete named zones ("GMT", "UT", "EST", ...).
fn parse_rfc2822(s: &str) -> Option<NaiveDate> {
    let dt = OffsetDateTime::parse(s, &Rfc2822).ok()?;
    let d = dt.date();
    NaiveDate::from_ymd_opt(d.year(), u8::from(d.month()) as u32, d.day() as u32)
}

// Same shape, but lenient about the weekday (feeds often get it wrong) and
// about single-digit days.
fn parse_rfc822_numeric_zone(s: &str) -> Option<NaiveDate> {
    DateTime::parse_from_str(strip_weekday(s), "%d %b %Y %H:%M:%S %z")
        .ok()
        .map(|dt| dt.date_naive())
}

fn parse_rfc822_named_zone(s: &str) -> Option<NaiveDate> {
    let body = strip_weekday(s);
    let (head, zone) = body.rsplit_once(' ')?;
    if zone.is_empty() || !zone.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    naive_datetime(head, "%d %b %Y %H:%M:%S")
}

fn strip_weekday(s: &str) -> &str {
    match s.split_once(", ") {
        Some((day, rest)) if day.len() == 3 && day.chars().all(|c| c.is_ascii_alphabetic()) => {
            rest.trim_start()
        }
        _ => s,
    }
}

fn naive_datetime(s: &str, fmt: &str) -> Option<NaiveDate> {
    NaiveDateTime::parse_from_str(s, fmt).ok().map(|dt| dt.date())
}

// Last resort for ISO-8601 variants: swap a literal `Z` for `+00:00` and
// hand the rest to the RFC 3339 parser.
fn parse_iso_fallback(s: &str) -> Option<NaiveDate> {
    if !s.contains('T') {
        return None;
    }
    let iso = s.replace('Z', "+00:00");
    DateTime::parse_from_rfc3339(&iso)
        .ok()
        .map(|dt| dt.date_naive())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn norm(s: &str) -> Option<String> {
        normalize(s).map(|d| d.to_string())
    }

    #[test]
    fn rfc822_with_numeric_and_named_zone() {
        assert_eq!(
            norm("Mon, 02 Jan 2006 15:04:05 -0700").as_deref(),
            Some("2006-01-02")
        );
        assert_eq!(
            norm("Mon, 02 Jan 2006 15:04:05 GMT").as_deref(),
            Some("2006-01-02")
        );
        assert_eq!(
            norm("Mon, 02 Jan 2006 15:04:05 KST").as_deref(),
            Some("2006-01-02")
        );
    }

    #[test]
    fn wrong_weekday_is_tolerated() {
        assert_eq!(
            norm("Fri, 02 Jan 2006 15:04:05 +0900").as_deref(),
            Some("2006-01-02")
        );
    }

    #[test]
    fn dotted_plain_and_space_separated() {
        assert_eq!(norm("2024.05.01").as_deref(), Some("2024-05-01"));
        assert_eq!(norm("2024-05-01").as_deref(), Some("2024-05-01"));
        assert_eq!(norm(" 2024-05-01 13:45:00 ").as_deref(), Some("2024-05-01"));
    }

    #[test]
    fn iso_variants() {
        assert_eq!(
            norm("2024-05-01T10:00:00.123Z").as_deref(),
            Some("2024-05-01")
        );
        assert_eq!(norm("2024-05-01T10:00:00Z").as_deref(), Some("2024-05-01"));
        assert_eq!(
            norm("2024-05-01T10:00:00.500").as_deref(),
            Some("2024-05-01")
        );
        assert_eq!(
            norm("2024-05-01T23:30:00+09:00").as_deref(),
            Some("2024-05-01")
        );
        assert_eq!(
            norm("2024-05-01T23:30:00+0900").as_deref(),
            Some("2024-05-01")
        );
    }

    #[test]
    fn zone_of_input_decides_the_day() {
        // 23:30 at +09:00 is still May 1st locally even though UTC is earlier.
        assert_eq!(
            norm("Wed, 01 May 2024 23:30:00 +0900").as_deref(),
            Some("2024-05-01")
        );
        assert_eq!(
            norm("2024-05-01T00:30:00-05:00").as_deref(),
            Some("2024-05-01")
        );
    }

    #[test]
    fn garbage_and_empty_yield_none() {
        assert_eq!(normalize("not a date"), None);
        assert_eq!(normalize(""), None);
        assert_eq!(normalize("   "), None);
        assert_eq!(normalize("2024-13-45"), None);
    }

    #[test]
    fn output_round_trips_through_canonical_parse() {
        let inputs = [
            "Mon, 02 Jan 2006 15:04:05 -0700",
            "Tue, 10 Sep 2024 08:00:00 GMT",
            "2023.12.31",
            "2023-12-31 23:59:59",
            "2023-12-31T23:59:59.999999Z",
            "2023-12-31T23:59:59.1",
            "2023-12-31T23:59:59+01:00",
            "2023-12-31",
        ];
        for input in inputs {
            let d = normalize(input).unwrap_or_else(|| panic!("{input} should parse"));
            let again: CanonicalDate = d.to_string().parse().expect("canonical reparse");
            assert_eq!(d, again, "round trip for {input}");
        }
    }

    #[test]
    fn serde_uses_canonical_string() {
        let d = CanonicalDate::from_ymd(2024, 2, 29).unwrap();
        let json = serde_json::to_string(&d).unwrap();
        assert_eq!(json, "\"2024-02-29\"");
        let back: CanonicalDate = serde_json::from_str(&json).unwrap();
        assert_eq!(back, d);
    }
}
