//! Timestamp interpretation for source fields.
//!
//! Sources disagree on encodings. OCS rows are rendered as local
//! `YYYY-MM-DD HH:MM:SS`, the LDAP adapter emits RFC 3339 in UTC, and
//! directory report exports sometimes carry ISO 8601 without an offset.
//! Zone-less forms are interpreted in a configured source offset.
//!
//! | Raw value | Interpretation |
//! |-----------|----------------|
//! | missing / empty | [`FieldTime::Absent`] |
//! | `"0"`, `"-"` | [`FieldTime::Absent`] (never epoch zero) |
//! | `2024-01-10 08:30:00` | source offset |
//! | `2024-01-10T08:30:00` | source offset |
//! | `2024-01-10T08:30:00Z`, `2024-01-10T08:30:00+07:00` | explicit offset |
//! | anything else | [`FieldTime::Unparsable`] |

use anyhow::{bail, Result};
use chrono::{DateTime, FixedOffset, NaiveDateTime, Offset, TimeZone, Utc};

/// Raw values that sources use to mean "no data".
pub const SENTINELS: &[&str] = &["0", "-"];

const LOCAL_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const ISO_NAIVE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Outcome of interpreting one optional timestamp field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldTime {
    /// No value, an empty string, or a sentinel.
    Absent,
    /// A value was present but matched none of the accepted encodings.
    Unparsable,
    At(DateTime<Utc>),
}

impl FieldTime {
    pub fn instant(&self) -> Option<DateTime<Utc>> {
        match self {
            FieldTime::At(t) => Some(*t),
            _ => None,
        }
    }
}

/// Classify a raw field value.
pub fn interpret(raw: Option<&str>, source_offset: FixedOffset) -> FieldTime {
    let value = match raw.map(str::trim) {
        None | Some("") => return FieldTime::Absent,
        Some(v) => v,
    };
    if is_sentinel(value) {
        return FieldTime::Absent;
    }
    match parse_timestamp(value, source_offset) {
        Some(t) => FieldTime::At(t),
        None => FieldTime::Unparsable,
    }
}

pub fn is_sentinel(value: &str) -> bool {
    SENTINELS.contains(&value.trim())
}

/// Parse one of the accepted encodings and normalize to UTC.
pub fn parse_timestamp(value: &str, source_offset: FixedOffset) -> Option<DateTime<Utc>> {
    let value = value.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }

    for format in [LOCAL_FORMAT, ISO_NAIVE_FORMAT] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return source_offset
                .from_local_datetime(&naive)
                .single()
                .map(|dt| dt.with_timezone(&Utc));
        }
    }

    None
}

/// Render as `YYYY-MM-DDTHH:MM:SSZ`.
pub fn format_utc(t: DateTime<Utc>) -> String {
    t.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Parse a UTC offset such as `+07:00`, `-05:30`, `Z`, or `UTC`.
pub fn parse_utc_offset(s: &str) -> Result<FixedOffset> {
    let s = s.trim();
    if s.eq_ignore_ascii_case("z") || s.eq_ignore_ascii_case("utc") {
        return Ok(utc_offset());
    }

    let (sign, rest) = match s.chars().next() {
        Some('+') => (1, &s[1..]),
        Some('-') => (-1, &s[1..]),
        _ => bail!("invalid UTC offset '{}': expected +HH:MM or -HH:MM", s),
    };

    let (hours, minutes) = match rest.split_once(':') {
        Some((h, m)) => (h, m),
        None => bail!("invalid UTC offset '{}': expected +HH:MM or -HH:MM", s),
    };

    let hours: i32 = hours
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid hours in UTC offset '{}'", s))?;
    let minutes: i32 = minutes
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid minutes in UTC offset '{}'", s))?;
    if !(0..=14).contains(&hours) || !(0..60).contains(&minutes) {
        bail!("UTC offset out of range: '{}'", s);
    }

    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
        .ok_or_else(|| anyhow::anyhow!("UTC offset out of range: '{}'", s))
}

pub fn utc_offset() -> FixedOffset {
    Utc.fix()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc() -> FixedOffset {
        utc_offset()
    }

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_local_form() {
        assert_eq!(
            parse_timestamp("2024-01-10 00:00:00", utc()),
            Some(at("2024-01-10T00:00:00Z"))
        );
    }

    #[test]
    fn test_rfc3339_with_z_and_offset() {
        assert_eq!(
            parse_timestamp("2024-01-10T00:00:00Z", utc()),
            Some(at("2024-01-10T00:00:00Z"))
        );
        assert_eq!(
            parse_timestamp("2024-01-10T07:00:00+07:00", utc()),
            Some(at("2024-01-10T00:00:00Z"))
        );
    }

    #[test]
    fn test_iso_without_offset_uses_source_offset() {
        let wib = FixedOffset::east_opt(7 * 3600).unwrap();
        assert_eq!(
            parse_timestamp("2024-01-10T07:00:00", wib),
            Some(at("2024-01-10T00:00:00Z"))
        );
    }

    #[test]
    fn test_source_offset_ignored_for_explicit_zone() {
        let wib = FixedOffset::east_opt(7 * 3600).unwrap();
        assert_eq!(
            parse_timestamp("2024-01-10T00:00:00Z", wib),
            Some(at("2024-01-10T00:00:00Z"))
        );
    }

    #[test]
    fn test_interpret_absent_and_sentinels() {
        assert_eq!(interpret(None, utc()), FieldTime::Absent);
        assert_eq!(interpret(Some(""), utc()), FieldTime::Absent);
        assert_eq!(interpret(Some("  "), utc()), FieldTime::Absent);
        assert_eq!(interpret(Some("0"), utc()), FieldTime::Absent);
        assert_eq!(interpret(Some("-"), utc()), FieldTime::Absent);
    }

    #[test]
    fn test_interpret_garbage_is_unparsable() {
        assert_eq!(interpret(Some("yesterday"), utc()), FieldTime::Unparsable);
        assert_eq!(interpret(Some("2024-13-45 00:00:00"), utc()), FieldTime::Unparsable);
        assert_eq!(interpret(Some("10/01/2024"), utc()), FieldTime::Unparsable);
        assert_eq!(interpret(Some("2024-01-10"), utc()), FieldTime::Unparsable);
    }

    #[test]
    fn test_format_utc() {
        assert_eq!(format_utc(at("2024-01-10T07:00:00+07:00")), "2024-01-10T00:00:00Z");
    }

    #[test]
    fn test_parse_utc_offset() {
        assert_eq!(parse_utc_offset("+07:00").unwrap().local_minus_utc(), 7 * 3600);
        assert_eq!(parse_utc_offset("-05:30").unwrap().local_minus_utc(), -(5 * 3600 + 1800));
        assert_eq!(parse_utc_offset("Z").unwrap().local_minus_utc(), 0);
        assert_eq!(parse_utc_offset("utc").unwrap().local_minus_utc(), 0);
        assert!(parse_utc_offset("07:00").is_err());
        assert!(parse_utc_offset("+25:00").is_err());
        assert!(parse_utc_offset("+07").is_err());
    }
}
