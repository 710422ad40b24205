//! Timestamp parsing for heterogeneous source records
//!
//! Dumps and APIs disagree on how they encode time: unix seconds (as numbers
//! or strings), unix milliseconds, RFC 3339, naive `YYYY-MM-DD HH:MM:SS`, bare
//! dates and the legacy Twitter `Wed Oct 10 20:19:24 +0000 2018` format.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde_json::Value;

/// Values above this are treated as unix milliseconds rather than seconds
const MILLIS_CUTOFF: f64 = 1.0e12;

/// Parse a JSON value holding a timestamp in any supported encoding
pub fn parse_value(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => n.as_f64().and_then(from_unix_f64),
        Value::String(s) => parse_str(s),
        _ => None,
    }
}

/// Parse a string timestamp in any supported encoding
pub fn parse_str(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(n) = s.parse::<f64>() {
        return from_unix_f64(n);
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    // Twitter v1.1 created_at
    if let Ok(dt) = DateTime::parse_from_str(s, "%a %b %d %H:%M:%S %z %Y") {
        return Some(dt.with_timezone(&Utc));
    }

    for fmt in [
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
    ] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }

    // "2024-01-10 12:00:00+00:00" and friends
    if let Ok(dt) = DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%z") {
        return Some(dt.with_timezone(&Utc));
    }

    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

fn from_unix_f64(n: f64) -> Option<DateTime<Utc>> {
    if !n.is_finite() || n < 0.0 {
        return None;
    }
    let millis = if n >= MILLIS_CUTOFF { n } else { n * 1000.0 };
    Utc.timestamp_millis_opt(millis as i64).single()
}
