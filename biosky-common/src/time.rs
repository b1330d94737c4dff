//! Timestamp utilities
//!
//! Record timestamps on the network are RFC 3339 strings. Parsing is lenient:
//! anything chrono accepts as RFC 3339 is taken, plus a bare `YYYY-MM-DD` date
//! (interpreted as midnight UTC), which some clients still send for `eventDate`.

use chrono::{DateTime, NaiveDate, Utc};

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Parse a record timestamp, returning `None` if it is not recognisable
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

/// Parse a record timestamp, falling back to the current time
pub fn parse_timestamp_or_now(value: Option<&str>) -> DateTime<Utc> {
    value.and_then(parse_timestamp).unwrap_or_else(now)
}
