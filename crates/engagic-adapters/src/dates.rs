// SPDX-License-Identifier: MIT OR Apache-2.0
//! Vendor date parsing: a fixed list of formats tried in order, then a
//! lenient fallback (§4.1 "Date parser").

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

const FIXED_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f%:z",
    "%Y-%m-%dT%H:%M:%S%:z",
    "%Y-%m-%dT%H:%M:%S%.fZ",
    "%Y-%m-%dT%H:%M:%SZ",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d",
    "%b %d, %Y %I:%M %p",
    "%B %d, %Y %I:%M %p",
    "%m/%d/%Y %I:%M %p",
    "%m/%d/%Y",
];

/// Parse a vendor-native date string against the fixed format list, then a
/// lenient fallback. Returns `None` on total failure rather than erroring —
/// an unparseable date does not reject the whole record (§4.1).
pub fn parse_vendor_date(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }

    for format in FIXED_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
        }
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, format) {
            return Some(DateTime::from_naive_utc_and_offset(date.and_hms_opt(0, 0, 0)?, Utc));
        }
    }

    fuzzy_parse(trimmed)
}

/// Lenient fallback: pull the first `\d{1,2}/\d{1,2}/\d{4}` or
/// `\d{4}-\d{2}-\d{2}` substring out of noisy vendor text and parse that.
fn fuzzy_parse(text: &str) -> Option<DateTime<Utc>> {
    let iso = regex::Regex::new(r"\d{4}-\d{2}-\d{2}").ok()?;
    if let Some(m) = iso.find(text) {
        if let Ok(date) = NaiveDate::parse_from_str(m.as_str(), "%Y-%m-%d") {
            return Some(DateTime::from_naive_utc_and_offset(date.and_hms_opt(0, 0, 0)?, Utc));
        }
    }
    let slash = regex::Regex::new(r"\d{1,2}/\d{1,2}/\d{4}").ok()?;
    if let Some(m) = slash.find(text) {
        if let Ok(date) = NaiveDate::parse_from_str(m.as_str(), "%m/%d/%Y") {
            return Some(DateTime::from_naive_utc_and_offset(date.and_hms_opt(0, 0, 0)?, Utc));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rfc3339() {
        assert!(parse_vendor_date("2026-03-05T18:00:00Z").is_some());
    }

    #[test]
    fn parses_month_name_format() {
        let parsed = parse_vendor_date("Mar 5, 2026 6:00 PM").unwrap();
        assert_eq!(parsed.format("%Y-%m-%d").to_string(), "2026-03-05");
    }

    #[test]
    fn parses_slash_format() {
        let parsed = parse_vendor_date("3/5/2026 6:00 PM").unwrap();
        assert_eq!(parsed.format("%Y-%m-%d").to_string(), "2026-03-05");
    }

    #[test]
    fn falls_back_to_fuzzy_extraction() {
        let parsed = parse_vendor_date("Meeting scheduled for 2026-03-05 in council chambers").unwrap();
        assert_eq!(parsed.format("%Y-%m-%d").to_string(), "2026-03-05");
    }

    #[test]
    fn returns_none_for_garbage() {
        assert!(parse_vendor_date("not a date at all").is_none());
    }

    #[test]
    fn returns_none_for_empty() {
        assert!(parse_vendor_date("   ").is_none());
    }
}
