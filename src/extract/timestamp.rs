use std::sync::OnceLock;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use regex::Regex;
use serde_json::Value;

fn bracket_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[([^\]]+)\]").unwrap())
}

/// Anchored prefix patterns for each format `parse_any` attempts against a
/// raw line (spec.md §4.1 point 3, "against the line prefix"). chrono's
/// `parse_from_str` requires the *entire* input to match the format with
/// no trailing characters, so each format needs its own regex to carve out
/// just the candidate substring before handing it to chrono.
fn rfc3339_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}(?:\.\d+)?(?:Z|[+-]\d{2}:\d{2})").unwrap()
    })
}

fn space_datetime_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2}").unwrap())
}

fn t_datetime_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}").unwrap())
}

fn common_log_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d{2}/[A-Za-z]{3}/\d{4}:\d{2}:\d{2}:\d{2} [+-]\d{4}").unwrap())
}

/// Accepts a parsed timestamp only if its year falls strictly between 2000
/// and 2100 (spec.md §4.1 point 4) — guards against epoch-adjacent garbage
/// parses picking up stray digits as a year.
fn in_range(dt: DateTime<Utc>) -> bool {
    let year = dt.format("%Y").to_string().parse::<i32>().unwrap_or(0);
    year > 2000 && year < 2100
}

fn try_rfc3339(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn try_naive(s: &str, fmt: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s, fmt)
        .ok()
        .and_then(|naive| Utc.from_local_datetime(&naive).single())
}

fn try_offset(s: &str, fmt: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_str(s, fmt)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Applies a format directly, requiring `s` to match it exactly (used for
/// JSON field values, which contain nothing but the timestamp).
fn parse_exact(s: &str) -> Option<DateTime<Utc>> {
    try_rfc3339(s)
        .or_else(|| try_naive(s, "%Y-%m-%dT%H:%M:%S%.f"))
        .or_else(|| try_naive(s, "%Y-%m-%d %H:%M:%S%.f"))
        .or_else(|| try_naive(s, "%Y-%m-%dT%H:%M:%S"))
        .or_else(|| try_naive(s, "%Y-%m-%d %H:%M:%S"))
        .filter(|dt| in_range(*dt))
}

/// Scans a raw (non-JSON) line for a timestamp-shaped prefix and parses
/// just that substring, never the whole line — chrono requires an exact,
/// full-string match per format, so each candidate format gets its own
/// anchored regex to carve out its prefix first (spec.md §4.1 point 3).
fn parse_from_prefix(line: &str) -> Option<DateTime<Utc>> {
    rfc3339_re()
        .find(line)
        .and_then(|m| try_rfc3339(m.as_str()))
        .or_else(|| {
            space_datetime_re()
                .find(line)
                .and_then(|m| try_naive(m.as_str(), "%Y-%m-%d %H:%M:%S"))
        })
        .or_else(|| {
            t_datetime_re()
                .find(line)
                .and_then(|m| try_naive(m.as_str(), "%Y-%m-%dT%H:%M:%S"))
        })
        .or_else(|| {
            common_log_re()
                .find(line)
                .and_then(|m| try_offset(m.as_str(), "%d/%b/%Y:%H:%M:%S %z"))
        })
        .filter(|dt| in_range(*dt))
}

/// Extracts a timestamp from a raw text line per spec.md §4.1's ordered
/// fallback chain. `now` is the caller's ingest time, returned unchanged on
/// total parse failure.
pub fn extract_timestamp(line: &str, timestamp_fields: &[String], now: DateTime<Utc>) -> DateTime<Utc> {
    let trimmed = line.trim_start();

    if trimmed.starts_with('{') {
        if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(trimmed) {
            for field in timestamp_fields {
                if let Some(Value::String(s)) = map.get(field) {
                    if let Some(dt) = parse_exact(s) {
                        return dt;
                    }
                }
            }
        }
        return now;
    }

    if let Some(caps) = bracket_re().captures(line) {
        if let Some(m) = caps.get(1) {
            if let Some(dt) = try_naive(m.as_str(), "%a %b %d %H:%M:%S %Y") {
                if in_range(dt) {
                    return dt;
                }
            }
        }
    }

    if let Some(dt) = parse_from_prefix(line) {
        return dt;
    }

    now
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields() -> Vec<String> {
        vec!["timestamp".into(), "time".into(), "@timestamp".into()]
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 7, 28, 0, 0, 0).unwrap()
    }

    #[test]
    fn extracts_rfc3339_from_json_field() {
        let line = r#"{"timestamp":"2024-01-15T10:30:00Z","message":"db down"}"#;
        let dt = extract_timestamp(line, &fields(), now());
        assert_eq!(dt, Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap());
    }

    #[test]
    fn falls_back_through_configured_field_order() {
        let line = r#"{"time":"2024-01-15 10:30:00"}"#;
        let dt = extract_timestamp(line, &fields(), now());
        assert_eq!(dt, Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap());
    }

    #[test]
    fn json_with_no_parseable_timestamp_returns_now() {
        let line = r#"{"message":"no ts here"}"#;
        assert_eq!(extract_timestamp(line, &fields(), now()), now());
    }

    #[test]
    fn apache_clf_bracket_format() {
        let line = "127.0.0.1 - - [Mon Jan 15 10:30:00 2024] \"GET / HTTP/1.1\" 200";
        let dt = extract_timestamp(line, &fields(), now());
        assert_eq!(dt, Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap());
    }

    #[test]
    fn common_log_format_prefix_with_trailing_text() {
        let line = "15/Jan/2024:10:30:00 +0000 something happened";
        let dt = extract_timestamp(line, &fields(), now());
        assert_eq!(dt, Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap());
    }

    #[test]
    fn rfc3339_prefix_with_trailing_text() {
        let line = "2024-01-15T10:30:00Z some message after the timestamp";
        let dt = extract_timestamp(line, &fields(), now());
        assert_eq!(dt, Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap());
    }

    #[test]
    fn out_of_range_year_is_rejected() {
        let line = r#"{"timestamp":"1970-01-01T00:00:00Z"}"#;
        assert_eq!(extract_timestamp(line, &fields(), now()), now());
    }

    #[test]
    fn unparseable_line_returns_now() {
        assert_eq!(extract_timestamp("just some text", &fields(), now()), now());
    }
}
