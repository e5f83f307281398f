use serde_json::Value;

use crate::record::Level;

/// Extracts a normalized severity from a raw text line, per spec.md §4.1.
///
/// If the line begins with `{`, it is parsed as JSON (a real parse, not the
/// reference implementation's regex scan — spec.md §9 calls the regex
/// approach out as a bug) and each name in `level_fields` is checked in
/// order for a top-level string or numeric value. Non-JSON lines, or JSON
/// lines whose configured fields are all absent, yield `Level::Unknown` —
/// the canonical GELF-path behavior (spec.md §9's resolved Open Question;
/// the legacy substring fallback is not implemented here).
pub fn extract_severity(line: &str, level_fields: &[String]) -> Level {
    if !line.trim_start().starts_with('{') {
        return Level::Unknown;
    }

    let Ok(Value::Object(map)) = serde_json::from_str::<Value>(line) else {
        return Level::Unknown;
    };

    for field in level_fields {
        match map.get(field) {
            Some(Value::String(s)) => return Level::normalize(s),
            Some(Value::Number(n)) => {
                if let Some(n) = n.as_i64() {
                    return level_from_otel_severity_number(n);
                }
            }
            _ => {}
        }
    }

    Level::Unknown
}

/// Maps an OpenTelemetry-ish severity number to a normalized level:
/// `1..4 -> debug`, `5..8 -> info`, `9..12 -> warn`, `>=13 -> error`.
fn level_from_otel_severity_number(n: i64) -> Level {
    match n {
        1..=4 => Level::Debug,
        5..=8 => Level::Info,
        9..=12 => Level::Warn,
        n if n >= 13 => Level::Error,
        _ => Level::Unknown,
    }
}

/// Fallback mapping from a GELF syslog `level` integer (0-7) to a
/// normalized level, consulted only when the embedded message itself
/// yields no level (spec.md §4.1, "GELF-specific severity extractor").
pub fn level_from_gelf_syslog_level(level: u8) -> Level {
    match level {
        0..=2 => Level::Error, // Emergency, Alert, Critical
        3 => Level::Error,     // Error
        4 => Level::Warn,      // Warning
        5..=6 => Level::Info,  // Notice, Informational
        7 => Level::Debug,     // Debug
        _ => Level::Info,
    }
}
