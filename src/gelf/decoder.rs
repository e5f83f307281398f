use std::collections::HashMap;
use std::io::Read;

use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::extract::severity::{extract_severity, level_from_gelf_syslog_level};
use crate::record::Level;

/// GELF chunking magic bytes — chunked messages are detected and rejected
/// rather than silently misparsed (spec.md §9).
const CHUNK_MAGIC: [u8; 2] = [0x1e, 0x0f];

#[derive(Debug, thiserror::Error)]
pub enum GelfError {
    #[error("chunked GELF messages are not supported")]
    Chunked,
    #[error("failed to decompress GELF body: {0}")]
    Decompress(#[from] std::io::Error),
    #[error("malformed GELF JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// The parsed form of a GELF message (spec.md §3). Additional fields
/// (`_`-prefixed extras) are captured via `flatten` and filtered out of
/// the standard fields when building the normalized record.
#[derive(Debug, Deserialize)]
pub struct GelfEnvelope {
    #[serde(default)]
    pub version: Option<String>,
    pub host: String,
    pub short_message: String,
    #[serde(default)]
    pub full_message: Option<String>,
    #[serde(default)]
    pub timestamp: Option<f64>,
    #[serde(default = "default_level")]
    pub level: u8,
    #[serde(default)]
    pub facility: Option<String>,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

fn default_level() -> u8 {
    6 // Informational, per the GELF spec's own default.
}

fn is_gzip(data: &[u8]) -> bool {
    data.len() >= 2 && data[0] == 0x1f && data[1] == 0x8b
}

fn is_zlib(data: &[u8]) -> bool {
    data.len() >= 2 && data[0] == 0x78 && matches!(data[1], 0x01 | 0x5e | 0x9c | 0xda)
}

fn decompress_gzip(data: &[u8]) -> Result<Vec<u8>, std::io::Error> {
    let mut decoder = flate2::read::GzDecoder::new(data);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

fn decompress_zlib(data: &[u8]) -> Result<Vec<u8>, std::io::Error> {
    let mut decoder = flate2::read::ZlibDecoder::new(data);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

/// Decodes a single GELF payload (possibly gzip/zlib-compressed). Chunked
/// messages are rejected as an error rather than dropped silently so
/// callers can log why the message was refused.
pub fn decode(data: &[u8]) -> Result<GelfEnvelope, GelfError> {
    if data.len() >= 2 && data[0] == CHUNK_MAGIC[0] && data[1] == CHUNK_MAGIC[1] {
        return Err(GelfError::Chunked);
    }

    let json_bytes = if is_gzip(data) {
        decompress_gzip(data)?
    } else if is_zlib(data) {
        decompress_zlib(data)?
    } else {
        data.to_vec()
    };

    Ok(serde_json::from_slice(&json_bytes)?)
}

fn timestamp_from_gelf(ts: Option<f64>, now: DateTime<Utc>) -> DateTime<Utc> {
    match ts {
        None => now,
        Some(ts) if ts == 0.0 => now,
        Some(ts) => {
            let secs = ts.trunc() as i64;
            let nanos = (ts.fract() * 1_000_000_000.0).round() as u32;
            match Utc.timestamp_opt(secs, nanos) {
                chrono::LocalResult::Single(dt) => dt,
                _ => now,
            }
        }
    }
}

/// Converts a decoded envelope into the §4.3 canonical JSON line, ready to
/// be submitted as a text line through the normal admission path.
///
/// Level resolution order: the embedded-message extractor runs against
/// `short_message` first; if it yields `unknown`, the GELF syslog integer
/// is consulted. Extras have their leading `_` stripped and are merged at
/// the top level; a built-in field name always wins over a same-named
/// extra (spec.md §4.3 point 3's recommended collision policy).
pub fn to_text_line(envelope: GelfEnvelope, level_fields: &[String], now: DateTime<Utc>) -> String {
    let level = match extract_severity(&envelope.short_message, level_fields) {
        Level::Unknown => level_from_gelf_syslog_level(envelope.level),
        level => level,
    };
    let timestamp = timestamp_from_gelf(envelope.timestamp, now);

    let mut obj = Map::new();
    for (key, value) in envelope.extra {
        if let Some(stripped) = key.strip_prefix('_') {
            obj.insert(stripped.to_string(), value);
        }
    }

    obj.insert("message".to_string(), Value::String(envelope.short_message));
    obj.insert("level".to_string(), Value::String(level.as_str().to_string()));
    obj.insert(
        "timestamp".to_string(),
        Value::String(timestamp.to_rfc3339_opts(chrono::SecondsFormat::Nanos, true)),
    );
    obj.insert("host".to_string(), Value::String(envelope.host));
    if let Some(full) = envelope.full_message {
        obj.insert("full_message".to_string(), Value::String(full));
    }
    if let Some(facility) = envelope.facility.filter(|f| !f.is_empty()) {
        obj.insert("facility".to_string(), Value::String(facility));
    }

    Value::Object(obj).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields() -> Vec<String> {
        vec!["level".into(), "severity".into(), "severityText".into()]
    }

    #[test]
    fn decodes_minimal_envelope() {
        let json = r#"{"version":"1.1","host":"h","short_message":"hi"}"#;
        let env = decode(json.as_bytes()).unwrap();
        assert_eq!(env.host, "h");
        assert_eq!(env.short_message, "hi");
        assert_eq!(env.level, 6);
    }

    #[test]
    fn rejects_chunked_magic() {
        let mut data = vec![0x1e, 0x0f];
        data.extend_from_slice(b"garbage");
        assert!(matches!(decode(&data), Err(GelfError::Chunked)));
    }

    #[test]
    fn extras_are_stripped_and_merged() {
        let json = r#"{"version":"1.1","host":"h","short_message":"hi","level":6,"_service":"api"}"#;
        let env = decode(json.as_bytes()).unwrap();
        let now = Utc::now();
        let line = to_text_line(env, &fields(), now);
        let parsed: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed["service"], "api");
        assert!(parsed.get("_service").is_none());
    }

    #[test]
    fn zero_timestamp_uses_ingest_time() {
        let json = r#"{"version":"1.1","host":"h","short_message":"hi","timestamp":0}"#;
        let env = decode(json.as_bytes()).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap();
        let line = to_text_line(env, &fields(), now);
        let parsed: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed["timestamp"].as_str().unwrap(), now.to_rfc3339_opts(chrono::SecondsFormat::Nanos, true));
    }

    #[test]
    fn syslog_level_fallback_when_message_has_no_level_tokens() {
        let json = r#"{"version":"1.1","host":"h","short_message":"hi","level":6}"#;
        let env = decode(json.as_bytes()).unwrap();
        let line = to_text_line(env, &fields(), Utc::now());
        let parsed: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed["level"], "info");
    }

    #[test]
    fn builtin_wins_over_colliding_extra() {
        let json = r#"{"version":"1.1","host":"h","short_message":"hi","_message":"spoofed"}"#;
        let env = decode(json.as_bytes()).unwrap();
        let line = to_text_line(env, &fields(), Utc::now());
        let parsed: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed["message"], "hi");
    }
}
