use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::partition::partition_key;

/// Normalized severity token. `Unknown` is the fallback when no extractor
/// can determine a level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Error,
    Warn,
    Info,
    Debug,
    Unknown,
}

impl Level {
    pub fn as_str(self) -> &'static str {
        match self {
            Level::Error => "error",
            Level::Warn => "warn",
            Level::Info => "info",
            Level::Debug => "debug",
            Level::Unknown => "unknown",
        }
    }

    /// Normalizes a raw level token per spec.md §4.1:
    /// warning->warn, err->error, trace->debug, fatal|critical|panic->error,
    /// anything else passes through lowercased.
    pub fn normalize(raw: &str) -> Level {
        match raw.to_ascii_lowercase().as_str() {
            "error" | "err" | "fatal" | "critical" | "panic" => Level::Error,
            "warn" | "warning" => Level::Warn,
            "info" => Level::Info,
            "debug" | "trace" => Level::Debug,
            _ => Level::Unknown,
        }
    }
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single normalized log record, as produced by the normalizer and
/// consumed by the batch buffer, dedup window and partitioned writer.
#[derive(Debug, Clone, Serialize)]
pub struct LogRecord {
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub level: Level,
    pub line_number: u64,
    pub content_hash: String,
}

impl LogRecord {
    /// First 8 bytes of SHA-256 over `message ∥ timestamp.RFC3339Nano`,
    /// hex-encoded — deterministic given `(message, timestamp)`.
    pub fn content_hash(message: &str, timestamp: DateTime<Utc>) -> String {
        let mut hasher = Sha256::new();
        hasher.update(message.as_bytes());
        hasher.update(
            timestamp
                .to_rfc3339_opts(chrono::SecondsFormat::Nanos, true)
                .as_bytes(),
        );
        let digest = hasher.finalize();
        hex::encode(&digest[..8])
    }
}

/// An in-memory group of records awaiting encoding and write. Mutable while
/// accumulating; becomes immutable once handed to the writer on rollover.
#[derive(Debug, Clone)]
pub struct Batch {
    pub records: Vec<LogRecord>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub batch_number: u64,
    observed_partitions: HashSet<String>,
}

impl Batch {
    pub fn new(batch_number: u64) -> Self {
        Self {
            records: Vec::new(),
            start_time: None,
            end_time: None,
            batch_number,
            observed_partitions: HashSet::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn observed_partitions(&self) -> &HashSet<String> {
        &self.observed_partitions
    }

    /// Appends a record, updating `start_time`/`end_time` and the observed
    /// partition-key set (statistics only — does not affect grouping at
    /// write time, which recomputes `partition_key` per record).
    pub fn push(&mut self, record: LogRecord) {
        self.start_time = Some(match self.start_time {
            Some(t) if t <= record.timestamp => t,
            _ => record.timestamp,
        });
        self.end_time = Some(match self.end_time {
            Some(t) if t >= record.timestamp => t,
            _ => record.timestamp,
        });
        self.observed_partitions.insert(partition_key(&record));
        self.records.push(record);
    }
}
