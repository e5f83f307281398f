use std::sync::Arc;

use arrow::array::{StringArray, TimestampNanosecondArray, UInt64Array};
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression as ParquetCompression;
use parquet::file::properties::WriterProperties;

use crate::config::Compression;
use crate::record::LogRecord;

#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),
    #[error("parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),
}

/// The columnar-format serializer spec.md §1 treats as a black box:
/// `Vec<LogRecord> -> bytes`, self-describing (schema embedded), honoring
/// the configured compression codec.
pub trait BlobEncoder: Send + Sync {
    fn encode(&self, records: &[LogRecord]) -> Result<Vec<u8>, EncodeError>;
}

/// Parquet encoder over `arrow`/`parquet`, embedding the five columns
/// spec.md §4.5 requires: `timestamp`, `message`, `level`, `line_number`,
/// `content_hash`.
pub struct ParquetEncoder {
    compression: Compression,
}

impl ParquetEncoder {
    pub fn new(compression: Compression) -> Self {
        Self { compression }
    }

    fn schema() -> Arc<Schema> {
        Arc::new(Schema::new(vec![
            Field::new(
                "timestamp",
                DataType::Timestamp(TimeUnit::Nanosecond, Some("UTC".into())),
                false,
            ),
            Field::new("message", DataType::Utf8, false),
            Field::new("level", DataType::Utf8, false),
            Field::new("line_number", DataType::UInt64, false),
            Field::new("content_hash", DataType::Utf8, false),
        ]))
    }

    fn writer_properties(&self) -> WriterProperties {
        let codec = match self.compression {
            Compression::Snappy => ParquetCompression::SNAPPY,
            Compression::Gzip => ParquetCompression::GZIP(Default::default()),
            Compression::None => ParquetCompression::UNCOMPRESSED,
        };
        WriterProperties::builder()
            .set_compression(codec)
            .build()
    }
}

impl BlobEncoder for ParquetEncoder {
    fn encode(&self, records: &[LogRecord]) -> Result<Vec<u8>, EncodeError> {
        let schema = Self::schema();

        let timestamps = TimestampNanosecondArray::from(
            records
                .iter()
                .map(|r| r.timestamp.timestamp_nanos_opt().unwrap_or(0))
                .collect::<Vec<_>>(),
        )
        .with_timezone("UTC");
        let messages = StringArray::from(
            records.iter().map(|r| r.message.as_str()).collect::<Vec<_>>(),
        );
        let levels = StringArray::from(
            records.iter().map(|r| r.level.as_str()).collect::<Vec<_>>(),
        );
        let line_numbers = UInt64Array::from(
            records.iter().map(|r| r.line_number).collect::<Vec<_>>(),
        );
        let content_hashes = StringArray::from(
            records.iter().map(|r| r.content_hash.as_str()).collect::<Vec<_>>(),
        );

        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(timestamps),
                Arc::new(messages),
                Arc::new(levels),
                Arc::new(line_numbers),
                Arc::new(content_hashes),
            ],
        )?;

        let mut buf = Vec::new();
        let mut writer = ArrowWriter::try_new(&mut buf, schema, Some(self.writer_properties()))?;
        writer.write(&batch)?;
        writer.close()?;
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use crate::record::Level;

    fn record(n: u64) -> LogRecord {
        LogRecord {
            timestamp: Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap(),
            message: format!("line {n}"),
            level: Level::Info,
            line_number: n,
            content_hash: "deadbeefdeadbeef".into(),
        }
    }

    #[test]
    fn encodes_nonempty_parquet_bytes() {
        let encoder = ParquetEncoder::new(Compression::Snappy);
        let records = vec![record(1), record(2)];
        let bytes = encoder.encode(&records).unwrap();
        assert!(!bytes.is_empty());
        // Parquet files begin and end with the magic "PAR1".
        assert_eq!(&bytes[0..4], b"PAR1");
        assert_eq!(&bytes[bytes.len() - 4..], b"PAR1");
    }

    #[test]
    fn honors_none_compression() {
        let encoder = ParquetEncoder::new(Compression::None);
        let bytes = encoder.encode(&[record(1)]).unwrap();
        assert!(!bytes.is_empty());
    }
}
