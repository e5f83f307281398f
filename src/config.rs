use clap::Parser;

/// Compression codec applied by the [`crate::encoder::BlobEncoder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
#[clap(rename_all = "lowercase")]
pub enum Compression {
    Snappy,
    Gzip,
    None,
}

impl Compression {
    pub fn extension(self) -> &'static str {
        "parquet"
    }
}

/// Process configuration, built once at startup from flags/environment and
/// passed by value into the ingestor and transport receivers. Nothing below
/// `main` reaches for ambient/global state (spec.md §9, "Global
/// configuration as ambient state").
#[derive(Debug, Clone, Parser)]
#[command(name = "log-ingestor", about = "Multi-transport log ingestion daemon")]
pub struct Config {
    /// Target bucket name (S3) or local directory root (--local).
    #[arg(long, env = "LOG_INGESTOR_BUCKET")]
    pub bucket: String,

    /// Key prefix under the bucket.
    #[arg(long, env = "LOG_INGESTOR_PREFIX", default_value = "logs")]
    pub prefix: String,

    /// Records per blob before a size-triggered flush.
    #[arg(long, env = "LOG_INGESTOR_BATCH_SIZE", default_value_t = 10_000)]
    pub batch_size: usize,

    /// Columnar compression codec.
    #[arg(long, env = "LOG_INGESTOR_COMPRESSION", value_enum, default_value_t = Compression::Snappy)]
    pub compression: Compression,

    /// Write to local filesystem instead of S3.
    #[arg(long, env = "LOG_INGESTOR_LOCAL", default_value_t = false)]
    pub local: bool,

    /// Extract the timestamp from each line instead of using ingest time.
    #[arg(long, env = "LOG_INGESTOR_WITH_TIMESTAMPS", default_value_t = true)]
    pub with_timestamps: bool,

    /// S3-compatible endpoint override (MinIO, etc.).
    #[arg(long, env = "LOG_INGESTOR_ENDPOINT")]
    pub endpoint: Option<String>,

    #[arg(long, env = "LOG_INGESTOR_ACCESS_KEY")]
    pub access_key: Option<String>,

    #[arg(long, env = "LOG_INGESTOR_SECRET_KEY")]
    pub secret_key: Option<String>,

    #[arg(long, env = "LOG_INGESTOR_REGION", default_value = "us-east-1")]
    pub region: String,

    /// Run the HTTP ingest/stats server.
    #[arg(long, env = "LOG_INGESTOR_HTTP", default_value_t = true)]
    pub http: bool,

    #[arg(long, env = "LOG_INGESTOR_PORT", default_value_t = 8080)]
    pub port: u16,

    /// Run the GELF TCP and UDP receivers on this port.
    #[arg(long, env = "LOG_INGESTOR_GELF_PORT", default_value_t = 12201)]
    pub gelf_port: u16,

    /// Enable deduplication of admitted lines by content hash.
    #[arg(long, env = "LOG_INGESTOR_DEDUPLICATE", default_value_t = false)]
    pub deduplicate: bool,

    #[arg(long, env = "LOG_INGESTOR_DEDUP_WINDOW", default_value_t = 100_000)]
    pub dedup_window: usize,

    /// Enable the periodic background flush.
    #[arg(long, env = "LOG_INGESTOR_AUTO_FLUSH", default_value_t = true)]
    pub auto_flush: bool,

    #[arg(long, env = "LOG_INGESTOR_AUTO_FLUSH_INTERVAL", default_value_t = 90)]
    pub auto_flush_interval: u64,

    /// Comma-separated JSON field names probed for the timestamp, in order.
    #[arg(
        long,
        env = "LOG_INGESTOR_TIMESTAMP_FIELDS",
        default_value = "timestamp,time,@timestamp",
        value_delimiter = ','
    )]
    pub timestamp_fields: Vec<String>,

    /// Comma-separated JSON field names probed for the severity, in order.
    #[arg(
        long,
        env = "LOG_INGESTOR_LEVEL_FIELDS",
        default_value = "level,severity,severityText",
        value_delimiter = ','
    )]
    pub level_fields: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_is_well_formed() {
        Config::command().debug_assert();
    }
}
