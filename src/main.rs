mod config;
mod dedup;
mod encoder;
mod extract;
mod gelf;
mod http;
mod ingestor;
mod partition;
mod record;
mod sink;
mod writer;

use std::sync::Arc;

use clap::Parser;
use tokio::net::{TcpListener, UdpSocket};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use config::Config;
use encoder::{BlobEncoder, ParquetEncoder};
use ingestor::Ingestor;
use sink::BlobSink;
use writer::PartitionedWriter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::parse();
    info!(bucket = %config.bucket, local = config.local, "starting log-ingestor");

    let encoder: Arc<dyn BlobEncoder> = Arc::new(ParquetEncoder::new(config.compression));
    let blob_sink: Arc<dyn BlobSink> = if config.local {
        let root = std::path::PathBuf::from(&config.bucket);
        sink::ensure_local_root_exists(&root)?;
        Arc::new(sink::LocalFsSink::new(root))
    } else {
        let client = sink::build_s3_client(
            &config.region,
            config.endpoint.as_deref(),
            config.access_key.as_deref(),
            config.secret_key.as_deref(),
        )
        .await;
        Arc::new(sink::S3Sink::new(client, config.bucket.clone()))
    };

    let writer = PartitionedWriter::new(
        config.prefix.clone(),
        encoder,
        blob_sink,
        config.compression.extension(),
    );

    let ingestor = Arc::new(Ingestor::new(config.clone(), writer));

    let auto_flush = config.auto_flush.then(|| ingestor::spawn_auto_flush(ingestor.clone()));

    let gelf_tcp_listener = TcpListener::bind(("0.0.0.0", config.gelf_port)).await?;
    info!(port = config.gelf_port, "GELF TCP listening");
    let gelf_tcp_handle = tokio::spawn(gelf::tcp::run(gelf_tcp_listener, ingestor.clone()));

    let gelf_udp_socket = UdpSocket::bind(("0.0.0.0", config.gelf_port)).await?;
    info!(port = config.gelf_port, "GELF UDP listening");
    let gelf_udp_handle = tokio::spawn(gelf::udp::run(gelf_udp_socket, ingestor.clone()));

    let http_handle = if config.http {
        let listener = TcpListener::bind(("0.0.0.0", config.port)).await?;
        info!(port = config.port, "HTTP ingest server listening");
        let app = http::router(ingestor.clone());
        Some(tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                error!("HTTP server error: {e}");
            }
        }))
    } else {
        None
    };

    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("SIGINT received, shutting down");
        }
        _ = sigterm.recv() => {
            info!("SIGTERM received, shutting down");
        }
        result = gelf_tcp_handle => {
            match result {
                Ok(Err(e)) => error!("GELF TCP server error: {e}"),
                Err(e) => error!("GELF TCP task panicked: {e}"),
                Ok(Ok(())) => {}
            }
        }
        result = gelf_udp_handle => {
            match result {
                Ok(Err(e)) => error!("GELF UDP server error: {e}"),
                Err(e) => error!("GELF UDP task panicked: {e}"),
                Ok(Ok(())) => {}
            }
        }
    }

    if let Some(auto_flush) = auto_flush {
        match auto_flush.stop(&ingestor).await {
            Ok(outcome) => info!(?outcome, "final flush on shutdown complete"),
            Err(e) => error!("final flush on shutdown failed: {e}"),
        }
    } else if let Err(e) = ingestor.flush().await {
        error!("final flush on shutdown failed: {e}");
    }

    if let Some(handle) = http_handle {
        handle.abort();
    }

    Ok(())
}
