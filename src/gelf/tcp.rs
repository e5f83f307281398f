use std::sync::Arc;

use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, warn};

use super::decoder::{decode, to_text_line};
use crate::ingestor::Ingestor;

/// Per-connection accumulation buffer cap (spec.md §5, "Per-TCP-connection
/// accumulation buffer... implementations MUST cap it"). A connection that
/// exceeds this without sending a null byte is dropped.
const MAX_CONNECTION_BUFFER_BYTES: usize = 16 * 1024 * 1024;
const STAGING_BUFFER_BYTES: usize = 4 * 1024;

/// Runs the GELF-over-TCP accept loop: each connection gets its own
/// handler task framing null-terminated (`\0`) concatenated JSON messages.
/// Accept errors are logged and the loop continues.
pub async fn run(listener: TcpListener, ingestor: Arc<Ingestor>) -> std::io::Result<()> {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let ingestor = ingestor.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, ingestor).await {
                        warn!(peer = %addr, "GELF TCP connection error: {e}");
                    }
                });
            }
            Err(e) => {
                error!("GELF TCP accept error: {e}");
            }
        }
    }
}

async fn handle_connection(mut stream: TcpStream, ingestor: Arc<Ingestor>) -> std::io::Result<()> {
    let mut buffer: Vec<u8> = Vec::new();
    let mut staging = vec![0u8; STAGING_BUFFER_BYTES];

    loop {
        let n = stream.read(&mut staging).await?;
        if n == 0 {
            // EOF terminates the handler gracefully; any unterminated
            // trailing bytes without a null byte are simply discarded.
            return Ok(());
        }

        buffer.extend_from_slice(&staging[..n]);

        while let Some(pos) = buffer.iter().position(|&b| b == 0) {
            let message = buffer.drain(..=pos).collect::<Vec<u8>>();
            let message = &message[..message.len() - 1]; // drop the trailing \0
            if !message.is_empty() {
                submit_message(message, &ingestor).await;
            }
        }

        if buffer.len() > MAX_CONNECTION_BUFFER_BYTES {
            warn!(
                bytes = buffer.len(),
                "GELF TCP connection exceeded the accumulation cap; dropping connection"
            );
            return Ok(());
        }
    }
}

async fn submit_message(message: &[u8], ingestor: &Ingestor) {
    match decode(message) {
        Ok(envelope) => {
            let config = ingestor.config();
            let line = to_text_line(envelope, &config.level_fields, chrono::Utc::now());
            if let Err(e) = ingestor.process_line(&line).await {
                error!("admission failed for GELF TCP message: {e}");
            }
        }
        Err(e) => {
            debug!("dropping malformed GELF TCP message: {e}");
        }
    }
}
