use std::sync::Arc;

use tokio::net::UdpSocket;
use tracing::{debug, error};

use super::decoder::{decode, to_text_line};
use crate::ingestor::Ingestor;

const DATAGRAM_BUFFER_BYTES: usize = 8 * 1024;

/// Runs the GELF-over-UDP receive loop: one GELF JSON object per datagram,
/// no concatenation, no compression, no chunking. Each datagram is copied
/// and handed to a worker task so the receive loop itself never blocks on
/// parsing or admission. Receive errors are logged; the loop continues.
pub async fn run(socket: UdpSocket, ingestor: Arc<Ingestor>) -> std::io::Result<()> {
    let mut buf = vec![0u8; DATAGRAM_BUFFER_BYTES];

    loop {
        match socket.recv_from(&mut buf).await {
            Ok((len, _addr)) => {
                let datagram = buf[..len].to_vec();
                let ingestor = ingestor.clone();
                tokio::spawn(async move {
                    submit_datagram(&datagram, &ingestor).await;
                });
            }
            Err(e) => {
                error!("GELF UDP receive error: {e}");
            }
        }
    }
}

async fn submit_datagram(datagram: &[u8], ingestor: &Ingestor) {
    match decode(datagram) {
        Ok(envelope) => {
            let config = ingestor.config();
            let line = to_text_line(envelope, &config.level_fields, chrono::Utc::now());
            if let Err(e) = ingestor.process_line(&line).await {
                error!("admission failed for GELF UDP datagram: {e}");
            }
        }
        Err(e) => {
            debug!("dropping malformed GELF UDP datagram: {e}");
        }
    }
}
