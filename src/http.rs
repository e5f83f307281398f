use std::io::Read;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

use crate::gelf;
use crate::ingestor::Ingestor;

/// Decompressed HTTP body cap (spec.md §5 mandates this only for the TCP
/// accumulation buffer; the same OOM concern applies to an unbounded POST
/// body, so the figure is reused here).
const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

#[derive(Serialize)]
struct IngestResponse {
    status: &'static str,
    lines_processed: usize,
    total_lines: u64,
    partitions: usize,
    unique_lines: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    duplicates_skipped: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    dedup_cache_size: Option<usize>,
}

#[derive(Serialize)]
struct ErrorBody {
    status: &'static str,
    error: String,
}

#[derive(Serialize)]
struct StatsResponse {
    total_lines: u64,
    batch_number: u64,
    current_batch_size: usize,
    partitions: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    duplicates_skipped: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    dedup_cache_size: Option<usize>,
}

pub fn router(ingestor: Arc<Ingestor>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ingest", post(ingest))
        .route("/gelf", post(gelf_ingest))
        .route("/flush", post(flush))
        .route("/stats", get(stats))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(ingestor)
}

async fn health() -> &'static str {
    "OK"
}

/// Splits a body into non-empty lines, tolerating both LF and CRLF.
fn split_lines(body: &str) -> impl Iterator<Item = &str> {
    body.split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
        .filter(|line| !line.is_empty())
}

async fn process_lines<'a>(
    ingestor: &Ingestor,
    lines: impl Iterator<Item = &'a str>,
) -> Result<(usize, usize), String> {
    let mut processed = 0usize;
    let mut unique = 0usize;
    for line in lines {
        processed += 1;
        match ingestor.process_line(line).await {
            Ok(outcome) => {
                if outcome.admitted {
                    unique += 1;
                }
            }
            Err(e) => {
                error!("admission failed mid-request: {e}");
                return Err(e.to_string());
            }
        }
    }
    Ok((processed, unique))
}

async fn ingest_response(
    ingestor: &Ingestor,
    processed: usize,
    unique: usize,
) -> IngestResponse {
    let stats = ingestor.stats().await;
    // Cumulative since process start, matching `/flush` and `/stats` —
    // not this request's own `processed - unique`, so the field means the
    // same thing no matter which endpoint returns it.
    let duplicates_skipped = ingestor.config().deduplicate.then_some(stats.duplicate_count);
    IngestResponse {
        status: "ok",
        lines_processed: processed,
        total_lines: stats.total_lines,
        partitions: stats.partitions,
        unique_lines: unique,
        duplicates_skipped,
        dedup_cache_size: stats.dedup_cache_size,
    }
}

async fn ingest(
    State(ingestor): State<Arc<Ingestor>>,
    body: axum::body::Bytes,
) -> Result<Json<IngestResponse>, (StatusCode, Json<ErrorBody>)> {
    let text = String::from_utf8_lossy(&body);
    match process_lines(&ingestor, split_lines(&text)).await {
        Ok((processed, unique)) => Ok(Json(ingest_response(&ingestor, processed, unique).await)),
        Err(error) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorBody { status: "error", error }),
        )),
    }
}

fn decode_body(body: &[u8], headers: &HeaderMap) -> Result<Vec<u8>, String> {
    let encoding = headers
        .get(axum::http::header::CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("identity");

    match encoding {
        "gzip" => {
            let mut decoder = flate2::read::GzDecoder::new(body);
            let mut out = Vec::new();
            decoder
                .read_to_end(&mut out)
                .map_err(|e| format!("gzip decompression failed: {e}"))?;
            Ok(out)
        }
        "deflate" => {
            let mut decoder = flate2::read::ZlibDecoder::new(body);
            let mut out = Vec::new();
            decoder
                .read_to_end(&mut out)
                .map_err(|e| format!("deflate decompression failed: {e}"))?;
            Ok(out)
        }
        _ => Ok(body.to_vec()),
    }
}

async fn gelf_ingest(
    State(ingestor): State<Arc<Ingestor>>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Result<Json<IngestResponse>, (StatusCode, Json<ErrorBody>)> {
    let decoded = decode_body(&body, &headers).map_err(|error| {
        (
            StatusCode::BAD_REQUEST,
            Json(ErrorBody { status: "error", error }),
        )
    })?;
    let text = String::from_utf8_lossy(&decoded);

    let mut processed = 0usize;
    let mut unique = 0usize;
    for line in split_lines(&text) {
        processed += 1;
        match gelf::decode(line.as_bytes()) {
            Ok(envelope) => {
                let config = ingestor.config();
                let text_line = gelf::to_text_line(envelope, &config.level_fields, chrono::Utc::now());
                match ingestor.process_line(&text_line).await {
                    Ok(outcome) => {
                        if outcome.admitted {
                            unique += 1;
                        }
                    }
                    Err(e) => {
                        error!("admission failed mid-request: {e}");
                        return Err((
                            StatusCode::INTERNAL_SERVER_ERROR,
                            Json(ErrorBody { status: "error", error: e.to_string() }),
                        ));
                    }
                }
            }
            Err(e) => {
                warn!("dropping malformed GELF message: {e}");
            }
        }
    }

    Ok(Json(ingest_response(&ingestor, processed, unique).await))
}

async fn flush(
    State(ingestor): State<Arc<Ingestor>>,
) -> Result<Json<StatsResponse>, (StatusCode, Json<ErrorBody>)> {
    match ingestor.flush().await {
        Ok(_) => {
            let stats = ingestor.stats().await;
            Ok(Json(StatsResponse {
                total_lines: stats.total_lines,
                batch_number: stats.batch_number,
                current_batch_size: stats.current_batch_size,
                partitions: stats.partitions,
                duplicates_skipped: ingestor.config().deduplicate.then_some(stats.duplicate_count),
                dedup_cache_size: stats.dedup_cache_size,
            }))
        }
        Err(e) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorBody { status: "error", error: e.to_string() }),
        )),
    }
}

async fn stats(State(ingestor): State<Arc<Ingestor>>) -> Json<StatsResponse> {
    let stats = ingestor.stats().await;
    Json(StatsResponse {
        total_lines: stats.total_lines,
        batch_number: stats.batch_number,
        current_batch_size: stats.current_batch_size,
        partitions: stats.partitions,
        duplicates_skipped: ingestor.config().deduplicate.then_some(stats.duplicate_count),
        dedup_cache_size: stats.dedup_cache_size,
    })
}
