//! Serving generated archives over HTTP, with Range support against the generated bytes.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use axum::{
    Router,
    body::Body,
    extract::State,
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use tokio::net::TcpListener;
use tracing::{error, info};

use super::DirectoryProvider;
use crate::zip::{ChecksumCache, ZipStream};

/// How a request's `Range` header maps onto an archive of known length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeRequest {
    /// No usable range: send the whole archive.
    Full,
    /// Inclusive byte range, clamped to the archive.
    Partial { start: u64, end: u64 },
    /// The range starts past the end of the archive.
    Unsatisfiable,
}

/// Interpret a `Range` header value against an archive of `total` bytes.
///
/// Only single `bytes=` ranges are honored; anything else (other units,
/// multiple ranges, malformed values) falls back to [`RangeRequest::Full`].
pub fn parse_range_header(value: Option<&str>, total: u64) -> RangeRequest {
    let Some(spec) = value.and_then(|v| v.trim().strip_prefix("bytes=")) else {
        return RangeRequest::Full;
    };
    if spec.contains(',') {
        return RangeRequest::Full;
    }
    let Some((first, last)) = spec.split_once('-') else {
        return RangeRequest::Full;
    };
    let (first, last) = (first.trim(), last.trim());

    if first.is_empty() {
        // suffix range: the final `n` bytes
        let Ok(n) = last.parse::<u64>() else {
            return RangeRequest::Full;
        };
        if n == 0 || total == 0 {
            return RangeRequest::Unsatisfiable;
        }
        return RangeRequest::Partial {
            start: total.saturating_sub(n),
            end: total - 1,
        };
    }

    let Ok(start) = first.parse::<u64>() else {
        return RangeRequest::Full;
    };
    let end = if last.is_empty() {
        u64::MAX
    } else {
        match last.parse::<u64>() {
            Ok(end) if end >= start => end,
            _ => return RangeRequest::Full,
        }
    };

    if start >= total {
        return RangeRequest::Unsatisfiable;
    }
    RangeRequest::Partial {
        start,
        end: end.min(total - 1),
    }
}

#[derive(Clone)]
struct ServeState {
    root: Arc<PathBuf>,
    cache: Arc<ChecksumCache>,
    budget: Duration,
}

/// Router exposing `GET /archive.zip` for the directory at `root`.
///
/// Every request walks the directory afresh; `cache` is shared so unchanged
/// files are not re-checksummed when they fall outside a requested range.
pub fn router(root: PathBuf, cache: Arc<ChecksumCache>, budget: Duration) -> Router {
    Router::new()
        .route("/archive.zip", get(download))
        .with_state(ServeState {
            root: Arc::new(root),
            cache,
            budget,
        })
}

/// Serve `root` as `/archive.zip` on `addr` until the process exits.
pub async fn serve(root: PathBuf, addr: SocketAddr, budget: Duration) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    serve_listener(listener, root, Arc::new(ChecksumCache::new()), budget).await
}

/// Like [`serve`], on an already bound listener.
pub async fn serve_listener(
    listener: TcpListener,
    root: PathBuf,
    cache: Arc<ChecksumCache>,
    budget: Duration,
) -> Result<()> {
    info!(addr = %listener.local_addr()?, root = %root.display(), "serving /archive.zip");

    axum::serve(listener, router(root, cache, budget))
        .await
        .map_err(|e| anyhow!("archive server: {e}"))
}

async fn download(State(state): State<ServeState>, headers: HeaderMap) -> Response {
    match archive_response(&state, &headers).await {
        Ok(response) => response,
        Err(e) => {
            error!(error = %e, "archive request failed");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

async fn archive_response(state: &ServeState, headers: &HeaderMap) -> Result<Response> {
    let provider = DirectoryProvider::new(state.root.as_ref().clone());
    let mut zip = ZipStream::new(provider, state.cache.clone());
    let total = zip.calculate_size(state.budget).await?;
    let range = headers.get(header::RANGE).and_then(|v| v.to_str().ok());

    let builder = Response::builder()
        .header(header::CONTENT_TYPE, "application/zip")
        .header(
            header::CONTENT_DISPOSITION,
            "attachment; filename=\"archive.zip\"",
        );

    // Unknown length: chunked transfer, and ranges cannot be resolved.
    let Some(total) = total else {
        info!(range = ?range, "streaming archive of unknown length");
        return Ok(builder
            .status(StatusCode::OK)
            .body(Body::from_stream(zip.into_stream()))?);
    };

    let builder = builder.header(header::ACCEPT_RANGES, "bytes");
    let response = match parse_range_header(range, total) {
        RangeRequest::Full => {
            info!(total, "streaming archive");
            builder
                .status(StatusCode::OK)
                .header(header::CONTENT_LENGTH, total)
                .body(Body::from_stream(zip.into_stream()))?
        }
        RangeRequest::Partial { start, end } => {
            info!(start, end, total, "streaming archive range");
            zip.apply_range(start, end)?;
            builder
                .status(StatusCode::PARTIAL_CONTENT)
                .header(header::CONTENT_RANGE, format!("bytes {start}-{end}/{total}"))
                .header(header::CONTENT_LENGTH, end - start + 1)
                .body(Body::from_stream(zip.into_stream()))?
        }
        RangeRequest::Unsatisfiable => {
            info!(range = ?range, total, "unsatisfiable archive range");
            zip.early_close();
            builder
                .status(StatusCode::RANGE_NOT_SATISFIABLE)
                .header(header::CONTENT_RANGE, format!("bytes */{total}"))
                .body(Body::empty())?
        }
    };
    Ok(response)
}
