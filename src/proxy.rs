//! Range-aware streaming responses.
//!
//! One assembly path for every byte source: local files (cache units, local
//! library documents) and remote objects. Handlers resolve a name to a
//! source; this module turns the source plus an optional `Range` header
//! into the right status, headers, and body stream.

use crate::range::{self, Span};
use axum::body::Body;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde_json::json;
use shelf_storage::{ObjectStore, error::ErrorKind as StorageErrorKind};
use std::path::Path;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;

/// Cache units are content-addressed, so clients may hold them forever.
pub const IMMUTABLE_CACHE_CONTROL: &str = "public, max-age=31536000";

/// Stream a local file, honouring an optional `Range` header.
pub async fn serve_local(path: &Path, range_header: Option<&str>, content_type: &str, immutable: bool) -> Response {
    let meta = match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() => meta,
        Ok(_) => return reason(StatusCode::NOT_FOUND, "object not found"),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return reason(StatusCode::NOT_FOUND, "object not found");
        },
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "cannot stat file for streaming");
            return reason(StatusCode::INTERNAL_SERVER_ERROR, "cannot read object");
        },
    };
    let total = meta.len();
    // A zero-length cache unit is a corrupt write; treat it as absent so the
    // client retries after the renderer replaces it. Library sources may
    // legitimately be empty.
    if immutable && total == 0 {
        tracing::warn!(path = %path.display(), "zero-length cache unit treated as absent");
        return reason(StatusCode::NOT_FOUND, "object not found");
    }

    let mut file = match tokio::fs::File::open(path).await {
        Ok(file) => file,
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "cannot open file for streaming");
            return reason(StatusCode::INTERNAL_SERVER_ERROR, "cannot read object");
        },
    };

    match requested_span(range_header, total) {
        Requested::Full => {
            let body = Body::from_stream(ReaderStream::new(file));
            full_response(body, total, content_type, immutable)
        },
        Requested::Partial(span) => {
            if let Err(err) = file.seek(std::io::SeekFrom::Start(span.start)).await {
                tracing::warn!(path = %path.display(), error = %err, "seek failed");
                return reason(StatusCode::INTERNAL_SERVER_ERROR, "cannot read object");
            }
            let body = Body::from_stream(ReaderStream::new(file.take(span.len())));
            partial_response(body, span, content_type, immutable)
        },
        Requested::Unsatisfiable => unsatisfiable(total),
    }
}

/// Stream a remote object, honouring an optional `Range` header.
///
/// The object size comes from a metadata probe up front so unsatisfiable
/// ranges are rejected without a data request.
pub async fn serve_remote(store: &dyn ObjectStore, key: &str, range_header: Option<&str>, content_type: &str) -> Response {
    let meta = match store.stat(key).await {
        Ok(Some(meta)) => meta,
        Ok(None) => return reason(StatusCode::NOT_FOUND, "object not found"),
        Err(err) => return storage_failure(key, &err),
    };
    let total = meta.size;

    let (wire_range, span) = match requested_span(range_header, total) {
        Requested::Full => (None, None),
        Requested::Partial(span) => (Some((span.start, Some(span.end))), Some(span)),
        Requested::Unsatisfiable => return unsatisfiable(total),
    };
    let read = match store.get_range(key, wire_range).await {
        Ok(read) => read,
        Err(err) => return storage_failure(key, &err),
    };
    let body = Body::from_stream(ReaderStream::new(read.reader));
    match span {
        Some(span) => partial_response(body, span, content_type, false),
        None => full_response(body, total, content_type, false),
    }
}

enum Requested {
    Full,
    Partial(Span),
    Unsatisfiable,
}

fn requested_span(range_header: Option<&str>, total: u64) -> Requested {
    // A header we cannot parse is ignored, per HTTP range semantics.
    match range_header.and_then(range::parse) {
        None => Requested::Full,
        Some(byte_range) => match byte_range.resolve(total) {
            Some(span) => Requested::Partial(span),
            None => Requested::Unsatisfiable,
        },
    }
}

fn full_response(body: Body, total: u64, content_type: &str, immutable: bool) -> Response {
    respond(StatusCode::OK, body, content_type, immutable, total, None)
}

fn partial_response(body: Body, span: Span, content_type: &str, immutable: bool) -> Response {
    respond(StatusCode::PARTIAL_CONTENT, body, content_type, immutable, span.len(), Some(span.content_range()))
}

fn respond(
    status: StatusCode,
    body: Body,
    content_type: &str,
    immutable: bool,
    content_length: u64,
    content_range: Option<String>,
) -> Response {
    let mut builder = Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CONTENT_LENGTH, content_length)
        .header(header::ACCEPT_RANGES, "bytes");
    if let Some(content_range) = content_range {
        builder = builder.header(header::CONTENT_RANGE, content_range);
    }
    if immutable {
        builder = builder.header(header::CACHE_CONTROL, IMMUTABLE_CACHE_CONTROL);
    }
    builder.body(body).unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

fn unsatisfiable(total: u64) -> Response {
    let body = Body::from(json!({ "reason": "range not satisfiable" }).to_string());
    Response::builder()
        .status(StatusCode::RANGE_NOT_SATISFIABLE)
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::CONTENT_RANGE, format!("bytes */{total}"))
        .body(body)
        .unwrap_or_else(|_| StatusCode::RANGE_NOT_SATISFIABLE.into_response())
}

/// Map a storage error onto an HTTP failure, keeping "not found" and "range
/// not supported" distinguishable for clients.
fn storage_failure(key: &str, err: &shelf_storage::error::Error) -> Response {
    tracing::warn!(key, error = %err, "storage request failed while streaming");
    match &**err {
        StorageErrorKind::NotFound(_) => reason(StatusCode::NOT_FOUND, "object not found"),
        StorageErrorKind::RangeUnsupported(_) => {
            reason(StatusCode::INTERNAL_SERVER_ERROR, "range not supported by backing store")
        },
        StorageErrorKind::Unavailable => reason(StatusCode::INTERNAL_SERVER_ERROR, "storage unavailable"),
        _ => reason(StatusCode::INTERNAL_SERVER_ERROR, "storage error"),
    }
}

pub fn reason(status: StatusCode, message: &str) -> Response {
    (status, axum::Json(json!({ "reason": message }))).into_response()
}

/// Content type inferred from a file extension, for sources and artifacts
/// alike.
pub fn content_type_for(name: &str) -> &'static str {
    let extension = Path::new(name).extension().and_then(|ext| ext.to_str()).unwrap_or_default();
    match extension.to_ascii_lowercase().as_str() {
        "pdf" => "application/pdf",
        "epub" => "application/epub+zip",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "mp3" => "audio/mpeg",
        "m4a" => "audio/mp4",
        "mp4" => "video/mp4",
        "mkv" => "video/x-matroska",
        _ => "application/octet-stream",
    }
}
