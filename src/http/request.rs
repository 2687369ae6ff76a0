//! Request identification.
//!
//! # Responsibilities
//! - Name the request ID header
//! - Build the per-request tracing span carrying that ID
//!
//! # Design Decisions
//! - IDs are UUID v4, set by `SetRequestIdLayer` before tracing starts
//! - An ID supplied by the client is kept, and echoed back on the response

use axum::body::Body;
use axum::http::{HeaderMap, Request};
use tracing::Span;

pub const X_REQUEST_ID: &str = "x-request-id";

/// The request ID header value, or `"unknown"` when absent or not UTF-8.
pub fn request_id(headers: &HeaderMap) -> &str {
    headers
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
}

/// Span used by the trace layer for every request.
pub fn make_request_span(request: &Request<Body>) -> Span {
    tracing::info_span!(
        "request",
        method = %request.method(),
        path = %request.uri().path(),
        request_id = %request_id(request.headers()),
    )
}
