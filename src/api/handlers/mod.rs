//! Upload API request handlers
//!
//! Split into submodules by domain:
//! - `sessions` — session create, status snapshot, draft metadata
//! - `chunks` — chunk PUT / status probe, abort
//! - `status` — health check

mod chunks;
mod sessions;
mod status;

use crate::content_range::{range_header, upload_offset_header};
use crate::metrics::Metrics;
use crate::ratelimit::RateLimiter;
use crate::service::UploadSessionService;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use std::sync::Arc;

// Re-export all public handlers so callers don't reach into submodules.
pub use chunks::{abort_upload, put_chunk};
pub use sessions::{create_session, get_status, update_draft, CreateQuery, CreateSessionBody};
pub use status::{health_check, HealthResponse};

/// Application state shared across handlers
pub struct AppState {
    pub service: UploadSessionService,
    pub metrics: Option<Arc<Metrics>>,
    pub create_limiter: RateLimiter,
    pub chunk_limiter: RateLimiter,
    /// Object store kind ("s3" / "memory"), reported by /health.
    pub storage_kind: &'static str,
    pub started_at: std::time::Instant,
}

// ---------------------------------------------------------------------------
// Shared utility functions used across handler submodules
// ---------------------------------------------------------------------------

/// Build the `308 Resume Incomplete` progress response: `Upload-Offset`
/// always, `Range: bytes=0-{offset-1}` unless nothing was received yet.
pub(crate) fn progress_response(bytes_received: u64) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert("Upload-Offset", hval(&upload_offset_header(bytes_received)));
    if let Some(range) = range_header(bytes_received) {
        headers.insert("Range", hval(&range));
    }
    headers.insert("Cache-Control", HeaderValue::from_static("no-store"));

    (StatusCode::PERMANENT_REDIRECT, headers).into_response()
}

pub(crate) fn hval(s: &str) -> HeaderValue {
    HeaderValue::from_bytes(s.as_bytes()).unwrap_or_else(|_| HeaderValue::from_static(""))
}
