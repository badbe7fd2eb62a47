//! Core types for reelgate resumable upload sessions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Tool version identifier — uses crate name and version from Cargo.toml
pub const REELGATE_TOOL: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Maximum part number accepted by S3-compatible stores.
pub const MAX_PART_NUMBER: u32 = 10_000;

/// 5 MiB — S3 part-size granularity; chunk sizes are rounded up to a multiple.
pub const PART_SIZE_STEP: u64 = 5 * 1024 * 1024;

/// Lifecycle of an upload session.
///
/// `uploading → uploaded → processing → playable → hd_ready` is the forward
/// path; `failed` and `aborted` are terminal edges. Only `uploading` accepts
/// chunk PUTs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    Uploading,
    Uploaded,
    Processing,
    Playable,
    HdReady,
    Failed,
    Aborted,
}

impl UploadStatus {
    /// Database string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uploading => "uploading",
            Self::Uploaded => "uploaded",
            Self::Processing => "processing",
            Self::Playable => "playable",
            Self::HdReady => "hd_ready",
            Self::Failed => "failed",
            Self::Aborted => "aborted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "uploading" => Some(Self::Uploading),
            "uploaded" => Some(Self::Uploaded),
            "processing" => Some(Self::Processing),
            "playable" => Some(Self::Playable),
            "hd_ready" => Some(Self::HdReady),
            "failed" => Some(Self::Failed),
            "aborted" => Some(Self::Aborted),
            _ => None,
        }
    }

    /// Only `uploading` sessions accept chunk PUTs.
    pub fn can_accept_chunks(&self) -> bool {
        matches!(self, Self::Uploading)
    }

    /// The bytes have been handed off to the object store (status ≥ uploaded).
    pub fn completed(&self) -> bool {
        matches!(
            self,
            Self::Uploaded | Self::Processing | Self::Playable | Self::HdReady
        )
    }

    /// `failed` and `aborted` never leave their state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed | Self::Aborted)
    }
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One chunk stored in the object store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Part {
    pub part_number: u32,
    pub etag: String,
    pub size: u64,
    pub uploaded_at: DateTime<Utc>,
}

/// The authoritative per-upload record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadSession {
    /// Opaque URL-safe token; doubles as the chunk endpoint path segment.
    pub id: String,
    pub user_id: String,
    pub filename: String,
    pub mime_type: String,
    pub total_bytes: u64,
    /// Target chunk size for clients; every part except the last is this size.
    pub chunk_size: u64,
    pub storage_key: String,
    /// Multipart upload handle from the object store.
    pub storage_upload_id: String,
    pub bytes_received: u64,
    /// Dense 1..N, unique by part_number, sorted ascending.
    pub parts: Vec<Part>,
    pub status: UploadStatus,
    pub idempotency_key: Option<String>,
    pub error_code: Option<String>,
    pub cid: Option<String>,
    pub pin_status: Option<String>,
    pub playback_url: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UploadSession {
    /// Expected part count for a fully uploaded session.
    pub fn total_parts(&self) -> u64 {
        self.total_bytes.div_ceil(self.chunk_size)
    }

    /// Upload progress, 0..100.
    pub fn progress_percent(&self) -> f64 {
        if self.total_bytes == 0 {
            return 100.0;
        }
        (self.bytes_received as f64 / self.total_bytes as f64) * 100.0
    }

    pub fn is_complete(&self) -> bool {
        self.bytes_received >= self.total_bytes
    }

    /// Byte size of the final chunk (may be smaller than `chunk_size`).
    pub fn final_chunk_size(&self) -> u64 {
        let rem = self.total_bytes % self.chunk_size;
        if rem == 0 {
            self.chunk_size
        } else {
            rem
        }
    }
}

/// Optional metadata bag attached to a session at create time.
/// The core never gates uploads on it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentDraft {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visibility: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Set by downstream processing once a thumbnail is rendered.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
}

impl ContentDraft {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.tags.is_empty()
            && self.visibility.is_none()
            && self.category.is_none()
            && self.thumbnail_url.is_none()
    }
}

/// Append-only upload telemetry event. Writes are fire-and-forget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadMetric {
    pub upload_id: String,
    pub user_id: String,
    pub event_type: MetricEvent,
    pub chunk_number: Option<u32>,
    pub chunk_size_bytes: Option<u64>,
    pub processing_time_ms: Option<u64>,
    pub error_code: Option<String>,
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
    /// Free-form extras from downstream writers; the core leaves it unset.
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricEvent {
    SessionCreated,
    ChunkReceived,
    ChunkRejected,
    UploadCompleted,
    UploadFailed,
    UploadAborted,
    SessionExpired,
}

impl MetricEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SessionCreated => "session_created",
            Self::ChunkReceived => "chunk_received",
            Self::ChunkRejected => "chunk_rejected",
            Self::UploadCompleted => "upload_completed",
            Self::UploadFailed => "upload_failed",
            Self::UploadAborted => "upload_aborted",
            Self::SessionExpired => "session_expired",
        }
    }
}

/// Generate a fresh session id: 32 random bytes, hex-encoded (URL-safe).
pub fn new_session_id() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let mut bytes = [0u8; 32];
    rng.fill(&mut bytes);
    hex::encode(bytes)
}

/// Pick the chunk size clients should send for a file of `total_bytes`.
///
/// The result is at least `min_chunk`, keeps the part count within
/// `part_ceiling`, and is rounded up to the 5 MiB part granularity. A
/// `min_chunk` below 5 MiB (test configurations) becomes the granularity
/// itself so small chunk sizes stay exact.
pub fn select_chunk_size(total_bytes: u64, min_chunk: u64, part_ceiling: u64) -> u64 {
    let min_chunk = min_chunk.max(1);
    let step = if min_chunk < PART_SIZE_STEP {
        min_chunk
    } else {
        PART_SIZE_STEP
    };
    let floor = total_bytes.div_ceil(part_ceiling.max(1));
    let base = floor.max(min_chunk);
    base.div_ceil(step) * step
}

/// Sanitize a client-supplied filename for use inside a storage key.
///
/// Runs of disallowed characters collapse to a single `_`; leading/trailing
/// dots, spaces, and underscores are stripped; empty input falls back to
/// `upload`; the result is capped at 255 characters.
pub fn sanitize_filename(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len().min(255));
    let mut last_was_sub = false;
    for c in raw.chars() {
        let allowed = c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_');
        if allowed {
            out.push(c);
            last_was_sub = false;
        } else if !last_was_sub {
            out.push('_');
            last_was_sub = true;
        }
    }
    let trimmed = out.trim_matches(|c| c == '.' || c == ' ' || c == '_');
    let mut name = if trimmed.is_empty() {
        "upload".to_string()
    } else {
        trimmed.to_string()
    };
    if name.len() > 255 {
        name.truncate(255);
    }
    name
}

/// Storage key layout: `uploads/{userId}/{sessionId}/{sanitizedFilename}`.
pub fn storage_key(user_id: &str, session_id: &str, sanitized_filename: &str) -> String {
    format!("uploads/{}/{}/{}", user_id, session_id, sanitized_filename)
}
