//! Upload session lifecycle orchestration.
//!
//! One service instance owns the whole state machine: create, append part,
//! complete, abort. Per-session serialization comes from the store's lock
//! registry; the object-store call is the single suspension point while the
//! lock is held, which keeps part sequences deterministic under retries.

use crate::content_range::ContentRange;
use crate::jobs::{JobDispatcher, TranscodeJob};
use crate::metrics::Metrics;
use crate::storage::{ObjectStore, PartStream, StorageError};
use crate::store::{SessionStore, StoreError};
use crate::types::{
    new_session_id, sanitize_filename, select_chunk_size, storage_key, ContentDraft, MetricEvent,
    Part, UploadMetric, UploadSession, UploadStatus, MAX_PART_NUMBER,
};
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

pub const ERR_FILE_TOO_LARGE: &str = "file_too_large";
pub const ERR_UNSUPPORTED_TYPE: &str = "unsupported_type";
pub const ERR_COMPLETE_FAILED: &str = "complete_failed";
pub const ERR_STORAGE_FAILED: &str = "storage_failed";

/// Service-level errors. The HTTP layer maps these to status codes in one
/// place; chunk corrections are deliberately NOT here — they are progress
/// responses, not errors.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("file size {size} exceeds maximum {max}")]
    FileTooLarge { size: u64, max: u64 },

    #[error("unsupported mime type: {0}")]
    UnsupportedType(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("session not owned by caller")]
    Forbidden,

    #[error("session is {0}; chunk uploads are closed")]
    InvalidState(UploadStatus),

    #[error("object store failure: {0}")]
    Storage(#[from] StorageError),

    #[error("session store failure: {0}")]
    Store(#[from] StoreError),

    #[error("completion failed: {0}")]
    CompleteFailed(String),
}

impl UploadError {
    /// Stable code suitable for clients and the session's `error_code`.
    pub fn code(&self) -> &'static str {
        match self {
            Self::FileTooLarge { .. } => ERR_FILE_TOO_LARGE,
            Self::UnsupportedType(_) => ERR_UNSUPPORTED_TYPE,
            Self::InvalidRequest(_) => "invalid_request",
            Self::SessionNotFound(_) => "not_found",
            Self::Forbidden => "forbidden",
            Self::InvalidState(_) => "invalid_state",
            Self::Storage(_) => ERR_STORAGE_FAILED,
            Self::Store(_) => ERR_STORAGE_FAILED,
            Self::CompleteFailed(_) => ERR_COMPLETE_FAILED,
        }
    }
}

/// Tunables lifted out of `Config` so the service has no config dependency.
#[derive(Debug, Clone)]
pub struct ServiceLimits {
    pub max_upload_bytes: u64,
    /// Lower-cased MIME allow-list.
    pub allowed_mime_types: Vec<String>,
    pub session_ttl: ChronoDuration,
    pub min_chunk_bytes: u64,
    pub target_part_ceiling: u64,
    pub chunk_deadline: Duration,
}

impl Default for ServiceLimits {
    fn default() -> Self {
        Self {
            max_upload_bytes: 128 * 1024 * 1024 * 1024,
            allowed_mime_types: vec![
                "video/mp4".to_string(),
                "video/quicktime".to_string(),
                "video/webm".to_string(),
                "video/x-matroska".to_string(),
                "audio/mpeg".to_string(),
                "audio/mp4".to_string(),
            ],
            session_ttl: ChronoDuration::hours(24),
            min_chunk_bytes: 8 * 1024 * 1024,
            target_part_ceiling: 9000,
            chunk_deadline: Duration::from_secs(300),
        }
    }
}

/// Parameters for `create_session`.
#[derive(Debug, Clone)]
pub struct CreateSessionRequest {
    pub user_id: String,
    pub filename: String,
    pub size: u64,
    pub mime_type: String,
    pub idempotency_key: Option<String>,
    pub draft: ContentDraft,
}

/// Client fingerprints carried into the metric event log.
#[derive(Debug, Clone, Default)]
pub struct ClientInfo {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

/// Result of a chunk PUT.
#[derive(Debug)]
pub enum ChunkOutcome {
    /// 308: normal progress, a status probe, or a correction after a
    /// misaligned chunk. The client re-syncs from `bytes_received`.
    Progress {
        bytes_received: u64,
        total_bytes: u64,
    },
    /// 201: the final part landed and the object was finalized.
    Completed { session: UploadSession },
}

pub struct UploadSessionService {
    store: Arc<SessionStore>,
    objects: Arc<dyn ObjectStore>,
    dispatcher: JobDispatcher,
    limits: ServiceLimits,
    metrics: Option<Arc<Metrics>>,
}

impl UploadSessionService {
    pub fn new(
        store: Arc<SessionStore>,
        objects: Arc<dyn ObjectStore>,
        dispatcher: JobDispatcher,
        limits: ServiceLimits,
        metrics: Option<Arc<Metrics>>,
    ) -> Self {
        Self {
            store,
            objects,
            dispatcher,
            limits,
            metrics,
        }
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    /// Create a session, or return the one already bound to the idempotency
    /// key. The boolean is `true` when a new session (and a new multipart
    /// upload) was created.
    #[instrument(skip(self, req), fields(user_id = %req.user_id))]
    pub async fn create_session(
        &self,
        req: CreateSessionRequest,
        client: ClientInfo,
    ) -> Result<(UploadSession, bool), UploadError> {
        if req.size == 0 || req.size > self.limits.max_upload_bytes {
            return Err(UploadError::FileTooLarge {
                size: req.size,
                max: self.limits.max_upload_bytes,
            });
        }
        let mime = req.mime_type.trim().to_ascii_lowercase();
        if !self.limits.allowed_mime_types.iter().any(|m| m == &mime) {
            return Err(UploadError::UnsupportedType(req.mime_type));
        }

        if let Some(key) = &req.idempotency_key {
            if let Some(existing) = self.store.find_by_idempotency(&req.user_id, key)? {
                debug!(session_id = %existing.id, "idempotent create replay");
                return Ok((existing, false));
            }
        }

        let id = new_session_id();
        let filename = sanitize_filename(&req.filename);
        let key = storage_key(&req.user_id, &id, &filename);
        let chunk_size = select_chunk_size(
            req.size,
            self.limits.min_chunk_bytes,
            self.limits.target_part_ceiling,
        );

        // Object store first: if this fails no row is inserted.
        let storage_upload_id = self.objects.create_multipart(&key, &mime).await?;

        let now = Utc::now();
        let session = UploadSession {
            id,
            user_id: req.user_id.clone(),
            filename,
            mime_type: mime,
            total_bytes: req.size,
            chunk_size,
            storage_key: key.clone(),
            storage_upload_id: storage_upload_id.clone(),
            bytes_received: 0,
            parts: Vec::new(),
            status: UploadStatus::Uploading,
            idempotency_key: req.idempotency_key.clone(),
            error_code: None,
            cid: None,
            pin_status: None,
            playback_url: None,
            expires_at: now + self.limits.session_ttl,
            created_at: now,
            updated_at: now,
        };

        match self.store.create(&session) {
            Ok(()) => {}
            Err(StoreError::DuplicateIdempotencyKey) => {
                // Lost a create race on the same key: drop our multipart and
                // hand back the winner's session.
                let _ = self.objects.abort_multipart(&key, &storage_upload_id).await;
                let existing = self
                    .store
                    .find_by_idempotency(
                        &req.user_id,
                        req.idempotency_key.as_deref().unwrap_or_default(),
                    )?
                    .ok_or_else(|| StoreError::SessionNotFound(session.id.clone()))?;
                return Ok((existing, false));
            }
            Err(e) => {
                let _ = self.objects.abort_multipart(&key, &storage_upload_id).await;
                return Err(e.into());
            }
        }

        if !req.draft.is_empty() {
            self.store.create_draft(&session.id, &req.user_id, &req.draft)?;
        }

        self.store.record_metric(&UploadMetric {
            upload_id: session.id.clone(),
            user_id: session.user_id.clone(),
            event_type: MetricEvent::SessionCreated,
            chunk_number: None,
            chunk_size_bytes: Some(chunk_size),
            processing_time_ms: None,
            error_code: None,
            client_ip: client.ip,
            user_agent: client.user_agent,
            metadata: None,
        });
        if let Some(m) = &self.metrics {
            m.sessions_created_total.inc();
        }
        info!(
            session_id = %session.id,
            total_bytes = session.total_bytes,
            chunk_size,
            "upload session created"
        );
        Ok((session, true))
    }

    /// Handle one chunk PUT (or status probe) against a locked session.
    ///
    /// On any correctable misalignment the body is left unread and the caller
    /// gets a progress outcome; the client re-sends from `bytes_received`.
    #[instrument(skip(self, body, client), fields(session_id = %session_id))]
    pub async fn append_chunk(
        &self,
        session_id: &str,
        user_id: &str,
        content_range: ContentRange,
        content_length: u64,
        body: PartStream,
        client: ClientInfo,
    ) -> Result<ChunkOutcome, UploadError> {
        let started = Instant::now();
        let _guard = self.store.lock_session(session_id).await;

        let session = self
            .store
            .get(session_id)?
            .ok_or_else(|| UploadError::SessionNotFound(session_id.to_string()))?;
        if session.user_id != user_id {
            return Err(UploadError::Forbidden);
        }
        if !session.status.can_accept_chunks() {
            return Err(UploadError::InvalidState(session.status));
        }

        if content_range.is_status_probe {
            return Ok(ChunkOutcome::Progress {
                bytes_received: session.bytes_received,
                total_bytes: session.total_bytes,
            });
        }

        if let Some(reason) = Self::chunk_misalignment(&session, &content_range, content_length) {
            debug!(
                session_id = %session.id,
                start = content_range.start,
                expected = session.bytes_received,
                "chunk correction: {}",
                reason
            );
            self.store.record_metric(&UploadMetric {
                upload_id: session.id.clone(),
                user_id: session.user_id.clone(),
                event_type: MetricEvent::ChunkRejected,
                chunk_number: None,
                chunk_size_bytes: Some(content_length),
                processing_time_ms: None,
                error_code: Some(reason.to_string()),
                client_ip: client.ip,
                user_agent: client.user_agent,
                metadata: None,
            });
            if let Some(m) = &self.metrics {
                m.chunk_corrections_total.inc();
            }
            // Body intentionally dropped unread.
            return Ok(ChunkOutcome::Progress {
                bytes_received: session.bytes_received,
                total_bytes: session.total_bytes,
            });
        }

        let part_number = ContentRange::part_number(content_range.start, session.chunk_size);

        let uploaded = match tokio::time::timeout(
            self.limits.chunk_deadline,
            self.objects.upload_part(
                &session.storage_key,
                &session.storage_upload_id,
                part_number,
                body,
                content_length,
            ),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => {
                // Session row untouched; the client retries from the same
                // offset.
                return Err(UploadError::Storage(StorageError::Timeout(
                    self.limits.chunk_deadline.as_secs(),
                )));
            }
        };

        let part = Part {
            part_number,
            etag: uploaded.etag,
            size: uploaded.size,
            uploaded_at: Utc::now(),
        };
        let session = self.store.append_part(&session.id, &part)?;

        self.store.record_metric(&UploadMetric {
            upload_id: session.id.clone(),
            user_id: session.user_id.clone(),
            event_type: MetricEvent::ChunkReceived,
            chunk_number: Some(part_number),
            chunk_size_bytes: Some(content_length),
            processing_time_ms: Some(started.elapsed().as_millis() as u64),
            error_code: None,
            client_ip: client.ip.clone(),
            user_agent: client.user_agent.clone(),
            metadata: None,
        });
        if let Some(m) = &self.metrics {
            m.chunks_received_total.inc();
            m.bytes_received_total.inc_by(content_length);
        }

        if session.is_complete() {
            let session = self.complete(session, client).await?;
            return Ok(ChunkOutcome::Completed { session });
        }

        Ok(ChunkOutcome::Progress {
            bytes_received: session.bytes_received,
            total_bytes: session.total_bytes,
        })
    }

    /// Why a chunk cannot be appended as-is, or `None` when it lines up.
    fn chunk_misalignment(
        session: &UploadSession,
        range: &ContentRange,
        content_length: u64,
    ) -> Option<&'static str> {
        if let Some(total) = range.total {
            if total != session.total_bytes {
                return Some("total_mismatch");
            }
        }
        if range.start != session.bytes_received {
            return Some("offset_mismatch");
        }
        if content_length != range.len() {
            return Some("length_mismatch");
        }
        // Guards chunks sent with an unknown total (`/*`), where the parser
        // could not bound `end` itself.
        if range.end >= session.total_bytes {
            return Some("end_past_total");
        }
        let is_final = range.end == session.total_bytes - 1;
        if range.len() != session.chunk_size && !is_final {
            return Some("size_mismatch");
        }
        if is_final && range.len() > session.chunk_size {
            return Some("size_mismatch");
        }
        let part_number = range.start / session.chunk_size + 1;
        if part_number > MAX_PART_NUMBER as u64 {
            return Some("part_number_out_of_range");
        }
        None
    }

    /// Finalize the multipart upload and hand off to downstream processing.
    async fn complete(
        &self,
        session: UploadSession,
        client: ClientInfo,
    ) -> Result<UploadSession, UploadError> {
        debug_assert!(session.is_complete());

        if let Err(e) = self
            .objects
            .complete_multipart(
                &session.storage_key,
                &session.storage_upload_id,
                &session.parts,
            )
            .await
        {
            // Terminal: the client must re-create the session.
            self.store
                .set_status(&session.id, UploadStatus::Failed, Some(ERR_COMPLETE_FAILED))?;
            self.store.record_metric(&UploadMetric {
                upload_id: session.id.clone(),
                user_id: session.user_id.clone(),
                event_type: MetricEvent::UploadFailed,
                chunk_number: None,
                chunk_size_bytes: None,
                processing_time_ms: None,
                error_code: Some(ERR_COMPLETE_FAILED.to_string()),
                client_ip: client.ip,
                user_agent: client.user_agent,
                metadata: None,
            });
            return Err(UploadError::CompleteFailed(e.to_string()));
        }

        self.store.set_status(&session.id, UploadStatus::Uploaded, None)?;

        let draft = self.store.get_draft(&session.id).unwrap_or_else(|e| {
            warn!("draft load failed for job payload: {}", e);
            None
        });
        let job = TranscodeJob {
            session_id: session.id.clone(),
            storage_key: session.storage_key.clone(),
            user_id: session.user_id.clone(),
            filename: session.filename.clone(),
            mime_type: session.mime_type.clone(),
            total_bytes: session.total_bytes,
            draft,
        };
        // Enqueue failure is logged inside the dispatcher and never fails the
        // completing request; the session stays `uploaded` for a sweeper.
        if !self.dispatcher.dispatch(&job).await {
            if let Some(m) = &self.metrics {
                m.enqueue_failures_total.inc();
            }
        }

        self.store.record_metric(&UploadMetric {
            upload_id: session.id.clone(),
            user_id: session.user_id.clone(),
            event_type: MetricEvent::UploadCompleted,
            chunk_number: None,
            chunk_size_bytes: Some(session.total_bytes),
            processing_time_ms: None,
            error_code: None,
            client_ip: client.ip,
            user_agent: client.user_agent,
            metadata: None,
        });
        if let Some(m) = &self.metrics {
            m.completions_total.inc();
        }
        info!(
            session_id = %session.id,
            total_bytes = session.total_bytes,
            parts = session.parts.len(),
            "upload completed"
        );

        let mut session = session;
        session.status = UploadStatus::Uploaded;
        Ok(session)
    }

    /// Abort an upload. Idempotent: aborting an already-aborted session is a
    /// no-op success.
    #[instrument(skip(self, client), fields(session_id = %session_id))]
    pub async fn abort(
        &self,
        session_id: &str,
        user_id: &str,
        client: ClientInfo,
    ) -> Result<(), UploadError> {
        let _guard = self.store.lock_session(session_id).await;

        let session = self
            .store
            .get(session_id)?
            .ok_or_else(|| UploadError::SessionNotFound(session_id.to_string()))?;
        if session.user_id != user_id {
            return Err(UploadError::Forbidden);
        }
        match session.status {
            UploadStatus::Aborted => return Ok(()),
            UploadStatus::Uploading => {}
            other => return Err(UploadError::InvalidState(other)),
        }

        self.objects
            .abort_multipart(&session.storage_key, &session.storage_upload_id)
            .await?;
        self.store.set_status(&session.id, UploadStatus::Aborted, None)?;

        self.store.record_metric(&UploadMetric {
            upload_id: session.id.clone(),
            user_id: session.user_id.clone(),
            event_type: MetricEvent::UploadAborted,
            chunk_number: None,
            chunk_size_bytes: Some(session.bytes_received),
            processing_time_ms: None,
            error_code: None,
            client_ip: client.ip,
            user_agent: client.user_agent,
            metadata: None,
        });
        info!(session_id = %session.id, "upload aborted by client");
        Ok(())
    }

    /// Owner-gated session snapshot for the status endpoint.
    pub fn get_session(
        &self,
        session_id: &str,
        user_id: &str,
    ) -> Result<UploadSession, UploadError> {
        let session = self
            .store
            .get(session_id)?
            .ok_or_else(|| UploadError::SessionNotFound(session_id.to_string()))?;
        if session.user_id != user_id {
            return Err(UploadError::Forbidden);
        }
        Ok(session)
    }

    /// Replace the draft metadata. Allowed only while the upload is open.
    pub fn update_draft(
        &self,
        session_id: &str,
        user_id: &str,
        draft: &ContentDraft,
    ) -> Result<(), UploadError> {
        let session = self.get_session(session_id, user_id)?;
        if !session.status.can_accept_chunks() {
            return Err(UploadError::InvalidState(session.status));
        }
        self.store.upsert_draft(session_id, user_id, draft)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::SqliteJobQueue;
    use crate::storage::MemoryObjectStore;
    use async_trait::async_trait;
    use bytes::Bytes;
    use futures::stream;

    const CHUNK: u64 = 5 * 1024 * 1024; // smallest 5 MiB multiple
    const TOTAL: u64 = 10 * CHUNK;

    struct Fixture {
        service: UploadSessionService,
        store: Arc<SessionStore>,
        objects: Arc<MemoryObjectStore>,
        queue: Arc<SqliteJobQueue>,
    }

    fn fixture() -> Fixture {
        fixture_with_objects(Arc::new(MemoryObjectStore::new()))
    }

    fn fixture_with_objects(objects: Arc<MemoryObjectStore>) -> Fixture {
        let store = Arc::new(SessionStore::open_in_memory().unwrap());
        let queue = Arc::new(SqliteJobQueue::open_in_memory().unwrap());
        let limits = ServiceLimits {
            max_upload_bytes: 1024 * 1024 * 1024,
            min_chunk_bytes: CHUNK,
            target_part_ceiling: 9000,
            ..Default::default()
        };
        let service = UploadSessionService::new(
            store.clone(),
            objects.clone(),
            JobDispatcher::new(queue.clone()),
            limits,
            None,
        );
        Fixture {
            service,
            store,
            objects,
            queue,
        }
    }

    fn body(data: Vec<u8>) -> PartStream {
        Box::pin(stream::once(async move {
            Ok::<_, std::io::Error>(Bytes::from(data))
        }))
    }

    fn create_req(key: Option<&str>) -> CreateSessionRequest {
        CreateSessionRequest {
            user_id: "u1".to_string(),
            filename: "movie.mp4".to_string(),
            size: TOTAL,
            mime_type: "video/mp4".to_string(),
            idempotency_key: key.map(|k| k.to_string()),
            draft: ContentDraft::default(),
        }
    }

    fn chunk_range(i: u64) -> ContentRange {
        let start = i * CHUNK;
        ContentRange {
            start,
            end: start + CHUNK - 1,
            total: Some(TOTAL),
            is_status_probe: false,
        }
    }

    async fn send_chunk(fx: &Fixture, id: &str, i: u64) -> ChunkOutcome {
        fx.service
            .append_chunk(
                id,
                "u1",
                chunk_range(i),
                CHUNK,
                body(vec![i as u8; CHUNK as usize]),
                ClientInfo::default(),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_session_validations() {
        let fx = fixture();

        let mut req = create_req(None);
        req.size = 0;
        assert!(matches!(
            fx.service.create_session(req, ClientInfo::default()).await,
            Err(UploadError::FileTooLarge { .. })
        ));

        let mut req = create_req(None);
        req.size = 2 * 1024 * 1024 * 1024;
        assert!(matches!(
            fx.service.create_session(req, ClientInfo::default()).await,
            Err(UploadError::FileTooLarge { .. })
        ));

        let mut req = create_req(None);
        req.mime_type = "application/x-msdownload".to_string();
        assert!(matches!(
            fx.service.create_session(req, ClientInfo::default()).await,
            Err(UploadError::UnsupportedType(_))
        ));

        // Allow-list comparison is case-insensitive.
        let mut req = create_req(None);
        req.mime_type = "Video/MP4".to_string();
        let (session, created) = fx
            .service
            .create_session(req, ClientInfo::default())
            .await
            .unwrap();
        assert!(created);
        assert_eq!(session.mime_type, "video/mp4");
        assert_eq!(session.chunk_size, CHUNK);
        assert_eq!(
            session.storage_key,
            format!("uploads/u1/{}/movie.mp4", session.id)
        );
    }

    #[tokio::test]
    async fn test_happy_path_ten_chunks() {
        let fx = fixture();
        let (session, _) = fx
            .service
            .create_session(create_req(None), ClientInfo::default())
            .await
            .unwrap();

        for i in 0..9 {
            match send_chunk(&fx, &session.id, i).await {
                ChunkOutcome::Progress {
                    bytes_received,
                    total_bytes,
                } => {
                    assert_eq!(bytes_received, (i + 1) * CHUNK);
                    assert_eq!(total_bytes, TOTAL);
                }
                other => panic!("expected progress, got {other:?}"),
            }
        }

        match send_chunk(&fx, &session.id, 9).await {
            ChunkOutcome::Completed { session: done } => {
                assert_eq!(done.status, UploadStatus::Uploaded);
                assert_eq!(done.bytes_received, TOTAL);
                assert_eq!(done.parts.len(), 10);
            }
            other => panic!("expected completion, got {other:?}"),
        }

        // Object assembled, job enqueued, row transitioned.
        assert_eq!(
            fx.objects.object_bytes(&session.storage_key).unwrap().len() as u64,
            TOTAL
        );
        assert_eq!(fx.queue.pending_for(&session.id).unwrap().len(), 1);
        let row = fx.store.get(&session.id).unwrap().unwrap();
        assert_eq!(row.status, UploadStatus::Uploaded);
    }

    #[tokio::test]
    async fn test_duplicate_part_is_idempotent() {
        let fx = fixture();
        let (session, _) = fx
            .service
            .create_session(create_req(None), ClientInfo::default())
            .await
            .unwrap();

        for i in 0..5 {
            send_chunk(&fx, &session.id, i).await;
        }
        // The client re-sends chunk 5 (offset mismatch → correction, no append).
        match fx
            .service
            .append_chunk(
                &session.id,
                "u1",
                chunk_range(4),
                CHUNK,
                body(vec![4u8; CHUNK as usize]),
                ClientInfo::default(),
            )
            .await
            .unwrap()
        {
            ChunkOutcome::Progress { bytes_received, .. } => {
                assert_eq!(bytes_received, 5 * CHUNK)
            }
            other => panic!("expected progress, got {other:?}"),
        }
        let row = fx.store.get(&session.id).unwrap().unwrap();
        assert_eq!(row.parts.len(), 5);
        assert_eq!(row.bytes_received, 5 * CHUNK);
    }

    #[tokio::test]
    async fn test_out_of_sync_chunk_yields_correction() {
        let fx = fixture();
        let (session, _) = fx
            .service
            .create_session(create_req(None), ClientInfo::default())
            .await
            .unwrap();
        send_chunk(&fx, &session.id, 0).await;
        send_chunk(&fx, &session.id, 1).await;

        // Client skips ahead to chunk 4.
        match fx
            .service
            .append_chunk(
                &session.id,
                "u1",
                chunk_range(4),
                CHUNK,
                body(vec![0u8; CHUNK as usize]),
                ClientInfo::default(),
            )
            .await
            .unwrap()
        {
            ChunkOutcome::Progress { bytes_received, .. } => {
                assert_eq!(bytes_received, 2 * CHUNK)
            }
            other => panic!("expected correction, got {other:?}"),
        }
        assert_eq!(fx.store.get(&session.id).unwrap().unwrap().parts.len(), 2);
        assert_eq!(fx.store.metric_count(Some("chunk_rejected")).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_status_probe_reports_offset_without_state_change() {
        let fx = fixture();
        let (session, _) = fx
            .service
            .create_session(create_req(None), ClientInfo::default())
            .await
            .unwrap();
        send_chunk(&fx, &session.id, 0).await;

        let probe = ContentRange {
            start: 0,
            end: 0,
            total: None,
            is_status_probe: true,
        };
        for _ in 0..2 {
            match fx
                .service
                .append_chunk(
                    &session.id,
                    "u1",
                    probe,
                    0,
                    body(vec![]),
                    ClientInfo::default(),
                )
                .await
                .unwrap()
            {
                ChunkOutcome::Progress { bytes_received, .. } => {
                    assert_eq!(bytes_received, CHUNK)
                }
                other => panic!("expected progress, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_wrong_total_yields_correction() {
        let fx = fixture();
        let (session, _) = fx
            .service
            .create_session(create_req(None), ClientInfo::default())
            .await
            .unwrap();

        let mut range = chunk_range(0);
        range.total = Some(TOTAL + 1);
        match fx
            .service
            .append_chunk(
                &session.id,
                "u1",
                range,
                CHUNK,
                body(vec![0u8; CHUNK as usize]),
                ClientInfo::default(),
            )
            .await
            .unwrap()
        {
            ChunkOutcome::Progress { bytes_received, .. } => assert_eq!(bytes_received, 0),
            other => panic!("expected correction, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_short_final_chunk_must_end_at_total() {
        let fx = fixture();
        let mut req = create_req(None);
        req.size = TOTAL - 100; // final chunk is CHUNK - 100
        let (session, _) = fx
            .service
            .create_session(req, ClientInfo::default())
            .await
            .unwrap();

        for i in 0..9 {
            send_chunk(&fx, &session.id, i).await;
        }

        // A short chunk that does NOT reach the end → correction.
        let bad = ContentRange {
            start: 9 * CHUNK,
            end: 9 * CHUNK + 50,
            total: Some(TOTAL - 100),
            is_status_probe: false,
        };
        match fx
            .service
            .append_chunk(
                &session.id,
                "u1",
                bad,
                51,
                body(vec![0u8; 51]),
                ClientInfo::default(),
            )
            .await
            .unwrap()
        {
            ChunkOutcome::Progress { bytes_received, .. } => {
                assert_eq!(bytes_received, 9 * CHUNK)
            }
            other => panic!("expected correction, got {other:?}"),
        }

        // Exact final chunk completes.
        let final_len = CHUNK - 100;
        let good = ContentRange {
            start: 9 * CHUNK,
            end: TOTAL - 101,
            total: Some(TOTAL - 100),
            is_status_probe: false,
        };
        match fx
            .service
            .append_chunk(
                &session.id,
                "u1",
                good,
                final_len,
                body(vec![9u8; final_len as usize]),
                ClientInfo::default(),
            )
            .await
            .unwrap()
        {
            ChunkOutcome::Completed { session: done } => {
                assert_eq!(done.bytes_received, TOTAL - 100)
            }
            other => panic!("expected completion, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_idempotent_create_reuses_session_and_multipart() {
        let fx = fixture();
        let (first, created) = fx
            .service
            .create_session(create_req(Some("K")), ClientInfo::default())
            .await
            .unwrap();
        assert!(created);

        let (second, created) = fx
            .service
            .create_session(create_req(Some("K")), ClientInfo::default())
            .await
            .unwrap();
        assert!(!created);
        assert_eq!(second.id, first.id);
        assert_eq!(second.chunk_size, first.chunk_size);
        assert_eq!(second.storage_key, first.storage_key);
        assert_eq!(fx.objects.multiparts_created(), 1);
    }

    #[tokio::test]
    async fn test_abort_then_put_conflicts() {
        let fx = fixture();
        let (session, _) = fx
            .service
            .create_session(create_req(None), ClientInfo::default())
            .await
            .unwrap();
        for i in 0..3 {
            send_chunk(&fx, &session.id, i).await;
        }

        fx.service
            .abort(&session.id, "u1", ClientInfo::default())
            .await
            .unwrap();
        // Abort N times equals abort once.
        fx.service
            .abort(&session.id, "u1", ClientInfo::default())
            .await
            .unwrap();
        assert!(!fx.objects.has_upload(&session.storage_upload_id));

        let err = fx
            .service
            .append_chunk(
                &session.id,
                "u1",
                chunk_range(3),
                CHUNK,
                body(vec![0u8; CHUNK as usize]),
                ClientInfo::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::InvalidState(UploadStatus::Aborted)));
    }

    #[tokio::test]
    async fn test_authorization_and_missing_session() {
        let fx = fixture();
        let (session, _) = fx
            .service
            .create_session(create_req(None), ClientInfo::default())
            .await
            .unwrap();

        let err = fx
            .service
            .append_chunk(
                &session.id,
                "intruder",
                chunk_range(0),
                CHUNK,
                body(vec![0u8; CHUNK as usize]),
                ClientInfo::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::Forbidden));

        let err = fx
            .service
            .append_chunk(
                "nope",
                "u1",
                chunk_range(0),
                CHUNK,
                body(vec![0u8; CHUNK as usize]),
                ClientInfo::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::SessionNotFound(_)));

        assert!(matches!(
            fx.service.get_session(&session.id, "intruder").unwrap_err(),
            UploadError::Forbidden
        ));
    }

    /// Object store that accepts parts but fails CompleteMultipartUpload.
    struct CompleteFailsStore {
        inner: MemoryObjectStore,
    }

    #[async_trait]
    impl ObjectStore for CompleteFailsStore {
        async fn create_multipart(
            &self,
            key: &str,
            content_type: &str,
        ) -> Result<String, StorageError> {
            self.inner.create_multipart(key, content_type).await
        }
        async fn upload_part(
            &self,
            key: &str,
            upload_id: &str,
            part_number: u32,
            body: PartStream,
            content_length: u64,
        ) -> Result<crate::storage::UploadedPart, StorageError> {
            self.inner
                .upload_part(key, upload_id, part_number, body, content_length)
                .await
        }
        async fn complete_multipart(
            &self,
            _key: &str,
            _upload_id: &str,
            _parts: &[Part],
        ) -> Result<crate::storage::CompletedObject, StorageError> {
            Err(StorageError::S3("backend exploded".to_string()))
        }
        async fn abort_multipart(&self, key: &str, upload_id: &str) -> Result<(), StorageError> {
            self.inner.abort_multipart(key, upload_id).await
        }
        async fn head_object(&self, key: &str) -> Result<crate::storage::ObjectInfo, StorageError> {
            self.inner.head_object(key).await
        }
        async fn get_object_stream(
            &self,
            key: &str,
        ) -> Result<
            futures::stream::BoxStream<'static, Result<Bytes, StorageError>>,
            StorageError,
        > {
            self.inner.get_object_stream(key).await
        }
    }

    #[tokio::test]
    async fn test_complete_failure_marks_session_failed() {
        let store = Arc::new(SessionStore::open_in_memory().unwrap());
        let queue = Arc::new(SqliteJobQueue::open_in_memory().unwrap());
        let objects = Arc::new(CompleteFailsStore {
            inner: MemoryObjectStore::new(),
        });
        let limits = ServiceLimits {
            max_upload_bytes: 1024 * 1024 * 1024,
            min_chunk_bytes: CHUNK,
            ..Default::default()
        };
        let service = UploadSessionService::new(
            store.clone(),
            objects,
            JobDispatcher::new(queue.clone()),
            limits,
            None,
        );

        let mut req = create_req(None);
        req.size = CHUNK;
        let (session, _) = service
            .create_session(req, ClientInfo::default())
            .await
            .unwrap();

        let err = service
            .append_chunk(
                &session.id,
                "u1",
                ContentRange {
                    start: 0,
                    end: CHUNK - 1,
                    total: Some(CHUNK),
                    is_status_probe: false,
                },
                CHUNK,
                body(vec![0u8; CHUNK as usize]),
                ClientInfo::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::CompleteFailed(_)));

        let row = store.get(&session.id).unwrap().unwrap();
        assert_eq!(row.status, UploadStatus::Failed);
        assert_eq!(row.error_code.as_deref(), Some(ERR_COMPLETE_FAILED));
        assert_eq!(queue.pending_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_draft_update_gated_on_open_session() {
        let fx = fixture();
        let mut req = create_req(None);
        req.draft = ContentDraft {
            title: Some("first cut".to_string()),
            ..Default::default()
        };
        req.size = CHUNK;
        let (session, _) = fx
            .service
            .create_session(req, ClientInfo::default())
            .await
            .unwrap();

        let draft = ContentDraft {
            title: Some("directors cut".to_string()),
            visibility: Some("unlisted".to_string()),
            ..Default::default()
        };
        fx.service.update_draft(&session.id, "u1", &draft).unwrap();
        assert_eq!(fx.store.get_draft(&session.id).unwrap().unwrap(), draft);

        // Complete the upload, then the draft freezes.
        fx.service
            .append_chunk(
                &session.id,
                "u1",
                ContentRange {
                    start: 0,
                    end: CHUNK - 1,
                    total: Some(CHUNK),
                    is_status_probe: false,
                },
                CHUNK,
                body(vec![0u8; CHUNK as usize]),
                ClientInfo::default(),
            )
            .await
            .unwrap();
        assert!(matches!(
            fx.service.update_draft(&session.id, "u1", &draft).unwrap_err(),
            UploadError::InvalidState(_)
        ));

        // The completed job carries the draft.
        let jobs = fx.queue.pending_for(&session.id).unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(
            jobs[0].draft.as_ref().unwrap().title.as_deref(),
            Some("directors cut")
        );
    }
}
