//! SQLite-backed persistence for upload sessions, drafts, and metrics.
//!
//! Every mutation of a session row runs inside a `BEGIN IMMEDIATE`
//! transaction. On top of that, the store hands out one async mutex per
//! session id; the upload engine holds it for the whole append (including the
//! object-store call), which serializes concurrent PUTs on the same session
//! the way a row lock would while letting different sessions proceed in
//! parallel.

use crate::types::{ContentDraft, Part, UploadMetric, UploadSession, UploadStatus};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

/// Errors from the session store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("idempotency key already bound for this user")]
    DuplicateIdempotencyKey,

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("invalid status value in database: {0}")]
    BadStatus(String),
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS upload_sessions (
    id                TEXT PRIMARY KEY,
    user_id           TEXT NOT NULL,
    filename          TEXT NOT NULL,
    mime_type         TEXT NOT NULL,
    total_bytes       INTEGER NOT NULL,
    chunk_size        INTEGER NOT NULL,
    storage_key       TEXT NOT NULL,
    storage_upload_id TEXT NOT NULL,
    bytes_received    INTEGER NOT NULL DEFAULT 0,
    parts             TEXT NOT NULL DEFAULT '[]',
    status            TEXT NOT NULL,
    idempotency_key   TEXT,
    error_code        TEXT,
    cid               TEXT,
    pin_status        TEXT,
    playback_url      TEXT,
    expires_at        TEXT NOT NULL,
    created_at        TEXT NOT NULL,
    updated_at        TEXT NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_sessions_idempotency
    ON upload_sessions(user_id, idempotency_key)
    WHERE idempotency_key IS NOT NULL;
CREATE INDEX IF NOT EXISTS idx_sessions_status ON upload_sessions(status);

CREATE TABLE IF NOT EXISTS content_drafts (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    upload_id   TEXT NOT NULL UNIQUE REFERENCES upload_sessions(id),
    user_id     TEXT NOT NULL,
    title         TEXT,
    description   TEXT,
    tags          TEXT NOT NULL DEFAULT '[]',
    visibility    TEXT,
    category      TEXT,
    thumbnail_url TEXT,
    updated_at    TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS upload_metrics (
    id                 INTEGER PRIMARY KEY AUTOINCREMENT,
    upload_id          TEXT NOT NULL,
    user_id            TEXT NOT NULL,
    event_type         TEXT NOT NULL,
    chunk_number       INTEGER,
    chunk_size_bytes   INTEGER,
    processing_time_ms INTEGER,
    error_code         TEXT,
    client_ip          TEXT,
    user_agent         TEXT,
    metadata           TEXT,
    created_at         TEXT NOT NULL
);
"#;

/// Transactional store for sessions, drafts, and the metric event log.
pub struct SessionStore {
    conn: Mutex<Connection>,
    locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
}

impl SessionStore {
    /// Open (or create) the database at `path` and apply the schema.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// In-memory database for unit tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "busy_timeout", 5000)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            locks: DashMap::new(),
        })
    }

    /// Acquire the per-session lock. The caller holds the returned guard for
    /// the duration of any read-validate-write sequence on the session.
    pub async fn lock_session(&self, id: &str) -> tokio::sync::OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    /// Insert a new session. Enforces one session per `(user_id,
    /// idempotency_key)`.
    pub fn create(&self, session: &UploadSession) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        let result = conn.execute(
            "INSERT INTO upload_sessions (
                id, user_id, filename, mime_type, total_bytes, chunk_size,
                storage_key, storage_upload_id, bytes_received, parts, status,
                idempotency_key, error_code, cid, pin_status, playback_url,
                expires_at, created_at, updated_at
             ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19)",
            params![
                session.id,
                session.user_id,
                session.filename,
                session.mime_type,
                session.total_bytes as i64,
                session.chunk_size as i64,
                session.storage_key,
                session.storage_upload_id,
                session.bytes_received as i64,
                serde_json::to_string(&session.parts)?,
                session.status.as_str(),
                session.idempotency_key,
                session.error_code,
                session.cid,
                session.pin_status,
                session.playback_url,
                session.expires_at.to_rfc3339(),
                session.created_at.to_rfc3339(),
                session.updated_at.to_rfc3339(),
            ],
        );
        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(StoreError::DuplicateIdempotencyKey)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Look up the session bound to an idempotency key, if any.
    pub fn find_by_idempotency(
        &self,
        user_id: &str,
        key: &str,
    ) -> Result<Option<UploadSession>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {SESSION_COLUMNS} FROM upload_sessions
             WHERE user_id = ?1 AND idempotency_key = ?2"
        ))?;
        match stmt
            .query_row(params![user_id, key], row_to_session)
            .optional()?
        {
            None => Ok(None),
            Some(decoded) => decoded.map(Some),
        }
    }

    pub fn get(&self, id: &str) -> Result<Option<UploadSession>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {SESSION_COLUMNS} FROM upload_sessions WHERE id = ?1"
        ))?;
        match stmt.query_row(params![id], row_to_session).optional()? {
            None => Ok(None),
            Some(decoded) => decoded.map(Some),
        }
    }

    /// Append a part if its number is not already present, adding its size to
    /// `bytes_received`. Returns the post-append session. Idempotent.
    pub fn append_part(&self, id: &str, part: &Part) -> Result<UploadSession, StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let mut session = {
            let mut stmt = tx.prepare_cached(&format!(
                "SELECT {SESSION_COLUMNS} FROM upload_sessions WHERE id = ?1"
            ))?;
            stmt.query_row(params![id], row_to_session)
                .optional()?
                .ok_or_else(|| StoreError::SessionNotFound(id.to_string()))??
        };

        if !session.parts.iter().any(|p| p.part_number == part.part_number) {
            session.parts.push(part.clone());
            session.parts.sort_by_key(|p| p.part_number);
            session.bytes_received += part.size;
            session.updated_at = Utc::now();

            tx.execute(
                "UPDATE upload_sessions
                 SET parts = ?2, bytes_received = ?3, updated_at = ?4
                 WHERE id = ?1",
                params![
                    id,
                    serde_json::to_string(&session.parts)?,
                    session.bytes_received as i64,
                    session.updated_at.to_rfc3339(),
                ],
            )?;
        }

        tx.commit()?;
        Ok(session)
    }

    /// Transition a session's status, optionally recording a terminal error
    /// code.
    pub fn set_status(
        &self,
        id: &str,
        status: UploadStatus,
        error_code: Option<&str>,
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE upload_sessions SET status = ?2, error_code = ?3, updated_at = ?4
             WHERE id = ?1",
            params![id, status.as_str(), error_code, Utc::now().to_rfc3339()],
        )?;
        if changed == 0 {
            return Err(StoreError::SessionNotFound(id.to_string()));
        }
        Ok(())
    }

    /// Downstream writer path: record pinning results.
    pub fn set_ipfs(
        &self,
        id: &str,
        cid: &str,
        pin_status: &str,
        playback_url: Option<&str>,
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE upload_sessions SET cid = ?2, pin_status = ?3, playback_url = ?4,
                 updated_at = ?5
             WHERE id = ?1",
            params![id, cid, pin_status, playback_url, Utc::now().to_rfc3339()],
        )?;
        if changed == 0 {
            return Err(StoreError::SessionNotFound(id.to_string()));
        }
        Ok(())
    }

    /// Sessions the reaper should abort: still `uploading` but past their TTL
    /// or idle beyond the stale threshold.
    pub fn list_stale(
        &self,
        now: DateTime<Utc>,
        stale_threshold: Duration,
    ) -> Result<Vec<UploadSession>, StoreError> {
        let cutoff = now - stale_threshold;
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {SESSION_COLUMNS} FROM upload_sessions
             WHERE status = 'uploading' AND (expires_at < ?1 OR updated_at < ?2)"
        ))?;
        let rows = stmt.query_map(
            params![now.to_rfc3339(), cutoff.to_rfc3339()],
            row_to_session,
        )?;
        let mut sessions = Vec::new();
        for row in rows {
            sessions.push(row??);
        }
        Ok(sessions)
    }

    // === Drafts ===

    /// Create the draft row for a session (no-op fields allowed).
    pub fn create_draft(
        &self,
        upload_id: &str,
        user_id: &str,
        draft: &ContentDraft,
    ) -> Result<i64, StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO content_drafts
                (upload_id, user_id, title, description, tags, visibility, category,
                 thumbnail_url, updated_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9)",
            params![
                upload_id,
                user_id,
                draft.title,
                draft.description,
                serde_json::to_string(&draft.tags)?,
                draft.visibility,
                draft.category,
                draft.thumbnail_url,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Row id of the session's draft, for the create response body.
    pub fn draft_id(&self, upload_id: &str) -> Result<Option<i64>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare_cached("SELECT id FROM content_drafts WHERE upload_id = ?1")?;
        Ok(stmt
            .query_row(params![upload_id], |row| row.get(0))
            .optional()?)
    }

    pub fn get_draft(&self, upload_id: &str) -> Result<Option<ContentDraft>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT title, description, tags, visibility, category, thumbnail_url
             FROM content_drafts WHERE upload_id = ?1",
        )?;
        let row = stmt
            .query_row(params![upload_id], |row| {
                Ok((
                    row.get::<_, Option<String>>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, Option<String>>(5)?,
                ))
            })
            .optional()?;
        match row {
            None => Ok(None),
            Some((title, description, tags, visibility, category, thumbnail_url)) => {
                Ok(Some(ContentDraft {
                    title,
                    description,
                    tags: serde_json::from_str(&tags)?,
                    visibility,
                    category,
                    thumbnail_url,
                }))
            }
        }
    }

    /// Replace the draft for a session, inserting the row if create never
    /// wrote one.
    pub fn upsert_draft(
        &self,
        upload_id: &str,
        user_id: &str,
        draft: &ContentDraft,
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO content_drafts
                (upload_id, user_id, title, description, tags, visibility, category,
                 thumbnail_url, updated_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9)
             ON CONFLICT(upload_id) DO UPDATE SET
                title = excluded.title,
                description = excluded.description,
                tags = excluded.tags,
                visibility = excluded.visibility,
                category = excluded.category,
                thumbnail_url = excluded.thumbnail_url,
                updated_at = excluded.updated_at",
            params![
                upload_id,
                user_id,
                draft.title,
                draft.description,
                serde_json::to_string(&draft.tags)?,
                draft.visibility,
                draft.category,
                draft.thumbnail_url,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    // === Metrics ===

    /// Append a telemetry event. Failures are logged and swallowed; metric
    /// writes must never fail an upload.
    pub fn record_metric(&self, metric: &UploadMetric) {
        let conn = self.conn.lock();
        let metadata = metric
            .metadata
            .as_ref()
            .and_then(|m| serde_json::to_string(m).ok());
        let result = conn.execute(
            "INSERT INTO upload_metrics
                (upload_id, user_id, event_type, chunk_number, chunk_size_bytes,
                 processing_time_ms, error_code, client_ip, user_agent, metadata, created_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11)",
            params![
                metric.upload_id,
                metric.user_id,
                metric.event_type.as_str(),
                metric.chunk_number,
                metric.chunk_size_bytes.map(|v| v as i64),
                metric.processing_time_ms.map(|v| v as i64),
                metric.error_code,
                metric.client_ip,
                metric.user_agent,
                metadata,
                Utc::now().to_rfc3339(),
            ],
        );
        if let Err(e) = result {
            warn!("metric write failed (ignored): {}", e);
        }
    }

    /// Count of recorded metric events, optionally filtered by type.
    /// Used by tests; the event log itself is append-only.
    pub fn metric_count(&self, event_type: Option<&str>) -> Result<u64, StoreError> {
        let conn = self.conn.lock();
        let count: i64 = match event_type {
            Some(t) => conn.query_row(
                "SELECT COUNT(*) FROM upload_metrics WHERE event_type = ?1",
                params![t],
                |row| row.get(0),
            )?,
            None => conn.query_row("SELECT COUNT(*) FROM upload_metrics", [], |row| row.get(0))?,
        };
        Ok(count as u64)
    }
}

const SESSION_COLUMNS: &str = "id, user_id, filename, mime_type, total_bytes, chunk_size, \
     storage_key, storage_upload_id, bytes_received, parts, status, idempotency_key, \
     error_code, cid, pin_status, playback_url, expires_at, created_at, updated_at";

/// Map a row to a session. Returns a nested Result so JSON/status decode
/// errors surface as `StoreError` instead of panicking inside rusqlite.
fn row_to_session(row: &rusqlite::Row<'_>) -> rusqlite::Result<Result<UploadSession, StoreError>> {
    let parts_json: String = row.get(9)?;
    let status_str: String = row.get(10)?;
    let expires_at: String = row.get(16)?;
    let created_at: String = row.get(17)?;
    let updated_at: String = row.get(18)?;

    let build = || -> Result<UploadSession, StoreError> {
        Ok(UploadSession {
            id: row.get(0)?,
            user_id: row.get(1)?,
            filename: row.get(2)?,
            mime_type: row.get(3)?,
            total_bytes: row.get::<_, i64>(4)? as u64,
            chunk_size: row.get::<_, i64>(5)? as u64,
            storage_key: row.get(6)?,
            storage_upload_id: row.get(7)?,
            bytes_received: row.get::<_, i64>(8)? as u64,
            parts: serde_json::from_str(&parts_json)?,
            status: UploadStatus::parse(&status_str)
                .ok_or_else(|| StoreError::BadStatus(status_str.clone()))?,
            idempotency_key: row.get(11)?,
            error_code: row.get(12)?,
            cid: row.get(13)?,
            pin_status: row.get(14)?,
            playback_url: row.get(15)?,
            expires_at: parse_ts(&expires_at),
            created_at: parse_ts(&created_at),
            updated_at: parse_ts(&updated_at),
        })
    };
    Ok(build())
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
