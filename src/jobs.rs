//! Transcode-and-pin job dispatch.
//!
//! Completion hands the finalized object to downstream processing through a
//! durable queue. Enqueue is at-least-once; the downstream processor must be
//! idempotent on `session_id`. The queue implementation here is a SQLite
//! table; production deployments can swap in anything that satisfies
//! `JobQueue`.

use crate::types::ContentDraft;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tracing::{error, warn};

/// Payload consumed by the transcode-and-pin worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscodeJob {
    pub session_id: String,
    pub storage_key: String,
    pub user_id: String,
    pub filename: String,
    pub mime_type: String,
    pub total_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub draft: Option<ContentDraft>,
}

#[derive(Debug, Error)]
pub enum JobError {
    #[error("queue error: {0}")]
    Queue(String),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Durable work queue the completion path enqueues into.
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, job: &TranscodeJob) -> Result<(), JobError>;
}

/// SQLite-backed queue. Jobs are rows; a worker claims them out-of-process.
pub struct SqliteJobQueue {
    conn: Mutex<Connection>,
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS transcode_jobs (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL,
    payload    TEXT NOT NULL,
    status     TEXT NOT NULL DEFAULT 'pending',
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_jobs_status ON transcode_jobs(status);
"#;

impl SqliteJobQueue {
    pub fn open(path: &Path) -> Result<Self, JobError> {
        let conn = Connection::open(path).map_err(|e| JobError::Queue(e.to_string()))?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, JobError> {
        let conn = Connection::open_in_memory().map_err(|e| JobError::Queue(e.to_string()))?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, JobError> {
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| JobError::Queue(e.to_string()))?;
        conn.pragma_update(None, "busy_timeout", 5000)
            .map_err(|e| JobError::Queue(e.to_string()))?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| JobError::Queue(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Pending jobs for a session, oldest first. Used by tests and the
    /// re-enqueue sweeper.
    pub fn pending_for(&self, session_id: &str) -> Result<Vec<TranscodeJob>, JobError> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare_cached(
                "SELECT payload FROM transcode_jobs
                 WHERE session_id = ?1 AND status = 'pending' ORDER BY id",
            )
            .map_err(|e| JobError::Queue(e.to_string()))?;
        let rows = stmt
            .query_map(params![session_id], |row| row.get::<_, String>(0))
            .map_err(|e| JobError::Queue(e.to_string()))?;
        let mut jobs = Vec::new();
        for row in rows {
            let payload = row.map_err(|e| JobError::Queue(e.to_string()))?;
            jobs.push(serde_json::from_str(&payload)?);
        }
        Ok(jobs)
    }

    pub fn pending_count(&self) -> Result<u64, JobError> {
        let conn = self.conn.lock();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM transcode_jobs WHERE status = 'pending'",
                [],
                |row| row.get(0),
            )
            .map_err(|e| JobError::Queue(e.to_string()))?;
        Ok(count as u64)
    }
}

#[async_trait]
impl JobQueue for SqliteJobQueue {
    async fn enqueue(&self, job: &TranscodeJob) -> Result<(), JobError> {
        let payload = serde_json::to_string(job)?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO transcode_jobs (session_id, payload, created_at) VALUES (?1, ?2, ?3)",
            params![job.session_id, payload, Utc::now().to_rfc3339()],
        )
        .map_err(|e| JobError::Queue(e.to_string()))?;
        Ok(())
    }
}

/// At-least-once dispatcher with bounded in-band retry.
///
/// Enqueue failure never fails the upload: after the retries are exhausted
/// the session stays `uploaded` and a sweeper may re-enqueue later.
pub struct JobDispatcher {
    queue: std::sync::Arc<dyn JobQueue>,
    max_attempts: u32,
}

impl JobDispatcher {
    pub fn new(queue: std::sync::Arc<dyn JobQueue>) -> Self {
        Self {
            queue,
            max_attempts: 3,
        }
    }

    /// Returns `true` when the job landed on the queue.
    pub async fn dispatch(&self, job: &TranscodeJob) -> bool {
        for attempt in 1..=self.max_attempts {
            match self.queue.enqueue(job).await {
                Ok(()) => return true,
                Err(e) if attempt < self.max_attempts => {
                    warn!(
                        session_id = %job.session_id,
                        attempt,
                        "job enqueue failed, retrying: {}",
                        e
                    );
                }
                Err(e) => {
                    error!(
                        session_id = %job.session_id,
                        "job enqueue failed after {} attempts: {}",
                        self.max_attempts,
                        e
                    );
                }
            }
        }
        false
    }
}
