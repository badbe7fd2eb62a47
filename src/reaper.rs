//! Background sweep of expired and stale upload sessions.
//!
//! Sessions still `uploading` past their TTL, or idle beyond the stale
//! threshold, get their multipart upload aborted at the store and move to
//! `aborted` with `error_code = "expired"`. The sweep takes the per-session
//! lock before touching a session, so it is safe to run concurrently with
//! live chunk PUTs.

use crate::metrics::Metrics;
use crate::storage::ObjectStore;
use crate::store::SessionStore;
use crate::types::{MetricEvent, UploadMetric, UploadStatus};
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const EXPIRED_ERROR_CODE: &str = "expired";

pub struct Reaper {
    store: Arc<SessionStore>,
    objects: Arc<dyn ObjectStore>,
    stale_threshold: ChronoDuration,
    metrics: Option<Arc<Metrics>>,
}

impl Reaper {
    pub fn new(
        store: Arc<SessionStore>,
        objects: Arc<dyn ObjectStore>,
        stale_threshold: ChronoDuration,
        metrics: Option<Arc<Metrics>>,
    ) -> Self {
        Self {
            store,
            objects,
            stale_threshold,
            metrics,
        }
    }

    /// Run one sweep. Returns the number of sessions aborted.
    pub async fn sweep(&self) -> usize {
        let stale = match self.store.list_stale(Utc::now(), self.stale_threshold) {
            Ok(sessions) => sessions,
            Err(e) => {
                warn!("reaper: failed to list stale sessions: {}", e);
                return 0;
            }
        };

        let mut aborted = 0;
        for session in stale {
            // Serialize against any in-flight PUT, then re-check: the PUT we
            // waited on may have refreshed or completed the session.
            let _guard = self.store.lock_session(&session.id).await;
            let current = match self.store.get(&session.id) {
                Ok(Some(s)) => s,
                Ok(None) => continue,
                Err(e) => {
                    warn!("reaper: failed to reload session {}: {}", session.id, e);
                    continue;
                }
            };
            if current.status != UploadStatus::Uploading {
                continue;
            }
            let now = Utc::now();
            if current.expires_at >= now && current.updated_at >= now - self.stale_threshold {
                continue;
            }

            if let Err(e) = self
                .objects
                .abort_multipart(&current.storage_key, &current.storage_upload_id)
                .await
            {
                // Leave the row alone; the next sweep retries the abort.
                warn!("reaper: abort failed for session {}: {}", current.id, e);
                continue;
            }

            if let Err(e) =
                self.store
                    .set_status(&current.id, UploadStatus::Aborted, Some(EXPIRED_ERROR_CODE))
            {
                warn!("reaper: status update failed for {}: {}", current.id, e);
                continue;
            }

            self.store.record_metric(&UploadMetric {
                upload_id: current.id.clone(),
                user_id: current.user_id.clone(),
                event_type: MetricEvent::SessionExpired,
                chunk_number: None,
                chunk_size_bytes: Some(current.bytes_received),
                processing_time_ms: None,
                error_code: Some(EXPIRED_ERROR_CODE.to_string()),
                client_ip: None,
                user_agent: None,
                metadata: None,
            });
            if let Some(m) = &self.metrics {
                m.reaper_aborts_total.inc();
            }
            info!(
                session_id = %current.id,
                bytes_received = current.bytes_received,
                "reaper aborted expired session"
            );
            aborted += 1;
        }

        if aborted > 0 {
            debug!("reaper sweep aborted {} sessions", aborted);
        }
        aborted
    }

    /// Spawn the periodic sweep loop.
    pub fn spawn(self, interval: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tick.tick().await;
                self.sweep().await;
            }
        })
    }
}
