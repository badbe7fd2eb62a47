//! Shared test infrastructure for integration tests
//!
//! Runs the full axum app in-process on an ephemeral port, backed by the
//! in-memory object store and a temp-file SQLite database, and drives it
//! with reqwest the way a resumable-upload client would.

#![allow(dead_code)]

use chrono::Duration as ChronoDuration;
use reelgate::api::handlers::AppState;
use reelgate::jobs::{JobDispatcher, SqliteJobQueue};
use reelgate::ratelimit::RateLimiter;
use reelgate::service::{ServiceLimits, UploadSessionService};
use reelgate::storage::MemoryObjectStore;
use reelgate::store::SessionStore;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

pub const USER: &str = "user-1";
pub const TOTAL: u64 = 10240;
pub const CHUNK: u64 = 1024;

/// Knobs a test can turn before the server starts.
pub struct TestOptions {
    pub min_chunk_bytes: u64,
    pub session_ttl: ChronoDuration,
    pub rate_create_per_hour: u32,
    pub rate_chunk_per_minute: u32,
}

impl Default for TestOptions {
    fn default() -> Self {
        Self {
            // 1 KiB chunks keep multi-chunk flows cheap.
            min_chunk_bytes: CHUNK,
            session_ttl: ChronoDuration::hours(24),
            rate_create_per_hour: 10_000,
            rate_chunk_per_minute: 100_000,
        }
    }
}

/// In-process reelgate instance plus handles into its internals.
pub struct TestServer {
    pub base_url: String,
    pub client: reqwest::Client,
    pub store: Arc<SessionStore>,
    pub objects: Arc<MemoryObjectStore>,
    pub queue: Arc<SqliteJobQueue>,
    _db_dir: TempDir,
    server: tokio::task::JoinHandle<()>,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.server.abort();
    }
}

impl TestServer {
    pub async fn start() -> Self {
        Self::start_with(TestOptions::default()).await
    }

    pub async fn start_with(options: TestOptions) -> Self {
        let db_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = db_dir.path().join("reelgate.db");

        let store = Arc::new(SessionStore::open(&db_path).expect("open session store"));
        let objects = Arc::new(MemoryObjectStore::new());
        let queue = Arc::new(SqliteJobQueue::open(&db_path).expect("open job queue"));

        let limits = ServiceLimits {
            max_upload_bytes: 1024 * 1024 * 1024,
            min_chunk_bytes: options.min_chunk_bytes,
            session_ttl: options.session_ttl,
            ..Default::default()
        };
        let service = UploadSessionService::new(
            store.clone(),
            objects.clone(),
            JobDispatcher::new(queue.clone()),
            limits,
            None,
        );

        let state = Arc::new(AppState {
            service,
            metrics: None,
            create_limiter: RateLimiter::new(
                options.rate_create_per_hour,
                Duration::from_secs(3600),
            ),
            chunk_limiter: RateLimiter::new(
                options.rate_chunk_per_minute,
                Duration::from_secs(60),
            ),
            storage_kind: "memory",
            started_at: std::time::Instant::now(),
        });

        let app = reelgate::api::router(state);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        Self {
            base_url: format!("http://{}", addr),
            client: reqwest::Client::new(),
            store,
            objects,
            queue,
            _db_dir: db_dir,
            server,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// POST /uploads?uploadType=resumable with the standard test body.
    pub async fn create_session(&self) -> reqwest::Response {
        self.create_session_as(USER, None).await
    }

    pub async fn create_session_as(
        &self,
        user: &str,
        idempotency_key: Option<&str>,
    ) -> reqwest::Response {
        let mut req = self
            .client
            .post(self.url("/uploads?uploadType=resumable"))
            .header("x-user-id", user)
            .json(&json!({
                "filename": "movie.mp4",
                "size": TOTAL,
                "mimeType": "video/mp4",
            }));
        if let Some(key) = idempotency_key {
            req = req.header("idempotency-key", key);
        }
        req.send().await.expect("create request")
    }

    /// Create a session and return its upload id.
    pub async fn new_upload(&self) -> String {
        let resp = self.create_session().await;
        assert_eq!(resp.status(), 201);
        let body: Value = resp.json().await.unwrap();
        body["uploadId"].as_str().unwrap().to_string()
    }

    /// PUT one chunk with an explicit Content-Range.
    pub async fn put_chunk(
        &self,
        upload_id: &str,
        start: u64,
        end: u64,
        total: u64,
        payload: Vec<u8>,
    ) -> reqwest::Response {
        self.client
            .put(self.url(&format!("/uploads/{upload_id}")))
            .header("x-user-id", USER)
            .header("content-range", format!("bytes {start}-{end}/{total}"))
            .header("content-length", payload.len().to_string())
            .body(payload)
            .send()
            .await
            .expect("chunk request")
    }

    /// PUT the i-th well-aligned chunk of the standard 10240-byte upload.
    pub async fn put_nth_chunk(&self, upload_id: &str, i: u64) -> reqwest::Response {
        let start = i * CHUNK;
        self.put_chunk(
            upload_id,
            start,
            start + CHUNK - 1,
            TOTAL,
            vec![i as u8; CHUNK as usize],
        )
        .await
    }

    /// PUT a status probe (`bytes */*`, empty body).
    pub async fn probe(&self, upload_id: &str) -> reqwest::Response {
        self.client
            .put(self.url(&format!("/uploads/{upload_id}")))
            .header("x-user-id", USER)
            .header("content-range", "bytes */*")
            .header("content-length", "0")
            .send()
            .await
            .expect("probe request")
    }

    pub async fn status(&self, upload_id: &str) -> reqwest::Response {
        self.client
            .get(self.url(&format!("/uploads/{upload_id}/status")))
            .header("x-user-id", USER)
            .send()
            .await
            .expect("status request")
    }

    pub async fn abort(&self, upload_id: &str) -> reqwest::Response {
        self.client
            .delete(self.url(&format!("/uploads/{upload_id}")))
            .header("x-user-id", USER)
            .send()
            .await
            .expect("abort request")
    }
}

/// Assert a 308 progress response carries the expected offset headers.
pub fn assert_progress(resp: &reqwest::Response, expected_offset: u64) {
    assert_eq!(resp.status(), 308, "expected 308 progress");
    assert_eq!(
        resp.headers()["upload-offset"],
        expected_offset.to_string().as_str()
    );
    if expected_offset == 0 {
        assert!(resp.headers().get("range").is_none());
    } else {
        assert_eq!(
            resp.headers()["range"],
            format!("bytes=0-{}", expected_offset - 1).as_str()
        );
    }
    assert_eq!(resp.headers()["cache-control"], "no-store");
}
