//! Session expiry: the reaper aborts TTL-expired uploads under live traffic.

mod common;

use chrono::Duration as ChronoDuration;
use common::{TestOptions, TestServer};
use reelgate::reaper::Reaper;
use reelgate::types::UploadStatus;
use serde_json::Value;

#[tokio::test]
async fn test_expired_session_is_reaped() {
    let server = TestServer::start_with(TestOptions {
        session_ttl: ChronoDuration::seconds(-1), // born expired
        ..Default::default()
    })
    .await;

    let upload_id = server.new_upload().await;
    let session = server.store.get(&upload_id).unwrap().unwrap();
    assert!(server.objects.has_upload(&session.storage_upload_id));

    let reaper = Reaper::new(
        server.store.clone(),
        server.objects.clone(),
        ChronoDuration::minutes(60),
        None,
    );
    assert_eq!(reaper.sweep().await, 1);

    // Aborted with the expiry code; multipart upload gone at the store.
    let reaped = server.store.get(&upload_id).unwrap().unwrap();
    assert_eq!(reaped.status, UploadStatus::Aborted);
    assert_eq!(reaped.error_code.as_deref(), Some("expired"));
    assert!(!server.objects.has_upload(&session.storage_upload_id));

    // The wire agrees: PUTs conflict, the snapshot shows the error code.
    let resp = server.put_nth_chunk(&upload_id, 0).await;
    assert_eq!(resp.status(), 409);
    let status: Value = server.status(&upload_id).await.json().await.unwrap();
    assert_eq!(status["status"], "aborted");
    assert_eq!(status["errorCode"], "expired");

    // Sweeping again finds nothing.
    assert_eq!(reaper.sweep().await, 0);
}

#[tokio::test]
async fn test_live_sessions_survive_the_sweep() {
    let server = TestServer::start().await;
    let upload_id = server.new_upload().await;
    server.put_nth_chunk(&upload_id, 0).await;

    let reaper = Reaper::new(
        server.store.clone(),
        server.objects.clone(),
        ChronoDuration::minutes(60),
        None,
    );
    assert_eq!(reaper.sweep().await, 0);

    // Upload continues unharmed after the sweep.
    let resp = server.put_nth_chunk(&upload_id, 1).await;
    assert_eq!(resp.status(), 308);
}
