//! Chunk-level handlers: PUT chunk / status probe, DELETE abort.

use super::{progress_response, AppState};
use crate::api::errors::ApiError;
use crate::api::extractors::{client_info, Principal};
use crate::api::streaming::ChunkUpload;
use crate::service::ChunkOutcome;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use std::sync::Arc;
use tracing::instrument;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CompletionResponse {
    upload_id: String,
    storage_key: String,
    size: u64,
}

/// PUT /uploads/{id} — data chunk or status probe.
///
/// Every correctable misalignment (and every probe) answers `308` with the
/// authoritative offset; only a finalized upload answers `201`.
#[instrument(skip(state, headers, chunk), fields(session_id = %id))]
pub async fn put_chunk(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(id): Path<String>,
    headers: HeaderMap,
    chunk: ChunkUpload,
) -> Result<Response, ApiError> {
    if !state.chunk_limiter.try_acquire(&principal) {
        if let Some(m) = &state.metrics {
            m.rate_limited_total.with_label_values(&["chunk"]).inc();
        }
        return Err(ApiError::RateLimited("chunk upload"));
    }

    let outcome = state
        .service
        .append_chunk(
            &id,
            &principal,
            chunk.content_range,
            chunk.content_length,
            chunk.body,
            client_info(&headers),
        )
        .await?;

    match outcome {
        ChunkOutcome::Progress { bytes_received, .. } => Ok(progress_response(bytes_received)),
        ChunkOutcome::Completed { session } => Ok((
            StatusCode::CREATED,
            [("Cache-Control", "no-store")],
            Json(CompletionResponse {
                upload_id: session.id,
                storage_key: session.storage_key,
                size: session.total_bytes,
            }),
        )
            .into_response()),
    }
}

/// DELETE /uploads/{id} — abort the upload. Idempotent.
#[instrument(skip(state, headers), fields(session_id = %id))]
pub async fn abort_upload(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    state
        .service
        .abort(&id, &principal, client_info(&headers))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
