//! Session-level handlers: create, status snapshot, draft metadata.

use super::{hval, AppState};
use crate::api::errors::ApiError;
use crate::api::extractors::{client_info, Principal};
use crate::service::CreateSessionRequest;
use crate::types::ContentDraft;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::instrument;

/// Query parameters for POST /uploads
#[derive(Debug, Deserialize, Default)]
pub struct CreateQuery {
    #[serde(rename = "uploadType")]
    pub upload_type: Option<String>,
}

/// JSON body for POST /uploads
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionBody {
    pub filename: String,
    pub size: u64,
    pub mime_type: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub visibility: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateSessionResponse {
    upload_id: String,
    session_url: String,
    chunk_size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    draft_id: Option<i64>,
}

/// POST /uploads?uploadType=resumable — create (or replay) a session.
#[instrument(skip(state, headers, body), fields(user_id = %principal.0))]
pub async fn create_session(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Query(query): Query<CreateQuery>,
    headers: HeaderMap,
    Json(body): Json<CreateSessionBody>,
) -> Result<Response, ApiError> {
    if query.upload_type.as_deref() != Some("resumable") {
        return Err(ApiError::InvalidUploadType);
    }

    if !state.create_limiter.try_acquire(&principal) {
        if let Some(m) = &state.metrics {
            m.rate_limited_total.with_label_values(&["create"]).inc();
        }
        return Err(ApiError::RateLimited("session creation"));
    }

    let idempotency_key = headers
        .get("idempotency-key")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string());

    let draft = ContentDraft {
        title: body.title,
        description: body.description,
        tags: body.tags,
        visibility: body.visibility,
        category: body.category,
        thumbnail_url: None,
    };

    let (session, created) = state
        .service
        .create_session(
            CreateSessionRequest {
                user_id: principal.0.clone(),
                filename: body.filename,
                size: body.size,
                mime_type: body.mime_type,
                idempotency_key,
                draft,
            },
            client_info(&headers),
        )
        .await?;

    let draft_id = state.service.store().draft_id(&session.id).ok().flatten();
    let session_url = format!("/uploads/{}", session.id);

    let mut response_headers = HeaderMap::new();
    response_headers.insert("Location", hval(&session_url));
    let mut buf = itoa::Buffer::new();
    response_headers.insert(
        "X-Upload-Content-Length",
        hval(buf.format(session.total_bytes)),
    );
    response_headers.insert("X-Upload-Content-Type", hval(&session.mime_type));
    response_headers.insert("Cache-Control", hval("no-store"));

    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    let body = Json(CreateSessionResponse {
        upload_id: session.id,
        session_url,
        chunk_size: session.chunk_size,
        draft_id,
    });

    Ok((status, response_headers, body).into_response())
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    status: String,
    bytes_received: u64,
    total_bytes: u64,
    progress: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    cid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    playback_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_code: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// GET /uploads/{id}/status — JSON progress snapshot.
#[instrument(skip(state))]
pub async fn get_status(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let session = state.service.get_session(&id, &principal)?;
    Ok(Json(StatusResponse {
        status: session.status.as_str().to_string(),
        bytes_received: session.bytes_received,
        total_bytes: session.total_bytes,
        progress: session.progress_percent(),
        cid: session.cid,
        playback_url: session.playback_url,
        error_code: session.error_code,
        created_at: session.created_at,
        updated_at: session.updated_at,
    })
    .into_response())
}

/// JSON body for PUT /uploads/{id}/draft
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftBody {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub visibility: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
}

/// PUT /uploads/{id}/draft — replace the draft metadata (pre-completion).
#[instrument(skip(state, body))]
pub async fn update_draft(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(id): Path<String>,
    Json(body): Json<DraftBody>,
) -> Result<StatusCode, ApiError> {
    let draft = ContentDraft {
        title: body.title,
        description: body.description,
        tags: body.tags,
        visibility: body.visibility,
        category: body.category,
        thumbnail_url: body.thumbnail_url,
    };
    state.service.update_draft(&id, &principal, &draft)?;
    Ok(StatusCode::NO_CONTENT)
}
