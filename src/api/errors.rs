//! API error type and the single place service errors map to HTTP.

use crate::service::UploadError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

/// Errors surfaced by the HTTP layer.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("missing or invalid principal")]
    Unauthorized,

    #[error("rate limit exceeded for {0}")]
    RateLimited(&'static str),

    #[error("{0}")]
    BadRequest(String),

    #[error("uploadType must be 'resumable'")]
    InvalidUploadType,

    #[error(transparent)]
    Upload(#[from] UploadError),
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    code: &'a str,
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::InvalidUploadType => StatusCode::BAD_REQUEST,
            ApiError::Upload(e) => match e {
                UploadError::FileTooLarge { .. }
                | UploadError::UnsupportedType(_)
                | UploadError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
                UploadError::SessionNotFound(_) => StatusCode::NOT_FOUND,
                UploadError::Forbidden => StatusCode::FORBIDDEN,
                UploadError::InvalidState(_) => StatusCode::CONFLICT,
                UploadError::Storage(_) | UploadError::Store(_) | UploadError::CompleteFailed(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
        }
    }

    /// Stable machine-readable code for clients.
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Unauthorized => "unauthorized",
            ApiError::RateLimited(_) => "rate_limited",
            ApiError::BadRequest(_) => "bad_request",
            ApiError::InvalidUploadType => "invalid_upload_type",
            ApiError::Upload(e) => e.code(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = self.to_string();
        let body = Json(ErrorBody {
            error: &message,
            code: self.code(),
        });
        (status, body).into_response()
    }
}
