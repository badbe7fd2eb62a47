//! Streaming binding between the HTTP request body and the upload engine.
//!
//! The extractor validates headers only; the body stays an unread stream
//! until the engine decides to forward it to the object store. When the
//! engine answers with a correction instead, the stream is dropped without a
//! single read and the connection discards the remaining bytes.

use super::errors::ApiError;
use crate::content_range::ContentRange;
use crate::storage::PartStream;
use axum::{
    async_trait,
    extract::{FromRequest, Request},
    http::header::{CONTENT_LENGTH, CONTENT_RANGE},
};
use futures::TryStreamExt;

/// A chunk PUT (or status probe) with its body bound lazily.
pub struct ChunkUpload {
    pub content_range: ContentRange,
    pub content_length: u64,
    pub body: PartStream,
}

impl std::fmt::Debug for ChunkUpload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkUpload")
            .field("content_range", &self.content_range)
            .field("content_length", &self.content_length)
            .field("body", &"<stream>")
            .finish()
    }
}

#[async_trait]
impl<S> FromRequest<S> for ChunkUpload
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, _state: &S) -> Result<Self, Self::Rejection> {
        let headers = req.headers();

        let raw_range = headers
            .get(CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ApiError::BadRequest("missing Content-Range header".to_string()))?;
        let content_range = ContentRange::parse(raw_range)
            .ok_or_else(|| ApiError::BadRequest("malformed Content-Range header".to_string()))?;

        let content_length = headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .ok_or_else(|| {
                ApiError::BadRequest("missing or malformed Content-Length header".to_string())
            })?;

        if content_range.is_status_probe && content_length != 0 {
            return Err(ApiError::BadRequest(
                "status probe must have an empty body".to_string(),
            ));
        }

        let body: PartStream = Box::pin(
            req.into_body()
                .into_data_stream()
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e)),
        );

        Ok(ChunkUpload {
            content_range,
            content_length,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request as HttpRequest;
    use futures::StreamExt;

    async fn extract(range: Option<&str>, length: Option<&str>) -> Result<ChunkUpload, ApiError> {
        let mut builder = HttpRequest::put("/uploads/x");
        if let Some(r) = range {
            builder = builder.header("content-range", r);
        }
        if let Some(l) = length {
            builder = builder.header("content-length", l);
        }
        let req = builder.body(Body::from("payload")).unwrap();
        ChunkUpload::from_request(req, &()).await
    }

    #[tokio::test]
    async fn test_valid_chunk_request() {
        let chunk = extract(Some("bytes 0-6/7"), Some("7")).await.unwrap();
        assert_eq!(chunk.content_range.start, 0);
        assert_eq!(chunk.content_length, 7);
        assert!(!chunk.content_range.is_status_probe);

        // The stream still delivers the payload when polled.
        let mut body = chunk.body;
        let first = body.next().await.unwrap().unwrap();
        assert_eq!(&first[..], b"payload");
    }

    #[tokio::test]
    async fn test_probe_request() {
        let req = HttpRequest::put("/uploads/x")
            .header("content-range", "bytes */*")
            .header("content-length", "0")
            .body(Body::empty())
            .unwrap();
        let chunk = ChunkUpload::from_request(req, &()).await.unwrap();
        assert!(chunk.content_range.is_status_probe);
        assert_eq!(chunk.content_length, 0);
    }

    #[tokio::test]
    async fn test_missing_headers_rejected() {
        assert!(matches!(
            extract(None, Some("7")).await.unwrap_err(),
            ApiError::BadRequest(_)
        ));
        assert!(matches!(
            extract(Some("bytes 0-6/7"), None).await.unwrap_err(),
            ApiError::BadRequest(_)
        ));
        assert!(matches!(
            extract(Some("bytes 0-6/7"), Some("seven")).await.unwrap_err(),
            ApiError::BadRequest(_)
        ));
        assert!(matches!(
            extract(Some("garbage"), Some("7")).await.unwrap_err(),
            ApiError::BadRequest(_)
        ));
    }

    #[tokio::test]
    async fn test_probe_with_body_rejected() {
        assert!(matches!(
            extract(Some("bytes */*"), Some("7")).await.unwrap_err(),
            ApiError::BadRequest(_)
        ));
    }
}
