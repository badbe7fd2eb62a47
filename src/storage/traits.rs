//! Object store trait definitions.

use crate::types::Part;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use thiserror::Error;

/// Errors that can occur during object store operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Multipart upload not found: {0}")]
    NoSuchUpload(String),

    #[error("Invalid part number: {0} (must be 1..=10000)")]
    InvalidPartNumber(u32),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Operation timed out after {0}s")]
    Timeout(u64),

    #[error("S3 error: {0}")]
    S3(String),

    #[error("Storage error: {0}")]
    Other(String),
}

/// Streamed body of one part. Never buffered whole by the adapter.
pub type PartStream = BoxStream<'static, Result<Bytes, std::io::Error>>;

/// Result of storing one part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedPart {
    pub etag: String,
    pub size: u64,
}

/// Result of finalizing a multipart upload.
#[derive(Debug, Clone)]
pub struct CompletedObject {
    pub location: String,
    pub etag: String,
}

/// Metadata from a HEAD request.
#[derive(Debug, Clone)]
pub struct ObjectInfo {
    pub size: u64,
    pub etag: String,
    pub content_type: Option<String>,
}

/// Narrow S3-compatible multipart surface the upload engine writes through.
///
/// The bucket is fixed at construction; the trait deals in keys only. This is
/// the only component that talks to the object store, and it must stream part
/// bodies rather than buffer them.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Begin a multipart upload, returning the store's upload handle.
    async fn create_multipart(
        &self,
        key: &str,
        content_type: &str,
    ) -> Result<String, StorageError>;

    /// Stream one part into the upload. `content_length` is exact; the
    /// implementation forwards it so the store can verify the byte count.
    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        body: PartStream,
        content_length: u64,
    ) -> Result<UploadedPart, StorageError>;

    /// Finalize the upload. `parts` must already be sorted ascending by
    /// part number.
    async fn complete_multipart(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[Part],
    ) -> Result<CompletedObject, StorageError>;

    /// Abort the upload. Idempotent: succeeds when the upload is already gone.
    async fn abort_multipart(&self, key: &str, upload_id: &str) -> Result<(), StorageError>;

    /// Object metadata for downstream consumers (pinning, playback).
    async fn head_object(&self, key: &str) -> Result<ObjectInfo, StorageError>;

    /// Stream a finalized object's contents without buffering it.
    async fn get_object_stream(
        &self,
        key: &str,
    ) -> Result<BoxStream<'static, Result<Bytes, StorageError>>, StorageError>;
}
