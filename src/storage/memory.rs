//! In-memory object store used by tests and local development.
//!
//! Mirrors the multipart semantics of a real S3 endpoint: parts accumulate
//! under an upload id and become a single object on complete. Contents are
//! lost on restart.

use super::traits::{
    CompletedObject, ObjectInfo, ObjectStore, PartStream, StorageError, UploadedPart,
};
use crate::types::Part;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use md5::{Digest, Md5};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

struct PartData {
    data: Bytes,
    md5_hex: String,
    md5_raw: [u8; 16],
}

struct MultipartUpload {
    key: String,
    content_type: String,
    parts: HashMap<u32, PartData>,
}

struct StoredObject {
    data: Bytes,
    etag: String,
    content_type: String,
}

/// Thread-safe in-memory multipart store.
#[derive(Default)]
pub struct MemoryObjectStore {
    uploads: RwLock<HashMap<String, MultipartUpload>>,
    objects: RwLock<HashMap<String, StoredObject>>,
    id_counter: AtomicU64,
    /// Count of multipart uploads ever created; tests assert idempotent
    /// session creation against it.
    multiparts_created: AtomicU64,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total multipart uploads created over the store's lifetime.
    pub fn multiparts_created(&self) -> u64 {
        self.multiparts_created.load(Ordering::SeqCst)
    }

    /// Whether an in-progress multipart upload exists.
    pub fn has_upload(&self, upload_id: &str) -> bool {
        self.uploads.read().contains_key(upload_id)
    }

    /// Finalized object bytes, if present.
    pub fn object_bytes(&self, key: &str) -> Option<Bytes> {
        self.objects.read().get(key).map(|o| o.data.clone())
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn create_multipart(
        &self,
        key: &str,
        content_type: &str,
    ) -> Result<String, StorageError> {
        let counter = self.id_counter.fetch_add(1, Ordering::SeqCst);
        let upload_id = format!("mem-{counter:08x}");

        self.uploads.write().insert(
            upload_id.clone(),
            MultipartUpload {
                key: key.to_string(),
                content_type: content_type.to_string(),
                parts: HashMap::new(),
            },
        );
        self.multiparts_created.fetch_add(1, Ordering::SeqCst);
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        mut body: PartStream,
        content_length: u64,
    ) -> Result<UploadedPart, StorageError> {
        if !(1..=crate::types::MAX_PART_NUMBER).contains(&part_number) {
            return Err(StorageError::InvalidPartNumber(part_number));
        }

        // Drain the stream first; holding the lock across awaits would
        // serialize unrelated uploads.
        let mut buf = BytesMut::with_capacity(content_length.min(1 << 20) as usize);
        while let Some(chunk) = body.next().await {
            buf.extend_from_slice(&chunk?);
        }
        let data = buf.freeze();
        if data.len() as u64 != content_length {
            return Err(StorageError::Other(format!(
                "content length mismatch: declared {}, streamed {}",
                content_length,
                data.len()
            )));
        }

        let md5_raw: [u8; 16] = Md5::digest(&data).into();
        let md5_hex = hex::encode(md5_raw);
        let etag = format!("\"{}\"", md5_hex);

        let mut uploads = self.uploads.write();
        let upload = uploads
            .get_mut(upload_id)
            .ok_or_else(|| StorageError::NoSuchUpload(upload_id.to_string()))?;
        if upload.key != key {
            return Err(StorageError::NoSuchUpload(upload_id.to_string()));
        }

        // Overwrite semantics: re-uploading a part number replaces the data.
        upload.parts.insert(
            part_number,
            PartData {
                data,
                md5_hex,
                md5_raw,
            },
        );

        Ok(UploadedPart {
            etag,
            size: content_length,
        })
    }

    async fn complete_multipart(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[Part],
    ) -> Result<CompletedObject, StorageError> {
        let mut uploads = self.uploads.write();
        let upload = uploads
            .get(upload_id)
            .ok_or_else(|| StorageError::NoSuchUpload(upload_id.to_string()))?;
        if upload.key != key {
            return Err(StorageError::NoSuchUpload(upload_id.to_string()));
        }

        for window in parts.windows(2) {
            if window[0].part_number >= window[1].part_number {
                return Err(StorageError::Other("part order not ascending".to_string()));
            }
        }

        let mut assembled = BytesMut::new();
        let mut md5_concat = Vec::with_capacity(parts.len() * 16);
        for part in parts {
            let stored = upload.parts.get(&part.part_number).ok_or_else(|| {
                StorageError::Other(format!("part {} has not been uploaded", part.part_number))
            })?;
            if part.etag.trim_matches('"') != stored.md5_hex {
                return Err(StorageError::Other(format!(
                    "etag mismatch for part {}",
                    part.part_number
                )));
            }
            md5_concat.extend_from_slice(&stored.md5_raw);
            assembled.extend_from_slice(&stored.data);
        }

        // S3-compatible multipart ETag: MD5(concat of part MD5 raw bytes)-N
        let final_md5 = Md5::digest(&md5_concat);
        let etag = format!("\"{}-{}\"", hex::encode(final_md5), parts.len());
        let content_type = upload.content_type.clone();

        uploads.remove(upload_id);
        drop(uploads);

        self.objects.write().insert(
            key.to_string(),
            StoredObject {
                data: assembled.freeze(),
                etag: etag.clone(),
                content_type,
            },
        );

        Ok(CompletedObject {
            location: format!("/{}", key),
            etag,
        })
    }

    async fn abort_multipart(&self, _key: &str, upload_id: &str) -> Result<(), StorageError> {
        // Removing an absent upload is fine; abort is idempotent.
        self.uploads.write().remove(upload_id);
        Ok(())
    }

    async fn head_object(&self, key: &str) -> Result<ObjectInfo, StorageError> {
        let objects = self.objects.read();
        let obj = objects
            .get(key)
            .ok_or_else(|| StorageError::NotFound(key.to_string()))?;
        Ok(ObjectInfo {
            size: obj.data.len() as u64,
            etag: obj.etag.clone(),
            content_type: Some(obj.content_type.clone()),
        })
    }

    async fn get_object_stream(
        &self,
        key: &str,
    ) -> Result<BoxStream<'static, Result<Bytes, StorageError>>, StorageError> {
        let data = self
            .objects
            .read()
            .get(key)
            .map(|o| o.data.clone())
            .ok_or_else(|| StorageError::NotFound(key.to_string()))?;
        Ok(Box::pin(stream::once(async { Ok(data) })))
    }
}
