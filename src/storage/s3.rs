//! S3 object store implementation using the AWS SDK.

use super::traits::{
    CompletedObject, ObjectInfo, ObjectStore, PartStream, StorageError, UploadedPart,
};
use crate::config::StorageConfig;
use async_trait::async_trait;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::{BehaviorVersion, Region};
use aws_sdk_s3::error::ProvideErrorMetadata;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client;
use aws_smithy_types::body::SdkBody;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use http_body::Frame;
use http_body_util::StreamBody;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::io::ReaderStream;
use tracing::{debug, instrument};

/// In-flight frames buffered between the request reader and the store
/// writer. Backpressure propagates to the client socket once this fills.
const PART_COPY_BUFFER_FRAMES: usize = 8;

/// S3-compatible multipart upload backend.
///
/// Works against AWS or any path-style endpoint (MinIO, LocalStack). The
/// client is configured directly from our own config — no aws-config
/// credential-chain machinery.
pub struct S3ObjectStore {
    client: Client,
    bucket: String,
}

impl S3ObjectStore {
    /// Create a new S3 store from configuration.
    pub fn new(config: &StorageConfig) -> Result<Self, StorageError> {
        let StorageConfig::S3 {
            endpoint,
            bucket,
            region,
            force_path_style,
            access_key_id,
            secret_access_key,
        } = config
        else {
            return Err(StorageError::Other(
                "S3ObjectStore requires S3 configuration".to_string(),
            ));
        };

        let mut builder = aws_sdk_s3::config::Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(region.clone()))
            .force_path_style(*force_path_style);

        // Custom endpoint for MinIO, LocalStack, etc.
        if let Some(ep) = endpoint {
            builder = builder.endpoint_url(ep);
        }

        // Explicit credentials if provided, otherwise the SDK default chain.
        if let (Some(key_id), Some(secret)) = (access_key_id, secret_access_key) {
            let credentials = Credentials::new(key_id, secret, None, None, "reelgate-config");
            builder = builder.credentials_provider(credentials);
        }

        let client = Client::from_conf(builder.build());

        debug!("S3ObjectStore initialized for bucket: {}", bucket);

        Ok(Self {
            client,
            bucket: bucket.clone(),
        })
    }

    fn is_no_such_upload<E: ProvideErrorMetadata, R>(err: &SdkError<E, R>) -> bool {
        err.as_service_error()
            .and_then(|e| e.meta().code())
            .is_some_and(|code| code == "NoSuchUpload")
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    #[instrument(skip(self))]
    async fn create_multipart(
        &self,
        key: &str,
        content_type: &str,
    ) -> Result<String, StorageError> {
        let resp = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| StorageError::S3(format!("create_multipart_upload failed: {}", e)))?;

        let upload_id = resp
            .upload_id()
            .ok_or_else(|| StorageError::S3("no upload id in response".to_string()))?
            .to_string();

        debug!("S3 CreateMultipartUpload {} -> {}", key, upload_id);
        Ok(upload_id)
    }

    #[instrument(skip(self, body))]
    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        body: PartStream,
        content_length: u64,
    ) -> Result<UploadedPart, StorageError> {
        if !(1..=crate::types::MAX_PART_NUMBER).contains(&part_number) {
            return Err(StorageError::InvalidPartNumber(part_number));
        }

        // Single streaming copy between the request body and the store
        // writer, through a bounded buffer. If the SDK side goes away
        // (deadline, abort) the send fails and the copy task stops; a client
        // disconnect surfaces as a stream error and cancels the SDK request.
        let (tx, rx) = tokio::sync::mpsc::channel::<Result<Frame<Bytes>, std::io::Error>>(
            PART_COPY_BUFFER_FRAMES,
        );
        tokio::spawn(async move {
            let mut body = body;
            while let Some(item) = body.next().await {
                if tx.send(item.map(Frame::data)).await.is_err() {
                    break;
                }
            }
        });
        let sdk_body = SdkBody::from_body_1_x(StreamBody::new(ReceiverStream::new(rx)));

        let resp = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number as i32)
            .content_length(content_length as i64)
            .body(ByteStream::new(sdk_body))
            .send()
            .await
            .map_err(|e| {
                if Self::is_no_such_upload(&e) {
                    StorageError::NoSuchUpload(upload_id.to_string())
                } else {
                    StorageError::S3(format!("upload_part failed: {}", e))
                }
            })?;

        let etag = resp
            .e_tag()
            .ok_or_else(|| StorageError::S3(format!("no etag for part {}", part_number)))?
            .to_string();

        debug!(
            "S3 UploadPart {} part={} ({} bytes)",
            key, part_number, content_length
        );
        Ok(UploadedPart {
            etag,
            size: content_length,
        })
    }

    #[instrument(skip(self, parts))]
    async fn complete_multipart(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[crate::types::Part],
    ) -> Result<CompletedObject, StorageError> {
        let completed_parts: Vec<CompletedPart> = parts
            .iter()
            .map(|p| {
                CompletedPart::builder()
                    .part_number(p.part_number as i32)
                    .e_tag(&p.etag)
                    .build()
            })
            .collect();

        let resp = self
            .client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(completed_parts))
                    .build(),
            )
            .send()
            .await
            .map_err(|e| {
                if Self::is_no_such_upload(&e) {
                    StorageError::NoSuchUpload(upload_id.to_string())
                } else {
                    StorageError::S3(format!("complete_multipart_upload failed: {}", e))
                }
            })?;

        let location = resp
            .location()
            .map(|s| s.to_string())
            .unwrap_or_else(|| format!("/{}/{}", self.bucket, key));
        let etag = resp.e_tag().unwrap_or_default().to_string();

        debug!(
            "S3 CompleteMultipartUpload {} ({} parts)",
            key,
            parts.len()
        );
        Ok(CompletedObject { location, etag })
    }

    #[instrument(skip(self))]
    async fn abort_multipart(&self, key: &str, upload_id: &str) -> Result<(), StorageError> {
        let result = self
            .client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await;

        match result {
            Ok(_) => {
                debug!("S3 AbortMultipartUpload {}", key);
                Ok(())
            }
            // Already aborted or completed elsewhere; abort is idempotent.
            Err(ref e) if Self::is_no_such_upload(e) => Ok(()),
            Err(e) => Err(StorageError::S3(format!(
                "abort_multipart_upload failed: {}",
                e
            ))),
        }
    }

    #[instrument(skip(self))]
    async fn head_object(&self, key: &str) -> Result<ObjectInfo, StorageError> {
        let resp = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                if let SdkError::ServiceError(service_error) = &e {
                    if service_error.err().is_not_found() {
                        return StorageError::NotFound(key.to_string());
                    }
                }
                StorageError::S3(format!("head_object failed: {}", e))
            })?;

        Ok(ObjectInfo {
            size: resp.content_length().unwrap_or(0) as u64,
            etag: resp.e_tag().unwrap_or_default().to_string(),
            content_type: resp.content_type().map(|s| s.to_string()),
        })
    }

    #[instrument(skip(self))]
    async fn get_object_stream(
        &self,
        key: &str,
    ) -> Result<BoxStream<'static, Result<Bytes, StorageError>>, StorageError> {
        let resp = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                if let SdkError::ServiceError(service_error) = &e {
                    if matches!(
                        service_error.err(),
                        aws_sdk_s3::operation::get_object::GetObjectError::NoSuchKey(_)
                    ) {
                        return StorageError::NotFound(key.to_string());
                    }
                }
                StorageError::S3(format!("get_object failed: {}", e))
            })?;

        let reader = resp.body.into_async_read();
        let stream = ReaderStream::new(reader).map(|res| res.map_err(StorageError::Io));
        Ok(Box::pin(stream))
    }
}
