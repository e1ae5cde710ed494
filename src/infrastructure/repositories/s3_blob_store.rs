use super::blob_store::{BlobStore, BlobStoreError};
use async_trait::async_trait;
use aws_sdk_s3::{primitives::ByteStream, Client as S3Client};
use std::sync::Arc;

/// S3-backed blob store; references are object keys inside `bucket`
pub struct S3BlobStore {
    client: Arc<S3Client>,
    bucket: String,
}

impl S3BlobStore {
    pub fn new(client: Arc<S3Client>, bucket: String) -> Self {
        Self { client, bucket }
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<String, BlobStoreError> {
        let size = bytes.len();
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type("audio/mpeg")
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, bucket = %self.bucket, key = key, "S3 put_object failed");
                BlobStoreError::Backend(format!("S3 put_object error: {}", e))
            })?;

        tracing::debug!(bucket = %self.bucket, key = key, size_bytes = size, "Blob stored in S3");
        Ok(key.to_string())
    }

    async fn get(&self, blob_ref: &str) -> Result<Vec<u8>, BlobStoreError> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(blob_ref)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().map(|se| se.is_no_such_key()).unwrap_or(false) {
                    BlobStoreError::NotFound(blob_ref.to_string())
                } else {
                    BlobStoreError::Backend(format!("S3 get_object error: {}", e))
                }
            })?;

        let data = output
            .body
            .collect()
            .await
            .map_err(|e| BlobStoreError::Backend(format!("Failed to read S3 object body: {}", e)))?;

        Ok(data.into_bytes().to_vec())
    }

    async fn delete(&self, blob_ref: &str) -> Result<(), BlobStoreError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(blob_ref)
            .send()
            .await
            .map_err(|e| BlobStoreError::Backend(format!("S3 delete_object error: {}", e)))?;

        Ok(())
    }
}
