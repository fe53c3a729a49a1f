//! S3-compatible object store backend
//!
//! Wraps the AWS SDK the way the teacher's `S3Client` does: a single
//! bucket, force-path-style addressing (required for MinIO and other
//! S3-compatible services), credentials built directly from config
//! rather than the default provider chain.

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::{
    config::{Credentials, Region},
    primitives::ByteStream,
    Client,
};

use crate::config::StorageConfig;
use crate::error::{Result, UploadError};

use super::object_store::ObjectStore;

/// S3-compatible object store (AWS S3, MinIO, Cloudflare R2, Backblaze B2).
#[derive(Clone)]
pub struct S3ObjectStore {
    client: Client,
    bucket: String,
}

impl S3ObjectStore {
    /// Build a client from configuration and verify the bucket is
    /// reachable. Connection failures are logged, not fatal — individual
    /// operations surface their own `StorageError` on retry.
    pub async fn new(config: &StorageConfig) -> Result<Self> {
        let credentials = Credentials::new(
            &config.access_key,
            &config.secret_key,
            None,
            None,
            "chunked-upload-service",
        );

        let region = config
            .region
            .clone()
            .unwrap_or_else(|| "us-east-1".to_string());

        let s3_config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .endpoint_url(&config.endpoint)
            .region(Region::new(region))
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();

        let client = Client::from_conf(s3_config);
        let bucket = config.bucket.clone();

        match client.head_bucket().bucket(&bucket).send().await {
            Ok(_) => tracing::info!(bucket = %bucket, "connected to object store bucket"),
            Err(e) => tracing::warn!(
                bucket = %bucket,
                error = %e,
                "could not verify bucket, will attempt operations anyway"
            ),
        }

        Ok(Self { client, bucket })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|e| UploadError::Storage(format!("put {key}: {e}")))?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                if e.to_string().contains("NoSuchKey") || e.to_string().contains("404") {
                    UploadError::NotFound(key.to_string())
                } else {
                    UploadError::Storage(format!("get {key}: {e}"))
                }
            })?;

        let data = response
            .body
            .collect()
            .await
            .map_err(|e| UploadError::Storage(format!("read body {key}: {e}")))?
            .into_bytes()
            .to_vec();

        Ok(data)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| UploadError::Storage(format!("delete {key}: {e}")))?;
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<usize> {
        let keys = self.list_prefix(prefix).await?;
        let count = keys.len();

        if keys.is_empty() {
            return Ok(0);
        }

        let object_ids: Vec<_> = keys
            .iter()
            .map(|k| {
                aws_sdk_s3::types::ObjectIdentifier::builder()
                    .key(k)
                    .build()
                    .expect("key is always set")
            })
            .collect();

        let delete = aws_sdk_s3::types::Delete::builder()
            .set_objects(Some(object_ids))
            .build()
            .map_err(|e| UploadError::Storage(format!("build delete batch: {e}")))?;

        self.client
            .delete_objects()
            .bucket(&self.bucket)
            .delete(delete)
            .send()
            .await
            .map_err(|e| UploadError::Storage(format!("delete_prefix {prefix}: {e}")))?;

        Ok(count)
    }

    async fn list_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut continuation_token = None;

        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix);

            if let Some(token) = continuation_token.take() {
                request = request.continuation_token(token);
            }

            let response = request
                .send()
                .await
                .map_err(|e| UploadError::Storage(format!("list {prefix}: {e}")))?;

            keys.extend(
                response
                    .contents()
                    .iter()
                    .filter_map(|obj| obj.key().map(|k| k.to_string())),
            );

            if !response.is_truncated().unwrap_or(false) {
                break;
            }
            continuation_token = response.next_continuation_token().map(|s| s.to_string());
        }

        Ok(keys)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => {
                if e.to_string().contains("NotFound") || e.to_string().contains("404") {
                    Ok(false)
                } else {
                    Err(UploadError::Storage(format!("head {key}: {e}")))
                }
            }
        }
    }
}
