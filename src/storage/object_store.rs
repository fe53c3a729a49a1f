//! Object Store Adapter trait
//!
//! Narrow, content-agnostic interface over a key -> bytes store. Both
//! backends must tolerate transient failures: callers may retry `put`/
//! `delete` without corrupting state, and `delete`/`delete_prefix` are
//! idempotent (a missing key is not an error).

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};

use crate::error::{Result, UploadError};

/// A sequence of already-fetched byte spans consumed by `put_stream`.
pub type ByteChunkStream<'a> = BoxStream<'a, Result<Vec<u8>>>;

/// Content-agnostic put/get/delete over a key namespace.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `bytes` at `key`. Overwrites are atomic from the reader's
    /// perspective.
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<()>;

    /// Fetch the bytes stored at `key`. Fails with `UploadError::NotFound`
    /// if the key is absent.
    async fn get(&self, key: &str) -> Result<Vec<u8>>;

    /// Remove `key`. A missing key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Remove every key under `prefix`. Idempotent.
    async fn delete_prefix(&self, prefix: &str) -> Result<usize>;

    /// List every key under `prefix`, for cache-cold reconstruction of
    /// the Chunk Index.
    async fn list_prefix(&self, prefix: &str) -> Result<Vec<String>>;

    /// Check whether `key` exists without fetching its bytes.
    async fn exists(&self, key: &str) -> Result<bool> {
        match self.get(key).await {
            Ok(_) => Ok(true),
            Err(UploadError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Consume a stream of byte spans and store them concatenated at
    /// `key`, used for assembling the final object without holding every
    /// chunk in memory at once. The default implementation buffers the
    /// whole stream and delegates to `put`; backends for which true
    /// incremental writes matter (the filesystem adapter) override it.
    async fn put_stream(&self, key: &str, mut chunks: ByteChunkStream<'_>) -> Result<()> {
        let mut buf = Vec::new();
        while let Some(chunk) = chunks.next().await {
            buf.extend_from_slice(&chunk?);
        }
        self.put(key, buf).await
    }
}
