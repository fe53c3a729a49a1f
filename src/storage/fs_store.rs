//! Filesystem-backed object store
//!
//! Local-dev fallback with the same contract as the S3 backend, one
//! file per key under a base directory — the same layout the teacher's
//! `LocalChunkStorage` uses for temporary chunks.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures::stream::StreamExt;
use tokio::io::AsyncWriteExt;

use crate::error::{Result, UploadError};

use super::object_store::{ByteChunkStream, ObjectStore};

#[derive(Clone)]
pub struct FsObjectStore {
    base_path: PathBuf,
}

impl FsObjectStore {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        // Keys are always slash-separated identifiers, never raw
        // filesystem paths, so joining segments is safe.
        self.base_path.join(key)
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        // write to a sibling temp file then rename, so a reader never
        // observes a partially written object.
        let tmp_path = path.with_extension("tmp");
        tokio::fs::write(&tmp_path, &bytes).await?;
        tokio::fs::rename(&tmp_path, &path).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.path_for(key);
        tokio::fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                UploadError::NotFound(key.to_string())
            } else {
                UploadError::Storage(format!("read {key}: {e}"))
            }
        })
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(UploadError::Storage(format!("delete {key}: {e}"))),
        }
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<usize> {
        let dir = self.path_for(prefix);
        if !dir.exists() {
            return Ok(0);
        }

        let mut count = 0;
        let mut stack = vec![dir.clone()];
        while let Some(current) = stack.pop() {
            let mut entries = tokio::fs::read_dir(&current).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    stack.push(path);
                } else {
                    tokio::fs::remove_file(&path).await?;
                    count += 1;
                }
            }
        }

        remove_empty_dirs(&dir).await;
        Ok(count)
    }

    async fn list_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let dir = self.path_for(prefix);
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut keys = Vec::new();
        let mut stack = vec![dir.clone()];
        while let Some(current) = stack.pop() {
            let mut entries = tokio::fs::read_dir(&current).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    stack.push(path);
                } else if let Ok(relative) = path.strip_prefix(&self.base_path) {
                    keys.push(relative.to_string_lossy().replace('\\', "/"));
                }
            }
        }
        keys.sort();
        Ok(keys)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.path_for(key).exists())
    }

    /// Writes each incoming span straight to the sibling temp file as it
    /// arrives, then renames into place — the final object never exists
    /// in memory all at once.
    async fn put_stream(&self, key: &str, mut chunks: ByteChunkStream<'_>) -> Result<()> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp_path = path.with_extension("tmp");
        let mut file = tokio::fs::File::create(&tmp_path).await?;

        while let Some(chunk) = chunks.next().await {
            match chunk {
                Ok(bytes) => file.write_all(&bytes).await?,
                Err(e) => {
                    drop(file);
                    let _ = tokio::fs::remove_file(&tmp_path).await;
                    return Err(e);
                }
            }
        }

        file.flush().await?;
        drop(file);
        tokio::fs::rename(&tmp_path, &path).await?;
        Ok(())
    }
}

async fn remove_empty_dirs(dir: &Path) {
    let _ = tokio::fs::remove_dir(dir).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn put_get_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = FsObjectStore::new(dir.path().to_path_buf());

        store.put("temp-chunks/s1/0", b"hello".to_vec()).await.unwrap();
        let data = store.get("temp-chunks/s1/0").await.unwrap();
        assert_eq!(data, b"hello");
    }

    #[tokio::test]
    async fn get_missing_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = FsObjectStore::new(dir.path().to_path_buf());

        let err = store.get("temp-chunks/s1/0").await.unwrap_err();
        assert!(matches!(err, UploadError::NotFound(_)));
    }

    #[tokio::test]
    async fn delete_missing_is_not_an_error() {
        let dir = TempDir::new().unwrap();
        let store = FsObjectStore::new(dir.path().to_path_buf());

        store.delete("temp-chunks/s1/0").await.unwrap();
    }

    #[tokio::test]
    async fn delete_prefix_removes_all_keys() {
        let dir = TempDir::new().unwrap();
        let store = FsObjectStore::new(dir.path().to_path_buf());

        store.put("temp-chunks/s1/0", b"a".to_vec()).await.unwrap();
        store.put("temp-chunks/s1/1", b"b".to_vec()).await.unwrap();
        store.put("temp-chunks/s2/0", b"c".to_vec()).await.unwrap();

        let removed = store.delete_prefix("temp-chunks/s1").await.unwrap();
        assert_eq!(removed, 2);

        assert!(store.get("temp-chunks/s1/0").await.is_err());
        assert!(store.get("temp-chunks/s2/0").await.is_ok());
    }

    #[tokio::test]
    async fn list_prefix_returns_sorted_keys() {
        let dir = TempDir::new().unwrap();
        let store = FsObjectStore::new(dir.path().to_path_buf());

        store.put("temp-chunks/s1/1", b"b".to_vec()).await.unwrap();
        store.put("temp-chunks/s1/0", b"a".to_vec()).await.unwrap();

        let keys = store.list_prefix("temp-chunks/s1").await.unwrap();
        assert_eq!(keys, vec!["temp-chunks/s1/0", "temp-chunks/s1/1"]);
    }

    #[tokio::test]
    async fn delete_prefix_on_missing_dir_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = FsObjectStore::new(dir.path().to_path_buf());
        assert_eq!(store.delete_prefix("temp-chunks/nope").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn put_stream_concatenates_spans_in_order() {
        let dir = TempDir::new().unwrap();
        let store = FsObjectStore::new(dir.path().to_path_buf());

        let spans: Vec<Result<Vec<u8>>> =
            vec![Ok(b"HELL".to_vec()), Ok(b"OWOR".to_vec()), Ok(b"LD!".to_vec())];
        let stream = futures::stream::iter(spans).boxed();

        store.put_stream("final/s1/data.bin", stream).await.unwrap();
        let data = store.get("final/s1/data.bin").await.unwrap();
        assert_eq!(data, b"HELLOWORLD!");
    }

    #[tokio::test]
    async fn put_stream_error_leaves_no_partial_object() {
        let dir = TempDir::new().unwrap();
        let store = FsObjectStore::new(dir.path().to_path_buf());

        let spans: Vec<Result<Vec<u8>>> = vec![
            Ok(b"HELL".to_vec()),
            Err(UploadError::Storage("boom".to_string())),
        ];
        let stream = futures::stream::iter(spans).boxed();

        let err = store.put_stream("final/s1/data.bin", stream).await.unwrap_err();
        assert!(matches!(err, UploadError::Storage(_)));
        assert!(store.get("final/s1/data.bin").await.is_err());
    }
}
