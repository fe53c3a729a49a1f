//! Chunk Service — the hard core of the protocol.
//!
//! Accepts chunk payloads, verifies them against the owning session,
//! guarantees idempotency via the Chunk Index's conditional write, and
//! reassembles the final object. Structured the way the teacher's
//! `ChunkStore` wraps a `ChunkStorage` backend, minus the content-addressable
//! dedup layer (`by-hash/` storage, `chunk_exists`/`find_existing_chunks`) —
//! out of scope here since chunk identity is purely `(session_id, index)`.

use std::sync::Arc;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use uuid::Uuid;

use crate::error::{Result, UploadError};
use crate::storage::ObjectStore;

use super::chunk_index::{ChunkIndex, Remembered};
use super::types::{ChunkRecord, Session, StoreOutcome};

#[derive(Clone)]
pub struct ChunkService {
    store: Arc<dyn ObjectStore>,
    index: ChunkIndex,
    temp_prefix: String,
    final_prefix: String,
}

impl ChunkService {
    pub fn new(store: Arc<dyn ObjectStore>, index: ChunkIndex, temp_prefix: String, final_prefix: String) -> Self {
        Self {
            store,
            index,
            temp_prefix,
            final_prefix,
        }
    }

    fn storage_key(&self, session_id: Uuid, index: usize) -> String {
        format!("{}/{session_id}/{index}", self.temp_prefix)
    }

    fn final_key(&self, session_id: Uuid, file_name: &str) -> String {
        format!("{}/{session_id}/{file_name}", self.final_prefix)
    }

    /// Validate shape, reserve the index, and durably store the payload.
    /// The session itself must already have been checked for
    /// existence/expiry/terminal state by the caller (the Upload Service),
    /// which is why this takes a loaded `Session` rather than an id.
    pub async fn store_chunk(
        &self,
        session: &Session,
        index: usize,
        payload: &[u8],
    ) -> Result<(StoreOutcome, usize)> {
        if index >= session.total_chunks {
            return Err(UploadError::BadIndex {
                index,
                total: session.total_chunks,
            });
        }

        let expected_size = session.expected_chunk_size(index);
        if payload.len() != expected_size {
            return Err(UploadError::BadChunkSize {
                expected: expected_size,
                actual: payload.len(),
            });
        }

        let storage_key = self.storage_key(session.id, index);
        let candidate = ChunkRecord {
            index,
            size: payload.len(),
            stored_at: Utc::now(),
            storage_key: storage_key.clone(),
        };

        let (record, remembered) = self.index.remember(session.id, index, candidate).await;

        match remembered {
            Remembered::AlreadyPresent => {
                tracing::debug!(
                    session_id = %session.id,
                    chunk_index = index,
                    "chunk already present, skipping write"
                );
                Ok((StoreOutcome::AlreadyPresent, record.size))
            }
            Remembered::NewlyStored => {
                if let Err(e) = self.store.put(&storage_key, payload.to_vec()).await {
                    // Roll back the reservation so a retry can succeed.
                    self.index.forget(session.id, index).await;
                    return Err(e);
                }

                tracing::info!(
                    session_id = %session.id,
                    chunk_index = index,
                    size = payload.len(),
                    "chunk stored"
                );
                Ok((StoreOutcome::Stored, payload.len()))
            }
        }
    }

    /// Sorted indices still needed to complete the session.
    pub async fn missing(&self, session: &Session) -> Vec<usize> {
        let have: std::collections::HashSet<usize> =
            self.index.indices(session.id).await.into_iter().collect();
        (0..session.total_chunks)
            .filter(|i| !have.contains(i))
            .collect()
    }

    /// Reassemble the session's chunks into the final object, in strict
    /// ascending order. Refuses if any index is missing.
    ///
    /// Chunks are fetched one at a time and fed into `put_stream` as they
    /// arrive rather than buffered into one in-memory blob first — on the
    /// filesystem backend the final object is written incrementally, so
    /// reassembling a multi-gigabyte upload doesn't require holding it
    /// whole in the process's memory.
    pub async fn assemble(&self, session: &Session) -> Result<String> {
        let missing = self.missing(session).await;
        if !missing.is_empty() {
            return Err(UploadError::MissingChunks(missing));
        }

        let mut storage_keys = Vec::with_capacity(session.total_chunks);
        for i in 0..session.total_chunks {
            let record = self
                .index
                .lookup(session.id, i)
                .await
                .ok_or_else(|| UploadError::MissingChunks(vec![i]))?;
            storage_keys.push(record.storage_key);
        }

        let final_key = self.final_key(session.id, &session.file_name);
        let store = self.store.clone();
        let chunk_stream = stream::unfold(storage_keys.into_iter(), move |mut keys| {
            let store = store.clone();
            async move {
                let key = keys.next()?;
                Some((store.get(&key).await, keys))
            }
        })
        .boxed();

        if let Err(e) = self.store.put_stream(&final_key, chunk_stream).await {
            // Best-effort cleanup of a partial final object before
            // surfacing the failure — the caller decides the session's
            // fate, per the state machine.
            let _ = self.store.delete(&final_key).await;
            return Err(e);
        }

        Ok(final_key)
    }

    /// Delete every temporary chunk for this session and drop the cache
    /// entries. Errors are logged, never surfaced — cleanup is best-effort
    /// and safe to call repeatedly.
    pub async fn cleanup(&self, session_id: Uuid) {
        let prefix = format!("{}/{session_id}", self.temp_prefix);
        if let Err(e) = self.store.delete_prefix(&prefix).await {
            tracing::warn!(session_id = %session_id, error = %e, "chunk cleanup failed");
        }
        self.index.forget_all(session_id).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::FsObjectStore;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn test_session(total_chunks: usize, declared_size: u64, chunk_size: usize) -> Session {
        let now = Utc::now();
        Session {
            id: Uuid::new_v4(),
            owner_id: None,
            file_name: "blob.bin".to_string(),
            declared_size,
            declared_type: "application/octet-stream".to_string(),
            expected_digest: None,
            chunk_size,
            total_chunks,
            status: crate::upload::types::SessionStatus::Uploading,
            final_path: None,
            metadata: HashMap::new(),
            created_at: now,
            updated_at: now,
            expires_at: now + chrono::Duration::hours(24),
        }
    }

    fn service() -> (ChunkService, TempDir) {
        let dir = TempDir::new().unwrap();
        let store: Arc<dyn ObjectStore> = Arc::new(FsObjectStore::new(dir.path().to_path_buf()));
        (
            ChunkService::new(store, ChunkIndex::new(), "temp-chunks".to_string(), "final".to_string()),
            dir,
        )
    }

    #[tokio::test]
    async fn store_chunk_rejects_bad_index() {
        let (service, _dir) = service();
        let session = test_session(3, 11, 4);

        let err = service.store_chunk(&session, 3, b"abcd").await.unwrap_err();
        assert!(matches!(err, UploadError::BadIndex { .. }));
    }

    #[tokio::test]
    async fn store_chunk_rejects_wrong_size() {
        let (service, _dir) = service();
        let session = test_session(3, 11, 4);

        let err = service.store_chunk(&session, 0, b"abc").await.unwrap_err();
        assert!(matches!(err, UploadError::BadChunkSize { .. }));
    }

    #[tokio::test]
    async fn duplicate_chunk_is_idempotent() {
        let (service, _dir) = service();
        let session = test_session(3, 11, 4);

        let (first, _) = service.store_chunk(&session, 0, b"HELL").await.unwrap();
        let (second, _) = service.store_chunk(&session, 0, b"HELL").await.unwrap();

        assert_eq!(first, StoreOutcome::Stored);
        assert_eq!(second, StoreOutcome::AlreadyPresent);
    }

    #[tokio::test]
    async fn assemble_reassembles_bytes_in_order() {
        let (service, _dir) = service();
        let session = test_session(3, 11, 4);

        service.store_chunk(&session, 2, b"LD!").await.unwrap();
        service.store_chunk(&session, 0, b"HELL").await.unwrap();
        service.store_chunk(&session, 1, b"OWOR").await.unwrap();

        let final_key = service.assemble(&session).await.unwrap();
        let bytes = service.store.get(&final_key).await.unwrap();
        assert_eq!(bytes, b"HELLOWORLD!");
    }

    #[tokio::test]
    async fn assemble_refuses_with_gap() {
        let (service, _dir) = service();
        let session = test_session(3, 11, 4);

        service.store_chunk(&session, 0, b"HELL").await.unwrap();
        service.store_chunk(&session, 2, b"LD!").await.unwrap();

        let err = service.assemble(&session).await.unwrap_err();
        match err {
            UploadError::MissingChunks(indices) => assert_eq!(indices, vec![1]),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn concurrent_store_chunk_has_exactly_one_winner() {
        let (service, _dir) = service();
        let session = test_session(3, 11, 4);

        let mut handles = Vec::new();
        for _ in 0..50 {
            let service = service.clone();
            let session = session.clone();
            handles.push(tokio::spawn(async move {
                service.store_chunk(&session, 0, b"HELL").await.unwrap().0
            }));
        }

        let mut stored = 0;
        for handle in handles {
            if handle.await.unwrap() == StoreOutcome::Stored {
                stored += 1;
            }
        }
        assert_eq!(stored, 1);
    }

    #[tokio::test]
    async fn cleanup_is_idempotent() {
        let (service, _dir) = service();
        let session = test_session(3, 11, 4);
        service.store_chunk(&session, 0, b"HELL").await.unwrap();

        service.cleanup(session.id).await;
        service.cleanup(session.id).await;

        assert!(service.missing(&session).await.len() == 3);
    }
}
