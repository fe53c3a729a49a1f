//! Chunk Index
//!
//! A fast in-process cache of accepted `ChunkRecord`s, fronting the Object
//! Store the way the teacher's `ChunkStoreInner.chunk_index` fronts its
//! content-addressable storage: an `Arc`-wrapped `RwLock<HashMap<...>>`
//! keyed per `(session_id, index)`, reconstructible from the Object Store's
//! own listing if the cache is ever cold.
//!
//! `remember` is the crate's sole idempotency primitive: the `RwLock` write
//! guard makes the check-then-insert atomic against concurrent callers for
//! the same key, so exactly one caller observes "newly stored" per index.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::Result;
use crate::storage::ObjectStore;

use super::types::ChunkRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Remembered {
    NewlyStored,
    AlreadyPresent,
}

#[derive(Clone)]
pub struct ChunkIndex {
    inner: Arc<RwLock<HashMap<(Uuid, usize), ChunkRecord>>>,
}

impl ChunkIndex {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Conditional write: stores `record` iff no record exists yet for
    /// `(session_id, index)`. Returns the record that ends up recorded
    /// together with whether this call is the one that stored it.
    pub async fn remember(
        &self,
        session_id: Uuid,
        index: usize,
        record: ChunkRecord,
    ) -> (ChunkRecord, Remembered) {
        let mut map = self.inner.write().await;
        if let Some(existing) = map.get(&(session_id, index)) {
            return (existing.clone(), Remembered::AlreadyPresent);
        }
        map.insert((session_id, index), record.clone());
        (record, Remembered::NewlyStored)
    }

    /// Roll back a reservation — used when the payload `put` after a
    /// successful `remember` fails, so the operation is safely retriable.
    pub async fn forget(&self, session_id: Uuid, index: usize) {
        self.inner.write().await.remove(&(session_id, index));
    }

    pub async fn lookup(&self, session_id: Uuid, index: usize) -> Option<ChunkRecord> {
        self.inner.read().await.get(&(session_id, index)).cloned()
    }

    pub async fn indices(&self, session_id: Uuid) -> Vec<usize> {
        let map = self.inner.read().await;
        let mut indices: Vec<usize> = map
            .keys()
            .filter(|(sid, _)| *sid == session_id)
            .map(|(_, index)| *index)
            .collect();
        indices.sort_unstable();
        indices
    }

    pub async fn forget_all(&self, session_id: Uuid) {
        self.inner
            .write()
            .await
            .retain(|(sid, _), _| *sid != session_id);
    }

    /// Rebuild the accepted-index set for a session from the Object Store's
    /// own `<temp_prefix>/<session_id>/` listing, for when the cache is cold
    /// (e.g. after a restart). Chunk sizes are recovered from the listed
    /// keys' content length is not available from a bare listing, so this
    /// reconstructs presence only — `index` and `storage_key`, with `size`
    /// left at 0 and `stored_at` at reconstruction time.
    pub async fn reconstruct(
        &self,
        store: &dyn ObjectStore,
        session_id: Uuid,
        temp_prefix: &str,
    ) -> Result<()> {
        let prefix = format!("{temp_prefix}/{session_id}");
        let keys = store.list_prefix(&prefix).await?;

        let mut map = self.inner.write().await;
        for key in keys {
            if let Some(index) = key.rsplit('/').next().and_then(|s| s.parse::<usize>().ok()) {
                map.entry((session_id, index)).or_insert(ChunkRecord {
                    index,
                    size: 0,
                    stored_at: Utc::now(),
                    storage_key: key,
                });
            }
        }
        Ok(())
    }
}

impl Default for ChunkIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(index: usize) -> ChunkRecord {
        ChunkRecord {
            index,
            size: 4,
            stored_at: Utc::now(),
            storage_key: format!("temp-chunks/s/{index}"),
        }
    }

    #[tokio::test]
    async fn remember_is_idempotent_per_key() {
        let index = ChunkIndex::new();
        let session_id = Uuid::new_v4();

        let (_, first) = index.remember(session_id, 0, record(0)).await;
        let (_, second) = index.remember(session_id, 0, record(0)).await;

        assert_eq!(first, Remembered::NewlyStored);
        assert_eq!(second, Remembered::AlreadyPresent);
    }

    #[tokio::test]
    async fn indices_are_sorted_and_scoped_to_session() {
        let index = ChunkIndex::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        index.remember(a, 2, record(2)).await;
        index.remember(a, 0, record(0)).await;
        index.remember(b, 0, record(0)).await;

        assert_eq!(index.indices(a).await, vec![0, 2]);
        assert_eq!(index.indices(b).await, vec![0]);
    }

    #[tokio::test]
    async fn forget_all_clears_only_that_session() {
        let index = ChunkIndex::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        index.remember(a, 0, record(0)).await;
        index.remember(b, 0, record(0)).await;

        index.forget_all(a).await;

        assert!(index.indices(a).await.is_empty());
        assert_eq!(index.indices(b).await, vec![0]);
    }

    #[tokio::test]
    async fn concurrent_remember_has_exactly_one_winner() {
        let index = ChunkIndex::new();
        let session_id = Uuid::new_v4();

        let mut handles = Vec::new();
        for _ in 0..50 {
            let index = index.clone();
            handles.push(tokio::spawn(async move {
                index.remember(session_id, 0, record(0)).await.1
            }));
        }

        let mut newly_stored = 0;
        for handle in handles {
            if handle.await.unwrap() == Remembered::NewlyStored {
                newly_stored += 1;
            }
        }

        assert_eq!(newly_stored, 1);
    }
}
