//! Upload Service
//!
//! Owns the session state machine and orchestrates the happy path —
//! `initialize`, `status`, `transition`, `complete`, `sweep_expired` —
//! the way the teacher's `SessionManager` owns `UploadSession` lifecycle,
//! minus the concurrent-upload admission limit and in-memory-only storage:
//! here the Session Store (SQLite) is the source of truth and the Chunk
//! Index/status cache are fronting layers over it.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::config::UploadConfig;
use crate::db::SessionRepository;
use crate::error::{Result, UploadError};
use crate::storage::ObjectStore;

use super::ai_hook::AiPipeline;
use super::chunk_service::ChunkService;
use super::types::{
    AiPipelineSummary, ChunkAcceptedStatus, ChunkUploadResponse, CompleteResponse, InitRequest,
    InitResponse, Session, SessionStatus, StatusResponse, StoreOutcome, UploadProgress,
};
use super::validator::Validator;

/// Legal state-machine edges. `Assembling -> Assembling` is a permitted
/// self-transition for a retried `complete` call re-entering assembly after
/// a cancellation.
fn is_legal_transition(from: SessionStatus, to: SessionStatus) -> bool {
    use SessionStatus::*;
    matches!(
        (from, to),
        (Init, Uploading)
            | (Init, Failed)
            | (Uploading, Assembling)
            | (Uploading, Failed)
            | (Assembling, Assembling)
            | (Assembling, Completed)
            | (Assembling, Failed)
    )
}

/// O(1)-in-session-fields cache entry for the status fast path.
#[derive(Clone)]
struct CachedSession {
    session: Session,
}

pub struct UploadService {
    pool: SqlitePool,
    store: Arc<dyn ObjectStore>,
    chunk_service: ChunkService,
    ai_pipeline: Arc<dyn AiPipeline>,
    config: Arc<UploadConfig>,
    cache: RwLock<HashMap<Uuid, CachedSession>>,
}

impl UploadService {
    pub fn new(
        pool: SqlitePool,
        store: Arc<dyn ObjectStore>,
        chunk_service: ChunkService,
        ai_pipeline: Arc<dyn AiPipeline>,
        config: Arc<UploadConfig>,
    ) -> Self {
        Self {
            pool,
            store,
            chunk_service,
            ai_pipeline,
            config,
            cache: RwLock::new(HashMap::new()),
        }
    }

    async fn invalidate_cache(&self, session_id: Uuid) {
        self.cache.write().await.remove(&session_id);
    }

    async fn cache_put(&self, session: Session) {
        self.cache
            .write()
            .await
            .insert(session.id, CachedSession { session });
    }

    async fn load_session(&self, session_id: Uuid) -> Result<Session> {
        if let Some(cached) = self.cache.read().await.get(&session_id) {
            return Ok(cached.session.clone());
        }
        let repo = SessionRepository::new(&self.pool);
        let session = repo.load(session_id).await?;
        self.cache_put(session.clone()).await;
        Ok(session)
    }

    /// Validate and create a brand new session in `INIT`.
    pub async fn initialize(&self, request: InitRequest) -> Result<InitResponse> {
        let validator = Validator::new(&self.config);
        validator.validate_init(&request.file_name, request.file_size, &request.file_type)?;

        let chunk_size = self.config.chunk_size;
        let total_chunks = ((request.file_size as usize) + chunk_size - 1) / chunk_size;
        let total_chunks = total_chunks.max(1);

        let now = Utc::now();
        let session = Session {
            id: Uuid::new_v4(),
            owner_id: None,
            file_name: request.file_name,
            declared_size: request.file_size,
            declared_type: request.file_type,
            expected_digest: request.checksum,
            chunk_size,
            total_chunks,
            status: SessionStatus::Init,
            final_path: None,
            metadata: request.metadata.unwrap_or_default(),
            created_at: now,
            updated_at: now,
            expires_at: now + chrono::Duration::hours(self.config.session_expiry_hours),
        };

        let repo = SessionRepository::new(&self.pool);
        repo.insert(&session).await?;
        self.cache_put(session.clone()).await;

        tracing::info!(
            session_id = %session.id,
            file_name = %session.file_name,
            total_chunks,
            "upload session initialized"
        );

        Ok(InitResponse {
            upload_id: session.id.to_string(),
            chunk_size,
            total_chunks,
            upload_url: "/api/upload/chunk".to_string(),
            expires_at: session.expires_at,
        })
    }

    /// Accept one chunk, delegating shape/idempotency to the Chunk
    /// Service, and driving the `INIT -> UPLOADING` transition on the
    /// session's first accepted chunk.
    pub async fn accept_chunk(
        &self,
        session_id: Uuid,
        index: usize,
        payload: &[u8],
    ) -> Result<ChunkUploadResponse> {
        let session = self.load_session(session_id).await?;

        if session.is_expired() {
            return Err(UploadError::SessionExpired(session_id.to_string()));
        }
        if session.status.is_terminal() {
            return Err(UploadError::SessionTerminal(session_id.to_string()));
        }

        let (outcome, _size) = self.chunk_service.store_chunk(&session, index, payload).await?;

        if outcome == StoreOutcome::Stored && session.status == SessionStatus::Init {
            // No-op if another racing chunk already flipped it.
            let _ = self.transition(session_id, SessionStatus::Uploading, None).await;
        }

        let indices = self.chunk_service.missing(&session).await;
        let uploaded = session.total_chunks - indices.len();

        Ok(ChunkUploadResponse {
            chunk_index: index,
            status: match outcome {
                StoreOutcome::Stored => ChunkAcceptedStatus::Uploaded,
                StoreOutcome::AlreadyPresent => ChunkAcceptedStatus::AlreadyUploaded,
            },
            progress: UploadProgress {
                uploaded,
                total: session.total_chunks,
                percentage: if session.total_chunks == 0 {
                    100.0
                } else {
                    (uploaded as f64 / session.total_chunks as f64) * 100.0
                },
            },
        })
    }

    pub async fn status(&self, session_id: Uuid) -> Result<StatusResponse> {
        let session = self.load_session(session_id).await?;
        let missing = self.chunk_service.missing(&session).await;
        let uploaded = session.total_chunks - missing.len();

        Ok(StatusResponse {
            upload_id: session.id.to_string(),
            file_name: session.file_name,
            file_size: session.declared_size,
            total_chunks: session.total_chunks,
            uploaded_chunks: uploaded,
            missing_chunks: missing,
            status: session.status,
            created_at: session.created_at,
            expires_at: session.expires_at,
        })
    }

    /// Move a session along the state machine, invalidating the cache on
    /// every call — there is no code path that mutates `status` without
    /// also invalidating it.
    pub async fn transition(
        &self,
        session_id: Uuid,
        new_status: SessionStatus,
        final_path: Option<&str>,
    ) -> Result<()> {
        let current = self.load_session(session_id).await?;

        if current.status != new_status && !is_legal_transition(current.status, new_status) {
            return Err(UploadError::IllegalTransition {
                from: current.status.as_str().to_string(),
                to: new_status.as_str().to_string(),
            });
        }

        let repo = SessionRepository::new(&self.pool);
        repo.update_status(session_id, &[current.status], new_status, final_path).await?;
        self.invalidate_cache(session_id).await;

        Ok(())
    }

    /// Orchestrates the happy path from `UPLOADING` through to
    /// `COMPLETED`, per the state machine.
    pub async fn complete(&self, session_id: Uuid) -> Result<CompleteResponse> {
        let session = self.load_session(session_id).await?;

        if session.status != SessionStatus::Uploading {
            return Err(UploadError::IllegalTransition {
                from: session.status.as_str().to_string(),
                to: SessionStatus::Assembling.as_str().to_string(),
            });
        }

        // Check completeness before touching the state machine: a gap is
        // not a failure, just "not ready yet", and the session must stay
        // in `UPLOADING` so the client can fill the gap and retry. Once
        // we've transitioned to `ASSEMBLING` there is no legal edge back
        // to `UPLOADING`, so this has to happen first.
        let missing = self.chunk_service.missing(&session).await;
        if !missing.is_empty() {
            return Err(UploadError::MissingChunks(missing));
        }

        self.transition(session_id, SessionStatus::Assembling, None).await?;

        let assemble_result = self.chunk_service.assemble(&session).await;
        let final_key = match assemble_result {
            Ok(key) => key,
            Err(e) => {
                let _ = self.transition(session_id, SessionStatus::Failed, None).await;
                return Err(e);
            }
        };

        let bytes = match self.store.get(&final_key).await {
            Ok(bytes) => bytes,
            Err(e) => {
                let _ = self.transition(session_id, SessionStatus::Failed, None).await;
                return Err(e);
            }
        };

        let validator = Validator::new(&self.config);
        if let Err(e) = validator.verify_digest(session.expected_digest.as_deref(), &bytes) {
            let _ = self.transition(session_id, SessionStatus::Failed, None).await;
            return Err(e);
        }
        if let Err(e) = validator.verify_structure(&session.file_name, &bytes) {
            let _ = self.transition(session_id, SessionStatus::Failed, None).await;
            return Err(e);
        }

        self.transition(session_id, SessionStatus::Completed, Some(&final_key)).await?;

        let job = self
            .ai_pipeline
            .submit(session_id, &final_key, &session.metadata)
            .await;

        tracing::info!(session_id = %session_id, final_path = %final_key, "upload completed");

        let chunk_service = self.chunk_service.clone();
        tokio::spawn(async move {
            chunk_service.cleanup(session_id).await;
        });

        Ok(CompleteResponse {
            upload_id: session_id.to_string(),
            status: "completed".to_string(),
            file_path: final_key,
            ai_pipeline: AiPipelineSummary {
                status: job.status,
                estimated_time: job.estimated_time,
                job_id: job.job_id,
            },
        })
    }

    /// Fail and clean up every expired, non-terminal session. Runs off a
    /// `tokio::time::interval` background task started at boot, the same
    /// shape as the teacher's `SessionManager::start_cleanup_task`.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> usize {
        let repo = SessionRepository::new(&self.pool);
        let expired = match repo.list_expired(now).await {
            Ok(sessions) => sessions,
            Err(e) => {
                tracing::warn!(error = %e, "expiry sweep failed to list expired sessions");
                return 0;
            }
        };

        let mut count = 0;
        for session in expired {
            self.chunk_service.cleanup(session.id).await;
            if let Err(e) = self.transition(session.id, SessionStatus::Failed, None).await {
                tracing::warn!(session_id = %session.id, error = %e, "expiry sweep failed to transition session");
                continue;
            }
            tracing::info!(session_id = %session.id, "session expired and swept");
            count += 1;
        }

        count
    }

    pub fn start_sweep_task(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(300));
            loop {
                interval.tick().await;
                let swept = self.sweep_expired(Utc::now()).await;
                if swept > 0 {
                    tracing::info!(count = swept, "expiry sweep complete");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::FsObjectStore;
    use crate::upload::ai_hook::NoopPipeline;
    use crate::upload::chunk_index::ChunkIndex;
    use tempfile::TempDir;

    async fn test_service() -> (UploadService, TempDir) {
        let dir = TempDir::new().unwrap();
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        crate::db::initialize_schema(&pool).await.unwrap();

        let store: Arc<dyn ObjectStore> = Arc::new(FsObjectStore::new(dir.path().to_path_buf()));
        let config = Arc::new(UploadConfig::default());
        let chunk_service = ChunkService::new(
            store.clone(),
            ChunkIndex::new(),
            config.temp_prefix.clone(),
            config.final_prefix.clone(),
        );

        let service = UploadService::new(pool, store, chunk_service, Arc::new(NoopPipeline), config);
        (service, dir)
    }

    fn init_request(file_name: &str, size: u64) -> InitRequest {
        InitRequest {
            file_name: file_name.to_string(),
            file_size: size,
            file_type: "application/json".to_string(),
            checksum: None,
            metadata: None,
        }
    }

    #[test]
    fn legal_transitions_match_state_machine() {
        use SessionStatus::*;
        assert!(is_legal_transition(Init, Uploading));
        assert!(is_legal_transition(Uploading, Assembling));
        assert!(is_legal_transition(Assembling, Completed));
        assert!(is_legal_transition(Assembling, Assembling));
        assert!(!is_legal_transition(Uploading, Init));
        assert!(!is_legal_transition(Completed, Uploading));
        assert!(!is_legal_transition(Failed, Uploading));
    }

    #[tokio::test]
    async fn initialize_then_status_reports_all_chunks_missing() {
        let (service, _dir) = test_service().await;
        let init = service.initialize(init_request("data.json", 10)).await.unwrap();

        let session_id = Uuid::parse_str(&init.upload_id).unwrap();
        let status = service.status(session_id).await.unwrap();

        assert_eq!(status.uploaded_chunks, 0);
        assert_eq!(status.missing_chunks, (0..init.total_chunks).collect::<Vec<_>>());
        assert_eq!(status.status, SessionStatus::Init);
    }

    #[tokio::test]
    async fn accept_chunk_transitions_init_to_uploading() {
        let (service, _dir) = test_service().await;
        let mut config = UploadConfig::default();
        config.chunk_size = 4;
        let service = UploadService::new(
            service.pool.clone(),
            service.store.clone(),
            service.chunk_service.clone(),
            Arc::new(NoopPipeline),
            Arc::new(config),
        );

        let init = service.initialize(init_request("data.bin", 11)).await.unwrap();
        let session_id = Uuid::parse_str(&init.upload_id).unwrap();

        service.accept_chunk(session_id, 0, b"HELL").await.unwrap();

        let status = service.status(session_id).await.unwrap();
        assert_eq!(status.status, SessionStatus::Uploading);
        assert_eq!(status.uploaded_chunks, 1);
    }

    #[tokio::test]
    async fn complete_with_gap_reports_missing_chunks_and_stays_uploading() {
        let (service, _dir) = test_service().await;
        let mut config = UploadConfig::default();
        config.chunk_size = 4;
        let service = UploadService::new(
            service.pool.clone(),
            service.store.clone(),
            service.chunk_service.clone(),
            Arc::new(NoopPipeline),
            Arc::new(config),
        );

        let init = service.initialize(init_request("data.bin", 11)).await.unwrap();
        let session_id = Uuid::parse_str(&init.upload_id).unwrap();

        service.accept_chunk(session_id, 0, b"HELL").await.unwrap();
        service.accept_chunk(session_id, 2, b"LD!").await.unwrap();

        let err = service.complete(session_id).await.unwrap_err();
        assert!(matches!(err, UploadError::MissingChunks(_)));

        let status = service.status(session_id).await.unwrap();
        assert_eq!(status.status, SessionStatus::Uploading);
    }

    #[tokio::test]
    async fn complete_happy_path_assembles_bytes() {
        let (service, _dir) = test_service().await;
        let mut config = UploadConfig::default();
        config.chunk_size = 4;
        let service = UploadService::new(
            service.pool.clone(),
            service.store.clone(),
            service.chunk_service.clone(),
            Arc::new(NoopPipeline),
            Arc::new(config),
        );

        let init = service.initialize(init_request("data.bin", 11)).await.unwrap();
        let session_id = Uuid::parse_str(&init.upload_id).unwrap();

        service.accept_chunk(session_id, 2, b"LD!").await.unwrap();
        service.accept_chunk(session_id, 0, b"HELL").await.unwrap();
        service.accept_chunk(session_id, 1, b"OWOR").await.unwrap();

        let response = service.complete(session_id).await.unwrap();
        assert_eq!(response.status, "completed");

        let bytes = service.store.get(&response.file_path).await.unwrap();
        assert_eq!(bytes, b"HELLOWORLD!");
    }

    #[tokio::test]
    async fn sweep_expired_fails_expired_session() {
        let (service, _dir) = test_service().await;

        let init = service.initialize(init_request("data.json", 10)).await.unwrap();
        let session_id = Uuid::parse_str(&init.upload_id).unwrap();

        // Force the session into the past directly via the repository,
        // since `initialize` always sets a future `expires_at`.
        let repo = SessionRepository::new(&service.pool);
        sqlx::query("UPDATE upload_sessions SET expires_at = ?, status = ? WHERE id = ?")
            .bind((Utc::now() - chrono::Duration::hours(1)).to_rfc3339())
            .bind(SessionStatus::Uploading.as_str())
            .bind(session_id.to_string())
            .execute(&service.pool)
            .await
            .unwrap();
        drop(repo);
        service.invalidate_cache(session_id).await;

        let swept = service.sweep_expired(Utc::now()).await;
        assert_eq!(swept, 1);

        let status = service.status(session_id).await.unwrap();
        assert_eq!(status.status, SessionStatus::Failed);

        let err = service.accept_chunk(session_id, 0, b"x").await.unwrap_err();
        assert!(matches!(err, UploadError::SessionTerminal(_)));
    }
}
