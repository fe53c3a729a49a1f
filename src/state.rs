//! Application state management

use std::sync::Arc;

use sqlx::SqlitePool;

use crate::config::Config;
use crate::storage::ObjectStore;
use crate::upload::{AiPipeline, ChunkIndex, ChunkService, NoopPipeline, UploadService, WebhookPipeline};

/// Shared application state, constructed once in `main` and threaded
/// through the router, mirroring the teacher's own
/// `AppState::new(config, s3_client, db_pool)` composition.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: Config,
    db: SqlitePool,
    upload_service: Arc<UploadService>,
}

impl AppState {
    pub async fn new(config: Config, store: Arc<dyn ObjectStore>, db: SqlitePool) -> Self {
        let chunk_service = ChunkService::new(
            store.clone(),
            ChunkIndex::new(),
            config.upload.temp_prefix.clone(),
            config.upload.final_prefix.clone(),
        );

        let ai_pipeline: Arc<dyn AiPipeline> = match &config.upload.ai_hook_url {
            Some(url) => Arc::new(WebhookPipeline::new(url.clone())),
            None => Arc::new(NoopPipeline),
        };

        let upload_service = Arc::new(UploadService::new(
            db.clone(),
            store,
            chunk_service,
            ai_pipeline,
            Arc::new(config.upload.clone()),
        ));

        Self {
            inner: Arc::new(AppStateInner {
                config,
                db,
                upload_service,
            }),
        }
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn db(&self) -> &SqlitePool {
        &self.inner.db
    }

    pub fn upload_service(&self) -> &Arc<UploadService> {
        &self.inner.upload_service
    }
}
