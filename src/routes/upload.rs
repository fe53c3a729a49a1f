//! Upload Routes
//!
//! HTTP endpoints for the chunked upload protocol:
//! - POST /api/upload/init
//! - POST /api/upload/chunk
//! - GET  /api/upload/status/:uploadId
//! - POST /api/upload/complete

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use base64::Engine;
use uuid::Uuid;

use crate::error::{Result, UploadError};
use crate::state::AppState;
use crate::upload::{ChunkUploadRequest, CompleteRequest, CompleteResponse, InitRequest, InitResponse, StatusResponse};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/upload/init", post(init))
        .route("/api/upload/chunk", post(upload_chunk))
        .route("/api/upload/status/{upload_id}", get(status))
        .route("/api/upload/complete", post(complete))
}

async fn init(
    State(state): State<AppState>,
    Json(request): Json<InitRequest>,
) -> Result<(axum::http::StatusCode, Json<InitResponse>)> {
    let response = state.upload_service().initialize(request).await?;
    Ok((axum::http::StatusCode::CREATED, Json(response)))
}

async fn upload_chunk(
    State(state): State<AppState>,
    Json(request): Json<ChunkUploadRequest>,
) -> Result<Json<crate::upload::ChunkUploadResponse>> {
    let session_id = parse_session_id(&request.upload_id)?;

    let payload = base64::engine::general_purpose::STANDARD
        .decode(&request.data)
        .map_err(|e| UploadError::Validation(format!("invalid base64 payload: {e}")))?;

    let response = state
        .upload_service()
        .accept_chunk(session_id, request.chunk_index, &payload)
        .await?;

    Ok(Json(response))
}

async fn status(
    State(state): State<AppState>,
    Path(upload_id): Path<String>,
) -> Result<Json<StatusResponse>> {
    let session_id = parse_session_id(&upload_id)?;
    let response = state.upload_service().status(session_id).await?;
    Ok(Json(response))
}

async fn complete(
    State(state): State<AppState>,
    Json(request): Json<CompleteRequest>,
) -> Result<Json<CompleteResponse>> {
    let session_id = parse_session_id(&request.upload_id)?;
    let response = state.upload_service().complete(session_id).await?;
    Ok(Json(response))
}

fn parse_session_id(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).map_err(|_| UploadError::SessionNotFound(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, StorageConfig, StorageProvider};
    use crate::storage::{FsObjectStore, ObjectStore};
    use axum_test::TestServer;
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::TempDir;

    async fn test_app() -> (TestServer, TempDir) {
        let dir = TempDir::new().unwrap();
        let pool = sqlx::SqlitePool::connect("sqlite::memory:").await.unwrap();
        crate::db::initialize_schema(&pool).await.unwrap();

        let mut config = Config::default();
        config.upload.chunk_size = 4;
        config.storage = StorageConfig {
            provider: StorageProvider::Fs,
            fs_base_path: dir.path().to_string_lossy().to_string(),
            ..config.storage
        };

        let store: Arc<dyn ObjectStore> = Arc::new(FsObjectStore::new(dir.path().to_path_buf()));
        let state = AppState::new(config, store, pool).await;

        let app = Router::new().merge(router()).with_state(state);
        (TestServer::new(app).unwrap(), dir)
    }

    #[tokio::test]
    async fn happy_path_three_chunks_round_trips() {
        let (server, _dir) = test_app().await;

        let init = server
            .post("/api/upload/init")
            .json(&json!({"fileName": "data.bin", "fileSize": 11, "fileType": "application/octet-stream"}))
            .await;
        init.assert_status(axum::http::StatusCode::CREATED);
        let init_body: InitResponse = init.json();
        assert_eq!(init_body.total_chunks, 3);

        let encode = |s: &str| base64::engine::general_purpose::STANDARD.encode(s);

        for (index, chunk) in [(2, "LD!"), (0, "HELL"), (1, "OWOR")] {
            let resp = server
                .post("/api/upload/chunk")
                .json(&json!({
                    "uploadId": init_body.upload_id,
                    "chunkIndex": index,
                    "data": encode(chunk),
                }))
                .await;
            resp.assert_status_ok();
        }

        let complete = server
            .post("/api/upload/complete")
            .json(&json!({"uploadId": init_body.upload_id}))
            .await;
        complete.assert_status_ok();
        let complete_body: CompleteResponse = complete.json();
        assert_eq!(complete_body.status, "completed");
    }

    #[tokio::test]
    async fn duplicate_chunk_is_already_uploaded() {
        let (server, _dir) = test_app().await;

        let init = server
            .post("/api/upload/init")
            .json(&json!({"fileName": "data.bin", "fileSize": 11, "fileType": "application/octet-stream"}))
            .await;
        let init_body: InitResponse = init.json();

        let encode = |s: &str| base64::engine::general_purpose::STANDARD.encode(s);

        let first = server
            .post("/api/upload/chunk")
            .json(&json!({"uploadId": init_body.upload_id, "chunkIndex": 0, "data": encode("HELL")}))
            .await;
        let first_body: crate::upload::ChunkUploadResponse = first.json();
        assert!(matches!(
            first_body.status,
            crate::upload::ChunkAcceptedStatus::Uploaded
        ));

        let second = server
            .post("/api/upload/chunk")
            .json(&json!({"uploadId": init_body.upload_id, "chunkIndex": 0, "data": encode("HELL")}))
            .await;
        let second_body: crate::upload::ChunkUploadResponse = second.json();
        assert!(matches!(
            second_body.status,
            crate::upload::ChunkAcceptedStatus::AlreadyUploaded
        ));
    }

    #[tokio::test]
    async fn completion_with_gap_reports_missing_chunks() {
        let (server, _dir) = test_app().await;

        let init = server
            .post("/api/upload/init")
            .json(&json!({"fileName": "data.bin", "fileSize": 11, "fileType": "application/octet-stream"}))
            .await;
        let init_body: InitResponse = init.json();

        let encode = |s: &str| base64::engine::general_purpose::STANDARD.encode(s);
        server
            .post("/api/upload/chunk")
            .json(&json!({"uploadId": init_body.upload_id, "chunkIndex": 0, "data": encode("HELL")}))
            .await;
        server
            .post("/api/upload/chunk")
            .json(&json!({"uploadId": init_body.upload_id, "chunkIndex": 2, "data": encode("LD!")}))
            .await;

        let complete = server
            .post("/api/upload/complete")
            .json(&json!({"uploadId": init_body.upload_id}))
            .await;
        complete.assert_status_bad_request();
        let body: serde_json::Value = complete.json();
        assert_eq!(body["error"]["code"], "MISSING_CHUNKS");
        assert_eq!(body["error"]["details"]["missingChunks"], json!([1]));
    }

    #[tokio::test]
    async fn status_for_unknown_session_is_not_found() {
        let (server, _dir) = test_app().await;
        let resp = server
            .get(&format!("/api/upload/status/{}", Uuid::new_v4()))
            .await;
        resp.assert_status_not_found();
    }
}
