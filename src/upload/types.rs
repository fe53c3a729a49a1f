//! Wire and domain types for the chunked upload protocol.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A session's current place in the state machine in `session_service`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Init,
    Uploading,
    Assembling,
    Completed,
    Failed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Uploading => "uploading",
            Self::Assembling => "assembling",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "init" => Some(Self::Init),
            "uploading" => Some(Self::Uploading),
            "assembling" => Some(Self::Assembling),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// A session is the top-level entity, one per upload.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: Uuid,
    pub owner_id: Option<String>,
    pub file_name: String,
    pub declared_size: u64,
    pub declared_type: String,
    pub expected_digest: Option<String>,
    pub chunk_size: usize,
    pub total_chunks: usize,
    pub status: SessionStatus,
    pub final_path: Option<String>,
    pub metadata: HashMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }

    /// Expected byte length of chunk `index`, accounting for a short final
    /// chunk.
    pub fn expected_chunk_size(&self, index: usize) -> usize {
        if index == self.total_chunks - 1 {
            let full = (self.total_chunks - 1) * self.chunk_size;
            (self.declared_size as usize).saturating_sub(full)
        } else {
            self.chunk_size
        }
    }
}

/// A record of one accepted chunk, keyed by `(session_id, index)`.
#[derive(Debug, Clone)]
pub struct ChunkRecord {
    pub index: usize,
    pub size: usize,
    pub stored_at: DateTime<Utc>,
    pub storage_key: String,
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitRequest {
    pub file_name: String,
    pub file_size: u64,
    pub file_type: String,
    #[serde(default)]
    pub checksum: Option<String>,
    #[serde(default)]
    pub metadata: Option<HashMap<String, serde_json::Value>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitResponse {
    pub upload_id: String,
    pub chunk_size: usize,
    pub total_chunks: usize,
    pub upload_url: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkUploadRequest {
    pub upload_id: String,
    pub chunk_index: usize,
    /// Advisory only — the session's own `total_chunks` is authoritative.
    #[serde(default)]
    pub total_chunks: Option<usize>,
    pub data: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkUploadResponse {
    pub chunk_index: usize,
    pub status: ChunkAcceptedStatus,
    pub progress: UploadProgress,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkAcceptedStatus {
    Uploaded,
    AlreadyUploaded,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadProgress {
    pub uploaded: usize,
    pub total: usize,
    pub percentage: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub upload_id: String,
    pub file_name: String,
    pub file_size: u64,
    pub total_chunks: usize,
    pub uploaded_chunks: usize,
    pub missing_chunks: Vec<usize>,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteRequest {
    pub upload_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteResponse {
    pub upload_id: String,
    pub status: String,
    pub file_path: String,
    pub ai_pipeline: AiPipelineSummary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiPipelineSummary {
    pub status: String,
    pub estimated_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
}

/// Outcome of `ChunkService::store_chunk`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOutcome {
    Stored,
    AlreadyPresent,
}
