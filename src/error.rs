//! Crate-wide error type
//!
//! A single `thiserror`-derived enum, in the shape of the teacher's own
//! `upload::types::UploadError`: every handler returns
//! `Result<Json<T>, UploadError>` and leans on `?`, edge failures
//! (sqlx, IO, the S3 SDK) convert in via `#[from]` or an explicit
//! `map_err`, and `IntoResponse` maps each variant to the wire envelope
//! and HTTP status from the error taxonomy.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, UploadError>;

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("session expired: {0}")]
    SessionExpired(String),

    #[error("session is terminal: {0}")]
    SessionTerminal(String),

    #[error("illegal transition: {from} -> {to}")]
    IllegalTransition { from: String, to: String },

    #[error("chunk index out of bounds: {index} (total: {total})")]
    BadIndex { index: usize, total: usize },

    #[error("bad chunk size: expected {expected}, got {actual}")]
    BadChunkSize { expected: usize, actual: usize },

    #[error("missing chunks: {0:?}")]
    MissingChunks(Vec<usize>),

    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    #[error("structural validation failed: {0}")]
    Structural(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("backpressure: {0}")]
    Backpressure(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl UploadError {
    /// HTTP status for this error, per the taxonomy in the spec's error
    /// handling design.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::BadIndex { .. } | Self::BadChunkSize { .. } => {
                StatusCode::BAD_REQUEST
            }
            Self::SessionNotFound(_) | Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::SessionExpired(_) | Self::SessionTerminal(_) | Self::IllegalTransition { .. } => {
                StatusCode::CONFLICT
            }
            Self::MissingChunks(_) => StatusCode::BAD_REQUEST,
            Self::DigestMismatch { .. } => StatusCode::BAD_REQUEST,
            Self::Structural(_) => StatusCode::BAD_REQUEST,
            Self::Storage(_) | Self::Database(_) | Self::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::Backpressure(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-readable error code, drawn from the spec's taxonomy.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) | Self::BadIndex { .. } | Self::BadChunkSize { .. } => {
                "VALIDATION_ERROR"
            }
            Self::SessionNotFound(_) | Self::NotFound(_) => "NOT_FOUND",
            Self::SessionExpired(_) | Self::SessionTerminal(_) | Self::IllegalTransition { .. } => {
                "CONFLICT"
            }
            Self::MissingChunks(_) => "MISSING_CHUNKS",
            Self::DigestMismatch { .. } => "DIGEST_MISMATCH",
            Self::Structural(_) => "STRUCTURAL_ERROR",
            Self::Storage(_) | Self::Database(_) | Self::Io(_) => "STORAGE_ERROR",
            Self::Backpressure(_) => "BACKPRESSURE",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
    code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

#[derive(Serialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

impl IntoResponse for UploadError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();

        let details = match &self {
            Self::MissingChunks(indices) => {
                Some(serde_json::json!({ "missingChunks": indices }))
            }
            _ => None,
        };

        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, "request rejected");
        }

        let body = ErrorEnvelope {
            error: ErrorBody {
                message: self.to_string(),
                code,
                details,
            },
        };

        (status, Json(body)).into_response()
    }
}
