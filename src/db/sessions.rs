//! Session Store
//!
//! Durable persistence for upload sessions, in the shape of the teacher's
//! `HighlightRepository<'a>`: a borrowed-pool repository struct, raw SQL
//! with bound parameters, manual row <-> domain-type conversion (the
//! `chrono` sqlx feature is not enabled, so timestamps are stored and
//! parsed as RFC3339 text, the same choice the teacher makes elsewhere).

use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::error::{Result, UploadError};
use crate::upload::types::{Session, SessionStatus};

pub struct SessionRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> SessionRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a freshly created session. Fails with `UploadError::Validation`
    /// if the id already exists — ids are UUIDv4, so a collision means a bug
    /// upstream, not a retryable condition.
    pub async fn insert(&self, session: &Session) -> Result<()> {
        let metadata = serde_json::to_string(&session.metadata)
            .map_err(|e| UploadError::Internal(format!("encode metadata: {e}")))?;

        let result = sqlx::query(
            r#"
            INSERT INTO upload_sessions
                (id, owner_id, file_name, declared_size, declared_type, expected_digest,
                 chunk_size, total_chunks, status, final_path, metadata,
                 created_at, updated_at, expires_at)
            SELECT ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?
            WHERE NOT EXISTS (SELECT 1 FROM upload_sessions WHERE id = ?)
            "#,
        )
        .bind(session.id.to_string())
        .bind(&session.owner_id)
        .bind(&session.file_name)
        .bind(session.declared_size as i64)
        .bind(&session.declared_type)
        .bind(&session.expected_digest)
        .bind(session.chunk_size as i64)
        .bind(session.total_chunks as i64)
        .bind(session.status.as_str())
        .bind(&session.final_path)
        .bind(metadata)
        .bind(session.created_at.to_rfc3339())
        .bind(session.updated_at.to_rfc3339())
        .bind(session.expires_at.to_rfc3339())
        .bind(session.id.to_string())
        .execute(self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(UploadError::Validation(format!(
                "session {} already exists",
                session.id
            )));
        }

        Ok(())
    }

    /// Load a session by id, `UploadError::SessionNotFound` if absent.
    pub async fn load(&self, session_id: Uuid) -> Result<Session> {
        let row = sqlx::query(
            r#"
            SELECT id, owner_id, file_name, declared_size, declared_type, expected_digest,
                   chunk_size, total_chunks, status, final_path, metadata,
                   created_at, updated_at, expires_at
            FROM upload_sessions
            WHERE id = ?
            "#,
        )
        .bind(session_id.to_string())
        .fetch_optional(self.pool)
        .await?;

        let row = row.ok_or_else(|| UploadError::SessionNotFound(session_id.to_string()))?;
        row_to_session(row)
    }

    /// Atomically move a session to `new_status`, optionally setting
    /// `final_path`. Refuses the write if the row isn't currently in one of
    /// `from_statuses` — the state machine's enforcement point.
    pub async fn update_status(
        &self,
        session_id: Uuid,
        from_statuses: &[SessionStatus],
        new_status: SessionStatus,
        final_path: Option<&str>,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let placeholders = from_statuses
            .iter()
            .map(|_| "?")
            .collect::<Vec<_>>()
            .join(", ");

        let query = format!(
            r#"
            UPDATE upload_sessions
            SET status = ?, final_path = COALESCE(?, final_path), updated_at = ?
            WHERE id = ? AND status IN ({placeholders})
            "#
        );

        let mut q = sqlx::query(&query)
            .bind(new_status.as_str())
            .bind(final_path)
            .bind(&now)
            .bind(session_id.to_string());

        for status in from_statuses {
            q = q.bind(status.as_str());
        }

        let result = q.execute(self.pool).await?;

        if result.rows_affected() == 0 {
            // Either the session doesn't exist, or it's not in an allowed
            // starting state. Tell the two apart for a clearer error.
            let current = self.load(session_id).await?;
            return Err(UploadError::IllegalTransition {
                from: current.status.as_str().to_string(),
                to: new_status.as_str().to_string(),
            });
        }

        Ok(())
    }

    /// Sessions past their `expires_at` that are still non-terminal.
    pub async fn list_expired(&self, now: DateTime<Utc>) -> Result<Vec<Session>> {
        let rows = sqlx::query(
            r#"
            SELECT id, owner_id, file_name, declared_size, declared_type, expected_digest,
                   chunk_size, total_chunks, status, final_path, metadata,
                   created_at, updated_at, expires_at
            FROM upload_sessions
            WHERE expires_at < ? AND status NOT IN (?, ?)
            "#,
        )
        .bind(now.to_rfc3339())
        .bind(SessionStatus::Completed.as_str())
        .bind(SessionStatus::Failed.as_str())
        .fetch_all(self.pool)
        .await?;

        rows.into_iter().map(row_to_session).collect()
    }
}

fn row_to_session(row: sqlx::sqlite::SqliteRow) -> Result<Session> {
    let id: String = row.try_get("id")?;
    let status: String = row.try_get("status")?;
    let metadata: String = row.try_get("metadata")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;
    let expires_at: String = row.try_get("expires_at")?;

    Ok(Session {
        id: Uuid::parse_str(&id).map_err(|e| UploadError::Internal(format!("bad session id: {e}")))?,
        owner_id: row.try_get("owner_id")?,
        file_name: row.try_get("file_name")?,
        declared_size: row.try_get::<i64, _>("declared_size")? as u64,
        declared_type: row.try_get("declared_type")?,
        expected_digest: row.try_get("expected_digest")?,
        chunk_size: row.try_get::<i64, _>("chunk_size")? as usize,
        total_chunks: row.try_get::<i64, _>("total_chunks")? as usize,
        status: SessionStatus::from_str(&status)
            .ok_or_else(|| UploadError::Internal(format!("bad status: {status}")))?,
        final_path: row.try_get("final_path")?,
        metadata: serde_json::from_str(&metadata)
            .map_err(|e| UploadError::Internal(format!("decode metadata: {e}")))?,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
        expires_at: parse_timestamp(&expires_at)?,
    })
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| UploadError::Internal(format!("bad timestamp {s}: {e}")))
}
