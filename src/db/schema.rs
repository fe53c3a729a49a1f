//! Database schema initialization

use sqlx::SqlitePool;

use crate::error::Result;

/// Initialize the database schema. Idempotent — safe to call on every
/// boot, the way the teacher's `initialize_schema` is.
pub async fn initialize_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(SCHEMA_TABLES_SQL).execute(pool).await?;
    sqlx::query(SCHEMA_INDEXES_SQL).execute(pool).await?;
    Ok(())
}

const SCHEMA_TABLES_SQL: &str = r#"
-- Upload sessions: one row per session, the state-machine's source of truth.
CREATE TABLE IF NOT EXISTS upload_sessions (
    id TEXT PRIMARY KEY,
    owner_id TEXT,
    file_name TEXT NOT NULL,
    declared_size INTEGER NOT NULL,
    declared_type TEXT NOT NULL,
    expected_digest TEXT,
    chunk_size INTEGER NOT NULL,
    total_chunks INTEGER NOT NULL,
    status TEXT NOT NULL DEFAULT 'init',
    final_path TEXT,
    metadata TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    expires_at TEXT NOT NULL
);
"#;

const SCHEMA_INDEXES_SQL: &str = r#"
CREATE INDEX IF NOT EXISTS idx_upload_sessions_status ON upload_sessions(status);
CREATE INDEX IF NOT EXISTS idx_upload_sessions_owner ON upload_sessions(owner_id);
CREATE INDEX IF NOT EXISTS idx_upload_sessions_expires ON upload_sessions(expires_at);
"#;
