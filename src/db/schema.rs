//! Database schema initialization

use sqlx::SqlitePool;

/// Initialize the database schema
pub async fn initialize_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(SCHEMA_SQL)
        .execute(pool)
        .await?;

    Ok(())
}

const SCHEMA_SQL: &str = r#"
-- Hosted resources (files and short links)
CREATE TABLE IF NOT EXISTS resources (
    id TEXT PRIMARY KEY,
    management_token TEXT NOT NULL UNIQUE,
    original_name TEXT NOT NULL,
    upload_date TEXT NOT NULL,
    size INTEGER NOT NULL,
    content_type TEXT NOT NULL,
    content_hash TEXT NOT NULL DEFAULT '',
    -- NULL: retention computed from size on demand
    expires_at TEXT,
    one_time_view INTEGER NOT NULL DEFAULT 0,
    -- 'file' or 'url-shortener'
    kind TEXT NOT NULL DEFAULT 'file',
    access_count INTEGER NOT NULL DEFAULT 0,
    uploader_ip TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_resources_token ON resources(management_token);
CREATE INDEX IF NOT EXISTS idx_resources_kind ON resources(kind);
CREATE INDEX IF NOT EXISTS idx_resources_expires ON resources(expires_at);
"#;
