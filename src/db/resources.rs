//! Resource catalog backed by SQLite

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::catalog::{Catalog, CatalogError, CatalogStats, ResourceKind, ResourceRecord};

const SELECT_COLUMNS: &str = r#"
    SELECT id, management_token, original_name, upload_date, size, content_type,
           content_hash, expires_at, one_time_view, kind, access_count,
           uploader_ip, created_at, updated_at
    FROM resources
"#;

/// Raw row as stored
#[derive(Debug, sqlx::FromRow)]
struct ResourceRow {
    id: String,
    management_token: String,
    original_name: String,
    upload_date: DateTime<Utc>,
    size: i64,
    content_type: String,
    content_hash: String,
    expires_at: Option<DateTime<Utc>>,
    one_time_view: bool,
    kind: String,
    access_count: i64,
    uploader_ip: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ResourceRow> for ResourceRecord {
    type Error = CatalogError;

    fn try_from(row: ResourceRow) -> Result<Self, Self::Error> {
        let kind = row.kind.parse::<ResourceKind>().map_err(|reason| CatalogError::Corrupt {
            id: row.id.clone(),
            reason,
        })?;
        let size = u64::try_from(row.size).map_err(|_| CatalogError::Corrupt {
            id: row.id.clone(),
            reason: format!("negative size {}", row.size),
        })?;

        Ok(ResourceRecord {
            id: row.id,
            management_token: row.management_token,
            original_name: row.original_name,
            upload_date: row.upload_date,
            size,
            content_type: row.content_type,
            content_hash: row.content_hash,
            expires_at: row.expires_at,
            one_time_view: row.one_time_view,
            kind,
            access_count: row.access_count,
            uploader_ip: row.uploader_ip,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// SQLite implementation of [`Catalog`]
#[derive(Clone)]
pub struct SqliteCatalog {
    pool: SqlitePool,
}

impl SqliteCatalog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn fetch_one_where(
        &self,
        clause: &str,
        value: &str,
    ) -> Result<Option<ResourceRecord>, CatalogError> {
        let query = format!("{} WHERE {} = ?", SELECT_COLUMNS, clause);
        let row = sqlx::query_as::<_, ResourceRow>(&query)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?;

        row.map(ResourceRecord::try_from).transpose()
    }
}

#[async_trait]
impl Catalog for SqliteCatalog {
    async fn store(&self, record: &ResourceRecord) -> Result<(), CatalogError> {
        let size = i64::try_from(record.size).map_err(|_| CatalogError::Corrupt {
            id: record.id.clone(),
            reason: format!("size {} out of range", record.size),
        })?;

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO resources (
                id, management_token, original_name, upload_date, size, content_type,
                content_hash, expires_at, one_time_view, kind, access_count,
                uploader_ip, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.id)
        .bind(&record.management_token)
        .bind(&record.original_name)
        .bind(record.upload_date)
        .bind(size)
        .bind(&record.content_type)
        .bind(&record.content_hash)
        .bind(record.expires_at)
        .bind(record.one_time_view)
        .bind(record.kind.as_str())
        .bind(record.access_count)
        .bind(&record.uploader_ip)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<ResourceRecord>, CatalogError> {
        self.fetch_one_where("id", id).await
    }

    async fn get_by_token(&self, token: &str) -> Result<Option<ResourceRecord>, CatalogError> {
        self.fetch_one_where("management_token", token).await
    }

    async fn delete(&self, id: &str) -> Result<bool, CatalogError> {
        let result = sqlx::query("DELETE FROM resources WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_all(&self) -> Result<Vec<ResourceRecord>, CatalogError> {
        let query = format!("{} ORDER BY upload_date ASC", SELECT_COLUMNS);
        let rows = sqlx::query_as::<_, ResourceRow>(&query)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(ResourceRecord::try_from).collect()
    }

    async fn stats(&self, kind: Option<ResourceKind>) -> Result<CatalogStats, CatalogError> {
        let kind = kind.map(|k| k.as_str());
        let (count, total_size) = sqlx::query_as::<_, (i64, i64)>(
            r#"
            SELECT COUNT(*), COALESCE(SUM(size), 0)
            FROM resources
            WHERE ? IS NULL OR kind = ?
            "#,
        )
        .bind(kind)
        .bind(kind)
        .fetch_one(&self.pool)
        .await?;

        Ok(CatalogStats {
            count: count.max(0) as u64,
            total_size: total_size.max(0) as u64,
        })
    }

    async fn record_access(&self, id: &str) -> Result<(), CatalogError> {
        sqlx::query(
            r#"
            UPDATE resources
            SET access_count = access_count + 1, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
