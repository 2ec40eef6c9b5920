use crate::catalog::FileCatalog;
use crate::config::DatabaseConfig;
use crate::error::{UploadError, UploadResult};
use crate::keys::strip_query;
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;
use tracing::{debug, error, info, instrument};

/// A persisted upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct FileRecord {
    /// Assigned by the database
    pub id: i64,
    /// Uploading user (opaque)
    pub user_id: String,
    /// Unique storage key the object was written under
    pub file_name: String,
    pub s3_bucket: String,
    pub s3_key: String,
    /// Object location without query parameters
    pub s3_url: String,
    pub content_type: String,
    /// Assigned by the database
    pub uploaded_at: DateTime<Utc>,
}

/// Insert payload for a [`FileRecord`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewFileRecord {
    pub user_id: String,
    pub file_name: String,
    pub s3_bucket: String,
    pub s3_key: String,
    pub s3_url: String,
    pub content_type: String,
}

impl NewFileRecord {
    /// Copy of this payload whose URL carries no query string
    pub fn canonicalized(&self) -> NewFileRecord {
        NewFileRecord {
            s3_url: strip_query(&self.s3_url).to_string(),
            ..self.clone()
        }
    }
}

/// Persists one record per successful transfer
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MetadataRecorder: Send + Sync {
    /// Append-only insert; returns the row with its server-assigned fields
    async fn record(&self, file: &NewFileRecord) -> UploadResult<FileRecord>;
}

/// File metadata in PostgreSQL
pub struct MetadataStore {
    pool: PgPool,
}

impl MetadataStore {
    /// Create a new metadata store with connection pool
    pub async fn new(config: &DatabaseConfig) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.connect_timeout())
            .idle_timeout(Some(config.idle_timeout()))
            .connect(&config.url)
            .await
            .context("Failed to connect to PostgreSQL")?;

        info!("Connected to PostgreSQL database");

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> anyhow::Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run migrations")?;

        info!("Database migrations completed");
        Ok(())
    }

    /// Insert a file record
    #[instrument(skip(self, file), fields(file_name = %file.file_name, user_id = %file.user_id))]
    pub async fn insert_file(&self, file: &NewFileRecord) -> UploadResult<FileRecord> {
        let file = file.canonicalized();

        let record = sqlx::query_as::<_, FileRecord>(
            r#"
            INSERT INTO files (
                user_id, file_name, s3_bucket, s3_key,
                s3_url, content_type, uploaded_at
            ) VALUES (
                $1, $2, $3, $4, $5, $6, NOW()
            )
            RETURNING id, user_id, file_name, s3_bucket, s3_key,
                      s3_url, content_type, uploaded_at
            "#,
        )
        .bind(&file.user_id)
        .bind(&file.file_name)
        .bind(&file.s3_bucket)
        .bind(&file.s3_key)
        .bind(&file.s3_url)
        .bind(&file.content_type)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            error!(error = %e, "Failed to insert file metadata");
            UploadError::Persistence(e.to_string())
        })?;

        debug!(id = record.id, s3_key = %record.s3_key, "File metadata inserted");
        metrics::counter!("uploads.records.inserted").increment(1);

        Ok(record)
    }

    /// All file records, oldest first
    pub async fn list_files(&self) -> UploadResult<Vec<FileRecord>> {
        sqlx::query_as::<_, FileRecord>(
            r#"
            SELECT id, user_id, file_name, s3_bucket, s3_key,
                   s3_url, content_type, uploaded_at
            FROM files
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| UploadError::Catalog(e.to_string()))
    }

    /// Check database connectivity
    pub async fn ping(&self) -> UploadResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(|e| UploadError::Catalog(e.to_string()))
    }

    /// Get the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl MetadataRecorder for MetadataStore {
    async fn record(&self, file: &NewFileRecord) -> UploadResult<FileRecord> {
        self.insert_file(file).await
    }
}

#[async_trait]
impl FileCatalog for MetadataStore {
    async fn list_files(&self) -> UploadResult<Vec<FileRecord>> {
        MetadataStore::list_files(self).await
    }

    async fn ping(&self) -> UploadResult<()> {
        MetadataStore::ping(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_file_record_canonicalized() {
        let file = NewFileRecord {
            user_id: "123".to_string(),
            file_name: "deal-1.xlsx".to_string(),
            s3_bucket: "chatbook-2023".to_string(),
            s3_key: "deal-1.xlsx".to_string(),
            s3_url: "https://chatbook-2023.s3.amazonaws.com/deal-1.xlsx?X-Amz-Signature=aa"
                .to_string(),
            content_type: "text/csv".to_string(),
        };

        let canonical = file.canonicalized();
        assert_eq!(
            canonical.s3_url,
            "https://chatbook-2023.s3.amazonaws.com/deal-1.xlsx"
        );
        assert_eq!(canonical.file_name, file.file_name);
    }

    #[test]
    fn test_new_file_record_camel_case() {
        let json = serde_json::json!({
            "userId": "123",
            "fileName": "deal-1.xlsx",
            "s3Bucket": "chatbook-2023",
            "s3Key": "deal-1.xlsx",
            "s3Url": "https://chatbook-2023.s3.amazonaws.com/deal-1.xlsx",
            "contentType": "text/csv"
        });

        let file: NewFileRecord = serde_json::from_value(json).unwrap();
        assert_eq!(file.s3_bucket, "chatbook-2023");
        assert_eq!(file.content_type, "text/csv");
    }

    #[test]
    fn test_file_record_serializes_columns() {
        let record = FileRecord {
            id: 7,
            user_id: "123".to_string(),
            file_name: "deal-1.xlsx".to_string(),
            s3_bucket: "chatbook-2023".to_string(),
            s3_key: "deal-1.xlsx".to_string(),
            s3_url: "https://chatbook-2023.s3.amazonaws.com/deal-1.xlsx".to_string(),
            content_type: "text/csv".to_string(),
            uploaded_at: Utc::now(),
        };

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["id"], 7);
        assert_eq!(json["file_name"], "deal-1.xlsx");
        assert!(json.get("uploaded_at").is_some());
    }
}
